//! Step definitions for generation lifecycle scenarios.

pub mod given;
pub mod when;
pub mod world;
