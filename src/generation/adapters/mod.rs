//! Adapter implementations of the generation ports.

pub mod memory;
pub mod postgres;
