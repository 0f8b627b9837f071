//! Generation task lifecycle and execution pipeline.
//!
//! Tasks are claimed through a conditional write, driven through base image
//! generation and a bounded variation fan-out, then finalised with a single
//! conditional write. An independent reaper fails tasks abandoned past a
//! timeout. The module follows hexagonal architecture:
//!
//! - Domain types in [`domain`]
//! - Port contracts in [`ports`]
//! - Adapter implementations in [`adapters`]
//! - Orchestration services in [`services`]

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod services;

#[cfg(test)]
mod tests;
