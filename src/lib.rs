//! Hueforge: asynchronous concept generation worker.
//!
//! This crate runs generation tasks (a base image plus a set of color
//! variations) exactly-once-effectively across a fleet of stateless workers
//! that may restart, race, or receive the same message twice.
//!
//! # Architecture
//!
//! Hueforge follows hexagonal architecture principles:
//!
//! - **Domain**: task lifecycle and generated artifacts, free of
//!   infrastructure
//! - **Ports**: trait interfaces for the task store, the generation service
//!   and object storage
//! - **Adapters**: in-memory and `PostgreSQL` implementations of the ports
//!
//! Workers coordinate only through conditional writes against the task
//! store; no lock is ever held across processes.
//!
//! # Modules
//!
//! - [`generation`]: task lifecycle, claim, pipeline and reaper
//! - [`worker`]: per-message entry point with lazy service bootstrap
//! - [`config`]: layered settings
//! - [`telemetry`]: tracing subscriber setup

pub mod config;
pub mod generation;
pub mod telemetry;
pub mod worker;
