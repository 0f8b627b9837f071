//! `PostgreSQL` adapters for generation task persistence.

mod models;
mod repository;
mod schema;

pub use repository::{GenerationPgPool, PostgresTaskStore};
