//! In-memory adapters for tests and local runs.

mod generation;
mod object_store;
mod task_store;

pub use generation::ScriptedGenerationClient;
pub use object_store::InMemoryObjectStore;
pub use task_store::InMemoryTaskStore;
