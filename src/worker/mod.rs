//! Queue-triggered worker: envelope decoding, lazy service bootstrap and
//! dispatch to the processor registered for each task kind.

mod bootstrap;
mod entry;
mod envelope;
mod registry;

pub use bootstrap::{
    BootstrapError, ExternalClients, InitializationError, LazyServices, PostgresServiceFactory,
    RetryPolicy, ServiceBundle, ServiceFactory, connect_pool,
};
pub use entry::{InvocationOutcome, SkipReason, WorkerEntryPoint, WorkerError};
pub use envelope::{EnvelopeError, InboundMessage};
pub use registry::ProcessorRegistry;
