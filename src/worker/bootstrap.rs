//! Lazily-built service handles with bounded cold-start retry.

use super::registry::ProcessorRegistry;
use crate::config::DatabaseSettings;
use crate::generation::{
    adapters::postgres::{GenerationPgPool, PostgresTaskStore},
    ports::{GenerationClient, ObjectStore, TaskStore},
    services::{PipelineSettings, ProcessorDeps},
};
use async_trait::async_trait;
use diesel::pg::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool};
use mockable::Clock;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{info, instrument, warn};

/// Failure of a single bootstrap attempt.
#[derive(Debug, Clone, Error)]
#[error("service initialization failed: {message}")]
pub struct InitializationError {
    message: String,
}

impl InitializationError {
    /// Wraps a bootstrap failure cause.
    pub fn new(cause: impl fmt::Display) -> Self {
        Self {
            message: cause.to_string(),
        }
    }

    /// Returns the failure cause.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Bootstrap gave up for this invocation.
#[derive(Debug, Clone, Error)]
pub enum BootstrapError {
    /// Every attempt failed.
    #[error("service bootstrap exhausted after {attempts} attempts: {last}")]
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// Error from the final attempt.
        last: InitializationError,
    },
}

/// Linear backoff: attempt `n` is followed by a `base_delay * n` sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy; at least one attempt is always made.
    #[must_use]
    pub const fn new(max_attempts: u32, base_delay: Duration) -> Self {
        let attempts = if max_attempts == 0 { 1 } else { max_attempts };
        Self {
            max_attempts: attempts,
            base_delay,
        }
    }

    /// Returns the attempt limit.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the sleep after failed attempt `attempt` (1-based).
    #[must_use]
    pub const fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500))
    }
}

/// Handles shared by every invocation on a warm process.
#[derive(Clone)]
pub struct ServiceBundle {
    store: Arc<dyn TaskStore>,
    processors: ProcessorRegistry,
}

impl ServiceBundle {
    /// Bundles a task store with the processors that use it.
    #[must_use]
    pub fn new(store: Arc<dyn TaskStore>, processors: ProcessorRegistry) -> Self {
        Self { store, processors }
    }

    /// Returns the task store.
    #[must_use]
    pub fn store(&self) -> &dyn TaskStore {
        self.store.as_ref()
    }

    /// Returns the processor registry.
    #[must_use]
    pub const fn processors(&self) -> &ProcessorRegistry {
        &self.processors
    }
}

impl fmt::Debug for ServiceBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBundle")
            .field("processors", &self.processors)
            .finish_non_exhaustive()
    }
}

/// Builds a [`ServiceBundle`]; one call is one bootstrap attempt.
#[async_trait]
pub trait ServiceFactory: Send + Sync {
    /// Performs one bootstrap attempt.
    async fn build(&self) -> Result<ServiceBundle, InitializationError>;
}

/// Initializes a [`ServiceBundle`] at most once per process.
///
/// A failed initialization leaves nothing cached, so the next invocation
/// starts a fresh round of attempts.
pub struct LazyServices<F>
where
    F: ServiceFactory,
{
    factory: F,
    policy: RetryPolicy,
    bundle: OnceCell<Arc<ServiceBundle>>,
}

impl<F> LazyServices<F>
where
    F: ServiceFactory,
{
    /// Creates an uninitialized holder.
    #[must_use]
    pub fn new(factory: F, policy: RetryPolicy) -> Self {
        Self {
            factory,
            policy,
            bundle: OnceCell::new(),
        }
    }

    /// Returns `true` once a bundle has been built.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.bundle.initialized()
    }

    /// Returns the shared bundle, building it on first use.
    ///
    /// Concurrent callers wait on the same initialization.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Exhausted`] when every attempt fails.
    pub async fn get(&self) -> Result<Arc<ServiceBundle>, BootstrapError> {
        self.bundle
            .get_or_try_init(|| self.initialize())
            .await
            .map(Arc::clone)
    }

    #[instrument(skip(self), fields(max_attempts = self.policy.max_attempts()))]
    async fn initialize(&self) -> Result<Arc<ServiceBundle>, BootstrapError> {
        let mut attempt = 1;
        loop {
            match self.factory.build().await {
                Ok(bundle) => {
                    info!(attempt, "services initialized");
                    return Ok(Arc::new(bundle));
                }
                Err(err) if attempt >= self.policy.max_attempts() => {
                    warn!(attempt, error = %err, "service bootstrap exhausted");
                    return Err(BootstrapError::Exhausted {
                        attempts: attempt,
                        last: err,
                    });
                }
                Err(err) => {
                    let delay = self.policy.delay_after(attempt);
                    warn!(
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "service bootstrap attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Bootstraps a `PostgreSQL` task store and the concept processors.
///
/// The connection pool is the expensive, failure-prone part of a cold
/// start; the generation and object store clients are supplied ready-made.
pub struct PostgresServiceFactory<G, O, C>
where
    G: GenerationClient + 'static,
    O: ObjectStore + 'static,
    C: Clock + Send + Sync + 'static,
{
    database: DatabaseSettings,
    generator: Arc<G>,
    objects: Arc<O>,
    clock: Arc<C>,
    settings: Arc<PipelineSettings>,
}

/// External collaborators handed to [`PostgresServiceFactory`].
pub struct ExternalClients<G, O, C> {
    /// Generation service client.
    pub generator: Arc<G>,
    /// Object store client.
    pub objects: Arc<O>,
    /// Clock for timestamps.
    pub clock: Arc<C>,
}

impl<G, O, C> PostgresServiceFactory<G, O, C>
where
    G: GenerationClient + 'static,
    O: ObjectStore + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Creates a factory connecting with `database`.
    #[must_use]
    pub fn new(
        database: DatabaseSettings,
        clients: ExternalClients<G, O, C>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            database,
            generator: clients.generator,
            objects: clients.objects,
            clock: clients.clock,
            settings: Arc::new(settings),
        }
    }
}

/// Builds a connection pool, blocking until the first connection is made
/// or the configured connect timeout elapses.
///
/// # Errors
///
/// Returns [`InitializationError`] when no connection can be established.
pub async fn connect_pool(
    database: &DatabaseSettings,
) -> Result<GenerationPgPool, InitializationError> {
    let manager = ConnectionManager::<PgConnection>::new(database.url.as_str());
    let builder = Pool::builder()
        .max_size(database.pool_size)
        .connection_timeout(database.connect_timeout());
    tokio::task::spawn_blocking(move || builder.build(manager))
        .await
        .map_err(InitializationError::new)?
        .map_err(InitializationError::new)
}

#[async_trait]
impl<G, O, C> ServiceFactory for PostgresServiceFactory<G, O, C>
where
    G: GenerationClient + 'static,
    O: ObjectStore + 'static,
    C: Clock + Send + Sync + 'static,
{
    async fn build(&self) -> Result<ServiceBundle, InitializationError> {
        let pool = connect_pool(&self.database).await?;
        let store = Arc::new(PostgresTaskStore::new(pool));
        let deps = ProcessorDeps {
            store: Arc::clone(&store),
            generator: Arc::clone(&self.generator),
            objects: Arc::clone(&self.objects),
            clock: Arc::clone(&self.clock),
            settings: Arc::clone(&self.settings),
        };
        let processors = ProcessorRegistry::with_concept_processors(&deps);
        Ok(ServiceBundle::new(store, processors))
    }
}
