//! Per-call deadlines for external collaborators.

use std::future::Future;
use std::time::Duration;

/// Awaits `call`, converting an elapsed deadline into `on_elapsed(limit)`.
pub(crate) async fn with_deadline<T, E, F>(
    limit: Duration,
    call: F,
    on_elapsed: fn(Duration) -> E,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or_else(|_| Err(on_elapsed(limit)))
}
