//! Thin layer over the Tokio runtime.

use std::future::Future;
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
#[error("operation timed out")]
pub struct TimeoutError;

pub type JoinHandle<T> = tokio::task::JoinHandle<T>;

pub async fn timeout<F: Future>(duration: Duration, f: F) -> Result<F::Output, TimeoutError> {
    tokio::time::timeout(duration, f)
        .await
        .map_err(|_| TimeoutError)
}

pub async fn sleep(duration: Duration) {
    tokio::time::sleep(duration).await
}

pub async fn sleep_until(instant: Instant) {
    tokio::time::sleep_until(instant.into()).await
}

pub async fn yield_now() {
    tokio::task::yield_now().await
}

/// Spawn `fut` on the current runtime, or return it back if there is none.
///
/// Connections are released from `Drop` impls which may run after the runtime has shut down.
pub fn try_spawn<F>(fut: F) -> Result<JoinHandle<F::Output>, F>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => Ok(handle.spawn(fut)),
        Err(_) => Err(fut),
    }
}
