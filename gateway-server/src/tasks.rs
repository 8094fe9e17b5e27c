//! Background task supervision.

use std::future::Future;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::error;

/// Spawn a long-lived task whose panics are caught and logged.
///
/// A panicking health loop or fan-out worker must never take the process
/// down; the panic terminates only the task it happened in.
pub fn spawn_supervised<F>(name: &'static str, fut: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(panic) = std::panic::AssertUnwindSafe(fut).catch_unwind().await {
            let cause = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            error!(task = name, "background task panicked: {cause}");
        }
    })
}
