//! Detached background work.

use std::future::Future;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Runs `future` on the current tokio runtime without blocking the caller.
///
/// The future must handle its own failures. Returns `None` (and logs) when
/// called outside a runtime, in which case the work is dropped.
pub(crate) fn spawn_detached<F>(name: &'static str, future: F) -> Option<JoinHandle<()>>
where
    F: Future<Output = ()> + Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) => Some(handle.spawn(future)),
        Err(_) => {
            log::warn!(task = name; "no async runtime, background task dropped");
            None
        }
    }
}
