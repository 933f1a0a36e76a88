use std::{
    future::Future,
    io,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use futures::FutureExt;
use tokio::signal::unix::{Signal, SignalKind};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

/// A `ShutdownSignal` is an helper struct that listens for various shutdown signals sources.
pub struct ShutdownSignal {
    /// A future that resolves when a SIGINT signal is received.
    ctrl_c: Pin<Box<dyn Future<Output = io::Result<()>> + Send>>,
    /// A stream that yields when a SIGTERM signal is received.
    term_signal: Option<Signal>,
}

impl std::fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownSignal").finish_non_exhaustive()
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    /// Creates a new `ShutdownSignal` instance.
    ///
    /// Must be called from within a tokio runtime. If the SIGTERM handler cannot
    /// be installed only SIGINT is listened for.
    pub fn new() -> Self {
        let ctrl_c = Box::pin(tokio::signal::ctrl_c());
        let term_signal = match tokio::signal::unix::signal(SignalKind::terminate()) {
            Ok(signal) => Some(signal),
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                None
            }
        };

        Self { ctrl_c, term_signal }
    }
}

impl Future for ShutdownSignal {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if this.ctrl_c.poll_unpin(cx).is_ready() {
            debug!("Received SIGINT signal");
            return Poll::Ready(());
        }

        if let Some(term) = this.term_signal.as_mut() {
            if term.poll_recv(cx).is_ready() {
                debug!("Received SIGTERM signal");
                return Poll::Ready(());
            }
        }

        Poll::Pending
    }
}

/// Run a future until it completes or `shutdown` resolves, whichever is first.
///
/// Returns `None` if the shutdown won.
pub async fn run_until_shutdown<F, O>(fut: F, shutdown: impl Future<Output = ()>) -> Option<O>
where
    F: Future<Output = O>,
{
    tokio::select! {
        // NOTE: wrap with a `Box` so we don't allocate a
        // huge future state machine on the stack.
        result = Box::pin(fut) => Some(result),
        _ = shutdown => None,
    }
}

/// Cancel `token`, close `tracker` and wait for its tasks for at most `timeout`.
///
/// Returns `true` if every tracked task finished in time.
pub async fn graceful_shutdown(
    token: &CancellationToken,
    tracker: &TaskTracker,
    timeout: Duration,
) -> bool {
    token.cancel();
    tracker.close();
    debug!(tasks = tracker.len(), "Waiting for background tasks");

    if tokio::time::timeout(timeout, tracker.wait()).await.is_ok() {
        info!("Background tasks stopped");
        true
    } else {
        warn!(tasks = tracker.len(), ?timeout, "Graceful shutdown timeout exceeded");
        false
    }
}
