#![allow(clippy::redundant_pub_crate)]

use eyre::Result;
use tokio::time::{Duration, sleep};
use tracing::error;

/// Delay between two subscription attempts.
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);

/// Call `subscribe_fn` until it yields a stream, waiting between failed attempts.
pub(crate) async fn subscribe_with_retry<F, Fut, T>(mut subscribe_fn: F, name: &str) -> T
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match subscribe_fn().await {
            Ok(stream) => return stream,
            Err(e) => {
                attempt += 1;
                error!(stream = name, attempt, error = %e, "subscribe failed, retrying in 5s");
                sleep(RESUBSCRIBE_DELAY).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn retries_until_subscribed() {
        let calls = AtomicU32::new(0);
        let value = subscribe_with_retry(
            || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    eyre::bail!("connection refused")
                }
                Ok("stream")
            },
            "test",
        )
        .await;

        assert_eq!(value, "stream");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
