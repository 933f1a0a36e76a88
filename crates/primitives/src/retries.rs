use std::time::Duration;

use alloy::{
    providers::WsConnect,
    pubsub::{ConnectionHandle, PubSubConnect},
    transports::{
        TransportError, TransportResult,
        http::reqwest::Url,
        layers::{RateLimitRetryPolicy, RetryBackoffLayer, RetryPolicy},
    },
};
use tokio_retry::{Retry, RetryIf, strategy::ExponentialBackoff};
use tracing::warn;

/// The default maximum number of retries for a transport error.
///
/// With a `DEFAULT_INITIAL_BACKOFF_MS` of 1ms we can do 9 retries in ~500ms:
const DEFAULT_MAX_RETRIES: u32 = 9;

/// The default initial backoff time in milliseconds for a transport error.
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 1;

/// Compute units per second assumed for the chain source.
const DEFAULT_COMPUTE_UNITS_PER_SECOND: u64 = 100;

/// The default [`RetryBackoffLayer`] for a transport error.
pub const DEFAULT_RETRY_LAYER: RetryBackoffLayer<ConnectivityRetryPolicy> =
    RetryBackoffLayer::new_with_policy(
        DEFAULT_MAX_RETRIES,
        DEFAULT_INITIAL_BACKOFF_MS,
        DEFAULT_COMPUTE_UNITS_PER_SECOND,
        ConnectivityRetryPolicy,
    );

/// A [`WsConnect`] wrapper that reconnects with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryWsConnect {
    inner: WsConnect,
    strategy: ExponentialBackoff,
}

impl RetryWsConnect {
    /// Create a new `RetryWsConnect` starting at [`DEFAULT_INITIAL_BACKOFF_MS`].
    #[inline]
    pub fn from_url<U: Into<Url>>(ws_url: U) -> Self {
        Self {
            inner: WsConnect::new(ws_url.into()),
            strategy: ExponentialBackoff::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
        }
    }
}

impl PubSubConnect for RetryWsConnect {
    fn is_local(&self) -> bool {
        self.inner.is_local()
    }

    async fn connect(&self) -> TransportResult<ConnectionHandle> {
        self.inner.connect().await
    }

    fn try_reconnect(
        &self,
    ) -> alloy::transports::impl_future!(<Output = TransportResult<ConnectionHandle>>) {
        warn!(url = ?self.inner.url(), "Retrying connection to websocket chain source");
        Retry::spawn(self.strategy.clone(), || self.inner.try_reconnect())
    }
}

/// Alloy's rate limit policy, extended to retry "connection refused" errors
/// from a chain source that is restarting.
#[derive(Debug, Clone, Copy)]
pub struct ConnectivityRetryPolicy;

impl RetryPolicy for ConnectivityRetryPolicy {
    fn should_retry(&self, error: &TransportError) -> bool {
        RateLimitRetryPolicy::default().should_retry(error) || is_connection_refused(error)
    }

    fn backoff_hint(&self, error: &TransportError) -> Option<Duration> {
        RateLimitRetryPolicy::default().backoff_hint(error)
    }
}

/// Checks whether the error message contains "connection refused".
#[inline]
pub fn is_connection_refused<S: ToString>(e: S) -> bool {
    e.to_string().to_lowercase().contains("connection refused")
}

/// Retry the provided async operation using [`ExponentialBackoff`].
///
/// Retries are attempted as long as `condition` returns `true` for the error
/// produced by the operation, up to `DEFAULT_MAX_RETRIES` times.
pub async fn retry_with_backoff_if<F, Fut, T, E, C>(op: F, condition: C) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    C: FnMut(&E) -> bool,
{
    let strategy = ExponentialBackoff::from_millis(DEFAULT_INITIAL_BACKOFF_MS)
        .take(DEFAULT_MAX_RETRIES as usize);
    RetryIf::spawn(strategy, op, condition).await
}
