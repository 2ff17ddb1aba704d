//! HTTP client with a global concurrency cap and retries.
//!
//! Every request holds a permit from a shared semaphore while it runs.
//! Transient failures (connection errors, timeouts, 408/425/429 and 5xx) are
//! retried with randomized exponential backoff. Any other failure returns
//! immediately.

use crate::packager::error::{Error, Result};
use bytes::{Bytes, BytesMut};
use futures_lite::StreamExt;
use reqwest::{Client, StatusCode};
use std::{sync::Arc, time::Duration};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Network parameters.
#[derive(Debug, Clone)]
pub struct NetConfig {
    /// Timeout of a single request, including the body
    pub timeout: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Growth factor between retries
    pub backoff_multiplier: f64,
    /// Random spread applied to each delay (0.0 to 1.0)
    pub jitter_factor: f64,
    /// Simultaneous requests allowed across all fetches
    pub max_concurrency: usize,
    /// User agent header
    pub user_agent: String,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(30),
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            max_concurrency: 100,
            user_agent: format!("project_packager/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Whether a response status is worth retrying.
pub fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error() || matches!(status.as_u16(), 408 | 425 | 429)
}

/// Exponential backoff delay with jitter for retry `attempt` (1-based).
pub fn backoff_delay(config: &NetConfig, attempt: u32) -> Duration {
    let base = config.initial_delay.as_millis() as f64;
    let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
    let delay = (base * config.backoff_multiplier.powi(exponent))
        .min(config.max_delay.as_millis() as f64);
    let jitter = delay * config.jitter_factor * (rand::random::<f64>() - 0.5);
    Duration::from_millis((delay + jitter).max(0.0).round() as u64)
}

/// HTTP client shared by every fetch of a process.
#[derive(Clone)]
pub struct NetClient {
    client: Client,
    config: NetConfig,
    permits: Arc<Semaphore>,
}

impl NetClient {
    /// Creates a client.
    pub fn new(config: NetConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| Error::GenericError(format!("failed to build HTTP client: {e}")))?;
        let permits = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        Ok(Self {
            client,
            config,
            permits,
        })
    }

    /// Creates a client with default parameters.
    pub fn with_defaults() -> Result<Self> {
        Self::new(NetConfig::default())
    }

    /// Parameters in use.
    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    /// Downloads `url`, retrying transient failures.
    ///
    /// `on_progress` receives the bytes received so far and the reported
    /// content length. Fails with [`Error::Aborted`] as soon as `cancel`
    /// fires, dropping any in-flight request.
    pub async fn fetch(
        &self,
        url: &str,
        cancel: &CancellationToken,
        mut on_progress: impl FnMut(u64, Option<u64>),
    ) -> Result<Bytes> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(url, cancel, &mut on_progress).await {
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = backoff_delay(&self.config, attempt);
                    log::warn!(
                        "{} (retry {}/{} in {:?})",
                        e,
                        attempt,
                        self.config.max_retries,
                        delay
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(Error::Aborted),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                result => return result,
            }
        }
    }

    async fn fetch_once(
        &self,
        url: &str,
        cancel: &CancellationToken,
        on_progress: &mut impl FnMut(u64, Option<u64>),
    ) -> Result<Bytes> {
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Aborted),
            permit = self.permits.acquire() => permit
                .map_err(|_| Error::GenericError("HTTP client is shut down".into()))?,
        };

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Aborted),
            response = self.client.get(url).send() => response.map_err(|e| request_error(url, e))?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Request {
                url: url.to_string(),
                status: Some(status.as_u16()),
                reason: status.to_string(),
                transient: is_transient_status(status),
            });
        }

        let total = response.content_length();
        let mut body = BytesMut::with_capacity(total.unwrap_or(0).min(64 * 1024 * 1024) as usize);
        let mut stream = std::pin::pin!(response.bytes_stream());
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Aborted),
                chunk = stream.next() => chunk,
            };
            match chunk {
                Some(Ok(chunk)) => {
                    body.extend_from_slice(&chunk);
                    on_progress(body.len() as u64, total);
                }
                Some(Err(e)) => return Err(request_error(url, e)),
                None => break,
            }
        }
        Ok(body.freeze())
    }
}

fn request_error(url: &str, error: reqwest::Error) -> Error {
    let status = error.status();
    let transient = match status {
        Some(status) => is_transient_status(status),
        None => error.is_timeout() || error.is_connect() || error.is_request() || error.is_body(),
    };
    Error::Request {
        url: url.to_string(),
        status: status.map(|s| s.as_u16()),
        reason: error.to_string(),
        transient,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn fast_config() -> NetConfig {
        NetConfig {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..NetConfig::default()
        }
    }

    #[test]
    fn classifies_statuses() {
        assert!(is_transient_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_transient_status(StatusCode::NOT_FOUND));
        assert!(!is_transient_status(StatusCode::FORBIDDEN));
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let config = NetConfig {
            jitter_factor: 0.0,
            ..NetConfig::default()
        };
        assert_eq!(backoff_delay(&config, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(&config, 2), Duration::from_millis(1000));
        assert_eq!(backoff_delay(&config, 20), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn streams_body_with_progress() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/runtime.zip");
                then.status(200).body("runtime bytes");
            })
            .await;

        let client = NetClient::new(fast_config()).unwrap();
        let mut last = (0, None);
        let body = client
            .fetch(&server.url("/runtime.zip"), &CancellationToken::new(), |n, total| {
                last = (n, total)
            })
            .await
            .unwrap();
        assert_eq!(&body[..], b"runtime bytes");
        assert_eq!(last, (13, Some(13)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn missing_resource_is_not_retried() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/gone");
                then.status(404);
            })
            .await;

        let client = NetClient::new(fast_config()).unwrap();
        let err = client
            .fetch(&server.url("/gone"), &CancellationToken::new(), |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Request { status: Some(404), transient: false, .. }));
        mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn malformed_url_is_not_retried() {
        let client = NetClient::new(NetConfig {
            initial_delay: Duration::from_secs(60),
            ..fast_config()
        })
        .unwrap();
        let err = tokio::time::timeout(
            Duration::from_secs(5),
            client.fetch("not a url", &CancellationToken::new(), |_, _| {}),
        )
        .await
        .unwrap()
        .unwrap_err();
        assert!(matches!(err, Error::Request { status: None, transient: false, .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn server_errors_are_retried_then_surface() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/flaky");
                then.status(503);
            })
            .await;

        let client = NetClient::new(fast_config()).unwrap();
        let err = client
            .fetch(&server.url("/flaky"), &CancellationToken::new(), |_, _| {})
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        mock.assert_hits_async(3).await;
    }

    #[tokio::test]
    async fn cancelled_fetch_is_aborted() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/slow");
                then.status(200).delay(Duration::from_secs(10)).body("late");
            })
            .await;

        let client = NetClient::new(fast_config()).unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let err = client
            .fetch(&server.url("/slow"), &cancel, |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Aborted));
        assert!(mock.hits_async().await <= 1);
    }
}
