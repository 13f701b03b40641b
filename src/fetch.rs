use crate::http::{FetchRequest, Transport};
use crate::logbook::BoundedLog;
use crate::proxy::ProxyRotator;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("HTTP {0}")]
    Status(u16),
    #[error("network error: {0}")]
    Network(String),
    #[error("failed to read body: {0}")]
    Body(String),
}

impl FetchError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return FetchError::Timeout;
        }
        if let Some(status) = err.status() {
            return FetchError::Status(status.as_u16());
        }
        FetchError::Network(err.to_string())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_unit: Duration,
}

impl RetryPolicy {
    /// Linear backoff: the wait after failed attempt `n` is `n * backoff_unit`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff_unit * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_unit: Duration::from_millis(1000),
        }
    }
}

/// Bounded retry loop over a [`Transport`], rotating to the next proxy on every attempt.
pub struct RetryingFetcher<T> {
    transport: Arc<T>,
    rotator: Option<Arc<ProxyRotator>>,
    policy: RetryPolicy,
    timeout: Duration,
    log: Option<BoundedLog>,
    name: &'static str,
}

impl<T> Clone for RetryingFetcher<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            rotator: self.rotator.clone(),
            policy: self.policy,
            timeout: self.timeout,
            log: self.log.clone(),
            name: self.name,
        }
    }
}

impl<T: Transport> RetryingFetcher<T> {
    pub fn proxied(
        transport: Arc<T>,
        rotator: Arc<ProxyRotator>,
        timeout: Duration,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            rotator: Some(rotator),
            policy,
            timeout,
            log: None,
            name: "upstream",
        }
    }

    pub fn direct(transport: Arc<T>, timeout: Duration, policy: RetryPolicy) -> Self {
        Self {
            transport,
            rotator: None,
            policy,
            timeout,
            log: None,
            name: "sheet",
        }
    }

    /// Mirror retry notices into the popup log.
    pub fn with_log(mut self, log: BoundedLog) -> Self {
        self.log = Some(log);
        self
    }

    pub async fn get(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.fetch(FetchRequest::get(url, self.timeout)).await
    }

    pub async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        let body = self.get(url).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    pub async fn post_json(
        &self,
        url: &str,
        payload: &serde_json::Value,
    ) -> Result<Vec<u8>, FetchError> {
        let body = serde_json::to_vec(payload).map_err(|err| FetchError::Body(err.to_string()))?;
        self.fetch(FetchRequest::post(url, body, self.timeout)).await
    }

    pub async fn fetch(&self, request: FetchRequest) -> Result<Vec<u8>, FetchError> {
        let attempts = self.policy.max_attempts.max(1);
        let mut last_error = FetchError::Network("no attempt made".into());

        for attempt in 1..=attempts {
            let proxy = self.rotator.as_ref().map(|rotator| rotator.next());
            let via = proxy.map(|p| p.label.as_str()).unwrap_or("direct");
            debug!(
                target = "tl.fetch",
                client = self.name,
                attempt,
                via,
                url = %request.url,
                "fetch_attempt"
            );

            match self.transport.send(&request, proxy).await {
                Ok(body) => {
                    crate::metrics::fetch_attempt(self.name, "ok");
                    return Ok(body);
                }
                Err(err) => {
                    crate::metrics::fetch_attempt(self.name, "error");
                    warn!(
                        target = "tl.fetch",
                        client = self.name,
                        attempt,
                        max_attempts = attempts,
                        via,
                        url = %request.url,
                        error = %err,
                        "fetch_attempt_failed"
                    );
                    if attempt < attempts {
                        if let Some(log) = &self.log {
                            log.info(format!("Retry {attempt}/{attempts}: {err}"));
                        }
                        sleep(self.policy.backoff_for(attempt)).await;
                    }
                    last_error = err;
                }
            }
        }

        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::FetchMethod;
    use crate::testing::{FakeTransport, test_rotator};

    fn quick_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff_unit: Duration::ZERO,
        }
    }

    #[test]
    fn backoff_grows_linearly() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(1), Duration::from_millis(1000));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(2000));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(3000));
    }

    #[tokio::test]
    async fn always_failing_fetch_makes_exactly_max_attempts() {
        let transport = Arc::new(FakeTransport::new(|_, _| Err(FetchError::Status(503))));
        let fetcher = RetryingFetcher::proxied(
            transport.clone(),
            Arc::new(test_rotator(10)),
            Duration::from_secs(1),
            quick_policy(3),
        );
        let err = fetcher.get("https://upstream.test/a").await.unwrap_err();
        assert_eq!(err, FetchError::Status(503));
        assert_eq!(transport.calls().len(), 3);
    }

    #[tokio::test]
    async fn each_attempt_uses_the_next_proxy() {
        let transport = Arc::new(FakeTransport::new(|_, proxy| match proxy {
            Some(p) if p.label == "proxy-3" => Ok(b"ok".to_vec()),
            _ => Err(FetchError::Timeout),
        }));
        let fetcher = RetryingFetcher::proxied(
            transport.clone(),
            Arc::new(test_rotator(5)),
            Duration::from_secs(1),
            quick_policy(3),
        );
        let body = fetcher.get_text("https://upstream.test/a").await.unwrap();
        assert_eq!(body, "ok");
        let labels: Vec<Option<String>> =
            transport.calls().into_iter().map(|c| c.proxy).collect();
        assert_eq!(
            labels,
            vec![
                Some("proxy-1".to_string()),
                Some("proxy-2".to_string()),
                Some("proxy-3".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn client_errors_are_retried_like_any_failure() {
        let transport = Arc::new(FakeTransport::new(|_, _| Err(FetchError::Status(404))));
        let fetcher =
            RetryingFetcher::direct(transport.clone(), Duration::from_secs(1), quick_policy(2));
        assert_eq!(
            fetcher.get("https://sheet.test/exec").await.unwrap_err(),
            FetchError::Status(404)
        );
        assert_eq!(transport.calls().len(), 2);
        assert!(transport.calls().iter().all(|c| c.proxy.is_none()));
    }

    #[tokio::test]
    async fn retries_are_mirrored_into_the_log() {
        let transport = Arc::new(FakeTransport::new(|_, _| Err(FetchError::Timeout)));
        let log = BoundedLog::new(10);
        let fetcher =
            RetryingFetcher::direct(transport, Duration::from_secs(1), quick_policy(3))
                .with_log(log.clone());
        let _ = fetcher.get("https://sheet.test/exec").await;
        let messages: Vec<String> = log.entries().into_iter().map(|e| e.message).collect();
        assert_eq!(
            messages,
            vec![
                "Retry 1/3: request timed out".to_string(),
                "Retry 2/3: request timed out".to_string()
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn waits_between_attempts() {
        let transport = Arc::new(FakeTransport::new(|_, _| Err(FetchError::Timeout)));
        let fetcher = RetryingFetcher::direct(
            transport,
            Duration::from_secs(1),
            RetryPolicy {
                max_attempts: 3,
                backoff_unit: Duration::from_millis(1000),
            },
        );
        let started = tokio::time::Instant::now();
        let _ = fetcher.get("https://sheet.test/exec").await;
        assert_eq!(started.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test]
    async fn post_sends_json_body() {
        let transport = Arc::new(FakeTransport::new(|_, _| Ok(b"{}".to_vec())));
        let fetcher =
            RetryingFetcher::direct(transport.clone(), Duration::from_secs(1), quick_policy(1));
        fetcher
            .post_json("https://sheet.test/exec", &serde_json::json!({"action": "getLinks"}))
            .await
            .unwrap();
        let call = &transport.calls()[0];
        assert_eq!(call.method, FetchMethod::Post);
        assert_eq!(call.json()["action"], "getLinks");
    }
}
