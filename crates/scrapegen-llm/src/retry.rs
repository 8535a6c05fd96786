//! Retry with backoff for provider HTTP calls

use crate::circuit_breaker::CircuitBreaker;
use scrapegen_core::{Result, ScrapegenError};
use std::time::Duration;

/// Backoff schedule for 429 and 5xx responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    fn next_backoff(&self, current: Duration) -> Duration {
        (current * 2).min(self.max_backoff)
    }
}

/// Send a request until it succeeds or the policy gives up; returns the body text
///
/// `build` is called once per attempt. `fail` maps a message into the provider's
/// error variant. Hard failures are counted by the breaker, successes reset it.
pub(crate) async fn send_with_retry<F>(
    policy: &RetryPolicy,
    breaker: &CircuitBreaker,
    provider: &str,
    fail: fn(String) -> ScrapegenError,
    build: F,
) -> Result<String>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    if !breaker.can_execute() {
        return Err(ScrapegenError::ApiLimit(format!(
            "{} circuit breaker is open after repeated failures; retry in {}s",
            provider,
            breaker.retry_in_secs()
        )));
    }

    let mut retries = 0;
    let mut backoff = policy.initial_backoff;

    loop {
        tracing::debug!("Sending request to {} (attempt {})", provider, retries + 1);

        let response = match build().send().await {
            Ok(response) => response,
            Err(e) if retries < policy.max_retries => {
                retries += 1;
                tracing::warn!(
                    "{} request failed ({}). Retrying in {:?} ({}/{})",
                    provider,
                    e,
                    backoff,
                    retries,
                    policy.max_retries
                );
                tokio::time::sleep(backoff).await;
                backoff = policy.next_backoff(backoff);
                continue;
            }
            Err(e) => {
                breaker.record_failure();
                return Err(fail(format!("Failed to send request: {}", e)));
            }
        };

        let status = response.status();

        if status.as_u16() == 429 {
            retries += 1;
            if retries > policy.max_retries {
                let body = response.text().await.unwrap_or_default();
                return Err(ScrapegenError::ApiLimit(format!(
                    "{} rate limit exceeded after {} retries: {}",
                    provider, policy.max_retries, body
                )));
            }

            let wait = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(backoff)
                .min(policy.max_backoff.max(policy.initial_backoff));

            tracing::warn!(
                "{} rate limited (429). Waiting {:?} before retry {}/{}",
                provider,
                wait,
                retries,
                policy.max_retries
            );
            tokio::time::sleep(wait).await;
            backoff = policy.next_backoff(backoff);
            continue;
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();

            if status.is_server_error() && retries < policy.max_retries {
                retries += 1;
                tracing::warn!(
                    "{} server error ({}). Waiting {:?} before retry {}/{}",
                    provider,
                    status,
                    backoff,
                    retries,
                    policy.max_retries
                );
                tokio::time::sleep(backoff).await;
                backoff = policy.next_backoff(backoff);
                continue;
            }

            breaker.record_failure();
            tracing::error!(
                "{} request failed with {} (breaker failures: {})",
                provider,
                status,
                breaker.failure_count()
            );
            return Err(fail(format!("{} API error {}: {}", provider, status, body)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| fail(format!("Failed to read response body: {}", e)))?;
        breaker.record_success();
        return Ok(body);
    }
}

#[cfg(test)]
pub(crate) mod test_server {
    //! Minimal HTTP/1.1 responder serving canned responses, one per connection.

    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    pub struct Canned {
        pub status: u16,
        pub headers: Vec<(&'static str, String)>,
        pub body: String,
    }

    impl Canned {
        pub fn json(status: u16, body: &str) -> Self {
            Self {
                status,
                headers: vec![("content-type", "application/json".to_string())],
                body: body.to_string(),
            }
        }

        pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
            self.headers.push((name, value.to_string()));
            self
        }
    }

    /// Serve `responses` in order; returns the base URL and the captured request bodies
    pub async fn serve(responses: Vec<Canned>) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let bodies = Arc::new(Mutex::new(Vec::new()));
        let captured = bodies.clone();

        tokio::spawn(async move {
            for canned in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let body = read_request(&mut socket).await;
                captured.lock().unwrap().push(body);

                let mut raw = format!("HTTP/1.1 {} Canned\r\n", canned.status);
                for (name, value) in &canned.headers {
                    raw.push_str(&format!("{}: {}\r\n", name, value));
                }
                raw.push_str(&format!(
                    "content-length: {}\r\nconnection: close\r\n\r\n{}",
                    canned.body.len(),
                    canned.body
                ));
                socket.write_all(raw.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
        });

        (format!("http://{}", addr), bodies)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let header_end = loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return String::new();
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
        let content_length = head
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);

        while buf.len() < header_end + content_length {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        String::from_utf8_lossy(&buf[header_end..]).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::test_server::{serve, Canned};
    use super::*;

    async fn send(base: &str, policy: RetryPolicy, breaker: &CircuitBreaker) -> Result<String> {
        let client = reqwest::Client::new();
        let url = format!("{}/v1/test", base);
        send_with_retry(&policy, breaker, "test", ScrapegenError::Llm, || {
            client.post(&url).body("{}")
        })
        .await
    }

    #[tokio::test]
    async fn test_retries_rate_limit_then_succeeds() {
        let (base, bodies) = serve(vec![
            Canned::json(429, "{}").with_header("retry-after", "0"),
            Canned::json(200, r#"{"ok":true}"#),
        ])
        .await;
        let breaker = CircuitBreaker::default();
        let body = send(&base, RetryPolicy::immediate(2), &breaker).await.unwrap();
        assert_eq!(body, r#"{"ok":true}"#);
        assert_eq!(bodies.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_server_error_retried() {
        let (base, _) = serve(vec![
            Canned::json(503, "busy"),
            Canned::json(200, "done"),
        ])
        .await;
        let breaker = CircuitBreaker::default();
        let body = send(&base, RetryPolicy::immediate(1), &breaker).await.unwrap();
        assert_eq!(body, "done");
    }

    #[tokio::test]
    async fn test_client_error_trips_breaker() {
        let (base, _) = serve(vec![Canned::json(400, "bad request")]).await;
        let breaker = CircuitBreaker::new(1, 60);
        let err = send(&base, RetryPolicy::immediate(3), &breaker)
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapegenError::Llm(_)));
        assert!(err.to_string().contains("400"));

        let err = send(&base, RetryPolicy::immediate(3), &breaker)
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapegenError::ApiLimit(_)));
    }

    #[tokio::test]
    async fn test_rate_limit_exhausted() {
        let (base, _) = serve(vec![
            Canned::json(429, "slow down"),
            Canned::json(429, "slow down"),
        ])
        .await;
        let breaker = CircuitBreaker::default();
        let err = send(&base, RetryPolicy::immediate(1), &breaker)
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapegenError::ApiLimit(_)));
    }
}
