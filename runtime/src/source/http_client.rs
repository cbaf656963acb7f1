//! Async HTTP client wrapping reqwest.
//!
//! Handles redirects, timeouts, retry on 5xx, and backoff on 429. Every
//! failure is reported as a [`FetchError`] naming the requested URL.

use crate::error::FetchError;
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
                          AppleWebKit/537.36 (KHTML, like Gecko) \
                          Chrome/131.0.0.0 Safari/537.36";

const MAX_RETRIES: u32 = 2;

/// Request headers sent when a target asks to look like a browser.
pub const BROWSER_HEADERS: &[(&str, &str)] = &[
    ("User-Agent", USER_AGENT),
    ("Accept-Language", "en-US,en;q=0.9"),
    ("Upgrade-Insecure-Requests", "1"),
];

/// Response from an HTTP GET request.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Original requested URL.
    pub url: String,
    /// Final URL after redirects.
    pub final_url: String,
    pub status: u16,
    /// Content-Type header, if any.
    pub content_type: Option<String>,
    pub body: String,
}

/// HTTP client shared by the api and markup adapters and the notifier.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    /// HTTP/1.1-only fallback client for sites that reject HTTP/2.
    h1_client: reqwest::Client,
    timeout_ms: u64,
}

impl HttpClient {
    /// Create a client whose requests time out after `timeout_ms`.
    pub fn new(timeout_ms: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();

        let h1_client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(USER_AGENT)
            .http1_only()
            .build()
            .unwrap_or_default();

        Self {
            client,
            h1_client,
            timeout_ms,
        }
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    /// GET with retry on 5xx and backoff on 429. Non-2xx is an error.
    ///
    /// Falls back to HTTP/1.1 on protocol errors (some CDNs reject HTTP/2).
    pub async fn get(
        &self,
        url: &str,
        extra_headers: &[(&str, &str)],
    ) -> Result<HttpResponse, FetchError> {
        match self.get_inner(&self.client, url, extra_headers).await {
            Err(FetchError::Network { source, .. }) if looks_like_protocol_error(&source) => {
                debug!(url, "retrying over HTTP/1.1: {source}");
                self.get_inner(&self.h1_client, url, extra_headers).await
            }
            other => other,
        }
    }

    async fn get_inner(
        &self,
        client: &reqwest::Client,
        url: &str,
        extra_headers: &[(&str, &str)],
    ) -> Result<HttpResponse, FetchError> {
        let mut retries = 0u32;

        loop {
            let mut builder = client
                .get(url)
                .timeout(Duration::from_millis(self.timeout_ms));
            for (name, value) in extra_headers {
                builder = builder.header(*name, *value);
            }

            match builder.send().await {
                Ok(r) => {
                    let status = r.status().as_u16();

                    if status >= 500 && retries < MAX_RETRIES {
                        retries += 1;
                        debug!(url, status, retries, "server error, retrying");
                        tokio::time::sleep(backoff(retries)).await;
                        continue;
                    }

                    if status == 429 && retries < MAX_RETRIES {
                        retries += 1;
                        let retry_after = r
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|s| s.parse::<u64>().ok())
                            .unwrap_or(2);
                        debug!(url, retry_after, "rate limited, backing off");
                        tokio::time::sleep(Duration::from_secs(retry_after.min(10))).await;
                        continue;
                    }

                    if !r.status().is_success() {
                        return Err(FetchError::Status {
                            url: url.to_string(),
                            status,
                        });
                    }

                    let final_url = r.url().to_string();
                    let content_type = r
                        .headers()
                        .get("content-type")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    let body = r.text().await.map_err(|e| self.classify(url, e))?;

                    return Ok(HttpResponse {
                        url: url.to_string(),
                        final_url,
                        status,
                        content_type,
                        body,
                    });
                }
                Err(e) => {
                    if retries < MAX_RETRIES && !e.is_timeout() {
                        retries += 1;
                        debug!(url, retries, "transport error, retrying: {e}");
                        tokio::time::sleep(backoff(retries)).await;
                        continue;
                    }
                    return Err(self.classify(url, e));
                }
            }
        }
    }

    /// POST a JSON body and return the response status.
    ///
    /// No retries: callers treat the result as advisory.
    pub async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
        bearer: Option<&str>,
    ) -> Result<u16, FetchError> {
        let mut builder = self
            .client
            .post(url)
            .timeout(Duration::from_millis(self.timeout_ms))
            .json(body);
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }
        let r = builder.send().await.map_err(|e| self.classify(url, e))?;
        Ok(r.status().as_u16())
    }

    fn classify(&self, url: &str, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
                after_ms: self.timeout_ms,
            }
        } else {
            FetchError::Network {
                url: url.to_string(),
                source: e,
            }
        }
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(500 * 2u64.pow(attempt.saturating_sub(1)))
}

fn looks_like_protocol_error(e: &reqwest::Error) -> bool {
    let text = format!("{e:?}");
    text.contains("http2") || text.contains("protocol") || text.contains("connection closed")
}
