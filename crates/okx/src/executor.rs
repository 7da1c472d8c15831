use std::sync::Arc;
use std::time::Duration;

use alphaark_core::ExchangeError;
use reqwest::Method;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::signer::RequestSigner;
use crate::transport::{HttpRequest, HttpTransport};
use crate::wire::decode_envelope;

/// Exchange messages that mean the request timestamp drifted out of the
/// accepted window. Only these are worth re-signing and retrying.
const CLOCK_SKEW_PHRASES: [&str; 2] = ["Timestamp request expired", "Invalid OK-ACCESS-TIMESTAMP"];

pub fn is_clock_skew(err: &ExchangeError) -> bool {
    let text = err.to_string();
    CLOCK_SKEW_PHRASES.iter().any(|p| text.contains(p))
}

/// Description of one authenticated call.
#[derive(Debug, Clone)]
pub struct SignedRequestSpec {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: String,
}

impl SignedRequestSpec {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            query: Vec::new(),
            body: String::new(),
        }
    }

    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    /// Path plus encoded query. The same string is signed and sent.
    pub fn request_path(&self) -> Result<String, ExchangeError> {
        if self.query.is_empty() {
            return Ok(self.path.clone());
        }
        let query = serde_urlencoded::to_string(&self.query)
            .map_err(|e| ExchangeError::Decode(format!("Failed to encode query: {}", e)))?;
        Ok(format!("{}?{}", self.path, query))
    }
}

/// Signs, sends and decodes private requests, retrying clock-skew rejections.
pub struct RequestExecutor {
    transport: Arc<dyn HttpTransport>,
    signer: RequestSigner,
    base_url: String,
    policy: RetryPolicy,
    timeout: Duration,
}

impl RequestExecutor {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        signer: RequestSigner,
        base_url: impl Into<String>,
        policy: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            signer,
            base_url: base_url.into(),
            policy,
            timeout,
        }
    }

    pub fn ensure_credentials(&self) -> Result<(), ExchangeError> {
        self.signer.ensure_credentials()
    }

    /// Run the request, re-signing with a fresh timestamp on every attempt.
    ///
    /// Missing credentials fail before any network traffic. Any failure
    /// after that is reported as `RetriesExhausted` with the number of
    /// attempts actually made.
    pub async fn execute<T: DeserializeOwned>(
        &self,
        spec: &SignedRequestSpec,
    ) -> Result<Vec<T>, ExchangeError> {
        self.ensure_credentials()?;

        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempts = 0;
        let mut last_error = None;

        while attempts < max_attempts {
            if attempts > 0 {
                tokio::time::sleep(self.policy.delay_before(attempts)).await;
            }
            attempts += 1;

            match self.execute_once(spec).await {
                Ok(rows) => {
                    if attempts > 1 {
                        debug!(path = %spec.path, attempts, "Request succeeded after retry");
                    }
                    return Ok(rows);
                }
                Err(e) if is_clock_skew(&e) && attempts < max_attempts => {
                    warn!(path = %spec.path, attempt = attempts, error = %e, "Clock skew rejected request, retrying");
                    last_error = Some(e);
                }
                Err(e) => {
                    last_error = Some(e);
                    break;
                }
            }
        }

        let source = last_error
            .unwrap_or_else(|| ExchangeError::Transport("request was never attempted".to_string()));
        Err(ExchangeError::RetriesExhausted {
            attempts,
            source: Box::new(source),
        })
    }

    async fn execute_once<T: DeserializeOwned>(
        &self,
        spec: &SignedRequestSpec,
    ) -> Result<Vec<T>, ExchangeError> {
        let request_path = spec.request_path()?;
        let headers = self
            .signer
            .build_headers(spec.method.as_str(), &request_path, &spec.body)
            .await?;

        let request = HttpRequest {
            method: spec.method.clone(),
            url: format!("{}{}", self.base_url, request_path),
            headers,
            body: (!spec.body.is_empty()).then(|| spec.body.clone()),
            timeout: self.timeout,
        };
        let response = self.transport.send(request).await?;
        decode_envelope(response.status, &response.body)
    }
}
