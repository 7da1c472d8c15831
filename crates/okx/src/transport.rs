use std::time::Duration;

use alphaark_core::ExchangeError;
use async_trait::async_trait;
use reqwest::Method;
use tracing::debug;

/// An outbound HTTP request, already signed if it needs to be.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Moves bytes to and from the exchange. Implemented over reqwest in
/// production and by scripted fakes in tests.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ExchangeError>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ExchangeError> {
        debug!(method = %request.method, url = %request.url, "HTTP request");

        let mut builder = self
            .client
            .request(request.method, &request.url)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ExchangeError::Transport(format!("Request to {} failed: {}", request.url, e)))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ExchangeError::Transport(format!("Failed to read response body: {}", e)))?;

        Ok(HttpResponse { status, body })
    }
}
