//! `reqwest`-backed HTTP transport
//!
//! [`ReqwestTransport`] wraps a shared `reqwest::Client`.  The client pools
//! connections internally and is safe to use from many tasks at once, so a
//! single transport serves the token endpoint and every authenticated
//! request of a flow.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{AuthError, Result};
use crate::transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, RequestBody};

/// Production [`HttpTransport`] built on `reqwest`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use autoauth::transport::http::ReqwestTransport;
///
/// let transport = ReqwestTransport::new(Duration::from_secs(30)).unwrap();
/// ```
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Transport`] if the TLS backend cannot be
    /// initialised.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn to_reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Delete => reqwest::Method::DELETE,
        HttpMethod::Head => reqwest::Method::HEAD,
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let HttpRequest {
            method,
            url,
            headers,
            body,
        } = request;

        tracing::debug!(%method, %url, "sending HTTP request");

        let mut builder = self.client.request(to_reqwest_method(method), url);
        for (name, value) in &headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match body {
            None => builder,
            Some(RequestBody::Form(pairs)) => builder.form(&pairs),
            Some(RequestBody::Json(value)) => builder.json(&value),
            Some(RequestBody::Text { content_type, body }) => builder
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(body),
        };

        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = resp.bytes().await?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
