//! HTTP transport abstraction and implementations
//!
//! This module defines the [`HttpTransport`] trait through which the
//! authorization flow and the auto-refreshing requestor reach the network.
//! Concrete implementations live in submodules:
//!
//! - [`http::ReqwestTransport`] -- `reqwest`-backed client used in
//!   production.
//! - [`fake::FakeTransport`] -- scripted in-process fake used in unit tests
//!   (cfg(test) only).
//!
//! # Design
//!
//! Transports return `Ok` for every response that arrived, whatever its
//! status code, and `Err(AuthError::Transport)` only for network-level
//! failures.  Callers that need a 2xx use [`HttpResponse::error_for_status`].
//! One transport instance is shared by every in-flight request of a flow, so
//! implementations must be safe for concurrent use.

use std::fmt;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::{AuthError, Result};

pub mod http;

#[cfg(test)]
pub mod fake;

/// HTTP request verbs supported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Head,
}

impl HttpMethod {
    /// Returns the upper-case wire name of the verb.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            "HEAD" => Ok(Self::Head),
            other => Err(AuthError::Config(format!("unsupported HTTP method: {other}"))),
        }
    }
}

/// Request payloads understood by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// `application/x-www-form-urlencoded` pairs, in order.
    Form(Vec<(String, String)>),
    /// `application/json` document.
    Json(serde_json::Value),
    /// Raw text with an explicit content type.
    Text { content_type: String, body: String },
}

/// An outbound HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
}

impl HttpRequest {
    /// Creates a request with no headers and no body.
    pub fn new(method: HttpMethod, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: None,
        }
    }

    /// Appends a header, replacing any existing header with the same name
    /// (case-insensitive).
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        self
    }

    /// Attaches `Authorization: Bearer <token>`.
    pub fn bearer_auth(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {token}"))
    }

    /// Sets a url-encoded form body.
    pub fn form<K, V, I>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.body = Some(RequestBody::Form(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ));
        self
    }

    /// Sets a JSON body.
    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.body = Some(RequestBody::Json(value));
        self
    }

    /// Replaces the body.
    pub fn with_body(mut self, body: Option<RequestBody>) -> Self {
        self.body = body;
        self
    }

    /// Looks up a header value by case-insensitive name.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Looks up a field of a form body.
    pub fn form_param(&self, key: &str) -> Option<&str> {
        match &self.body {
            Some(RequestBody::Form(pairs)) => pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }
}

/// A received HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpResponse {
    /// Creates a response with the given status and body and no headers.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Returns `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Looks up a header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body parsed as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }

    /// Converts a non-2xx response into [`AuthError::Status`].
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(AuthError::Status {
                status: self.status,
                body: self.text(),
            })
        }
    }
}

/// Network access used by the authorization flow and the requestor.
#[async_trait::async_trait]
pub trait HttpTransport: Send + Sync + fmt::Debug {
    /// Sends one request and returns the response, whatever its status.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Transport`] when no response was received.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("https://api.example.com/v1/items").unwrap()
    }

    #[test]
    fn test_method_parses_case_insensitively() {
        assert_eq!("get".parse::<HttpMethod>().unwrap(), HttpMethod::Get);
        assert_eq!("Delete".parse::<HttpMethod>().unwrap(), HttpMethod::Delete);
        assert!("PATCHY".parse::<HttpMethod>().is_err());
    }

    #[test]
    fn test_header_replaces_same_name_case_insensitively() {
        let req = HttpRequest::new(HttpMethod::Get, url())
            .header("authorization", "Bearer old")
            .bearer_auth("new");
        assert_eq!(req.headers.len(), 1);
        assert_eq!(req.header_value("Authorization"), Some("Bearer new"));
    }

    #[test]
    fn test_form_param_reads_form_body() {
        let req = HttpRequest::new(HttpMethod::Post, url())
            .form([("grant_type", "refresh_token"), ("refresh_token", "R1")]);
        assert_eq!(req.form_param("refresh_token"), Some("R1"));
        assert_eq!(req.form_param("missing"), None);
    }

    #[test]
    fn test_form_param_is_none_for_json_body() {
        let req = HttpRequest::new(HttpMethod::Post, url()).json(serde_json::json!({"a": 1}));
        assert_eq!(req.form_param("a"), None);
    }

    #[test]
    fn test_error_for_status_passes_success_through() {
        let resp = HttpResponse::new(204, "");
        assert!(resp.error_for_status().is_ok());
    }

    #[test]
    fn test_error_for_status_maps_failure() {
        let resp = HttpResponse::new(500, "boom");
        let err = resp.error_for_status().unwrap_err();
        assert_eq!(
            err,
            AuthError::Status {
                status: 500,
                body: "boom".to_string()
            }
        );
    }

    #[test]
    fn test_response_json_parses_body() {
        let resp = HttpResponse::new(200, r#"{"access_token":"T1"}"#);
        let v: serde_json::Value = resp.json().unwrap();
        assert_eq!(v["access_token"], "T1");
    }
}
