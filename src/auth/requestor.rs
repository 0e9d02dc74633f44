//! Authenticated requests with transparent token refresh
//!
//! [`AutoRefreshingRequestor`] checks the flow's access token before every
//! request.  A stale token (expired, within the expiry skew, or never
//! granted) triggers a refresh and the request waits for it; concurrent
//! requests that find the token stale all wait on the same refresh.  If the
//! refresh fails the request is never sent and the caller receives
//! [`AuthError::DeferredRequest`] carrying the refresh error.

use url::Url;

use crate::auth::flow::AuthorizationFlow;
use crate::error::{AuthError, Result};
use crate::transport::{HttpMethod, HttpRequest, HttpResponse, RequestBody};

/// Sends requests with the bearer token of an [`AuthorizationFlow`].
///
/// Responses are returned whatever their status; a 401 from the API is the
/// caller's to interpret.
#[derive(Debug, Clone)]
pub struct AutoRefreshingRequestor {
    flow: AuthorizationFlow,
}

impl AutoRefreshingRequestor {
    pub fn new(flow: AuthorizationFlow) -> Self {
        Self { flow }
    }

    pub fn flow(&self) -> &AuthorizationFlow {
        &self.flow
    }

    /// Sends `method url` with an optional body and the current access token.
    ///
    /// # Errors
    ///
    /// - [`AuthError::DeferredRequest`] if a refresh was needed and failed;
    ///   nothing was sent.
    /// - [`AuthError::Transport`] if the request itself could not be sent.
    pub async fn authenticated_request(
        &self,
        method: HttpMethod,
        url: Url,
        body: Option<RequestBody>,
    ) -> Result<HttpResponse> {
        self.send(HttpRequest::new(method, url).with_body(body))
            .await
    }

    /// Sends a prepared request, replacing any `Authorization` header.
    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        if let Err(cause) = self.flow.refresh_if_stale().await {
            tracing::debug!(
                method = %request.method,
                url = %request.url,
                error = %cause,
                "authenticated request dropped after failed refresh"
            );
            return Err(AuthError::DeferredRequest(Box::new(cause)));
        }

        let Some(token) = self.flow.access_token() else {
            // Cleared between the refresh and now, e.g. by clear_tokens().
            return Err(AuthError::DeferredRequest(Box::new(
                AuthError::NotAuthenticated("no access token available".to_string()),
            )));
        };

        tracing::debug!(method = %request.method, url = %request.url, "sending authenticated request");
        self.flow
            .transport()
            .send(request.bearer_auth(&token))
            .await
    }

    pub async fn get(&self, url: Url) -> Result<HttpResponse> {
        self.authenticated_request(HttpMethod::Get, url, None).await
    }

    pub async fn delete(&self, url: Url) -> Result<HttpResponse> {
        self.authenticated_request(HttpMethod::Delete, url, None)
            .await
    }

    pub async fn post(&self, url: Url, body: RequestBody) -> Result<HttpResponse> {
        self.authenticated_request(HttpMethod::Post, url, Some(body))
            .await
    }

    pub async fn put(&self, url: Url, body: RequestBody) -> Result<HttpResponse> {
        self.authenticated_request(HttpMethod::Put, url, Some(body))
            .await
    }
}
