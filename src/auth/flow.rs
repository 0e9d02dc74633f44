//! OAuth 2.0 authorization code flow with PKCE for installed applications
//!
//! [`AuthorizationFlow`] drives the whole token lifecycle of one client:
//!
//! 1. Start the loopback [`RedirectListener`] (port 0 picks a free one).
//! 2. Generate a fresh PKCE pair and `state` nonce.
//! 3. Build the authorization URL and hand it to the [`BrowserOpener`].
//! 4. Await the redirect, validate `state`, and extract the code.
//! 5. POST the code and `code_verifier` to the token endpoint.
//! 6. Store the issued tokens in the [`TokenStore`].
//!
//! Afterwards [`AuthorizationFlow::refresh_access_token`] exchanges the
//! refresh token for a new access token on demand.
//!
//! # Concurrency
//!
//! At most one grant and one refresh run at a time per flow.  A call made
//! while an attempt is running joins that attempt and receives its outcome;
//! no second listener is bound and no second token request is sent.
//! Attempts run on spawned tasks, so dropping the caller's future does not
//! abort them.
//!
//! # Status
//!
//! ```text
//! NotAuthenticated -> AuthorizationRequested -> TokenExchangePending -> Granted
//! Granted -> RefreshingToken -> Granted | NotAuthenticated (refresh token invalidated)
//! ```
//!
//! Transitions are published on a `tokio::sync::watch` channel, see
//! [`AuthorizationFlow::subscribe`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::auth::browser::{BrowserOpener, SystemBrowser};
use crate::auth::listener::{RedirectListener, RedirectResult, DEFAULT_REDIRECT_PATH};
use crate::auth::pkce::{self, PkcePair};
use crate::auth::provider::{FlowStage, ProviderAdapter, StageParameters};
use crate::auth::requestor::AutoRefreshingRequestor;
use crate::auth::single_flight::SingleFlight;
use crate::auth::token_store::{
    ClientCredentials, IssuedTokens, TokenState, TokenStore, DEFAULT_EXPIRY_SKEW_SECS,
};
use crate::error::{AuthError, RefreshError, Result};
use crate::transport::http::ReqwestTransport;
use crate::transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};

/// Default HTTP timeout of the transport built when none is supplied.
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Status and configuration
// ---------------------------------------------------------------------------

/// Observable state of an authorization flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStatus {
    NotAuthenticated,
    AuthorizationRequested,
    TokenExchangePending,
    Granted,
    RefreshingToken,
}

impl FlowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotAuthenticated => "not_authenticated",
            Self::AuthorizationRequested => "authorization_requested",
            Self::TokenExchangePending => "token_exchange_pending",
            Self::Granted => "granted",
            Self::RefreshingToken => "refreshing_token",
        }
    }
}

impl fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a grant attempt ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantOutcome {
    /// Tokens were issued and stored.
    Granted,
    /// The listener was stopped before a redirect arrived.
    Cancelled,
}

/// Flow settings independent of the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowConfig {
    /// Loopback port; 0 lets the OS choose.
    pub port: u16,
    /// Space-separated scopes; omitted from the URL when `None`.
    pub scope: Option<String>,
    /// Host placed in `redirect_uri`.  The listener binds all interfaces.
    pub redirect_host: String,
    pub redirect_path: String,
    /// Page served on redirect; empty selects the auto-closing page.
    pub callback_text: String,
    /// Give up waiting for the redirect after this long.
    pub callback_timeout: Option<Duration>,
    /// Tokens this close to expiry are refreshed before use.
    pub expiry_skew: Duration,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            port: 0,
            scope: None,
            redirect_host: "127.0.0.1".to_string(),
            redirect_path: DEFAULT_REDIRECT_PATH.to_string(),
            callback_text: String::new(),
            callback_timeout: None,
            expiry_skew: Duration::from_secs(DEFAULT_EXPIRY_SKEW_SECS),
        }
    }
}

// ---------------------------------------------------------------------------
// Token endpoint wire types
// ---------------------------------------------------------------------------

/// Successful token endpoint response (RFC 6749 section 5.1).
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    /// Some providers send the lifetime as a string.
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

/// Token endpoint error response (RFC 6749 section 5.2).
#[derive(Debug, Default, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

impl ErrorResponse {
    fn from_response(resp: &HttpResponse) -> Self {
        resp.json().unwrap_or_default()
    }

    fn describe(&self, resp: &HttpResponse) -> String {
        match (&self.error, &self.error_description) {
            (Some(error), Some(description)) => format!("{error}: {description}"),
            (Some(error), None) => error.clone(),
            _ => format!("HTTP {}: {}", resp.status, resp.text()),
        }
    }
}

fn parse_token_response(resp: &HttpResponse) -> std::result::Result<IssuedTokens, String> {
    let raw: TokenResponse = resp
        .json()
        .map_err(|e| format!("malformed token response: {e}"))?;
    if raw.access_token.is_empty() {
        return Err("malformed token response: empty access_token".to_string());
    }
    let expires_in = match raw.expires_in {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::Number(n)) => n.as_u64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        Some(other) => return Err(format!("malformed token response: expires_in = {other}")),
    };
    Ok(IssuedTokens {
        access_token: raw.access_token,
        refresh_token: raw.refresh_token,
        expires_in,
        token_type: raw.token_type,
        scope: raw.scope,
    })
}

/// 16 random bytes, base64url without padding.
fn generate_state() -> String {
    use rand::RngCore as _;
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

// ---------------------------------------------------------------------------
// AuthorizationFlow
// ---------------------------------------------------------------------------

struct FlowInner {
    adapter: Arc<dyn ProviderAdapter>,
    transport: Arc<dyn HttpTransport>,
    browser: Arc<dyn BrowserOpener>,
    config: FlowConfig,
    store: TokenStore,
    listener: RedirectListener,
    status: watch::Sender<FlowStatus>,
    grant: SingleFlight<GrantOutcome>,
    /// Cancels the most recently started grant attempt.
    grant_cancel: Mutex<Option<CancellationToken>>,
    refresh: SingleFlight<()>,
}

impl fmt::Debug for FlowInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowInner")
            .field("provider", &self.adapter.name())
            .field("client_id", &self.store.credentials().client_id)
            .field("config", &self.config)
            .field("status", &*self.status.borrow())
            .field("listener", &self.listener.status())
            .finish_non_exhaustive()
    }
}

/// Authorization code + PKCE flow for one client of one provider.
///
/// Cheap to clone; clones share state.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use autoauth::auth::flow::{AuthorizationFlow, FlowConfig};
/// use autoauth::auth::provider::GoogleProvider;
/// use autoauth::auth::token_store::ClientCredentials;
///
/// # async fn example() -> autoauth::error::Result<()> {
/// let flow = AuthorizationFlow::builder(
///     Arc::new(GoogleProvider::new()?),
///     ClientCredentials::new("my-client.apps.googleusercontent.com", "secret"),
/// )
/// .config(FlowConfig {
///     scope: Some("openid email".to_string()),
///     ..FlowConfig::default()
/// })
/// .build()?;
///
/// flow.grant().await?;
/// let resp = flow
///     .requestor()
///     .get("https://www.googleapis.com/oauth2/v3/userinfo".parse().unwrap())
///     .await?;
/// println!("{}", resp.text());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct AuthorizationFlow {
    inner: Arc<FlowInner>,
}

/// Builder for [`AuthorizationFlow`].
#[derive(Debug)]
pub struct FlowBuilder {
    adapter: Arc<dyn ProviderAdapter>,
    credentials: ClientCredentials,
    config: FlowConfig,
    transport: Option<Arc<dyn HttpTransport>>,
    browser: Option<Arc<dyn BrowserOpener>>,
}

impl FlowBuilder {
    pub fn config(mut self, config: FlowConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses `transport` for token, revocation, and authenticated requests.
    /// Defaults to a [`ReqwestTransport`].
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Defaults to [`SystemBrowser`].
    pub fn browser(mut self, browser: Arc<dyn BrowserOpener>) -> Self {
        self.browser = Some(browser);
        self
    }

    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if the client id is empty, and
    /// [`AuthError::Transport`] if the default HTTP client cannot be built.
    pub fn build(self) -> Result<AuthorizationFlow> {
        if !self.credentials.is_configured() {
            return Err(AuthError::Config("client_id must not be empty".to_string()));
        }
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(DEFAULT_HTTP_TIMEOUT)?),
        };
        let browser = self.browser.unwrap_or_else(|| Arc::new(SystemBrowser));

        let listener = RedirectListener::new(self.config.redirect_path.clone());
        listener.set_callback_text(&self.config.callback_text);
        let store = TokenStore::new(self.credentials).with_expiry_skew(self.config.expiry_skew);
        let (status, _) = watch::channel(FlowStatus::NotAuthenticated);

        tracing::debug!(
            provider = self.adapter.name(),
            port = self.config.port,
            "authorization flow created"
        );
        Ok(AuthorizationFlow {
            inner: Arc::new(FlowInner {
                adapter: self.adapter,
                transport,
                browser,
                config: self.config,
                store,
                listener,
                status,
                grant: SingleFlight::new(),
                grant_cancel: Mutex::new(None),
                refresh: SingleFlight::new(),
            }),
        })
    }
}

impl AuthorizationFlow {
    pub fn builder(adapter: Arc<dyn ProviderAdapter>, credentials: ClientCredentials) -> FlowBuilder {
        FlowBuilder {
            adapter,
            credentials,
            config: FlowConfig::default(),
            transport: None,
            browser: None,
        }
    }

    /// Runs the authorization code grant.
    ///
    /// Joins the running attempt if there is one.  The attempt starts when
    /// `grant` is called; the returned future only waits for its outcome.
    /// Resolves to [`GrantOutcome::Cancelled`] when the grant was aborted
    /// with [`cancel_grant`](Self::cancel_grant).
    ///
    /// # Errors
    ///
    /// - [`AuthError::Bind`] if the redirect port is unavailable.
    /// - [`AuthError::Redirect`] if the provider redirected with an error, the
    ///   redirect was malformed, `state` did not match, or the wait timed out.
    /// - [`AuthError::Exchange`] if the token endpoint rejected the code.
    /// - [`AuthError::Transport`] if the token endpoint was unreachable.
    pub fn grant(&self) -> impl Future<Output = Result<GrantOutcome>> + Send + 'static {
        self.inner.grant.join_or_start(|| {
            let cancel = CancellationToken::new();
            *self.inner.grant_cancel.lock() = Some(cancel.clone());
            let inner = Arc::clone(&self.inner);
            async move { inner.run_grant(cancel).await }.boxed()
        })
    }

    /// Aborts the running grant, including one still binding its listener;
    /// it resolves as cancelled.
    pub fn cancel_grant(&self) {
        if let Some(cancel) = self.inner.grant_cancel.lock().take() {
            cancel.cancel();
        }
        self.inner.listener.stop();
    }

    /// Returns `true` while a grant attempt is running.
    pub fn is_grant_pending(&self) -> bool {
        self.inner.grant.is_running()
    }

    /// Exchanges the refresh token for a new access token.
    ///
    /// Joins the running refresh if there is one.
    ///
    /// # Errors
    ///
    /// - [`AuthError::NotAuthenticated`] if no refresh token is held.
    /// - [`AuthError::Refresh`] with [`RefreshError::Invalidated`] if the
    ///   provider rejected the refresh token; all tokens are cleared.
    /// - [`AuthError::Refresh`] with [`RefreshError::Transient`] otherwise;
    ///   the refresh token is kept for a later retry.
    pub async fn refresh_access_token(&self) -> Result<()> {
        let attempt = self.inner.refresh.join_or_start(|| self.start_refresh());
        attempt.await
    }

    /// Refreshes only if the access token is stale, joining a running
    /// refresh either way.
    pub(crate) async fn refresh_if_stale(&self) -> Result<()> {
        let store = &self.inner.store;
        let attempt = self
            .inner
            .refresh
            .join_or_start_if(|| !store.is_access_token_valid(), || self.start_refresh());
        match attempt {
            Some(attempt) => attempt.await,
            None => Ok(()),
        }
    }

    fn start_refresh(&self) -> futures::future::BoxFuture<'static, Result<()>> {
        let inner = Arc::clone(&self.inner);
        async move { inner.run_refresh().await }.boxed()
    }

    /// Seeds a previously saved refresh token and refreshes immediately.
    ///
    /// Waits for a running refresh to finish first so the new token is the
    /// one exchanged.
    pub async fn load_refresh_token(&self, token: &str) -> Result<()> {
        if let Some(running) = self.inner.refresh.current() {
            let _ = running.await;
        }
        self.set_refresh_token(token);
        self.refresh_access_token().await
    }

    /// Seeds a refresh token without contacting the provider.  Any access
    /// token is discarded, so the next authenticated request refreshes.
    pub fn set_refresh_token(&self, token: &str) {
        self.inner.store.set_refresh_token(token);
        self.inner.set_status(FlowStatus::NotAuthenticated);
    }

    /// Revokes the refresh token at the provider.
    ///
    /// Local token state is left untouched; call
    /// [`clear_tokens`](Self::clear_tokens) to drop it as well.
    ///
    /// # Errors
    ///
    /// - [`AuthError::NotAuthenticated`] if no refresh token is held.
    /// - [`AuthError::Revocation`] if the provider has no revocation endpoint
    ///   or answered with a non-2xx status.
    /// - [`AuthError::Transport`] if the endpoint was unreachable.
    pub async fn revoke(&self) -> Result<()> {
        let Some(token) = self.inner.store.refresh_token() else {
            return Err(AuthError::NotAuthenticated(
                "no refresh token to revoke".to_string(),
            ));
        };
        let endpoints = self.inner.adapter.endpoints();
        let Some(url) = endpoints.revoke_url_for(&token)? else {
            return Err(AuthError::Revocation(format!(
                "provider '{}' has no revocation endpoint",
                self.inner.adapter.name()
            )));
        };

        let resp = self
            .inner
            .transport
            .send(HttpRequest::new(endpoints.revoke_method, url))
            .await?;
        if !resp.is_success() {
            let reason = ErrorResponse::from_response(&resp).describe(&resp);
            tracing::warn!(status = resp.status, %reason, "token revocation rejected");
            return Err(AuthError::Revocation(reason));
        }
        tracing::info!(provider = self.inner.adapter.name(), "refresh token revoked");
        Ok(())
    }

    /// Drops every token and returns to `NotAuthenticated`.
    pub fn clear_tokens(&self) {
        self.inner.store.reset();
        self.inner.set_status(FlowStatus::NotAuthenticated);
    }

    /// Sets the page shown in the browser after the redirect.
    pub fn set_callback_text(&self, text: &str) {
        self.inner.listener.set_callback_text(text);
    }

    pub fn status(&self) -> FlowStatus {
        *self.inner.status.borrow()
    }

    /// Receives every status transition.
    pub fn subscribe(&self) -> watch::Receiver<FlowStatus> {
        self.inner.status.subscribe()
    }

    pub fn tokens(&self) -> TokenState {
        self.inner.store.snapshot()
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner.store.access_token()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.inner.store.refresh_token()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.inner.store.expires_at()
    }

    pub fn is_access_token_valid(&self) -> bool {
        self.inner.store.is_access_token_valid()
    }

    pub fn credentials(&self) -> &ClientCredentials {
        self.inner.store.credentials()
    }

    pub fn adapter(&self) -> &Arc<dyn ProviderAdapter> {
        &self.inner.adapter
    }

    pub fn listener(&self) -> &RedirectListener {
        &self.inner.listener
    }

    /// The redirect URI while the listener is bound.
    pub fn redirect_uri(&self) -> Option<String> {
        self.inner.listener.port().map(|port| self.inner.redirect_uri(port))
    }

    pub(crate) fn transport(&self) -> &Arc<dyn HttpTransport> {
        &self.inner.transport
    }

    /// A requestor that attaches this flow's access token, refreshing it
    /// first when stale.
    pub fn requestor(&self) -> AutoRefreshingRequestor {
        AutoRefreshingRequestor::new(self.clone())
    }
}

// ---------------------------------------------------------------------------
// Attempt bodies
// ---------------------------------------------------------------------------

impl FlowInner {
    fn set_status(&self, status: FlowStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            tracing::debug!(from = %previous, to = %status, "flow status changed");
        }
    }

    fn settled(&self) -> FlowStatus {
        if self.store.access_token().is_some() {
            FlowStatus::Granted
        } else {
            FlowStatus::NotAuthenticated
        }
    }

    /// Status after a grant attempt ended without new tokens.
    fn settle_status(&self) {
        self.set_status(self.settled());
    }

    /// Status after a failed refresh.  Leaves the status alone if something
    /// else (a finishing grant) changed it while the refresh ran.
    fn settle_after_refresh(&self, previous: FlowStatus) {
        let grant_in_progress = matches!(
            previous,
            FlowStatus::AuthorizationRequested | FlowStatus::TokenExchangePending
        ) && self.grant.is_running();
        let target = if grant_in_progress {
            previous
        } else {
            self.settled()
        };
        let changed = self.status.send_if_modified(|status| {
            if *status == FlowStatus::RefreshingToken {
                *status = target;
                true
            } else {
                false
            }
        });
        if changed {
            tracing::debug!(from = %FlowStatus::RefreshingToken, to = %target, "flow status changed");
        }
    }

    fn grant_cancelled(&self) -> GrantOutcome {
        tracing::info!("authorization cancelled");
        self.listener.stop();
        self.settle_status();
        GrantOutcome::Cancelled
    }

    fn redirect_uri(&self, port: u16) -> String {
        format!(
            "http://{}:{}{}",
            self.config.redirect_host,
            port,
            self.listener.redirect_path()
        )
    }

    fn authorization_url(&self, redirect_uri: &str, state: &str, pkce: Option<&PkcePair>) -> Url {
        let credentials = self.store.credentials();
        let mut params = StageParameters::new();
        params.require("response_type", "code");
        params.require("client_id", credentials.client_id.as_str());
        params.require("redirect_uri", redirect_uri);
        if let Some(scope) = self.config.scope.as_deref().filter(|s| !s.is_empty()) {
            params.require("scope", scope);
        }
        params.require("state", state);
        if let Some(pkce) = pkce {
            params.require("code_challenge", pkce.challenge.as_str());
            params.require("code_challenge_method", pkce::CHALLENGE_METHOD);
        }
        self.adapter
            .modify_parameters(FlowStage::RequestingAuthorization, credentials, &mut params);

        let mut url = self.adapter.endpoints().authorize_url.clone();
        url.query_pairs_mut().extend_pairs(params.iter());
        url
    }

    async fn post_token(&self, params: StageParameters) -> Result<HttpResponse> {
        let request = HttpRequest::new(HttpMethod::Post, self.adapter.endpoints().token_url.clone())
            .header("Accept", "application/json")
            .form(params.into_pairs());
        self.transport.send(request).await
    }

    async fn run_grant(self: Arc<Self>, cancel: CancellationToken) -> Result<GrantOutcome> {
        let port = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(self.grant_cancelled()),
            bound = self.listener.listen(self.config.port) => bound?,
        };
        // cancel_grant() may have run while the socket was being bound.
        if cancel.is_cancelled() {
            return Ok(self.grant_cancelled());
        }
        let redirect_uri = self.redirect_uri(port);

        let pkce = self.adapter.uses_pkce().then(pkce::generate);
        let state = generate_state();
        let url = self.authorization_url(&redirect_uri, &state, pkce.as_ref());

        self.set_status(FlowStatus::AuthorizationRequested);
        tracing::info!(provider = self.adapter.name(), %redirect_uri, "requesting authorization");
        self.browser.open(url.as_str());

        let wait = async {
            tokio::select! {
                _ = cancel.cancelled() => RedirectResult::Cancelled,
                redirect = self.listener.wait() => redirect,
            }
        };
        let redirect = match self.config.callback_timeout {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(redirect) => redirect,
                Err(_) => {
                    self.listener.stop();
                    self.settle_status();
                    return Err(AuthError::Redirect(format!(
                        "timed out after {}s waiting for the authorization redirect",
                        limit.as_secs()
                    )));
                }
            },
            None => wait.await,
        };

        let code = match redirect {
            RedirectResult::Code {
                code,
                state: returned,
            } => {
                if returned.as_deref() != Some(state.as_str()) {
                    tracing::warn!("authorization redirect state mismatch");
                    self.settle_status();
                    return Err(AuthError::Redirect("state_mismatch".to_string()));
                }
                code
            }
            RedirectResult::Error(reason) => {
                tracing::warn!(%reason, "authorization redirect failed");
                self.settle_status();
                return Err(AuthError::Redirect(reason));
            }
            RedirectResult::Cancelled => return Ok(self.grant_cancelled()),
        };

        self.set_status(FlowStatus::TokenExchangePending);
        let credentials = self.store.credentials();
        let mut params = StageParameters::new();
        params.require("grant_type", "authorization_code");
        params.require("code", code);
        params.require("redirect_uri", redirect_uri);
        params.require("client_id", credentials.client_id.as_str());
        if credentials.has_secret() {
            params.require("client_secret", credentials.client_secret.as_str());
        }
        // The verifier leaves scope with the pair once it is in the request.
        if let Some(pkce) = pkce {
            params.require("code_verifier", pkce.verifier);
        }
        self.adapter
            .modify_parameters(FlowStage::RequestingAccessToken, credentials, &mut params);

        let issued = match self.post_token(params).await {
            Ok(resp) if resp.is_success() => parse_token_response(&resp).map_err(AuthError::Exchange),
            Ok(resp) => Err(AuthError::Exchange(
                ErrorResponse::from_response(&resp).describe(&resp),
            )),
            Err(e) => Err(e),
        };
        match issued {
            Ok(issued) => {
                self.store.store_issued(issued);
                self.set_status(FlowStatus::Granted);
                self.listener.stop();
                tracing::info!(
                    provider = self.adapter.name(),
                    expires_at = %self.store.expires_at(),
                    "authorization granted"
                );
                Ok(GrantOutcome::Granted)
            }
            Err(e) => {
                tracing::warn!(error = %e, "authorization code exchange failed");
                self.settle_status();
                Err(e)
            }
        }
    }

    async fn run_refresh(self: Arc<Self>) -> Result<()> {
        let Some(refresh_token) = self.store.refresh_token() else {
            return Err(AuthError::NotAuthenticated(
                "no refresh token available".to_string(),
            ));
        };

        let previous = *self.status.borrow();
        self.set_status(FlowStatus::RefreshingToken);

        let credentials = self.store.credentials();
        let mut params = StageParameters::new();
        params.require("grant_type", "refresh_token");
        params.require("refresh_token", refresh_token);
        params.require("client_id", credentials.client_id.as_str());
        self.adapter
            .modify_parameters(FlowStage::RefreshingAccessToken, credentials, &mut params);

        let failure = match self.post_token(params).await {
            Ok(resp) if resp.is_success() => match parse_token_response(&resp) {
                Ok(issued) => {
                    self.store.store_issued(issued);
                    self.set_status(FlowStatus::Granted);
                    tracing::info!(
                        provider = self.adapter.name(),
                        expires_at = %self.store.expires_at(),
                        "access token refreshed"
                    );
                    return Ok(());
                }
                Err(message) => RefreshError::Transient(message),
            },
            Ok(resp) => {
                let body = ErrorResponse::from_response(&resp);
                let reason = body.describe(&resp);
                if self
                    .adapter
                    .is_refresh_token_invalidated(resp.status, body.error.as_deref())
                {
                    RefreshError::Invalidated(reason)
                } else {
                    RefreshError::Transient(reason)
                }
            }
            Err(e) => RefreshError::Transient(e.to_string()),
        };

        match &failure {
            RefreshError::Invalidated(reason) => {
                tracing::warn!(%reason, "refresh token invalidated; re-authorization required");
                self.store.reset();
                self.set_status(FlowStatus::NotAuthenticated);
            }
            RefreshError::Transient(reason) => {
                tracing::warn!(%reason, "access token refresh failed");
                self.settle_after_refresh(previous);
            }
        }
        Err(failure.into())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
