//! In-memory token state and client credentials
//!
//! [`TokenStore`] holds the current access token, refresh token, expiry
//! timestamp, and the client credentials of one authorization flow.  It
//! answers "is the access token currently valid" for the auto-refreshing
//! requestor.
//!
//! Mutation is crate-private: only the authorization flow writes token
//! state, after a successful exchange or refresh, or when the provider
//! invalidates the refresh token.  Nothing here is persisted; callers that
//! want to survive restarts save [`TokenStore::refresh_token`] themselves and
//! restore it with `AuthorizationFlow::load_refresh_token`.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Margin before `expires_at` at which a token is already treated as stale.
pub const DEFAULT_EXPIRY_SKEW_SECS: u64 = 60;

// ---------------------------------------------------------------------------
// ClientCredentials
// ---------------------------------------------------------------------------

/// OAuth client identifier and (optional) shared secret.
///
/// Installed applications are public clients, but some providers still
/// issue a secret; an empty `client_secret` means "not present" and is never
/// sent.
///
/// # Examples
///
/// ```
/// use autoauth::auth::token_store::ClientCredentials;
///
/// let creds = ClientCredentials::new("my-client", "");
/// assert!(creds.is_configured());
/// assert!(!creds.has_secret());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCredentials {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
}

impl ClientCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Returns `true` once a client id is set.
    pub fn is_configured(&self) -> bool {
        !self.client_id.is_empty()
    }

    pub fn has_secret(&self) -> bool {
        !self.client_secret.is_empty()
    }
}

// ---------------------------------------------------------------------------
// TokenState
// ---------------------------------------------------------------------------

/// Snapshot of the tokens held by a flow.
///
/// `expires_at` is meaningful only while `access_token` is non-empty.  The
/// epoch (the `Default` of `DateTime<Utc>`) marks "never granted".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenState {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub token_type: String,
    pub scope: Option<String>,
}

impl TokenState {
    /// Returns `true` when the access token is missing, expired, or within
    /// `skew` of expiring at `now`.
    pub fn is_stale_at(&self, now: DateTime<Utc>, skew: chrono::Duration) -> bool {
        if self.access_token.is_empty() || self.expires_at == DateTime::<Utc>::default() {
            return true;
        }
        match self.expires_at.checked_sub_signed(skew) {
            Some(threshold) => now >= threshold,
            None => true,
        }
    }

    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.is_empty()
    }
}

/// Tokens issued by a successful exchange or refresh.
#[derive(Debug, Clone)]
pub(crate) struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
}

fn expiry_from_now(now: DateTime<Utc>, expires_in: Option<u64>) -> DateTime<Utc> {
    // No `expires_in` means the provider did not bound the token's lifetime.
    expires_in
        .and_then(|secs| i64::try_from(secs).ok())
        .and_then(chrono::Duration::try_seconds)
        .map(|lifetime| {
            now.checked_add_signed(lifetime)
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        })
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// ---------------------------------------------------------------------------
// TokenStore
// ---------------------------------------------------------------------------

/// Token state plus client credentials of one authorization flow.
///
/// Reads are cheap and never block on network activity; the state lock is
/// only held for the duration of a field copy.
#[derive(Debug)]
pub struct TokenStore {
    credentials: ClientCredentials,
    state: RwLock<TokenState>,
    expiry_skew: chrono::Duration,
}

impl TokenStore {
    /// Creates an empty store for `credentials` with the default expiry skew.
    pub fn new(credentials: ClientCredentials) -> Self {
        Self {
            credentials,
            state: RwLock::new(TokenState::default()),
            expiry_skew: seconds(DEFAULT_EXPIRY_SKEW_SECS),
        }
    }

    /// Overrides the margin before expiry at which tokens count as stale.
    pub fn with_expiry_skew(mut self, skew: std::time::Duration) -> Self {
        self.expiry_skew = seconds(skew.as_secs());
        self
    }

    pub fn credentials(&self) -> &ClientCredentials {
        &self.credentials
    }

    /// Returns a copy of the current token state.
    pub fn snapshot(&self) -> TokenState {
        self.state.read().clone()
    }

    /// The current access token, if one has been granted.
    pub fn access_token(&self) -> Option<String> {
        let state = self.state.read();
        (!state.access_token.is_empty()).then(|| state.access_token.clone())
    }

    pub fn refresh_token(&self) -> Option<String> {
        let state = self.state.read();
        state
            .has_refresh_token()
            .then(|| state.refresh_token.clone())
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.state.read().expires_at
    }

    /// Returns `true` when the access token can be used right now.
    pub fn is_access_token_valid(&self) -> bool {
        !self.state.read().is_stale_at(Utc::now(), self.expiry_skew)
    }

    /// Records a successful exchange or refresh.
    ///
    /// The refresh token is replaced only when the provider issued a new
    /// one.
    pub(crate) fn store_issued(&self, issued: IssuedTokens) {
        let mut state = self.state.write();
        state.access_token = issued.access_token;
        state.expires_at = expiry_from_now(Utc::now(), issued.expires_in);
        state.token_type = issued.token_type.unwrap_or_else(|| "Bearer".to_string());
        if let Some(refresh) = issued.refresh_token.filter(|r| !r.is_empty()) {
            state.refresh_token = refresh;
        }
        if issued.scope.is_some() {
            state.scope = issued.scope;
        }
    }

    /// Seeds the refresh token, dropping any access token issued for an
    /// earlier session.
    pub(crate) fn set_refresh_token(&self, token: &str) {
        let mut state = self.state.write();
        *state = TokenState {
            refresh_token: token.to_string(),
            ..TokenState::default()
        };
    }

    /// Clears every token.
    pub(crate) fn reset(&self) {
        *self.state.write() = TokenState::default();
    }
}

fn seconds(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or_else(chrono::Duration::zero)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
