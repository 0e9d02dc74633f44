//! Provider endpoints, per-stage parameter injection, and client descriptors
//!
//! A [`ProviderAdapter`] supplies the authorize, token, and revoke endpoints
//! of one OAuth provider and may add provider-specific fields to the
//! parameter set the flow builds at each [`FlowStage`].  The adapter only
//! adds: every parameter the flow itself sets is protected in
//! [`StageParameters`] and cannot be overwritten or removed.
//!
//! Two adapters ship with the crate:
//!
//! - [`GenericProvider`] -- caller-supplied endpoints.
//! - [`GoogleProvider`] -- Google's installed-application endpoints, with
//!   `client_secret` on refresh and an optional `login_hint`.
//!
//! [`load_descriptor`] parses the client JSON issued by a provider console
//! into [`ClientCredentials`].

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use serde::Deserialize;
use url::Url;

use crate::auth::token_store::ClientCredentials;
use crate::error::{AuthError, Result};
use crate::transport::HttpMethod;

// ---------------------------------------------------------------------------
// FlowStage
// ---------------------------------------------------------------------------

/// The flow stage for which parameters are being prepared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowStage {
    /// OAuth 1.0a temporary credentials.  The authorization code flow never
    /// enters this stage; it exists so adapters can match exhaustively.
    RequestingTemporaryCredentials,
    /// Building the authorization URL opened in the browser.
    RequestingAuthorization,
    /// Exchanging the authorization code at the token endpoint.
    RequestingAccessToken,
    /// Exchanging the refresh token at the token endpoint.
    RefreshingAccessToken,
}

// ---------------------------------------------------------------------------
// StageParameters
// ---------------------------------------------------------------------------

/// Ordered parameter set with flow-protected keys.
///
/// The flow registers its own parameters with `require`; adapters receive
/// `&mut StageParameters` and can only [`insert`](Self::insert), which
/// refuses to touch protected keys.  There is no removal API.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageParameters {
    pairs: Vec<(String, String)>,
    protected: BTreeSet<String>,
}

impl StageParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a parameter the flow depends on and protects it.
    pub(crate) fn require(&mut self, key: &str, value: impl Into<String>) {
        self.put(key, value.into());
        self.protected.insert(key.to_string());
    }

    /// Adds or overrides a provider-specific parameter.
    ///
    /// Returns `false`, leaving the set unchanged, when `key` is protected.
    pub fn insert(&mut self, key: &str, value: impl Into<String>) -> bool {
        if self.protected.contains(key) {
            tracing::debug!(key, "provider adapter tried to override a flow parameter");
            return false;
        }
        self.put(key, value.into());
        true
    }

    fn put(&mut self, key: &str, value: String) {
        match self.pairs.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value,
            None => self.pairs.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn is_protected(&self, key: &str) -> bool {
        self.protected.contains(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn into_pairs(self) -> Vec<(String, String)> {
        self.pairs
    }
}

// ---------------------------------------------------------------------------
// ProviderEndpoints
// ---------------------------------------------------------------------------

/// Endpoints of one OAuth provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoints {
    pub authorize_url: Url,
    pub token_url: Url,
    /// Revocation URL template; `{token}` is replaced by the url-encoded
    /// refresh token.
    pub revoke_url: Option<String>,
    pub revoke_method: HttpMethod,
}

impl ProviderEndpoints {
    /// Parses authorize and token URLs.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if either URL is invalid.
    pub fn new(authorize_url: &str, token_url: &str) -> Result<Self> {
        Ok(Self {
            authorize_url: parse_url("authorize", authorize_url)?,
            token_url: parse_url("token", token_url)?,
            revoke_url: None,
            revoke_method: HttpMethod::Get,
        })
    }

    pub fn with_revoke_url(mut self, template: impl Into<String>, method: HttpMethod) -> Self {
        self.revoke_url = Some(template.into());
        self.revoke_method = method;
        self
    }

    /// Expands the revoke template for `token`.
    ///
    /// Returns `Ok(None)` when the provider has no revocation endpoint.
    pub fn revoke_url_for(&self, token: &str) -> Result<Option<Url>> {
        let Some(template) = &self.revoke_url else {
            return Ok(None);
        };
        let encoded: String = url::form_urlencoded::byte_serialize(token.as_bytes()).collect();
        parse_url("revoke", &template.replace("{token}", &encoded)).map(Some)
    }
}

fn parse_url(which: &str, raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| AuthError::Config(format!("invalid {which} URL '{raw}': {e}")))
}

// ---------------------------------------------------------------------------
// ProviderAdapter
// ---------------------------------------------------------------------------

/// Provider-specific behaviour composed into an authorization flow.
pub trait ProviderAdapter: Send + Sync + fmt::Debug {
    /// Short provider name used in logs.
    fn name(&self) -> &str;

    fn endpoints(&self) -> &ProviderEndpoints;

    /// Whether authorization attempts carry a PKCE challenge.
    fn uses_pkce(&self) -> bool {
        true
    }

    /// Adds provider-specific parameters for `stage`.
    fn modify_parameters(
        &self,
        _stage: FlowStage,
        _credentials: &ClientCredentials,
        _params: &mut StageParameters,
    ) {
    }

    /// Decides whether a rejected refresh means the refresh token itself is
    /// dead.  The default follows RFC 6749 section 5.2: `invalid_grant`.
    fn is_refresh_token_invalidated(&self, _status: u16, error_code: Option<&str>) -> bool {
        error_code == Some("invalid_grant")
    }
}

/// Adapter for a provider configured with explicit endpoints.
///
/// Sends `client_secret` on refresh when the credentials carry one.
#[derive(Debug, Clone)]
pub struct GenericProvider {
    name: String,
    endpoints: ProviderEndpoints,
    pkce: bool,
}

impl GenericProvider {
    pub fn new(endpoints: ProviderEndpoints) -> Self {
        Self {
            name: "generic".to_string(),
            endpoints,
            pkce: true,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_pkce(mut self, enabled: bool) -> Self {
        self.pkce = enabled;
        self
    }
}

impl ProviderAdapter for GenericProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn endpoints(&self) -> &ProviderEndpoints {
        &self.endpoints
    }

    fn uses_pkce(&self) -> bool {
        self.pkce
    }

    fn modify_parameters(
        &self,
        stage: FlowStage,
        credentials: &ClientCredentials,
        params: &mut StageParameters,
    ) {
        if stage == FlowStage::RefreshingAccessToken && credentials.has_secret() {
            params.insert("client_secret", credentials.client_secret.as_str());
        }
    }
}

pub const GOOGLE_AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://www.googleapis.com/oauth2/v4/token";
pub const GOOGLE_REVOKE_URL: &str = "https://accounts.google.com/o/oauth2/revoke?token={token}";

/// Google OAuth 2.0 for installed applications.
///
/// <https://developers.google.com/identity/protocols/oauth2/native-app>
#[derive(Debug, Clone)]
pub struct GoogleProvider {
    endpoints: ProviderEndpoints,
    login_hint: Option<String>,
}

impl GoogleProvider {
    /// Google's published endpoints.
    ///
    /// # Errors
    ///
    /// Never fails for the built-in URLs; the `Result` comes from URL
    /// parsing.
    pub fn new() -> Result<Self> {
        Self::with_endpoints(
            ProviderEndpoints::new(GOOGLE_AUTHORIZE_URL, GOOGLE_TOKEN_URL)?
                .with_revoke_url(GOOGLE_REVOKE_URL, HttpMethod::Get),
        )
    }

    /// Google semantics against other endpoints (tests, proxies).
    pub fn with_endpoints(endpoints: ProviderEndpoints) -> Result<Self> {
        Ok(Self {
            endpoints,
            login_hint: None,
        })
    }

    /// Pre-selects the account on the consent page.
    pub fn with_login_hint(mut self, user: impl Into<String>) -> Self {
        let user = user.into();
        self.login_hint = (!user.is_empty()).then_some(user);
        self
    }

    pub fn login_hint(&self) -> Option<&str> {
        self.login_hint.as_deref()
    }
}

impl ProviderAdapter for GoogleProvider {
    fn name(&self) -> &str {
        "google"
    }

    fn endpoints(&self) -> &ProviderEndpoints {
        &self.endpoints
    }

    fn modify_parameters(
        &self,
        stage: FlowStage,
        credentials: &ClientCredentials,
        params: &mut StageParameters,
    ) {
        match stage {
            FlowStage::RefreshingAccessToken => {
                tracing::debug!(provider = "google", "refreshing access token");
                params.insert("client_id", credentials.client_id.as_str());
                params.insert("client_secret", credentials.client_secret.as_str());
            }
            FlowStage::RequestingAccessToken => {
                tracing::debug!(provider = "google", "requesting access token");
            }
            FlowStage::RequestingAuthorization => {
                tracing::debug!(provider = "google", "requesting authorization");
                if let Some(hint) = &self.login_hint {
                    params.insert("login_hint", hint.as_str());
                }
            }
            FlowStage::RequestingTemporaryCredentials => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Client descriptor
// ---------------------------------------------------------------------------

/// Loopback redirect entries accepted in a descriptor's `redirect_uris`.
const LOOPBACK_REDIRECTS: &[&str] = &["http://localhost", "http://127.0.0.1"];

#[derive(Debug, Deserialize)]
struct Descriptor {
    installed: Option<InstalledClient>,
}

#[derive(Debug, Deserialize)]
struct InstalledClient {
    client_id: String,
    #[serde(default)]
    client_secret: String,
    #[serde(default)]
    redirect_uris: Vec<String>,
}

/// Parses an installed-application client descriptor.
///
/// Expected shape:
///
/// ```json
/// { "installed": { "client_id": "...", "client_secret": "...",
///                  "redirect_uris": ["http://localhost"] } }
/// ```
///
/// # Errors
///
/// Returns [`AuthError::Descriptor`] when the `installed` object is absent,
/// malformed, or its `redirect_uris` lack a loopback entry.
///
/// # Examples
///
/// ```
/// use autoauth::auth::provider::load_descriptor;
///
/// let json = serde_json::json!({
///     "installed": {
///         "client_id": "abc.apps.example.com",
///         "client_secret": "s3cret",
///         "redirect_uris": ["urn:ietf:wg:oauth:2.0:oob", "http://localhost"]
///     }
/// });
/// let creds = load_descriptor(&json).unwrap();
/// assert_eq!(creds.client_id, "abc.apps.example.com");
/// ```
pub fn load_descriptor(value: &serde_json::Value) -> Result<ClientCredentials> {
    let descriptor: Descriptor = serde_json::from_value(value.clone())
        .map_err(|e| reject(format!("malformed descriptor: {e}")))?;

    let Some(installed) = descriptor.installed else {
        return Err(reject(
            "descriptor must be of the 'installed' application type".to_string(),
        ));
    };

    let has_loopback = installed
        .redirect_uris
        .iter()
        .any(|uri| LOOPBACK_REDIRECTS.contains(&uri.trim_end_matches('/')));
    if !has_loopback {
        return Err(reject(
            "descriptor redirect_uris do not include the loopback address".to_string(),
        ));
    }

    Ok(ClientCredentials::new(
        installed.client_id,
        installed.client_secret,
    ))
}

/// Parses a descriptor from JSON text.
pub fn load_descriptor_str(json: &str) -> Result<ClientCredentials> {
    let value: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| reject(format!("failed to parse descriptor JSON: {e}")))?;
    load_descriptor(&value)
}

/// Reads and parses a descriptor file.
pub fn load_descriptor_file(path: impl AsRef<Path>) -> Result<ClientCredentials> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| {
        reject(format!(
            "failed to read descriptor {}: {e}",
            path.display()
        ))
    })?;
    load_descriptor_str(&contents)
}

fn reject(message: String) -> AuthError {
    tracing::warn!("{}", message);
    AuthError::Descriptor(message)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> ClientCredentials {
        ClientCredentials::new("client-1", "secret-1")
    }

    // -----------------------------------------------------------------------
    // StageParameters
    // -----------------------------------------------------------------------

    #[test]
    fn test_insert_adds_and_overrides_unprotected_params() {
        let mut params = StageParameters::new();
        assert!(params.insert("login_hint", "a@example.com"));
        assert!(params.insert("login_hint", "b@example.com"));
        assert_eq!(params.get("login_hint"), Some("b@example.com"));
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_insert_cannot_override_required_params() {
        let mut params = StageParameters::new();
        params.require("redirect_uri", "http://127.0.0.1:8080/callback");
        assert!(!params.insert("redirect_uri", "https://evil.example.com"));
        assert_eq!(
            params.get("redirect_uri"),
            Some("http://127.0.0.1:8080/callback")
        );
        assert!(params.is_protected("redirect_uri"));
    }

    #[test]
    fn test_pairs_keep_insertion_order() {
        let mut params = StageParameters::new();
        params.require("response_type", "code");
        params.require("client_id", "id");
        params.insert("extra", "1");
        let keys: Vec<_> = params.iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, ["response_type", "client_id", "extra"]);
    }

    // -----------------------------------------------------------------------
    // ProviderEndpoints
    // -----------------------------------------------------------------------

    #[test]
    fn test_endpoints_reject_invalid_url() {
        let err = ProviderEndpoints::new("not a url", "https://a.example/token").unwrap_err();
        assert!(matches!(err, AuthError::Config(_)));
    }

    #[test]
    fn test_revoke_url_template_encodes_token() {
        let endpoints = ProviderEndpoints::new("https://a.example/auth", "https://a.example/token")
            .unwrap()
            .with_revoke_url("https://a.example/revoke?token={token}", HttpMethod::Get);
        let url = endpoints.revoke_url_for("1/abc+def").unwrap().unwrap();
        assert_eq!(url.as_str(), "https://a.example/revoke?token=1%2Fabc%2Bdef");
    }

    #[test]
    fn test_revoke_url_absent_returns_none() {
        let endpoints =
            ProviderEndpoints::new("https://a.example/auth", "https://a.example/token").unwrap();
        assert!(endpoints.revoke_url_for("tok").unwrap().is_none());
    }

    // -----------------------------------------------------------------------
    // Adapters
    // -----------------------------------------------------------------------

    #[test]
    fn test_google_adds_secret_on_refresh() {
        let google = GoogleProvider::new().unwrap();
        let mut params = StageParameters::new();
        params.require("grant_type", "refresh_token");
        google.modify_parameters(FlowStage::RefreshingAccessToken, &creds(), &mut params);
        assert_eq!(params.get("client_id"), Some("client-1"));
        assert_eq!(params.get("client_secret"), Some("secret-1"));
    }

    #[test]
    fn test_google_adds_login_hint_only_when_set() {
        let mut params = StageParameters::new();
        GoogleProvider::new().unwrap().modify_parameters(
            FlowStage::RequestingAuthorization,
            &creds(),
            &mut params,
        );
        assert!(!params.contains("login_hint"));

        let google = GoogleProvider::new()
            .unwrap()
            .with_login_hint("user@example.com");
        google.modify_parameters(FlowStage::RequestingAuthorization, &creds(), &mut params);
        assert_eq!(params.get("login_hint"), Some("user@example.com"));
    }

    #[test]
    fn test_google_empty_login_hint_is_none() {
        let google = GoogleProvider::new().unwrap().with_login_hint("");
        assert!(google.login_hint().is_none());
    }

    #[test]
    fn test_google_endpoints_are_hard_wired() {
        let google = GoogleProvider::new().unwrap();
        assert_eq!(
            google.endpoints().authorize_url.as_str(),
            GOOGLE_AUTHORIZE_URL
        );
        assert_eq!(google.endpoints().token_url.as_str(), GOOGLE_TOKEN_URL);
        assert!(google.endpoints().revoke_url.is_some());
        assert!(google.uses_pkce());
    }

    #[test]
    fn test_generic_adds_secret_on_refresh_only_when_present() {
        let endpoints =
            ProviderEndpoints::new("https://a.example/auth", "https://a.example/token").unwrap();
        let generic = GenericProvider::new(endpoints);

        let mut params = StageParameters::new();
        generic.modify_parameters(
            FlowStage::RefreshingAccessToken,
            &ClientCredentials::new("id", ""),
            &mut params,
        );
        assert!(params.is_empty());

        generic.modify_parameters(FlowStage::RefreshingAccessToken, &creds(), &mut params);
        assert_eq!(params.get("client_secret"), Some("secret-1"));
    }

    #[test]
    fn test_default_invalidation_rule_is_invalid_grant() {
        let google = GoogleProvider::new().unwrap();
        assert!(google.is_refresh_token_invalidated(400, Some("invalid_grant")));
        assert!(!google.is_refresh_token_invalidated(400, Some("invalid_request")));
        assert!(!google.is_refresh_token_invalidated(503, None));
    }

    // -----------------------------------------------------------------------
    // Descriptor
    // -----------------------------------------------------------------------

    #[test]
    fn test_descriptor_with_loopback_is_accepted() {
        let json = serde_json::json!({
            "installed": {
                "client_id": "abc",
                "client_secret": "xyz",
                "redirect_uris": ["http://localhost"]
            }
        });
        let creds = load_descriptor(&json).unwrap();
        assert_eq!(creds, ClientCredentials::new("abc", "xyz"));
    }

    #[test]
    fn test_descriptor_without_installed_is_rejected() {
        let json = serde_json::json!({
            "web": { "client_id": "abc", "redirect_uris": ["http://localhost"] }
        });
        let err = load_descriptor(&json).unwrap_err();
        assert!(matches!(err, AuthError::Descriptor(_)));
        assert!(err.to_string().contains("installed"));
    }

    #[test]
    fn test_descriptor_without_loopback_is_rejected() {
        let json = serde_json::json!({
            "installed": {
                "client_id": "abc",
                "redirect_uris": ["urn:ietf:wg:oauth:2.0:oob"]
            }
        });
        let err = load_descriptor(&json).unwrap_err();
        assert!(err.to_string().contains("loopback"));
    }

    #[test]
    fn test_descriptor_secret_is_optional() {
        let json = serde_json::json!({
            "installed": { "client_id": "abc", "redirect_uris": ["http://127.0.0.1/"] }
        });
        let creds = load_descriptor(&json).unwrap();
        assert!(!creds.has_secret());
    }

    #[test]
    fn test_descriptor_str_rejects_invalid_json() {
        assert!(matches!(
            load_descriptor_str("{not json"),
            Err(AuthError::Descriptor(_))
        ));
    }
}
