//! Configuration management for AutoAuth
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::auth::flow::{AuthorizationFlow, FlowBuilder, FlowConfig};
use crate::auth::provider::{
    self, GenericProvider, GoogleProvider, ProviderAdapter, ProviderEndpoints,
};
use crate::auth::token_store::ClientCredentials;
use crate::error::{AuthError, Result};
use crate::transport::http::ReqwestTransport;
use crate::transport::HttpMethod;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Main configuration structure for AutoAuth
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// OAuth provider and client credentials
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Authorization flow behaviour
    #[serde(default)]
    pub flow: FlowSettings,
    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,
    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Provider configuration
///
/// Credentials come from `credentials_file` (an installed-application
/// descriptor) when set, else from `client_id` / `client_secret`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// `google` or `generic`
    #[serde(default = "default_provider_kind")]
    pub kind: String,

    /// Path to a client descriptor JSON file
    #[serde(default)]
    pub credentials_file: Option<PathBuf>,

    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default)]
    pub client_secret: Option<String>,

    /// Authorization endpoint (required for `generic`; overrides Google's)
    #[serde(default)]
    pub authorize_url: Option<String>,

    /// Token endpoint (required for `generic`; overrides Google's)
    #[serde(default)]
    pub token_url: Option<String>,

    /// Revocation URL template containing `{token}`
    #[serde(default)]
    pub revoke_url: Option<String>,

    /// `GET` or `POST`
    #[serde(default = "default_revoke_method")]
    pub revoke_method: String,

    /// Account pre-selected on the consent page (Google)
    #[serde(default)]
    pub login_hint: Option<String>,
}

fn default_provider_kind() -> String {
    "google".to_string()
}

fn default_revoke_method() -> String {
    "GET".to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: default_provider_kind(),
            credentials_file: None,
            client_id: None,
            client_secret: None,
            authorize_url: None,
            token_url: None,
            revoke_url: None,
            revoke_method: default_revoke_method(),
            login_hint: None,
        }
    }
}

/// Authorization flow configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowSettings {
    /// Loopback redirect port; 0 lets the OS choose
    #[serde(default)]
    pub port: u16,

    #[serde(default)]
    pub scope: Option<String>,

    #[serde(default = "default_redirect_host")]
    pub redirect_host: String,

    #[serde(default = "default_redirect_path")]
    pub redirect_path: String,

    /// Page shown after the redirect; empty selects the auto-closing page
    #[serde(default)]
    pub callback_text: String,

    /// Abandon the grant if no redirect arrives in time
    #[serde(default)]
    pub callback_timeout_seconds: Option<u64>,

    #[serde(default = "default_pkce")]
    pub pkce: bool,

    #[serde(default = "default_expiry_skew")]
    pub expiry_skew_seconds: u64,
}

fn default_redirect_host() -> String {
    "127.0.0.1".to_string()
}

fn default_redirect_path() -> String {
    crate::auth::listener::DEFAULT_REDIRECT_PATH.to_string()
}

fn default_pkce() -> bool {
    true
}

fn default_expiry_skew() -> u64 {
    crate::auth::token_store::DEFAULT_EXPIRY_SKEW_SECS
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            port: 0,
            scope: None,
            redirect_host: default_redirect_host(),
            redirect_path: default_redirect_path(),
            callback_text: String::new(),
            callback_timeout_seconds: None,
            pkce: default_pkce(),
            expiry_skew_seconds: default_expiry_skew(),
        }
    }
}

/// HTTP client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_timeout")]
    pub timeout_seconds: u64,
}

fn default_http_timeout() -> u64 {
    30
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_http_timeout(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json_format: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    /// Parses configuration from YAML text.
    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents)
            .map_err(|e| AuthError::Config(format!("Failed to parse config: {}", e)))
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| AuthError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&contents)
    }

    fn apply_env_vars(&mut self) {
        // Provider overrides
        if let Ok(kind) = std::env::var("AUTOAUTH_PROVIDER") {
            self.provider.kind = kind;
        }
        if let Ok(path) = std::env::var("AUTOAUTH_CREDENTIALS_FILE") {
            self.provider.credentials_file = Some(PathBuf::from(path));
        }
        if let Ok(client_id) = std::env::var("AUTOAUTH_CLIENT_ID") {
            self.provider.client_id = Some(client_id);
        }
        if let Ok(secret) = std::env::var("AUTOAUTH_CLIENT_SECRET") {
            self.provider.client_secret = Some(secret);
        }
        if let Ok(url) = std::env::var("AUTOAUTH_AUTHORIZE_URL") {
            self.provider.authorize_url = Some(url);
        }
        if let Ok(url) = std::env::var("AUTOAUTH_TOKEN_URL") {
            self.provider.token_url = Some(url);
        }
        if let Ok(url) = std::env::var("AUTOAUTH_REVOKE_URL") {
            self.provider.revoke_url = Some(url);
        }
        if let Ok(hint) = std::env::var("AUTOAUTH_LOGIN_HINT") {
            self.provider.login_hint = Some(hint);
        }

        // Flow overrides
        if let Ok(port) = std::env::var("AUTOAUTH_PORT") {
            if let Ok(v) = port.parse() {
                self.flow.port = v;
            } else {
                tracing::warn!("Invalid AUTOAUTH_PORT: {}", port);
            }
        }
        if let Ok(scope) = std::env::var("AUTOAUTH_SCOPE") {
            self.flow.scope = Some(scope);
        }
        if let Ok(timeout) = std::env::var("AUTOAUTH_CALLBACK_TIMEOUT_SECONDS") {
            if let Ok(v) = timeout.parse() {
                self.flow.callback_timeout_seconds = Some(v);
            } else {
                tracing::warn!("Invalid AUTOAUTH_CALLBACK_TIMEOUT_SECONDS: {}", timeout);
            }
        }

        if let Ok(timeout) = std::env::var("AUTOAUTH_HTTP_TIMEOUT_SECONDS") {
            if let Ok(v) = timeout.parse() {
                self.http.timeout_seconds = v;
            } else {
                tracing::warn!("Invalid AUTOAUTH_HTTP_TIMEOUT_SECONDS: {}", timeout);
            }
        }

        // Logging overrides
        if let Ok(level) = std::env::var("AUTOAUTH_LOG_LEVEL") {
            tracing::debug!(level = %level, "Env override: AUTOAUTH_LOG_LEVEL");
            self.logging.level = level;
        }
        if let Ok(json_logs) = std::env::var("AUTOAUTH_JSON_LOGS") {
            match json_logs.parse::<bool>() {
                Ok(v) => self.logging.json_format = v,
                Err(_) => tracing::warn!("Invalid value for AUTOAUTH_JSON_LOGS: {}", json_logs),
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if cli.verbose {
            self.logging.level = "debug".to_string();
        }
        if let Some(port) = cli.port {
            self.flow.port = port;
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] naming the first invalid setting
    pub fn validate(&self) -> Result<()> {
        let valid_providers = ["google", "generic"];
        if !valid_providers.contains(&self.provider.kind.as_str()) {
            return Err(AuthError::Config(format!(
                "Invalid provider kind: {}. Must be one of: {}",
                self.provider.kind,
                valid_providers.join(", ")
            )));
        }

        if self.provider.kind == "generic"
            && (self.provider.authorize_url.is_none() || self.provider.token_url.is_none())
        {
            return Err(AuthError::Config(
                "generic provider requires provider.authorize_url and provider.token_url"
                    .to_string(),
            ));
        }

        let has_client_id = self
            .provider
            .client_id
            .as_deref()
            .is_some_and(|id| !id.is_empty());
        if self.provider.credentials_file.is_none() && !has_client_id {
            return Err(AuthError::Config(
                "either provider.credentials_file or provider.client_id must be set".to_string(),
            ));
        }

        if let Some(template) = &self.provider.revoke_url {
            if !template.contains("{token}") {
                return Err(AuthError::Config(
                    "provider.revoke_url must contain the {token} placeholder".to_string(),
                ));
            }
        }
        let method: HttpMethod = self.provider.revoke_method.parse()?;
        if !matches!(method, HttpMethod::Get | HttpMethod::Post) {
            return Err(AuthError::Config(
                "provider.revoke_method must be GET or POST".to_string(),
            ));
        }

        if !self.flow.redirect_path.starts_with('/') {
            return Err(AuthError::Config(
                "flow.redirect_path must start with '/'".to_string(),
            ));
        }

        if self.flow.redirect_host.is_empty() {
            return Err(AuthError::Config(
                "flow.redirect_host cannot be empty".to_string(),
            ));
        }

        if self.flow.callback_timeout_seconds == Some(0) {
            return Err(AuthError::Config(
                "flow.callback_timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.http.timeout_seconds == 0 {
            return Err(AuthError::Config(
                "http.timeout_seconds must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Resolves the client credentials.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Descriptor`] if the descriptor file is rejected,
    /// or [`AuthError::Config`] if no client id is configured.
    pub fn credentials(&self) -> Result<ClientCredentials> {
        if let Some(path) = &self.provider.credentials_file {
            return provider::load_descriptor_file(path);
        }
        match self.provider.client_id.as_deref() {
            Some(id) if !id.is_empty() => Ok(ClientCredentials::new(
                id,
                self.provider.client_secret.clone().unwrap_or_default(),
            )),
            _ => Err(AuthError::Config("provider.client_id is not set".to_string())),
        }
    }

    /// Builds the provider adapter.
    pub fn provider_adapter(&self) -> Result<Arc<dyn ProviderAdapter>> {
        let p = &self.provider;
        let revoke_method: HttpMethod = p.revoke_method.parse()?;

        match p.kind.as_str() {
            "google" => {
                let mut endpoints = ProviderEndpoints::new(
                    p.authorize_url
                        .as_deref()
                        .unwrap_or(provider::GOOGLE_AUTHORIZE_URL),
                    p.token_url.as_deref().unwrap_or(provider::GOOGLE_TOKEN_URL),
                )?;
                endpoints = endpoints.with_revoke_url(
                    p.revoke_url
                        .as_deref()
                        .unwrap_or(provider::GOOGLE_REVOKE_URL),
                    revoke_method,
                );
                let mut google = GoogleProvider::with_endpoints(endpoints)?;
                if let Some(hint) = &p.login_hint {
                    google = google.with_login_hint(hint.as_str());
                }
                Ok(Arc::new(google))
            }
            "generic" => {
                let (Some(authorize), Some(token)) = (&p.authorize_url, &p.token_url) else {
                    return Err(AuthError::Config(
                        "generic provider requires authorize_url and token_url".to_string(),
                    ));
                };
                let mut endpoints = ProviderEndpoints::new(authorize, token)?;
                if let Some(template) = &p.revoke_url {
                    endpoints = endpoints.with_revoke_url(template.as_str(), revoke_method);
                }
                Ok(Arc::new(
                    GenericProvider::new(endpoints).with_pkce(self.flow.pkce),
                ))
            }
            other => Err(AuthError::Config(format!("Invalid provider kind: {}", other))),
        }
    }

    /// The provider-independent flow settings.
    pub fn flow_config(&self) -> FlowConfig {
        let f = &self.flow;
        FlowConfig {
            port: f.port,
            scope: f.scope.clone(),
            redirect_host: f.redirect_host.clone(),
            redirect_path: f.redirect_path.clone(),
            callback_text: f.callback_text.clone(),
            callback_timeout: f.callback_timeout_seconds.map(Duration::from_secs),
            expiry_skew: Duration::from_secs(f.expiry_skew_seconds),
        }
    }

    /// Builder preloaded with everything the configuration describes.
    ///
    /// # Errors
    ///
    /// Propagates credential, endpoint, and HTTP client construction errors
    pub fn flow_builder(&self) -> Result<FlowBuilder> {
        let transport = ReqwestTransport::new(Duration::from_secs(self.http.timeout_seconds))?;
        Ok(
            AuthorizationFlow::builder(self.provider_adapter()?, self.credentials()?)
                .config(self.flow_config())
                .transport(Arc::new(transport)),
        )
    }

    /// Builds a ready-to-use authorization flow.
    pub fn build_flow(&self) -> Result<AuthorizationFlow> {
        self.flow_builder()?.build()
    }
}
