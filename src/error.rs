//! Error types for AutoAuth
//!
//! This module defines the error taxonomy shared by the authorization flow,
//! the redirect listener, the token requestor, and configuration loading,
//! using `thiserror` for ergonomic error handling.
//!
//! Both [`AuthError`] and [`RefreshError`] are `Clone`: a single in-flight
//! grant or refresh attempt delivers the same outcome to every caller that
//! joined it.

use thiserror::Error;

/// Failure modes of a refresh-token grant.
///
/// The split decides what happens to the local token state: a transient
/// failure keeps the refresh token so the caller may retry, an invalidated
/// refresh token clears the state and requires full re-authorization.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    /// Network error, 5xx, or an unrecognised rejection.  The refresh token
    /// is preserved.
    #[error("transient refresh failure: {0}")]
    Transient(String),

    /// The provider reported the refresh token itself as invalid or revoked.
    #[error("refresh token rejected by provider: {0}")]
    Invalidated(String),
}

/// Main error type for AutoAuth operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider client descriptor could not be loaded
    #[error("Invalid client descriptor: {0}")]
    Descriptor(String),

    /// The loopback redirect listener could not bind its port
    #[error("Failed to bind redirect listener on port {port}: {message}")]
    Bind {
        /// The requested port (0 means OS-assigned)
        port: u16,
        /// Underlying I/O error text
        message: String,
    },

    /// The provider redirected with an error, a malformed query, or the wait
    /// timed out
    #[error("Authorization redirect failed: {0}")]
    Redirect(String),

    /// The token endpoint rejected the authorization code
    #[error("Authorization code exchange failed: {0}")]
    Exchange(String),

    /// The token endpoint rejected the refresh token
    #[error("Token refresh failed: {0}")]
    Refresh(#[from] RefreshError),

    /// An authenticated request was never issued because the refresh it was
    /// waiting on failed
    #[error("Authenticated request not issued: {0}")]
    DeferredRequest(#[source] Box<AuthError>),

    /// The operation requires credentials or tokens that are not present
    #[error("Not authenticated: {0}")]
    NotAuthenticated(String),

    /// The revocation endpoint rejected the request
    #[error("Revocation failed: {0}")]
    Revocation(String),

    /// Network-level HTTP failure (connect, TLS, timeout, body read)
    #[error("HTTP transport error: {0}")]
    Transport(String),

    /// A non-2xx response where success was required
    #[error("Unexpected HTTP status {status}: {body}")]
    Status {
        /// Response status code
        status: u16,
        /// Response body text
        body: String,
    },

    /// A background flow task ended abnormally
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Returns the refresh failure behind this error, looking through
    /// [`AuthError::DeferredRequest`].
    pub fn refresh_error(&self) -> Option<&RefreshError> {
        match self {
            Self::Refresh(e) => Some(e),
            Self::DeferredRequest(cause) => cause.refresh_error(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Result type alias for AutoAuth operations
pub type Result<T> = std::result::Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_config_error_display() {
        let error = AuthError::Config("invalid format".to_string());
        assert_eq!(error.to_string(), "Configuration error: invalid format");
    }

    #[test]
    fn test_bind_error_display_mentions_port() {
        let error = AuthError::Bind {
            port: 8080,
            message: "address in use".to_string(),
        };
        let s = error.to_string();
        assert!(s.contains("8080"));
        assert!(s.contains("address in use"));
    }

    #[test]
    fn test_refresh_error_converts_into_auth_error() {
        let error: AuthError = RefreshError::Invalidated("invalid_grant".to_string()).into();
        assert!(matches!(
            error,
            AuthError::Refresh(RefreshError::Invalidated(_))
        ));
    }

    #[test]
    fn test_deferred_request_exposes_cause_as_source() {
        let cause = AuthError::Refresh(RefreshError::Transient("503".to_string()));
        let error = AuthError::DeferredRequest(Box::new(cause.clone()));
        let source = error.source().expect("deferred error must carry a source");
        assert_eq!(source.to_string(), cause.to_string());
    }

    #[test]
    fn test_refresh_error_looks_through_deferred_request() {
        let error = AuthError::DeferredRequest(Box::new(AuthError::Refresh(
            RefreshError::Invalidated("revoked".to_string()),
        )));
        assert_eq!(
            error.refresh_error(),
            Some(&RefreshError::Invalidated("revoked".to_string()))
        );
        assert!(AuthError::Exchange("x".to_string()).refresh_error().is_none());
    }

    #[test]
    fn test_status_error_display() {
        let error = AuthError::Status {
            status: 403,
            body: "forbidden".to_string(),
        };
        assert_eq!(error.to_string(), "Unexpected HTTP status 403: forbidden");
    }

    #[test]
    fn test_error_is_send_sync_clone() {
        fn assert_traits<T: Send + Sync + Clone>() {}
        assert_traits::<AuthError>();
        assert_traits::<RefreshError>();
    }
}
