//! AutoAuth - OAuth 2.0 client for installed applications
//!
//! This library runs the OAuth 2.0 authorization code grant with PKCE for
//! desktop and command-line programs: it opens the provider's consent page
//! in the system browser, catches the redirect on a loopback listener,
//! exchanges the code for tokens, and keeps the access token fresh for
//! subsequent API calls.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `auth`: PKCE, redirect listener, token store, authorization flow,
//!   provider adapters, and the auto-refreshing requestor
//! - `transport`: HTTP request/response types and the transport seam
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `logging`: Tracing subscriber setup
//! - `cli`: Command-line interface definition
//! - `commands`: Handlers behind the CLI subcommands
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use autoauth::{AuthorizationFlow, ClientCredentials, GoogleProvider, GrantOutcome};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let flow = AuthorizationFlow::builder(
//!         Arc::new(GoogleProvider::new()?),
//!         ClientCredentials::new("my-client-id", "my-secret"),
//!     )
//!     .build()?;
//!
//!     if flow.grant().await? == GrantOutcome::Granted {
//!         let url = url::Url::parse("https://www.googleapis.com/oauth2/v3/userinfo")?;
//!         let resp = flow.requestor().get(url).await?;
//!         println!("{}", resp.text());
//!     }
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod transport;

// Re-export commonly used types
pub use auth::{
    AuthorizationFlow, AutoRefreshingRequestor, ClientCredentials, FlowConfig, FlowStatus,
    GenericProvider, GoogleProvider, GrantOutcome, ProviderAdapter, ProviderEndpoints,
    RedirectListener, TokenState,
};
pub use config::Config;
pub use error::{AuthError, RefreshError, Result};
pub use transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, RequestBody};
