//! OAuth 2.0 authorization for installed applications
//!
//! Authorization code grant with PKCE over a loopback redirect, plus
//! transparent refresh of the access token before authenticated requests.
//!
//! # Module Layout
//!
//! - [`browser`]     -- hands the authorization URL to the user's browser
//! - [`flow`]        -- the authorization and refresh state machine
//! - [`listener`]    -- one-shot loopback HTTP listener for the redirect
//! - [`pkce`]        -- PKCE `S256` verifier and challenge generation
//! - [`provider`]    -- provider endpoints, per-stage parameters, client
//!   descriptors
//! - [`requestor`]   -- bearer-authenticated requests with refresh-on-stale
//! - [`token_store`] -- in-memory token state and client credentials

pub mod browser;
pub mod flow;
pub mod listener;
pub mod pkce;
pub mod provider;
pub mod requestor;
mod single_flight;
pub mod token_store;

pub use flow::{AuthorizationFlow, FlowBuilder, FlowConfig, FlowStatus, GrantOutcome};
pub use listener::{RedirectListener, RedirectResult};
pub use provider::{GenericProvider, GoogleProvider, ProviderAdapter, ProviderEndpoints};
pub use requestor::AutoRefreshingRequestor;
pub use token_store::{ClientCredentials, TokenState, TokenStore};
