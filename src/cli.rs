//! Command-line interface definition for AutoAuth
//!
//! This module defines the CLI structure using clap's derive API: a small
//! driver for authorizing against a provider, refreshing, calling an API
//! with the resulting token, and revoking.

use clap::{Parser, Subcommand};

/// AutoAuth - OAuth 2.0 authorization for installed applications
///
/// Runs the authorization code flow with PKCE through the browser and a
/// loopback redirect, then keeps the access token fresh.
#[derive(Parser, Debug, Clone)]
#[command(name = "autoauth")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/autoauth.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Loopback redirect port (0 picks a free port)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for AutoAuth
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Authorize in the browser and print the issued tokens
    Grant {
        /// Do not launch a browser; only print the authorization URL
        #[arg(long)]
        no_browser: bool,
    },

    /// Exchange a saved refresh token for a new access token
    Refresh {
        /// Refresh token from a previous grant
        #[arg(long, env = "AUTOAUTH_REFRESH_TOKEN")]
        refresh_token: String,
    },

    /// Send an authenticated GET request and print the response body
    Get {
        /// URL to request
        url: String,

        /// Refresh token from a previous grant; without it a grant runs first
        #[arg(long, env = "AUTOAUTH_REFRESH_TOKEN")]
        refresh_token: Option<String>,

        /// Do not launch a browser when a grant is needed
        #[arg(long)]
        no_browser: bool,
    },

    /// Revoke a refresh token at the provider
    Revoke {
        /// Refresh token to revoke
        #[arg(long, env = "AUTOAUTH_REFRESH_TOKEN")]
        refresh_token: String,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
