/*!
Command handlers for the CLI

This module provides the handlers invoked by the CLI entrypoint:

- `grant`   -- Authorize in the browser and print the issued tokens
- `refresh` -- Exchange a saved refresh token
- `get`     -- Authenticated GET with automatic refresh
- `revoke`  -- Revoke a refresh token at the provider

Handlers are thin: they build an `AuthorizationFlow` from the
configuration and report results on stdout.
*/

use crate::auth::browser::PrintOnly;
use crate::auth::flow::{AuthorizationFlow, GrantOutcome};
use crate::config::Config;
use anyhow::{Context, Result};
use colored::Colorize;
use std::sync::Arc;

/// Builds the flow, optionally without launching a browser.
fn build_flow(config: &Config, no_browser: bool) -> Result<AuthorizationFlow> {
    let mut builder = config
        .flow_builder()
        .context("Failed to configure authorization flow")?;
    if no_browser {
        builder = builder.browser(Arc::new(PrintOnly));
    }
    Ok(builder.build()?)
}

/// Runs a grant, cancelling it on Ctrl-C.
async fn grant_interactively(flow: &AuthorizationFlow) -> Result<GrantOutcome> {
    println!("{}", "Waiting for authorization in the browser...".cyan());
    let grant = flow.grant();
    tokio::pin!(grant);
    let outcome = tokio::select! {
        outcome = &mut grant => outcome?,
        _ = tokio::signal::ctrl_c() => {
            flow.cancel_grant();
            grant.await?
        }
    };
    Ok(outcome)
}

fn print_tokens(flow: &AuthorizationFlow) {
    let tokens = flow.tokens();
    println!("{} {}", "Status:".bold(), flow.status().to_string().green());
    println!("{} {}", "Token type:".bold(), tokens.token_type);
    if let Some(scope) = &tokens.scope {
        println!("{} {}", "Scope:".bold(), scope);
    }
    if tokens.expires_at == chrono::DateTime::<chrono::Utc>::MAX_UTC {
        println!("{} never", "Expires:".bold());
    } else {
        println!("{} {}", "Expires:".bold(), tokens.expires_at.to_rfc3339());
    }
    println!("{} {}", "Access token:".bold(), tokens.access_token);
    match flow.refresh_token() {
        Some(refresh) => println!("{} {}", "Refresh token:".bold(), refresh),
        None => println!("{} {}", "Refresh token:".bold(), "(none issued)".yellow()),
    }
}

pub mod grant {
    use super::*;

    /// Authorize in the browser and print the issued tokens
    ///
    /// # Arguments
    ///
    /// * `config` - Global configuration
    /// * `no_browser` - Only print the authorization URL
    pub async fn run_grant(config: &Config, no_browser: bool) -> Result<()> {
        let flow = build_flow(config, no_browser)?;
        match grant_interactively(&flow).await? {
            GrantOutcome::Granted => {
                println!("{}", "Authorization granted.".green());
                print_tokens(&flow);
            }
            GrantOutcome::Cancelled => println!("{}", "Authorization cancelled.".yellow()),
        }
        Ok(())
    }
}

pub mod refresh {
    use super::*;

    /// Exchange a saved refresh token and print the new tokens
    pub async fn run_refresh(config: &Config, refresh_token: &str) -> Result<()> {
        let flow = build_flow(config, true)?;
        flow.load_refresh_token(refresh_token)
            .await
            .context("Token refresh failed")?;
        println!("{}", "Access token refreshed.".green());
        print_tokens(&flow);
        Ok(())
    }
}

pub mod get {
    use super::*;

    /// Send an authenticated GET and print the response body
    ///
    /// Without a refresh token a grant runs first.  A non-2xx response is
    /// printed and then reported as an error.
    pub async fn run_get(
        config: &Config,
        url: &str,
        refresh_token: Option<&str>,
        no_browser: bool,
    ) -> Result<()> {
        let url = url::Url::parse(url).with_context(|| format!("Invalid URL: {}", url))?;
        let flow = build_flow(config, no_browser)?;

        match refresh_token {
            Some(token) => flow.set_refresh_token(token),
            None => {
                if grant_interactively(&flow).await? == GrantOutcome::Cancelled {
                    println!("{}", "Authorization cancelled.".yellow());
                    return Ok(());
                }
            }
        }

        let resp = flow.requestor().get(url).await?;
        let status = if resp.is_success() {
            resp.status.to_string().green()
        } else {
            resp.status.to_string().red()
        };
        eprintln!("{} {}", "HTTP".bold(), status);
        println!("{}", resp.text());
        resp.error_for_status()?;
        Ok(())
    }
}

pub mod revoke {
    use super::*;

    /// Revoke a refresh token at the provider
    pub async fn run_revoke(config: &Config, refresh_token: &str) -> Result<()> {
        let flow = build_flow(config, true)?;
        flow.set_refresh_token(refresh_token);
        flow.revoke().await.context("Revocation failed")?;
        flow.clear_tokens();
        println!("{}", "Refresh token revoked.".green());
        Ok(())
    }
}
