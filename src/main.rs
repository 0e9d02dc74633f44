//! AutoAuth - OAuth 2.0 client for installed applications
//!
//! Main entry point for the `autoauth` command.

use anyhow::Result;

use autoauth::cli::{Cli, Commands};
use autoauth::commands;
use autoauth::config::Config;
use autoauth::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/autoauth.yaml");
    let config = Config::load(config_path, &cli)?;

    init_logging(&config.logging)?;

    // Validate configuration
    config.validate()?;

    match cli.command {
        Commands::Grant { no_browser } => {
            tracing::info!("Starting authorization grant");
            commands::grant::run_grant(&config, no_browser).await
        }
        Commands::Refresh { refresh_token } => {
            tracing::info!("Refreshing access token");
            commands::refresh::run_refresh(&config, &refresh_token).await
        }
        Commands::Get {
            url,
            refresh_token,
            no_browser,
        } => {
            tracing::info!("Requesting {}", url);
            commands::get::run_get(&config, &url, refresh_token.as_deref(), no_browser).await
        }
        Commands::Revoke { refresh_token } => {
            tracing::info!("Revoking refresh token");
            commands::revoke::run_revoke(&config, &refresh_token).await
        }
    }
}
