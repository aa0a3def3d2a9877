use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::time;
use vkads_clock::DurationSecs;
use vkads_tokens::{
    config::{ManagerConfig, ProviderConfig, DEFAULT_BASE_URL},
    endpoint::{dto::ClientCredentials, TokenEndpoint},
    store::FileTokenStore,
    ClientId, ClientSecret, TokenLifecycleManager,
};

#[derive(Debug, Parser)]
struct Opts {
    /// Base URL of the platform's OAuth2 API
    #[arg(long, env = "VK_ADS_OAUTH_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// The client ID of the application
    #[arg(short, long, env = "VK_ADS_CLIENT_ID")]
    client_id: ClientId,

    /// The client secret used to identify the application to the platform
    #[arg(short = 's', long, env = "VK_ADS_CLIENT_SECRET", hide_env_values = true)]
    client_secret: ClientSecret,

    /// The local file used to share tokens between runs
    #[arg(short = 'f', long, env, default_value = ".vk_ads_tokens.json")]
    token_file: std::path::PathBuf,

    /// Seconds before the reported expiry at which a token is renewed
    #[arg(long, env, default_value_t = 0)]
    expiry_margin: u64,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the current access token, obtaining one if needed
    Token,

    /// Revoke every token issued to the application
    Revoke,

    /// Keep requesting the token and report each transition
    Watch {
        /// Seconds between requests
        #[arg(long, default_value_t = 5)]
        interval: u64,
    },
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;

    let endpoint = TokenEndpoint::new(
        client,
        ProviderConfig::from_base_url(&opts.base_url)?,
        ClientCredentials::new(opts.client_id, opts.client_secret),
    );

    let manager = TokenLifecycleManager::builder(endpoint, FileTokenStore::new(opts.token_file))
        .config(ManagerConfig::default().with_expiry_margin(DurationSecs(opts.expiry_margin)))
        .build();

    match opts.command.unwrap_or(Command::Token) {
        Command::Token => {
            let token = manager.access_token().await?;
            let diagnostics = manager.diagnostics();
            tracing::info!(
                token = format_args!("{:#}", token),
                expires_at = diagnostics.expires_at.map(|e| e.0),
                has_refresh_token = diagnostics.has_refresh_token,
                "access token ready"
            );
            println!("{}", token.as_str());
        }
        Command::Revoke => {
            if !manager.revoke_access_token().await {
                color_eyre::eyre::bail!("the platform did not confirm revocation");
            }
        }
        Command::Watch { interval } => {
            let mut interval = time::interval(Duration::from_secs(interval));
            let mut last_phase = manager.phase();
            loop {
                interval.tick().await;

                match manager.access_token().await {
                    Ok(token) => {
                        let phase = manager.phase();
                        if phase != last_phase {
                            tracing::info!(
                                from = last_phase.as_str(),
                                to = phase.as_str(),
                                "phase changed"
                            );
                        }
                        last_phase = phase;
                        tracing::debug!(token = format_args!("{:#}", token), "pulled token");
                    }
                    Err(error) if error.is_retryable() => {
                        tracing::warn!(
                            error = &error as &dyn std::error::Error,
                            "unable to obtain token, will retry"
                        );
                    }
                    Err(error) => return Err(error.into()),
                }
            }
        }
    }

    Ok(())
}
