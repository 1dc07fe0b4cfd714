use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use social_api::{AppState, Server};
use social_core::{LogFormat, LoggingConfig, Settings};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "social-api", version, about = "Social backend REST API")]
struct Cli {
    /// Directory holding default.toml, <env>.toml and local.toml
    #[arg(long, env = "SOCIAL_CONFIG_DIR", default_value = "config")]
    config_dir: PathBuf,

    /// Environment name used to pick <env>.toml
    #[arg(long)]
    env: Option<String>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "social_api={level},social_core={level},tower_http=debug",
            level = logging.level
        )
        .into()
    });
    let registry = tracing_subscriber::registry().with(filter);
    match logging.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Compact => registry.with(tracing_subscriber::fmt::layer().compact()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let env_name = cli.env.unwrap_or_else(Settings::default_env);

    let mut settings = Settings::load(&cli.config_dir, &env_name)
        .with_context(|| format!("loading configuration from {}", cli.config_dir.display()))?;
    if let Some(host) = cli.host {
        settings.server.host = host;
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    settings.validate()?;

    init_tracing(&settings.logging);

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid listen address {}:{}",
                settings.server.host, settings.server.port
            )
        })?;
    tracing::info!(env = %settings.env, "Starting social API");

    let state = AppState::new(settings).await?;
    Server::new(addr, state).run().await
}
