use std::{
    env,
    io::ErrorKind,
    net::{IpAddr, SocketAddr, ToSocketAddrs},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use episode_relay::{
    app,
    config::{Config, ListenerConfig},
    state::AppState,
};
use tokio::net::TcpListener;

/// Environment variable overriding the configuration file used by `serve`.
const CONFIG_ENV: &str = "RELAY_CONFIG";
const CONFIG_FILE: &str = "relay.yaml";
const DEFAULT_CONFIG_PATH: &str = "config/relay.yaml";

#[derive(Parser, Debug)]
#[command(
    name = "episode-relay",
    about = "Relays episode metadata and swaps download links for embeddable ones",
    version,
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP relay (the default when no subcommand is given).
    Serve {
        /// Configuration file; falls back to `$RELAY_CONFIG`, then
        /// `config/relay.yaml`.
        #[arg(short = 'c', long = "config", value_name = "FILE")]
        config_file: Option<PathBuf>,
    },
    /// Check `relay.yaml` in a directory and exit.
    Validate {
        #[arg(
            short = 'c',
            long = "config",
            value_name = "DIR",
            default_value = "config"
        )]
        config_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    load_dotenv()?;
    episode_relay::init()?;

    match cli.command {
        Some(Command::Validate { config_dir }) => validate(&config_dir.join(CONFIG_FILE)),
        Some(Command::Serve { config_file }) => serve(config_path(config_file)).await,
        None => serve(config_path(None)).await,
    }
}

fn config_path(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| env::var_os(CONFIG_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn load_config(path: &Path) -> Result<(Config, AppState)> {
    let config = Config::load_from_path(path)
        .with_context(|| format!("could not load `{}`", path.display()))?;
    let state = AppState::from_config(&config)
        .with_context(|| format!("`{}` does not describe a usable relay", path.display()))?;
    Ok((config, state))
}

async fn serve(path: PathBuf) -> Result<()> {
    let (config, state) = load_config(&path)?;
    let addr = resolve_listener_addr(&config.listen)?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("could not bind {addr}"))?;
    let local_addr = listener.local_addr().context("listener has no local address")?;

    tracing::info!(
        config = %path.display(),
        %local_addr,
        upstream = %config.upstream.origin,
        max_hops = config.resolver.max_hops,
        max_retries = config.resolver.retry_policy.max_retries(),
        "episode relay accepting connections"
    );

    axum::serve(listener, app::build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("relay server stopped unexpectedly")?;

    tracing::info!("episode relay stopped");
    Ok(())
}

fn validate(path: &Path) -> Result<()> {
    load_config(path)?;
    println!("configuration at `{}` is valid", path.display());
    Ok(())
}

fn resolve_listener_addr(listener: &ListenerConfig) -> Result<SocketAddr> {
    if let Ok(ip) = listener.host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, listener.port));
    }

    (listener.host.as_str(), listener.port)
        .to_socket_addrs()
        .with_context(|| format!("could not resolve listen host `{}`", listener.host))?
        .next()
        .with_context(|| format!("listen host `{}` has no addresses", listener.host))
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(error) => {
                tracing::warn!(%error, "SIGTERM handler unavailable; waiting for ctrl+c only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!(%error, "ctrl+c handler unavailable");
        }
    }

    tracing::info!("draining connections before shutdown");
}

/// A missing `.env` is normal; a malformed one is an error.
fn load_dotenv() -> Result<()> {
    match dotenvy::dotenv() {
        Err(dotenvy::Error::Io(err)) if err.kind() == ErrorKind::NotFound => Ok(()),
        other => other.map(drop).context("could not read .env"),
    }
}
