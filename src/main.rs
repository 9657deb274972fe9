use clap::Parser;
use mailwarden::config::{LogFormat, WardenConfig};
use mailwarden::host::Host;
use mailwarden::orchestrator::{EngineError, Orchestrator};
use mailwarden::signing::secrets;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const EXIT_FRAMING_ERROR: i32 = 1;
const EXIT_CONFIG_REJECTED: i32 = 2;
const EXIT_SECRETS_INACCESSIBLE: i32 = 3;

/// Privacy-first LLM email classification backend (native messaging host).
///
/// Reads length-prefixed JSON frames on stdin and writes responses on
/// stdout; all diagnostics go to stderr.
#[derive(Parser)]
#[command(name = "mailwarden", version)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Override the configured log level (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,
}

fn init_tracing(config: &WardenConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    // stdout carries frames; every diagnostic goes to stderr.
    match config.logging.format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match WardenConfig::load(cli.config.as_deref()) {
        Ok(config) => config.with_env_overrides(),
        Err(e) => {
            eprintln!("Configuration rejected: {}", e);
            std::process::exit(EXIT_CONFIG_REJECTED);
        }
    };
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    init_tracing(&config);

    let secrets = match secrets::from_config(&config.secrets) {
        Ok(secrets) => secrets,
        Err(e) => {
            tracing::error!(error = %e, "Secret store unavailable");
            std::process::exit(EXIT_SECRETS_INACCESSIBLE);
        }
    };

    // When signing is required, the key must resolve before we accept
    // any work.
    if config.signing.enabled {
        match secrets.get(&config.signing.key_ref) {
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::error!(key_ref = %config.signing.key_ref, "Signing key not found");
                std::process::exit(EXIT_SECRETS_INACCESSIBLE);
            }
            Err(e) => {
                tracing::error!(error = %e, "Secret store inaccessible");
                std::process::exit(EXIT_SECRETS_INACCESSIBLE);
            }
        }
    }

    let orchestrator = match Orchestrator::new(config, secrets) {
        Ok(orchestrator) => Arc::new(orchestrator),
        Err(e @ (EngineError::SigningKeyMissing(_) | EngineError::Secrets(_))) => {
            tracing::error!(error = %e, "Secret store inaccessible");
            std::process::exit(EXIT_SECRETS_INACCESSIBLE);
        }
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            std::process::exit(EXIT_CONFIG_REJECTED);
        }
    };

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let host = Host::new(orchestrator, cancel);
    tracing::info!("Mailwarden backend started");

    match host.run(tokio::io::stdin(), tokio::io::stdout()).await {
        Ok(()) => {
            tracing::info!("Mailwarden backend stopped");
        }
        Err(e) => {
            tracing::error!(error = %e, "Unrecoverable framing error");
            std::process::exit(EXIT_FRAMING_ERROR);
        }
    }
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            let _ = tokio::signal::ctrl_c().await;
        };

        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("Failed to install SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        ctrl_c.await;

        tracing::info!("Shutdown signal received");
        cancel.cancel();
    });
}
