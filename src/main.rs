mod api;
mod config;
mod coordinator;
mod differ;
mod error;
mod extractor;
mod fetch;
mod models;
mod notify;
mod schedule;
mod store;
mod view;
#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::{AppConfig, FetchMode};
use crate::coordinator::RunCoordinator;
use crate::fetch::{BrowserFetcher, HttpFetcher, PageFetcher};
use crate::notify::{Notifier, SmtpMailer};
use crate::store::{JsonFileStore, SnapshotStore};

#[derive(Debug, Parser)]
#[command(name = "spoteye")]
#[command(about = "Watches an apartment listing page and emails changes")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve the HTTP trigger (default)
    Serve,
    /// Run a single check and exit
    Check,
    /// Send a test email and exit
    TestEmail,
    /// Print the stored snapshot grouped by status
    View,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let (config, coordinator) = bootstrap()?;
            serve(config, coordinator).await
        }
        Commands::Check => {
            let (_, coordinator) = bootstrap()?;
            match coordinator.trigger().await {
                Ok(report) => {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                    Ok(())
                }
                Err(e) => {
                    error!(stage = %e.stage, error = %e.source, "check failed");
                    std::process::exit(1);
                }
            }
        }
        Commands::TestEmail => {
            let (config, coordinator) = bootstrap()?;
            coordinator
                .send_test_email()
                .await
                .context("failed to send test email")?;
            info!("📧 test email sent to {}", config.recipient);
            Ok(())
        }
        Commands::View => view_snapshot().await,
    }
}

/// Load configuration, start logging and wire up the run coordinator.
fn bootstrap() -> anyhow::Result<(AppConfig, Arc<RunCoordinator>)> {
    let config = config::load_app_config()?;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    info!("🏠 SpotEye Apartment Monitor v{}", env!("CARGO_PKG_VERSION"));
    info!(?config, "loaded configuration");

    let coordinator = Arc::new(build_coordinator(&config)?);
    Ok((config, coordinator))
}

async fn view_snapshot() -> anyhow::Result<()> {
    let path = config::load_snapshot_path();
    let snapshot = JsonFileStore::new(&path)
        .load()
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    print!("{}", view::render(snapshot.as_ref()));
    Ok(())
}

fn build_coordinator(config: &AppConfig) -> anyhow::Result<RunCoordinator> {
    let fetcher: Arc<dyn PageFetcher> = match config.fetch_mode {
        FetchMode::Browser => Arc::new(BrowserFetcher::new(config.browser_options())),
        FetchMode::Http => Arc::new(
            HttpFetcher::new(&config.user_agent).context("failed to create HTTP client")?,
        ),
    };
    let store = Arc::new(JsonFileStore::new(&config.snapshot_path));
    let mailer = SmtpMailer::new(&config.smtp).context("invalid SMTP settings")?;
    let notifier = Notifier::new(Arc::new(mailer), &config.target_url);

    Ok(RunCoordinator::new(
        fetcher,
        store,
        notifier,
        config.run_settings(),
    ))
}

async fn serve(config: AppConfig, coordinator: Arc<RunCoordinator>) -> anyhow::Result<()> {
    let interval = config
        .check_interval
        .map(|every| schedule::spawn_interval(Arc::clone(&coordinator), every));

    let app = api::build_app(api::AppState {
        coordinator,
        interval_enabled: interval.is_some(),
    });

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "🚀 listening for triggers");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = interval {
        handle.abort();
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("received shutdown signal, starting graceful shutdown");
}
