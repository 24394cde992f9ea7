use anyhow::{bail, Context, Result};
use axum::serve;
use clap::Parser;
use seedwarden::api::client::QbClient;
use seedwarden::api::notifier::{AnyNotifier, LogNotifier, WebhookNotifier};
use seedwarden::core::config::Config;
use seedwarden::core::cycle::{login_with_retries, run_pass};
use seedwarden::core::routes::build_router;
use seedwarden::core::state::AppState;
use seedwarden::core::tracing_init::init_tracing;
use seedwarden::stores::sample_store::JsonSampleStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::time::MissedTickBehavior;
use tower::ServiceBuilder;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{error, info, warn, Level};

/// Admission and eviction policy for a qBittorrent download queue
#[derive(Debug, Parser)]
#[command(name = "seedwarden", version)]
struct Cli {
    /// Downloader name: the prefix of its environment variables
    #[arg(short = 'n', long = "qb-name", visible_alias = "qb_name")]
    qb_name: String,

    /// Read settings from a TOML file instead of the environment
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Evaluate and log decisions without touching the downloader
    #[arg(long)]
    dry_run: bool,

    /// Keep running, one pass every SECONDS
    #[arg(long, value_name = "SECONDS")]
    watch: Option<u64>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            return Err(e).context("Failed to load .env file");
        }
    }

    let config = load_config(&cli)?;

    init_tracing(&config.logging)?;

    // Passes never overlap: one thread is all the engine needs
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build Tokio runtime")?;

    runtime.block_on(async_main(config, cli))
}

fn load_config(cli: &Cli) -> Result<Config> {
    match &cli.config {
        Some(path) => {
            let config = Config::from_file(path).context(format!(
                "Failed to load configuration from '{}'",
                path.display()
            ))?;
            if !config.client.name.eq_ignore_ascii_case(&cli.qb_name) {
                bail!(
                    "Config file '{}' describes downloader '{}', not '{}'",
                    path.display(),
                    config.client.name,
                    cli.qb_name
                );
            }
            Ok(config)
        }
        None => Config::from_env(&cli.qb_name).context(format!(
            "Failed to load configuration for downloader '{}' from the environment",
            cli.qb_name
        )),
    }
}

async fn async_main(config: Config, cli: Cli) -> Result<()> {
    info!(
        downloader = %config.client.name,
        url = %config.client.url,
        categories = config.categories.len(),
        store_dir = %config.store.dir.display(),
        dry_run = cli.dry_run,
        watch = ?cli.watch,
        "seedwarden starting"
    );

    let state = Arc::new(AppState::new(config));
    let config = Arc::clone(&state.config);

    let notifier = match &config.notifier.webhook_url {
        Some(url) => AnyNotifier::Webhook(
            WebhookNotifier::new(url, config.client.timeout_secs)
                .context("Failed to create webhook notifier")?,
        ),
        None => AnyNotifier::Log(LogNotifier),
    };

    let mut client = QbClient::new(&config.client).context("Failed to create downloader client")?;
    let mut store = JsonSampleStore::open(&config.store.dir, config.store.max_samples)
        .context("Failed to open sample store")?;

    login_with_retries(&config, &mut client, &notifier).await?;

    let Some(every) = cli.watch else {
        run_pass(&config, &client, &mut store, &notifier, &state.metrics, cli.dry_run).await?;
        info!("Done");
        return Ok(());
    };

    if every == 0 {
        bail!("--watch interval must be greater than 0");
    }

    let server = match config.status.port {
        Some(port) => Some(spawn_status_server(Arc::clone(&state), port).await?),
        None => None,
    };

    let mut interval = tokio::time::interval(Duration::from_secs(every));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = interval.tick() => {
                if let Err(e) = run_pass(&config, &client, &mut store, &notifier, &state.metrics, cli.dry_run).await {
                    error!(error = %e, "Pass failed");
                    // The session may have expired; without a new one the run is over
                    login_with_retries(&config, &mut client, &notifier).await?;
                }
            }
        }
    }

    if let Some(server) = server {
        if let Err(e) = server.await {
            warn!(error = %e, "Status server task failed");
        }
    }

    info!("Shutting down gracefully");

    Ok(())
}

async fn spawn_status_server(
    state: Arc<AppState>,
    port: u16,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = build_router(state).layer(
        ServiceBuilder::new().layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        ),
    );

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .context(format!("Failed to bind status listener to {}", addr))?;

    info!(address = %addr, "Status server listening");

    Ok(tokio::spawn(async move {
        if let Err(e) = serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
        {
            error!(error = %e, "Status server error");
        }
    }))
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
