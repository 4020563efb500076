use quasar_core::config::{Config, DEFAULT_CONFIG_FILE, Mode, RoleStoreConfig};
use quasar_core::metrics::Metrics;
use quasar_core::resource::ResourceRegistry;
use quasar_core::{shutdown, telemetry};
use quasar_store::{DualStore, build_store};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{Router, get};
use clap::{Parser, Subcommand, crate_authors, crate_description, crate_version};
use kube::Client;
use kube::config::{KubeConfigOptions, Kubeconfig};
use tokio::net::TcpListener;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "quasar",
    about = crate_description!(),
    version = crate_version!(),
    author = crate_authors!("\n"),
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a default configuration file to the working directory
    Init,

    /// Start the service in the role selected by the configuration
    Run {
        /// Path to a kubeconfig file; the in-cluster or default context is
        /// used otherwise
        #[arg(short, long, env = "KUBECONFIG")]
        kubeconfig: Option<PathBuf>,

        /// Path to the configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init => init(),
        Command::Run { kubeconfig, config } => run(kubeconfig, config).await,
    }
}

fn init() -> anyhow::Result<()> {
    telemetry::init("info", telemetry::LogFormat::Text)?;
    let path = PathBuf::from(DEFAULT_CONFIG_FILE);
    if path.exists() {
        error!(msg = "configuration file already exists", path = %path.display());
        return Ok(());
    }
    Config::write_default(&path)?;
    info!(msg = "wrote default configuration", path = %path.display());
    Ok(())
}

async fn run(kubeconfig: Option<PathBuf>, config_path: PathBuf) -> anyhow::Result<()> {
    let config = Config::load(&config_path)?;
    telemetry::init(&config.log_level, config.log_format)?;
    info!(msg = "configuration loaded", path = %config_path.display(), mode = ?config.mode);

    let metrics = Metrics::new();
    let registry = Arc::new(ResourceRegistry::new(config.resources.clone()));
    let shutdown_token = CancellationToken::new();

    {
        let shutdown_token = shutdown_token.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!(msg = "received shutdown signal, starting graceful shutdown");
            shutdown_token.cancel();
        });
    }

    if config.metrics.enabled {
        tokio::spawn(serve_metrics(
            config.metrics.port,
            metrics.clone(),
            shutdown_token.child_token(),
        ));
    }

    let result = match config.mode {
        Mode::Watcher => {
            let client = kube_client(kubeconfig.as_deref()).await?;
            let dual = build_dual_store(&config, &config.watcher.store, registry.clone()).await?;
            quasar_watcher::run(&config, client, dual, registry, metrics, shutdown_token)
                .await
                .map_err(anyhow::Error::from)
        }
        Mode::Provisioning => {
            let dual =
                build_dual_store(&config, &config.provisioning.store, registry.clone()).await?;
            quasar_provisioning::run(&config, dual, registry, metrics, shutdown_token)
                .await
                .map_err(anyhow::Error::from)
        }
    };

    shutdown::global().run().await;
    result
}

/// Build and initialize the primary and optional secondary store of a role,
/// registering their teardown. Store initialization failure is fatal.
async fn build_dual_store(
    config: &Config,
    role: &RoleStoreConfig,
    registry: Arc<ResourceRegistry>,
) -> anyhow::Result<Arc<DualStore>> {
    let primary = build_store(role.primary.store_type, config, registry.clone());
    primary.initialize().await?;
    let secondary = match &role.secondary {
        Some(reference) => {
            let store = build_store(reference.store_type, config, registry.clone());
            store.initialize().await?;
            Some(store)
        }
        None => None,
    };
    let dual = DualStore::new(primary, secondary);
    {
        let dual = dual.clone();
        shutdown::global().register(20, "stores", move || async move {
            dual.shutdown().await;
        });
    }
    Ok(dual)
}

async fn kube_client(kubeconfig: Option<&Path>) -> anyhow::Result<Client> {
    let config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?
        }
        None => kube::Config::infer().await?,
    };
    Ok(Client::try_from(config)?)
}

async fn metrics_handler(State(metrics): State<Metrics>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(
                "content-type",
                "application/openmetrics-text; version=1.0.0; charset=utf-8",
            )],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(msg = "failed to encode metrics", %e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn health() -> impl IntoResponse {
    Json("healthy")
}

async fn serve_metrics(port: u16, metrics: Metrics, shutdown: CancellationToken) {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health))
        .with_state(metrics);
    let listener = match TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(msg = "cannot bind metrics endpoint", port, %e);
            return;
        }
    };
    info!(msg = "metrics endpoint listening", port);
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await });
    if let Err(e) = server.await {
        error!(msg = "metrics endpoint failed", %e);
    }
}

async fn shutdown_signal() {
    let mut sigterm =
        signal(SignalKind::terminate()).expect("failed to install SIGTERM signal handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigterm.recv() => {},
    }
}
