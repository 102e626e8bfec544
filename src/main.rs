//! Azure File Share Provisioner
//!
//! Watches PersistentVolumeClaims whose StorageClass names this provisioner,
//! creates an Azure File share per claim, and binds it with a pre-bound
//! PersistentVolume. Serves health endpoints and Prometheus metrics alongside.

use clap::Parser;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use azurefile_share_provisioner::config::default_file_server;
use azurefile_share_provisioner::controller::runner;
use azurefile_share_provisioner::domain::literals::DEFAULT_PROVISIONER;
use azurefile_share_provisioner::leader::{LeaderConfig, LeaderElector, DEFAULT_LEASE_NAME};
use azurefile_share_provisioner::share::credential::DEFAULT_AUTHORITY_HOST;
use azurefile_share_provisioner::share::{build_credential, AuthMode, CredentialConfig};
use azurefile_share_provisioner::{
    AzureFileShareClient, Context, Error, KubeEventPublisher, KubeStore, OutcomeRecorder,
    ProvisionerConfig, Reconciler, Result,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Azure File Share Provisioner - one Azure File share per PersistentVolumeClaim
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// StorageClass provisioner value served by this controller
    #[arg(long, env = "PROVISIONER_NAME", default_value = DEFAULT_PROVISIONER)]
    provisioner: String,

    /// Resource group of the storage account
    #[arg(long, env = "AZURE_RESOURCE_GROUP")]
    resource_group: String,

    /// Storage account holding the shares
    #[arg(long, env = "AZURE_STORAGE_ACCOUNT")]
    storage_account: String,

    /// File endpoint host (defaults to {account}.file.core.windows.net)
    #[arg(long, env = "AZURE_FILE_SERVER")]
    file_server: Option<String>,

    /// How to authenticate to Azure Storage
    #[arg(long, env = "AZURE_AUTH_MODE", value_enum, default_value_t = AuthMode::Workload)]
    auth_mode: AuthMode,

    #[arg(long, env = "AZURE_TENANT_ID")]
    tenant_id: Option<String>,

    #[arg(long, env = "AZURE_CLIENT_ID")]
    client_id: Option<String>,

    #[arg(long, env = "AZURE_CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,

    /// Projected service account token for workload identity
    #[arg(long, env = "AZURE_FEDERATED_TOKEN_FILE")]
    federated_token_file: Option<PathBuf>,

    #[arg(long, env = "AZURE_AUTHORITY_HOST", default_value = DEFAULT_AUTHORITY_HOST)]
    authority_host: String,

    /// Upper bound for a single reconcile in seconds
    #[arg(long, env = "RECONCILE_TIMEOUT_SECS", default_value = "60")]
    reconcile_timeout_secs: u64,

    /// Run the controller only while holding the leader Lease
    #[arg(
        long,
        env = "LEADER_ELECTION_ENABLED",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    leader_election: bool,

    /// Name of the leader Lease
    #[arg(long, env = "LEADER_ELECTION_ID", default_value = DEFAULT_LEASE_NAME)]
    leader_election_id: String,

    /// Namespace of the leader Lease (defaults to the client's namespace)
    #[arg(long, env = "LEADER_ELECTION_NAMESPACE")]
    leader_election_namespace: Option<String>,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Do not record or serve reconcile metrics
    #[arg(long, env = "DISABLE_METRICS")]
    disable_metrics: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn provisioner_config(&self) -> ProvisionerConfig {
        ProvisionerConfig {
            provisioner: self.provisioner.clone(),
            resource_group: self.resource_group.clone(),
            storage_account: self.storage_account.clone(),
            file_server: self
                .file_server
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| default_file_server(&self.storage_account)),
            reconcile_timeout: Duration::from_secs(self.reconcile_timeout_secs),
        }
    }

    fn leader_config(&self, client: &kube::Client) -> Option<LeaderConfig> {
        if !self.leader_election {
            return None;
        }
        let identity = ["POD_NAME", "HOSTNAME"]
            .into_iter()
            .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
            .unwrap_or_else(|| {
                format!("{}-{}", azurefile_share_provisioner::NAME, std::process::id())
            });
        Some(LeaderConfig {
            lease_name: self.leader_election_id.clone(),
            namespace: self
                .leader_election_namespace
                .clone()
                .filter(|ns| !ns.is_empty())
                .unwrap_or_else(|| client.default_namespace().to_string()),
            identity,
        })
    }

    fn credential_config(&self) -> CredentialConfig {
        CredentialConfig {
            mode: self.auth_mode,
            tenant_id: self.tenant_id.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            federated_token_file: self.federated_token_file.clone(),
            authority_host: self.authority_host.clone(),
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    let config = args.provisioner_config();
    config.validate()?;

    info!("Starting Azure File Share Provisioner");
    info!("  Version: {}", azurefile_share_provisioner::VERSION);
    info!("  Provisioner: {}", config.provisioner);
    info!("  Storage account: {}/{}", config.resource_group, config.storage_account);
    info!("  File server: {}", config.file_server);
    info!("  Auth mode: {:?}", args.auth_mode);

    let ready = Arc::new(AtomicBool::new(false));

    // Start health server
    let health_addr = args.health_addr.clone();
    let health_ready = ready.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr, health_ready).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let recorder = if args.disable_metrics {
        info!("Reconcile metrics disabled");
        OutcomeRecorder::disabled()
    } else {
        let metrics_addr = args.metrics_addr.clone();
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(&metrics_addr).await {
                error!("Metrics server error: {}", e);
            }
        });
        OutcomeRecorder::with_default_registry()
    };

    let client = kube::Client::try_default().await?;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;
    let credential = build_credential(http.clone(), &args.credential_config())?;
    let shares = AzureFileShareClient::new(http, &config.storage_account, credential)?
        .with_endpoint(format!("https://{}", config.file_server));

    let ctx = Context {
        store: Arc::new(KubeStore::new(client.clone())),
        shares: Arc::new(shares),
        events: Arc::new(KubeEventPublisher::new(
            client.clone(),
            azurefile_share_provisioner::NAME,
        )),
        config,
    };

    let shutdown = CancellationToken::new();
    let reconciler = Arc::new(Reconciler::new(ctx, recorder, shutdown.clone()));

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    // Standby replicas report ready too; only the leader reconciles
    ready.store(true, Ordering::Relaxed);
    let result = match args.leader_config(&client) {
        Some(leader) => {
            let elector = Arc::new(LeaderElector::new(client.clone(), leader));
            run_as_leader(elector, client, reconciler, &shutdown).await
        }
        None => {
            info!("Leader election disabled");
            runner::run(client, reconciler).await;
            Ok(())
        }
    };

    shutdown.cancel();
    info!("Provisioner shutdown complete");
    result
}

/// Run the controller for as long as this replica holds the Lease
async fn run_as_leader(
    elector: Arc<LeaderElector>,
    client: kube::Client,
    reconciler: Arc<Reconciler>,
    shutdown: &CancellationToken,
) -> Result<()> {
    let mut guard = match elector.clone().acquire(shutdown).await {
        Ok(guard) => guard,
        Err(Error::Cancelled) => {
            info!("Shutdown before leadership was acquired");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let result = tokio::select! {
        _ = runner::run(client, reconciler) => Ok(()),
        _ = guard.lost() => {
            error!(identity = %elector.identity(), "Leadership lost, stopping controller");
            Err(Error::LeadershipLost(elector.identity().to_string()))
        }
    };

    if let Err(e) = guard.release().await {
        warn!(error = %e, "Failed to release leader lease");
    }
    result
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "kube=info", "reqwest=warn"] {
        if let Ok(d) = directive.parse() {
            filter = filter.add_directive(d);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, cancelling in-flight reconciles"),
        _ = terminate => info!("Received SIGTERM, cancelling in-flight reconciles"),
    }
}

// =============================================================================
// HTTP Servers
// =============================================================================

fn respond(status: hyper::StatusCode, body: impl Into<hyper::Body>) -> hyper::Response<hyper::Body> {
    let mut response = hyper::Response::new(body.into());
    *response.status_mut() = status;
    response
}

async fn run_health_server(addr: &str, ready: Arc<AtomicBool>) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let ready = ready.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let ready = ready.load(Ordering::Relaxed);
                async move {
                    let response = match req.uri().path() {
                        "/healthz" | "/livez" => respond(StatusCode::OK, "ok"),
                        "/readyz" if ready => respond(StatusCode::OK, "ok"),
                        "/readyz" => respond(StatusCode::SERVICE_UNAVAILABLE, "not ready"),
                        _ => respond(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid health server address: {}", e))
    })?;

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

async fn run_metrics_server(addr: &str) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{header, Body, Request, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/metrics" => {
                    let encoder = TextEncoder::new();
                    let mut buffer = Vec::new();
                    match encoder.encode(&prometheus::gather(), &mut buffer) {
                        Ok(()) => {
                            let mut response = respond(StatusCode::OK, buffer);
                            if let Ok(content_type) = encoder.format_type().parse() {
                                response.headers_mut().insert(header::CONTENT_TYPE, content_type);
                            }
                            response
                        }
                        Err(e) => respond(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
                    }
                }
                _ => respond(StatusCode::NOT_FOUND, "not found"),
            };
            Ok::<_, Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid metrics server address: {}", e))
    })?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
