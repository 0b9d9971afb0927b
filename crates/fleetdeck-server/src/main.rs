use axum::http::HeaderValue;
use miette::{IntoDiagnostic, Result, WrapErr};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use fleetdeck_kube::{KubeCluster, ProcessTool};
use fleetdeck_repo::{GithubFeed, VersionCatalog};
use fleetdeck_server::{AppConfig, AppState, LogFormat, router};

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_panic_hook();

    let config = AppConfig::load().into_diagnostic().wrap_err("Failed to load configuration")?;
    init_tracing(&config);

    info!("Starting fleetdeck");
    info!("  Server: {}", config.bind_address());
    info!("  System namespace: {}", config.kubernetes.system_namespace);
    info!("  Deployment selector: {}", config.kubernetes.deployment_selector);
    info!("  Scripts: {}", config.tools.scripts_dir.display());

    let cluster = KubeCluster::try_default()
        .await
        .into_diagnostic()
        .wrap_err("Failed to initialize Kubernetes client")?;
    info!("Kubernetes client initialized");

    let feed = GithubFeed::new(
        &config.versions.feed_url,
        config.versions.per_page,
        Duration::from_secs(config.versions.request_timeout_secs),
    )
    .into_diagnostic()
    .wrap_err("Failed to create release feed client")?;
    let catalog = VersionCatalog::new(Arc::new(feed), config.versions.cache_file.clone(), config.version_ttl());

    let state = AppState::new(Arc::new(cluster), Arc::new(ProcessTool), Arc::new(catalog), &config);
    let app = router(state).layer(cors_layer(&config.server.cors_origins));

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .into_diagnostic()
        .wrap_err_with(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .into_diagnostic()?;

    info!("fleetdeck stopped");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.server.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.server.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
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
        () = ctrl_c => info!("Received Ctrl+C"),
        () = terminate => info!("Received SIGTERM"),
    }
}
