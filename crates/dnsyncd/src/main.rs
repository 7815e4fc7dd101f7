// # dnsyncd - DNS Reconciliation Daemon
//
// This is a THIN integration layer:
// - DO NOT add DNS logic, diffing or retry logic here
// - All reconciliation logic lives in dnsync-core
// - Configuration is via environment variables ONLY
//
// The daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Installing the tracing subscriber
// 3. Registering providers and building the discovery sources
// 4. Starting the configured operation mode and stopping it on a signal
//
// ## Configuration
//
// See `dnsync_core::config::Settings` for the full variable list. The most
// common ones:
//
// - `DNS_PROVIDER`: cloudflare | digitalocean
// - `CLOUDFLARE_TOKEN`, `CLOUDFLARE_ZONE`: Cloudflare credentials
// - `OPERATION_MODE`: proxy | direct
// - `DATA_DIR`: directory for persisted state
// - `DNSYNC_LOG_LEVEL`: log level when `RUST_LOG` is unset
//
// ## Example
//
// ```bash
// export DNS_PROVIDER=cloudflare
// export CLOUDFLARE_TOKEN=your_token
// export CLOUDFLARE_ZONE=example.com
// export OPERATION_MODE=proxy
// export TRAEFIK_API_URL=http://traefik:8080/api
//
// dnsyncd
// ```

use anyhow::{Context, Result};
use dnsync_core::store::migration::LegacySources;
use dnsync_core::{DomainEvent, ProviderRegistry, RouteSource, ServiceRegistry, Settings};
use dnsync_discovery_http::{DockerContainerSource, TraefikRouteSource};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{Receiver, error::RecvError};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Upper bound on waiting for the in-flight cycle at shutdown
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum DnsyncExitCode {
    CleanShutdown = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<DnsyncExitCode> for ExitCode {
    fn from(code: DnsyncExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Failure of `run_daemon`, split by the exit code it maps to
enum DaemonError {
    Startup(anyhow::Error),
    Runtime(anyhow::Error),
}

fn main() -> ExitCode {
    let settings = match Settings::from_env().and_then(|s| s.validate().map(|_| s)) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return DnsyncExitCode::ConfigError.into();
        }
    };

    if let Err(e) = init_tracing() {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return DnsyncExitCode::ConfigError.into();
    }

    info!(version = env!("CARGO_PKG_VERSION"), "Starting dnsyncd");

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return DnsyncExitCode::RuntimeError.into();
        }
    };

    let code = rt.block_on(async {
        match run_daemon(settings).await {
            Ok(()) => DnsyncExitCode::CleanShutdown,
            Err(DaemonError::Startup(e)) => {
                error!("Startup failed: {:#}", e);
                DnsyncExitCode::ConfigError
            }
            Err(DaemonError::Runtime(e)) => {
                error!("Daemon error: {:#}", e);
                DnsyncExitCode::RuntimeError
            }
        }
    });

    code.into()
}

/// `RUST_LOG` wins; otherwise `DNSYNC_LOG_LEVEL`, default `info`
fn init_tracing() -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let level = std::env::var("DNSYNC_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
            EnvFilter::try_new(level.to_lowercase())
                .with_context(|| format!("DNSYNC_LOG_LEVEL '{}' is not valid", level))?
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
}

fn provider_registry() -> ProviderRegistry {
    let registry = ProviderRegistry::new();

    #[cfg(feature = "cloudflare")]
    dnsync_provider_cloudflare::register(&registry);

    #[cfg(feature = "digitalocean")]
    dnsync_provider_digitalocean::register(&registry);

    debug!(providers = ?registry.list_providers(), "Registered DNS providers");
    registry
}

/// Wire everything, run until a signal arrives, then stop cleanly
async fn run_daemon(settings: Settings) -> std::result::Result<(), DaemonError> {
    let registry = provider_registry();
    let provider = registry
        .create_provider(&settings.provider)
        .context("Failed to create DNS provider")
        .map_err(DaemonError::Startup)?;

    let containers = Arc::new(
        DockerContainerSource::new(&settings.docker)
            .context("Invalid Docker API configuration")
            .map_err(DaemonError::Startup)?,
    );
    let routes: Arc<dyn RouteSource> = Arc::new(
        TraefikRouteSource::new(&settings.proxy)
            .context("Invalid Traefik API configuration")
            .map_err(DaemonError::Startup)?,
    );
    let legacy = LegacySources::from_lookup(&settings.data_dir, |key| std::env::var(key).ok());

    let services = ServiceRegistry::build(settings, provider, containers, Some(routes), legacy)
        .await
        .context("Failed to initialize services")
        .map_err(DaemonError::Startup)?;

    let event_log = tokio::spawn(log_events(services.events.subscribe()));

    services
        .start()
        .await
        .context("Failed to start discovery")
        .map_err(DaemonError::Runtime)?;
    info!(mode = %services.settings.operation_mode, "dnsyncd running");

    let signal = wait_for_shutdown().await.map_err(DaemonError::Runtime)?;
    info!("Received shutdown signal: {}", signal);

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, services.shutdown())
        .await
        .is_err()
    {
        warn!("Shutdown did not finish within {:?}", SHUTDOWN_TIMEOUT);
    }
    event_log.abort();

    info!("dnsyncd stopped");
    Ok(())
}

/// Log every domain event; the daemon's only event subscriber
async fn log_events(mut rx: Receiver<DomainEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => log_event(&event),
            Err(RecvError::Lagged(missed)) => warn!(missed, "Event log fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}

fn log_event(event: &DomainEvent) {
    match event {
        DomainEvent::RecordCreated { record } => {
            info!(hostname = %record.hostname, record_type = %record.record_type, content = %record.content, "Record created")
        }
        DomainEvent::RecordUpdated { record, previous } => {
            info!(hostname = %record.hostname, record_type = %record.record_type, from = %previous.content, to = %record.content, "Record updated")
        }
        DomainEvent::RecordDeleted { record } => {
            info!(hostname = %record.hostname, record_type = %record.record_type, "Record deleted")
        }
        DomainEvent::OperationModeChanged { previous, current } => {
            info!(previous = ?previous, current = %current, "Operation mode changed")
        }
        DomainEvent::OrphanedUpdated { orphans } if !orphans.is_empty() => {
            info!(count = orphans.len(), "Orphaned records pending cleanup")
        }
        other => debug!(event = other.name(), "Domain event"),
    }
}

/// Wait for SIGTERM or SIGINT
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Fallback for non-Unix platforms: SIGINT only
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for CTRL-C")?;
    Ok("SIGINT")
}
