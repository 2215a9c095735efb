//! odh-fixtures-sweep - removes resources left behind by test runs.
//!
//! Usage: `odh-fixtures-sweep [--all-namespaces] [run-id]`
//!
//! Without a run id every object labelled as managed by the fixtures is
//! removed. By default only the configured model registry namespace is
//! swept; `--all-namespaces` widens that to the whole cluster, including
//! labelled test namespaces.

use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};

use odh_test_fixtures::platform::KubePlatform;
use odh_test_fixtures::settings::Settings;
use odh_test_fixtures::sweep::sweep;
use odh_test_fixtures::telemetry::init_tracing;

/// Remove Kubernetes objects left behind by odh-test-fixtures runs.
#[derive(Parser, Debug)]
#[command(name = "odh-fixtures-sweep")]
#[command(version)]
#[command(about = "Remove resources left behind by test runs", long_about = None)]
struct Args {
    /// Sweep every namespace, including labelled test namespaces
    #[arg(short = 'A', long)]
    all_namespaces: bool,

    /// Only remove objects created by this run; defaults to the configured run id
    run_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let settings = Settings::load()?;
    init_tracing(&settings.log)?;
    let run_id = args.run_id.or_else(|| settings.run_id.clone());

    let platform = Arc::new(KubePlatform::try_default().await?);
    info!("Connected to Kubernetes cluster");

    let namespace = (!args.all_namespaces).then_some(settings.model_registry_namespace.as_str());
    info!(
        namespace = namespace.unwrap_or("*"),
        run_id = run_id.as_deref().unwrap_or("*"),
        "Sweeping managed resources"
    );

    tokio::select! {
        outcome = sweep(platform, namespace, run_id.as_deref(), settings.timeouts.to_timeouts()) => {
            match outcome {
                Ok(report) => info!(removed = report.removed.len(), "Sweep complete"),
                Err(e) => {
                    error!(error = %e, "Sweep incomplete");
                    return Err(e.into());
                }
            }
        }
        _ = shutdown_signal() => {
            warn!("Interrupted, some resources may remain");
        }
    }
    Ok(())
}

/// Wait for SIGTERM or SIGINT.
///
/// Failing to install a handler just means the signal is never observed.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
