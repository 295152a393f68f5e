//! Vertica autoscaler operator entry point

use anyhow::Result;
use clap::Parser;
use kube::Client;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vas_operator::leader_election::{self, LeaderElector, DEFAULT_LEASE_NAME};
use vas_operator::retry::RetryConfig;
use vas_operator::{AutoscalerController, OperatorConfig};

#[derive(Parser, Debug)]
#[command(name = "vertica-autoscaler-operator")]
#[command(about = "Kubernetes operator that scales VerticaDB subclusters")]
struct Args {
    /// Namespace to watch (empty for all namespaces)
    #[arg(long, env = "WATCH_NAMESPACE", default_value = "")]
    namespace: String,

    /// Seconds before re-running a pass that asked for a requeue
    #[arg(long, env = "REQUEUE_DELAY_SECS", default_value_t = 10)]
    requeue_delay_secs: u64,

    /// Seconds before retrying a failed pass
    #[arg(long, env = "ERROR_REQUEUE_SECS", default_value_t = 30)]
    error_requeue_secs: u64,

    /// Seconds between passes while an HPA or ScaledObject drives the size
    #[arg(long, env = "RESYNC_INTERVAL_SECS", default_value_t = 60)]
    resync_interval_secs: u64,

    /// Attempts for a write that keeps hitting resource-version conflicts
    #[arg(long, env = "CONFLICT_RETRY_STEPS", default_value_t = 5)]
    conflict_retry_steps: u32,

    /// Enable leader election for HA deployments
    #[arg(long, env = "LEADER_ELECTION", default_value_t = false)]
    leader_election: bool,

    /// Namespace for the leader election Lease (defaults to the pod namespace)
    #[arg(long, env = "LEADER_ELECTION_NAMESPACE", default_value = "")]
    leader_election_namespace: String,

    /// Name of the leader election Lease
    #[arg(long, env = "LEADER_ELECTION_LEASE", default_value = DEFAULT_LEASE_NAME)]
    lease_name: String,
}

impl Args {
    fn operator_config(&self) -> OperatorConfig {
        OperatorConfig {
            namespace: (!self.namespace.is_empty()).then(|| self.namespace.clone()),
            requeue_delay: Duration::from_secs(self.requeue_delay_secs),
            error_requeue: Duration::from_secs(self.error_requeue_secs),
            resync_interval: Duration::from_secs(self.resync_interval_secs),
            retry: RetryConfig::with_steps(self.conflict_retry_steps),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let args = Args::parse();
    let config = args.operator_config();
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        namespace = ?config.namespace,
        leader_election = args.leader_election,
        "Starting Vertica autoscaler operator"
    );

    let client = Client::try_default().await?;

    let elector = if args.leader_election {
        let lease_ns = leader_election::detect_namespace(&args.leader_election_namespace);
        let elector = LeaderElector::new(client.clone(), &lease_ns, &args.lease_name);
        elector.acquire().await?;
        Some(elector)
    } else {
        None
    };

    let controller = AutoscalerController::new(client, config);
    let mut controller_handle = tokio::spawn(async move {
        if let Err(e) = controller.run().await {
            error!(error = %e, "Autoscaler controller exited with error");
        }
    });

    let renew = async {
        match &elector {
            Some(elector) => loop {
                tokio::time::sleep(elector.renew_interval()).await;
                match elector.renew().await {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!("Lost leader lease");
                        return;
                    }
                    Err(e) => warn!(error = %e, "Failed to renew leader lease"),
                }
            },
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        _ = &mut controller_handle => {
            warn!("Autoscaler controller stopped");
        }
        _ = renew => {
            error!("Leadership lost, shutting down");
        }
    }

    controller_handle.abort();
    if let Some(elector) = &elector {
        elector.release().await;
    }

    info!("Vertica autoscaler operator stopped");
    Ok(())
}
