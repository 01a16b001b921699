use futures::StreamExt;
use k8s_openapi::api::apps::v1::ReplicaSet;
use kube::runtime::{watcher, Controller};
use kube::{Api, Client};
use kulta_bluegreen::config::ControllerConfig;
use kulta_bluegreen::controller::{error_policy, reconcile, Context};
use kulta_bluegreen::crd::rollout::Rollout;
use kulta_bluegreen::server::{
    bind_health_listener, create_metrics, serve_health, shutdown_channel, wait_for_signal,
    ReadinessState,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ControllerConfig::from_env();
    info!(
        health_port = config.health_port,
        requeue_secs = config.requeue_interval.as_secs(),
        instance = ?config.instance_id,
        "Starting KULTA blue-green controller"
    );

    let (shutdown_controller, shutdown_signal) = shutdown_channel();
    let readiness = ReadinessState::new();
    let metrics = create_metrics()?;

    // Bind before spawning so a taken port fails startup instead of a background task
    let listener = bind_health_listener(config.health_port).await?;
    let health_handle = tokio::spawn(serve_health(
        listener,
        readiness.clone(),
        metrics.clone(),
        shutdown_signal,
    ));

    let client = match Client::try_default().await {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Failed to create Kubernetes client");
            return Err(e.into());
        }
    };
    info!("Connected to Kubernetes cluster");

    let rollouts = Api::<Rollout>::all(client.clone());
    let replica_sets = Api::<ReplicaSet>::all(client.clone());
    let ctx = Arc::new(Context::new(client, config, Some(metrics)));

    // Readiness means "initialized and watching", not "a rollout succeeded"
    readiness.set_ready();
    info!("Controller ready, starting reconciliation loop");

    // ReplicaSet availability changes trigger the owning Rollout
    let controller = Controller::new(rollouts, watcher::Config::default())
        .owns(replica_sets, watcher::Config::default())
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            if let Ok((obj, action)) = res {
                debug!(rollout = %obj.name, action = ?action, "Reconciled");
            }
            // Errors are logged in error_policy
        });

    tokio::select! {
        _ = controller => {
            info!("Controller stream ended");
        }
        signal = wait_for_signal() => {
            match signal {
                Ok(name) => info!(signal = name, "Initiating graceful shutdown"),
                Err(e) => warn!(error = %e, "Signal handling failed, shutting down"),
            }
            readiness.set_not_ready();
        }
    }

    shutdown_controller.shutdown();
    match health_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Health server exited with error"),
        Err(e) => warn!(error = %e, "Health server task failed"),
    }

    info!("KULTA blue-green controller shut down gracefully");
    Ok(())
}
