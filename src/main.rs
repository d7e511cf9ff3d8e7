// A7: process wiring. Builds the span channel, the queueing network, the
// chosen controller, the OTLP ingestion server and the status server, and
// drives all of it from one shared cancellation token.

use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use queue_scaler::assembler::TraceAssembler;
use queue_scaler::config::{AppConfig, ControllerMode};
use queue_scaler::controller::{Controller, KubeController, KubeReplicaSink, NullController};
use queue_scaler::{logging, otlp, status};

const SPAN_CHANNEL_CAPACITY: usize = 1;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::parse();
    logging::init(config.log_format);

    let cancel = CancellationToken::new();
    install_shutdown_handler(cancel.clone());

    let publisher = status::new_publisher();
    let controller: Arc<dyn Controller> = match config.controller_mode {
        ControllerMode::StatusOnly => Arc::new(NullController::with_publisher(publisher.clone())),
        ControllerMode::Kubernetes => {
            let client = kube::Client::try_default().await?;
            let sink = Arc::new(KubeReplicaSink::new(
                client,
                &config.kube_namespace,
                &config.annotation_key,
                &config.annotation_value,
            ));
            Arc::new(KubeController::new(sink, publisher.clone()).await?)
        }
    };

    let (span_tx, span_rx) = mpsc::channel(SPAN_CHANNEL_CAPACITY);
    let assembler = TraceAssembler::new(controller, config.tick_interval());

    let grpc_addr = config.grpc_addr.parse()?;
    let http_addr = config.http_addr.parse()?;

    let mut tasks: JoinSet<(&'static str, anyhow::Result<()>)> = JoinSet::new();
    {
        let cancel = cancel.clone();
        tasks.spawn(async move {
            assembler.run(span_rx, cancel).await;
            ("assembler", Ok(()))
        });
    }
    {
        let cancel = cancel.clone();
        tasks.spawn(async move { ("OTLP ingestion", otlp::serve(grpc_addr, span_tx, cancel).await.map_err(Into::into)) });
    }
    {
        let cancel = cancel.clone();
        tasks.spawn(async move { ("status", status::serve(http_addr, publisher, cancel).await.map_err(Into::into)) });
    }

    // Whichever task finishes first drives the rest: a failed bind must
    // cancel its siblings immediately rather than waiting for them to also
    // finish, or a single dead server would hang the whole process.
    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        let (name, result) = joined?;
        match result {
            Ok(()) => info!("{name} task exited"),
            Err(err) => {
                error!("{name} task failed: {err}");
                cancel.cancel();
                first_error.get_or_insert(err);
            }
        }
    }

    if let Some(err) = first_error {
        return Err(err);
    }
    info!("shutdown complete");
    Ok(())
}

fn install_shutdown_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        info!("received shutdown signal");
        cancel.cancel();
    });
}
