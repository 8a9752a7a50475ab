use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use billnotify_channel::ChannelSession;

use crate::error::TickError;
use crate::pipeline::DeliveryPipeline;

/// Handle to control and join a running worker loop.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: Arc<Notify>,
    join: JoinHandle<Result<(), TickError>>,
}

impl WorkerHandle {
    /// Request shutdown and wait for the loop to stop. A tick in progress
    /// completes first.
    pub async fn shutdown(self) -> Result<(), TickError> {
        self.shutdown.notify_one();
        self.join().await
    }

    /// Wait for the loop to stop on its own (fatal error).
    pub async fn join(self) -> Result<(), TickError> {
        joined(self.join.await)
    }

    /// Run until `signal` resolves, then shut down. Returns early if the loop
    /// stops on its own first.
    pub async fn run_until<F>(mut self, signal: F) -> Result<(), TickError>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            result = &mut self.join => joined(result),
            _ = signal => {
                info!("shutdown requested; finishing current tick");
                self.shutdown().await
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

fn joined(result: Result<Result<(), TickError>, JoinError>) -> Result<(), TickError> {
    match result {
        Ok(result) => result,
        Err(err) => {
            error!(error = %err, "worker task panicked or was cancelled");
            Ok(())
        }
    }
}

/// Runs a [`DeliveryPipeline`] on a fixed interval.
#[derive(Debug)]
pub struct PipelineWorker;

impl PipelineWorker {
    /// Spawn the tick loop. The first tick runs immediately.
    ///
    /// The loop ends on shutdown or on the first fatal tick error, which is
    /// returned from [`WorkerHandle::join`].
    pub fn spawn<S: ChannelSession>(
        name: &'static str,
        pipeline: DeliveryPipeline<S>,
        interval: Duration,
    ) -> WorkerHandle {
        let shutdown = Arc::new(Notify::new());
        let join = tokio::spawn(worker_loop(name, pipeline, interval, shutdown.clone()));
        WorkerHandle { shutdown, join }
    }
}

async fn worker_loop<S: ChannelSession>(
    name: &'static str,
    mut pipeline: DeliveryPipeline<S>,
    interval: Duration,
    shutdown: Arc<Notify>,
) -> Result<(), TickError> {
    info!(worker = name, ?interval, "delivery worker started");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.notified() => break,
            _ = ticker.tick() => {
                // Not raced against shutdown: a started tick always completes.
                match pipeline.run_tick().await {
                    Ok(report) => report.log(),
                    Err(err) if err.is_fatal() => {
                        error!(worker = name, error = %err, "fatal tick error; stopping worker");
                        return Err(err);
                    }
                    Err(err) => warn!(worker = name, error = %err, "tick aborted; retrying next tick"),
                }
            }
        }
    }

    info!(worker = name, "delivery worker stopped");
    Ok(())
}
