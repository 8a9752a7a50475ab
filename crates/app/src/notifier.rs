//! One delivery worker: backend session, channel session and tick loop.

use std::future::Future;
use std::sync::Arc;

use tracing::info;

use billnotify_backend::BackendClient;
use billnotify_channel::{ChannelAdapter, ChannelConfig, ChannelState, CredentialStore, HttpBridgeSession};
use billnotify_pipeline::{
    AttachmentSource, DeliveryPipeline, DirectoryAttachments, NoAttachments, PipelineWorker,
    TickError, WorkerHandle,
};

use crate::config::AppConfig;

const WORKER_NAME: &str = "notifier";

/// A running delivery worker.
pub struct Notifier {
    worker: WorkerHandle,
    channel: Arc<ChannelAdapter<HttpBridgeSession>>,
}

impl Notifier {
    /// Log in to the backend, open the channel session and start ticking.
    ///
    /// Bad backend credentials, an unreachable backend, and a credential
    /// store already owned by another process all fail here.
    pub async fn start(config: AppConfig) -> Result<Self, TickError> {
        let client = Arc::new(BackendClient::connect(config.backend.clone()).await?);
        info!(backend = client.base_url(), "backend session established");

        let store = CredentialStore::open(config.credential_dir.clone())?;
        let session = HttpBridgeSession::new(config.gateway_url.clone())?
            .with_poll_interval(config.gateway_poll_interval);
        let channel = Arc::new(ChannelAdapter::new(
            Arc::new(session),
            store,
            ChannelConfig::from(&config.notifier),
        ));
        channel.start().await?;
        info!(gateway = %config.gateway_url, state = channel.state().name(), "channel session started");

        let attachments: Arc<dyn AttachmentSource> = match &config.attachment_dir {
            Some(dir) => Arc::new(DirectoryAttachments::new(dir.clone())),
            None => Arc::new(NoAttachments),
        };
        let interval = config.notifier.poll_interval;
        let pipeline =
            DeliveryPipeline::new(config.notifier, client, channel.clone())?.with_attachments(attachments);

        Ok(Self {
            worker: PipelineWorker::spawn(WORKER_NAME, pipeline, interval),
            channel,
        })
    }

    pub fn channel_state(&self) -> ChannelState {
        self.channel.state()
    }

    /// Tick until `signal` resolves or a fatal error stops the loop, then
    /// close the channel session.
    pub async fn run_until<F>(self, signal: F) -> Result<(), TickError>
    where
        F: Future<Output = ()>,
    {
        let result = self.worker.run_until(signal).await;
        self.channel.shutdown().await;
        result
    }
}
