use anyhow::Context;

use billnotify_app::config::log_format_from_env;
use billnotify_app::{AppConfig, Notifier, shutdown_signal};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    billnotify_observability::init_with(log_format_from_env());

    let config = AppConfig::from_env().context("invalid configuration")?;
    tracing::info!(
        mode = %config.notifier.delivery_mode,
        since = %config.notifier.since_date,
        interval = ?config.notifier.poll_interval,
        "starting billnotify worker"
    );

    let notifier = Notifier::start(config).await.context("startup failed")?;
    notifier
        .run_until(shutdown_signal())
        .await
        .context("worker stopped on a fatal error")?;

    tracing::info!("billnotify worker stopped");
    Ok(())
}
