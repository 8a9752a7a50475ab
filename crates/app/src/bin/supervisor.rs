use anyhow::Context;

use billnotify_app::config::log_format_from_env;
use billnotify_app::{SupervisorSettings, shutdown_signal};
use billnotify_supervisor::{Supervisor, passthrough};

/// `billnotify-worker` next to this executable.
fn sibling_worker() -> anyhow::Result<String> {
    let exe = std::env::current_exe().context("cannot locate own executable")?;
    let worker = exe.with_file_name(format!("billnotify-worker{}", std::env::consts::EXE_SUFFIX));
    Ok(worker.to_string_lossy().into_owned())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    billnotify_observability::init_with(log_format_from_env());

    let settings = SupervisorSettings::from_args(
        |key| std::env::var(key).ok(),
        std::env::args().skip(1),
        &sibling_worker()?,
    )
    .context("invalid supervisor configuration")?;

    let (supervisor, output) = Supervisor::new(settings.supervisor);
    let printer = tokio::spawn(passthrough(output));

    for spec in settings.workers {
        if let Err(err) = supervisor.start_worker(spec) {
            supervisor.shutdown().await;
            return Err(err).context("cannot start workers");
        }
    }

    shutdown_signal().await;
    supervisor.shutdown().await;

    for w in supervisor.workers() {
        tracing::info!(
            worker = %w.name,
            restarts = w.restart_count,
            last_exit_code = ?w.last_exit_code,
            "worker stopped"
        );
    }
    printer.abort();
    Ok(())
}
