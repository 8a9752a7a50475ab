use std::collections::BTreeMap;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::SupervisorError;
use crate::output::{self, OutputLine, OutputStream, Stream};
use crate::process::{WorkerProcess, WorkerSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Wait between an unplanned exit and the restart.
    pub restart_backoff: Duration,
    /// How long workers get to exit after SIGTERM before they are killed.
    pub shutdown_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            restart_backoff: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

type Registry = Arc<Mutex<BTreeMap<String, WorkerProcess>>>;

/// Runs worker processes and restarts them when they exit unexpectedly.
///
/// Must be used from inside a tokio runtime.
pub struct Supervisor {
    config: SupervisorConfig,
    workers: Registry,
    stop: watch::Sender<bool>,
    monitors: Mutex<Vec<JoinHandle<()>>>,
    output: mpsc::UnboundedSender<OutputLine>,
}

impl Supervisor {
    /// Create a supervisor and the stream that carries its workers' output.
    pub fn new(config: SupervisorConfig) -> (Self, OutputStream) {
        let (output, rx) = mpsc::unbounded_channel();
        let (stop, _) = watch::channel(false);
        let supervisor = Self {
            config,
            workers: Arc::default(),
            stop,
            monitors: Mutex::new(Vec::new()),
            output,
        };
        (supervisor, rx)
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.stop.borrow()
    }

    /// Launch a worker and keep it running until [`Supervisor::shutdown`].
    ///
    /// The first launch happens here so a bad command is reported to the
    /// caller; later launch failures are logged and retried after the backoff.
    pub fn start_worker(&self, spec: WorkerSpec) -> Result<(), SupervisorError> {
        if self.is_shutting_down() {
            return Err(SupervisorError::ShuttingDown);
        }

        {
            let mut workers = lock(&self.workers);
            if workers.contains_key(&spec.name) {
                return Err(SupervisorError::DuplicateWorker(spec.name));
            }
            workers.insert(spec.name.clone(), WorkerProcess::from_spec(&spec));
        }

        let child = match launch(&spec, &self.output) {
            Ok(child) => child,
            Err(source) => {
                lock(&self.workers).remove(&spec.name);
                return Err(SupervisorError::Spawn { name: spec.name, source });
            }
        };
        set_pid(&self.workers, &spec.name, child.id());
        info!(worker = %spec.name, pid = ?child.id(), command = %spec.command, "worker started");

        let monitor = Monitor {
            spec,
            config: self.config.clone(),
            workers: self.workers.clone(),
            stop: self.stop.subscribe(),
            output: self.output.clone(),
        };
        let handle = tokio::spawn(monitor.run(child));
        lock(&self.monitors).push(handle);
        Ok(())
    }

    /// Snapshot of every supervised worker, ordered by name.
    pub fn workers(&self) -> Vec<WorkerProcess> {
        lock(&self.workers).values().cloned().collect()
    }

    pub fn worker(&self, name: &str) -> Option<WorkerProcess> {
        lock(&self.workers).get(name).cloned()
    }

    /// Stop every worker and wait until all of them have exited.
    ///
    /// Workers get SIGTERM, then SIGKILL once the grace period runs out.
    /// Nothing is restarted after this has been called.
    pub async fn shutdown(&self) {
        if !self.stop.send_replace(true) {
            info!(workers = lock(&self.workers).len(), "shutting down workers");
        }

        let monitors = std::mem::take(&mut *lock(&self.monitors));
        for handle in monitors {
            if let Err(err) = handle.await {
                error!(error = %err, "worker monitor panicked");
            }
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn set_pid(workers: &Registry, name: &str, pid: Option<u32>) {
    if let Some(w) = lock(workers).get_mut(name) {
        w.pid = pid;
    }
}

fn launch(spec: &WorkerSpec, output: &mpsc::UnboundedSender<OutputLine>) -> std::io::Result<Child> {
    let mut cmd = Command::new(&spec.command);
    cmd.args(&spec.args)
        .envs(spec.env.iter().map(|(k, v)| (k, v)))
        .kill_on_drop(true)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn()?;
    if let Some(stdout) = child.stdout.take() {
        output::forward(spec.name.clone(), Stream::Stdout, stdout, output.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        output::forward(spec.name.clone(), Stream::Stderr, stderr, output.clone());
    }
    Ok(child)
}

/// Resolves once shutdown has been requested, or the supervisor is gone.
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    loop {
        let stopping = *stop.borrow_and_update();
        if stopping || stop.changed().await.is_err() {
            return;
        }
    }
}

/// Ask the child to exit, then kill it if it is still there after `grace`.
async fn terminate(name: &str, child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    if let Some(status) = child.try_wait()? {
        return Ok(status);
    }

    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: pid belongs to a child we have not reaped yet.
            let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            if rc != 0 {
                warn!(worker = name, pid, error = %std::io::Error::last_os_error(), "SIGTERM failed");
            }
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(status) => return status,
                Err(_) => warn!(worker = name, pid, ?grace, "worker ignored SIGTERM; killing"),
            }
        }
    }

    #[cfg(not(unix))]
    let _ = (name, grace);

    child.kill().await?;
    child.wait().await
}

fn describe(status: &ExitStatus) -> String {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("signal {signal}");
        }
    }
    match status.code() {
        Some(code) => format!("code {code}"),
        None => "unknown status".to_string(),
    }
}

struct Monitor {
    spec: WorkerSpec,
    config: SupervisorConfig,
    workers: Registry,
    stop: watch::Receiver<bool>,
    output: mpsc::UnboundedSender<OutputLine>,
}

impl Monitor {
    async fn run(mut self, first: Child) {
        let name = self.spec.name.clone();
        let mut current = Some(first);

        loop {
            if let Some(mut child) = current.take() {
                let (status, planned) = tokio::select! {
                    status = child.wait() => (status, false),
                    _ = stop_requested(&mut self.stop) => {
                        (terminate(&name, &mut child, self.config.shutdown_grace).await, true)
                    }
                };
                self.record_exit(&status);

                let stopping = planned || *self.stop.borrow();
                match &status {
                    Ok(s) if stopping => info!(worker = %name, status = %describe(s), "worker stopped"),
                    Ok(s) => warn!(worker = %name, status = %describe(s), "worker exited unexpectedly"),
                    Err(err) => error!(worker = %name, error = %err, "lost track of worker"),
                }
                if stopping {
                    return;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.restart_backoff) => {}
                _ = stop_requested(&mut self.stop) => return,
            }
            // Shutdown may have been requested just as the backoff ran out.
            if *self.stop.borrow() {
                return;
            }

            match launch(&self.spec, &self.output) {
                Ok(child) => {
                    let restarts = self.record_restart(child.id());
                    info!(worker = %name, pid = ?child.id(), restarts, "worker restarted");
                    current = Some(child);
                }
                Err(err) => {
                    error!(worker = %name, error = %err, "failed to restart worker");
                }
            }
        }
    }

    fn record_exit(&self, status: &std::io::Result<ExitStatus>) {
        if let Some(w) = lock(&self.workers).get_mut(&self.spec.name) {
            w.pid = None;
            w.last_exit_code = status.as_ref().ok().and_then(ExitStatus::code);
        }
    }

    fn record_restart(&self, pid: Option<u32>) -> u32 {
        let mut workers = lock(&self.workers);
        match workers.get_mut(&self.spec.name) {
            Some(w) => {
                w.pid = pid;
                w.restart_count += 1;
                w.restart_count
            }
            None => 0,
        }
    }
}
