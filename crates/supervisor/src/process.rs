use serde::Serialize;

/// How to launch one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl WorkerSpec {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Snapshot of a supervised worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerProcess {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    /// Set while a child process is running.
    pub pid: Option<u32>,
    pub restart_count: u32,
    /// `None` until the first exit, and for exits caused by a signal.
    pub last_exit_code: Option<i32>,
}

impl WorkerProcess {
    pub(crate) fn from_spec(spec: &WorkerSpec) -> Self {
        Self {
            name: spec.name.clone(),
            command: spec.command.clone(),
            args: spec.args.clone(),
            pid: None,
            restart_count: 0,
            last_exit_code: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.pid.is_some()
    }
}
