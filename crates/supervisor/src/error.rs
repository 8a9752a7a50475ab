use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to spawn worker {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("a worker named {0} is already supervised")]
    DuplicateWorker(String),

    #[error("supervisor is shutting down")]
    ShuttingDown,
}
