use thiserror::Error;

#[derive(Debug, Error)]
pub enum ThreadError {
    #[error("cannot replace the task of thread {name:?} while it is running")]
    Running { name: String },
    #[error("failed to spawn worker thread {name:?}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}
