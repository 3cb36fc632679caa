use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to create output pipe: {0}")]
    Pipe(#[source] std::io::Error),
    #[error("failed to launch {program:?}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to start output reader: {0}")]
    Reader(#[source] std::io::Error),
}
