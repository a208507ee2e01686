use cairn_protocol::ProtocolError;
use cairn_store::StoreError;

/// Errors raised while executing a command inline or remotely.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("remote execution failed (exit code {exit_code:?})")]
    RemoteExecution {
        exit_code: Option<i32>,
        output: String,
    },

    #[error("channel to the remote process closed")]
    ChannelClosed,

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("unknown command kind: {0}")]
    UnknownCommandKind(String),

    #[error("extension module not loaded in worker: {0}")]
    MissingExtension(String),

    #[error("micro-thread panicked: {0}")]
    MicroThreadPanicked(String),

    #[error("command failed: {0}")]
    Command(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type ExecResult<T> = Result<T, ExecError>;
