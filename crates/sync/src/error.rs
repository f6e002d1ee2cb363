use std::io;

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("no usable port: every channel and dynamic range failed to bind")]
    NoUsablePort,
    #[error("host not found on any channel")]
    HostNotFound,
    #[error("session not started")]
    NotStarted,
    #[error("session already running")]
    AlreadyStarted,
    #[error("unknown channel {0}")]
    UnknownChannel(usize),
    #[error("operation requires the {0} role")]
    WrongRole(&'static str),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type NetResult<T> = Result<T, NetError>;
