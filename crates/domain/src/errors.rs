use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum FrontendError {
    #[error("Malformed query: {0}")]
    MalformedQuery(String),

    #[error("Qname too long: {0} bytes")]
    QnameTooLong(usize),

    #[error("DNS wire format error: {0}")]
    WireFormat(String),

    #[error("Answer buffer capacity already fixed")]
    AnswerCapacityFixed,

    #[error("Answer chunk overflows buffer: {position} + {chunk} > {capacity}")]
    AnswerOverflow {
        position: usize,
        chunk: usize,
        capacity: usize,
    },

    #[error("IPC channel error: {0}")]
    Ipc(String),

    #[error("IPC protocol violation: {0}")]
    Protocol(String),

    #[error("Invalid route message: {0}")]
    RouteMessage(String),

    #[error("Invalid trust anchor: {0}")]
    TrustAnchor(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for FrontendError {
    fn from(e: std::io::Error) -> Self {
        FrontendError::Io(e.to_string())
    }
}
