use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// Media device denial or failure. Stays local to this client; it is
    /// never reported to the server.
    #[error("Media error: {0}")]
    Media(String),

    #[error("Negotiation endpoint error: {0}")]
    Peer(String),

    #[error("Invalid state: {0}")]
    InvalidState(&'static str),
}

pub type Result<T> = std::result::Result<T, ClientError>;
