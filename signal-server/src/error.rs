use thiserror::Error;

/// Business-rule failures for call-control events.
///
/// Every variant is reported back to the originating client as a
/// `call_failed` notification; none of them is fatal to the server.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("User not found")]
    UserNotFound,

    #[error("User is offline")]
    UserUnreachable,

    #[error("User is already in a call")]
    Busy,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Call not found")]
    CallNotFound,

    #[error("Invalid call state")]
    InvalidTransition,
}

pub type Result<T> = std::result::Result<T, CallError>;
