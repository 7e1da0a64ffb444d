use std::io;
use std::process::ExitStatus;

use async_tungstenite::tungstenite;
use serde::Serialize;
use thiserror::Error;

use crate::protocol::RemoteError;

pub type Result<T, E = CdpError> = std::result::Result<T, E>;

/// Everything that can go wrong while driving the debugging target.
#[derive(Debug, Error)]
pub enum CdpError {
    #[error("{0}")]
    Ws(#[from] tungstenite::Error),
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Serde(#[from] serde_json::Error),
    /// The browser answered a request with an error payload
    #[error("{0}")]
    Chrome(#[from] RemoteError),
    #[error("{0}")]
    Url(#[from] url::ParseError),
    #[error("received no response from the browser")]
    NoResponse,
    #[error("received unexpected ws message: {0:?}")]
    UnexpectedWsMessage(tungstenite::Message),
    /// The debugging connection is gone; nothing further can be sent.
    #[error("the debugging connection is closed")]
    Disconnected,
    /// `Inspector.targetCrashed` was observed; the channel is poisoned.
    #[error("the page target crashed")]
    PageCrashed,
    #[error("no element is registered under {0}")]
    NoSuchRef(String),
    #[error("{0} no longer resolves to a live element")]
    RefStale(String),
    #[error("{0}")]
    NotInteractable(String),
    #[error("{0}")]
    FillFailed(String),
    /// An in-page script threw during evaluation
    #[error("script threw: {0}")]
    ScriptError(String),
    #[error("{0}")]
    ActionFailed(String),
    #[error("{0}")]
    WaitTimeout(String),
    #[error("browser process exited with {0:?} before a websocket url was resolved")]
    LaunchExit(ExitStatus),
    #[error("timed out resolving the websocket url from the browser process")]
    LaunchTimeout,
}

impl CdpError {
    pub fn msg(msg: impl Into<String>) -> Self {
        CdpError::ActionFailed(msg.into())
    }

    /// The public error code this failure surfaces as in a result envelope.
    pub fn code(&self) -> ErrorCode {
        match self {
            CdpError::Ws(_) | CdpError::Io(_) | CdpError::Disconnected => {
                ErrorCode::CdpDisconnected
            }
            CdpError::PageCrashed => ErrorCode::PageCrashed,
            CdpError::NoSuchRef(_) => ErrorCode::NoSuchRef,
            CdpError::RefStale(_) => ErrorCode::RefStale,
            CdpError::NotInteractable(_) => ErrorCode::NotInteractable,
            CdpError::FillFailed(_) => ErrorCode::FillFailed,
            CdpError::ScriptError(_) => ErrorCode::ScriptError,
            CdpError::WaitTimeout(_) => ErrorCode::WaitTimeout,
            _ => ErrorCode::ActionFailed,
        }
    }
}

/// The fixed taxonomy every failure is normalized to before it reaches the
/// caller. No other codes exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    RefStale,
    NoSuchRef,
    NotInteractable,
    StabilityTimeout,
    CdpDisconnected,
    PageCrashed,
    ActionFailed,
    ScriptError,
    FillFailed,
    WaitTimeout,
}

/// One entry of the `errors` array in a result envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorDetail {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<&CdpError> for ErrorDetail {
    fn from(err: &CdpError) -> Self {
        ErrorDetail::new(err.code(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_serialize_screaming() {
        let detail = ErrorDetail::new(ErrorCode::NoSuchRef, "gone");
        let json = serde_json::to_value(&detail).unwrap();
        assert_eq!(json["code"], "NO_SUCH_REF");

        assert_eq!(
            serde_json::to_value(ErrorCode::CdpDisconnected).unwrap(),
            "CDP_DISCONNECTED"
        );
        assert_eq!(
            serde_json::to_value(ErrorCode::WaitTimeout).unwrap(),
            "WAIT_TIMEOUT"
        );
    }

    #[test]
    fn error_to_code_mapping() {
        assert_eq!(
            CdpError::NoSuchRef("@e9".into()).code(),
            ErrorCode::NoSuchRef
        );
        assert_eq!(CdpError::RefStale("@e1".into()).code(), ErrorCode::RefStale);
        assert_eq!(CdpError::Disconnected.code(), ErrorCode::CdpDisconnected);
        assert_eq!(CdpError::PageCrashed.code(), ErrorCode::PageCrashed);
        assert_eq!(CdpError::NoResponse.code(), ErrorCode::ActionFailed);
    }
}
