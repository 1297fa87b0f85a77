use std::io;
use std::time::Duration;

/// Errors produced by the coordination layer
///
/// None of these are meant to reach the end user. Callers log them and fall
/// back to behaving as if no other instance existed.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("D-Bus error: {0}")]
    DBus(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Handshake endpoint '{0}' is already bound by another instance")]
    EndpointBusy(String),

    #[error("Invalid name '{0}'")]
    InvalidName(String),

    #[error("Signal primitive is closed")]
    Closed,

    #[error("Handshake abandoned")]
    Cancelled,
}

impl From<zbus::Error> for Error {
    fn from(e: zbus::Error) -> Self {
        Error::DBus(e.to_string())
    }
}

impl From<zbus::fdo::Error> for Error {
    fn from(e: zbus::fdo::Error) -> Self {
        Error::DBus(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
