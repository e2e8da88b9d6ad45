//! Error types shared by the server and client halves.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::value::ValueKind;

/// Errors raised while building or querying a procedure registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("procedure {0:?} is already registered")]
    DuplicateName(String),

    #[error("procedure name {0:?} is reserved")]
    ReservedName(String),

    #[error("method {0:?} is not supported")]
    UnknownProcedure(String),
}

/// Faults raised while invoking a registered procedure.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProcedureError {
    #[error("expected {expected} argument(s), got {actual}")]
    Arity { expected: usize, actual: usize },

    #[error("argument {position} must be {expected}, got {actual}")]
    TypeMismatch {
        /// 1-based position of the offending argument
        position: usize,
        expected: &'static str,
        actual: ValueKind,
    },

    #[error("cannot divide by zero")]
    DivisionByZero,

    #[error("arithmetic overflow in {0}")]
    Overflow(&'static str),

    #[error("{0}")]
    Failed(String),
}

impl ProcedureError {
    /// True when the fault comes from the caller's arguments rather than
    /// from the procedure body.
    pub fn is_invalid_params(&self) -> bool {
        matches!(self, Self::Arity { .. } | Self::TypeMismatch { .. })
    }
}

/// Errors reading or writing a length-prefixed frame.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame of {0} bytes exceeds the {max} byte limit", max = crate::protocol::MAX_FRAME_LEN)]
    TooLarge(usize),

    #[error("malformed envelope: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Fatal server startup and runtime errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("configuration error: {message}")]
    Configuration {
        message: String,
        path: Option<PathBuf>,
    },

    #[error("address {0} is already in use")]
    AddressInUse(SocketAddr),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ServerError {
    pub(crate) fn configuration(message: impl Into<String>, path: Option<PathBuf>) -> Self {
        Self::Configuration {
            message: message.into(),
            path,
        }
    }
}

/// Everything that can end a single client invocation.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("connection refused by {0}")]
    ConnectionRefused(String),

    #[error("transport error: {0}")]
    Transport(#[source] io::Error),

    #[error("TLS handshake with {host} failed: {source}")]
    Handshake {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("server fault {code}: {message}")]
    Fault { code: i32, message: String },
}

impl ClientError {
    /// True when the server answered with a fault envelope.
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Fault { .. })
    }

    pub fn fault_code(&self) -> Option<i32> {
        match self {
            Self::Fault { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<FrameError> for ClientError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(e) => Self::Transport(e),
            other => Self::Protocol(other.to_string()),
        }
    }
}
