//! Wire protocol types
//!
//! Every exchange is one call frame from the client followed by one
//! response frame from the server. A frame is a big-endian `u32` length
//! followed by that many bytes of JSON.

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{FrameError, ProcedureError, RegistryError};
use crate::value::Value;

/// Largest frame body either side will send or accept.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Introspection method answered by the server itself.
pub const LIST_METHODS: &str = "system.listMethods";

/// A single remote call: procedure name plus positional arguments.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallEnvelope {
    pub method: String,
    #[serde(default)]
    pub params: SmallVec<[Value; 4]>,
}

impl CallEnvelope {
    pub fn new(method: impl Into<String>, params: impl IntoIterator<Item = Value>) -> Self {
        Self {
            method: method.into(),
            params: params.into_iter().collect(),
        }
    }
}

/// Fault codes, following the XML-RPC interop conventions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultCode {
    MalformedRequest,
    UnknownProcedure,
    InvalidParams,
    ExecutionFailed,
}

impl FaultCode {
    pub fn code(self) -> i32 {
        match self {
            Self::MalformedRequest => -32700,
            Self::UnknownProcedure => -32601,
            Self::InvalidParams => -32602,
            Self::ExecutionFailed => -32500,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -32700 => Some(Self::MalformedRequest),
            -32601 => Some(Self::UnknownProcedure),
            -32602 => Some(Self::InvalidParams),
            -32500 => Some(Self::ExecutionFailed),
            _ => None,
        }
    }
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.code())
    }
}

/// A structured error returned in place of a result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    pub code: i32,
    pub message: String,
}

impl Fault {
    pub fn new(code: FaultCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> Option<FaultCode> {
        FaultCode::from_code(self.code)
    }
}

impl From<RegistryError> for Fault {
    fn from(err: RegistryError) -> Self {
        let code = match err {
            RegistryError::UnknownProcedure(_) => FaultCode::UnknownProcedure,
            RegistryError::DuplicateName(_) | RegistryError::ReservedName(_) => {
                FaultCode::ExecutionFailed
            }
        };
        Self::new(code, err.to_string())
    }
}

impl From<ProcedureError> for Fault {
    fn from(err: ProcedureError) -> Self {
        let code = if err.is_invalid_params() {
            FaultCode::InvalidParams
        } else {
            FaultCode::ExecutionFailed
        };
        Self::new(code, err.to_string())
    }
}

/// The server's reply to one call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseEnvelope {
    Result(Value),
    Fault(Fault),
}

impl ResponseEnvelope {
    pub fn fault(code: FaultCode, message: impl Into<String>) -> Self {
        Self::Fault(Fault::new(code, message))
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Fault(_))
    }
}

impl From<Result<Value, Fault>> for ResponseEnvelope {
    fn from(result: Result<Value, Fault>) -> Self {
        match result {
            Ok(value) => Self::Result(value),
            Err(fault) => Self::Fault(fault),
        }
    }
}

/// Read one raw frame body.
pub async fn read_frame<R>(reader: &mut R) -> Result<Bytes, FrameError>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(len));
    }
    let mut buf = BytesMut::zeroed(len);
    reader.read_exact(&mut buf).await?;
    Ok(buf.freeze())
}

pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, FrameError> {
    Ok(serde_json::from_slice(body)?)
}

/// Read one frame and decode it as `T`.
pub async fn read_message<R, T>(reader: &mut R) -> Result<T, FrameError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let body = read_frame(reader).await?;
    decode(&body)
}

/// Encode `message` and write it as one frame.
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(body.len()));
    }
    let mut buf = BytesMut::with_capacity(4 + body.len());
    buf.put_u32(body.len() as u32);
    buf.extend_from_slice(&body);
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}
