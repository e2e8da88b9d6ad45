pub mod client;
pub mod error;
pub mod logging;
pub mod math;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod tls;
pub mod value;

pub use client::{ClientConfig, Endpoint, RpcClient};
pub use error::{ClientError, ProcedureError, RegistryError, ServerError};
pub use protocol::{CallEnvelope, Fault, FaultCode, ResponseEnvelope};
pub use registry::ProcedureRegistry;
pub use server::{RpcServer, ServerConfig, ServerMode};
pub use tls::{TlsFiles, Trust};
pub use value::Value;
