//! RPC client stub
//!
//! Each call opens a fresh connection, performs the TLS handshake when the
//! endpoint asks for it, sends one call envelope and waits for the response.
//! The whole exchange runs under a single timeout. Nothing is retried.

use crate::error::ClientError;
use crate::protocol::{self, CallEnvelope, ResponseEnvelope, LIST_METHODS};
use crate::tls::{client_connector, Trust};
use crate::value::Value;
use rustls::pki_types::ServerName;
use std::fmt;
use std::io;
use std::str::FromStr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

pub const DEFAULT_HTTPS_PORT: u16 = 8443;
pub const DEFAULT_HTTP_PORT: u16 = 8000;

/// Where to send calls: `https://host:port` or `http://host:port`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl Endpoint {
    /// `host:port`, bracketing IPv6 literals.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.tls { "https" } else { "http" };
        write!(f, "{}://{}", scheme, self.authority())
    }
}

impl FromStr for Endpoint {
    type Err = ClientError;

    fn from_str(url: &str) -> Result<Self, Self::Err> {
        let bad = |why: &str| ClientError::Configuration(format!("invalid URL {:?}: {}", url, why));

        let (tls, rest) = if let Some(rest) = url.strip_prefix("https://") {
            (true, rest)
        } else if let Some(rest) = url.strip_prefix("http://") {
            (false, rest)
        } else if url.contains("://") {
            return Err(bad("scheme must be http or https"));
        } else {
            (true, url)
        };
        let default_port = if tls { DEFAULT_HTTPS_PORT } else { DEFAULT_HTTP_PORT };

        // Any path after the authority is ignored.
        let authority = rest.split('/').next().unwrap_or(rest);

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, after) = bracketed
                .split_once(']')
                .ok_or_else(|| bad("unterminated IPv6 literal"))?;
            match after.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None if after.is_empty() => (host, None),
                None => return Err(bad("unexpected text after IPv6 literal")),
            }
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (authority, None),
            }
        };

        if host.is_empty() {
            return Err(bad("missing host"));
        }
        let port = match port {
            Some(port) => port.parse::<u16>().map_err(|_| bad("invalid port"))?,
            None => default_port,
        };

        Ok(Self {
            host: host.to_string(),
            port,
            tls,
        })
    }
}

/// Client configuration
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub endpoint: Endpoint,
    /// Certificate trust policy, used only for TLS endpoints
    pub trust: Trust,
    /// Upper bound on connect + handshake + request + response
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint {
                host: "localhost".to_string(),
                port: DEFAULT_HTTPS_PORT,
                tls: true,
            },
            trust: Trust::default(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// One-shot RPC client
pub struct RpcClient {
    config: ClientConfig,
    connector: Option<TlsConnector>,
}

impl RpcClient {
    /// Create a client. TLS trust material is loaded here, so a bad trust
    /// file fails before any connection is attempted.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let connector = if config.endpoint.tls {
            Some(client_connector(&config.trust)?)
        } else {
            None
        };
        Ok(Self { config, connector })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.config.endpoint
    }

    /// Invoke `method` with positional `params` and return its result.
    pub async fn call(
        &self,
        method: &str,
        params: impl IntoIterator<Item = Value>,
    ) -> Result<Value, ClientError> {
        let call = CallEnvelope::new(method, params);
        let timeout = self.config.timeout;

        tracing::debug!(
            "Calling {}({:?}) on {}",
            call.method,
            call.params,
            self.config.endpoint
        );

        let response = tokio::time::timeout(timeout, self.exchange(&call))
            .await
            .map_err(|_| ClientError::Timeout(timeout))??;

        match response {
            ResponseEnvelope::Result(value) => {
                tracing::info!("{} returned {}", call.method, value);
                Ok(value)
            }
            ResponseEnvelope::Fault(fault) => {
                tracing::warn!(
                    "{} faulted with {}: {}",
                    call.method,
                    fault.code,
                    fault.message
                );
                Err(ClientError::Fault {
                    code: fault.code,
                    message: fault.message,
                })
            }
        }
    }

    /// Ask the server which procedures it exposes.
    pub async fn list_methods(&self) -> Result<Vec<String>, ClientError> {
        match self.call(LIST_METHODS, Vec::new()).await? {
            Value::List(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Str(name) => Ok(name),
                    other => Err(ClientError::Protocol(format!(
                        "method name is {}, expected a string",
                        other.kind()
                    ))),
                })
                .collect(),
            other => Err(ClientError::Protocol(format!(
                "{} returned {}, expected a list",
                LIST_METHODS,
                other.kind()
            ))),
        }
    }

    async fn exchange(&self, call: &CallEnvelope) -> Result<ResponseEnvelope, ClientError> {
        let endpoint = &self.config.endpoint;
        let authority = endpoint.authority();

        let stream = TcpStream::connect(&authority).await.map_err(|e| {
            if e.kind() == io::ErrorKind::ConnectionRefused {
                ClientError::ConnectionRefused(authority.clone())
            } else {
                ClientError::Transport(e)
            }
        })?;

        match &self.connector {
            Some(connector) => {
                let server_name = ServerName::try_from(endpoint.host.clone()).map_err(|e| {
                    ClientError::Configuration(format!("invalid server name {}: {}", endpoint.host, e))
                })?;
                let tls = connector
                    .connect(server_name, stream)
                    .await
                    .map_err(|source| ClientError::Handshake {
                        host: endpoint.host.clone(),
                        source,
                    })?;
                round_trip(tls, call).await
            }
            None => round_trip(stream, call).await,
        }
    }
}

async fn round_trip<S>(mut stream: S, call: &CallEnvelope) -> Result<ResponseEnvelope, ClientError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    protocol::write_message(&mut stream, call).await?;
    let response = protocol::read_message(&mut stream).await?;
    Ok(response)
}

/// Turn literal command-line tokens into call arguments.
pub fn parse_args<S: AsRef<str>>(tokens: &[S]) -> Vec<Value> {
    tokens
        .iter()
        .map(|token| Value::parse_token(token.as_ref()))
        .collect()
}
