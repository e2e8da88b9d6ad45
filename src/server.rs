//! RPC server endpoint
//!
//! Accepts TCP connections (optionally wrapped in TLS), reads one call
//! envelope per connection, dispatches it to the procedure registry and
//! writes back one response envelope. Every connection runs in its own
//! task, so a failing or stalled call never affects the others.

use crate::error::{FrameError, ServerError};
use crate::protocol::{
    self, CallEnvelope, Fault, FaultCode, ResponseEnvelope, LIST_METHODS,
};
use crate::registry::ProcedureRegistry;
use crate::tls::{server_acceptor, TlsFiles};
use crate::value::Value;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

/// Pause after a failed `accept()` (e.g. EMFILE) before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Which listeners the server binary starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ServerMode {
    /// Plaintext listener only
    Http,
    /// TLS listener only
    Https,
    /// Plaintext and TLS listeners side by side
    Both,
}

impl ServerMode {
    pub fn wants_http(self) -> bool {
        matches!(self, Self::Http | Self::Both)
    }

    pub fn wants_https(self) -> bool {
        matches!(self, Self::Https | Self::Both)
    }
}

impl fmt::Display for ServerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Http => "http",
            Self::Https => "https",
            Self::Both => "both",
        };
        f.write_str(name)
    }
}

/// Configuration of a single listener
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Address to bind, `host:port`
    pub listen_addr: String,
    /// Certificate and key; `None` serves plaintext
    pub tls: Option<TlsFiles>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "localhost:8443".to_string(),
            tls: Some(TlsFiles::default()),
        }
    }
}

impl ServerConfig {
    pub fn https(listen_addr: impl Into<String>, tls: TlsFiles) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            tls: Some(tls),
        }
    }

    pub fn http(listen_addr: impl Into<String>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            tls: None,
        }
    }

    fn transport_name(&self) -> &'static str {
        if self.tls.is_some() {
            "HTTPS"
        } else {
            "HTTP"
        }
    }
}

/// Answer one call against `registry`.
///
/// Never panics and never fails: unknown names, bad arguments and faults
/// raised by the procedure all become fault responses.
pub fn dispatch(registry: &ProcedureRegistry, call: &CallEnvelope) -> ResponseEnvelope {
    if call.method == LIST_METHODS {
        let mut names = registry.names();
        names.push(LIST_METHODS.to_string());
        names.sort();
        return ResponseEnvelope::Result(Value::from(names));
    }

    let result = registry
        .resolve(&call.method)
        .map_err(Fault::from)
        .and_then(|procedure| procedure.call(&call.params).map_err(Fault::from));
    ResponseEnvelope::from(result)
}

/// A bound listener, ready to serve.
pub struct RpcServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    acceptor: Option<TlsAcceptor>,
    registry: Arc<ProcedureRegistry>,
    transport: &'static str,
    call_counter: AtomicU64,
}

impl RpcServer {
    /// Load TLS material (if configured) and bind the listening socket.
    pub async fn bind(
        config: &ServerConfig,
        registry: Arc<ProcedureRegistry>,
    ) -> Result<Self, ServerError> {
        let transport = config.transport_name();
        tracing::info!("Starting {} RPC server on {}", transport, config.listen_addr);

        let acceptor = config.tls.as_ref().map(server_acceptor).transpose()?;

        let addr = tokio::net::lookup_host(&config.listen_addr)
            .await
            .map_err(|e| {
                ServerError::configuration(
                    format!("invalid listen address {}: {}", config.listen_addr, e),
                    None,
                )
            })?
            .next()
            .ok_or_else(|| {
                ServerError::configuration(
                    format!("listen address {} resolved to nothing", config.listen_addr),
                    None,
                )
            })?;

        let listener = TcpListener::bind(addr).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                ServerError::AddressInUse(addr)
            } else {
                ServerError::Io(e)
            }
        })?;
        let local_addr = listener.local_addr()?;

        tracing::info!(
            "{} RPC server listening on {} ({} procedures)",
            transport,
            local_addr,
            registry.len()
        );

        Ok(Self {
            listener,
            local_addr,
            acceptor,
            registry,
            transport,
            call_counter: AtomicU64::new(0),
        })
    }

    /// The address actually bound (useful when the port was 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_tls(&self) -> bool {
        self.acceptor.is_some()
    }

    /// Serve until `shutdown` resolves. Connections already in flight are
    /// left to finish on their own tasks.
    pub async fn serve_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("{} server shutdown requested", self.transport);
                    break;
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            tracing::warn!("Accept failed on {}: {}", self.local_addr, e);
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                            continue;
                        }
                    };
                    let acceptor = self.acceptor.clone();
                    let registry = Arc::clone(&self.registry);
                    let call_id = self.call_counter.fetch_add(1, Ordering::Relaxed);
                    tokio::spawn(async move {
                        handle_connection(stream, peer, acceptor, registry, call_id).await;
                    });
                }
            }
        }

        tracing::info!("{} server on {} stopped", self.transport, self.local_addr);
        Ok(())
    }

    /// Serve forever.
    pub async fn serve(self) -> Result<(), ServerError> {
        self.serve_until(std::future::pending()).await
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    acceptor: Option<TlsAcceptor>,
    registry: Arc<ProcedureRegistry>,
    call_id: u64,
) {
    let result = match acceptor {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(tls) => serve_call(tls, peer, &registry, call_id).await,
            Err(e) => {
                tracing::warn!("TLS handshake with {} failed: {}", peer, e);
                return;
            }
        },
        None => serve_call(stream, peer, &registry, call_id).await,
    };

    if let Err(e) = result {
        tracing::warn!("Call {} from {} aborted: {}", call_id, peer, e);
    }
}

async fn serve_call<S>(
    mut stream: S,
    peer: SocketAddr,
    registry: &ProcedureRegistry,
    call_id: u64,
) -> Result<(), FrameError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let response = match protocol::read_frame(&mut stream).await {
        Ok(body) => match protocol::decode::<CallEnvelope>(&body) {
            Ok(call) => {
                tracing::debug!(
                    "Call {} from {}: {}({:?})",
                    call_id,
                    peer,
                    call.method,
                    call.params
                );
                let response = dispatch(registry, &call);
                log_outcome(call_id, &call, &response);
                response
            }
            Err(e) => {
                tracing::warn!("Call {} from {}: {}", call_id, peer, e);
                ResponseEnvelope::fault(FaultCode::MalformedRequest, e.to_string())
            }
        },
        Err(e @ FrameError::TooLarge(_)) => {
            tracing::warn!("Call {} from {}: {}", call_id, peer, e);
            ResponseEnvelope::fault(FaultCode::MalformedRequest, e.to_string())
        }
        Err(e) => return Err(e),
    };

    protocol::write_message(&mut stream, &response).await?;
    stream.shutdown().await?;
    Ok(())
}

fn log_outcome(call_id: u64, call: &CallEnvelope, response: &ResponseEnvelope) {
    match response {
        ResponseEnvelope::Result(value) => {
            tracing::info!("Call {}: {} -> {}", call_id, call.method, value);
        }
        ResponseEnvelope::Fault(fault) => {
            tracing::warn!(
                "Call {}: {} faulted with {}: {}",
                call_id,
                call.method,
                fault.code,
                fault.message
            );
        }
    }
}

/// Bind a listener for `config` and serve it forever.
pub async fn run_server(config: ServerConfig, registry: Arc<ProcedureRegistry>) -> Result<(), ServerError> {
    RpcServer::bind(&config, registry).await?.serve().await
}
