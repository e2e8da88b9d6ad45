//! Integration tests for the TLS RPC client and server

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tls_rpc_demo::client::{ClientConfig, RpcClient};
use tls_rpc_demo::error::{ClientError, ProcedureError};
use tls_rpc_demo::math::default_registry;
use tls_rpc_demo::protocol::FaultCode;
use tls_rpc_demo::registry::ProcedureRegistry;
use tls_rpc_demo::server::{RpcServer, ServerConfig};
use tls_rpc_demo::tls::{TlsFiles, Trust};
use tls_rpc_demo::value::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Write a fresh self-signed certificate for localhost into `dir`.
fn write_cert(dir: &TempDir, stem: &str) -> TlsFiles {
    let certified = rcgen::generate_simple_self_signed(vec![
        "localhost".to_string(),
        "127.0.0.1".to_string(),
    ])
    .unwrap();
    let files = TlsFiles {
        cert: dir.path().join(format!("{}.crt", stem)),
        key: dir.path().join(format!("{}.key", stem)),
    };
    std::fs::write(&files.cert, certified.cert.pem()).unwrap();
    std::fs::write(&files.key, certified.key_pair.serialize_pem()).unwrap();
    files
}

struct RunningServer {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl RunningServer {
    async fn stop(self) {
        let _ = self.shutdown.send(());
        self.handle.await.unwrap();
    }
}

async fn start_server(config: ServerConfig, registry: Arc<ProcedureRegistry>) -> RunningServer {
    let server = RpcServer::bind(&config, registry).await.unwrap();
    let addr = server.local_addr();
    let (shutdown, rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        server
            .serve_until(async move {
                let _ = rx.await;
            })
            .await
            .unwrap();
    });
    RunningServer {
        addr,
        shutdown,
        handle,
    }
}

async fn start_tls_server(files: &TlsFiles) -> RunningServer {
    let registry = Arc::new(default_registry().unwrap());
    start_server(ServerConfig::https("127.0.0.1:0", files.clone()), registry).await
}

fn tls_client(addr: SocketAddr, trust: Trust) -> RpcClient {
    RpcClient::new(ClientConfig {
        endpoint: format!("https://localhost:{}", addr.port()).parse().unwrap(),
        trust,
        timeout: Duration::from_secs(5),
    })
    .unwrap()
}

fn plain_client(addr: SocketAddr, timeout: Duration) -> RpcClient {
    RpcClient::new(ClientConfig {
        endpoint: format!("http://127.0.0.1:{}", addr.port()).parse().unwrap(),
        trust: Trust::Insecure,
        timeout,
    })
    .unwrap()
}

fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().copied().map(Value::Int).collect()
}

#[tokio::test]
async fn test_demo_scenario() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("tls_rpc_demo=debug")
        .try_init();

    let dir = TempDir::new().unwrap();
    let files = write_cert(&dir, "server");
    let server = start_tls_server(&files).await;
    let client = tls_client(server.addr, Trust::CaFile(files.cert.clone()));

    assert_eq!(client.call("add", ints(&[2, 2])).await.unwrap(), Value::Int(4));
    assert_eq!(client.call("multiply", ints(&[3, 5])).await.unwrap(), Value::Int(15));

    let err = client.call("divide", ints(&[10, 0])).await.unwrap_err();
    assert_eq!(err.fault_code(), Some(FaultCode::ExecutionFailed.code()));
    assert!(err.to_string().contains("cannot divide by zero"));

    let err = client.call("unknown_proc", ints(&[1])).await.unwrap_err();
    assert_eq!(err.fault_code(), Some(FaultCode::UnknownProcedure.code()));

    // Still serving after the faults.
    assert_eq!(client.call("add", ints(&[2, 2])).await.unwrap(), Value::Int(4));

    server.stop().await;
}

#[tokio::test]
async fn test_remote_matches_local() {
    let dir = TempDir::new().unwrap();
    let files = write_cert(&dir, "server");
    let server = start_tls_server(&files).await;
    let client = tls_client(server.addr, Trust::CaFile(files.cert.clone()));
    let local = default_registry().unwrap();

    let cases = [
        ("add", vec![Value::Int(-4), Value::Int(9)]),
        ("subtract", vec![Value::Float(1.5), Value::Int(4)]),
        ("multiply", vec![Value::Int(6), Value::Int(7)]),
        ("divide", vec![Value::Int(10), Value::Int(4)]),
        ("divide", vec![Value::Float(1.0), Value::Float(3.0)]),
    ];

    for (method, params) in cases {
        let expected = local.resolve(method).unwrap().call(&params).unwrap();
        let remote = client.call(method, params.clone()).await.unwrap();
        assert_eq!(remote, expected, "{}({:?})", method, params);
    }

    server.stop().await;
}

#[tokio::test]
async fn test_concurrent_calls_do_not_bleed() {
    let dir = TempDir::new().unwrap();
    let files = write_cert(&dir, "server");
    let server = start_tls_server(&files).await;
    let client = tls_client(server.addr, Trust::CaFile(files.cert.clone()));

    let (a, b) = tokio::join!(client.call("add", ints(&[2, 2])), client.call("add", ints(&[3, 3])));
    assert_eq!(a.unwrap(), Value::Int(4));
    assert_eq!(b.unwrap(), Value::Int(6));

    let (b, a) = tokio::join!(client.call("add", ints(&[3, 3])), client.call("add", ints(&[2, 2])));
    assert_eq!(a.unwrap(), Value::Int(4));
    assert_eq!(b.unwrap(), Value::Int(6));

    server.stop().await;
}

#[tokio::test]
async fn test_invalid_params_fault() {
    let dir = TempDir::new().unwrap();
    let files = write_cert(&dir, "server");
    let server = start_tls_server(&files).await;
    let client = tls_client(server.addr, Trust::CaFile(files.cert.clone()));

    let err = client
        .call("add", vec![Value::Int(2), Value::from("two")])
        .await
        .unwrap_err();
    assert_eq!(err.fault_code(), Some(FaultCode::InvalidParams.code()));

    let err = client.call("add", ints(&[1, 2, 3])).await.unwrap_err();
    assert_eq!(err.fault_code(), Some(FaultCode::InvalidParams.code()));
    assert!(err.to_string().contains("expected 2 argument(s), got 3"));

    server.stop().await;
}

#[tokio::test]
async fn test_float_overflow_is_a_fault() {
    let dir = TempDir::new().unwrap();
    let files = write_cert(&dir, "server");
    let server = start_tls_server(&files).await;
    let client = tls_client(server.addr, Trust::CaFile(files.cert.clone()));

    let err = client
        .call("multiply", vec![Value::Float(1e308), Value::Int(10)])
        .await
        .unwrap_err();
    assert_eq!(err.fault_code(), Some(FaultCode::ExecutionFailed.code()), "{:?}", err);
    assert!(err.to_string().contains("arithmetic overflow in multiply"));

    let err = client
        .call("divide", vec![Value::Float(1e308), Value::Float(1e-10)])
        .await
        .unwrap_err();
    assert_eq!(err.fault_code(), Some(FaultCode::ExecutionFailed.code()), "{:?}", err);

    assert_eq!(
        client.call("multiply", vec![Value::Float(2.5), Value::Int(4)]).await.unwrap(),
        Value::Float(10.0)
    );

    server.stop().await;
}

#[tokio::test]
async fn test_list_methods() {
    let dir = TempDir::new().unwrap();
    let files = write_cert(&dir, "server");
    let server = start_tls_server(&files).await;
    let client = tls_client(server.addr, Trust::Insecure);

    let methods = client.list_methods().await.unwrap();
    assert_eq!(
        methods,
        vec!["add", "divide", "multiply", "subtract", "system.listMethods"]
    );

    server.stop().await;
}

#[tokio::test]
async fn test_both_transports_share_registry() {
    let dir = TempDir::new().unwrap();
    let files = write_cert(&dir, "server");
    let registry = Arc::new(default_registry().unwrap());

    let https = start_server(
        ServerConfig::https("127.0.0.1:0", files.clone()),
        Arc::clone(&registry),
    )
    .await;
    let http = start_server(ServerConfig::http("127.0.0.1:0"), Arc::clone(&registry)).await;

    let secure = tls_client(https.addr, Trust::CaFile(files.cert.clone()));
    let plain = plain_client(http.addr, Duration::from_secs(5));

    assert_eq!(secure.call("add", ints(&[2, 2])).await.unwrap(), Value::Int(4));
    assert_eq!(plain.call("add", ints(&[2, 2])).await.unwrap(), Value::Int(4));

    https.stop().await;
    http.stop().await;
}

#[tokio::test]
async fn test_untrusted_certificate_fails_handshake() {
    let dir = TempDir::new().unwrap();
    let files = write_cert(&dir, "server");
    let other = write_cert(&dir, "other");
    let server = start_tls_server(&files).await;

    let client = tls_client(server.addr, Trust::CaFile(other.cert.clone()));
    let err = client.call("add", ints(&[2, 2])).await.unwrap_err();
    assert!(matches!(err, ClientError::Handshake { .. }), "{:?}", err);

    // A failed handshake does not disturb the server.
    let client = tls_client(server.addr, Trust::CaFile(files.cert.clone()));
    assert_eq!(client.call("add", ints(&[2, 2])).await.unwrap(), Value::Int(4));

    server.stop().await;
}

#[tokio::test]
async fn test_connection_refused() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();

    let client = plain_client(addr, Duration::from_secs(5));
    let err = client.call("add", ints(&[2, 2])).await.unwrap_err();
    assert!(matches!(err, ClientError::ConnectionRefused(_)), "{:?}", err);
}

#[tokio::test]
async fn test_client_timeout() {
    // Accepts connections but never answers.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let stall = tokio::spawn(async move {
        let mut held = Vec::new();
        loop {
            if let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        }
    });

    let client = plain_client(addr, Duration::from_millis(200));
    let err = client.call("add", ints(&[2, 2])).await.unwrap_err();
    assert!(matches!(err, ClientError::Timeout(_)), "{:?}", err);

    stall.abort();
}

#[tokio::test]
async fn test_restart_gives_identical_results() {
    let dir = TempDir::new().unwrap();
    let files = write_cert(&dir, "server");
    let calls = [("add", [2, 2]), ("multiply", [3, 5]), ("subtract", [1, 9])];

    let mut runs = Vec::new();
    for _ in 0..2 {
        let server = start_tls_server(&files).await;
        let client = tls_client(server.addr, Trust::CaFile(files.cert.clone()));
        let mut results = Vec::new();
        for (method, args) in calls {
            results.push(client.call(method, ints(&args)).await.unwrap());
        }
        let err = client.call("divide", ints(&[10, 0])).await.unwrap_err();
        results.push(Value::from(err.to_string()));
        server.stop().await;
        runs.push(results);
    }

    assert_eq!(runs[0], runs[1]);
}

#[tokio::test]
async fn test_independent_registries() {
    let mut greeter = ProcedureRegistry::new();
    greeter
        .register("greet", |name: String| Ok::<_, ProcedureError>(format!("hello, {}", name)))
        .unwrap();

    let math = start_server(
        ServerConfig::http("127.0.0.1:0"),
        Arc::new(default_registry().unwrap()),
    )
    .await;
    let greet = start_server(ServerConfig::http("127.0.0.1:0"), Arc::new(greeter)).await;

    let math_client = plain_client(math.addr, Duration::from_secs(5));
    let greet_client = plain_client(greet.addr, Duration::from_secs(5));

    assert_eq!(
        greet_client.call("greet", vec![Value::from("rust")]).await.unwrap(),
        Value::from("hello, rust")
    );
    let err = greet_client.call("add", ints(&[1, 1])).await.unwrap_err();
    assert_eq!(err.fault_code(), Some(FaultCode::UnknownProcedure.code()));
    assert_eq!(math_client.call("add", ints(&[1, 1])).await.unwrap(), Value::Int(2));

    math.stop().await;
    greet.stop().await;
}
