//! RPC Client binary
//!
//! Run with: cargo run --bin rpc-client -- --help

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tls_rpc_demo::client::{parse_args, ClientConfig, RpcClient};
use tls_rpc_demo::logging::{init_logging, LogConfig};
use tls_rpc_demo::tls::Trust;
use tls_rpc_demo::value::Value;

#[derive(Parser, Debug)]
#[command(name = "rpc-client")]
#[command(about = "Invoke one remote procedure, e.g. `rpc-client add 2 2`")]
#[command(allow_negative_numbers = true)]
struct Args {
    /// Server URL (https:// for TLS, http:// for plaintext)
    #[arg(long, default_value = "https://localhost:8443")]
    url: String,

    /// PEM certificate to trust (CA or the server's self-signed certificate)
    #[arg(long, default_value = "server.crt", conflicts_with = "insecure")]
    ca_cert: PathBuf,

    /// Accept any server certificate
    #[arg(long, default_value_t = false)]
    insecure: bool,

    /// Give up if no response arrives within this many seconds
    #[arg(long, default_value = "10")]
    timeout_secs: f64,

    /// Directory for the append-only log file
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Procedure to call, e.g. `add` or `system.listMethods`
    method: String,

    /// Arguments; numeric tokens are sent as numbers
    args: Vec<String>,
}

fn print_value(value: &Value) {
    match value {
        Value::List(items) => {
            for item in items {
                println!("{}", item);
            }
        }
        other => println!("{}", other),
    }
}

async fn run(args: &Args) -> Result<Value> {
    let timeout = Duration::try_from_secs_f64(args.timeout_secs)
        .map_err(|e| anyhow::anyhow!("invalid --timeout-secs {}: {}", args.timeout_secs, e))?;
    let trust = if args.insecure {
        Trust::Insecure
    } else {
        Trust::CaFile(args.ca_cert.clone())
    };

    let config = ClientConfig {
        endpoint: args.url.parse()?,
        trust,
        timeout,
    };
    let client = RpcClient::new(config)?;

    let params = parse_args(&args.args);
    tracing::info!("Calling {}({:?}) on {}", args.method, params, client.endpoint());
    let value = client.call(&args.method, params).await?;
    Ok(value)
}

/// Process exit status for a finished call: 0 on a result, 1 on any failure.
fn exit_status(result: &Result<Value>) -> u8 {
    match result {
        Ok(_) => 0,
        Err(_) => 1,
    }
}

/// Print the outcome of `method` and map it to an exit status.
fn report(method: &str, result: Result<Value>) -> u8 {
    let status = exit_status(&result);
    match result {
        Ok(value) => print_value(&value),
        Err(e) => {
            tracing::error!("{} failed: {:#}", method, e);
            eprintln!("Error: {:#}", e);
        }
    }
    status
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(&LogConfig::new(&args.log_dir, "rpc_client.log", &args.log_level)) {
        eprintln!("Error: {:#}", e);
        return ExitCode::FAILURE;
    }

    let result = run(&args).await;
    ExitCode::from(report(&args.method, result))
}
