//! TLS RPC demo - Main entry point
//!
//! A minimal remote-procedure-call pair: a server that exposes a handful of
//! arithmetic procedures over TLS (and optionally plaintext), and a one-shot
//! client that invokes one procedure by name.
//!
//! ## Wire format
//!
//! Each connection carries exactly one exchange:
//! 1. Client sends a length-prefixed JSON call envelope `{"method", "params"}`
//! 2. Server resolves the method in its procedure registry and runs it
//! 3. Server replies with `{"result": ...}` or `{"fault": {"code", "message"}}`
//! 4. Server closes the connection
//!
//! ## Usage
//!
//! Start the server:
//! ```bash
//! cargo run --bin rpc-server -- both
//! ```
//!
//! Run the client:
//! ```bash
//! cargo run --bin rpc-client -- add 2 2
//! cargo run --bin rpc-client -- --url http://localhost:8000 multiply 3 5
//! cargo run --bin rpc-client -- system.listMethods
//! ```

fn main() {
    println!("TLS RPC demo");
    println!();
    println!("Use the following binaries:");
    println!("  cargo run --bin rpc-server -- --help");
    println!("  cargo run --bin rpc-client -- --help");
}
