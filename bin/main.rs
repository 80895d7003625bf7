//! gwchat CLI Entry Point
//!
//! This binary provides the command-line interface for gwchat.

use std::process;

#[tokio::main]
async fn main() {
    if let Err(e) = gwchat_interface::run_cli().await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
