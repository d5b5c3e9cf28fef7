//! skiff binary: local SOCKS5 proxy over pooled cipher connections.

use std::process::ExitCode;

use clap::Parser;

use skiff_client::ClientArgs;

#[tokio::main]
async fn main() -> ExitCode {
    let args = ClientArgs::parse();

    match skiff_client::cli::run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
