//! skiff: send or receive one file over UDP.
//!
//! Usage: skiff send|recv <file> <sender_host:port> <receiver_host:port>

mod cli;
mod progress;

use std::io;
use std::net::SocketAddr;
use std::process::ExitCode;

use anyhow::{Context, Result};
use bytes::Bytes;
use tracing_subscriber::EnvFilter;

use skiff_core::transport::resolve;
use skiff_core::{
    receive_file, send_file, PeerAddr, SkiffConfig, TransferError, TransferReport, UdpTransport,
};

use crate::cli::{Invocation, Mode};
use crate::progress::ProgressBar;

const EXIT_USAGE: u8 = 2;
const EXIT_IO: u8 = 3;
const EXIT_TIMEOUT: u8 = 4;
const EXIT_INTEGRITY: u8 = 5;
const EXIT_CONFIG: u8 = 6;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let invocation = match cli::parse(&args) {
        Ok(cli::Command::Help) => {
            print!("{}", cli::usage());
            return ExitCode::SUCCESS;
        }
        Ok(cli::Command::Transfer(invocation)) => invocation,
        Err(e) => {
            eprintln!("{e}");
            eprintln!();
            eprint!("{}", cli::usage());
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let config = match SkiffConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Transfer failed: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    match run(&invocation, &config).await {
        Ok(report) => {
            tracing::info!(
                chunks = report.chunks,
                bytes = report.bytes,
                retransmits = report.retransmits,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "transfer complete"
            );
            println!("Transfer successful");
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("Transfer failed: {e:#}");
            ExitCode::from(exit_code(&e))
        }
    }
}

async fn run(invocation: &Invocation, config: &SkiffConfig) -> Result<TransferReport> {
    let sender = lookup(&invocation.sender).await?;
    let receiver = lookup(&invocation.receiver).await?;
    let mut bar = ProgressBar::new(io::stderr());

    let result = match invocation.mode {
        Mode::Send => {
            let path = &invocation.file;
            let file = std::fs::read(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let transport = UdpTransport::bind(sender)
                .await
                .with_context(|| format!("failed to bind {sender}"))?;
            send_file(
                &transport,
                config,
                invocation.sender.clone(),
                receiver,
                Bytes::from(file),
                |p| bar.update(p),
            )
            .await
        }
        Mode::Recv => {
            let path = &invocation.file;
            let transport = UdpTransport::bind(receiver)
                .await
                .with_context(|| format!("failed to bind {receiver}"))?;
            receive_file(
                &transport,
                config,
                sender,
                |data: Bytes| std::fs::write(path, &data),
                |p| bar.update(p),
            )
            .await
        }
    };
    bar.finish();
    Ok(result?)
}

async fn lookup(addr: &PeerAddr) -> Result<SocketAddr, TransferError> {
    resolve(addr).await.map_err(|source| TransferError::Resolve {
        addr: addr.to_string(),
        source,
    })
}

fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<TransferError>() {
        Some(e) if e.is_timeout() => EXIT_TIMEOUT,
        Some(e) if e.is_integrity_mismatch() => EXIT_INTEGRITY,
        _ => EXIT_IO,
    }
}
