//! skiff integration test harness.
//!
//! Transfers run end to end through `send_file` and `receive_file`, over
//! in-process memory links or real UDP sockets on 127.0.0.1. Memory-link
//! tests run with tokio's clock paused, so retry timeouts cost nothing.
//!
//!   cargo test --test integration

mod failures;
mod fault;
mod transfers;

use std::net::SocketAddr;

use bytes::Bytes;
use rand::RngCore;
use skiff_core::config::Backoff;
use skiff_core::{
    receive_file, send_file, SkiffConfig, TransferError, TransferReport, Transport,
};

// ── Harness ───────────────────────────────────────────────────────────────────

pub const SENDER: &str = "127.0.0.1:7100";
pub const RECEIVER: &str = "127.0.0.1:7101";

pub fn sender_addr() -> SocketAddr {
    SENDER.parse().unwrap()
}

pub fn receiver_addr() -> SocketAddr {
    RECEIVER.parse().unwrap()
}

/// One-second receive window, three retries, near-zero backoff.
pub fn fast_config() -> SkiffConfig {
    let mut config = SkiffConfig::default();
    config.network.recv_timeout_secs = 1;
    config.network.max_retries = 3;
    config.network.retry_backoff_ms = 10;
    config.network.backoff = Backoff::Fixed;
    config
}

pub fn random_file(len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut data);
    Bytes::from(data)
}

/// Both halves of one transfer and whatever the receiver persisted.
pub struct Outcome {
    pub sent: Result<TransferReport, TransferError>,
    pub received: Result<TransferReport, TransferError>,
    pub written: Option<Bytes>,
}

/// Run sender and receiver concurrently until both finish.
pub async fn run_transfer<S, R>(
    sender: &S,
    receiver: &R,
    config: &SkiffConfig,
    file: Bytes,
) -> Outcome
where
    S: Transport,
    R: Transport,
{
    let s_addr = sender.local_addr().unwrap();
    let r_addr = receiver.local_addr().unwrap();
    let mut written = None;

    let (sent, received) = tokio::join!(
        send_file(sender, config, s_addr.into(), r_addr, file, |_| {}),
        receive_file(
            receiver,
            config,
            s_addr,
            |data| {
                written = Some(data);
                Ok(())
            },
            |_| {}
        ),
    );

    Outcome {
        sent,
        received,
        written,
    }
}
