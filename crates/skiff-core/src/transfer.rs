//! Drives a session over a [`Transport`].
//!
//! The loop is the only place that waits: it executes the session's
//! commands, then blocks on the next datagram for at most one receive
//! window. A window that elapses becomes [`Event::Timeout`] after the
//! backoff delay for that attempt.

use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::config::{RetryPolicy, SkiffConfig};
use crate::session::{
    Command, Event, Failure, Progress, ReceiverSession, SenderSession, Session,
};
use crate::transport::Transport;
use crate::wire::{Codec, PeerAddr, WireError};

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Failed(#[from] Failure),

    #[error("cannot frame message: {0}")]
    Wire(#[from] WireError),

    #[error("cannot resolve {addr}: {source}")]
    Resolve {
        addr: String,
        #[source]
        source: io::Error,
    },
}

impl TransferError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransferError::Failed(Failure::Timeout { .. }))
    }

    pub fn is_integrity_mismatch(&self) -> bool {
        matches!(
            self,
            TransferError::Failed(Failure::WholeFileIntegrityMismatch { .. })
        )
    }
}

/// Summary of a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    /// Chunks stored by the receiver, as counted by its own session or,
    /// on the sending side, as reported in its EOFPkt.
    pub chunks: u32,
    pub bytes: usize,
    /// Messages sent more than once, for any reason.
    pub retransmits: u64,
    pub elapsed: Duration,
}

/// Send `file` to `receiver`, announcing `local` as the sender address.
///
/// Returns once the receiver confirms the whole file with a matching EOFPkt.
pub async fn send_file<T, P>(
    transport: &T,
    config: &SkiffConfig,
    local: PeerAddr,
    receiver: SocketAddr,
    file: Bytes,
    progress: P,
) -> Result<TransferReport, TransferError>
where
    T: Transport,
    P: FnMut(Progress),
{
    let started = Instant::now();
    let policy = config.network.retry_policy();
    let bytes = file.len();
    let mut session = SenderSession::new(&config.protocol, policy.max_retries, local, receiver, file)?;

    tracing::info!(%receiver, bytes, chunks = session.chunk_count(), "starting send");
    let driver = Driver {
        codec: config.protocol.codec(),
        peer: receiver,
        policy,
        buf_len: config.network.effective_recv_buffer(),
    };
    driver
        .run(&mut session, transport, |_| Ok(()), progress)
        .await?;

    let chunks = session.receiver_count().unwrap_or(session.chunk_count());
    if chunks != session.chunk_count() {
        tracing::warn!(
            sent = session.chunk_count(),
            confirmed = chunks,
            "receiver counted a different number of chunks"
        );
    }

    Ok(TransferReport {
        chunks,
        bytes,
        retransmits: session.retransmits(),
        elapsed: started.elapsed(),
    })
}

/// Receive one file from `sender`, handing the verified bytes to `sink`
/// before the EOFPkt goes out.
pub async fn receive_file<T, W, P>(
    transport: &T,
    config: &SkiffConfig,
    sender: SocketAddr,
    mut sink: W,
    progress: P,
) -> Result<TransferReport, TransferError>
where
    T: Transport,
    W: FnMut(Bytes) -> io::Result<()>,
    P: FnMut(Progress),
{
    let started = Instant::now();
    let policy = config.network.retry_policy();
    let mut session = ReceiverSession::new(&config.protocol, policy.max_retries, sender);

    tracing::info!(%sender, "waiting for transfer");
    let driver = Driver {
        codec: config.protocol.codec(),
        peer: sender,
        policy,
        buf_len: config.network.effective_recv_buffer(),
    };
    let mut bytes = 0;
    driver
        .run(
            &mut session,
            transport,
            |file: Bytes| {
                bytes = file.len();
                sink(file)
            },
            progress,
        )
        .await?;

    Ok(TransferReport {
        chunks: session.progress().done,
        bytes,
        retransmits: session.retransmits(),
        elapsed: started.elapsed(),
    })
}

struct Driver {
    codec: Codec,
    peer: SocketAddr,
    policy: RetryPolicy,
    buf_len: usize,
}

impl Driver {
    async fn run<S, T, W, P>(
        &self,
        session: &mut S,
        transport: &T,
        mut write: W,
        mut progress: P,
    ) -> Result<(), TransferError>
    where
        S: Session,
        T: Transport,
        W: FnMut(Bytes) -> io::Result<()>,
        P: FnMut(Progress),
    {
        tracing::debug!(
            peer = %self.peer,
            magic = self.codec.magic(),
            buf_len = self.buf_len,
            "session started"
        );
        let mut buf = vec![0u8; self.buf_len];
        let mut commands = session.step(Event::Start);
        let mut deadline = tokio::time::Instant::now() + self.policy.recv_timeout;
        let mut last = None;

        loop {
            if !commands.is_empty() {
                deadline = tokio::time::Instant::now() + self.policy.recv_timeout;
            }
            for command in commands.drain(..) {
                match command {
                    Command::Send(msg) => {
                        let frame = self.codec.encode(&msg)?;
                        transport.send_to(&frame, self.peer).await?;
                        tracing::trace!(msg_type = ?msg.msg_type(), len = frame.len(), "sent");
                    }
                    Command::WriteFile(file) => write(file)?,
                }
            }

            let current = session.progress();
            if last != Some(current) {
                progress(current);
                last = Some(current);
            }
            if let Some(outcome) = session.outcome() {
                return outcome.map_err(TransferError::Failed);
            }

            commands = match tokio::time::timeout_at(deadline, transport.recv_from(&mut buf)).await {
                Ok(Ok((len, from))) => {
                    let out = session.step(Event::Datagram {
                        from,
                        bytes: &buf[..len],
                    });
                    // A valid message restarts the window even if it
                    // needs no reply.
                    if session.last_discard().is_none() {
                        deadline = tokio::time::Instant::now() + self.policy.recv_timeout;
                    }
                    out
                }
                // An ICMP error from an earlier send; the peer may not be up yet.
                Ok(Err(e)) if is_transient(&e) => {
                    tracing::debug!(error = %e, "transient receive error");
                    Vec::new()
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    let attempt = session.retries() + 1;
                    let delay = self.policy.delay(attempt);
                    tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "receive window elapsed");
                    tokio::time::sleep(delay).await;
                    deadline = tokio::time::Instant::now() + self.policy.recv_timeout;
                    session.step(Event::Timeout)
                }
            };
        }
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Backoff;
    use crate::digest::digest;
    use crate::transport::memory_pair;
    use crate::wire::{EofPkt, Message, SendAccept};

    fn fast_config() -> SkiffConfig {
        let mut config = SkiffConfig::default();
        config.network.recv_timeout_secs = 1;
        config.network.max_retries = 1;
        config.network.retry_backoff_ms = 1;
        config.network.backoff = Backoff::Fixed;
        config
    }

    fn addrs() -> (SocketAddr, SocketAddr) {
        (
            "127.0.0.1:7000".parse().unwrap(),
            "127.0.0.1:7001".parse().unwrap(),
        )
    }

    #[tokio::test]
    async fn memory_transfer_delivers_file() {
        let (s_addr, r_addr) = addrs();
        let (s_end, r_end) = memory_pair(s_addr, r_addr);
        let config = fast_config();
        let file = Bytes::from((0..2500u32).map(|i| i as u8).collect::<Vec<_>>());

        let mut written = None;
        let (sent, received) = tokio::join!(
            send_file(&s_end, &config, s_addr.into(), r_addr, file.clone(), |_| {}),
            receive_file(
                &r_end,
                &config,
                s_addr,
                |data| {
                    written = Some(data);
                    Ok(())
                },
                |_| {}
            ),
        );

        let sent = sent.unwrap();
        let received = received.unwrap();
        assert_eq!(sent.chunks, 3);
        assert_eq!(received.chunks, 3);
        assert_eq!(received.bytes, 2500);
        assert_eq!(written, Some(file));
    }

    #[tokio::test]
    async fn progress_reports_each_chunk_once() {
        let (s_addr, r_addr) = addrs();
        let (s_end, r_end) = memory_pair(s_addr, r_addr);
        let config = fast_config();
        let file = Bytes::from(vec![7u8; 3000]);

        let mut seen = Vec::new();
        let (sent, received) = tokio::join!(
            send_file(&s_end, &config, s_addr.into(), r_addr, file, |p| seen.push(p)),
            receive_file(&r_end, &config, s_addr, |_| Ok(()), |_| {}),
        );
        sent.unwrap();
        received.unwrap();

        let done: Vec<u32> = seen.iter().map(|p| p.done).collect();
        assert_eq!(done, vec![0, 1, 2, 3]);
        assert!(seen.iter().all(|p| p.total == 3));
    }

    #[tokio::test(start_paused = true)]
    async fn send_report_uses_receiver_count() {
        let (s_addr, r_addr) = addrs();
        let (s_end, r_end) = memory_pair(s_addr, r_addr);
        let config = fast_config();
        let codec = config.protocol.codec();

        let peer = async {
            let mut buf = vec![0u8; config.network.effective_recv_buffer()];
            let (len, _) = r_end.recv_from(&mut buf).await.unwrap();
            let Ok(Message::SendReq(req)) = codec.decode(&buf[..len]) else {
                panic!("expected SendReq");
            };
            let accept = codec
                .encode(&Message::SendAccept(SendAccept { addr: req.addr }))
                .unwrap();
            r_end.send_to(&accept, s_addr).await.unwrap();

            r_end.recv_from(&mut buf).await.unwrap();
            let eof = codec
                .encode(&Message::EofPkt(EofPkt::new(7, &digest(b"abc"))))
                .unwrap();
            r_end.send_to(&eof, s_addr).await.unwrap();
        };
        let (sent, ()) = tokio::join!(
            send_file(&s_end, &config, s_addr.into(), r_addr, Bytes::from_static(b"abc"), |_| {}),
            peer,
        );

        assert_eq!(sent.unwrap().chunks, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_times_out() {
        let (s_addr, r_addr) = addrs();
        let (s_end, _r_end) = memory_pair(s_addr, r_addr);
        let config = fast_config();

        let err = send_file(&s_end, &config, s_addr.into(), r_addr, Bytes::from_static(b"x"), |_| {})
            .await
            .unwrap_err();
        assert!(err.is_timeout(), "got {err}");
    }

    #[tokio::test(start_paused = true)]
    async fn sink_error_aborts_receive() {
        let (s_addr, r_addr) = addrs();
        let (s_end, r_end) = memory_pair(s_addr, r_addr);
        let config = fast_config();

        let (_, received) = tokio::join!(
            send_file(&s_end, &config, s_addr.into(), r_addr, Bytes::from_static(b"abc"), |_| {}),
            receive_file(
                &r_end,
                &config,
                s_addr,
                |_| Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only")),
                |_| {}
            ),
        );
        assert!(matches!(received, Err(TransferError::Io(_))));
    }
}
