//! Sender state machine.
//!
//! ```text
//! SendingRequest ──▶ AwaitingAccept ──SendAccept──▶ SendingChunk ◀──┐
//!                                                       │           │ matching ack
//!                                                       ▼           │ or bad digest
//!                                                 AwaitingChunkAck ─┘
//!                                                       │ EOFPkt
//!                                                       ▼
//!                                                 Done | Failed
//! ```
//!
//! Stop-and-wait: exactly one FilePkt is outstanding at a time. Only an
//! EOFPkt ends the session; acknowledging every chunk is not enough.

use std::net::SocketAddr;

use bytes::Bytes;

use super::{Command, Discard, Event, Failure, Progress, Retransmitter, Session};
use crate::chunk::{chunk_count, split};
use crate::config::ProtocolConfig;
use crate::digest::{self, digest, Digest};
use crate::wire::{Codec, FilePkt, Message, PeerAddr, SendReq, WireError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderState {
    SendingRequest,
    AwaitingAccept,
    SendingChunk { index: u32 },
    /// Waiting on the ack for `index`. The receiver answers the last chunk
    /// with an EOFPkt instead of an ack, so an EOFPkt is accepted here too.
    /// `index` equals the chunk count only for an empty file.
    AwaitingChunkAck { index: u32 },
    Done,
    Failed(Failure),
}

pub struct SenderSession {
    codec: Codec,
    /// Address announced in SendReq.
    local: PeerAddr,
    /// Only datagrams from here are considered.
    receiver: SocketAddr,
    file: Bytes,
    chunk_size: usize,
    chunk_count: u32,
    chunks: Vec<Bytes>,
    file_checksum: Digest,
    /// Digest of the outstanding chunk.
    chunk_checksum: Digest,
    state: SenderState,
    tx: Retransmitter,
    last_discard: Option<Discard>,
    receiver_count: Option<u32>,
}

impl SenderSession {
    /// Prepare to send `file` from `local` to `receiver`.
    ///
    /// Fails if the file needs more than `protocol.max_chunks` chunks.
    pub fn new(
        protocol: &ProtocolConfig,
        max_retries: u32,
        local: PeerAddr,
        receiver: SocketAddr,
        file: Bytes,
    ) -> Result<Self, WireError> {
        let chunk_size = protocol.effective_chunk_size();
        let count = chunk_count(file.len(), chunk_size);
        let chunk_count = u32::try_from(count)
            .ok()
            .filter(|&n| n <= protocol.max_chunks)
            .ok_or(WireError::FieldTooLarge {
                field: "chunk count",
                len: count,
                max: protocol.max_chunks as usize,
            })?;

        Ok(Self {
            codec: protocol.codec(),
            local,
            receiver,
            file,
            chunk_size,
            chunk_count,
            chunks: Vec::new(),
            file_checksum: [0u8; digest::DIGEST_LEN],
            chunk_checksum: [0u8; digest::DIGEST_LEN],
            state: SenderState::SendingRequest,
            tx: Retransmitter::new(max_retries),
            last_discard: None,
            receiver_count: None,
        })
    }

    pub fn state(&self) -> &SenderState {
        &self.state
    }

    pub fn chunk_count(&self) -> u32 {
        self.chunk_count
    }

    /// Reason the most recent datagram was ignored, if it was.
    pub fn last_discard(&self) -> Option<&Discard> {
        self.last_discard.as_ref()
    }

    /// Chunk count reported by the receiver's EOFPkt.
    pub fn receiver_count(&self) -> Option<u32> {
        self.receiver_count
    }

    pub fn retransmits(&self) -> u64 {
        self.tx.retransmits()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, SenderState::Done | SenderState::Failed(_))
    }

    pub fn step(&mut self, event: Event<'_>) -> Vec<Command> {
        let mut out = Vec::new();
        if self.is_terminal() {
            return out;
        }
        self.last_discard = None;

        match event {
            Event::Start => {}
            Event::Datagram { from, bytes } => self.on_datagram(from, bytes),
            Event::Timeout => {
                if let Err(failure) = self.tx.on_timeout(&mut out) {
                    tracing::warn!(error = %failure, "sender giving up");
                    self.state = SenderState::Failed(failure);
                }
            }
        }

        self.run_actions(&mut out);
        out
    }

    fn on_datagram(&mut self, from: SocketAddr, bytes: &[u8]) {
        if let Err(discard) = self.handle(from, bytes) {
            tracing::debug!(%from, reason = %discard, state = ?self.state, "datagram discarded");
            self.last_discard = Some(discard);
        }
    }

    fn handle(&mut self, from: SocketAddr, bytes: &[u8]) -> Result<(), Discard> {
        if from != self.receiver {
            return Err(Discard::ForeignSender(from));
        }
        let msg = self.codec.decode(bytes)?;

        match (&self.state, msg) {
            (SenderState::AwaitingAccept, Message::SendAccept(accept)) => {
                tracing::info!(peer = %self.receiver, addr = %accept.addr, "transfer accepted");
                self.tx.progressed();
                self.state = if self.chunk_count == 0 {
                    SenderState::AwaitingChunkAck { index: 0 }
                } else {
                    SenderState::SendingChunk { index: 0 }
                };
                Ok(())
            }

            (&SenderState::AwaitingChunkAck { index }, Message::FilePktAck(ack)) => {
                if ack.chunk_no != index {
                    return Err(Discard::StaleAck {
                        got: ack.chunk_no,
                        outstanding: index,
                    });
                }
                if digest::matches(&ack.checksum, &self.chunk_checksum) {
                    tracing::trace!(chunk_no = index, "chunk acknowledged");
                    self.tx.progressed();
                    let next = index + 1;
                    self.state = if next < self.chunk_count {
                        SenderState::SendingChunk { index: next }
                    } else {
                        tracing::debug!("last chunk acknowledged, awaiting EOF");
                        SenderState::AwaitingChunkAck { index: next }
                    };
                } else {
                    tracing::warn!(
                        chunk_no = index,
                        expected = hex::encode(self.chunk_checksum),
                        got = hex::encode(&ack.checksum),
                        "chunk digest mismatch, retransmitting"
                    );
                    self.tx.count_retransmit();
                    self.state = SenderState::SendingChunk { index };
                }
                Ok(())
            }

            (SenderState::AwaitingChunkAck { .. }, Message::EofPkt(eof)) => {
                self.receiver_count = Some(eof.chunks_received);
                if digest::matches(&eof.checksum, &self.file_checksum) {
                    tracing::info!(
                        chunks = eof.chunks_received,
                        checksum = hex::encode(self.file_checksum),
                        "receiver confirmed file"
                    );
                    self.state = SenderState::Done;
                } else {
                    let failure = Failure::WholeFileIntegrityMismatch {
                        expected: hex::encode(self.file_checksum),
                        actual: hex::encode(&eof.checksum),
                    };
                    tracing::warn!(error = %failure, "receiver reported a different file");
                    self.state = SenderState::Failed(failure);
                }
                Ok(())
            }

            (_, other) => Err(Discard::UnexpectedMessage(other.msg_type())),
        }
    }

    /// Execute `Sending*` states until the session waits or terminates.
    fn run_actions(&mut self, out: &mut Vec<Command>) {
        loop {
            match self.state {
                SenderState::SendingRequest => {
                    let req = SendReq::for_file(self.local.clone(), self.chunk_count, &self.file);
                    self.file_checksum.copy_from_slice(&req.checksum);
                    self.chunks = split(&self.file, self.chunk_size);
                    tracing::info!(
                        peer = %self.receiver,
                        bytes = self.file.len(),
                        chunks = self.chunk_count,
                        checksum = hex::encode(self.file_checksum),
                        "sending request"
                    );
                    self.tx.send(Message::SendReq(req), out);
                    self.state = SenderState::AwaitingAccept;
                }
                SenderState::SendingChunk { index } => {
                    let data = self.chunks.get(index as usize).cloned().unwrap_or_default();
                    self.chunk_checksum = digest(&data);
                    tracing::trace!(chunk_no = index, len = data.len(), "sending chunk");
                    let pkt = FilePkt {
                        chunk_no: index,
                        data,
                    };
                    self.tx.send(Message::FilePkt(pkt), out);
                    self.state = SenderState::AwaitingChunkAck { index };
                }
                _ => return,
            }
        }
    }
}

impl Session for SenderSession {
    fn step(&mut self, event: Event<'_>) -> Vec<Command> {
        SenderSession::step(self, event)
    }

    fn outcome(&self) -> Option<Result<(), Failure>> {
        match &self.state {
            SenderState::Done => Some(Ok(())),
            SenderState::Failed(failure) => Some(Err(failure.clone())),
            _ => None,
        }
    }

    fn retries(&self) -> u32 {
        self.tx.retries()
    }

    fn progress(&self) -> Progress {
        let done = match self.state {
            SenderState::SendingChunk { index } | SenderState::AwaitingChunkAck { index } => index,
            SenderState::Done => self.chunk_count,
            _ => 0,
        };
        Progress {
            done,
            total: self.chunk_count,
        }
    }

    fn last_discard(&self) -> Option<&Discard> {
        self.last_discard.as_ref()
    }
}
