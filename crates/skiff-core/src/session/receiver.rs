//! Receiver state machine.
//!
//! ```text
//! AwaitingRequest ──SendReq──▶ SendingAccept ──▶ AwaitingChunk ◀──┐
//!                                                     │ FilePkt   │
//!                                                     ▼           │
//!                                               SendingChunkAck ──┘
//!                                                     │ last chunk
//!                                                     ▼
//!                                               Done | Failed
//! ```
//!
//! The last chunk is never acked on its own: the EOFPkt answers it once the
//! whole file verifies, and nothing answers it if verification fails.

use std::net::SocketAddr;

use bytes::Bytes;

use super::{Command, Discard, Event, Failure, Progress, Retransmitter, Session};
use crate::chunk::ChunkBuffer;
use crate::config::ProtocolConfig;
use crate::digest;
use crate::wire::{Codec, EofPkt, FilePktAck, Message, PeerAddr, SendAccept, SendReq};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverState {
    AwaitingRequest,
    SendingAccept,
    AwaitingChunk,
    SendingChunkAck { chunk_no: u32 },
    Done,
    Failed(Failure),
}

/// What the sender announced in its SendReq.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferMetadata {
    pub peer: PeerAddr,
    pub chunk_count: u32,
    pub checksum: Bytes,
}

impl TransferMetadata {
    fn same_transfer(&self, req: &SendReq) -> bool {
        self.chunk_count == req.chunk_count && self.checksum == req.checksum
    }
}

impl From<SendReq> for TransferMetadata {
    fn from(req: SendReq) -> Self {
        Self {
            peer: req.addr,
            chunk_count: req.chunk_count,
            checksum: req.checksum,
        }
    }
}

pub struct ReceiverSession {
    codec: Codec,
    /// Only datagrams from here are considered.
    sender: SocketAddr,
    max_chunks: u32,
    metadata: Option<TransferMetadata>,
    chunks: ChunkBuffer,
    state: ReceiverState,
    tx: Retransmitter,
    last_discard: Option<Discard>,
}

impl ReceiverSession {
    pub fn new(protocol: &ProtocolConfig, max_retries: u32, sender: SocketAddr) -> Self {
        Self {
            codec: protocol.codec(),
            sender,
            max_chunks: protocol.max_chunks,
            metadata: None,
            chunks: ChunkBuffer::default(),
            state: ReceiverState::AwaitingRequest,
            tx: Retransmitter::new(max_retries),
            last_discard: None,
        }
    }

    pub fn state(&self) -> &ReceiverState {
        &self.state
    }

    /// `None` until a SendReq has been accepted.
    pub fn metadata(&self) -> Option<&TransferMetadata> {
        self.metadata.as_ref()
    }

    pub fn last_discard(&self) -> Option<&Discard> {
        self.last_discard.as_ref()
    }

    pub fn retransmits(&self) -> u64 {
        self.tx.retransmits()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, ReceiverState::Done | ReceiverState::Failed(_))
    }

    pub fn step(&mut self, event: Event<'_>) -> Vec<Command> {
        let mut out = Vec::new();
        if self.is_terminal() {
            return out;
        }
        self.last_discard = None;

        match event {
            Event::Start => {}
            Event::Datagram { from, bytes } => {
                if let Err(discard) = self.handle(from, bytes) {
                    tracing::debug!(%from, reason = %discard, state = ?self.state, "datagram discarded");
                    self.last_discard = Some(discard);
                }
            }
            Event::Timeout => {
                if let Err(failure) = self.tx.on_timeout(&mut out) {
                    tracing::warn!(error = %failure, "receiver giving up");
                    self.state = ReceiverState::Failed(failure);
                }
            }
        }

        self.run_actions(&mut out);
        out
    }

    fn handle(&mut self, from: SocketAddr, bytes: &[u8]) -> Result<(), Discard> {
        if from != self.sender {
            return Err(Discard::ForeignSender(from));
        }
        let msg = self.codec.decode(bytes)?;

        match (&self.state, msg) {
            (ReceiverState::AwaitingRequest, Message::SendReq(req)) => {
                if req.chunk_count > self.max_chunks {
                    return Err(Discard::TooManyChunks {
                        chunk_count: req.chunk_count,
                        max: self.max_chunks,
                    });
                }
                tracing::info!(
                    peer = %req.addr,
                    chunks = req.chunk_count,
                    checksum = hex::encode(&req.checksum),
                    "transfer requested"
                );
                self.chunks = ChunkBuffer::new(req.chunk_count as usize);
                self.metadata = Some(req.into());
                self.tx.progressed();
                self.state = ReceiverState::SendingAccept;
                Ok(())
            }

            // Our SendAccept was lost; the sender is repeating its request.
            (ReceiverState::AwaitingChunk, Message::SendReq(req))
                if self.chunks.received() == 0
                    && self.metadata.as_ref().is_some_and(|m| m.same_transfer(&req)) =>
            {
                tracing::debug!("repeated request, re-sending accept");
                self.tx.count_retransmit();
                self.state = ReceiverState::SendingAccept;
                Ok(())
            }

            (ReceiverState::AwaitingChunk, Message::FilePkt(pkt)) => {
                let chunk_count = self.chunks.len() as u32;
                if self.chunks.insert(pkt.chunk_no as usize, pkt.data).is_err() {
                    return Err(Discard::ChunkOutOfRange {
                        chunk_no: pkt.chunk_no,
                        chunk_count,
                    });
                }
                tracing::trace!(chunk_no = pkt.chunk_no, "chunk stored");
                self.tx.progressed();
                self.state = ReceiverState::SendingChunkAck {
                    chunk_no: pkt.chunk_no,
                };
                Ok(())
            }

            (_, other) => Err(Discard::UnexpectedMessage(other.msg_type())),
        }
    }

    fn run_actions(&mut self, out: &mut Vec<Command>) {
        loop {
            match self.state {
                ReceiverState::SendingAccept => {
                    let Some(meta) = self.metadata.as_ref() else {
                        self.state = ReceiverState::AwaitingRequest;
                        return;
                    };
                    let accept = SendAccept {
                        addr: meta.peer.clone(),
                    };
                    let empty = meta.chunk_count == 0;
                    self.tx.send(Message::SendAccept(accept), out);
                    self.state = ReceiverState::AwaitingChunk;
                    if empty {
                        self.finish(out);
                    }
                }
                ReceiverState::SendingChunkAck { chunk_no } => {
                    self.state = ReceiverState::AwaitingChunk;
                    if chunk_no as usize + 1 == self.chunks.len() {
                        self.finish(out);
                    } else if let Some(data) = self.chunks.get(chunk_no as usize) {
                        let ack = FilePktAck::for_chunk(chunk_no, data);
                        self.tx.send(Message::FilePktAck(ack), out);
                    }
                }
                _ => return,
            }
        }
    }

    /// Reassemble, verify, and either deliver the file or fail.
    fn finish(&mut self, out: &mut Vec<Command>) {
        let Some(meta) = self.metadata.as_ref() else {
            return;
        };
        let actual = self.chunks.digest();

        if !digest::matches(&meta.checksum, &actual) {
            let failure = Failure::WholeFileIntegrityMismatch {
                expected: hex::encode(&meta.checksum),
                actual: hex::encode(actual),
            };
            tracing::warn!(
                error = %failure,
                missing = self.chunks.missing().count(),
                "reassembled file does not match"
            );
            self.state = ReceiverState::Failed(failure);
            return;
        }

        let file = self.chunks.assemble();
        let received = self.chunks.received() as u32;
        tracing::info!(
            bytes = file.len(),
            chunks = received,
            checksum = hex::encode(actual),
            "file verified"
        );
        out.push(Command::WriteFile(file));
        self.tx.send(Message::EofPkt(EofPkt::new(received, &actual)), out);
        self.state = ReceiverState::Done;
    }
}

impl Session for ReceiverSession {
    fn step(&mut self, event: Event<'_>) -> Vec<Command> {
        ReceiverSession::step(self, event)
    }

    fn outcome(&self) -> Option<Result<(), Failure>> {
        match &self.state {
            ReceiverState::Done => Some(Ok(())),
            ReceiverState::Failed(failure) => Some(Err(failure.clone())),
            _ => None,
        }
    }

    fn retries(&self) -> u32 {
        self.tx.retries()
    }

    fn progress(&self) -> Progress {
        Progress {
            done: self.chunks.received() as u32,
            total: self.chunks.len() as u32,
        }
    }

    fn last_discard(&self) -> Option<&Discard> {
        self.last_discard.as_ref()
    }
}
