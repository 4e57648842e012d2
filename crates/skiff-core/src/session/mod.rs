//! Sender and receiver state machines.
//!
//! Neither machine touches a socket or a file. The driver in
//! [`crate::transfer`] feeds each [`Event`] into `step`, then carries out
//! the returned [`Command`]s in order. That keeps every transition testable
//! with plain byte slices.
//!
//! After `step` returns, a session rests in an awaiting state or a terminal
//! one; the `Sending*` states are entered and executed inside the step.
//! Once terminal, a session ignores all further events.

use std::net::SocketAddr;

use bytes::Bytes;

use crate::wire::{Message, MsgType, WireError};

pub mod receiver;
pub mod sender;

pub use receiver::{ReceiverSession, ReceiverState, TransferMetadata};
pub use sender::{SenderSession, SenderState};

/// Input to a state machine.
#[derive(Debug, Clone, Copy)]
pub enum Event<'a> {
    /// Kick off the session. Only the sender acts on it.
    Start,
    /// A datagram arrived from `from`.
    Datagram { from: SocketAddr, bytes: &'a [u8] },
    /// The receive window elapsed with nothing arriving.
    Timeout,
}

/// Output of a state machine, carried out by the driver in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Encode and send to the peer.
    Send(Message),
    /// Persist the reassembled file. Always precedes the EOFPkt send.
    WriteFile(Bytes),
}

/// How a session ended badly.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Failure {
    #[error("no reply from peer after {attempts} timeouts")]
    Timeout { attempts: u32 },

    #[error("whole-file checksum mismatch: expected {expected}, got {actual}")]
    WholeFileIntegrityMismatch { expected: String, actual: String },
}

/// Why a datagram was ignored. The session state is unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Discard {
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] WireError),

    #[error("datagram from foreign sender {0}")]
    ForeignSender(SocketAddr),

    #[error("unexpected {0:?} in current state")]
    UnexpectedMessage(MsgType),

    #[error("stale ack for chunk {got}, chunk {outstanding} is outstanding")]
    StaleAck { got: u32, outstanding: u32 },

    #[error("chunk {chunk_no} out of range for a {chunk_count}-chunk transfer")]
    ChunkOutOfRange { chunk_no: u32, chunk_count: u32 },

    #[error("request for {chunk_count} chunks exceeds the limit of {max}")]
    TooManyChunks { chunk_count: u32, max: u32 },
}

/// Chunks completed out of total, for progress display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    pub done: u32,
    pub total: u32,
}

/// What the driver needs from either side.
pub trait Session {
    fn step(&mut self, event: Event<'_>) -> Vec<Command>;

    /// `Some` once the session is terminal.
    fn outcome(&self) -> Option<Result<(), Failure>>;

    /// Consecutive timeouts since the last state-advancing message.
    fn retries(&self) -> u32;

    fn progress(&self) -> Progress;

    /// Why the datagram handed to the last `step` was ignored, if it was.
    fn last_discard(&self) -> Option<&Discard>;
}

// ── Retransmission bookkeeping ────────────────────────────────────────────────

/// Remembers the last message sent so a timeout can repeat it, and counts
/// consecutive timeouts against the retry budget.
#[derive(Debug)]
pub(crate) struct Retransmitter {
    last_sent: Option<Message>,
    retries: u32,
    max_retries: u32,
    retransmits: u64,
}

impl Retransmitter {
    pub(crate) fn new(max_retries: u32) -> Self {
        Self {
            last_sent: None,
            retries: 0,
            max_retries,
            retransmits: 0,
        }
    }

    pub(crate) fn send(&mut self, msg: Message, out: &mut Vec<Command>) {
        self.last_sent = Some(msg.clone());
        out.push(Command::Send(msg));
    }

    /// A valid message moved the session forward.
    pub(crate) fn progressed(&mut self) {
        self.retries = 0;
    }

    /// Count a resend that was not caused by a timeout.
    pub(crate) fn count_retransmit(&mut self) {
        self.retransmits += 1;
    }

    /// Repeat the last message, or fail once the budget is spent.
    pub(crate) fn on_timeout(&mut self, out: &mut Vec<Command>) -> Result<(), Failure> {
        self.retries += 1;
        if self.retries > self.max_retries {
            return Err(Failure::Timeout {
                attempts: self.retries,
            });
        }
        if let Some(msg) = &self.last_sent {
            tracing::warn!(
                msg_type = ?msg.msg_type(),
                attempt = self.retries,
                max = self.max_retries,
                "no reply, retransmitting"
            );
            self.retransmits += 1;
            out.push(Command::Send(msg.clone()));
        } else {
            tracing::debug!(attempt = self.retries, max = self.max_retries, "still waiting");
        }
        Ok(())
    }

    pub(crate) fn retries(&self) -> u32 {
        self.retries
    }

    pub(crate) fn retransmits(&self) -> u64 {
        self.retransmits
    }
}
