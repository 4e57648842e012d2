//! skiff-core: wire format, integrity checks, and the sender/receiver
//! state machines for single-file transfers over UDP.
//! The `skiff` binary and the integration tests depend on this crate.

pub mod chunk;
pub mod config;
pub mod digest;
pub mod session;
pub mod transfer;
pub mod transport;
pub mod wire;

pub use config::{ProtocolConfig, RetryPolicy, SkiffConfig};
pub use session::{Command, Event, Failure, Progress, ReceiverSession, SenderSession, Session};
pub use transfer::{receive_file, send_file, TransferError, TransferReport};
pub use transport::{memory_pair, MemoryTransport, Transport, UdpTransport};
pub use wire::{Codec, Message, MsgType, PeerAddr, WireError};
