//! skiff wire format: the five messages exchanged by sender and receiver.
//!
//! These types ARE the protocol. Every frame is a 6-byte header followed by
//! a variant-specific payload. All integers are little-endian.
//!
//! ```text
//!  0        1        2                                   6
//! +--------+--------+--------+--------+--------+--------+-------------
//! | magic  |  type  |      payload length (u32 LE)      | payload ...
//! +--------+--------+--------+--------+--------+--------+-------------
//! ```
//!
//! | Type | Payload |
//! |------|---------|
//! | 1 SendReq    | chunk_count u32, addr_offset u8, addr_len u8, checksum_offset u8, checksum_len u8, blob_len u32, blob |
//! | 2 SendAccept | addr_len u8, addr |
//! | 3 FilePkt    | chunk_no u32, chunk_len u32, chunk bytes |
//! | 4 FilePktAck | chunk_no u32, checksum_len u32, checksum |
//! | 5 EOFPkt     | chunks_received u32, checksum_len u8, checksum |
//!
//! The fixed-size leading fields are #[repr(C, packed)] zerocopy structs;
//! the variable tail follows directly. There is no unsafe code here.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::chunk::CHUNK_SIZE;
use crate::digest::{digest, Digest};

type U32Le = U32<LittleEndian>;

// ── Frame header ──────────────────────────────────────────────────────────────

/// Leading bytes of every frame.
///
/// Wire size: 6 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct FrameHeader {
    /// Must equal the codec's magic byte. Anything else is dropped unread.
    pub magic: u8,
    /// One of the [`MsgType`] codes.
    pub msg_type: u8,
    /// Payload bytes following the header.
    pub payload_len: U32Le,
}

assert_eq_size!(FrameHeader, [u8; HEADER_LEN]);

// ── Fixed payload prefixes ────────────────────────────────────────────────────

/// SendReq fields ahead of the address/checksum blob.
/// Offsets are relative to the start of the blob.
///
/// Wire size: 12 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct SendReqFields {
    pub chunk_count: U32Le,
    pub addr_offset: u8,
    pub addr_len: u8,
    pub checksum_offset: u8,
    pub checksum_len: u8,
    pub blob_len: U32Le,
}

assert_eq_size!(SendReqFields, [u8; 12]);

/// Wire size: 8 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct FilePktFields {
    pub chunk_no: U32Le,
    pub chunk_len: U32Le,
}

assert_eq_size!(FilePktFields, [u8; 8]);

/// Wire size: 8 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct FilePktAckFields {
    pub chunk_no: U32Le,
    pub checksum_len: U32Le,
}

assert_eq_size!(FilePktAckFields, [u8; 8]);

/// Wire size: 5 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct EofPktFields {
    pub chunks_received: U32Le,
    pub checksum_len: u8,
}

assert_eq_size!(EofPktFields, [u8; 5]);

// ── Constants ─────────────────────────────────────────────────────────────────

/// Magic byte used when no other value is configured.
pub const DEFAULT_MAGIC: u8 = 0x1a;

/// Frame header length in bytes.
pub const HEADER_LEN: usize = 6;

/// Largest frame the protocol produces: a FilePkt carrying a full chunk.
pub const MAX_FRAME_LEN: usize = HEADER_LEN + std::mem::size_of::<FilePktFields>() + CHUNK_SIZE;

// ── Message type ──────────────────────────────────────────────────────────────

/// Message type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsgType {
    SendReq = 1,
    SendAccept = 2,
    FilePkt = 3,
    FilePktAck = 4,
    EofPkt = 5,
}

impl TryFrom<u8> for MsgType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MsgType::SendReq),
            2 => Ok(MsgType::SendAccept),
            3 => Ok(MsgType::FilePkt),
            4 => Ok(MsgType::FilePktAck),
            5 => Ok(MsgType::EofPkt),
            other => Err(WireError::UnknownType(other)),
        }
    }
}

impl From<MsgType> for u8 {
    fn from(t: MsgType) -> u8 {
        t as u8
    }
}

// ── Peer address ──────────────────────────────────────────────────────────────

/// A `host:port` pair as carried on the wire in UTF-8 text form.
///
/// Parsing splits on the last colon, so bare IPv6 literals work; a
/// bracketed host (`[::1]:9000`) has its brackets stripped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerAddr {
    pub host: String,
    pub port: u16,
}

impl PeerAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl FromStr for PeerAddr {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || WireError::BadAddress(s.to_string());
        let (host, port) = s.rsplit_once(':').ok_or_else(bad)?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(bad());
        }
        let port = port.parse().map_err(|_| bad())?;
        Ok(Self::new(host, port))
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl From<SocketAddr> for PeerAddr {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

// ── Messages ──────────────────────────────────────────────────────────────────

/// Sender → receiver: offer a file of `chunk_count` chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReq {
    pub chunk_count: u32,
    /// The sender's own address.
    pub addr: PeerAddr,
    /// Whole-file digest.
    pub checksum: Bytes,
}

impl SendReq {
    /// Build a request for `file`, computing its whole-file digest.
    pub fn for_file(addr: PeerAddr, chunk_count: u32, file: &[u8]) -> Self {
        Self {
            chunk_count,
            addr,
            checksum: Bytes::copy_from_slice(&digest(file)),
        }
    }
}

/// Receiver → sender: the request is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendAccept {
    /// The sender's address, echoed back.
    pub addr: PeerAddr,
}

/// Sender → receiver: one chunk of file data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePkt {
    pub chunk_no: u32,
    pub data: Bytes,
}

/// Receiver → sender: chunk `chunk_no` arrived with this digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePktAck {
    pub chunk_no: u32,
    pub checksum: Bytes,
}

impl FilePktAck {
    pub fn for_chunk(chunk_no: u32, data: &[u8]) -> Self {
        Self {
            chunk_no,
            checksum: Bytes::copy_from_slice(&digest(data)),
        }
    }
}

/// Receiver → sender: the file is reassembled and verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EofPkt {
    pub chunks_received: u32,
    /// Whole-file digest recomputed from the reassembled data.
    pub checksum: Bytes,
}

impl EofPkt {
    pub fn new(chunks_received: u32, checksum: &Digest) -> Self {
        Self {
            chunks_received,
            checksum: Bytes::copy_from_slice(checksum),
        }
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    SendReq(SendReq),
    SendAccept(SendAccept),
    FilePkt(FilePkt),
    FilePktAck(FilePktAck),
    EofPkt(EofPkt),
}

impl Message {
    pub fn msg_type(&self) -> MsgType {
        match self {
            Message::SendReq(_) => MsgType::SendReq,
            Message::SendAccept(_) => MsgType::SendAccept,
            Message::FilePkt(_) => MsgType::FilePkt,
            Message::FilePktAck(_) => MsgType::FilePktAck,
            Message::EofPkt(_) => MsgType::EofPkt,
        }
    }
}

// ── Codec ─────────────────────────────────────────────────────────────────────

/// Encodes and decodes frames for one magic byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Codec {
    magic: u8,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(DEFAULT_MAGIC)
    }
}

impl Codec {
    pub fn new(magic: u8) -> Self {
        Self { magic }
    }

    pub fn magic(&self) -> u8 {
        self.magic
    }

    /// Encode `msg` into a complete frame: magic, type, length, payload.
    ///
    /// Fails only when a variable-length field cannot be described by its
    /// length field (an address over 255 bytes, for instance).
    pub fn encode(&self, msg: &Message) -> Result<Bytes, WireError> {
        let payload = encode_payload(msg)?;
        let header = FrameHeader {
            magic: self.magic,
            msg_type: msg.msg_type().into(),
            payload_len: U32Le::new(len_u32("payload", payload.len())?),
        };

        let mut frame = BytesMut::with_capacity(HEADER_LEN + payload.len());
        frame.put_slice(header.as_bytes());
        frame.put_slice(&payload);
        Ok(frame.freeze())
    }

    /// Decode one frame.
    ///
    /// The magic byte is checked before anything else, so a foreign
    /// datagram is rejected regardless of its length or content. Bytes
    /// past the declared payload length are ignored.
    pub fn decode(&self, buf: &[u8]) -> Result<Message, WireError> {
        match buf.first() {
            None => return Err(WireError::TooShort(0)),
            Some(&m) if m != self.magic => return Err(WireError::BadMagic(m)),
            Some(_) => {}
        }

        let header = FrameHeader::read_from_prefix(buf).ok_or(WireError::TooShort(buf.len()))?;
        let msg_type = MsgType::try_from(header.msg_type)?;

        let declared = header.payload_len.get() as usize;
        let available = buf.len() - HEADER_LEN;
        if declared > available {
            return Err(WireError::Truncated {
                what: "payload",
                declared,
                available,
            });
        }
        let payload = &buf[HEADER_LEN..HEADER_LEN + declared];

        match msg_type {
            MsgType::SendReq => decode_send_req(payload).map(Message::SendReq),
            MsgType::SendAccept => decode_send_accept(payload).map(Message::SendAccept),
            MsgType::FilePkt => decode_file_pkt(payload).map(Message::FilePkt),
            MsgType::FilePktAck => decode_file_pkt_ack(payload).map(Message::FilePktAck),
            MsgType::EofPkt => decode_eof_pkt(payload).map(Message::EofPkt),
        }
    }
}

// ── Encoding ──────────────────────────────────────────────────────────────────

fn encode_payload(msg: &Message) -> Result<BytesMut, WireError> {
    let mut buf = BytesMut::new();
    match msg {
        Message::SendReq(req) => {
            let addr = req.addr.to_string();
            let addr_len = len_u8("address", addr.len())?;
            let checksum_len = len_u8("checksum", req.checksum.len())?;
            let blob_len = addr.len() + req.checksum.len();
            let fields = SendReqFields {
                chunk_count: U32Le::new(req.chunk_count),
                addr_offset: 0,
                addr_len,
                checksum_offset: addr_len,
                checksum_len,
                blob_len: U32Le::new(len_u32("blob", blob_len)?),
            };
            buf.reserve(std::mem::size_of::<SendReqFields>() + blob_len);
            buf.put_slice(fields.as_bytes());
            buf.put_slice(addr.as_bytes());
            buf.put_slice(&req.checksum);
        }
        Message::SendAccept(accept) => {
            let addr = accept.addr.to_string();
            buf.put_u8(len_u8("address", addr.len())?);
            buf.put_slice(addr.as_bytes());
        }
        Message::FilePkt(pkt) => {
            let fields = FilePktFields {
                chunk_no: U32Le::new(pkt.chunk_no),
                chunk_len: U32Le::new(len_u32("chunk", pkt.data.len())?),
            };
            buf.reserve(std::mem::size_of::<FilePktFields>() + pkt.data.len());
            buf.put_slice(fields.as_bytes());
            buf.put_slice(&pkt.data);
        }
        Message::FilePktAck(ack) => {
            let fields = FilePktAckFields {
                chunk_no: U32Le::new(ack.chunk_no),
                checksum_len: U32Le::new(len_u32("checksum", ack.checksum.len())?),
            };
            buf.put_slice(fields.as_bytes());
            buf.put_slice(&ack.checksum);
        }
        Message::EofPkt(eof) => {
            let fields = EofPktFields {
                chunks_received: U32Le::new(eof.chunks_received),
                checksum_len: len_u8("checksum", eof.checksum.len())?,
            };
            buf.put_slice(fields.as_bytes());
            buf.put_slice(&eof.checksum);
        }
    }
    Ok(buf)
}

fn len_u8(field: &'static str, len: usize) -> Result<u8, WireError> {
    u8::try_from(len).map_err(|_| WireError::FieldTooLarge {
        field,
        len,
        max: u8::MAX as usize,
    })
}

fn len_u32(field: &'static str, len: usize) -> Result<u32, WireError> {
    u32::try_from(len).map_err(|_| WireError::FieldTooLarge {
        field,
        len,
        max: u32::MAX as usize,
    })
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Read a fixed-size prefix struct, returning it and the bytes after it.
fn read_fields<'a, T: FromBytes>(
    what: &'static str,
    payload: &'a [u8],
) -> Result<(T, &'a [u8]), WireError> {
    let size = std::mem::size_of::<T>();
    let fields = T::read_from_prefix(payload).ok_or(WireError::Truncated {
        what,
        declared: size,
        available: payload.len(),
    })?;
    Ok((fields, &payload[size..]))
}

/// Take exactly `len` bytes from the front of `rest`.
fn take<'a>(what: &'static str, rest: &'a [u8], len: usize) -> Result<&'a [u8], WireError> {
    rest.get(..len).ok_or(WireError::Truncated {
        what,
        declared: len,
        available: rest.len(),
    })
}

fn parse_addr(raw: &[u8]) -> Result<PeerAddr, WireError> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| WireError::BadAddress(String::from_utf8_lossy(raw).into_owned()))?;
    text.parse()
}

fn decode_send_req(payload: &[u8]) -> Result<SendReq, WireError> {
    let (fields, rest) = read_fields::<SendReqFields>("SendReq fields", payload)?;
    let blob = take("SendReq blob", rest, fields.blob_len.get() as usize)?;

    // Honour the offsets; address and checksum may sit anywhere in the blob.
    let slice = |name: &'static str, offset: u8, len: u8| {
        let start = offset as usize;
        blob.get(start..start + len as usize)
            .ok_or(WireError::FieldOutOfBounds(name))
    };
    let addr = slice("address", fields.addr_offset, fields.addr_len)?;
    let checksum = slice("checksum", fields.checksum_offset, fields.checksum_len)?;

    Ok(SendReq {
        chunk_count: fields.chunk_count.get(),
        addr: parse_addr(addr)?,
        checksum: Bytes::copy_from_slice(checksum),
    })
}

fn decode_send_accept(payload: &[u8]) -> Result<SendAccept, WireError> {
    let (&addr_len, rest) = payload.split_first().ok_or(WireError::Truncated {
        what: "SendAccept fields",
        declared: 1,
        available: 0,
    })?;
    let addr = take("SendAccept address", rest, addr_len as usize)?;
    Ok(SendAccept {
        addr: parse_addr(addr)?,
    })
}

fn decode_file_pkt(payload: &[u8]) -> Result<FilePkt, WireError> {
    let (fields, rest) = read_fields::<FilePktFields>("FilePkt fields", payload)?;
    let data = take("FilePkt chunk", rest, fields.chunk_len.get() as usize)?;
    Ok(FilePkt {
        chunk_no: fields.chunk_no.get(),
        data: Bytes::copy_from_slice(data),
    })
}

fn decode_file_pkt_ack(payload: &[u8]) -> Result<FilePktAck, WireError> {
    let (fields, rest) = read_fields::<FilePktAckFields>("FilePktAck fields", payload)?;
    let checksum = take("FilePktAck checksum", rest, fields.checksum_len.get() as usize)?;
    Ok(FilePktAck {
        chunk_no: fields.chunk_no.get(),
        checksum: Bytes::copy_from_slice(checksum),
    })
}

fn decode_eof_pkt(payload: &[u8]) -> Result<EofPkt, WireError> {
    let (fields, rest) = read_fields::<EofPktFields>("EOFPkt fields", payload)?;
    let checksum = take("EOFPkt checksum", rest, fields.checksum_len as usize)?;
    Ok(EofPkt {
        chunks_received: fields.chunks_received.get(),
        checksum: Bytes::copy_from_slice(checksum),
    })
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// A frame that cannot be encoded, or a datagram that is not a valid frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("bad magic byte: 0x{0:02x}")]
    BadMagic(u8),

    #[error("frame of {0} bytes is shorter than the {} byte header", HEADER_LEN)]
    TooShort(usize),

    #[error("unknown message type: 0x{0:02x}")]
    UnknownType(u8),

    #[error("truncated {what}: needs {declared} bytes, {available} available")]
    Truncated {
        what: &'static str,
        declared: usize,
        available: usize,
    },

    #[error("{0} lies outside the SendReq blob")]
    FieldOutOfBounds(&'static str),

    #[error("invalid address: {0:?}")]
    BadAddress(String),

    #[error("{field} of {len} bytes exceeds its length field (max {max})")]
    FieldTooLarge {
        field: &'static str,
        len: usize,
        max: usize,
    },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
