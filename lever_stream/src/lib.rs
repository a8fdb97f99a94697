//! Shared monitor-channel protocol helpers.
//!
//! Every message is a fixed-size header followed by a MessagePack payload.
//! The engine (the "game" side) connects to a listener, identifies itself and
//! then streams `MonitorUpdate`s; the listener drives the watch set with
//! `Wrap`/`Unwrap`/`List` requests. Both sides share the framing code here so
//! they stay interoperable.

use std::convert::TryFrom;

use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_repr::{Deserialize_repr, Serialize_repr};
use thiserror::Error;

/// Bytes that prefix every message ("LEVR").
pub const HEADER_MAGIC: [u8; 4] = *b"LEVR";

/// Protocol revision understood by this crate.
pub const PROTOCOL_VERSION: u16 = 0x0001;

/// Length of the binary header in bytes.
pub const HEADER_LEN: usize = 4 + 2 + 2 + 4;

/// Largest payload a reader accepts before treating the stream as corrupt.
pub const MAX_PAYLOAD_LEN: u32 = 16 * 1024 * 1024;

/// Client type announced by the engine when it identifies itself.
pub const GAME_CLIENT_TYPE: &str = "game";

/// Message kinds understood by protocol v1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr, Hash)]
#[repr(u16)]
pub enum MessageKind {
    Identify = 0x0001,
    MonitorUpdate = 0x0002,
    Wrap = 0x0003,
    Unwrap = 0x0004,
    List = 0x0005,
    WatchList = 0x0006,
    MonitorError = 0x0007,
    Heartbeat = 0x0008,
}

impl MessageKind {
    /// Wire name used in logs, matching the `type` tags of the JSON protocol.
    pub fn label(self) -> &'static str {
        match self {
            Self::Identify => "identify",
            Self::MonitorUpdate => "monitor-update",
            Self::Wrap => "wrap",
            Self::Unwrap => "unwrap",
            Self::List => "list",
            Self::WatchList => "watch-list",
            Self::MonitorError => "monitor-error",
            Self::Heartbeat => "heartbeat",
        }
    }
}

impl TryFrom<u16> for MessageKind {
    type Error = ();

    fn try_from(value: u16) -> std::result::Result<Self, Self::Error> {
        match value {
            0x0001 => Ok(Self::Identify),
            0x0002 => Ok(Self::MonitorUpdate),
            0x0003 => Ok(Self::Wrap),
            0x0004 => Ok(Self::Unwrap),
            0x0005 => Ok(Self::List),
            0x0006 => Ok(Self::WatchList),
            0x0007 => Ok(Self::MonitorError),
            0x0008 => Ok(Self::Heartbeat),
            _ => Err(()),
        }
    }
}

/// Envelope describing the upcoming payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub version: u16,
    pub kind: MessageKind,
    pub length: u32,
}

impl MessageHeader {
    /// Encode the header as big-endian bytes.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..4].copy_from_slice(&HEADER_MAGIC);
        out[4..6].copy_from_slice(&self.version.to_be_bytes());
        out[6..8].copy_from_slice(&(self.kind as u16).to_be_bytes());
        out[8..12].copy_from_slice(&self.length.to_be_bytes());
        out
    }

    /// Decode a header from raw bytes.
    pub fn decode(input: &[u8]) -> Result<Self, ProtocolError> {
        if input.len() < HEADER_LEN {
            return Err(ProtocolError::TruncatedHeader);
        }
        if input[..4] != HEADER_MAGIC {
            return Err(ProtocolError::BadMagic);
        }
        let mut version_bytes = &input[4..6];
        let version = version_bytes.get_u16();
        let mut kind_bytes = &input[6..8];
        let kind_raw = kind_bytes.get_u16();
        let kind = MessageKind::try_from(kind_raw)
            .map_err(|_| ProtocolError::UnknownMessageKind(kind_raw))?;
        let mut len_bytes = &input[8..12];
        let length = len_bytes.get_u32();
        Ok(Self {
            version,
            kind,
            length,
        })
    }
}

/// Handshake sent by the engine right after the channel opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identify {
    pub client_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
}

impl Identify {
    pub fn game(build: Option<String>) -> Self {
        Self {
            client_type: GAME_CLIENT_TYPE.to_string(),
            build,
        }
    }
}

/// Change notification for one watch entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorUpdate {
    pub id: String,
    pub value: Value,
    /// Milliseconds since the UNIX epoch at which the change was detected.
    pub ts: u64,
}

/// Listener request: start (or re-point) watching `path` under `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wrap {
    pub id: String,
    pub path: String,
}

/// Listener request: stop watching `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unwrap {
    pub id: String,
}

/// Listener request: report the current watch set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct List {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchSummary {
    pub id: String,
    pub path: String,
}

/// Reply to `List`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchList {
    pub entries: Vec<WatchSummary>,
}

/// Reply to a request the engine could not honour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub seq: u64,
}

/// Any decoded message, tagged by its header kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Identify(Identify),
    MonitorUpdate(MonitorUpdate),
    Wrap(Wrap),
    Unwrap(Unwrap),
    List(List),
    WatchList(WatchList),
    MonitorError(MonitorError),
    Heartbeat(Heartbeat),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Identify(_) => MessageKind::Identify,
            Self::MonitorUpdate(_) => MessageKind::MonitorUpdate,
            Self::Wrap(_) => MessageKind::Wrap,
            Self::Unwrap(_) => MessageKind::Unwrap,
            Self::List(_) => MessageKind::List,
            Self::WatchList(_) => MessageKind::WatchList,
            Self::MonitorError(_) => MessageKind::MonitorError,
            Self::Heartbeat(_) => MessageKind::Heartbeat,
        }
    }

    /// Frame the message for the wire.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        match self {
            Self::Identify(payload) => encode_message(self.kind(), payload),
            Self::MonitorUpdate(payload) => encode_message(self.kind(), payload),
            Self::Wrap(payload) => encode_message(self.kind(), payload),
            Self::Unwrap(payload) => encode_message(self.kind(), payload),
            Self::List(payload) => encode_message(self.kind(), payload),
            Self::WatchList(payload) => encode_message(self.kind(), payload),
            Self::MonitorError(payload) => encode_message(self.kind(), payload),
            Self::Heartbeat(payload) => encode_message(self.kind(), payload),
        }
    }

    /// Decode a payload according to the kind announced in its header.
    pub fn decode(header: &MessageHeader, payload: &[u8]) -> Result<Self, ProtocolError> {
        let message = match header.kind {
            MessageKind::Identify => Self::Identify(decode_payload(payload)?),
            MessageKind::MonitorUpdate => Self::MonitorUpdate(decode_payload(payload)?),
            MessageKind::Wrap => Self::Wrap(decode_payload(payload)?),
            MessageKind::Unwrap => Self::Unwrap(decode_payload(payload)?),
            MessageKind::List => Self::List(decode_payload(payload)?),
            MessageKind::WatchList => Self::WatchList(decode_payload(payload)?),
            MessageKind::MonitorError => Self::MonitorError(decode_payload(payload)?),
            MessageKind::Heartbeat => Self::Heartbeat(decode_payload(payload)?),
        };
        Ok(message)
    }
}

/// Error conditions returned by the protocol helpers.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("header smaller than {HEADER_LEN} bytes")]
    TruncatedHeader,
    #[error("header magic mismatch")]
    BadMagic,
    #[error("message kind {0:#06x} is unknown")]
    UnknownMessageKind(u16),
    #[error("protocol version {0:#06x} is not supported")]
    UnsupportedVersion(u16),
    #[error("payload length mismatch: header declared {expected} bytes but read {actual}")]
    LengthMismatch { expected: u32, actual: usize },
    #[error("payload of {0} bytes exceeds the frame limit")]
    PayloadTooLarge(u32),
    #[error("payload decode error: {0}")]
    PayloadDecode(#[from] rmp_serde::decode::Error),
    #[error("payload encode error: {0}")]
    PayloadEncode(#[from] rmp_serde::encode::Error),
}

/// Wraps a payload with framing suitable for the wire.
pub fn encode_message<T>(kind: MessageKind, payload: &T) -> Result<Vec<u8>, ProtocolError>
where
    T: Serialize,
{
    let payload_bytes = rmp_serde::to_vec_named(payload)?;
    let header = MessageHeader {
        version: PROTOCOL_VERSION,
        kind,
        length: u32::try_from(payload_bytes.len()).map_err(|_| ProtocolError::LengthMismatch {
            expected: u32::MAX,
            actual: payload_bytes.len(),
        })?,
    };
    let mut out = Vec::with_capacity(HEADER_LEN + payload_bytes.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(&payload_bytes);
    Ok(out)
}

/// Decodes a complete framed message returning both header and payload bytes.
pub fn decode_envelope(bytes: &[u8]) -> std::result::Result<(MessageHeader, &[u8]), ProtocolError> {
    if bytes.len() < HEADER_LEN {
        return Err(ProtocolError::TruncatedHeader);
    }
    let header = MessageHeader::decode(&bytes[..HEADER_LEN])?;
    let payload = &bytes[HEADER_LEN..];
    if payload.len() != header.length as usize {
        return Err(ProtocolError::LengthMismatch {
            expected: header.length,
            actual: payload.len(),
        });
    }
    Ok((header, payload))
}

/// Decode a payload straight into the requested type.
pub fn decode_payload<T>(payload: &[u8]) -> std::result::Result<T, ProtocolError>
where
    T: for<'de> Deserialize<'de>,
{
    let value = rmp_serde::from_slice(payload)?;
    Ok(value)
}

/// Reassembles frames from a byte stream that may split or merge them.
#[derive(Debug, Default)]
pub struct FrameReader {
    buffer: BytesMut,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the socket.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Number of buffered bytes not yet consumed as a frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Pop the next complete message, or `None` until more bytes arrive.
    ///
    /// A framing error leaves the buffer untouched; the caller is expected to
    /// drop the connection since the stream can no longer be trusted.
    pub fn next_message(&mut self) -> Result<Option<Message>, ProtocolError> {
        if self.buffer.len() < HEADER_LEN {
            return Ok(None);
        }
        let header = MessageHeader::decode(&self.buffer[..HEADER_LEN])?;
        if header.version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(header.version));
        }
        if header.length > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::PayloadTooLarge(header.length));
        }
        let total = HEADER_LEN + header.length as usize;
        if self.buffer.len() < total {
            return Ok(None);
        }
        let frame = self.buffer.split_to(total);
        let message = Message::decode(&header, &frame[HEADER_LEN..])?;
        Ok(Some(message))
    }
}
