//! Outbox log frames.
//!
//! Every write to the log is one frame:
//!
//! ```text
//! | magic "MOBX" (4) | version u16 (2) | type u8 (1) | len u32 (4) | payload (len) | crc32 (4) |
//! ```
//!
//! All integers are little-endian. The CRC covers the header and payload.
//!
//! - `Put` payload: entry key `u64` + CBOR record envelope
//! - `Remove` payload: entry key `u64` + mutation id (16 bytes)

use crate::error::{OutboxError, OutboxResult};
use crate::store::EntryKey;
use mutsync_codec::MutationRecord;
use mutsync_storage::StorageBackend;
use uuid::Uuid;

/// Magic bytes opening every frame.
pub const FRAME_MAGIC: [u8; 4] = *b"MOBX";

/// Current frame format version.
pub const FRAME_VERSION: u16 = 1;

/// magic (4) + version (2) + type (1) + length (4)
pub(crate) const HEADER_SIZE: usize = 11;

const CRC_SIZE: usize = 4;
const KEY_SIZE: usize = 8;

/// Frame type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// A record was stored.
    Put = 1,
    /// A record was removed.
    Remove = 2,
}

impl FrameType {
    /// Converts a byte to a frame type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Put),
            2 => Some(Self::Remove),
            _ => None,
        }
    }

    /// Converts the frame type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A decoded log frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A record was stored under `key`.
    Put {
        /// Entry key.
        key: EntryKey,
        /// Stored record.
        record: MutationRecord,
    },
    /// The record stored under `key` was removed.
    Remove {
        /// Entry key.
        key: EntryKey,
        /// Mutation ID of the removed record.
        mutation_id: Uuid,
    },
}

impl Frame {
    /// Returns the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Self::Put { .. } => FrameType::Put,
            Self::Remove { .. } => FrameType::Remove,
        }
    }

    /// Returns the entry key the frame refers to.
    #[must_use]
    pub fn key(&self) -> EntryKey {
        match self {
            Self::Put { key, .. } | Self::Remove { key, .. } => *key,
        }
    }

    /// Serializes the frame, envelope included.
    pub fn encode(&self) -> OutboxResult<Vec<u8>> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&self.key().as_u64().to_le_bytes());
        match self {
            Self::Put { record, .. } => payload.extend_from_slice(&record.to_bytes()?),
            Self::Remove { mutation_id, .. } => payload.extend_from_slice(mutation_id.as_bytes()),
        }

        let len = u32::try_from(payload.len()).map_err(|_| {
            OutboxError::corrupted(format!(
                "frame payload too large: {} bytes exceeds maximum of {} bytes",
                payload.len(),
                u32::MAX
            ))
        })?;

        let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        buf.extend_from_slice(&FRAME_MAGIC);
        buf.extend_from_slice(&FRAME_VERSION.to_le_bytes());
        buf.push(self.frame_type().as_byte());
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&payload);

        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    fn decode_payload(frame_type: FrameType, payload: &[u8], offset: u64) -> OutboxResult<Self> {
        if payload.len() < KEY_SIZE {
            return Err(OutboxError::corrupted(format!(
                "frame at offset {offset} is missing its entry key"
            )));
        }
        let (key_bytes, body) = payload.split_at(KEY_SIZE);
        let mut raw_key = [0u8; KEY_SIZE];
        raw_key.copy_from_slice(key_bytes);
        let key = EntryKey::new(u64::from_le_bytes(raw_key));

        match frame_type {
            FrameType::Put => {
                let record = MutationRecord::from_bytes(body).map_err(|e| {
                    OutboxError::corrupted(format!("record at offset {offset}: {e}"))
                })?;
                Ok(Self::Put { key, record })
            }
            FrameType::Remove => {
                let mutation_id = Uuid::from_slice(body).map_err(|_| {
                    OutboxError::corrupted(format!(
                        "remove frame at offset {offset} has a {} byte id, expected 16",
                        body.len()
                    ))
                })?;
                Ok(Self::Remove { key, mutation_id })
            }
        }
    }
}

/// Result of scanning a log from the start.
#[derive(Debug, Clone, Default)]
pub struct LogScan {
    /// Every complete frame with its offset, in log order.
    pub frames: Vec<(u64, Frame)>,
    /// Length of the prefix made of complete frames.
    pub valid_len: u64,
    /// Total length of the log.
    pub total_len: u64,
}

impl LogScan {
    /// Bytes after the last complete frame, left by a crash mid-append.
    #[must_use]
    pub fn torn_bytes(&self) -> u64 {
        self.total_len - self.valid_len
    }
}

/// Reads every frame in the log.
///
/// A truncated final frame ends the scan and is reported through
/// [`LogScan::torn_bytes`]. A complete frame with bad magic, an unknown
/// version or type, or a CRC mismatch fails the scan.
pub fn scan_log(backend: &dyn StorageBackend) -> OutboxResult<LogScan> {
    let total_len = backend.size()?;
    let total = usize::try_from(total_len)
        .map_err(|_| OutboxError::corrupted(format!("log of {total_len} bytes is too large")))?;
    let data = backend.read_at(0, total)?;

    let mut frames = Vec::new();
    let mut pos = 0usize;

    while data.len() - pos >= HEADER_SIZE {
        let offset = pos as u64;
        let header = &data[pos..pos + HEADER_SIZE];

        if header[0..4] != FRAME_MAGIC {
            return Err(OutboxError::corrupted(format!(
                "invalid magic at offset {offset}"
            )));
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > FRAME_VERSION {
            return Err(OutboxError::corrupted(format!(
                "unsupported version {version} at offset {offset}"
            )));
        }

        let type_byte = header[6];
        let frame_type = FrameType::from_byte(type_byte).ok_or_else(|| {
            OutboxError::corrupted(format!(
                "unknown frame type {type_byte} at offset {offset}"
            ))
        })?;

        let len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;
        let frame_len = HEADER_SIZE + len + CRC_SIZE;
        if data.len() - pos < frame_len {
            break;
        }

        let body_end = pos + HEADER_SIZE + len;
        let mut stored = [0u8; CRC_SIZE];
        stored.copy_from_slice(&data[body_end..body_end + CRC_SIZE]);
        let stored_crc = u32::from_le_bytes(stored);
        let computed_crc = crc32fast::hash(&data[pos..body_end]);
        if stored_crc != computed_crc {
            return Err(OutboxError::corrupted(format!(
                "CRC mismatch at offset {offset}: expected {stored_crc:#010x}, got {computed_crc:#010x}"
            )));
        }

        let frame = Frame::decode_payload(frame_type, &data[pos + HEADER_SIZE..body_end], offset)?;
        frames.push((offset, frame));
        pos += frame_len;
    }

    Ok(LogScan {
        frames,
        valid_len: pos as u64,
        total_len,
    })
}
