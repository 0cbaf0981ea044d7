use crate::errors::JournalError;

/// Journal file magic bytes: `b"CVL1"`.
pub const MAGIC: &[u8; 4] = b"CVL1";

/// Current journal format version: `0x0001`.
pub const VERSION: u16 = 0x0001;

/// Header size in bytes.
pub const HEADER_SIZE: usize = 16;

/// Frame header size in bytes.
pub const FRAME_HEADER_SIZE: usize = 8;

/// Maximum payload size: 16 MiB.
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Record frame kind: sealed registration entry.
pub const FRAME_KIND_ENTRY: u8 = 0x01;

/// Record frame kind: governance proposal.
pub const FRAME_KIND_PROPOSAL: u8 = 0x02;

/// Journal file header (16 bytes).
///
/// Layout: magic (4), version (u16 LE), flags (u16 LE, zero), reserved (8, zero).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalHeader {
    /// Magic bytes: `"CVL1"`.
    pub magic: [u8; 4],
    /// Format version.
    pub version: u16,
    /// Reserved flags (must be 0).
    pub flags: u16,
    /// Reserved bytes (must be all zeros).
    pub reserved: [u8; 8],
}

impl JournalHeader {
    /// Creates a header for the current format version.
    pub fn new() -> Self {
        Self {
            magic: *MAGIC,
            version: VERSION,
            flags: 0,
            reserved: [0; 8],
        }
    }

    /// Serializes the header to bytes.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4..6].copy_from_slice(&self.version.to_le_bytes());
        bytes[6..8].copy_from_slice(&self.flags.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.reserved);
        bytes
    }

    /// Parses and validates a header.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, JournalError> {
        if bytes.len() < HEADER_SIZE {
            return Err(JournalError::InvalidHeader(format!(
                "header too short: {} bytes",
                bytes.len()
            )));
        }

        let magic = [bytes[0], bytes[1], bytes[2], bytes[3]];
        if magic != *MAGIC {
            return Err(JournalError::InvalidHeader(format!(
                "invalid magic: {:?}, expected {:?}",
                magic, MAGIC
            )));
        }

        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != VERSION {
            return Err(JournalError::InvalidHeader(format!(
                "unsupported version: 0x{:04x}, expected 0x{:04x}",
                version, VERSION
            )));
        }

        let flags = u16::from_le_bytes([bytes[6], bytes[7]]);
        if flags != 0 {
            return Err(JournalError::InvalidHeader(format!(
                "non-zero flags: 0x{:04x}",
                flags
            )));
        }

        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&bytes[8..16]);
        if reserved != [0u8; 8] {
            return Err(JournalError::InvalidHeader(
                "non-zero reserved bytes".to_string(),
            ));
        }

        Ok(Self {
            magic,
            version,
            flags,
            reserved,
        })
    }
}

impl Default for JournalHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// Record frame kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Canonical JSON of a sealed registration entry.
    Entry,
    /// JSON proposal record.
    Proposal,
    /// Kind written by a newer format revision; skipped by readers.
    Unknown(u8),
}

impl FrameKind {
    /// Maps a byte to its kind.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            FRAME_KIND_ENTRY => FrameKind::Entry,
            FRAME_KIND_PROPOSAL => FrameKind::Proposal,
            _ => FrameKind::Unknown(byte),
        }
    }

    /// Byte value for this kind.
    pub fn to_byte(self) -> u8 {
        match self {
            FrameKind::Entry => FRAME_KIND_ENTRY,
            FrameKind::Proposal => FRAME_KIND_PROPOSAL,
            FrameKind::Unknown(b) => b,
        }
    }
}

/// Record frame header (8 bytes): kind, 3 reserved zero bytes, u32 LE length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFrame {
    /// Frame kind.
    pub kind: FrameKind,
    /// Payload length in bytes.
    pub len: u32,
}

impl RecordFrame {
    /// Creates a frame header, rejecting oversized payloads.
    pub fn new(kind: FrameKind, len: usize) -> Result<Self, JournalError> {
        let len = u32::try_from(len)
            .ok()
            .filter(|l| *l <= MAX_PAYLOAD_SIZE)
            .ok_or(JournalError::PayloadTooLarge {
                size: len as u64,
                max: MAX_PAYLOAD_SIZE,
            })?;
        Ok(Self { kind, len })
    }

    /// Serializes the frame header to bytes.
    pub fn to_bytes(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut bytes = [0u8; FRAME_HEADER_SIZE];
        bytes[0] = self.kind.to_byte();
        bytes[4..8].copy_from_slice(&self.len.to_le_bytes());
        bytes
    }

    /// Parses a frame header found at `offset`.
    pub fn from_bytes(bytes: &[u8], offset: u64) -> Result<Self, JournalError> {
        if bytes.len() < FRAME_HEADER_SIZE {
            return Err(JournalError::InvalidFrame {
                offset,
                reason: format!("frame header too short: {} bytes", bytes.len()),
            });
        }
        if bytes[1..4] != [0u8; 3] {
            return Err(JournalError::InvalidFrame {
                offset,
                reason: "non-zero reserved bytes".to_string(),
            });
        }
        let len = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if len > MAX_PAYLOAD_SIZE {
            return Err(JournalError::InvalidFrame {
                offset,
                reason: format!("payload size {} exceeds maximum {}", len, MAX_PAYLOAD_SIZE),
            });
        }

        Ok(Self {
            kind: FrameKind::from_byte(bytes[0]),
            len,
        })
    }

    /// Total on-disk size of the frame including its header.
    pub fn encoded_len(&self) -> u64 {
        FRAME_HEADER_SIZE as u64 + u64::from(self.len)
    }
}
