//! Journal writer implementation.

use crate::errors::JournalError;
use crate::frame::{FrameKind, JournalHeader, RecordFrame, HEADER_SIZE};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, Write};
use std::path::Path;

/// Options for journal writing.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// Whether to fsync after each append (default: true).
    pub sync: bool,
    /// Whether to create the file if it doesn't exist (default: true).
    pub create: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            sync: true,
            create: true,
        }
    }
}

/// Append-only writer for journal files.
///
/// A new or empty file receives a header first; an existing file must carry a
/// valid header. Every frame is written at the current end of the file.
pub struct JournalWriter {
    file: File,
    sync: bool,
    len: u64,
}

impl JournalWriter {
    /// Opens or creates a journal file for appending.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError`] if the file cannot be opened, is too short to
    /// hold a header, or carries an invalid header.
    pub fn open<P: AsRef<Path>>(path: P, options: WriteOptions) -> Result<Self, JournalError> {
        let file = OpenOptions::new()
            .create(options.create)
            .write(true)
            .read(true)
            .open(path)?;

        let mut writer = Self {
            file,
            sync: options.sync,
            len: 0,
        };

        let len = writer.file.metadata()?.len();
        if len == 0 {
            writer.write_header()?;
        } else if len < HEADER_SIZE as u64 {
            return Err(JournalError::FileNotEmpty);
        } else {
            let mut header_bytes = [0u8; HEADER_SIZE];
            writer.file.seek(io::SeekFrom::Start(0))?;
            writer.file.read_exact(&mut header_bytes)?;
            JournalHeader::from_bytes(&header_bytes)?;
            writer.len = len;
        }

        Ok(writer)
    }

    fn write_header(&mut self) -> Result<(), JournalError> {
        self.file.seek(io::SeekFrom::Start(0))?;
        self.file.write_all(&JournalHeader::new().to_bytes())?;
        self.file.flush()?;
        if self.sync {
            self.file.sync_all()?;
        }
        self.len = HEADER_SIZE as u64;
        Ok(())
    }

    /// Current file length in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the journal holds no frames.
    pub fn is_empty(&self) -> bool {
        self.len <= HEADER_SIZE as u64
    }

    /// Discards every byte at or past `offset`.
    ///
    /// Used to drop frames that were written but never committed.
    pub fn truncate(&mut self, offset: u64) -> Result<(), JournalError> {
        if offset < HEADER_SIZE as u64 {
            return Err(JournalError::InvalidFrame {
                offset,
                reason: "cannot truncate into the header".to_string(),
            });
        }
        self.file.set_len(offset)?;
        if self.sync {
            self.file.sync_all()?;
        }
        self.len = offset;
        Ok(())
    }

    /// Appends a frame and returns the offset one past its end.
    pub fn append_raw(&mut self, kind: FrameKind, payload: &[u8]) -> Result<u64, JournalError> {
        let frame = RecordFrame::new(kind, payload.len())?;
        self.file.seek(io::SeekFrom::Start(self.len))?;

        let mut buf = Vec::with_capacity(frame.encoded_len() as usize);
        buf.extend_from_slice(&frame.to_bytes());
        buf.extend_from_slice(payload);
        self.file.write_all(&buf)?;
        self.file.flush()?;
        if self.sync {
            self.file.sync_data()?;
        }

        self.len += frame.encoded_len();
        Ok(self.len)
    }

    /// Serializes `value` as JSON and appends it as a `kind` frame.
    pub fn append_json<T: serde::Serialize>(
        &mut self,
        kind: FrameKind,
        value: &T,
    ) -> Result<u64, JournalError> {
        let bytes = serde_json::to_vec(value)?;
        self.append_raw(kind, &bytes)
    }
}

impl Drop for JournalWriter {
    fn drop(&mut self) {
        let _ = self.file.flush();
    }
}
