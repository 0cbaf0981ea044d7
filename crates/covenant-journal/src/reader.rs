//! Journal reader implementation.

use crate::errors::JournalError;
use crate::frame::{FrameKind, JournalHeader, RecordFrame, FRAME_HEADER_SIZE, HEADER_SIZE};
use std::fs::File;
use std::io::{self, Read, Seek};
use std::path::Path;

/// Read mode for handling truncation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Strict mode: truncated frames are errors.
    Strict,
    /// Permissive mode: truncation is treated as end-of-file.
    Permissive,
}

/// A frame read from a journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame kind.
    pub kind: FrameKind,
    /// Byte offset of the frame header.
    pub offset: u64,
    /// Payload bytes.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Offset one past the end of the frame.
    pub fn end(&self) -> u64 {
        self.offset + FRAME_HEADER_SIZE as u64 + self.payload.len() as u64
    }
}

/// Sequential reader over a journal file.
///
/// A reader may be bounded by a committed offset; frames at or past the
/// bound are never returned, and a frame straddling it is an error.
///
/// # See Also
///
/// - [`JournalWriter`](crate::JournalWriter) - Append frames
pub struct JournalReader {
    file: File,
    mode: ReadMode,
    position: u64,
    limit: Option<u64>,
}

impl JournalReader {
    /// Opens a journal file for reading.
    ///
    /// The file header is validated and the reader is positioned at the first
    /// record frame after the header.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError`] if the file cannot be opened or its header is
    /// invalid.
    pub fn open<P: AsRef<Path>>(path: P, mode: ReadMode) -> Result<Self, JournalError> {
        let mut file = File::open(path)?;
        Self::read_header(&mut file)?;
        Ok(Self {
            file,
            mode,
            position: HEADER_SIZE as u64,
            limit: None,
        })
    }

    /// Opens a reader that stops at byte offset `limit`.
    pub fn open_bounded<P: AsRef<Path>>(
        path: P,
        mode: ReadMode,
        limit: u64,
    ) -> Result<Self, JournalError> {
        let mut reader = Self::open(path, mode)?;
        reader.limit = Some(limit);
        Ok(reader)
    }

    /// Returns the current read position in the file.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Moves the reader to `offset`, which must be a frame boundary already
    /// known to the caller (typically the end of a previously read frame).
    ///
    /// # Errors
    ///
    /// [`JournalError::InvalidFrame`] if `offset` lies inside the file header
    /// or past the end of the file.
    pub fn seek_to(&mut self, offset: u64) -> Result<(), JournalError> {
        let len = self.file.metadata()?.len();
        if offset < HEADER_SIZE as u64 || offset > len {
            return Err(JournalError::InvalidFrame {
                offset,
                reason: format!("seek target outside {HEADER_SIZE}..={len}"),
            });
        }
        self.position = offset;
        Ok(())
    }

    fn read_header(file: &mut File) -> Result<JournalHeader, JournalError> {
        file.seek(io::SeekFrom::Start(0))?;
        let mut header_bytes = [0u8; HEADER_SIZE];
        file.read_exact(&mut header_bytes)?;
        JournalHeader::from_bytes(&header_bytes)
    }

    /// Reads the next frame.
    ///
    /// Returns `Ok(None)` at end-of-file, at the bound, or on truncation in
    /// permissive mode.
    pub fn read_frame(&mut self) -> Result<Option<Frame>, JournalError> {
        let end = match self.limit {
            Some(limit) => limit.min(self.file.metadata()?.len()),
            None => self.file.metadata()?.len(),
        };
        if self.position >= end {
            return Ok(None);
        }
        let offset = self.position;
        self.file.seek(io::SeekFrom::Start(offset))?;

        let mut header = [0u8; FRAME_HEADER_SIZE];
        if !self.read_exact_or_truncated(&mut header, offset)? {
            return Ok(None);
        }
        let frame = RecordFrame::from_bytes(&header, offset)?;

        if let Some(limit) = self.limit {
            if offset + frame.encoded_len() > limit {
                return Err(JournalError::InvalidFrame {
                    offset,
                    reason: format!("frame extends past committed offset {limit}"),
                });
            }
        }

        let mut payload = vec![0u8; frame.len as usize];
        if !self.read_exact_or_truncated(&mut payload, offset)? {
            return Ok(None);
        }
        self.position = offset + frame.encoded_len();

        Ok(Some(Frame {
            kind: frame.kind,
            offset,
            payload,
        }))
    }

    /// Reads the next frame of `kind`, skipping all others.
    pub fn read_kind(&mut self, kind: FrameKind) -> Result<Option<Frame>, JournalError> {
        while let Some(frame) = self.read_frame()? {
            if frame.kind == kind {
                return Ok(Some(frame));
            }
        }
        Ok(None)
    }

    fn read_exact_or_truncated(
        &mut self,
        buf: &mut [u8],
        offset: u64,
    ) -> Result<bool, JournalError> {
        match self.file.read_exact(buf) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => match self.mode {
                ReadMode::Permissive => Ok(false),
                ReadMode::Strict => Err(JournalError::TruncatedFrame { offset }),
            },
            Err(e) => Err(e.into()),
        }
    }
}
