use std::{io, path::PathBuf};

use thiserror::Error;

use crate::chunk::ChunkId;

/// Fatal errors: a load or save that returns one of these produced nothing.
#[derive(Error, Debug)]
pub enum Error {
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    #[error("chunk {id} wrote {actual} bytes but declared {expected}")]
    RecordEncode { id: ChunkId, expected: u64, actual: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{}: {source}", .path.display())]
    Path {
        path: PathBuf,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub(crate) fn at(self, path: impl Into<PathBuf>) -> Self {
        Error::Path {
            path: path.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, with any path context stripped.
    pub fn root(&self) -> &Error {
        match self {
            Error::Path { source, .. } => source.root(),
            e => e,
        }
    }
}

/// Whole-file problems. Any of these aborts the load.
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("not a log book: expected tag {expected}, found {found}")]
    BadMagic { expected: ChunkId, found: ChunkId },

    #[error("header declares {declared} bytes but the file has {actual}")]
    SizeMismatch { declared: u64, actual: u64 },

    #[error("unsupported file version {0}")]
    UnsupportedFileVersion(u32),

    #[error("unsupported {id} chunk version {version}")]
    UnsupportedChunkVersion { id: ChunkId, version: u32 },

    #[error("truncated chunk at offset {offset}: next chunk would start at {next}, file has {len} bytes")]
    Truncated { offset: u64, next: u64, len: u64 },

    #[error("corrupt personal info chunk: {0}")]
    PersonalInfo(DecodeError),
}

/// A single record failed to decode. The load skips the chunk and carries on.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("unsupported chunk version {0}")]
    UnsupportedVersion(u32),

    #[error("chunk declares {0} bytes, smaller than its header")]
    ChunkTooSmall(u32),

    #[error("decoder stopped at offset {actual}, chunk ends at {expected}")]
    PositionMismatch { expected: u64, actual: u64 },

    #[error("field length {len} exceeds the {remaining} bytes left in the chunk")]
    LengthOutOfBounds { len: u64, remaining: u64 },

    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    #[error("invalid julian day {0}")]
    InvalidDate(u32),

    #[error("invalid time of day {0}ms")]
    InvalidTime(u32),

    #[error("invalid plan type {0}")]
    InvalidPlanType(u8),

    #[error("unexpected end of file")]
    UnexpectedEof,
}

/// Result of decoding a record: either fatal, or a [`DecodeError`] the
/// dispatch loop can recover from.
#[derive(Debug)]
pub(crate) enum ReadError {
    Decode(DecodeError),
    Io(io::Error),
}

impl From<DecodeError> for ReadError {
    fn from(e: DecodeError) -> Self {
        ReadError::Decode(e)
    }
}

impl From<io::Error> for ReadError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            ReadError::Decode(DecodeError::UnexpectedEof)
        } else {
            ReadError::Io(e)
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
