//! Reading and writing scuba log books in the chunked `.slb` format.
//!
//! ```text
//! SLLB size version     file header, size is the whole file
//! SLPI size version ..  personal info
//! SLDL size version ..  one per dive, ascending log number
//! SLLL size version ..  one per location, ascending name
//! SLEL size version ..  one per piece of equipment, with its history
//! ```
//!
//! Chunks with tags this crate does not know are skipped when loading.
pub mod chunk;
pub mod error;
pub mod file;
pub mod model;
mod record;

/// Version stored in the file header and in every chunk written.
pub const FILE_VERSION: u32 = 1;

pub use chunk::{ChunkHeader, ChunkId};
pub use error::{DecodeError, Error, FormatError, Result};
pub use file::{
    load_log_book, read_log_book, save_log_book, scan_chunks, write_log_book, ChunkInfo, Loaded,
    SkipReason, SkippedChunk,
};
pub use model::{
    DiveLog, EquipmentHistoryEntry, EquipmentLog, LocationLog, LogBook, PersonalInfo, PlanType,
};
