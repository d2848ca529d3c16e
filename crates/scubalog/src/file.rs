use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Seek, Write},
    path::Path,
};

use byteorder::WriteBytesExt;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::{
    chunk::{ChunkHeader, ChunkId, ChunkReader, ChunkWriter, Order, CHUNK_HEADER_LEN},
    error::{DecodeError, Error, FormatError, Result},
    model::{DiveLog, EquipmentLog, LocationLog, LogBook, PersonalInfo},
    record::{next_chunk_offset, read_chunk, write_chunk, ChunkOutcome, Record},
    FILE_VERSION,
};

/// Offset of the total-size field in the file header.
const FILE_SIZE_OFFSET: u64 = 4;

/// A chunk the loader stepped over.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedChunk {
    pub id: ChunkId,
    pub offset: u64,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// Tag this version does not know; skipped for forward compatibility.
    Unknown { version: u32 },
    /// Known record that failed to decode and was dropped.
    Corrupt(DecodeError),
}

/// A successfully loaded log book and the chunks that were left out of it.
#[derive(Debug)]
pub struct Loaded {
    pub log_book: LogBook,
    pub skipped: Vec<SkippedChunk>,
}

impl Loaded {
    /// Dropped records worth telling the user about.
    pub fn warnings(&self) -> impl Iterator<Item = &SkippedChunk> {
        self.skipped
            .iter()
            .filter(|s| matches!(s.reason, SkipReason::Corrupt(_)))
    }
}

/// Entry in the chunk table returned by [`scan_chunks`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkInfo {
    pub offset: u64,
    #[serde(flatten)]
    pub header: ChunkHeader,
    pub known: bool,
}

fn is_known(id: ChunkId) -> bool {
    matches!(
        id,
        ChunkId::FILE_HEADER
            | ChunkId::PERSONAL_INFO
            | ChunkId::DIVE_LOG
            | ChunkId::LOCATION_LOG
            | ChunkId::EQUIPMENT_LOG
    )
}

pub fn load_log_book(path: impl AsRef<Path>) -> Result<Loaded> {
    let path = path.as_ref();
    let _span = tracing::debug_span!("load_log_book", path = %path.display()).entered();
    let f = File::open(path).map_err(|e| Error::from(e).at(path))?;
    let loaded = read_log_book(BufReader::new(f)).map_err(|e| e.at(path))?;
    for s in loaded.warnings() {
        if let SkipReason::Corrupt(cause) = &s.reason {
            tracing::warn!(
                path = %path.display(),
                chunk = %s.id,
                offset = s.offset,
                "skipped corrupt record: {cause}"
            );
        }
    }
    Ok(loaded)
}

/// Decodes a whole log book.
///
/// Header problems, truncation and I/O errors abort the load. Record chunks
/// that fail to decode and unknown chunks are skipped and listed in
/// [`Loaded::skipped`].
pub fn read_log_book<R: Read + Seek>(r: R) -> Result<Loaded> {
    let mut r = ChunkReader::new(r)?;
    read_file_header(&mut r)?;

    let mut log_book = LogBook::new();
    let mut skipped = Vec::new();
    while r.pos() < r.len() {
        let start = r.pos();
        check_header_fits(&r, start)?;
        let id = r.read_chunk_id()?;
        match id {
            ChunkId::PERSONAL_INFO => *log_book.personal_mut() = read_personal_info(&mut r, start)?,
            ChunkId::DIVE_LOG => {
                if let Some(dive) = read_record::<DiveLog, _>(&mut r, start, &mut skipped)? {
                    log_book.insert_dive_log(dive);
                }
            }
            ChunkId::LOCATION_LOG => {
                if let Some(loc) = read_record::<LocationLog, _>(&mut r, start, &mut skipped)? {
                    log_book.insert_location_log(loc);
                }
            }
            ChunkId::EQUIPMENT_LOG => {
                if let Some(eq) = read_record::<EquipmentLog, _>(&mut r, start, &mut skipped)? {
                    log_book.add_equipment_log(eq);
                }
            }
            _ => {
                let header = r.read_header_tail(id)?;
                let next = next_chunk_offset(start, &header, r.len())?;
                tracing::debug!(
                    chunk = %id,
                    offset = start,
                    size = header.size,
                    "skipping unknown chunk"
                );
                skipped.push(SkippedChunk {
                    id,
                    offset: start,
                    reason: SkipReason::Unknown {
                        version: header.version,
                    },
                });
                r.seek(next)?;
            }
        }
    }

    tracing::debug!(
        dives = log_book.dive_logs().len(),
        locations = log_book.location_logs().len(),
        equipment = log_book.equipment_logs().len(),
        skipped = skipped.len(),
        "log book read"
    );
    Ok(Loaded { log_book, skipped })
}

fn read_file_header<R: Read + Seek>(r: &mut ChunkReader<R>) -> Result<ChunkHeader> {
    check_header_fits(r, 0)?;
    let id = r.read_chunk_id()?;
    if id != ChunkId::FILE_HEADER {
        return Err(FormatError::BadMagic {
            expected: ChunkId::FILE_HEADER,
            found: id,
        }
        .into());
    }
    let header = r.read_header_tail(id)?;
    if header.size as u64 != r.len() {
        return Err(FormatError::SizeMismatch {
            declared: header.size as u64,
            actual: r.len(),
        }
        .into());
    }
    if header.version != FILE_VERSION {
        return Err(FormatError::UnsupportedFileVersion(header.version).into());
    }
    Ok(header)
}

fn check_header_fits<R>(r: &ChunkReader<R>, start: u64) -> Result<()> {
    if r.len() - start < CHUNK_HEADER_LEN {
        return Err(FormatError::Truncated {
            offset: start,
            next: start + CHUNK_HEADER_LEN,
            len: r.len(),
        }
        .into());
    }
    Ok(())
}

/// Personal info has no recovery path: any decode failure aborts the load.
fn read_personal_info<R: Read + Seek>(
    r: &mut ChunkReader<R>,
    start: u64,
) -> Result<PersonalInfo> {
    match read_chunk::<PersonalInfo, _>(r, start)? {
        ChunkOutcome::Decoded(info) => Ok(info),
        ChunkOutcome::Corrupt {
            cause: DecodeError::UnsupportedVersion(version),
            ..
        } => Err(FormatError::UnsupportedChunkVersion {
            id: ChunkId::PERSONAL_INFO,
            version,
        }
        .into()),
        ChunkOutcome::Corrupt { cause, .. } => Err(FormatError::PersonalInfo(cause).into()),
    }
}

fn read_record<T: Record, R: Read + Seek>(
    r: &mut ChunkReader<R>,
    start: u64,
    skipped: &mut Vec<SkippedChunk>,
) -> Result<Option<T>> {
    match read_chunk::<T, _>(r, start)? {
        ChunkOutcome::Decoded(record) => Ok(Some(record)),
        ChunkOutcome::Corrupt {
            next_offset, cause, ..
        } => {
            tracing::debug!(chunk = %T::ID, offset = start, next_offset, %cause, "record dropped");
            skipped.push(SkippedChunk {
                id: T::ID,
                offset: start,
                reason: SkipReason::Corrupt(cause),
            });
            Ok(None)
        }
    }
}

/// Writes `log_book` to `path`.
///
/// The bytes go to a temporary file next to `path` which replaces it only
/// once everything has been written, so a failed save leaves any existing
/// file untouched and no partial output behind.
pub fn save_log_book(log_book: &LogBook, path: impl AsRef<Path>) -> Result<u64> {
    let path = path.as_ref();
    let _span = tracing::debug_span!("save_log_book", path = %path.display()).entered();
    replace_with(log_book, path).map_err(|e| {
        tracing::warn!(path = %path.display(), "save failed: {e}");
        e.at(path)
    })
}

fn replace_with(log_book: &LogBook, path: &Path) -> Result<u64> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    // dropping the temp file on any early return deletes it
    let tmp = NamedTempFile::new_in(dir)?;
    let mut out = BufWriter::new(tmp);
    let len = write_log_book(&mut out, log_book)?;
    let tmp = out.into_inner().map_err(|e| e.into_error())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(len)
}

/// Encodes `log_book` from the start of `w` and returns the total length.
pub fn write_log_book<W: Write + Seek>(w: W, log_book: &LogBook) -> Result<u64> {
    let mut w = ChunkWriter::new(w);
    w.seek(0)?;
    w.write_header(&ChunkHeader {
        id: ChunkId::FILE_HEADER,
        size: 0,
        version: FILE_VERSION,
    })?;

    write_chunk(&mut w, log_book.personal())?;
    for dive in log_book.dive_logs() {
        write_chunk(&mut w, dive)?;
    }
    for location in log_book.location_logs() {
        write_chunk(&mut w, location)?;
    }
    for equipment in log_book.equipment_logs() {
        write_chunk(&mut w, equipment)?;
    }

    let len = w.pos();
    let size = u32::try_from(len).map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("log book of {len} bytes does not fit the file header"),
        )
    })?;
    w.seek(FILE_SIZE_OFFSET)?;
    w.write_u32::<Order>(size)?;
    w.seek(len)?;
    w.flush()?;
    tracing::debug!(len, "log book written");
    Ok(len)
}

/// Lists every chunk in a log book, file header first, without decoding any
/// payload.
pub fn scan_chunks<R: Read + Seek>(r: R) -> Result<Vec<ChunkInfo>> {
    let mut r = ChunkReader::new(r)?;
    let header = read_file_header(&mut r)?;
    let mut chunks = vec![ChunkInfo {
        offset: 0,
        header,
        known: true,
    }];
    while r.pos() < r.len() {
        let start = r.pos();
        check_header_fits(&r, start)?;
        let id = r.read_chunk_id()?;
        let header = r.read_header_tail(id)?;
        let next = next_chunk_offset(start, &header, r.len())?;
        chunks.push(ChunkInfo {
            offset: start,
            header,
            known: is_known(id),
        });
        r.seek(next)?;
    }
    Ok(chunks)
}
