//! Chunk header and primitive field codec.
//!
//! Every chunk is `ChunkId, U32 size, U32 version, payload`, where `size`
//! counts the 12 header bytes too. Integers are big-endian, strings are a
//! `U32` byte length followed by UTF-8 bytes, dates are julian day numbers
//! and times are milliseconds since midnight.
//!
//! A missing date is written as julian day 0. A missing time or duration is
//! written as `0xFFFF_FFFF` ms, a value no real time of day can take; files
//! without missing times carry no trace of it.

use std::{
    fmt,
    io::{self, Read, Seek, SeekFrom, Write},
};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use chrono::{Datelike, NaiveDate, NaiveTime, Timelike};
use serde::{Serialize, Serializer};

use crate::error::{DecodeError, ReadError};

pub type Order = BigEndian;

/// `ChunkId` + size + version.
pub const CHUNK_HEADER_LEN: u64 = 12;

/// Julian day number of 0000-12-31 in the proleptic Gregorian calendar,
/// i.e. `jd(date) = date.num_days_from_ce() + JULIAN_DAY_OFFSET`.
const JULIAN_DAY_OFFSET: i64 = 1_721_425;
/// Julian day 0 marks a null date.
const NULL_DATE: u32 = 0;
/// Out of range for any time of day, so it cannot collide with one.
const NULL_TIME: u32 = u32::MAX;
const MS_PER_DAY: u32 = 86_400_000;

/// Four ASCII characters packed big-endian into a `u32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkId(pub u32);

impl ChunkId {
    pub const FILE_HEADER: ChunkId = ChunkId::from_tag(*b"SLLB");
    pub const PERSONAL_INFO: ChunkId = ChunkId::from_tag(*b"SLPI");
    pub const DIVE_LOG: ChunkId = ChunkId::from_tag(*b"SLDL");
    pub const LOCATION_LOG: ChunkId = ChunkId::from_tag(*b"SLLL");
    pub const EQUIPMENT_LOG: ChunkId = ChunkId::from_tag(*b"SLEL");

    pub const fn from_tag(tag: [u8; 4]) -> Self {
        ChunkId(
            (tag[0] as u32) << 24 | (tag[1] as u32) << 16 | (tag[2] as u32) << 8 | tag[3] as u32,
        )
    }

    pub const fn tag(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.tag() {
            if b.is_ascii_graphic() {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:02x}")?;
            }
        }
        Ok(())
    }
}

impl Serialize for ChunkId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkHeader {
    pub id: ChunkId,
    pub size: u32,
    pub version: u32,
}

/// Encoded size of a string field.
pub fn string_size(s: &str) -> u64 {
    4 + s.len() as u64
}

/// Position-tracking reader over a seekable byte stream.
///
/// `limit` bounds variable-length fields to the chunk currently being
/// decoded so that a corrupt length is rejected before anything is
/// allocated for it.
pub struct ChunkReader<R> {
    inner: R,
    pos: u64,
    len: u64,
    limit: u64,
}

impl<R: Read + Seek> ChunkReader<R> {
    pub fn new(mut inner: R) -> io::Result<Self> {
        let len = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self {
            inner,
            pos: 0,
            len,
            limit: len,
        })
    }

    pub fn seek(&mut self, pos: u64) -> io::Result<u64> {
        self.pos = self.inner.seek(SeekFrom::Start(pos))?;
        Ok(self.pos)
    }
}

impl<R> ChunkReader<R> {
    pub fn pos(&self) -> u64 {
        self.pos
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.pos)
    }

    pub(crate) fn set_limit(&mut self, limit: u64) {
        self.limit = limit.min(self.len);
    }

    pub(crate) fn clear_limit(&mut self) {
        self.limit = self.len;
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for ChunkReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<R: Read> ChunkReader<R> {
    pub fn read_chunk_id(&mut self) -> io::Result<ChunkId> {
        Ok(ChunkId(self.read_u32::<Order>()?))
    }

    /// Size and version; the id has already been consumed by the caller.
    pub fn read_header_tail(&mut self, id: ChunkId) -> io::Result<ChunkHeader> {
        let size = self.read_u32::<Order>()?;
        let version = self.read_u32::<Order>()?;
        Ok(ChunkHeader { id, size, version })
    }

    pub(crate) fn read_string(&mut self) -> Result<String, ReadError> {
        let len = self.read_u32::<Order>()? as u64;
        if len > self.remaining() {
            return Err(DecodeError::LengthOutOfBounds {
                len,
                remaining: self.remaining(),
            }
            .into());
        }
        let mut buf = vec![0u8; len as usize];
        self.read_exact(&mut buf)?;
        String::from_utf8(buf).map_err(|_| DecodeError::InvalidUtf8.into())
    }

    pub(crate) fn read_date(&mut self) -> Result<Option<NaiveDate>, ReadError> {
        let jd = self.read_u32::<Order>()?;
        if jd == NULL_DATE {
            return Ok(None);
        }
        i32::try_from(jd as i64 - JULIAN_DAY_OFFSET)
            .ok()
            .and_then(NaiveDate::from_num_days_from_ce_opt)
            .map(Some)
            .ok_or(DecodeError::InvalidDate(jd).into())
    }

    pub(crate) fn read_time(&mut self) -> Result<Option<NaiveTime>, ReadError> {
        let ms = self.read_u32::<Order>()?;
        if ms == NULL_TIME {
            return Ok(None);
        }
        if ms >= MS_PER_DAY {
            return Err(DecodeError::InvalidTime(ms).into());
        }
        NaiveTime::from_num_seconds_from_midnight_opt(ms / 1000, (ms % 1000) * 1_000_000)
            .map(Some)
            .ok_or(DecodeError::InvalidTime(ms).into())
    }

    pub(crate) fn read_float(&mut self) -> io::Result<f32> {
        self.read_f32::<Order>()
    }
}

/// Position-tracking writer. Offsets are counted locally so the size
/// self-checks never need to ask the underlying stream.
pub struct ChunkWriter<W> {
    inner: W,
    pos: u64,
}

impl<W> ChunkWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, pos: 0 }
    }

    pub fn pos(&self) -> u64 {
        self.pos
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write + Seek> ChunkWriter<W> {
    pub fn seek(&mut self, pos: u64) -> io::Result<u64> {
        self.pos = self.inner.seek(SeekFrom::Start(pos))?;
        Ok(self.pos)
    }
}

impl<W: Write> Write for ChunkWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write> ChunkWriter<W> {
    pub fn write_chunk_id(&mut self, id: ChunkId) -> io::Result<()> {
        self.write_u32::<Order>(id.0)
    }

    pub fn write_header(&mut self, header: &ChunkHeader) -> io::Result<()> {
        self.write_chunk_id(header.id)?;
        self.write_u32::<Order>(header.size)?;
        self.write_u32::<Order>(header.version)
    }

    pub(crate) fn write_string(&mut self, s: &str) -> io::Result<()> {
        let len = u32::try_from(s.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "string too long"))?;
        self.write_u32::<Order>(len)?;
        self.write_all(s.as_bytes())
    }

    pub(crate) fn write_date(&mut self, date: Option<NaiveDate>) -> io::Result<()> {
        let jd = match date {
            None => NULL_DATE,
            Some(d) => u32::try_from(d.num_days_from_ce() as i64 + JULIAN_DAY_OFFSET)
                .ok()
                .filter(|jd| *jd != NULL_DATE)
                .ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("date {d} has no julian day number"),
                    )
                })?,
        };
        self.write_u32::<Order>(jd)
    }

    pub(crate) fn write_time(&mut self, time: Option<NaiveTime>) -> io::Result<()> {
        let ms = match time {
            None => NULL_TIME,
            // leap seconds carry nanos >= 1e9
            Some(t) => t.num_seconds_from_midnight() * 1000 + (t.nanosecond() / 1_000_000).min(999),
        };
        self.write_u32::<Order>(ms)
    }

    pub(crate) fn write_float(&mut self, v: f32) -> io::Result<()> {
        self.write_f32::<Order>(v)
    }
}
