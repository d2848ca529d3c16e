use std::io::{self, Read, Seek, Write};

use byteorder::{ReadBytesExt, WriteBytesExt};

use crate::{
    chunk::{string_size, ChunkHeader, ChunkId, ChunkReader, ChunkWriter, Order, CHUNK_HEADER_LEN},
    error::{DecodeError, Error, FormatError, ReadError, Result},
    model::{DiveLog, EquipmentHistoryEntry, EquipmentLog, LocationLog, PersonalInfo},
};

const U32_SIZE: u64 = 4;
const U8_SIZE: u64 = 1;
const F32_SIZE: u64 = 4;
const DATE_SIZE: u64 = U32_SIZE;
const TIME_SIZE: u64 = U32_SIZE;

/// A record type stored as one chunk.
pub(crate) trait Record: Sized {
    const ID: ChunkId;
    const VERSION: u32;

    fn payload_size(&self) -> u64;
    fn write_payload<W: Write>(&self, w: &mut ChunkWriter<W>) -> io::Result<()>;
    fn read_payload<R: Read>(r: &mut ChunkReader<R>) -> Result<Self, ReadError>;
}

impl Record for PersonalInfo {
    const ID: ChunkId = ChunkId::PERSONAL_INFO;
    const VERSION: u32 = 1;

    fn payload_size(&self) -> u64 {
        string_size(&self.diver_name)
            + string_size(&self.email_address)
            + string_size(&self.www_url)
            + string_size(&self.comments)
    }

    fn write_payload<W: Write>(&self, w: &mut ChunkWriter<W>) -> io::Result<()> {
        w.write_string(&self.diver_name)?;
        w.write_string(&self.email_address)?;
        w.write_string(&self.www_url)?;
        w.write_string(&self.comments)
    }

    fn read_payload<R: Read>(r: &mut ChunkReader<R>) -> Result<Self, ReadError> {
        Ok(PersonalInfo {
            diver_name: r.read_string()?,
            email_address: r.read_string()?,
            www_url: r.read_string()?,
            comments: r.read_string()?,
        })
    }
}

impl Record for DiveLog {
    const ID: ChunkId = ChunkId::DIVE_LOG;
    const VERSION: u32 = 1;

    fn payload_size(&self) -> u64 {
        U32_SIZE // log number
            + DATE_SIZE
            + TIME_SIZE
            + string_size(&self.location)
            + string_size(&self.buddy)
            + F32_SIZE // max depth
            + TIME_SIZE // dive time
            + TIME_SIZE // bottom time
            + string_size(&self.gas_type)
            + U32_SIZE // surface air consumption
            + 3 * F32_SIZE // temperatures
            + U8_SIZE // plan type
            + string_size(&self.dive_type)
            + string_size(&self.description)
    }

    fn write_payload<W: Write>(&self, w: &mut ChunkWriter<W>) -> io::Result<()> {
        w.write_u32::<Order>(self.log_number)?;
        w.write_date(self.dive_date)?;
        w.write_time(self.dive_start)?;
        w.write_string(&self.location)?;
        w.write_string(&self.buddy)?;
        w.write_float(self.max_depth)?;
        w.write_time(self.dive_time)?;
        w.write_time(self.bottom_time)?;
        w.write_string(&self.gas_type)?;
        w.write_u32::<Order>(self.surface_air_consumption)?;
        w.write_float(self.air_temperature)?;
        w.write_float(self.surface_temperature)?;
        w.write_float(self.water_temperature)?;
        w.write_u8(self.plan_type.into())?;
        w.write_string(&self.dive_type)?;
        w.write_string(&self.description)
    }

    fn read_payload<R: Read>(r: &mut ChunkReader<R>) -> Result<Self, ReadError> {
        Ok(DiveLog {
            log_number: r.read_u32::<Order>()?,
            dive_date: r.read_date()?,
            dive_start: r.read_time()?,
            location: r.read_string()?,
            buddy: r.read_string()?,
            max_depth: r.read_float()?,
            dive_time: r.read_time()?,
            bottom_time: r.read_time()?,
            gas_type: r.read_string()?,
            surface_air_consumption: r.read_u32::<Order>()?,
            air_temperature: r.read_float()?,
            surface_temperature: r.read_float()?,
            water_temperature: r.read_float()?,
            plan_type: r.read_u8()?.try_into()?,
            dive_type: r.read_string()?,
            description: r.read_string()?,
        })
    }
}

impl Record for LocationLog {
    const ID: ChunkId = ChunkId::LOCATION_LOG;
    const VERSION: u32 = 1;

    fn payload_size(&self) -> u64 {
        string_size(&self.name) + string_size(&self.description)
    }

    fn write_payload<W: Write>(&self, w: &mut ChunkWriter<W>) -> io::Result<()> {
        w.write_string(&self.name)?;
        w.write_string(&self.description)
    }

    fn read_payload<R: Read>(r: &mut ChunkReader<R>) -> Result<Self, ReadError> {
        Ok(LocationLog {
            name: r.read_string()?,
            description: r.read_string()?,
        })
    }
}

impl Record for EquipmentLog {
    const ID: ChunkId = ChunkId::EQUIPMENT_LOG;
    const VERSION: u32 = 1;

    fn payload_size(&self) -> u64 {
        string_size(&self.kind)
            + string_size(&self.name)
            + string_size(&self.serial_number)
            + string_size(&self.service_requirements)
            + U32_SIZE // history count
            + self
                .history()
                .iter()
                .map(|h| DATE_SIZE + string_size(&h.comment))
                .sum::<u64>()
    }

    fn write_payload<W: Write>(&self, w: &mut ChunkWriter<W>) -> io::Result<()> {
        w.write_string(&self.kind)?;
        w.write_string(&self.name)?;
        w.write_string(&self.serial_number)?;
        w.write_string(&self.service_requirements)?;
        let count = u32::try_from(self.history().len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "history too long"))?;
        w.write_u32::<Order>(count)?;
        for entry in self.history() {
            w.write_date(entry.date)?;
            w.write_string(&entry.comment)?;
        }
        Ok(())
    }

    fn read_payload<R: Read>(r: &mut ChunkReader<R>) -> Result<Self, ReadError> {
        let mut equipment = EquipmentLog::new(r.read_string()?, r.read_string()?);
        equipment.serial_number = r.read_string()?;
        equipment.service_requirements = r.read_string()?;
        let count = r.read_u32::<Order>()? as u64;
        // smallest entry: a date and an empty comment
        let min_len = count * (DATE_SIZE + U32_SIZE);
        if min_len > r.remaining() {
            return Err(DecodeError::LengthOutOfBounds {
                len: min_len,
                remaining: r.remaining(),
            }
            .into());
        }
        for _ in 0..count {
            equipment.push_history(EquipmentHistoryEntry {
                date: r.read_date()?,
                comment: r.read_string()?,
            });
        }
        Ok(equipment)
    }
}

/// Encoded chunk size of a record, header included.
pub(crate) fn chunk_size<T: Record>(record: &T) -> u64 {
    CHUNK_HEADER_LEN + record.payload_size()
}

/// Writes one record chunk and checks that exactly the declared number of
/// bytes went out.
pub(crate) fn write_chunk<T: Record, W: Write>(
    w: &mut ChunkWriter<W>,
    record: &T,
) -> Result<u64> {
    let start = w.pos();
    let expected = chunk_size(record);
    let size = u32::try_from(expected).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} chunk too large", T::ID),
        )
    })?;
    w.write_header(&ChunkHeader {
        id: T::ID,
        size,
        version: T::VERSION,
    })?;
    record.write_payload(w)?;
    let actual = w.pos() - start;
    if actual != expected {
        return Err(Error::RecordEncode {
            id: T::ID,
            expected,
            actual,
        });
    }
    Ok(expected)
}

/// Outcome of decoding one record chunk.
#[derive(Debug)]
pub(crate) enum ChunkOutcome<T> {
    Decoded(T),
    /// The chunk could not be decoded; resume the scan at `next_offset`.
    Corrupt {
        next_offset: u64,
        cause: DecodeError,
    },
}

/// Decodes a record whose id has already been read. `start` is the offset
/// of that id.
///
/// Decode failures come back as [`ChunkOutcome::Corrupt`] with the offset of
/// the following chunk. Only I/O errors and chunks whose declared size points
/// outside the file are fatal.
pub(crate) fn read_chunk<T: Record, R: Read + Seek>(
    r: &mut ChunkReader<R>,
    start: u64,
) -> Result<ChunkOutcome<T>> {
    let result = decode_chunk::<T, R>(r, start);
    r.clear_limit();
    let (header, cause) = match result {
        Ok(record) => return Ok(ChunkOutcome::Decoded(record)),
        Err((_, ReadError::Io(e))) => return Err(e.into()),
        Err((header, ReadError::Decode(cause))) => (header, cause),
    };

    // resynchronise on the size field, it may not have been read at all
    r.seek(start + U32_SIZE)?;
    let header = match header {
        Some(header) => header,
        None => r.read_header_tail(T::ID).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                Error::from(truncated(start, r.len(), r.len()))
            } else {
                e.into()
            }
        })?,
    };
    let next_offset = next_chunk_offset(start, &header, r.len())?;
    r.seek(next_offset)?;
    Ok(ChunkOutcome::Corrupt {
        next_offset,
        cause,
    })
}

fn decode_chunk<T: Record, R: Read>(
    r: &mut ChunkReader<R>,
    start: u64,
) -> Result<T, (Option<ChunkHeader>, ReadError)> {
    let header = r.read_header_tail(T::ID).map_err(|e| (None, e.into()))?;
    let fail = |e: ReadError| (Some(header), e);
    if header.version != T::VERSION {
        return Err(fail(DecodeError::UnsupportedVersion(header.version).into()));
    }
    if (header.size as u64) < CHUNK_HEADER_LEN {
        return Err(fail(DecodeError::ChunkTooSmall(header.size).into()));
    }
    let end = start + header.size as u64;
    r.set_limit(end);
    let record = T::read_payload(r).map_err(fail)?;
    if r.pos() != end {
        return Err(fail(
            DecodeError::PositionMismatch {
                expected: end,
                actual: r.pos(),
            }
            .into(),
        ));
    }
    Ok(record)
}

/// Offset of the chunk following the one at `start`, or a truncation error
/// if the declared size cannot be trusted.
pub(crate) fn next_chunk_offset(start: u64, header: &ChunkHeader, len: u64) -> Result<u64> {
    let next = start + header.size as u64;
    if (header.size as u64) < CHUNK_HEADER_LEN || next > len {
        return Err(truncated(start, next, len).into());
    }
    Ok(next)
}

fn truncated(offset: u64, next: u64, len: u64) -> FormatError {
    FormatError::Truncated { offset, next, len }
}
