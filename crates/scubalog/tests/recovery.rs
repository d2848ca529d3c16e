use std::{
    fs,
    io::{self, Cursor},
};

use chrono::NaiveDate;

use scubalog::{
    load_log_book, read_log_book, save_log_book, scan_chunks, write_log_book, ChunkId, DecodeError,
    DiveLog, EquipmentLog, Error, FormatError, LocationLog, LogBook, SkipReason,
};

fn encode(book: &LogBook) -> Vec<u8> {
    let mut cur = Cursor::new(Vec::new());
    write_log_book(&mut cur, book).unwrap();
    cur.into_inner()
}

fn sample_book() -> LogBook {
    let mut book = LogBook::new();
    book.personal_mut().diver_name = "Ada".into();
    for n in 1..=3 {
        let dive = book.new_dive_log();
        dive.location = "Reef".into();
        dive.max_depth = 10.0 + n as f32;
    }
    book.insert_location_log(LocationLog::new("Reef", "Shallow coral"));
    book.insert_location_log(LocationLog::new("Wreck", "Tugboat at 30m"));
    let mut eq = EquipmentLog::new("Regulator", "Mk25");
    eq.add_history(None, "Serviced");
    book.add_equipment_log(eq);
    book
}

/// Raw bytes of every chunk with the given id, in file order.
fn chunks_of(bytes: &[u8], id: ChunkId) -> Vec<Vec<u8>> {
    scan_chunks(Cursor::new(bytes.to_vec()))
        .unwrap()
        .into_iter()
        .filter(|c| c.header.id == id)
        .map(|c| {
            let start = c.offset as usize;
            bytes[start..start + c.header.size as usize].to_vec()
        })
        .collect()
}

/// Builds a file from raw chunks, patching the header size.
fn assemble(chunks: &[Vec<u8>]) -> Vec<u8> {
    let mut out = b"SLLB\0\0\0\0\0\0\0\x01".to_vec();
    for c in chunks {
        out.extend_from_slice(c);
    }
    let len = out.len() as u32;
    out[4..8].copy_from_slice(&len.to_be_bytes());
    out
}

fn set_file_size(bytes: &mut [u8]) {
    let len = bytes.len() as u32;
    bytes[4..8].copy_from_slice(&len.to_be_bytes());
}

#[test]
fn header_tag_size_and_version_are_checked() {
    let good = encode(&sample_book());

    let mut bytes = good.clone();
    bytes[3] = b'X';
    assert!(matches!(
        read_log_book(Cursor::new(bytes)),
        Err(Error::Format(FormatError::BadMagic { .. }))
    ));

    let mut bytes = good.clone();
    bytes.push(0);
    assert!(matches!(
        read_log_book(Cursor::new(bytes)),
        Err(Error::Format(FormatError::SizeMismatch { .. }))
    ));

    let mut bytes = good;
    bytes[8..12].copy_from_slice(&2u32.to_be_bytes());
    assert!(matches!(
        read_log_book(Cursor::new(bytes)),
        Err(Error::Format(FormatError::UnsupportedFileVersion(2)))
    ));
}

#[test]
fn unknown_chunk_between_known_ones_is_ignored() {
    let book = sample_book();
    let bytes = encode(&book);

    let mut unknown = b"ZZZZ".to_vec();
    unknown.extend_from_slice(&20u32.to_be_bytes());
    unknown.extend_from_slice(&3u32.to_be_bytes());
    unknown.extend_from_slice(b"future!!");

    let mut chunks = chunks_of(&bytes, ChunkId::PERSONAL_INFO);
    chunks.extend(chunks_of(&bytes, ChunkId::DIVE_LOG));
    chunks.push(unknown);
    chunks.extend(chunks_of(&bytes, ChunkId::LOCATION_LOG));
    chunks.extend(chunks_of(&bytes, ChunkId::EQUIPMENT_LOG));

    let loaded = read_log_book(Cursor::new(assemble(&chunks))).unwrap();
    assert_eq!(loaded.log_book, book);
    assert_eq!(loaded.skipped.len(), 1);
    assert_eq!(loaded.skipped[0].id, ChunkId::from_tag(*b"ZZZZ"));
    assert_eq!(loaded.skipped[0].reason, SkipReason::Unknown { version: 3 });
    assert_eq!(loaded.warnings().count(), 0);
}

#[test]
fn corrupt_dive_version_drops_only_that_dive() {
    let book = sample_book();
    let mut bytes = encode(&book);
    let second_dive = scan_chunks(Cursor::new(bytes.clone()))
        .unwrap()
        .into_iter()
        .filter(|c| c.header.id == ChunkId::DIVE_LOG)
        .nth(1)
        .unwrap();
    let at = second_dive.offset as usize + 8;
    bytes[at..at + 4].copy_from_slice(&99u32.to_be_bytes());

    let loaded = read_log_book(Cursor::new(bytes)).unwrap();
    let numbers: Vec<_> = loaded
        .log_book
        .dive_logs()
        .iter()
        .map(|d| d.log_number())
        .collect();
    assert_eq!(numbers, [1, 3]);
    assert_eq!(loaded.log_book.location_logs(), book.location_logs());
    assert_eq!(loaded.log_book.equipment_logs(), book.equipment_logs());
    assert_eq!(loaded.log_book.personal(), book.personal());

    let warnings: Vec<_> = loaded.warnings().collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].id, ChunkId::DIVE_LOG);
    assert_eq!(warnings[0].offset, second_dive.offset);
    assert_eq!(
        warnings[0].reason,
        SkipReason::Corrupt(DecodeError::UnsupportedVersion(99))
    );
}

#[test]
fn location_with_size_drift_is_skipped() {
    let book = sample_book();
    let bytes = encode(&book);
    let mut locations = chunks_of(&bytes, ChunkId::LOCATION_LOG);
    // two stray bytes inside the first location, size bumped to cover them
    let size = locations[0].len() as u32 + 2;
    locations[0].extend_from_slice(&[0xde, 0xad]);
    locations[0][4..8].copy_from_slice(&size.to_be_bytes());

    let mut chunks = chunks_of(&bytes, ChunkId::PERSONAL_INFO);
    chunks.extend(locations);
    chunks.extend(chunks_of(&bytes, ChunkId::DIVE_LOG));

    let loaded = read_log_book(Cursor::new(assemble(&chunks))).unwrap();
    let names: Vec<_> = loaded
        .log_book
        .location_logs()
        .iter()
        .map(|l| l.name.as_str())
        .collect();
    assert_eq!(names, ["Wreck"]);
    assert_eq!(loaded.log_book.dive_logs(), book.dive_logs());
    assert!(matches!(
        loaded.warnings().next().unwrap().reason,
        SkipReason::Corrupt(DecodeError::PositionMismatch { .. })
    ));
}

#[test]
fn records_are_sorted_on_load() {
    let mut dives = Vec::new();
    for n in [3, 1, 2] {
        let mut book = LogBook::new();
        book.insert_dive_log(DiveLog::new(n));
        dives.extend(chunks_of(&encode(&book), ChunkId::DIVE_LOG));
    }
    let mut locations = Vec::new();
    for name in ["Wreck", "Anchor", "Reef"] {
        let mut book = LogBook::new();
        book.insert_location_log(LocationLog::new(name, ""));
        locations.extend(chunks_of(&encode(&book), ChunkId::LOCATION_LOG));
    }
    dives.extend(locations);

    let book = read_log_book(Cursor::new(assemble(&dives)))
        .unwrap()
        .log_book;
    let numbers: Vec<_> = book.dive_logs().iter().map(|d| d.log_number()).collect();
    assert_eq!(numbers, [1, 2, 3]);
    let names: Vec<_> = book.location_logs().iter().map(|l| l.name.as_str()).collect();
    assert_eq!(names, ["Anchor", "Reef", "Wreck"]);
}

#[test]
fn truncated_file_fails_loudly() {
    let bytes = encode(&sample_book());
    let last = scan_chunks(Cursor::new(bytes.clone()))
        .unwrap()
        .last()
        .unwrap()
        .offset as usize;
    let cut = last + 12 + 2;

    let truncated = bytes[..cut].to_vec();
    assert!(matches!(
        read_log_book(Cursor::new(truncated.clone())),
        Err(Error::Format(FormatError::SizeMismatch { .. }))
    ));

    // even with a consistent file size the dangling chunk is caught
    let mut patched = truncated;
    set_file_size(&mut patched);
    assert!(matches!(
        read_log_book(Cursor::new(patched)),
        Err(Error::Format(FormatError::Truncated { .. }))
    ));
}

#[test]
fn unknown_chunk_past_end_is_truncation() {
    let mut unknown = b"ZZZZ".to_vec();
    unknown.extend_from_slice(&500u32.to_be_bytes());
    unknown.extend_from_slice(&1u32.to_be_bytes());
    assert!(matches!(
        read_log_book(Cursor::new(assemble(&[unknown]))),
        Err(Error::Format(FormatError::Truncated { offset: 12, next: 512, .. }))
    ));
}

#[test]
fn header_only_unknown_chunk_is_skipped() {
    let bytes = encode(&sample_book());
    let mut empty = b"ZZZZ".to_vec();
    empty.extend_from_slice(&12u32.to_be_bytes());
    empty.extend_from_slice(&4u32.to_be_bytes());

    let mut chunks = chunks_of(&bytes, ChunkId::DIVE_LOG);
    chunks.insert(1, empty.clone());
    let loaded = read_log_book(Cursor::new(assemble(&chunks))).unwrap();
    assert_eq!(loaded.log_book.dive_logs().len(), 3);
    assert_eq!(loaded.skipped.len(), 1);
    assert_eq!(loaded.skipped[0].reason, SkipReason::Unknown { version: 4 });

    // last in the file, ending exactly at the end
    let loaded = read_log_book(Cursor::new(assemble(&[empty.clone()]))).unwrap();
    assert!(loaded.log_book.is_empty());
    assert_eq!(loaded.skipped.len(), 1);

    // a size that does not even cover the header cannot be skipped
    empty[4..8].copy_from_slice(&11u32.to_be_bytes());
    assert!(matches!(
        read_log_book(Cursor::new(assemble(&[empty]))),
        Err(Error::Format(FormatError::Truncated { offset: 12, next: 23, .. }))
    ));
}

#[test]
fn save_and_load_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("book.slb");
    let book = sample_book();

    let len = save_log_book(&book, &path).unwrap();
    assert_eq!(fs::metadata(&path).unwrap().len(), len);
    let loaded = load_log_book(&path).unwrap();
    assert_eq!(loaded.log_book, book);

    // overwrite with a smaller book
    let mut smaller = LogBook::new();
    smaller.personal_mut().diver_name = "Grace".into();
    save_log_book(&smaller, &path).unwrap();
    assert_eq!(load_log_book(&path).unwrap().log_book, smaller);
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn failed_save_leaves_no_partial_file() {
    let dir = tempfile::tempdir().unwrap();
    // a directory in the way makes the final rename fail
    let path = dir.path().join("book.slb");
    fs::create_dir(&path).unwrap();
    fs::write(path.join("keep"), b"untouched").unwrap();

    let err = save_log_book(&sample_book(), &path).unwrap_err();
    assert!(matches!(err, Error::Path { .. }));
    assert!(matches!(err.root(), Error::Io(_)));

    let entries: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(entries, ["book.slb"]);
    assert_eq!(fs::read(path.join("keep")).unwrap(), b"untouched");
}

#[test]
fn failed_encode_keeps_previous_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("book.slb");
    save_log_book(&sample_book(), &path).unwrap();
    let before = fs::read(&path).unwrap();

    let mut book = sample_book();
    book.new_dive_log().dive_date = NaiveDate::from_ymd_opt(-5000, 1, 1);
    let err = save_log_book(&book, &path).unwrap_err();
    assert!(err.to_string().contains("book.slb"));
    assert!(matches!(
        err.root(),
        Error::Io(e) if e.kind() == io::ErrorKind::InvalidInput
    ));

    assert_eq!(fs::read(&path).unwrap(), before);
    let entries: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(entries, ["book.slb"]);
}

#[test]
fn missing_file_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nope.slb");
    let err = load_log_book(&path).unwrap_err();
    assert!(err.to_string().contains("nope.slb"));
    assert!(matches!(err.root(), Error::Io(_)));
}

#[test]
fn equipment_history_goes_with_equipment_after_reload() {
    let mut book = sample_book();
    let mut bcd = EquipmentLog::new("BCD", "Hydros");
    bcd.add_history(None, "Inflator replaced");
    bcd.add_history(None, "Dump valve leak");
    book.add_equipment_log(bcd);

    let mut book = read_log_book(Cursor::new(encode(&book)))
        .unwrap()
        .log_book;
    assert_eq!(book.history_entry_count(), 3);
    book.remove_equipment_log(1).unwrap();
    assert_eq!(book.history_entry_count(), 1);
}
