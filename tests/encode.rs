//! End-to-end tests: encode archives, then read them back with an
//! independent walker and verify every byte landed where the plan said
//! it would.

use std::collections::VecDeque;
use std::io::{Cursor, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::anyhow;
use async_trait::async_trait;
use byteorder::{LittleEndian, ReadBytesExt};
use bytes::Bytes;
use flate2::read::DeflateDecoder;
use futures_util::{StreamExt, pin_mut};

use livezip::{
    DataStream, EncodeError, FileEntry, MemoryStream, StorageMethod, StreamFactory, ZipEncoder,
};

/// Drain the encoder's output into one buffer.
async fn collect(encoder: &ZipEncoder) -> Result<Vec<u8>, EncodeError> {
    let stream = encoder.get_data()?;
    pin_mut!(stream);

    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk?);
    }
    Ok(out)
}

/// Drain until the first error, returning the bytes seen before it.
async fn collect_until_error(encoder: &ZipEncoder) -> (Vec<u8>, EncodeError) {
    let stream = encoder.get_data().unwrap();
    pin_mut!(stream);

    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => out.extend_from_slice(&chunk),
            Err(error) => return (out, error),
        }
    }
    panic!("expected the stream to fail");
}

fn mem_entry(path: &str, storage: StorageMethod, data: &[u8]) -> FileEntry {
    let bytes = Bytes::copy_from_slice(data);
    let crc32 = crc32fast::hash(data);
    let factory: StreamFactory = Box::new(move || Box::new(MemoryStream::new(bytes.clone())));
    FileEntry::new(path, storage, factory, data.len() as u64, crc32)
}

struct ParsedEntry {
    name: String,
    flags: u16,
    method: u16,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    lfh_offset: u64,
    payload: Vec<u8>,
}

impl ParsedEntry {
    fn contents(&self) -> Vec<u8> {
        match self.method {
            0 => self.payload.clone(),
            8 => {
                let mut decoder = DeflateDecoder::new(&self.payload[..]);
                let mut out = Vec::with_capacity(self.uncompressed_size as usize);
                decoder.read_to_end(&mut out).unwrap();
                out
            }
            other => panic!("unexpected compression method {other}"),
        }
    }
}

/// Walk a produced archive from its tail, the way any conforming reader
/// would: EOCD, ZIP64 locator, ZIP64 record, central directory, then
/// each entry's local header and payload.
fn parse_archive(data: &[u8]) -> Vec<ParsedEntry> {
    let eocd_at = data.len() - 22;
    assert_eq!(&data[eocd_at..eocd_at + 4], b"PK\x05\x06");

    let locator_at = eocd_at - 20;
    assert_eq!(&data[locator_at..locator_at + 4], b"PK\x06\x07");
    let eocd64_at =
        u64::from_le_bytes(data[locator_at + 8..locator_at + 16].try_into().unwrap()) as usize;

    assert_eq!(&data[eocd64_at..eocd64_at + 4], b"PK\x06\x06");
    let entries = u64::from_le_bytes(data[eocd64_at + 32..eocd64_at + 40].try_into().unwrap());
    let cd_size =
        u64::from_le_bytes(data[eocd64_at + 40..eocd64_at + 48].try_into().unwrap()) as usize;
    let cd_offset =
        u64::from_le_bytes(data[eocd64_at + 48..eocd64_at + 56].try_into().unwrap()) as usize;
    assert_eq!(cd_offset + cd_size, eocd64_at);

    let mut cursor = Cursor::new(&data[cd_offset..cd_offset + cd_size]);
    let mut parsed = Vec::with_capacity(entries as usize);
    for _ in 0..entries {
        parsed.push(parse_central_header(&mut cursor, data));
    }
    assert_eq!(cursor.position() as usize, cd_size);

    parsed
}

fn parse_central_header(cursor: &mut Cursor<&[u8]>, data: &[u8]) -> ParsedEntry {
    assert_eq!(cursor.read_u32::<LittleEndian>().unwrap(), 0x0201_4B50);
    assert_eq!(cursor.read_u16::<LittleEndian>().unwrap(), 45);
    assert_eq!(cursor.read_u16::<LittleEndian>().unwrap(), 45);
    let flags = cursor.read_u16::<LittleEndian>().unwrap();
    let method = cursor.read_u16::<LittleEndian>().unwrap();
    let _mod_time = cursor.read_u16::<LittleEndian>().unwrap();
    let _mod_date = cursor.read_u16::<LittleEndian>().unwrap();
    let crc32 = cursor.read_u32::<LittleEndian>().unwrap();
    assert_eq!(cursor.read_u32::<LittleEndian>().unwrap(), 0xFFFF_FFFF);
    assert_eq!(cursor.read_u32::<LittleEndian>().unwrap(), 0xFFFF_FFFF);
    let name_len = cursor.read_u16::<LittleEndian>().unwrap() as usize;
    let extra_len = cursor.read_u16::<LittleEndian>().unwrap();
    assert_eq!(extra_len, 28);
    assert_eq!(cursor.read_u16::<LittleEndian>().unwrap(), 0); // comment
    assert_eq!(cursor.read_u16::<LittleEndian>().unwrap(), 0); // disk
    let _internal = cursor.read_u16::<LittleEndian>().unwrap();
    let _external = cursor.read_u32::<LittleEndian>().unwrap();
    assert_eq!(cursor.read_u32::<LittleEndian>().unwrap(), 0xFFFF_FFFF);

    let mut name = vec![0u8; name_len];
    cursor.read_exact(&mut name).unwrap();
    let name = String::from_utf8(name).unwrap();

    // ZIP64 extra: all three wide fields are always present.
    assert_eq!(cursor.read_u16::<LittleEndian>().unwrap(), 0x0001);
    assert_eq!(cursor.read_u16::<LittleEndian>().unwrap(), 24);
    let uncompressed_size = cursor.read_u64::<LittleEndian>().unwrap();
    let compressed_size = cursor.read_u64::<LittleEndian>().unwrap();
    let lfh_offset = cursor.read_u64::<LittleEndian>().unwrap();

    // The local header must agree with the directory.
    let lfh = &data[lfh_offset as usize..];
    assert_eq!(&lfh[0..4], b"PK\x03\x04");
    let lfh_name_len = u16::from_le_bytes([lfh[26], lfh[27]]) as usize;
    let lfh_extra_len = u16::from_le_bytes([lfh[28], lfh[29]]) as usize;
    assert_eq!(lfh_name_len, name_len);
    assert_eq!(&lfh[30..30 + name_len], name.as_bytes());

    let payload_at = lfh_offset as usize + 30 + lfh_name_len + lfh_extra_len;
    let payload = data[payload_at..payload_at + compressed_size as usize].to_vec();

    ParsedEntry {
        name,
        flags,
        method,
        crc32,
        compressed_size,
        uncompressed_size,
        lfh_offset,
        payload,
    }
}

/// Shared open/read/close accounting for instrumented sources.
#[derive(Default)]
struct Gauge {
    opens: AtomicUsize,
    closes: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl Gauge {
    fn on_open(&self) {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
    }

    fn on_close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone)]
enum Step {
    Chunk(&'static [u8]),
    Fail(&'static str),
}

/// A source that replays a scripted sequence of reads.
struct ScriptedStream {
    steps: VecDeque<Step>,
    gauge: Arc<Gauge>,
}

#[async_trait]
impl DataStream for ScriptedStream {
    async fn open(&mut self) -> anyhow::Result<()> {
        self.gauge.on_open();
        Ok(())
    }

    async fn read(&mut self, max: usize) -> anyhow::Result<Bytes> {
        match self.steps.pop_front() {
            None => Ok(Bytes::new()),
            Some(Step::Chunk(data)) => {
                assert!(data.len() <= max);
                Ok(Bytes::from_static(data))
            }
            Some(Step::Fail(message)) => Err(anyhow!(message)),
        }
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        self.gauge.on_close();
        Ok(())
    }
}

fn scripted_entry(
    path: &str,
    uncompressed_size: u64,
    steps: Vec<Step>,
    gauge: Arc<Gauge>,
) -> FileEntry {
    let factory: StreamFactory = Box::new(move || {
        Box::new(ScriptedStream {
            steps: steps.clone().into(),
            gauge: gauge.clone(),
        })
    });
    FileEntry::new(path, StorageMethod::Stored, factory, uncompressed_size, 0)
}

#[tokio::test]
async fn empty_archive_is_a_bare_trailer() {
    let mut encoder = ZipEncoder::new(Vec::new());
    encoder.prepare().unwrap();
    assert_eq!(encoder.total_size().unwrap(), 98);

    let data = collect(&encoder).await.unwrap();
    assert_eq!(data.len(), 98);
    assert_eq!(&data[0..4], b"PK\x06\x06");
    assert_eq!(&data[56..60], b"PK\x06\x07");
    assert_eq!(&data[76..80], b"PK\x05\x06");

    // The ZIP64 record reports an empty directory at offset zero.
    assert_eq!(u64::from_le_bytes(data[32..40].try_into().unwrap()), 0);
    assert_eq!(u64::from_le_bytes(data[40..48].try_into().unwrap()), 0);
    assert_eq!(u64::from_le_bytes(data[48..56].try_into().unwrap()), 0);

    assert!(parse_archive(&data).is_empty());
}

#[tokio::test]
async fn stored_hello_matches_the_worked_example() {
    let mut encoder = ZipEncoder::new(vec![mem_entry("a.txt", StorageMethod::Stored, b"hello")]);
    encoder.prepare().unwrap();
    assert_eq!(encoder.total_size().unwrap(), 237);

    let data = collect(&encoder).await.unwrap();
    assert_eq!(data.len(), 237);

    let entries = parse_archive(&data);
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.name, "a.txt");
    assert_eq!(entry.method, 0);
    assert_eq!(entry.crc32, 0x3610_A686);
    assert_eq!(entry.compressed_size, 5);
    assert_eq!(entry.uncompressed_size, 5);
    assert_eq!(entry.lfh_offset, 0);
    assert_eq!(entry.payload, b"hello");
}

#[tokio::test]
async fn deflated_hello_matches_the_worked_example() {
    let mut encoder = ZipEncoder::new(vec![mem_entry("a.txt", StorageMethod::Deflated, b"hello")]);
    encoder.prepare().unwrap();
    assert_eq!(encoder.total_size().unwrap(), 242);

    let data = collect(&encoder).await.unwrap();
    assert_eq!(data.len(), 242);

    // One stored block: BFINAL, LEN 5, NLEN !5, then the raw bytes.
    assert_eq!(
        &data[55..65],
        &[0x01, 0x05, 0x00, 0xFA, 0xFF, 0x68, 0x65, 0x6C, 0x6C, 0x6F]
    );

    let entries = parse_archive(&data);
    assert_eq!(entries[0].contents(), b"hello");
}

#[tokio::test]
async fn archives_round_trip_through_a_reader() {
    let blob: Vec<u8> = (0..150_000u32).map(|i| (i % 251) as u8).collect();
    let inputs: Vec<(&str, StorageMethod, Vec<u8>)> = vec![
        ("éléphant.txt", StorageMethod::Deflated, b"trompe".to_vec()),
        ("data/blob.bin", StorageMethod::Stored, blob.clone()),
        ("data/blocks.bin", StorageMethod::Deflated, blob),
        ("empty.txt", StorageMethod::Stored, Vec::new()),
    ];

    let mut encoder = ZipEncoder::new(
        inputs
            .iter()
            .map(|(path, storage, data)| mem_entry(path, *storage, data))
            .collect(),
    );
    encoder.prepare().unwrap();

    let data = collect(&encoder).await.unwrap();
    assert_eq!(data.len() as u64, encoder.total_size().unwrap());

    let entries = parse_archive(&data);
    assert_eq!(entries.len(), inputs.len());

    let offsets = encoder.plan().unwrap().offsets().to_vec();
    for (i, ((path, storage, contents), entry)) in inputs.iter().zip(&entries).enumerate() {
        assert_eq!(&entry.name, path);
        assert_eq!(entry.method, storage.code());
        assert_eq!(entry.flags & (1 << 11), 1 << 11);
        assert_eq!(entry.lfh_offset, offsets[i]);
        assert_eq!(entry.uncompressed_size, contents.len() as u64);
        assert_eq!(entry.compressed_size, storage.wire_length(contents.len() as u64));

        let decoded = entry.contents();
        assert_eq!(&decoded, contents);
        assert_eq!(crc32fast::hash(&decoded), entry.crc32);
    }
}

#[tokio::test]
async fn archives_a_file_from_disk() {
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), b"spilled to disk first").unwrap();

    let path = file.path().to_path_buf();
    let factory: StreamFactory =
        Box::new(move || Box::new(livezip::FileStream::new(path.clone())));
    let entry = FileEntry::new(
        "notes.txt",
        StorageMethod::Deflated,
        factory,
        21,
        crc32fast::hash(b"spilled to disk first"),
    );

    let mut encoder = ZipEncoder::new(vec![entry]);
    encoder.prepare().unwrap();

    let data = collect(&encoder).await.unwrap();
    assert_eq!(data.len() as u64, encoder.total_size().unwrap());
    assert_eq!(parse_archive(&data)[0].contents(), b"spilled to disk first");
}

#[test]
fn planned_size_covers_huge_entries() {
    let factory: StreamFactory = Box::new(|| panic!("planning must not open any stream"));
    let entry = FileEntry::new(
        "big.bin",
        StorageMethod::Stored,
        factory,
        5_000_000_000,
        0x1234_5678,
    );

    let mut encoder = ZipEncoder::new(vec![entry]);
    encoder.prepare().unwrap();

    // 57-byte local header, the payload, 81-byte directory entry, trailer.
    assert_eq!(encoder.total_size().unwrap(), 57 + 5_000_000_000 + 81 + 98);
    assert_eq!(encoder.plan().unwrap().cd_offset(), 57 + 5_000_000_000);
}

#[tokio::test]
async fn short_sources_fail_with_a_size_mismatch() {
    let factory: StreamFactory = Box::new(|| Box::new(MemoryStream::new(&b"hello"[..])));
    let entry = FileEntry::new("a.bin", StorageMethod::Stored, factory, 10, 0);

    let mut encoder = ZipEncoder::new(vec![entry]);
    encoder.prepare().unwrap();

    match collect(&encoder).await {
        Err(EncodeError::SizeMismatch {
            name,
            expected,
            actual,
        }) => {
            assert_eq!(name, "a.bin");
            assert_eq!(expected, 10);
            assert_eq!(actual, 5);
        }
        other => panic!("expected a size mismatch, got {other:?}"),
    }
}

#[tokio::test]
async fn overlong_sources_fail_before_polluting_the_output() {
    let factory: StreamFactory = Box::new(|| Box::new(MemoryStream::new(&b"hello"[..])));
    let entry = FileEntry::new("a.bin", StorageMethod::Stored, factory, 3, 0);

    let mut encoder = ZipEncoder::new(vec![entry]);
    encoder.prepare().unwrap();

    let (seen, error) = collect_until_error(&encoder).await;
    assert!(matches!(error, EncodeError::SizeMismatch { .. }));
    // Only the local header made it out; the oversized chunk never did.
    assert_eq!(seen.len(), 55);
}

#[tokio::test]
async fn overlong_sources_are_detected_under_deflate_too() {
    let factory: StreamFactory = Box::new(|| Box::new(MemoryStream::new(&b"hello"[..])));
    let entry = FileEntry::new("a.bin", StorageMethod::Deflated, factory, 3, 0);

    let mut encoder = ZipEncoder::new(vec![entry]);
    encoder.prepare().unwrap();

    assert!(matches!(
        collect(&encoder).await,
        Err(EncodeError::SizeMismatch { .. })
    ));
}

#[tokio::test]
async fn failing_source_stops_the_archive() {
    let gauge = Arc::new(Gauge::default());
    let first = scripted_entry(
        "first.bin",
        5,
        vec![Step::Chunk(b"he"), Step::Fail("connection reset")],
        gauge.clone(),
    );
    let second = scripted_entry("second.bin", 5, vec![Step::Chunk(b"world")], gauge.clone());

    let mut encoder = ZipEncoder::new(vec![first, second]);
    encoder.prepare().unwrap();

    match collect(&encoder).await {
        Err(EncodeError::Upstream { name, cause }) => {
            assert_eq!(name, "first.bin");
            assert!(cause.to_string().contains("connection reset"));
        }
        other => panic!("expected an upstream error, got {other:?}"),
    }

    // The failing stream was closed; the second entry was never touched.
    assert_eq!(gauge.opens.load(Ordering::SeqCst), 1);
    assert_eq!(gauge.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn sources_are_opened_and_closed_exactly_once() {
    let gauge = Arc::new(Gauge::default());
    let entries = vec![
        scripted_entry("a.bin", 2, vec![Step::Chunk(b"aa")], gauge.clone()),
        scripted_entry("b.bin", 2, vec![Step::Chunk(b"bb")], gauge.clone()),
        scripted_entry("c.bin", 2, vec![Step::Chunk(b"cc")], gauge.clone()),
    ];

    let mut encoder = ZipEncoder::new(entries);
    encoder.prepare().unwrap();
    let data = collect(&encoder).await.unwrap();
    assert_eq!(data.len() as u64, encoder.total_size().unwrap());

    assert_eq!(gauge.opens.load(Ordering::SeqCst), 3);
    assert_eq!(gauge.closes.load(Ordering::SeqCst), 3);
    assert_eq!(gauge.max_active.load(Ordering::SeqCst), 1);
}
