//! The archive encoder.
//!
//! Encoding happens in two stages:
//!
//! 1. [`ZipEncoder::prepare`] walks the entry list once and assigns every
//!    local header its byte offset. Because header lengths depend only on
//!    name lengths and wire sizes only on the storage method, the total
//!    archive size falls out of this walk - before any file is read. An
//!    HTTP responder can put it straight into a Content-Length header.
//! 2. [`ZipEncoder::get_data`] lazily produces the archive bytes. Each
//!    entry's source is opened only when its turn arrives, drained
//!    through its storage method, and closed again, so peak memory stays
//!    flat no matter how large the files are.
//!
//! ## Example
//!
//! ```no_run
//! use livezip::{FileEntry, MemoryStream, StorageMethod, StreamFactory, ZipEncoder};
//! use futures_util::{TryStreamExt, pin_mut};
//!
//! # async fn example() -> Result<(), livezip::EncodeError> {
//! let greeting = bytes::Bytes::from_static(b"hello");
//! let factory: StreamFactory = Box::new(move || Box::new(MemoryStream::new(greeting.clone())));
//! let entry = FileEntry::new("hello.txt", StorageMethod::Deflated, factory, 5, 0x3610_A686);
//!
//! let mut encoder = ZipEncoder::new(vec![entry]);
//! encoder.prepare()?;
//! println!("Content-Length: {}", encoder.total_size()?);
//!
//! let data = encoder.get_data()?;
//! pin_mut!(data);
//! while let Some(_chunk) = data.try_next().await? {
//!     // hand the chunk to the response body
//! }
//! # Ok(())
//! # }
//! ```

use async_stream::try_stream;
use bytes::Bytes;
use futures_core::stream::Stream;
use futures_util::{StreamExt, pin_mut};
use thiserror::Error;

use crate::io::{DataStream, StreamFactory};
use crate::zip::storage::StorageMethod;
use crate::zip::structures::{
    CentralDirectoryHeader, DosDateTime, EndOfCentralDirectory, LocalFileHeader,
    Zip64EndOfCentralDirectory, Zip64EndOfCentralDirectoryLocator,
};

/// EOCD64 + locator + EOCD, present in every archive.
const TRAILER_SIZE: u64 = (Zip64EndOfCentralDirectory::SIZE
    + Zip64EndOfCentralDirectoryLocator::SIZE
    + EndOfCentralDirectory::SIZE) as u64;

/// Errors surfaced while planning or streaming an archive.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// `total_size` or `get_data` was called before `prepare`.
    #[error("the archive has not been prepared")]
    PlanMissing,

    /// An entry name does not fit the 16-bit name length field.
    #[error("entry name is {len} bytes encoded, the format allows at most 65535")]
    NameTooLong { name: String, len: usize },

    /// A data source delivered a different number of wire bytes than its
    /// entry declared. The headers already committed to the declared
    /// length, so the archive cannot be completed.
    #[error("entry {name:?} produced {actual} wire bytes, expected {expected}")]
    SizeMismatch {
        name: String,
        expected: u64,
        actual: u64,
    },

    /// A data source failed to open, read, or close.
    #[error("I/O error while streaming {name:?}: {cause}")]
    Upstream { name: String, cause: anyhow::Error },
}

/// One archive member: a name, a storage method, pre-computed size and
/// checksum, and a factory for the byte source drained when the entry's
/// turn in the archive arrives.
pub struct FileEntry {
    path: String,
    storage: StorageMethod,
    factory: StreamFactory,
    uncompressed_size: u64,
    compressed_size: u64,
    crc32: u32,
    modified: DosDateTime,
}

impl FileEntry {
    /// Creates an entry. `path` is the name inside the archive: UTF-8,
    /// forward-slash separators, no leading slash. `crc32` is the IEEE
    /// CRC32 of the uncompressed content; the encoder writes it verbatim
    /// and never recomputes it. The wire size is derived from the storage
    /// method, so it is always consistent with what streaming will emit.
    pub fn new(
        path: impl Into<String>,
        storage: StorageMethod,
        factory: StreamFactory,
        uncompressed_size: u64,
        crc32: u32,
    ) -> Self {
        Self {
            path: path.into(),
            storage,
            factory,
            uncompressed_size,
            compressed_size: storage.wire_length(uncompressed_size),
            crc32,
            modified: DosDateTime::default(),
        }
    }

    /// Sets the modification timestamp recorded in the headers. Entries
    /// default to the DOS epoch, 1980-01-01 00:00:00.
    pub fn with_modified(mut self, modified: DosDateTime) -> Self {
        self.modified = modified;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn uncompressed_size(&self) -> u64 {
        self.uncompressed_size
    }

    /// Number of bytes the entry's payload occupies on the wire.
    pub fn compressed_size(&self) -> u64 {
        self.compressed_size
    }

    fn local_header_len(&self) -> u64 {
        LocalFileHeader::encoded_len(self.path.len())
    }

    fn central_header_len(&self) -> u64 {
        CentralDirectoryHeader::encoded_len(self.path.len())
    }

    fn local_header(&self) -> LocalFileHeader<'_> {
        LocalFileHeader {
            method: self.storage.code(),
            modified: self.modified,
            crc32: self.crc32,
            compressed_size: self.compressed_size,
            uncompressed_size: self.uncompressed_size,
            file_name: &self.path,
        }
    }

    fn central_header(&self, local_header_offset: u64) -> CentralDirectoryHeader<'_> {
        CentralDirectoryHeader {
            method: self.storage.code(),
            modified: self.modified,
            crc32: self.crc32,
            compressed_size: self.compressed_size,
            uncompressed_size: self.uncompressed_size,
            local_header_offset,
            file_name: &self.path,
        }
    }
}

/// Archive layout computed by [`ZipEncoder::prepare`]: where each local
/// header lands and how large the whole output will be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    offsets: Vec<u64>,
    cd_offset: u64,
    cd_size: u64,
    total_size: u64,
}

impl Plan {
    /// Byte offset of each entry's local header, in entry order.
    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    pub fn cd_offset(&self) -> u64 {
        self.cd_offset
    }

    pub fn cd_size(&self) -> u64 {
        self.cd_size
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }
}

/// Streams a list of entries as a ZIP64 archive whose total length is
/// known before the first byte is produced.
pub struct ZipEncoder {
    entries: Vec<FileEntry>,
    plan: Option<Plan>,
}

impl ZipEncoder {
    /// An empty list is fine: the result is a bare 98-byte trailer.
    pub fn new(entries: Vec<FileEntry>) -> Self {
        Self {
            entries,
            plan: None,
        }
    }

    /// Computes the archive layout. Must be called before
    /// [`total_size`](Self::total_size) or [`get_data`](Self::get_data);
    /// calling it again is a no-op.
    pub fn prepare(&mut self) -> Result<(), EncodeError> {
        if self.plan.is_some() {
            return Ok(());
        }

        for entry in &self.entries {
            let len = entry.path.len();
            if len > usize::from(u16::MAX) {
                return Err(EncodeError::NameTooLong {
                    name: entry.path.clone(),
                    len,
                });
            }
        }

        let mut offsets = Vec::with_capacity(self.entries.len());
        let mut running = 0u64;
        let mut cd_size = 0u64;

        for entry in &self.entries {
            offsets.push(running);
            running += entry.local_header_len() + entry.compressed_size;
            cd_size += entry.central_header_len();
        }

        let cd_offset = running;
        self.plan = Some(Plan {
            offsets,
            cd_offset,
            cd_size,
            total_size: cd_offset + cd_size + TRAILER_SIZE,
        });

        Ok(())
    }

    /// The exact number of bytes [`get_data`](Self::get_data) will yield.
    pub fn total_size(&self) -> Result<u64, EncodeError> {
        Ok(self.plan()?.total_size)
    }

    /// The layout computed by [`prepare`](Self::prepare).
    pub fn plan(&self) -> Result<&Plan, EncodeError> {
        self.plan.as_ref().ok_or(EncodeError::PlanMissing)
    }

    /// Produces the archive as a lazy stream of chunks.
    ///
    /// Entries are drained strictly in list order with at most one data
    /// source open at any instant; the source is closed on success and
    /// before any error reaches the consumer. Chunk boundaries carry no
    /// meaning - only the concatenation does.
    pub fn get_data(
        &self,
    ) -> Result<impl Stream<Item = Result<Bytes, EncodeError>> + Send + '_, EncodeError> {
        let plan = self.plan()?;

        Ok(try_stream! {
            for entry in &self.entries {
                yield entry.local_header().to_bytes();

                let mut source = (entry.factory)();
                let opened: Result<(), EncodeError> = match source.open().await {
                    Ok(()) => Ok(()),
                    Err(cause) => {
                        let _ = source.close().await;
                        Err(EncodeError::Upstream {
                            name: entry.path.clone(),
                            cause,
                        })
                    }
                };
                opened?;

                let mut wire = 0u64;
                let mut failure = None;
                {
                    let chunks = entry.storage.wrap(source.as_mut(), entry.uncompressed_size);
                    pin_mut!(chunks);

                    while let Some(next) = chunks.next().await {
                        match next {
                            Ok(chunk) => {
                                wire += chunk.len() as u64;
                                if wire > entry.compressed_size {
                                    failure = Some(EncodeError::SizeMismatch {
                                        name: entry.path.clone(),
                                        expected: entry.compressed_size,
                                        actual: wire,
                                    });
                                    break;
                                }
                                yield chunk;
                            }
                            Err(cause) => {
                                failure = Some(EncodeError::Upstream {
                                    name: entry.path.clone(),
                                    cause,
                                });
                                break;
                            }
                        }
                    }
                }

                // The source is closed before any failure propagates.
                let closed = source.close().await;
                let outcome: Result<(), EncodeError> = if let Some(error) = failure {
                    Err(error)
                } else if let Err(cause) = closed {
                    Err(EncodeError::Upstream {
                        name: entry.path.clone(),
                        cause,
                    })
                } else if wire != entry.compressed_size {
                    Err(EncodeError::SizeMismatch {
                        name: entry.path.clone(),
                        expected: entry.compressed_size,
                        actual: wire,
                    })
                } else {
                    Ok(())
                };
                outcome?;
            }

            for (entry, offset) in self.entries.iter().zip(plan.offsets.iter()) {
                yield entry.central_header(*offset).to_bytes();
            }

            yield Zip64EndOfCentralDirectory {
                entries: self.entries.len() as u64,
                cd_size: plan.cd_size,
                cd_offset: plan.cd_offset,
            }
            .to_bytes();
            yield Zip64EndOfCentralDirectoryLocator {
                eocd64_offset: plan.cd_offset + plan.cd_size,
            }
            .to_bytes();
            yield EndOfCentralDirectory.to_bytes();
        })
    }
}
