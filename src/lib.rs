//! # livezip
//!
//! A streaming ZIP64 encoder whose output size is known in advance.
//!
//! This library turns a list of file entries into a ZIP64 archive
//! produced as a lazy asynchronous byte stream. Sizes and checksums are
//! supplied up front, so the exact archive length is available before
//! the first byte is emitted - ideal for HTTP responders that need a
//! Content-Length header - and files are read incrementally one at a
//! time, keeping memory flat regardless of file sizes.
//!
//! ## Features
//!
//! - ZIP64 output readable by standard tools, methods STORED and DEFLATE
//! - Total archive size computed before any file is opened
//! - Lazy, pull-driven output stream; one data source open at a time
//! - Pluggable asynchronous data sources (local file, HTTP, in-memory)
//! - DEFLATE wrapping via uncompressed stored blocks, so the wire size
//!   stays a pure function of the input size
//!
//! ## Example
//!
//! ```no_run
//! use futures_util::{TryStreamExt, pin_mut};
//! use livezip::{FileEntry, FileStream, StorageMethod, StreamFactory, ZipEncoder};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let factory: StreamFactory = Box::new(|| Box::new(FileStream::new("video.mp4")));
//!     let entry = FileEntry::new("assets/video.mp4", StorageMethod::Stored, factory,
//!         734_003_200, 0x8CAF_31D2);
//!
//!     let mut encoder = ZipEncoder::new(vec![entry]);
//!     encoder.prepare()?;
//!     println!("Content-Length: {}", encoder.total_size()?);
//!
//!     let data = encoder.get_data()?;
//!     pin_mut!(data);
//!     while let Some(chunk) = data.try_next().await? {
//!         // write the chunk to the response body
//!         drop(chunk);
//!     }
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod io;
pub mod zip;

pub use cli::Cli;
pub use io::{DataStream, FileStream, HttpStream, MemoryStream, StreamFactory, UrlFactory};
pub use zip::{DosDateTime, EncodeError, FileEntry, Plan, StorageMethod, ZipEncoder};
