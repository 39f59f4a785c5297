mod http;
mod local;
mod memory;

pub use http::{HttpStream, UrlFactory};
pub use local::FileStream;
pub use memory::MemoryStream;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// Trait for sequential byte sources feeding archive entries.
///
/// Opening is separated from construction so that a long entry list does
/// not hold a live handle per entry; the encoder opens each stream only
/// when its entry's turn arrives and closes it on every exit path. Since
/// cancellation in Rust is a synchronous drop, implementations must also
/// release their resources in `Drop`.
#[async_trait]
pub trait DataStream: Send {
    /// Acquire whatever resource backs the stream. Called exactly once
    /// per use, before the first `read`.
    async fn open(&mut self) -> Result<()>;

    /// Read up to `max` bytes. An empty buffer means end of stream.
    async fn read(&mut self, max: usize) -> Result<Bytes>;

    /// Release the resource.
    async fn close(&mut self) -> Result<()>;
}

/// Factory producing a fresh [`DataStream`] each time its entry is
/// streamed.
pub type StreamFactory = Box<dyn Fn() -> Box<dyn DataStream> + Send + Sync>;
