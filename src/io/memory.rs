use anyhow::{Result, bail};
use async_trait::async_trait;
use bytes::Bytes;

use super::DataStream;

/// Data stream over an in-memory buffer.
///
/// Lets synthesized content - a manifest built on the fly, fixture data
/// in tests - be archived through the same interface as file or HTTP
/// sources. Cloning the backing [`Bytes`] is cheap, so a factory can
/// hand out fresh streams without copying the data.
pub struct MemoryStream {
    data: Bytes,
    cursor: Option<Bytes>,
}

impl MemoryStream {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            cursor: None,
        }
    }
}

#[async_trait]
impl DataStream for MemoryStream {
    async fn open(&mut self) -> Result<()> {
        self.cursor = Some(self.data.clone());
        Ok(())
    }

    async fn read(&mut self, max: usize) -> Result<Bytes> {
        let Some(cursor) = self.cursor.as_mut() else {
            bail!("memory stream is not open");
        };

        let take = cursor.len().min(max);
        Ok(cursor.split_to(take))
    }

    async fn close(&mut self) -> Result<()> {
        self.cursor = None;
        Ok(())
    }
}
