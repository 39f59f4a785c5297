use std::path::PathBuf;

use anyhow::{Result, bail};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use super::DataStream;

/// Data stream over a local file, opened lazily.
pub struct FileStream {
    path: PathBuf,
    file: Option<File>,
}

impl FileStream {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }
}

#[async_trait]
impl DataStream for FileStream {
    async fn open(&mut self) -> Result<()> {
        self.file = Some(File::open(&self.path).await?);
        Ok(())
    }

    async fn read(&mut self, max: usize) -> Result<Bytes> {
        let Some(file) = self.file.as_mut() else {
            bail!("stream for {} is not open", self.path.display());
        };

        let mut buf = vec![0u8; max];
        let n = file.read(&mut buf).await?;
        buf.truncate(n);
        Ok(Bytes::from(buf))
    }

    async fn close(&mut self) -> Result<()> {
        self.file = None;
        Ok(())
    }
}
