//! Storage methods: how an entry's bytes are laid out on the wire.
//!
//! Both methods keep the wire length a pure function of the input length,
//! which is what lets the encoder compute every offset in the archive
//! before reading a single payload byte.

use anyhow::Result;
use async_stream::try_stream;
use bytes::{BufMut, Bytes, BytesMut};
use futures_core::stream::Stream;

use crate::io::DataStream;

/// Payload bytes carried by a single DEFLATE stored block.
const STORED_BLOCK_MAX: u64 = 0xFFFF;

/// BFINAL/BTYPE byte plus LEN and NLEN.
const STORED_BLOCK_HEADER: u64 = 5;

/// Read size used when passing bytes through untouched.
const READ_CHUNK: usize = 1024 * 1024;

/// Supported storage methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMethod {
    /// Method 0: the raw bytes, untouched.
    Stored,
    /// Method 8: the raw bytes packaged as uncompressed DEFLATE stored
    /// blocks. Costs 5 bytes per 64 KiB but keeps clients happy that
    /// insist on method 8, and the block headers let readers skip
    /// through the payload without scanning it.
    Deflated,
}

impl StorageMethod {
    /// Method code written to the file headers.
    pub fn code(self) -> u16 {
        match self {
            StorageMethod::Stored => 0,
            StorageMethod::Deflated => 8,
        }
    }

    /// Exact number of bytes the method emits for an input of
    /// `uncompressed` bytes. Matches [`wrap`](Self::wrap) byte for byte.
    pub fn wire_length(self, uncompressed: u64) -> u64 {
        match self {
            StorageMethod::Stored => uncompressed,
            StorageMethod::Deflated => {
                STORED_BLOCK_HEADER * Self::block_count(uncompressed) + uncompressed
            }
        }
    }

    /// Number of DEFLATE stored blocks for an input of `uncompressed`
    /// bytes. An empty input still needs one final block.
    fn block_count(uncompressed: u64) -> u64 {
        uncompressed.div_ceil(STORED_BLOCK_MAX).max(1)
    }

    /// Transform the chunks read from `source` into wire chunks.
    ///
    /// For `Deflated` every block except the last carries exactly 65535
    /// payload bytes, so the layout is fixed by `uncompressed` alone and
    /// short reads from the source cannot perturb it. A source that ends
    /// early or keeps producing past `uncompressed` makes the emitted
    /// byte count disagree with [`wire_length`](Self::wire_length), which
    /// the encoder reports as a size mismatch.
    pub fn wrap<'a>(
        self,
        source: &'a mut dyn DataStream,
        uncompressed: u64,
    ) -> impl Stream<Item = Result<Bytes>> + Send + 'a {
        try_stream! {
            match self {
                StorageMethod::Stored => loop {
                    let chunk = source.read(READ_CHUNK).await?;
                    if chunk.is_empty() {
                        break;
                    }
                    yield chunk;
                },
                StorageMethod::Deflated => {
                    let blocks = Self::block_count(uncompressed);
                    for index in 0..blocks {
                        let last = index + 1 == blocks;
                        let want = if last {
                            (uncompressed - index * STORED_BLOCK_MAX) as usize
                        } else {
                            STORED_BLOCK_MAX as usize
                        };

                        let mut payload = BytesMut::with_capacity(want);
                        while payload.len() < want {
                            let chunk = source.read(want - payload.len()).await?;
                            if chunk.is_empty() {
                                break;
                            }
                            payload.put_slice(&chunk);
                        }

                        let short = payload.len() < want;
                        let len = payload.len() as u16;
                        let mut block =
                            BytesMut::with_capacity(STORED_BLOCK_HEADER as usize + payload.len());
                        block.put_u8(u8::from(last));
                        block.put_u16_le(len);
                        block.put_u16_le(!len);
                        block.put_slice(&payload);
                        yield block.freeze();

                        if short {
                            break;
                        }
                    }

                    // Forward anything past the declared length so the
                    // encoder's byte count catches the overrun.
                    let excess = source.read(1).await?;
                    if !excess.is_empty() {
                        yield excess;
                    }
                }
            }
        }
    }
}
