mod encoder;
mod storage;
mod structures;

pub use encoder::{EncodeError, FileEntry, Plan, ZipEncoder};
pub use storage::StorageMethod;
pub use structures::*;
