use clap::{Parser, ValueEnum};

use crate::zip::StorageMethod;

#[derive(Parser, Debug)]
#[command(name = "livezip")]
#[command(version)]
#[command(about = "Streams files into a ZIP64 archive of predictable size", long_about = None)]
#[command(after_help = "Examples:\n  \
  livezip out.zip a.txt b.txt        archive two files with deflate wrapping\n  \
  livezip -s store out.zip big.iso   store big.iso without any wrapping\n  \
  livezip - logs/*.txt | wc -c       stream the archive to stdout")]
pub struct Cli {
    /// Archive to create, or - for stdout
    #[arg(value_name = "ARCHIVE")]
    pub archive: String,

    /// Files to add to the archive
    #[arg(value_name = "FILE", required = true)]
    pub files: Vec<String>,

    /// Storage method applied to every entry
    #[arg(short = 's', long = "store", value_enum, default_value = "deflate")]
    pub store: StoreChoice,

    /// Overwrite the archive if it already exists
    #[arg(short = 'f', long = "force")]
    pub force: bool,

    /// Quiet mode, no progress messages
    #[arg(short = 'q')]
    pub quiet: bool,
}

/// Storage methods selectable from the command line.
#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum StoreChoice {
    /// Raw bytes, method 0
    Store,
    /// Uncompressed DEFLATE blocks, method 8
    Deflate,
}

impl StoreChoice {
    pub fn method(self) -> StorageMethod {
        match self {
            StoreChoice::Store => StorageMethod::Stored,
            StoreChoice::Deflate => StorageMethod::Deflated,
        }
    }
}

impl Cli {
    pub fn to_stdout(&self) -> bool {
        self.archive == "-"
    }
}
