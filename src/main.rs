//! Main entry point for the livezip CLI application.
//!
//! This binary archives local files using the streaming encoder: it
//! computes each file's size and CRC32 up front, announces the archive
//! size before emitting a byte, then streams the output to a file or to
//! stdout.

use std::path::Path;

use anyhow::{Context, Result, bail};
use clap::Parser;
use futures_util::{TryStreamExt, pin_mut};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};

use livezip::{Cli, DosDateTime, FileEntry, FileStream, StreamFactory, ZipEncoder};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if !cli.to_stdout() && !cli.force && Path::new(&cli.archive).exists() {
        bail!("{} already exists, pass -f to overwrite", cli.archive);
    }

    let mut entries = Vec::with_capacity(cli.files.len());
    for file in &cli.files {
        let entry = build_entry(file, &cli)
            .await
            .with_context(|| format!("cannot add {file}"))?;
        entries.push(entry);
    }

    let mut encoder = ZipEncoder::new(entries);
    encoder.prepare()?;

    if !cli.quiet {
        eprintln!("Archive will be {}", format_size(encoder.total_size()?));
    }

    if cli.to_stdout() {
        write_archive(&encoder, tokio::io::stdout()).await?;
    } else {
        let out = File::create(&cli.archive)
            .await
            .with_context(|| format!("cannot create {}", cli.archive))?;
        write_archive(&encoder, out).await?;

        if !cli.quiet {
            eprintln!("Wrote {}", cli.archive);
        }
    }

    Ok(())
}

/// Build an archive entry for a local file.
///
/// This is the pre-computation pass: the file's metadata provides size
/// and modification time, and one streaming read computes the CRC32.
/// The encoder itself writes these values verbatim later, when the
/// entry's data is streamed a second time.
async fn build_entry(file: &str, cli: &Cli) -> Result<FileEntry> {
    let meta = tokio::fs::metadata(file).await?;
    if meta.is_dir() {
        bail!("directories are not supported");
    }

    let crc32 = checksum(file).await?;
    let source = file.to_string();
    let factory: StreamFactory = Box::new(move || Box::new(FileStream::new(source.clone())));

    let mut entry = FileEntry::new(
        entry_name(file),
        cli.store.method(),
        factory,
        meta.len(),
        crc32,
    );
    if let Ok(modified) = meta.modified() {
        entry = entry.with_modified(DosDateTime::from_system_time(modified));
    }

    Ok(entry)
}

/// CRC32 of a file's contents, computed in a single streaming pass.
async fn checksum(file: &str) -> Result<u32> {
    let mut f = File::open(file).await?;
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let n = f.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hasher.finalize())
}

/// Drive the encoder's output stream into a writer.
async fn write_archive<W>(encoder: &ZipEncoder, mut out: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let stream = encoder.get_data()?;
    pin_mut!(stream);

    while let Some(chunk) = stream.try_next().await? {
        out.write_all(&chunk).await?;
    }
    out.flush().await?;

    Ok(())
}

/// Archive member name for a filesystem path: forward slashes, no
/// leading slash or ./ prefix.
fn entry_name(file: &str) -> String {
    let name = file.replace('\\', "/");
    name.trim_start_matches("./")
        .trim_start_matches('/')
        .to_string()
}

/// Format a byte size into a human-readable string.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
