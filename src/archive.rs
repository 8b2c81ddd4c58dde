//! Locating the logical data file inside a source file.
//!
//! Compression and container type are decided from the file name alone
//! (`.gz`, `.tar.gz`, `.zip`), never from magic bytes, so a source with a
//! misleading extension is misdetected.

use std::fs::{self, File};
use std::io::{self, Cursor, Read, Take};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use tar::Archive;
use tracing::{debug, info};
use zip::ZipArchive;

use crate::error::ImportError;

const GZIP_SUFFIXES: &[&str] = &[".gz", ".tgz", ".z", "-gz", "-z", "_z"];
const TAR_GZIP_SUFFIXES: &[&str] = &[".tar.gz", ".tgz"];

/// Upper bound on the buffer reserved up front for a zip entry; the header's
/// declared size is not trusted beyond this.
const ZIP_PREALLOC_LIMIT: u64 = 8 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Plain,
    Gzip,
    TarGzip,
    Zip,
}

impl SourceKind {
    pub fn detect(path: &Path) -> Self {
        let name = path.to_string_lossy().to_lowercase();
        if TAR_GZIP_SUFFIXES.iter().any(|suffix| name.ends_with(*suffix)) {
            SourceKind::TarGzip
        } else if GZIP_SUFFIXES.iter().any(|suffix| name.ends_with(*suffix)) {
            SourceKind::Gzip
        } else if name.ends_with(".zip") {
            SourceKind::Zip
        } else {
            SourceKind::Plain
        }
    }

    pub fn is_compressed(self) -> bool {
        !matches!(self, SourceKind::Plain)
    }
}

/// Byte stream positioned at the start of the requested logical file.
pub enum SourceStream {
    Plain(File),
    Gzip(MultiGzDecoder<File>),
    TarEntry {
        name: String,
        reader: EntryReader<MultiGzDecoder<File>>,
    },
    ZipEntry {
        name: String,
        reader: Cursor<Vec<u8>>,
    },
}

impl SourceStream {
    /// Name of the archive member the stream was taken from, if any.
    pub fn entry_name(&self) -> Option<&str> {
        match self {
            SourceStream::TarEntry { name, .. } | SourceStream::ZipEntry { name, .. } => {
                Some(name)
            }
            SourceStream::Plain(_) | SourceStream::Gzip(_) => None,
        }
    }
}

/// Reader over exactly one tar entry's data. Running out of input before the
/// size declared in the entry header is an `UnexpectedEof` error, so a
/// truncated archive never passes for a short entry.
pub struct EntryReader<R> {
    inner: Take<R>,
}

impl<R: Read> EntryReader<R> {
    fn new(inner: R, size: u64) -> Self {
        Self {
            inner: inner.take(size),
        }
    }
}

impl<R: Read> Read for EntryReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        if read == 0 && !buf.is_empty() && self.inner.limit() > 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("tar entry truncated, {} bytes missing", self.inner.limit()),
            ));
        }
        Ok(read)
    }
}

impl Read for SourceStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            SourceStream::Plain(file) => file.read(buf),
            SourceStream::Gzip(decoder) => decoder.read(buf),
            SourceStream::TarEntry { reader, .. } => reader.read(buf),
            SourceStream::ZipEntry { reader, .. } => reader.read(buf),
        }
    }
}

/// Opens `path` and returns a stream over `logical_filename`.
///
/// Returns `Ok(None)` when `path` is a container and none of its entries has
/// a name containing `logical_filename`.
pub fn resolve(path: &Path, logical_filename: &str) -> Result<Option<SourceStream>, ImportError> {
    let kind = SourceKind::detect(path);
    info!(path = %path.display(), ?kind, "resolving source");
    let file = File::open(path).map_err(|err| {
        ImportError::UnreadableSource(format!("open {}: {err}", path.display()))
    })?;

    match kind {
        SourceKind::Plain => Ok(Some(SourceStream::Plain(file))),
        SourceKind::Gzip => Ok(Some(SourceStream::Gzip(MultiGzDecoder::new(file)))),
        SourceKind::TarGzip => {
            let found = find_tar_entry(MultiGzDecoder::new(file), logical_filename)
                .map_err(|err| {
                    ImportError::UnreadableSource(format!("untar {}: {err}", path.display()))
                })?;
            Ok(found.map(|(name, reader)| SourceStream::TarEntry { name, reader }))
        }
        SourceKind::Zip => {
            let found = find_zip_entry(file, logical_filename).map_err(|err| {
                ImportError::UnreadableSource(format!("unzip {}: {err}", path.display()))
            })?;
            Ok(found.map(|(name, bytes)| SourceStream::ZipEntry {
                name,
                reader: Cursor::new(bytes),
            }))
        }
    }
}

/// Walks tar entries in stream order and stops at the first whose name
/// contains `target`. The returned reader is the underlying stream limited to
/// that entry's size.
fn find_tar_entry<R: Read>(
    reader: R,
    target: &str,
) -> io::Result<Option<(String, EntryReader<R>)>> {
    let mut archive = Archive::new(reader);
    let mut found = None;
    for entry in archive.entries()? {
        let entry = entry?;
        let name = entry.path()?.to_string_lossy().into_owned();
        if name.contains(target) {
            found = Some((name, entry.size()));
            break;
        }
        debug!(entry = %name, "skipping tar entry");
    }
    // Header reads consume exactly the entry headers, so the inner reader now
    // sits on the first byte of the matched entry's data.
    Ok(found.map(|(name, size)| {
        info!(entry = %name, "processing tar entry");
        (name, EntryReader::new(archive.into_inner(), size))
    }))
}

fn find_zip_entry(file: File, target: &str) -> Result<Option<(String, Vec<u8>)>, zip::result::ZipError> {
    let mut archive = ZipArchive::new(file)?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() || !entry.name().contains(target) {
            continue;
        }
        let name = entry.name().to_string();
        let mut bytes = Vec::with_capacity(prealloc_len(entry.size()));
        entry.read_to_end(&mut bytes)?;
        info!(entry = %name, "processing zip entry");
        return Ok(Some((name, bytes)));
    }
    Ok(None)
}

fn prealloc_len(declared: u64) -> usize {
    usize::try_from(declared.min(ZIP_PREALLOC_LIMIT)).unwrap_or(0)
}

/// Decompresses `x.gz` into `x` beside it and returns the new path.
pub fn gunzip_file(gzip_path: &Path) -> Result<PathBuf, ImportError> {
    let target = uncompressed_path(gzip_path).ok_or_else(|| {
        ImportError::Filesystem(format!("not a gzip file name: {}", gzip_path.display()))
    })?;
    let file = File::open(gzip_path).map_err(|err| {
        ImportError::UnreadableSource(format!("open {}: {err}", gzip_path.display()))
    })?;
    let mut decoder = MultiGzDecoder::new(file);
    let parent = target
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let mut out = tempfile::Builder::new()
        .prefix(".gunzip")
        .tempfile_in(parent)
        .map_err(|err| ImportError::Filesystem(err.to_string()))?;
    io::copy(&mut decoder, &mut out).map_err(|err| {
        ImportError::UnreadableSource(format!("gunzip {}: {err}", gzip_path.display()))
    })?;
    if target.exists() {
        fs::remove_file(&target).map_err(|err| ImportError::Filesystem(err.to_string()))?;
    }
    out.persist(&target)
        .map_err(|err| ImportError::Filesystem(err.to_string()))?;
    Ok(target)
}

fn uncompressed_path(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_string_lossy().into_owned();
    let lower = name.to_lowercase();
    let stripped = if lower.ends_with(".tgz") {
        format!("{}.tar", &name[..name.len() - 4])
    } else {
        let suffix = GZIP_SUFFIXES
            .iter()
            .find(|suffix| lower.ends_with(**suffix))?;
        name[..name.len() - suffix.len()].to_string()
    };
    if stripped.is_empty() {
        return None;
    }
    Some(path.with_file_name(stripped))
}
