//! Archive sources.
//!
//! Every read session opens its own handle through [`DataSource::open`], so
//! concurrent queries never share a file position.
//!
//! Files at or above [`MMAP_THRESHOLD`] are memory mapped; smaller files
//! use a buffered `File`, where mmap setup costs more than it saves.

use crate::error::Result;
use memmap2::Mmap;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::{Path, PathBuf};

/// Memory-mapped file threshold (50 MB)
pub const MMAP_THRESHOLD: u64 = 50 * 1024 * 1024;

/// A seekable byte source owned by one session.
pub trait ArchiveRead: Read + Seek + Send {}

impl<T: Read + Seek + Send> ArchiveRead for T {}

/// Where an archive lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSource {
    /// Local file path
    Local(PathBuf),
}

impl DataSource {
    /// Create a local file data source
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        DataSource::Local(path.as_ref().to_path_buf())
    }

    /// Path of the archive.
    pub fn path(&self) -> &Path {
        match self {
            DataSource::Local(path) => path,
        }
    }

    /// Open an independent, seekable handle.
    pub fn open(&self) -> Result<Box<dyn ArchiveRead>> {
        match self {
            DataSource::Local(path) => open_local_file(path),
        }
    }

    /// Index files that may accompany this archive, in lookup order:
    /// `<name>.bai`, then the name with its extension replaced by `.bai`.
    pub fn index_candidates(&self) -> Vec<PathBuf> {
        let path = self.path();
        let mut appended = path.as_os_str().to_os_string();
        appended.push(".bai");

        let mut candidates = vec![PathBuf::from(appended)];
        let replaced = path.with_extension("bai");
        if replaced != candidates[0] && replaced != path {
            candidates.push(replaced);
        }
        candidates
    }
}

fn open_local_file(path: &Path) -> Result<Box<dyn ArchiveRead>> {
    let file = File::open(path)?;
    let file_size = file.metadata()?.len();

    if file_size >= MMAP_THRESHOLD {
        // SAFETY: the archive is opened read-only and treated as immutable
        // for the lifetime of the session.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Box::new(Cursor::new(mmap)))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}
