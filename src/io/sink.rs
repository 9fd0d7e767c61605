//! Output destinations for slices
//!
//! `DataSink` is the write counterpart to `DataSource`.
//!
//! # Example
//!
//! ```no_run
//! use bamseek::io::DataSink;
//!
//! // Write to local file
//! let sink = DataSink::from_path("region.bam");
//!
//! // Write to stdout
//! let sink = DataSink::stdout();
//! ```

use crate::error::Result;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Output destination for sliced archives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSink {
    /// Write to a local file path
    Local(PathBuf),

    /// Write to standard output
    Stdout,
}

impl DataSink {
    /// Create a sink from a file path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        Self::Local(path.as_ref().to_path_buf())
    }

    /// Create a sink for standard output
    pub fn stdout() -> Self {
        Self::Stdout
    }

    /// Open a buffered writer; local files are created or truncated.
    pub fn open(&self) -> Result<Box<dyn Write + Send>> {
        match self {
            Self::Local(path) => Ok(Box::new(BufWriter::new(File::create(path)?))),
            Self::Stdout => Ok(Box::new(BufWriter::new(io::stdout()))),
        }
    }
}
