//! Byte destinations for trace streams.
//!
//! The sink's writer thread opens an output, writes one stream to it and
//! opens it again after an I/O failure or a rotation. Every open starts a new,
//! self-contained stream.

use crate::tracing_compat::debug;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// A place streams are written to.
pub trait TraceOutput: Send {
    /// Opens a fresh destination for a new stream.
    fn open(&mut self) -> io::Result<Box<dyn Write + Send>>;

    /// Stream size in bytes after which the sink ends the stream and calls
    /// [`rotate`](Self::rotate). `None` never rotates.
    fn rotation_threshold(&self) -> Option<u64> {
        None
    }

    /// Moves the finished stream out of the way.
    fn rotate(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Human-readable destination, for logs.
    fn describe(&self) -> String;
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOutput;

impl TraceOutput for NullOutput {
    fn open(&mut self) -> io::Result<Box<dyn Write + Send>> {
        Ok(Box::new(io::sink()))
    }

    fn describe(&self) -> String {
        "null".to_string()
    }
}

type Connect = Box<dyn FnMut() -> io::Result<Box<dyn Write + Send>> + Send>;

/// Output backed by a connection factory, such as one dialing a collector
/// over TCP. Each open makes a new connection.
pub struct StreamOutput {
    connect: Connect,
    name: String,
}

impl StreamOutput {
    /// Creates an output that calls `connect` on every open.
    pub fn new<F, W>(name: impl Into<String>, mut connect: F) -> Self
    where
        F: FnMut() -> io::Result<W> + Send + 'static,
        W: Write + Send + 'static,
    {
        Self {
            connect: Box::new(move || Ok(Box::new(connect()?) as Box<dyn Write + Send>)),
            name: name.into(),
        }
    }
}

impl TraceOutput for StreamOutput {
    fn open(&mut self) -> io::Result<Box<dyn Write + Send>> {
        (self.connect)()
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

impl std::fmt::Debug for StreamOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamOutput")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A trace file rotated to `<path>.1 ... <path>.N` once it reaches a size
/// limit. The oldest archive is discarded.
#[derive(Debug, Clone)]
pub struct RotatingFileOutput {
    path: PathBuf,
    max_size: u64,
    max_archives: usize,
    opened: bool,
}

impl RotatingFileOutput {
    /// Creates a rotating file output. Nothing is touched until the first
    /// open.
    pub fn new(path: impl Into<PathBuf>, max_size: u64, max_archives: usize) -> Self {
        Self {
            path: path.into(),
            max_size,
            max_archives,
            opened: false,
        }
    }

    /// Returns the active file's path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path of archive `n` (1 is the newest).
    pub fn archive_path(&self, n: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{n}"));
        PathBuf::from(name)
    }

    fn shift_archives(&self) -> io::Result<()> {
        if self.max_archives == 0 {
            return remove_if_exists(&self.path);
        }
        remove_if_exists(&self.archive_path(self.max_archives))?;
        for n in (1..self.max_archives).rev() {
            let from = self.archive_path(n);
            if from.exists() {
                fs::rename(&from, self.archive_path(n + 1))?;
            }
        }
        if self.path.exists() {
            fs::rename(&self.path, self.archive_path(1))?;
        }
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

impl TraceOutput for RotatingFileOutput {
    fn open(&mut self) -> io::Result<Box<dyn Write + Send>> {
        if !self.opened {
            // A file left by an earlier run holds a finished stream.
            if fs::metadata(&self.path).is_ok_and(|m| m.len() > 0) {
                self.shift_archives()?;
            }
            self.opened = true;
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(&self.path)?;
        Ok(Box::new(BufWriter::new(file)))
    }

    fn rotation_threshold(&self) -> Option<u64> {
        Some(self.max_size)
    }

    fn rotate(&mut self) -> io::Result<()> {
        debug!(path = %self.path.display(), "rotating trace file");
        self.shift_archives()
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
