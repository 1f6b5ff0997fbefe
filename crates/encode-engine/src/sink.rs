//! Output sinks for encoded bitstreams.
//!
//! A sink is a sequential byte writer: packets are appended in the order they
//! are written and `close` finalizes the stream. Closing twice is a no-op.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use framerec_common::error::{FramerecError, FramerecResult};

/// Destination of an encoded stream.
pub trait OutputSink: Send {
    /// Append one packet.
    fn write(&mut self, bytes: &[u8]) -> FramerecResult<()>;

    /// Flush and finalize. Calling it again does nothing.
    fn close(&mut self) -> FramerecResult<()>;

    fn bytes_written(&self) -> u64;

    fn packets_written(&self) -> u64;
}

/// Where a recorder writes its stream.
pub enum Destination {
    /// A file, created (or truncated) at open.
    Path(PathBuf),
    /// Any writer, e.g. a socket or a child's stdin.
    Stream(Box<dyn Write + Send>),
    /// A caller-provided sink.
    Sink(Box<dyn OutputSink>),
}

impl Destination {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    /// File path, when the destination is a file.
    pub fn file_path(&self) -> Option<&Path> {
        match self {
            Self::Path(path) => Some(path),
            _ => None,
        }
    }

    /// Open the destination for sequential writing.
    pub fn open(self) -> FramerecResult<Box<dyn OutputSink>> {
        match self {
            Self::Path(path) => Ok(Box::new(FileSink::create(path)?)),
            Self::Stream(writer) => Ok(Box::new(StreamSink::new(writer))),
            Self::Sink(sink) => Ok(sink),
        }
    }
}

impl std::fmt::Debug for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
            Self::Sink(_) => f.write_str("Sink(..)"),
        }
    }
}

impl From<PathBuf> for Destination {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&Path> for Destination {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

/// Buffered file output.
pub struct FileSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    bytes: u64,
    packets: u64,
}

impl FileSink {
    /// Create or truncate `path`.
    pub fn create(path: impl Into<PathBuf>) -> FramerecResult<Self> {
        let path = path.into();
        let file = File::create(&path).map_err(|e| {
            FramerecError::open(format!("Cannot open {} for writing: {e}", path.display()))
        })?;
        tracing::debug!(path = %path.display(), "Output file created");
        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
            bytes: 0,
            packets: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OutputSink for FileSink {
    fn write(&mut self, bytes: &[u8]) -> FramerecResult<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| FramerecError::invalid_state("File sink already closed"))?;
        writer.write_all(bytes)?;
        self.bytes += bytes.len() as u64;
        self.packets += 1;
        Ok(())
    }

    fn close(&mut self) -> FramerecResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            writer.get_ref().sync_all()?;
            tracing::debug!(
                path = %self.path.display(),
                bytes = self.bytes,
                "Output file closed"
            );
        }
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.bytes
    }

    fn packets_written(&self) -> u64 {
        self.packets
    }
}

/// Output to an arbitrary writer.
pub struct StreamSink<W: Write + Send> {
    writer: Option<W>,
    bytes: u64,
    packets: u64,
}

impl<W: Write + Send> StreamSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Some(writer),
            bytes: 0,
            packets: 0,
        }
    }
}

impl<W: Write + Send> OutputSink for StreamSink<W> {
    fn write(&mut self, bytes: &[u8]) -> FramerecResult<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| FramerecError::invalid_state("Stream sink already closed"))?;
        writer.write_all(bytes)?;
        self.bytes += bytes.len() as u64;
        self.packets += 1;
        Ok(())
    }

    fn close(&mut self) -> FramerecResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.bytes
    }

    fn packets_written(&self) -> u64 {
        self.packets
    }
}

/// In-memory output; [`MemorySink::buffer`] stays readable after the
/// recorder has taken ownership of the sink.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    buffer: Arc<Mutex<Vec<u8>>>,
    packet_sizes: Arc<Mutex<Vec<usize>>>,
    closed: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle to the written bytes.
    pub fn buffer(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.buffer)
    }

    /// Copy of everything written so far.
    pub fn contents(&self) -> Vec<u8> {
        self.buffer.lock().map(|b| b.clone()).unwrap_or_default()
    }

    /// Size of each packet, in write order.
    pub fn packet_sizes(&self) -> Vec<usize> {
        self.packet_sizes
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

impl OutputSink for MemorySink {
    fn write(&mut self, bytes: &[u8]) -> FramerecResult<()> {
        if self.closed {
            return Err(FramerecError::invalid_state("Memory sink already closed"));
        }
        self.buffer
            .lock()
            .map_err(|_| FramerecError::encode("Memory sink buffer poisoned"))?
            .extend_from_slice(bytes);
        self.packet_sizes
            .lock()
            .map_err(|_| FramerecError::encode("Memory sink buffer poisoned"))?
            .push(bytes.len());
        Ok(())
    }

    fn close(&mut self) -> FramerecResult<()> {
        self.closed = true;
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.buffer.lock().map(|b| b.len() as u64).unwrap_or(0)
    }

    fn packets_written(&self) -> u64 {
        self.packet_sizes
            .lock()
            .map(|s| s.len() as u64)
            .unwrap_or(0)
    }
}
