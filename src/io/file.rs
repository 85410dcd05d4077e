//! Destination files for receiving and source loading for sending.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::core::constants::{BLOCK_SIZE, SUB};
use crate::core::{BlockSink, TransferError};

/// Append-only destination file with post-completion SUB trimming.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: Option<File>,
}

impl FileSink {
    /// Create (truncating) the destination file.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, TransferError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)
            .map_err(|e| TransferError::SinkUnavailable(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "destination file opened");
        Ok(FileSink {
            path,
            file: Some(file),
        })
    }

    /// Path of the destination file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BlockSink for FileSink {
    fn write_block(&mut self, payload: &[u8]) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.write_all(payload),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "sink already closed",
            )),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        Ok(())
    }

    fn trim_padding(&mut self) -> io::Result<u64> {
        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        let len = file.metadata()?.len();
        if len == 0 {
            return Ok(0);
        }

        // Scan backwards over at most the final block.
        let window = len.min(BLOCK_SIZE as u64);
        let window_start = len - window;
        file.seek(SeekFrom::Start(window_start))?;
        let mut tail = vec![0u8; window as usize];
        file.read_exact(&mut tail)?;

        let keep = match tail.iter().rposition(|&b| b != SUB) {
            Some(position) => window_start + position as u64 + 1,
            None => window_start,
        };
        if keep < len {
            file.set_len(keep)?;
            debug!(trimmed = len - keep, "removed trailing padding");
        }
        Ok(keep)
    }
}

/// Load a source file fully into memory for sending.
///
/// Maps a missing or irregular file to
/// [`TransferError::SourceUnavailable`] and a zero-byte file to
/// [`TransferError::EmptySource`].
pub fn read_source<P: AsRef<Path>>(path: P) -> Result<Vec<u8>, TransferError> {
    let path = path.as_ref();
    let metadata = std::fs::metadata(path)
        .map_err(|e| TransferError::SourceUnavailable(format!("{}: {e}", path.display())))?;
    if !metadata.is_file() {
        return Err(TransferError::SourceUnavailable(format!(
            "{}: not a regular file",
            path.display()
        )));
    }
    if metadata.len() == 0 {
        return Err(TransferError::EmptySource);
    }
    std::fs::read(path)
        .map_err(|e| TransferError::SourceUnavailable(format!("{}: {e}", path.display())))
}
