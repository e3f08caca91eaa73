//! Size-bounded, strictly UTF-8 file reads.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::io::AsyncReadExt;

/// Bytes pulled from the file per read call.
pub const READ_CHUNK_SIZE: usize = 64 * 1024;

const UTF8_BOM: char = '\u{feff}';

#[derive(Error, Debug)]
pub enum ReadError {
    #[error("File '{path}' is at least {size} bytes, larger than the {limit} byte limit")]
    TooLarge { path: PathBuf, size: u64, limit: u64 },

    #[error("File '{path}' is not valid UTF-8 (byte offset {offset})")]
    InvalidEncoding { path: PathBuf, offset: u64 },

    #[error("Failed to read file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Incremental UTF-8 decoder that never substitutes replacement characters.
///
/// A multi-byte sequence split across chunks is held back until the next
/// chunk completes it.
#[derive(Debug, Default)]
pub struct Utf8StreamDecoder {
    pending: Vec<u8>,
    consumed: u64,
}

impl Utf8StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes as much of `bytes` as possible into `out`.
    ///
    /// Returns the absolute byte offset of the first invalid sequence on error.
    pub fn push(&mut self, bytes: &[u8], out: &mut String) -> Result<(), u64> {
        self.pending.extend_from_slice(bytes);

        let (valid, invalid) = match std::str::from_utf8(&self.pending) {
            Ok(_) => (self.pending.len(), false),
            Err(e) => (e.valid_up_to(), e.error_len().is_some()),
        };

        if invalid {
            return Err(self.consumed + valid as u64);
        }

        if let Ok(text) = std::str::from_utf8(&self.pending[..valid]) {
            out.push_str(text);
        }
        self.pending.drain(..valid);
        self.consumed += valid as u64;
        Ok(())
    }

    /// Fails if the input ended in the middle of a multi-byte sequence.
    pub fn finish(self) -> Result<(), u64> {
        if self.pending.is_empty() {
            Ok(())
        } else {
            Err(self.consumed)
        }
    }
}

/// Text buffer size before streaming; larger files grow it per chunk.
fn initial_capacity(declared: u64) -> usize {
    declared.min(READ_CHUNK_SIZE as u64) as usize
}

/// Reads `path` as UTF-8 text, aborting once more than `max_size` bytes
/// have been seen.
pub async fn read_bounded(path: &Path, max_size: u64) -> Result<String, ReadError> {
    let io_error = |source: std::io::Error| ReadError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut file = tokio::fs::File::open(path).await.map_err(io_error)?;
    let declared = file.metadata().await.map_err(io_error)?.len();

    if declared > max_size {
        return Err(ReadError::TooLarge {
            path: path.to_path_buf(),
            size: declared,
            limit: max_size,
        });
    }

    let mut text = String::with_capacity(initial_capacity(declared));
    let mut decoder = Utf8StreamDecoder::new();
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    let mut total: u64 = 0;

    loop {
        let read = file.read(&mut chunk).await.map_err(io_error)?;
        if read == 0 {
            break;
        }

        // The file may grow after the stat above.
        total += read as u64;
        if total > max_size {
            return Err(ReadError::TooLarge {
                path: path.to_path_buf(),
                size: total,
                limit: max_size,
            });
        }

        decoder
            .push(&chunk[..read], &mut text)
            .map_err(|offset| ReadError::InvalidEncoding {
                path: path.to_path_buf(),
                offset,
            })?;
    }

    decoder
        .finish()
        .map_err(|offset| ReadError::InvalidEncoding {
            path: path.to_path_buf(),
            offset,
        })?;

    if text.starts_with(UTF8_BOM) {
        text.drain(..UTF8_BOM.len_utf8());
    }

    Ok(text)
}
