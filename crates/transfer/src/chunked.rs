use std::path::Path;

use futures_util::stream::{self, Stream};
use tokio::io::AsyncReadExt;

use crate::types::Chunk;
use crate::{TransferError, validate_chunk_size};

/// Returns the base name of `path` (directory components stripped).
pub fn base_name(path: &Path) -> Result<String, TransferError> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| {
            TransferError::InvalidFileName(format!("no file name in path {}", path.display()))
        })
}

/// Reads a file as a lazy sequence of fixed-size chunks.
///
/// Every chunk except the last is exactly `chunk_size` bytes long. No chunk
/// is produced for a zero-length remainder, so an empty file yields no
/// chunks at all. Once exhausted the reader keeps returning `None`.
pub struct ChunkReader {
    file: tokio::fs::File,
    file_name: String,
    chunk_size: usize,
    done: bool,
}

impl ChunkReader {
    /// Opens `path` for chunked reading.
    ///
    /// Fails if the chunk size is out of bounds, the path has no file name,
    /// or the file cannot be opened.
    pub async fn open(path: &Path, chunk_size: usize) -> Result<Self, TransferError> {
        let chunk_size = validate_chunk_size(chunk_size)?;
        let file_name = base_name(path)?;
        let file = tokio::fs::File::open(path).await?;
        Ok(Self {
            file,
            file_name,
            chunk_size,
            done: false,
        })
    }

    /// Base name carried by every chunk.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Reads the next chunk. Returns `None` at end of file.
    pub async fn next_chunk(&mut self) -> Result<Option<Chunk>, TransferError> {
        if self.done {
            return Ok(None);
        }

        let mut buf = vec![0u8; self.chunk_size];
        let mut filled = 0;
        // Short reads are legal; keep going until the chunk is full or EOF.
        while filled < buf.len() {
            let n = match self.file.read(&mut buf[filled..]).await {
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.done = true;
                    return Err(e.into());
                }
            };
            if n == 0 {
                self.done = true;
                break;
            }
            filled += n;
        }

        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);
        Ok(Some(Chunk::new(self.file_name.clone(), buf)))
    }

    /// Converts the reader into a stream of chunks.
    ///
    /// The stream ends after the last chunk or after the first read error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Chunk, TransferError>> {
        stream::unfold(Some(self), |state| async move {
            let Some(mut reader) = state else {
                return None;
            };
            match reader.next_chunk().await {
                Ok(Some(chunk)) => Some((Ok(chunk), Some(reader))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}
