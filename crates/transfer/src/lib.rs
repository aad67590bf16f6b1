//! Chunk framing and the data types shared by both ends of an upload.
//!
//! A file is read as a lazy sequence of [`Chunk`]s, each carrying the
//! file's base name. The receiving side answers with exactly one
//! [`UploadStatus`].

mod chunked;
mod types;
mod validation;

pub use chunked::{ChunkReader, base_name};
pub use types::{Chunk, Stats, StatusCode, UploadStatus};
pub use validation::{validate_chunk_size, validate_file_name};

/// Default chunk size: 4 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 12;

/// Upper bound on a chunk's payload: 4 MiB.
///
/// Anything larger is rejected at configuration time by the sender and
/// treated as a protocol violation by the receiver.
pub const MAX_CHUNK_SIZE: usize = 1 << 22;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid chunk size: {0}")]
    InvalidChunkSize(String),

    #[error("invalid file name: {0}")]
    InvalidFileName(String),
}
