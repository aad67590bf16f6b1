//! Stream-native wire format.
//!
//! # Wire format
//!
//! ```text
//! HELLO (Client -> Server, once):
//!   [4 bytes: "GUPL"] [1 byte: version] [1 byte: flags, bit0 = gzip]
//!
//! CHUNK (Client -> Server):
//!   [1 byte: 0x01]
//!   [2 bytes BE: name_len] [name_len bytes: file name UTF-8]
//!   [4 bytes BE: content_len] [content_len bytes: content]
//!
//! END (Client -> Server, once):
//!   [1 byte: 0x02]
//!
//! STATUS (Server -> Client, once):
//!   [1 byte: 0x03] [1 byte: 0x00=Ok, 0x01=Error]
//!   [2 bytes BE: msg_len] [msg_len bytes: message UTF-8]
//! ```
//!
//! With the gzip flag set, each chunk's content is compressed on its own;
//! names, framing and order are unaffected.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use gupload_transfer::{Chunk, MAX_CHUNK_SIZE, StatusCode, UploadStatus};

use crate::error::SessionError;

/// Magic bytes opening every stream session.
pub const MAGIC: [u8; 4] = *b"GUPL";

/// Wire format version.
pub const VERSION: u8 = 1;

/// HELLO flag: chunk content is gzip-compressed.
pub const FLAG_GZIP: u8 = 0x01;

const FRAME_CHUNK: u8 = 0x01;
const FRAME_END: u8 = 0x02;
const FRAME_STATUS: u8 = 0x03;

const STATUS_OK: u8 = 0x00;
const STATUS_ERROR: u8 = 0x01;

/// Largest content length accepted on the wire. Leaves room for gzip
/// expanding incompressible data.
pub const MAX_WIRE_CONTENT: usize = MAX_CHUNK_SIZE + 64 * 1024;

/// Session options announced by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Hello {
    pub compress: bool,
}

/// A frame sent from client to server after the HELLO.
#[derive(Debug, PartialEq, Eq)]
pub enum ClientFrame {
    Chunk(Chunk),
    End,
}

/// Writes the session-opening HELLO.
pub async fn write_hello<W: AsyncWrite + Unpin>(
    writer: &mut W,
    hello: &Hello,
) -> Result<(), SessionError> {
    writer.write_all(&MAGIC).await?;
    writer.write_u8(VERSION).await?;
    writer
        .write_u8(if hello.compress { FLAG_GZIP } else { 0 })
        .await?;
    Ok(())
}

/// Reads and checks the session-opening HELLO.
pub async fn read_hello<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Hello, SessionError> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic).await?;
    if magic != MAGIC {
        return Err(SessionError::Protocol(format!("bad magic: {magic:02x?}")));
    }

    let version = reader.read_u8().await?;
    if version != VERSION {
        return Err(SessionError::Protocol(format!(
            "unsupported version {version} (expected {VERSION})"
        )));
    }

    let flags = reader.read_u8().await?;
    if flags & !FLAG_GZIP != 0 {
        return Err(SessionError::Protocol(format!("unknown flags: {flags:#04x}")));
    }

    Ok(Hello {
        compress: flags & FLAG_GZIP != 0,
    })
}

/// Writes one chunk frame.
///
/// Compression runs on the blocking pool.
pub async fn write_chunk<W: AsyncWrite + Unpin>(
    writer: &mut W,
    chunk: Chunk,
    compress: bool,
) -> Result<(), SessionError> {
    let name = chunk.file_name.as_bytes();
    if name.len() > u16::MAX as usize {
        return Err(SessionError::Protocol(format!(
            "file name too long: {} bytes (max {})",
            name.len(),
            u16::MAX
        )));
    }
    if chunk.content.len() > MAX_CHUNK_SIZE {
        return Err(SessionError::Protocol(format!(
            "chunk too large: {} bytes (max {MAX_CHUNK_SIZE})",
            chunk.content.len()
        )));
    }

    let Chunk { file_name, content } = chunk;
    let content = if compress { gzip(content).await? } else { content };

    writer.write_u8(FRAME_CHUNK).await?;
    writer.write_u16(file_name.len() as u16).await?;
    writer.write_all(file_name.as_bytes()).await?;
    writer.write_u32(content.len() as u32).await?;
    writer.write_all(&content).await?;
    Ok(())
}

/// Writes the end-of-input marker.
pub async fn write_end<W: AsyncWrite + Unpin>(writer: &mut W) -> Result<(), SessionError> {
    writer.write_u8(FRAME_END).await?;
    Ok(())
}

/// Reads the next client frame.
pub async fn read_client_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    compress: bool,
) -> Result<ClientFrame, SessionError> {
    match reader.read_u8().await? {
        FRAME_END => Ok(ClientFrame::End),
        FRAME_CHUNK => {
            let name_len = reader.read_u16().await? as usize;
            let mut name_buf = vec![0u8; name_len];
            reader.read_exact(&mut name_buf).await?;
            let file_name = String::from_utf8(name_buf)
                .map_err(|e| SessionError::Protocol(format!("invalid UTF-8 file name: {e}")))?;

            let content_len = reader.read_u32().await? as usize;
            if content_len > MAX_WIRE_CONTENT {
                return Err(SessionError::Protocol(format!(
                    "chunk too large: {content_len} bytes"
                )));
            }
            let mut content = vec![0u8; content_len];
            reader.read_exact(&mut content).await?;

            if compress {
                content = gunzip(content).await?;
            } else if content_len > MAX_CHUNK_SIZE {
                return Err(SessionError::Protocol(format!(
                    "chunk too large: {content_len} bytes (max {MAX_CHUNK_SIZE})"
                )));
            }

            Ok(ClientFrame::Chunk(Chunk { file_name, content }))
        }
        other => Err(SessionError::Protocol(format!(
            "unexpected frame type: {other:#04x}"
        ))),
    }
}

/// Writes the terminal status frame.
///
/// Messages longer than the 16-bit length field are truncated at a
/// character boundary.
pub async fn write_status<W: AsyncWrite + Unpin>(
    writer: &mut W,
    status: &UploadStatus,
) -> Result<(), SessionError> {
    let message = truncate_utf8(&status.message, u16::MAX as usize).as_bytes();
    let code = match status.code {
        StatusCode::Ok => STATUS_OK,
        StatusCode::Error => STATUS_ERROR,
    };

    writer.write_u8(FRAME_STATUS).await?;
    writer.write_u8(code).await?;
    writer.write_u16(message.len() as u16).await?;
    writer.write_all(message).await?;
    Ok(())
}

/// Reads the terminal status frame.
pub async fn read_status<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<UploadStatus, SessionError> {
    let frame = reader.read_u8().await?;
    if frame != FRAME_STATUS {
        return Err(SessionError::Protocol(format!(
            "expected status frame, got {frame:#04x}"
        )));
    }

    let code = match reader.read_u8().await? {
        STATUS_OK => StatusCode::Ok,
        STATUS_ERROR => StatusCode::Error,
        other => {
            return Err(SessionError::Protocol(format!(
                "unknown status code: {other:#04x}"
            )));
        }
    };

    let len = reader.read_u16().await? as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    let message = String::from_utf8_lossy(&buf).into_owned();

    Ok(UploadStatus { code, message })
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a char.
pub(crate) fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

async fn gzip(data: Vec<u8>) -> Result<Vec<u8>, SessionError> {
    tokio::task::spawn_blocking(move || {
        let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::fast());
        encoder.write_all(&data)?;
        encoder.finish()
    })
    .await
    .map_err(|e| SessionError::Protocol(format!("compression task failed: {e}")))?
    .map_err(SessionError::from)
}

async fn gunzip(data: Vec<u8>) -> Result<Vec<u8>, SessionError> {
    let out = tokio::task::spawn_blocking(move || {
        let mut out = Vec::new();
        GzDecoder::new(&data[..])
            .take(MAX_CHUNK_SIZE as u64 + 1)
            .read_to_end(&mut out)
            .map(|_| out)
    })
    .await
    .map_err(|e| SessionError::Protocol(format!("decompression task failed: {e}")))?
    .map_err(|e| SessionError::Protocol(format!("invalid gzip content: {e}")))?;

    if out.len() > MAX_CHUNK_SIZE {
        return Err(SessionError::Protocol(format!(
            "decompressed chunk exceeds {MAX_CHUNK_SIZE} bytes"
        )));
    }
    Ok(out)
}
