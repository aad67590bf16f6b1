//! Transport sessions for chunked uploads.
//!
//! A session carries ordered [`Chunk`]s from client to server over one
//! connection, then a single [`UploadStatus`] back. Two interchangeable
//! transports implement the same contract:
//!
//! - [`Transport::Stream`]: native binary frames, see [`wire`].
//! - [`Transport::Http`]: an HTTP/1.1 streamed `POST` on hyper, see [`http`].
//!
//! Either may run over TLS (see [`tls`]); without it the channel is
//! unauthenticated and unencrypted.
//!
//! [`Chunk`]: gupload_transfer::Chunk
//! [`UploadStatus`]: gupload_transfer::UploadStatus

pub mod client;
pub mod error;
pub mod http;
pub mod net;
pub mod server;
pub mod tls;
pub mod wire;

pub use client::{ClientOptions, ClientSession};
pub use error::SessionError;
pub use net::{Dialer, Incoming, Listener};
pub use server::ServerSession;

use std::fmt;
use std::str::FromStr;

use tokio::io::{AsyncRead, AsyncWrite};

/// Write buffer size for outgoing chunk data (256 KB).
pub const TCP_BUFFER_SIZE: usize = 256 * 1024;

/// Read buffer size for incoming data.
pub const READ_BUFFER_SIZE: usize = 64 * 1024;

/// A bidirectional byte stream a session can run over.
pub trait Io: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

/// Type-erased connection: plain TCP, TLS, or an in-memory pipe.
pub type BoxedIo = Box<dyn Io>;

/// Which session variant runs over the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transport {
    /// Binary frames over a long-lived stream.
    #[default]
    Stream,
    /// HTTP/1.1 request body with a single response.
    Http,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Stream => f.write_str("stream"),
            Transport::Http => f.write_str("http"),
        }
    }
}

impl FromStr for Transport {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stream" => Ok(Transport::Stream),
            "http" => Ok(Transport::Http),
            other => Err(SessionError::Protocol(format!("unknown transport: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_parse() {
        assert_eq!("stream".parse::<Transport>().unwrap(), Transport::Stream);
        assert_eq!("HTTP".parse::<Transport>().unwrap(), Transport::Http);
        assert!("carrier-pigeon".parse::<Transport>().is_err());
        assert!("grpc".parse::<Transport>().is_err());
        assert!("h2".parse::<Transport>().is_err());
    }

    #[test]
    fn transport_display_roundtrip() {
        for t in [Transport::Stream, Transport::Http] {
            assert_eq!(t.to_string().parse::<Transport>().unwrap(), t);
        }
    }
}
