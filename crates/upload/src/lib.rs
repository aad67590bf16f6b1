//! Chunked file upload over a persistent stream.
//!
//! The client reads a file as bounded chunks, streams them over one
//! session and waits for a single terminal status; the server writes the
//! chunks to `save_dir/<file name>` as they arrive, syncs the file and
//! answers Ok or Error.
//!
//! ```no_run
//! use gupload_upload::{ClientConfig, UploadClient};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), gupload_upload::UploadError> {
//! let mut client = UploadClient::new(ClientConfig::new("localhost:1313"))?;
//! let stats = client
//!     .upload_file("./report.pdf", &CancellationToken::new())
//!     .await?;
//! println!("sent in {:?}", stats.duration());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod server;

pub use client::{ClientState, UploadClient};
pub use config::{ClientConfig, ServerConfig};
pub use error::{ErrorKind, UploadError};
pub use server::UploadServer;

pub use gupload_session::Transport;
pub use gupload_transfer::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, Stats};

use std::path::Path;

use tokio_util::sync::CancellationToken;

/// Uploads one file with a fresh client.
pub async fn upload_file(
    config: ClientConfig,
    path: impl AsRef<Path>,
    cancel: &CancellationToken,
) -> Result<Stats, UploadError> {
    let mut client = UploadClient::new(config)?;
    client.upload_file(path, cancel).await
}

/// Runs an upload server until `cancel` fires.
pub async fn serve(config: ServerConfig, cancel: CancellationToken) -> Result<(), UploadError> {
    let server = UploadServer::new(config)?;
    let listener = server.listen().await?;
    server.serve(listener, cancel).await
}
