//! Upload server (receiving side).
//!
//! Each accepted connection runs in its own task:
//! `Accepted -> Receiving -> Finalizing -> Responded`. The first chunk's
//! file name (or, over HTTP, the request path) picks the sink
//! `save_dir/<name>`, which is truncated before anything is written. Failures are reported to the client with an Error
//! status whenever the connection still allows it.

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use gupload_session::{Incoming, Listener, ServerSession, SessionError, tls};
use gupload_transfer::{UploadStatus, validate_file_name};

use crate::config::ServerConfig;
use crate::error::UploadError;

/// Message sent with a successful status.
pub const SUCCESS_MESSAGE: &str = "Upload received with success";

#[derive(Debug, Clone, Copy)]
enum ServerState {
    Accepted,
    Receiving,
    Finalizing,
    Responded,
}

/// Accepts uploads and writes them into a save directory.
pub struct UploadServer {
    config: ServerConfig,
    acceptor: Option<TlsAcceptor>,
}

impl UploadServer {
    /// Validates `config` and loads the TLS certificate and key, if any.
    pub fn new(config: ServerConfig) -> Result<Self, UploadError> {
        config.validate()?;

        let acceptor = match (&config.certificate, &config.key) {
            (Some(cert), Some(key)) => {
                Some(tls::server_acceptor(cert, key).map_err(UploadError::Connection)?)
            }
            _ => None,
        };

        Ok(Self { config, acceptor })
    }

    /// Binds the configured port.
    pub async fn listen(&self) -> Result<Listener, UploadError> {
        let port = self
            .config
            .port
            .ok_or_else(|| UploadError::Config("port must be specified".into()))?;
        Listener::bind(port, self.config.transport, self.acceptor.clone())
            .await
            .map_err(UploadError::Connection)
    }

    /// Accepts connections until `cancel` fires, one task per connection.
    pub async fn serve(
        &self,
        listener: Listener,
        cancel: CancellationToken,
    ) -> Result<(), UploadError> {
        info!(
            save_dir = %self.config.save_dir.display(),
            transport = %listener.transport(),
            "upload server running"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("upload server shutting down");
                    break Ok(());
                }

                result = listener.accept() => {
                    match result {
                        Ok(incoming) => {
                            let save_dir = self.config.save_dir.clone();
                            tokio::spawn(async move {
                                let peer = incoming.peer_addr();
                                if let Err(e) = handle_connection(incoming, save_dir).await {
                                    error!(%peer, "upload error: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            error!("accept error: {e}");
                        }
                    }
                }
            }
        }
    }
}

/// Completes the handshakes on `incoming` and receives one upload.
///
/// Returns the number of bytes written.
pub async fn handle_connection(incoming: Incoming, save_dir: PathBuf) -> Result<u64, UploadError> {
    let peer = incoming.peer_addr();
    let session = incoming.handshake().await.map_err(UploadError::Stream)?;
    debug!(%peer, state = ?ServerState::Accepted, "session accepted");
    receive_upload(session, &save_dir).await
}

/// Receives one upload into `save_dir` and sends the terminal status.
///
/// Returns the number of bytes written.
pub async fn receive_upload(
    mut session: ServerSession,
    save_dir: &Path,
) -> Result<u64, UploadError> {
    let first = match session.receive().await {
        Ok(first) => first,
        Err(e) => return Err(abort(session, e).await),
    };

    // An HTTP request names its file in the path, so an empty body is
    // still an upload.
    let file_name = match (&first, session.file_name()) {
        (Some(chunk), _) => chunk.file_name.clone(),
        (None, Some(name)) => name.to_owned(),
        (None, None) => {
            return Err(reject_protocol(session, "no chunks received".into(), false).await);
        }
    };
    let input_open = first.is_some();

    if let Err(e) = validate_file_name(&file_name) {
        return Err(reject_sink(session, e.to_string(), input_open).await);
    }

    let path = save_dir.join(&file_name);
    let mut sink = match File::create(&path).await {
        Ok(file) => file,
        Err(e) => {
            let message = format!("failed to create file {}: {e}", path.display());
            return Err(reject_sink(session, message, input_open).await);
        }
    };
    debug!(file = %path.display(), state = ?ServerState::Receiving, "sink created");

    let mut bytes = 0u64;
    let mut next = first;
    while let Some(chunk) = next {
        if chunk.file_name != file_name {
            let message = format!(
                "file name changed mid-transfer: {file_name} -> {}",
                chunk.file_name
            );
            return Err(reject_protocol(session, message, true).await);
        }

        if let Err(e) = sink.write_all(&chunk.content).await {
            let message = format!("failed to write file {}: {e}", path.display());
            return Err(reject_sink(session, message, true).await);
        }
        bytes += chunk.content.len() as u64;

        next = match session.receive().await {
            Ok(next) => next,
            Err(e) => {
                // Keep what arrived so far.
                if let Err(e) = sink.flush().await {
                    debug!("could not flush partial file: {e}");
                }
                return Err(abort(session, e).await);
            }
        };
    }

    debug!(file = %path.display(), bytes, state = ?ServerState::Finalizing, "end of input");
    if let Err(e) = finalize(&mut sink).await {
        let message = format!("failed to sync file {}: {e}", path.display());
        return Err(reject_sink(session, message, false).await);
    }
    drop(sink);

    session
        .respond(UploadStatus::ok(SUCCESS_MESSAGE))
        .await
        .map_err(UploadError::Stream)?;
    debug!(state = ?ServerState::Responded, "status sent");

    info!(file = %path.display(), bytes_received = bytes, "upload received");
    Ok(bytes)
}

async fn finalize(sink: &mut File) -> std::io::Result<()> {
    sink.flush().await?;
    sink.sync_all().await
}

/// Reports a sink failure. With `drain`, the rest of the input is read and
/// discarded first so the status arrives after the client's last chunk.
async fn reject_sink(mut session: ServerSession, message: String, drain: bool) -> UploadError {
    warn!("rejecting upload: {message}");
    if drain && !drain_input(&mut session).await {
        return UploadError::Sink(message);
    }
    respond_best_effort(session, UploadStatus::error(message.clone())).await;
    UploadError::Sink(message)
}

/// Reports a protocol violation and gives up on the session. With `drain`,
/// unread input is discarded before the status goes out.
async fn reject_protocol(mut session: ServerSession, message: String, drain: bool) -> UploadError {
    warn!("rejecting upload: {message}");
    if !drain || drain_input(&mut session).await {
        respond_best_effort(session, UploadStatus::error(message.clone())).await;
    }
    UploadError::Stream(SessionError::Protocol(message))
}

/// Reads and discards the rest of the input. False when the connection
/// was lost on the way.
async fn drain_input(session: &mut ServerSession) -> bool {
    loop {
        match session.receive().await {
            Ok(Some(_)) => {}
            Ok(None) => return true,
            Err(e) => {
                warn!("connection lost while draining: {e}");
                return false;
            }
        }
    }
}

/// A receive failed mid-stream: best-effort Error status, then abort.
async fn abort(session: ServerSession, err: SessionError) -> UploadError {
    respond_best_effort(
        session,
        UploadStatus::error(format!("failed unexpectedly while reading chunks: {err}")),
    )
    .await;
    UploadError::Stream(err)
}

async fn respond_best_effort(session: ServerSession, status: UploadStatus) {
    if let Err(e) = session.respond(status).await {
        debug!("could not deliver error status: {e}");
    }
}
