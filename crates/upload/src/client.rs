//! Upload client (sending side).
//!
//! One transfer runs through `Idle -> Open -> Streaming -> AwaitingStatus`
//! and ends in `Closed` or `Failed`. Any failure aborts the remaining
//! chunks; nothing is retried.

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::time::Instant;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gupload_session::{ClientSession, Dialer, SessionError, net, tls};
use gupload_transfer::{ChunkReader, Stats};

use crate::config::ClientConfig;
use crate::error::UploadError;

/// Lifecycle of the client's current transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Open,
    Streaming,
    AwaitingStatus,
    Closed,
    Failed,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Sends files to an upload server, one session per file.
pub struct UploadClient {
    dialer: Dialer,
    chunk_size: usize,
    session: Option<ClientSession>,
    state: ClientState,
}

impl UploadClient {
    /// Validates `config` and prepares TLS. No connection is made yet.
    pub fn new(config: ClientConfig) -> Result<Self, UploadError> {
        config.validate()?;

        let mut dialer =
            Dialer::new(config.address.trim(), config.transport).with_compression(config.compress);

        if let Some(root) = &config.root_certificate {
            let connector = tls::client_connector(root).map_err(UploadError::Connection)?;
            let name = config
                .server_name
                .clone()
                .unwrap_or_else(|| net::host_of(&config.address).to_string());
            tls::server_name(&name).map_err(UploadError::Connection)?;
            dialer = dialer.with_tls(connector, name);
        }

        Ok(Self {
            dialer,
            chunk_size: config.chunk_size,
            session: None,
            state: ClientState::Idle,
        })
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Opens a session ahead of the next [`upload_file`](Self::upload_file).
    ///
    /// Does nothing if a session is already open.
    pub async fn connect(&mut self, cancel: &CancellationToken) -> Result<(), UploadError> {
        if self.session.is_some() {
            return Ok(());
        }
        match cancellable(cancel, self.dialer.open()).await {
            Ok(Ok(session)) => {
                self.session = Some(session);
                self.transition(ClientState::Open);
                Ok(())
            }
            Ok(Err(e)) => {
                self.transition(ClientState::Failed);
                Err(UploadError::Connection(e))
            }
            Err(e) => {
                self.transition(ClientState::Failed);
                Err(e)
            }
        }
    }

    /// Uploads one file and returns timestamps bracketing the send phase.
    ///
    /// The file is opened before any connection is attempted. Uses the
    /// session from [`connect`](Self::connect) if one is open, otherwise
    /// dials a new one. The session is consumed either way.
    pub async fn upload_file(
        &mut self,
        path: impl AsRef<Path>,
        cancel: &CancellationToken,
    ) -> Result<Stats, UploadError> {
        let path = path.as_ref();
        let reader = ChunkReader::open(path, self.chunk_size)
            .await
            .map_err(|source| UploadError::FileOpen {
                path: path.display().to_string(),
                source,
            })?;

        let result = self.transfer(reader, cancel).await;
        match &result {
            Ok(stats) => {
                self.transition(ClientState::Closed);
                info!(
                    file = %path.display(),
                    elapsed_ns = stats.duration().as_nanos() as u64,
                    "upload complete"
                );
            }
            Err(e) => {
                self.session = None;
                self.transition(ClientState::Failed);
                warn!(file = %path.display(), "upload failed: {e}");
            }
        }
        result
    }

    async fn transfer(
        &mut self,
        reader: ChunkReader,
        cancel: &CancellationToken,
    ) -> Result<Stats, UploadError> {
        self.connect(cancel).await?;
        let Some(mut session) = self.session.take() else {
            return Err(UploadError::Connection(SessionError::InvalidState(
                "no open session",
            )));
        };

        let file_name = reader.file_name().to_string();
        session.begin_file(&file_name);
        let chunks = reader.into_stream();
        tokio::pin!(chunks);

        let started_at = Instant::now();
        let mut sent_chunks = 0u64;
        let mut sent_bytes = 0u64;

        while let Some(chunk) = cancellable(cancel, chunks.next()).await? {
            let chunk = chunk.map_err(UploadError::Read)?;
            if self.state == ClientState::Open {
                self.transition(ClientState::Streaming);
            }
            sent_bytes += chunk.len() as u64;
            cancellable(cancel, session.send(chunk))
                .await?
                .map_err(UploadError::Stream)?;
            sent_chunks += 1;
        }

        let finished_at = Instant::now();

        cancellable(cancel, session.close_input())
            .await?
            .map_err(UploadError::Stream)?;
        self.transition(ClientState::AwaitingStatus);
        debug!(file = %file_name, chunks = sent_chunks, bytes = sent_bytes, "all chunks sent");

        let status = cancellable(cancel, session.await_status())
            .await?
            .map_err(UploadError::Stream)?;

        if !status.is_ok() {
            return Err(UploadError::Rejected(status.message));
        }

        Ok(Stats {
            started_at,
            finished_at,
        })
    }

    fn transition(&mut self, next: ClientState) {
        debug!(from = %self.state, to = %next, "client state");
        self.state = next;
    }
}

/// Runs `fut` unless `cancel` fires first.
async fn cancellable<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output, UploadError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(UploadError::Cancelled),
        output = fut => Ok(output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gupload_session::Transport;

    #[test]
    fn new_rejects_invalid_config() {
        assert!(matches!(
            UploadClient::new(ClientConfig::new("")),
            Err(UploadError::Config(_))
        ));
    }

    #[test]
    fn new_reports_missing_root_certificate_as_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ClientConfig::new("localhost:1313");
        config.root_certificate = Some(dir.path().join("missing.cert"));
        assert!(matches!(
            UploadClient::new(config),
            Err(UploadError::Connection(_))
        ));
    }

    #[test]
    fn starts_idle() {
        let client = UploadClient::new(ClientConfig::new("localhost:1313")).unwrap();
        assert_eq!(client.state(), ClientState::Idle);
    }

    #[tokio::test]
    async fn missing_file_fails_before_dialing() {
        // Nothing listens on this address; a dial attempt would surface as
        // a connection error instead.
        let mut client = UploadClient::new(ClientConfig::new("127.0.0.1:1")).unwrap();
        let dir = tempfile::tempdir().unwrap();

        let err = client
            .upload_file(dir.path().join("nope.bin"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::FileOpen { .. }));
        assert_eq!(client.state(), ClientState::Idle);
    }

    #[tokio::test]
    async fn cancelled_before_dial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, b"data").unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut config = ClientConfig::new("127.0.0.1:1");
        config.transport = Transport::Http;
        let mut client = UploadClient::new(config).unwrap();
        let err = client.upload_file(&path, &cancel).await.unwrap_err();

        assert!(matches!(err, UploadError::Cancelled));
        assert_eq!(client.state(), ClientState::Failed);
    }

    #[tokio::test]
    async fn connection_refused() {
        let port = {
            let l = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, b"data").unwrap();

        let mut client = UploadClient::new(ClientConfig::new(format!("127.0.0.1:{port}"))).unwrap();
        let err = client
            .upload_file(&path, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Connection(_)));
    }
}
