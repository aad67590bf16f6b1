//! Upload error taxonomy.

use gupload_session::SessionError;
use gupload_transfer::TransferError;

/// Errors produced by an upload, on either side.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// Invalid settings, rejected before any I/O.
    #[error("configuration error: {0}")]
    Config(String),

    /// The source file could not be opened. No connection was attempted.
    #[error("failed to open file {path}: {source}")]
    FileOpen {
        path: String,
        #[source]
        source: TransferError,
    },

    /// Dial, bind or TLS setup failed.
    #[error("connection error: {0}")]
    Connection(#[source] SessionError),

    /// A send or receive failed mid-transfer.
    #[error("stream error: {0}")]
    Stream(#[source] SessionError),

    /// Reading the source file failed mid-transfer.
    #[error("failed reading source file: {0}")]
    Read(#[source] TransferError),

    /// The destination file could not be created, written or synced.
    #[error("sink error: {0}")]
    Sink(String),

    /// The server answered with an Error status.
    #[error("upload failed - msg: {0}")]
    Rejected(String),

    #[error("cancelled")]
    Cancelled,
}

/// Broad category of an [`UploadError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Connection,
    Transfer,
    Rejected,
    Cancelled,
}

impl UploadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UploadError::Config(_) | UploadError::FileOpen { .. } => ErrorKind::Configuration,
            UploadError::Connection(_) => ErrorKind::Connection,
            UploadError::Stream(_) | UploadError::Read(_) | UploadError::Sink(_) => {
                ErrorKind::Transfer
            }
            UploadError::Rejected(_) => ErrorKind::Rejected,
            UploadError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_message_includes_server_text() {
        let err = UploadError::Rejected("disk quota exceeded".into());
        assert!(err.to_string().contains("disk quota exceeded"));
        assert_eq!(err.kind(), ErrorKind::Rejected);
    }

    #[test]
    fn kinds() {
        assert_eq!(UploadError::Config("x".into()).kind(), ErrorKind::Configuration);
        assert_eq!(
            UploadError::Stream(SessionError::Protocol("x".into())).kind(),
            ErrorKind::Transfer
        );
        assert_eq!(
            UploadError::Connection(SessionError::Tls("x".into())).kind(),
            ErrorKind::Connection
        );
        assert_eq!(UploadError::Cancelled.kind(), ErrorKind::Cancelled);
    }
}
