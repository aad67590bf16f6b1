//! Client and server settings.
//!
//! Both are validated before any I/O happens; see
//! [`ClientConfig::validate`] and [`ServerConfig::validate`].

use std::path::PathBuf;

use gupload_session::Transport;
use gupload_transfer::{DEFAULT_CHUNK_SIZE, validate_chunk_size};

use crate::error::UploadError;

/// Upload client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address, `host:port` (an `http(s)://` prefix is tolerated).
    pub address: String,
    /// Payload bytes per chunk, 1 ..= 4 MiB.
    pub chunk_size: usize,
    /// PEM root certificate; enables TLS when set.
    pub root_certificate: Option<PathBuf>,
    /// Name checked against the server certificate (defaults to the
    /// address host).
    pub server_name: Option<String>,
    pub transport: Transport,
    /// Gzip chunk content (stream transport only).
    pub compress: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            root_certificate: None,
            server_name: None,
            transport: Transport::default(),
            compress: false,
        }
    }
}

impl ClientConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), UploadError> {
        if self.address.trim().is_empty() {
            return Err(UploadError::Config("address must be specified".into()));
        }
        validate_chunk_size(self.chunk_size).map_err(|e| UploadError::Config(e.to_string()))?;
        if self.compress && self.transport == Transport::Http {
            return Err(UploadError::Config(
                "compression is only available on the stream transport".into(),
            ));
        }
        Ok(())
    }
}

/// Upload server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind; `None` is a configuration error, `Some(0)` lets the
    /// OS pick one.
    pub port: Option<u16>,
    /// Directory uploaded files are written into.
    pub save_dir: PathBuf,
    /// PEM certificate chain; TLS requires both this and `key`.
    pub certificate: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub transport: Transport,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: None,
            save_dir: PathBuf::from("."),
            certificate: None,
            key: None,
            transport: Transport::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(port: u16, save_dir: impl Into<PathBuf>) -> Self {
        Self {
            port: Some(port),
            save_dir: save_dir.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), UploadError> {
        if self.port.is_none() {
            return Err(UploadError::Config("port must be specified".into()));
        }
        match (&self.certificate, &self.key) {
            (Some(_), None) => Err(UploadError::Config(
                "a TLS certificate requires a key".into(),
            )),
            (None, Some(_)) => Err(UploadError::Config(
                "a TLS key requires a certificate".into(),
            )),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use gupload_transfer::MAX_CHUNK_SIZE;

    #[test]
    fn client_requires_address() {
        let err = ClientConfig::new("  ").validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("address"));
    }

    #[test]
    fn client_chunk_size_bounds() {
        let mut config = ClientConfig::new("localhost:1313");
        config.chunk_size = 0;
        assert!(matches!(config.validate(), Err(UploadError::Config(_))));

        config.chunk_size = MAX_CHUNK_SIZE + 1;
        assert!(matches!(config.validate(), Err(UploadError::Config(_))));

        config.chunk_size = MAX_CHUNK_SIZE;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn client_compression_needs_stream_transport() {
        let mut config = ClientConfig::new("localhost:1313");
        config.compress = true;
        assert!(config.validate().is_ok());

        config.transport = Transport::Http;
        assert!(config.validate().is_err());
    }

    #[test]
    fn client_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.transport, Transport::Stream);
        assert!(!config.compress);
    }

    #[test]
    fn server_requires_port() {
        let err = ServerConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("port"));
        assert!(ServerConfig::new(0, ".").validate().is_ok());
    }

    #[test]
    fn server_tls_needs_both_files() {
        let mut config = ServerConfig::new(1313, ".");
        config.certificate = Some("server.cert".into());
        assert!(config.validate().is_err());

        config.key = Some("server.key".into());
        assert!(config.validate().is_ok());

        config.certificate = None;
        assert!(config.validate().is_err());
    }
}
