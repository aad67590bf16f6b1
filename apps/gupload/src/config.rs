//! Optional TOML configuration file.
//!
//! ```toml
//! [server]
//! port = 1313
//! save_dir = "./uploads"
//! certificate = "server.cert"
//! key = "server.key"
//! transport = "stream"
//!
//! [client]
//! address = "localhost:1313"
//! chunk_size = 4096
//! root_certificate = "ca.cert"
//! server_name = "localhost"
//! transport = "http"
//! compress = false
//! ```
//!
//! Every key is optional. Command-line flags take precedence.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use gupload_upload::DEFAULT_CHUNK_SIZE;

pub const DEFAULT_PORT: u16 = 1313;
pub const DEFAULT_ADDRESS: &str = "localhost:1313";

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub server: ServerSection,
    pub client: ClientSection,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    pub port: u16,
    pub save_dir: PathBuf,
    pub certificate: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub transport: Option<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            save_dir: PathBuf::from("./"),
            certificate: None,
            key: None,
            transport: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientSection {
    pub address: String,
    pub chunk_size: usize,
    pub root_certificate: Option<PathBuf>,
    pub server_name: Option<String>,
    pub transport: Option<String>,
    pub compress: bool,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            root_certificate: None,
            server_name: None,
            transport: None,
            compress: false,
        }
    }
}

impl FileConfig {
    /// Reads `path`, or returns the built-in defaults when no path is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }
}
