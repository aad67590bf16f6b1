//! TLS setup from PEM files.
//!
//! The server needs a certificate chain and private key; the client needs
//! the root certificate it trusts for the server. Without either, sessions
//! run over plain TCP.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use tokio_rustls::rustls::{
    Certificate, ClientConfig, PrivateKey, RootCertStore, ServerConfig, ServerName,
};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::error::SessionError;

/// Loads every certificate in a PEM file.
pub fn load_certs(path: &Path) -> Result<Vec<Certificate>, SessionError> {
    let file = File::open(path).map_err(|e| {
        SessionError::Tls(format!("failed to open certificate {}: {e}", path.display()))
    })?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader).map_err(|e| {
        SessionError::Tls(format!("failed to parse certificate {}: {e}", path.display()))
    })?;
    if certs.is_empty() {
        return Err(SessionError::Tls(format!(
            "no certificate found in {}",
            path.display()
        )));
    }
    Ok(certs.into_iter().map(Certificate).collect())
}

/// Loads the first private key in a PEM file (PKCS#8, PKCS#1 RSA or SEC1 EC).
pub fn load_private_key(path: &Path) -> Result<PrivateKey, SessionError> {
    let file = File::open(path).map_err(|e| {
        SessionError::Tls(format!("failed to open key {}: {e}", path.display()))
    })?;
    let mut reader = BufReader::new(file);
    let items = rustls_pemfile::read_all(&mut reader).map_err(|e| {
        SessionError::Tls(format!("failed to parse key {}: {e}", path.display()))
    })?;

    items
        .into_iter()
        .find_map(|item| match item {
            rustls_pemfile::Item::PKCS8Key(key)
            | rustls_pemfile::Item::RSAKey(key)
            | rustls_pemfile::Item::ECKey(key) => Some(PrivateKey(key)),
            _ => None,
        })
        .ok_or_else(|| SessionError::Tls(format!("no private key found in {}", path.display())))
}

/// Builds a server-side acceptor from a certificate chain and key.
pub fn server_acceptor(certificate: &Path, key: &Path) -> Result<TlsAcceptor, SessionError> {
    let certs = load_certs(certificate)?;
    let key = load_private_key(key)?;

    let config = ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| SessionError::Tls(format!("invalid certificate/key pair: {e}")))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Builds a client-side connector trusting only the given root certificate(s).
pub fn client_connector(root_certificate: &Path) -> Result<TlsConnector, SessionError> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(root_certificate)? {
        roots.add(&cert).map_err(|e| {
            SessionError::Tls(format!(
                "failed to add root certificate {}: {e}",
                root_certificate.display()
            ))
        })?;
    }

    let config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Parses the name the server certificate is checked against.
pub fn server_name(name: &str) -> Result<ServerName, SessionError> {
    ServerName::try_from(name)
        .map_err(|e| SessionError::Tls(format!("invalid server name {name}: {e}")))
}
