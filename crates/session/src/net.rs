//! Connection listener and dialer.
//!
//! The [`Listener`] binds a TCP port and hands out one [`Incoming`]
//! connection per accept; the TLS and session handshakes run in
//! [`Incoming::handshake`] so the caller can do them off the accept loop.
//! The [`Dialer`] opens the client side of a session.

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{debug, info};

use crate::client::{ClientOptions, ClientSession};
use crate::error::SessionError;
use crate::server::ServerSession;
use crate::{BoxedIo, Transport, tls};

/// Strips an optional `http://` / `https://` scheme and any path.
pub fn strip_scheme(address: &str) -> &str {
    let rest = address
        .strip_prefix("https://")
        .or_else(|| address.strip_prefix("http://"))
        .unwrap_or(address);
    rest.split('/').next().unwrap_or(rest)
}

/// Host part of a `host:port` address (brackets removed for IPv6).
pub fn host_of(address: &str) -> &str {
    let authority = strip_scheme(address);
    if let Some(rest) = authority.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match authority.rsplit_once(':') {
        Some((host, _port)) => host,
        None => authority,
    }
}

/// Opens client sessions to one server address.
#[derive(Clone)]
pub struct Dialer {
    address: String,
    transport: Transport,
    tls: Option<(TlsConnector, String)>,
    compress: bool,
}

impl Dialer {
    pub fn new(address: impl Into<String>, transport: Transport) -> Self {
        Self {
            address: address.into(),
            transport,
            tls: None,
            compress: false,
        }
    }

    /// Wraps connections in TLS, checking the server certificate against
    /// `server_name`.
    pub fn with_tls(mut self, connector: TlsConnector, server_name: impl Into<String>) -> Self {
        self.tls = Some((connector, server_name.into()));
        self
    }

    /// Requests gzip compression of chunk content.
    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Connects and starts a session.
    pub async fn open(&self) -> Result<ClientSession, SessionError> {
        let authority = strip_scheme(&self.address);
        let stream = TcpStream::connect(authority).await?;
        stream.set_nodelay(true)?;
        info!(address = %authority, transport = %self.transport, "connected");

        let io: BoxedIo = match &self.tls {
            Some((connector, name)) => {
                let server_name = tls::server_name(name)?;
                let tls_stream = connector
                    .connect(server_name, stream)
                    .await
                    .map_err(|e| SessionError::Tls(format!("TLS handshake failed: {e}")))?;
                debug!(server_name = %name, "TLS established");
                Box::new(tls_stream)
            }
            None => Box::new(stream),
        };

        let options = ClientOptions {
            compress: self.compress,
            host: authority.to_string(),
        };
        ClientSession::start(self.transport, io, &options).await
    }
}

/// A bound server socket.
pub struct Listener {
    inner: TcpListener,
    transport: Transport,
    acceptor: Option<TlsAcceptor>,
}

impl Listener {
    /// Binds all interfaces on `port` (0 = OS-assigned).
    pub async fn bind(
        port: u16,
        transport: Transport,
        acceptor: Option<TlsAcceptor>,
    ) -> Result<Self, SessionError> {
        let addr: SocketAddr = ([0, 0, 0, 0], port).into();
        let inner = TcpListener::bind(addr).await?;
        info!(
            addr = %inner.local_addr()?,
            %transport,
            tls = acceptor.is_some(),
            "listener bound"
        );
        Ok(Self {
            inner,
            transport,
            acceptor,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SessionError> {
        Ok(self.inner.local_addr()?)
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Waits for the next connection.
    pub async fn accept(&self) -> Result<Incoming, SessionError> {
        let (stream, peer) = self.inner.accept().await?;
        stream.set_nodelay(true)?;
        Ok(Incoming {
            stream,
            peer,
            transport: self.transport,
            acceptor: self.acceptor.clone(),
        })
    }
}

/// An accepted connection that has not yet completed its handshakes.
pub struct Incoming {
    stream: TcpStream,
    peer: SocketAddr,
    transport: Transport,
    acceptor: Option<TlsAcceptor>,
}

impl Incoming {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Runs the TLS handshake (if configured) and the session opening.
    pub async fn handshake(self) -> Result<ServerSession, SessionError> {
        let io: BoxedIo = match self.acceptor {
            Some(acceptor) => {
                let tls_stream = acceptor
                    .accept(self.stream)
                    .await
                    .map_err(|e| SessionError::Tls(format!("TLS handshake failed: {e}")))?;
                Box::new(tls_stream)
            }
            None => Box::new(self.stream),
        };
        ServerSession::handshake(self.transport, io).await
    }
}
