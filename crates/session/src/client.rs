//! Client half of a transport session.
//!
//! Ordered chunks go out with [`send`](ClientSession::send), end-of-input
//! is signalled once with [`close_input`](ClientSession::close_input), and
//! the terminal status is read with
//! [`await_status`](ClientSession::await_status).

use futures_util::stream;
use http_body_util::{BodyExt, StreamBody};
use hyper::Request;
use hyper::body::{Bytes, Frame};
use hyper::client::conn::http1;
use hyper::header::HOST;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncWriteExt, BufStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use gupload_transfer::{Chunk, UploadStatus};

use crate::error::SessionError;
use crate::http::UploadBody;
use crate::wire::Hello;
use crate::{BoxedIo, READ_BUFFER_SIZE, TCP_BUFFER_SIZE, Transport, http, wire};

/// Body pieces queued between `send` and the connection task.
const BODY_QUEUE_DEPTH: usize = 4;

/// Per-session client options.
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// Gzip chunk content (stream transport only).
    pub compress: bool,
    /// Value of the HTTP `Host` header.
    pub host: String,
}

/// An open client session, one per file transfer.
pub enum ClientSession {
    Stream(StreamClientSession),
    Http(HttpClientSession),
}

impl ClientSession {
    /// Starts a session over an established connection.
    pub async fn start(
        transport: Transport,
        io: BoxedIo,
        options: &ClientOptions,
    ) -> Result<Self, SessionError> {
        match transport {
            Transport::Stream => {
                let mut session = StreamClientSession {
                    io: BufStream::with_capacity(READ_BUFFER_SIZE, TCP_BUFFER_SIZE, io),
                    compress: options.compress,
                    input_closed: false,
                };
                wire::write_hello(&mut session.io, &Hello {
                    compress: options.compress,
                })
                .await?;
                Ok(ClientSession::Stream(session))
            }
            Transport::Http => {
                if options.compress {
                    return Err(SessionError::Protocol(
                        "compression is not supported over the HTTP transport".into(),
                    ));
                }
                Ok(ClientSession::Http(HttpClientSession {
                    io: Some(io),
                    host: options.host.clone(),
                    file_name: None,
                    body: None,
                    exchange: None,
                    input_closed: false,
                }))
            }
        }
    }

    pub fn transport(&self) -> Transport {
        match self {
            ClientSession::Stream(_) => Transport::Stream,
            ClientSession::Http(_) => Transport::Http,
        }
    }

    /// Names the file about to be sent.
    ///
    /// The HTTP variant puts the name in the request path, so the request
    /// can go out even if no chunk follows. Stream sessions carry the name
    /// in every chunk and ignore this.
    pub fn begin_file(&mut self, file_name: &str) {
        if let ClientSession::Http(s) = self {
            s.file_name.get_or_insert_with(|| file_name.to_string());
        }
    }

    /// Sends one chunk. Chunks arrive in the order they are sent.
    pub async fn send(&mut self, chunk: Chunk) -> Result<(), SessionError> {
        match self {
            ClientSession::Stream(s) => s.send(chunk).await,
            ClientSession::Http(s) => s.send(chunk).await,
        }
    }

    /// Signals that no more chunks follow. Must be called exactly once.
    pub async fn close_input(&mut self) -> Result<(), SessionError> {
        match self {
            ClientSession::Stream(s) => s.close_input().await,
            ClientSession::Http(s) => s.close_input().await,
        }
    }

    /// Waits for the server's terminal status, consuming the session.
    pub async fn await_status(self) -> Result<UploadStatus, SessionError> {
        match self {
            ClientSession::Stream(s) => s.await_status().await,
            ClientSession::Http(s) => s.await_status().await,
        }
    }
}

/// Stream-native client session.
pub struct StreamClientSession {
    io: BufStream<BoxedIo>,
    compress: bool,
    input_closed: bool,
}

impl StreamClientSession {
    async fn send(&mut self, chunk: Chunk) -> Result<(), SessionError> {
        if self.input_closed {
            return Err(SessionError::InvalidState("send after end of input"));
        }
        wire::write_chunk(&mut self.io, chunk, self.compress).await
    }

    async fn close_input(&mut self) -> Result<(), SessionError> {
        if self.input_closed {
            return Err(SessionError::InvalidState("end of input already signalled"));
        }
        self.input_closed = true;
        wire::write_end(&mut self.io).await?;
        self.io.flush().await?;
        debug!("stream session: end of input sent");
        Ok(())
    }

    async fn await_status(mut self) -> Result<UploadStatus, SessionError> {
        if !self.input_closed {
            return Err(SessionError::InvalidState(
                "status requested before end of input",
            ));
        }
        let status = wire::read_status(&mut self.io).await?;
        // Best effort: the server closes its side after the status anyway.
        let _ = self.io.shutdown().await;
        Ok(status)
    }
}

/// HTTP request-response client session.
///
/// The request starts with the first chunk (or at end of input). Chunks
/// are queued to a task that drives the hyper connection and then reads
/// the response.
pub struct HttpClientSession {
    /// Connection, until the request starts.
    io: Option<BoxedIo>,
    host: String,
    file_name: Option<String>,
    body: Option<mpsc::Sender<BodyPiece>>,
    exchange: Option<JoinHandle<Result<UploadStatus, SessionError>>>,
    input_closed: bool,
}

enum BodyPiece {
    Data(Bytes),
    End,
}

impl HttpClientSession {
    fn start_request(&mut self, file_name: &str) -> Result<(), SessionError> {
        let Some(io) = self.io.take() else {
            return Ok(());
        };
        let name = self
            .file_name
            .get_or_insert_with(|| file_name.to_string())
            .clone();

        let (tx, rx) = mpsc::channel(BODY_QUEUE_DEPTH);
        // Dropping the sender without an explicit End fails the body, so an
        // abandoned upload never looks complete to the server.
        let frames = stream::unfold(Some(rx), |state| async move {
            let Some(mut rx) = state else {
                return None;
            };
            match rx.recv().await {
                Some(BodyPiece::Data(data)) => Some((Ok(Frame::data(data)), Some(rx))),
                Some(BodyPiece::End) => None,
                None => Some((
                    Err(SessionError::InvalidState("upload abandoned before end of input")),
                    None,
                )),
            }
        });
        let request = Request::post(http::upload_path(&name))
            .header(HOST, self.host.as_str())
            .body(StreamBody::new(frames).boxed_unsync())
            .map_err(|e| SessionError::Protocol(format!("invalid upload request: {e}")))?;

        debug!(file = %name, "http session: request started");
        self.exchange = Some(tokio::spawn(exchange(io, request)));
        self.body = Some(tx);
        Ok(())
    }

    async fn queue(&mut self, piece: BodyPiece) -> Result<(), SessionError> {
        let Some(body) = &self.body else {
            return Err(SessionError::InvalidState("request body already finished"));
        };
        if body.send(piece).await.is_ok() {
            return Ok(());
        }
        // The connection task stopped reading the body; report why.
        self.body = None;
        Err(match self.exchange.take() {
            Some(task) => match task.await {
                Ok(Ok(status)) => SessionError::Protocol(format!(
                    "server answered before the upload finished: {}",
                    status.message
                )),
                Ok(Err(e)) => e,
                Err(e) => SessionError::Protocol(format!("http exchange task failed: {e}")),
            },
            None => SessionError::InvalidState("request not started"),
        })
    }

    async fn send(&mut self, chunk: Chunk) -> Result<(), SessionError> {
        if self.input_closed {
            return Err(SessionError::InvalidState("send after end of input"));
        }
        self.start_request(&chunk.file_name)?;
        if chunk.content.is_empty() {
            return Ok(());
        }
        self.queue(BodyPiece::Data(Bytes::from(chunk.content))).await
    }

    async fn close_input(&mut self) -> Result<(), SessionError> {
        if self.input_closed {
            return Err(SessionError::InvalidState("end of input already signalled"));
        }
        self.input_closed = true;
        self.start_request("")?;
        self.queue(BodyPiece::End).await?;
        self.body = None;
        debug!("http session: request body complete");
        Ok(())
    }

    async fn await_status(mut self) -> Result<UploadStatus, SessionError> {
        if !self.input_closed {
            return Err(SessionError::InvalidState(
                "status requested before end of input",
            ));
        }
        let Some(task) = self.exchange.take() else {
            return Err(SessionError::InvalidState("request not started"));
        };
        task.await
            .map_err(|e| SessionError::Protocol(format!("http exchange task failed: {e}")))?
    }
}

/// Sends `request` over `io` and reads the response into a status.
async fn exchange(
    io: BoxedIo,
    request: Request<UploadBody>,
) -> Result<UploadStatus, SessionError> {
    let (mut sender, connection) = http1::handshake(TokioIo::new(io)).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            debug!("http connection closed: {e}");
        }
    });

    sender.ready().await?;
    let response = sender.send_request(request).await?;
    debug!(status = %response.status(), "http session: response received");
    http::read_status(response).await
}
