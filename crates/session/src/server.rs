//! Server half of a transport session.
//!
//! [`receive`](ServerSession::receive) yields chunks in arrival order and
//! returns `None` exactly once, at end of input;
//! [`respond`](ServerSession::respond) sends the single terminal status.

use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use http_body_util::BodyExt;
use hyper::Request;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::StatusCode as HttpStatus;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncWriteExt, BufStream};
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, warn};

use gupload_transfer::{Chunk, UploadStatus};

use crate::error::SessionError;
use crate::http::StatusBody;
use crate::wire::ClientFrame;
use crate::{BoxedIo, READ_BUFFER_SIZE, Transport, http, wire};

/// An accepted server session, one per connection.
pub enum ServerSession {
    Stream(StreamServerSession),
    Http(HttpServerSession),
}

impl ServerSession {
    /// Reads the session opening (HELLO or request head) from a fresh
    /// connection.
    pub async fn handshake(transport: Transport, io: BoxedIo) -> Result<Self, SessionError> {
        match transport {
            Transport::Stream => {
                let mut io = BufStream::with_capacity(READ_BUFFER_SIZE, READ_BUFFER_SIZE, io);
                let hello = wire::read_hello(&mut io).await?;
                debug!(compress = hello.compress, "stream session: hello received");
                Ok(ServerSession::Stream(StreamServerSession {
                    io,
                    compress: hello.compress,
                    input_done: false,
                }))
            }
            Transport::Http => Ok(ServerSession::Http(HttpServerSession::accept(io).await?)),
        }
    }

    pub fn transport(&self) -> Transport {
        match self {
            ServerSession::Stream(_) => Transport::Stream,
            ServerSession::Http(_) => Transport::Http,
        }
    }

    /// File name announced before any chunk, if the transport has one.
    ///
    /// HTTP carries it in the request path; stream sessions only learn it
    /// from the first chunk.
    pub fn file_name(&self) -> Option<&str> {
        match self {
            ServerSession::Stream(_) => None,
            ServerSession::Http(s) => Some(&s.file_name),
        }
    }

    /// Receives the next chunk, or `None` at end of input.
    ///
    /// Calling again after `None` is an error.
    pub async fn receive(&mut self) -> Result<Option<Chunk>, SessionError> {
        match self {
            ServerSession::Stream(s) => s.receive().await,
            ServerSession::Http(s) => s.receive().await,
        }
    }

    /// Sends the terminal status and closes the session.
    pub async fn respond(self, status: UploadStatus) -> Result<(), SessionError> {
        match self {
            ServerSession::Stream(s) => s.respond(status).await,
            ServerSession::Http(s) => s.respond(status).await,
        }
    }
}

/// Stream-native server session.
pub struct StreamServerSession {
    io: BufStream<BoxedIo>,
    compress: bool,
    input_done: bool,
}

impl StreamServerSession {
    async fn receive(&mut self) -> Result<Option<Chunk>, SessionError> {
        if self.input_done {
            return Err(SessionError::InvalidState("receive after end of input"));
        }
        match wire::read_client_frame(&mut self.io, self.compress).await? {
            ClientFrame::Chunk(chunk) => Ok(Some(chunk)),
            ClientFrame::End => {
                self.input_done = true;
                Ok(None)
            }
        }
    }

    async fn respond(mut self, status: UploadStatus) -> Result<(), SessionError> {
        wire::write_status(&mut self.io, &status).await?;
        self.io.flush().await?;
        if let Err(e) = self.io.shutdown().await {
            warn!("stream session: shutdown after status failed: {e}");
        }
        Ok(())
    }
}

type AcceptedRequest = Result<(String, Incoming), String>;

/// Handed from the session to the hyper service for the one request a
/// connection may carry.
type RequestSlot = Mutex<Option<(oneshot::Sender<AcceptedRequest>, oneshot::Receiver<UploadStatus>)>>;

/// HTTP request-response server session.
///
/// hyper serves the connection on its own task. The service hands the
/// request body over and waits for the status to answer with.
pub struct HttpServerSession {
    file_name: String,
    /// `None` once the body has ended.
    body: Option<Incoming>,
    reply: oneshot::Sender<UploadStatus>,
    connection: JoinHandle<Result<(), hyper::Error>>,
}

impl HttpServerSession {
    async fn accept(io: BoxedIo) -> Result<Self, SessionError> {
        let (request_tx, request_rx) = oneshot::channel();
        let (reply_tx, reply_rx) = oneshot::channel();
        let slot: Arc<RequestSlot> = Arc::new(Mutex::new(Some((request_tx, reply_rx))));

        let service = service_fn(move |request: Request<Incoming>| {
            let slot = Arc::clone(&slot);
            async move { Ok::<_, Infallible>(answer(request, &slot).await) }
        });
        let mut connection = tokio::spawn(
            http1::Builder::new()
                .keep_alive(false)
                .serve_connection(TokioIo::new(io), service),
        );

        let accepted = tokio::select! {
            accepted = request_rx => accepted,
            result = &mut connection => {
                connection_outcome(result)?;
                return Err(SessionError::Protocol(
                    "connection closed before a request arrived".into(),
                ));
            }
        };

        match accepted {
            Ok(Ok((file_name, body))) => {
                debug!(file = %file_name, "http session: request received");
                Ok(Self {
                    file_name,
                    body: Some(body),
                    reply: reply_tx,
                    connection,
                })
            }
            // Already answered by the service.
            Ok(Err(reason)) => Err(SessionError::Protocol(reason)),
            Err(_) => {
                connection_outcome(connection.await)?;
                Err(SessionError::Protocol(
                    "connection closed before a request arrived".into(),
                ))
            }
        }
    }

    async fn receive(&mut self) -> Result<Option<Chunk>, SessionError> {
        loop {
            let Some(body) = self.body.as_mut() else {
                return Err(SessionError::InvalidState("receive after end of input"));
            };
            match body.frame().await {
                Some(Ok(frame)) => {
                    // Trailers and empty frames carry no content.
                    if let Ok(data) = frame.into_data() {
                        if !data.is_empty() {
                            return Ok(Some(Chunk::new(self.file_name.clone(), data.to_vec())));
                        }
                    }
                }
                Some(Err(e)) => return Err(e.into()),
                None => {
                    self.body = None;
                    return Ok(None);
                }
            }
        }
    }

    async fn respond(self, status: UploadStatus) -> Result<(), SessionError> {
        let HttpServerSession {
            body,
            reply,
            connection,
            ..
        } = self;
        drop(body);
        if reply.send(status).is_err() {
            debug!("http session: request handler gone before the response");
        }
        connection_outcome(connection.await)
    }
}

/// Service body: hands the first request to the session, then answers with
/// the status the session sends back.
async fn answer(request: Request<Incoming>, slot: &RequestSlot) -> hyper::Response<StatusBody> {
    let taken = slot.lock().ok().and_then(|mut slot| slot.take());
    let Some((request_tx, reply_rx)) = taken else {
        return http::plain_response(
            HttpStatus::SERVICE_UNAVAILABLE,
            "one upload per connection".into(),
        );
    };

    let file_name = match http::parse_upload_request(&request) {
        Ok(name) => name,
        Err((code, reason)) => {
            let _ = request_tx.send(Err(reason.clone()));
            return http::plain_response(code, reason);
        }
    };

    if request_tx.send(Ok((file_name, request.into_body()))).is_err() {
        return http::plain_response(
            HttpStatus::INTERNAL_SERVER_ERROR,
            "upload abandoned".into(),
        );
    }
    match reply_rx.await {
        Ok(status) => http::status_response(&status),
        Err(_) => http::plain_response(HttpStatus::INTERNAL_SERVER_ERROR, "upload aborted".into()),
    }
}

fn connection_outcome(result: Result<Result<(), hyper::Error>, JoinError>) -> Result<(), SessionError> {
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.into()),
        Err(e) => Err(SessionError::Protocol(format!("http connection task failed: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientOptions, ClientSession};
    use std::time::Duration;
    use tokio::io::{AsyncRead, AsyncReadExt};

    fn pipe() -> (BoxedIo, BoxedIo) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        (Box::new(a), Box::new(b))
    }

    fn joined(chunks: &[Chunk]) -> Vec<u8> {
        chunks.iter().flat_map(|c| c.content.iter().copied()).collect()
    }

    /// Reads a chunked request up to and including its last chunk.
    async fn read_chunked_request<R: AsyncRead + Unpin>(reader: &mut R) -> String {
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.ends_with(b"0\r\n\r\n") {
            let n = reader.read(&mut buf).await.unwrap();
            assert!(n > 0, "request ended early");
            request.extend_from_slice(&buf[..n]);
        }
        String::from_utf8_lossy(&request).into_owned()
    }

    async fn exchange(transport: Transport, compress: bool) {
        let (client_io, server_io) = pipe();
        let chunks = vec![
            Chunk::new("notes.txt", b"alpha ".to_vec()),
            Chunk::new("notes.txt", b"beta ".to_vec()),
            Chunk::new("notes.txt", b"gamma".to_vec()),
        ];

        let server = tokio::spawn(async move {
            let mut session = ServerSession::handshake(transport, server_io).await.unwrap();
            let mut received = Vec::new();
            while let Some(chunk) = session.receive().await.unwrap() {
                received.push(chunk);
            }
            assert!(session.receive().await.is_err());
            session.respond(UploadStatus::ok("stored")).await.unwrap();
            received
        });

        let options = ClientOptions {
            compress,
            host: "test".into(),
        };
        let mut client = ClientSession::start(transport, client_io, &options)
            .await
            .unwrap();
        for chunk in chunks.clone() {
            client.send(chunk).await.unwrap();
        }
        client.close_input().await.unwrap();
        let status = client.await_status().await.unwrap();

        assert_eq!(status, UploadStatus::ok("stored"));
        let received = server.await.unwrap();
        assert!(received.iter().all(|c| c.file_name == "notes.txt"));
        assert_eq!(joined(&received), joined(&chunks));
        if transport == Transport::Stream {
            // Frame boundaries survive the native framing.
            assert_eq!(received, chunks);
        }
    }

    #[tokio::test]
    async fn stream_exchange() {
        exchange(Transport::Stream, false).await;
    }

    #[tokio::test]
    async fn stream_exchange_compressed() {
        exchange(Transport::Stream, true).await;
    }

    #[tokio::test]
    async fn http_exchange() {
        exchange(Transport::Http, false).await;
    }

    #[tokio::test]
    async fn error_status_reaches_client() {
        for transport in [Transport::Stream, Transport::Http] {
            let (client_io, server_io) = pipe();
            let server = tokio::spawn(async move {
                let mut session = ServerSession::handshake(transport, server_io).await.unwrap();
                while session.receive().await.unwrap().is_some() {}
                session.respond(UploadStatus::error("disk full")).await.unwrap();
            });

            let mut client = ClientSession::start(transport, client_io, &ClientOptions::default())
                .await
                .unwrap();
            client.send(Chunk::new("a.bin", vec![1, 2, 3])).await.unwrap();
            client.close_input().await.unwrap();
            let status = client.await_status().await.unwrap();

            assert_eq!(status, UploadStatus::error("disk full"));
            server.await.unwrap();
        }
    }

    #[tokio::test]
    async fn http_chunked_error_response_is_decoded() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(async move {
            let mut raw = server_io;
            read_chunked_request(&mut raw).await;
            raw.write_all(
                b"HTTP/1.1 500 Internal Server Error\r\n\
                  Transfer-Encoding: chunked\r\n\r\n\
                  9\r\ndisk full\r\n0\r\n\r\n",
            )
            .await
            .unwrap();
            // Keep the connection open.
            std::future::pending::<()>().await;
        });

        let mut client = ClientSession::start(Transport::Http, Box::new(client_io), &ClientOptions::default())
            .await
            .unwrap();
        client.send(Chunk::new("a.bin", vec![7; 10])).await.unwrap();
        client.close_input().await.unwrap();
        let status = tokio::time::timeout(Duration::from_secs(5), client.await_status())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(status, UploadStatus::error("disk full"));
        server.abort();
    }

    #[tokio::test]
    async fn http_chunked_ok_response_on_open_connection() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(async move {
            let mut raw = server_io;
            read_chunked_request(&mut raw).await;
            raw.write_all(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nok\r\n0\r\n\r\n")
                .await
                .unwrap();
            std::future::pending::<()>().await;
        });

        let mut client = ClientSession::start(Transport::Http, Box::new(client_io), &ClientOptions::default())
            .await
            .unwrap();
        client.send(Chunk::new("a.bin", b"pdf".to_vec())).await.unwrap();
        client.close_input().await.unwrap();
        let status = tokio::time::timeout(Duration::from_secs(5), client.await_status())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(status, UploadStatus::ok("ok"));
        server.abort();
    }

    #[tokio::test]
    async fn http_request_line_and_headers() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(async move {
            let mut raw = server_io;
            let request = read_chunked_request(&mut raw).await;
            raw.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n")
                .await
                .unwrap();
            request
        });

        let options = ClientOptions {
            compress: false,
            host: "files.example:1313".into(),
        };
        let mut client = ClientSession::start(Transport::Http, Box::new(client_io), &options)
            .await
            .unwrap();
        client.send(Chunk::new("my report.pdf", b"pdf".to_vec())).await.unwrap();
        client.close_input().await.unwrap();
        let status = client.await_status().await.unwrap();
        let request = server.await.unwrap().to_ascii_lowercase();

        assert!(status.is_ok());
        assert!(request.starts_with("post /upload/my%20report.pdf http/1.1\r\n"));
        assert!(request.contains("host: files.example:1313\r\n"));
        assert!(request.contains("transfer-encoding: chunked\r\n"));
    }

    #[tokio::test]
    async fn http_content_length_body_accepted() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(async move {
            let mut session = ServerSession::handshake(Transport::Http, Box::new(server_io))
                .await
                .unwrap();
            assert_eq!(session.file_name(), Some("plain.txt"));
            let mut received = Vec::new();
            while let Some(chunk) = session.receive().await.unwrap() {
                received.push(chunk);
            }
            session.respond(UploadStatus::ok("stored")).await.unwrap();
            joined(&received)
        });

        let mut raw = client_io;
        raw.write_all(
            b"POST /upload/plain.txt HTTP/1.1\r\nHost: x\r\nContent-Length: 11\r\n\r\nhello world",
        )
        .await
        .unwrap();
        let mut response = String::new();
        raw.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("stored"));
        assert_eq!(server.await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn http_abandoned_upload_is_not_completed() {
        let (client_io, server_io) = pipe();
        let server = tokio::spawn(async move {
            let mut session = ServerSession::handshake(Transport::Http, server_io).await.unwrap();
            loop {
                match session.receive().await {
                    Ok(Some(_)) => {}
                    Ok(None) => return false,
                    Err(_) => return true,
                }
            }
        });

        let mut client = ClientSession::start(Transport::Http, client_io, &ClientOptions::default())
            .await
            .unwrap();
        client.send(Chunk::new("cut.bin", vec![1; 100])).await.unwrap();
        drop(client);

        assert!(server.await.unwrap(), "truncated body must not end cleanly");
    }

    #[tokio::test]
    async fn close_input_twice_rejected() {
        let (client_io, _server_io) = pipe();
        let mut client = ClientSession::start(Transport::Stream, client_io, &ClientOptions::default())
            .await
            .unwrap();
        client.close_input().await.unwrap();
        assert!(matches!(
            client.close_input().await,
            Err(SessionError::InvalidState(_))
        ));
        assert!(client.send(Chunk::new("a", vec![1])).await.is_err());
    }

    #[tokio::test]
    async fn status_before_close_rejected() {
        let (client_io, _server_io) = pipe();
        let client = ClientSession::start(Transport::Http, client_io, &ClientOptions::default())
            .await
            .unwrap();
        assert!(matches!(
            client.await_status().await,
            Err(SessionError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn http_rejects_compression() {
        let (client_io, _server_io) = pipe();
        let options = ClientOptions {
            compress: true,
            host: String::new(),
        };
        assert!(ClientSession::start(Transport::Http, client_io, &options).await.is_err());
    }

    #[tokio::test]
    async fn http_bad_request_answered() {
        let (a, b) = tokio::io::duplex(4096);
        let mut raw_client = a;
        let server = tokio::spawn(async move {
            ServerSession::handshake(Transport::Http, Box::new(b)).await.is_err()
        });

        raw_client
            .write_all(b"GET /index.html HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        raw_client.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 405"));
        assert!(server.await.unwrap());
    }

    #[tokio::test]
    async fn empty_transfer_ends_immediately() {
        for transport in [Transport::Stream, Transport::Http] {
            let (client_io, server_io) = pipe();
            let server = tokio::spawn(async move {
                let mut session = ServerSession::handshake(transport, server_io).await.unwrap();
                let name = session.file_name().map(str::to_owned);
                let first = session.receive().await.unwrap();
                session.respond(UploadStatus::error("no chunks")).await.unwrap();
                (name, first)
            });

            let mut client = ClientSession::start(transport, client_io, &ClientOptions::default())
                .await
                .unwrap();
            client.begin_file("empty.bin");
            client.close_input().await.unwrap();
            let status = client.await_status().await.unwrap();

            assert!(!status.is_ok());
            let (name, first) = server.await.unwrap();
            assert!(first.is_none());
            match transport {
                Transport::Stream => assert_eq!(name, None),
                Transport::Http => assert_eq!(name.as_deref(), Some("empty.bin")),
            }
        }
    }
}
