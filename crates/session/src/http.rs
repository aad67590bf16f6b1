//! Request-response variant over HTTP/1.1, on hyper.
//!
//! The client streams the file as the body of
//! `POST /upload/<percent-encoded name>`. The length is not known up front,
//! so hyper sends it with chunked transfer encoding; the end of the body is
//! the end of input. The server answers once: `200` means Ok, any other
//! code is an Error whose message is the response body.

use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::{Method, Request, Response, StatusCode as HttpStatus};
use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};

use gupload_transfer::{StatusCode, UploadStatus};

use crate::error::SessionError;

/// Path prefix for upload requests.
pub const UPLOAD_PATH: &str = "/upload/";

/// Largest response body read as a status message.
pub const MAX_STATUS_BODY: usize = 64 * 1024;

/// Characters escaped in the file-name path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'\\')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Request body streamed by the client. An error frame aborts the request
/// instead of ending it.
pub type UploadBody = UnsyncBoxBody<Bytes, SessionError>;

/// Response body sent by the server.
pub type StatusBody = Full<Bytes>;

/// Request target for `file_name`.
pub fn upload_path(file_name: &str) -> String {
    format!("{UPLOAD_PATH}{}", utf8_percent_encode(file_name, PATH_SEGMENT))
}

/// Checks an upload request's method and path and returns the decoded file
/// name, or the HTTP status and reason to reject it with.
pub fn parse_upload_request<B>(request: &Request<B>) -> Result<String, (HttpStatus, String)> {
    if request.method() != Method::POST {
        return Err((
            HttpStatus::METHOD_NOT_ALLOWED,
            format!("method not allowed: {}", request.method()),
        ));
    }

    let path = request.uri().path();
    let encoded = path
        .strip_prefix(UPLOAD_PATH)
        .ok_or_else(|| (HttpStatus::NOT_FOUND, format!("unknown path: {path}")))?;

    percent_decode_str(encoded)
        .decode_utf8()
        .map(|name| name.into_owned())
        .map_err(|e| {
            (
                HttpStatus::BAD_REQUEST,
                format!("invalid file name encoding: {e}"),
            )
        })
}

/// Plain-text response with an explicit HTTP status.
pub fn plain_response(code: HttpStatus, body: String) -> Response<StatusBody> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = code;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// The single response carrying `status`.
pub fn status_response(status: &UploadStatus) -> Response<StatusBody> {
    let code = match status.code {
        StatusCode::Ok => HttpStatus::OK,
        StatusCode::Error => HttpStatus::INTERNAL_SERVER_ERROR,
    };
    plain_response(code, status.message.clone())
}

/// Reads the response body and maps the exchange to a status.
pub async fn read_status(response: Response<Incoming>) -> Result<UploadStatus, SessionError> {
    let code = response.status();
    let body = Limited::new(response.into_body(), MAX_STATUS_BODY)
        .collect()
        .await
        .map_err(|e| SessionError::Protocol(format!("failed to read response body: {e}")))?
        .to_bytes();
    let message = String::from_utf8_lossy(&body).trim_end().to_string();

    if code.is_success() {
        Ok(UploadStatus::ok(message))
    } else if message.is_empty() {
        Ok(UploadStatus::error(format!(
            "request failed - status code: {}",
            code.as_u16()
        )))
    } else {
        Ok(UploadStatus::error(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(target: &str) -> Request<()> {
        Request::post(target).body(()).unwrap()
    }

    #[test]
    fn path_encodes_and_decodes() {
        for name in ["report.pdf", "my file #1.txt", "100%.log", "naïve?.bin"] {
            let target = upload_path(name);
            assert!(target.starts_with(UPLOAD_PATH));
            assert_eq!(parse_upload_request(&post(&target)).unwrap(), name);
        }
    }

    #[test]
    fn slash_is_escaped() {
        assert_eq!(upload_path("a/b"), "/upload/a%2Fb");
    }

    #[test]
    fn query_is_ignored() {
        assert_eq!(
            parse_upload_request(&post("/upload/a.txt?x=1")).unwrap(),
            "a.txt"
        );
    }

    #[test]
    fn wrong_method_or_path_rejected() {
        let get = Request::get("/upload/a.txt").body(()).unwrap();
        assert_eq!(
            parse_upload_request(&get).unwrap_err().0,
            HttpStatus::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            parse_upload_request(&post("/files/a.txt")).unwrap_err().0,
            HttpStatus::NOT_FOUND
        );
        assert_eq!(
            parse_upload_request(&post("/upload/%FF")).unwrap_err().0,
            HttpStatus::BAD_REQUEST
        );
    }

    #[test]
    fn status_codes() {
        let ok = status_response(&UploadStatus::ok("stored"));
        assert_eq!(ok.status(), HttpStatus::OK);
        let err = status_response(&UploadStatus::error("disk full"));
        assert_eq!(err.status(), HttpStatus::INTERNAL_SERVER_ERROR);
        assert_eq!(
            err.headers()[CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
    }
}
