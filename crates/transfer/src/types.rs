use std::fmt;
use std::time::{Duration, Instant};

/// One bounded slice of a file, in send order.
///
/// Ordering is implicit: the receiver sees chunks in exactly the order the
/// sender handed them to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Base name of the source file (no directory components).
    pub file_name: String,
    /// Raw payload.
    pub content: Vec<u8>,
}

impl Chunk {
    pub fn new(file_name: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content,
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// Outcome code of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    Error,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusCode::Ok => f.write_str("ok"),
            StatusCode::Error => f.write_str("error"),
        }
    }
}

/// The single terminal response that ends a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadStatus {
    pub code: StatusCode,
    pub message: String,
}

impl UploadStatus {
    /// A successful status with the given message.
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            code: StatusCode::Ok,
            message: message.into(),
        }
    }

    /// A failure status with the given message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            code: StatusCode::Error,
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok
    }
}

/// Timestamps bracketing the client's send phase.
#[derive(Debug, Clone, Copy)]
pub struct Stats {
    pub started_at: Instant,
    pub finished_at: Instant,
}

impl Stats {
    /// Time spent sending chunks.
    pub fn duration(&self) -> Duration {
        self.finished_at.saturating_duration_since(self.started_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_constructors() {
        let ok = UploadStatus::ok("done");
        assert!(ok.is_ok());
        assert_eq!(ok.message, "done");

        let err = UploadStatus::error("disk full");
        assert!(!err.is_ok());
        assert_eq!(err.code, StatusCode::Error);
    }

    #[test]
    fn status_code_display() {
        assert_eq!(StatusCode::Ok.to_string(), "ok");
        assert_eq!(StatusCode::Error.to_string(), "error");
    }

    #[test]
    fn chunk_len() {
        let chunk = Chunk::new("a.bin", vec![1, 2, 3]);
        assert_eq!(chunk.len(), 3);
        assert!(!chunk.is_empty());
    }

    #[test]
    fn stats_duration_never_negative() {
        let now = Instant::now();
        let later = now + Duration::from_millis(5);
        let stats = Stats {
            started_at: later,
            finished_at: now,
        };
        assert_eq!(stats.duration(), Duration::ZERO);

        let stats = Stats {
            started_at: now,
            finished_at: later,
        };
        assert_eq!(stats.duration(), Duration::from_millis(5));
    }
}
