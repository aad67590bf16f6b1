use std::path::{Component, Path};

use crate::{MAX_CHUNK_SIZE, TransferError};

/// Checks that `chunk_size` is positive and at most [`MAX_CHUNK_SIZE`].
pub fn validate_chunk_size(chunk_size: usize) -> Result<usize, TransferError> {
    match chunk_size {
        0 => Err(TransferError::InvalidChunkSize(
            "chunk size must be specified".into(),
        )),
        n if n > MAX_CHUNK_SIZE => Err(TransferError::InvalidChunkSize(format!(
            "chunk size must be <= {MAX_CHUNK_SIZE} bytes (4 MiB), got {n}"
        ))),
        n => Ok(n),
    }
}

/// Validates that a received file name is a single plain path component.
///
/// The name is joined onto the save directory, so anything that could
/// escape it is rejected:
/// - Empty names
/// - Absolute paths and Windows prefixes
/// - Separators (`/`, `\`)
/// - `.` and `..`
pub fn validate_file_name(file_name: &str) -> Result<(), TransferError> {
    if file_name.is_empty() {
        return Err(TransferError::InvalidFileName("empty file name".into()));
    }

    if file_name.contains(['/', '\\']) {
        return Err(TransferError::InvalidFileName(format!(
            "path separators not allowed: {file_name}"
        )));
    }

    if file_name.contains('\0') {
        return Err(TransferError::InvalidFileName(
            "NUL byte not allowed".into(),
        ));
    }

    let mut components = Path::new(file_name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(TransferError::InvalidFileName(format!(
            "not a plain file name: {file_name}"
        ))),
    }
}
