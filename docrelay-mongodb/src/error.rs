use mongodb::error::{Error, ErrorKind};

use docrelay_core::error::StoreError;

/// Whether the driver gave up before the server could answer.
fn is_unreachable(kind: &ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::Io(_)
            | ErrorKind::ServerSelection { .. }
            | ErrorKind::ConnectionPoolCleared { .. }
            | ErrorKind::DnsResolve { .. }
            | ErrorKind::Authentication { .. }
    )
}

/// Maps a driver error onto the store taxonomy. Anything the server answered is a
/// storage error.
pub(crate) fn store_error(error: Error) -> StoreError {
    if is_unreachable(&error.kind) {
        StoreError::Connection(error.to_string())
    } else {
        StoreError::Storage(error.to_string())
    }
}
