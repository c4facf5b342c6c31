use thiserror::Error;

/// Errors surfaced by the driver.
///
/// Protocol failures are reported by the server and leave the connection
/// usable; `Io` means the byte channel itself broke and is propagated
/// unchanged from the framer.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("cursor {0} not found on server")]
    CursorNotFound(i64),

    #[error("query failure: {0}")]
    QueryFailure(String),

    #[error("write failure (code {code}): {message}")]
    WriteFailure { code: i32, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DbError {
    /// True for server-reported failures the caller can recover from while
    /// keeping the connection.
    #[must_use]
    pub const fn is_protocol_failure(&self) -> bool {
        !matches!(self, Self::Io(_))
    }
}
