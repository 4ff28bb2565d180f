use std::io;

/// A malformed frame on the wire. The message text is part of the protocol's
/// external interface and must match byte-for-byte what clients expect.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Protocol error: invalid multibulk length")]
    InvalidMultibulkLength,
    #[error("Protocol error: invalid bulk length")]
    InvalidBulkLength,
    #[error("Protocol error: too big inline request")]
    TooBigInlineRequest,
    #[error("Protocol error: expected an integer")]
    ExpectedInteger,
    #[error("Protocol error: expected a nil")]
    ExpectedNil,
    #[error("Protocol error: expected '{expected}', got '{actual}'")]
    UnexpectedByte { expected: char, actual: char },
}

/// Top-level error for the buffered codec. `Io` covers a dead transport
/// (including clean EOF, which callers test for with [`Error::is_eof`]);
/// `Protocol` covers a frame that doesn't parse.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("resp: no more arguments")]
    NoMoreArgs,
    #[error("resp: cancelled")]
    Cancelled,
}

impl Error {
    /// True for a clean close with no bytes pending — not a protocol fault.
    pub fn is_eof(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
