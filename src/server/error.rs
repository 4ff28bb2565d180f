/// Dispatch-loop level errors: everything that can end a connection's
/// command loop. Transport/protocol errors come from `resp::Error`;
/// `Timeout` is raised when a configured request/idle timeout elapses.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Resp(#[from] crate::resp::Error),
    #[error("request timed out")]
    RequestTimeout,
    #[error("connection idle timed out")]
    IdleTimeout,
}

impl DispatchError {
    pub fn is_eof(&self) -> bool {
        matches!(self, DispatchError::Resp(e) if e.is_eof())
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, DispatchError::Resp(e) if e.is_protocol())
    }
}
