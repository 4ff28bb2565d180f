use std::time::Duration;

/// Server-wide tunables. Grounded on the original's `Config` (read/write
/// timeouts, idle timeout) plus `proxy.rs`'s TCP-level knobs
/// (`set_nodelay`).
#[derive(Debug, Clone)]
pub struct Config {
    /// Upper bound on how long reading a single command's frame may take
    /// before the connection is closed. Handler execution itself is not
    /// bounded by this. `None` disables the timeout.
    pub request_timeout: Option<Duration>,
    /// Connection is closed if no command arrives within this long.
    /// `None` disables the timeout.
    pub idle_timeout: Option<Duration>,
    /// TCP keepalive interval applied to accepted sockets. Only meaningful
    /// for TCP listeners; ignored for other transports.
    pub tcp_keepalive: Option<Duration>,
    /// Disable Nagle's algorithm on accepted TCP sockets.
    pub tcp_nodelay: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_timeout: None,
            idle_timeout: None,
            tcp_keepalive: Some(Duration::from_secs(60)),
            tcp_nodelay: true,
        }
    }
}
