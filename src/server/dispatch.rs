//! The connection dispatch loop: peek a command's name, decide whether it
//! needs an eager or streaming read, look up its handler, serve it, flush.
//!
//! Grounded on `example_test.go`'s `Serve`/`ServeClient` shape and
//! `proxy.rs::handle_client_inner` for the per-connection loop structure
//! (one task per accepted connection, log-and-drop on error) and
//! `main.rs::shutdown_signal` for the ctrl_c/SIGTERM graceful-shutdown idiom.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, Notify};

use crate::cancel::CancelToken;
use crate::info::ServerInfo;
use crate::pubsub::SharedWriter;
use crate::resp::{Command, RequestReader, RequestWriter};

use super::config::Config;
use super::error::DispatchError;
use super::handler::{Handler, HandlerEntry, StreamHandler};

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-wide, monotonically increasing client id. See
/// SPEC_FULL.md §9 *Global state → scoped state*: client ids are unique
/// across every `Server` in the process, not just within one.
fn next_client_id() -> u64 {
    NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed)
}

/// An immutable handler registry plus dispatch configuration. Build one
/// with [`ServerBuilder`], wrap it in an `Arc`, and call
/// [`Server::serve_connection`] once per accepted connection (typically
/// from inside a `tokio::spawn`, so one connection's panic or hang cannot
/// affect any other).
pub struct Server<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    handlers: HashMap<String, HandlerEntry<R, W>>,
    config: Config,
    info: Option<Arc<ServerInfo>>,
    shutdown: Notify,
}

impl<R, W> Server<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn builder() -> ServerBuilder<R, W> {
        ServerBuilder::new()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Signal every in-progress and future accept loop bound to this server
    /// to stop; in-flight connections are left to drain on their own.
    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    /// Resolves once [`Server::shutdown`] has been called.
    pub async fn shutdown_requested(&self) {
        self.shutdown.notified().await;
    }

    /// Drive one connection's command loop to completion, with no remote
    /// address recorded in client stats. `read_half`/`write_half` are
    /// typically the two ends of `tokio::io::split` over an accepted
    /// socket.
    pub async fn serve_connection(self: Arc<Self>, read_half: R, write_half: W) {
        self.serve_connection_with_addr(read_half, write_half, String::new())
            .await
    }

    /// Drive one connection's command loop to completion, registering `addr`
    /// in the client stats table (if this server was built `.with_info(..)`)
    /// for the connection's lifetime.
    pub async fn serve_connection_with_addr(
        self: Arc<Self>,
        read_half: R,
        write_half: W,
        addr: String,
    ) {
        let id = next_client_id();
        if let Some(info) = &self.info {
            info.client_connected(id, addr);
        }

        let mut reader = RequestReader::new(read_half);
        let writer: SharedWriter<W> = Arc::new(Mutex::new(RequestWriter::new(write_half)));
        let mut cmd = Command::new();
        let ctx = CancelToken::new();

        loop {
            let peeked = match self.config.idle_timeout {
                Some(d) => match tokio::time::timeout(d, reader.peek_cmd()).await {
                    Ok(r) => r,
                    Err(_) => {
                        tracing::debug!(client = id, "connection idle timed out");
                        break;
                    }
                },
                None => reader.peek_cmd().await,
            };

            let name = match peeked {
                Ok(n) => n,
                Err(e) if e.is_eof() => break,
                Err(e) if e.is_protocol() => {
                    tracing::debug!(client = id, error = %e, "protocol error, closing connection");
                    let mut w = writer.lock().await;
                    w.append_error(&e.to_string());
                    let _ = w.flush().await;
                    break;
                }
                Err(e) => {
                    tracing::debug!(client = id, error = %e, "transport error, closing connection");
                    break;
                }
            };

            let key = name.to_ascii_lowercase();
            let outcome = match self.handlers.get(&key) {
                None => self.dispatch_unknown(&mut reader, &writer, &name).await,
                Some(HandlerEntry::Unary(handler)) => {
                    self.dispatch_unary(&mut reader, &writer, &mut cmd, &ctx, handler.as_ref())
                        .await
                }
                Some(HandlerEntry::Sub(subs)) => {
                    self.dispatch_sub(&mut reader, &writer, &mut cmd, &ctx, &name, subs)
                        .await
                }
                Some(HandlerEntry::Streaming(handler)) => {
                    self.dispatch_stream(&mut reader, &writer, &ctx, handler.as_ref())
                        .await
                }
                Some(HandlerEntry::PubSub(handler)) => {
                    self.dispatch_pubsub(&mut reader, &writer, &mut cmd, &ctx, handler.as_ref())
                        .await
                }
            };

            if let Some(info) = &self.info {
                info.command_processed(id, &name);
            }

            if outcome.is_err() {
                break;
            }
            if writer.lock().await.flush().await.is_err() {
                break;
            }
        }

        if let Some(info) = &self.info {
            info.client_disconnected(id);
        }
    }

    /// Wrap one command read in `self.config.request_timeout`, matching
    /// SPEC_FULL.md §10: "each command read is wrapped in
    /// `tokio::time::timeout`". The idle timeout instead wraps `peek_cmd` in
    /// `serve_connection_with_addr`, so the two never overlap.
    async fn read_with_timeout<T>(
        &self,
        fut: impl std::future::Future<Output = crate::resp::Result<T>>,
    ) -> Result<T, DispatchError> {
        match self.config.request_timeout {
            Some(d) => match tokio::time::timeout(d, fut).await {
                Ok(r) => Ok(r?),
                Err(_) => {
                    tracing::debug!("command read exceeded request timeout");
                    Err(DispatchError::RequestTimeout)
                }
            },
            None => Ok(fut.await?),
        }
    }

    async fn dispatch_unknown(
        &self,
        reader: &mut RequestReader<R>,
        writer: &SharedWriter<W>,
        name: &str,
    ) -> Result<(), DispatchError> {
        self.read_with_timeout(reader.skip_cmd()).await?;
        writer
            .lock()
            .await
            .append_error(&format!("ERR unknown command '{name}'"));
        Ok(())
    }

    async fn dispatch_unary(
        &self,
        reader: &mut RequestReader<R>,
        writer: &SharedWriter<W>,
        cmd: &mut Command,
        ctx: &CancelToken,
        handler: &dyn Handler<R, W>,
    ) -> Result<(), DispatchError> {
        self.read_with_timeout(reader.read_cmd(cmd)).await?;
        cmd.set_context(ctx.clone());
        let mut w = writer.lock().await;
        handler.serve(&mut w, cmd).await;
        Ok(())
    }

    async fn dispatch_sub(
        &self,
        reader: &mut RequestReader<R>,
        writer: &SharedWriter<W>,
        cmd: &mut Command,
        ctx: &CancelToken,
        name: &str,
        subs: &HashMap<String, Arc<dyn Handler<R, W>>>,
    ) -> Result<(), DispatchError> {
        self.read_with_timeout(reader.read_cmd(cmd)).await?;
        let sub_raw = cmd
            .arg(0)
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default();
        let sub_key = sub_raw.to_ascii_lowercase();
        let mut w = writer.lock().await;
        match subs.get(&sub_key) {
            Some(handler) => {
                cmd.set_context(ctx.clone());
                handler.serve(&mut w, cmd).await;
            }
            None => {
                let parent = name.to_ascii_lowercase();
                w.append_error(&format!(
                    "ERR Unknown {parent} subcommand '{sub_raw}'"
                ));
            }
        }
        Ok(())
    }

    async fn dispatch_stream(
        &self,
        reader: &mut RequestReader<R>,
        writer: &SharedWriter<W>,
        ctx: &CancelToken,
        handler: &dyn StreamHandler<R, W>,
    ) -> Result<(), DispatchError> {
        let mut stream = self.read_with_timeout(reader.stream_cmd()).await?;
        stream.set_context(ctx.clone());
        {
            let mut w = writer.lock().await;
            handler.serve_stream(&mut w, &mut stream).await;
        }
        // A streaming handler may return without consuming every argument
        // (e.g. it bailed out early on a malformed length); skip whatever
        // is left so the next command frame is read from the right offset.
        stream.discard().await?;
        Ok(())
    }

    async fn dispatch_pubsub(
        &self,
        reader: &mut RequestReader<R>,
        writer: &SharedWriter<W>,
        cmd: &mut Command,
        ctx: &CancelToken,
        handler: &dyn crate::pubsub::PubSubHandler<W>,
    ) -> Result<(), DispatchError> {
        self.read_with_timeout(reader.read_cmd(cmd)).await?;
        cmd.set_context(ctx.clone());
        handler.serve(writer.clone(), cmd).await;
        Ok(())
    }
}

/// Builds an immutable [`Server`] by registering handlers under command
/// names. Grounded on `example_test.go`'s `NewServer`/`HandleFunc`/
/// `Handle`/`SubCommands` builder surface.
pub struct ServerBuilder<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    handlers: HashMap<String, HandlerEntry<R, W>>,
    config: Config,
    info: Option<Arc<ServerInfo>>,
}

impl<R, W> ServerBuilder<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            config: Config::default(),
            info: None,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Wire a [`ServerInfo`] so the dispatch loop records per-client connect/
    /// disconnect and last-command stats into it automatically (used by the
    /// built-in `info_handler`'s `Clients`/`Stats` sections).
    pub fn with_info(mut self, info: Arc<ServerInfo>) -> Self {
        self.info = Some(info);
        self
    }

    pub fn handle(mut self, name: &str, handler: Arc<dyn Handler<R, W>>) -> Self {
        self.handlers
            .insert(name.to_ascii_lowercase(), HandlerEntry::Unary(handler));
        self
    }

    pub fn handle_stream(mut self, name: &str, handler: Arc<dyn StreamHandler<R, W>>) -> Self {
        self.handlers
            .insert(name.to_ascii_lowercase(), HandlerEntry::Streaming(handler));
        self
    }

    pub fn handle_sub(mut self, name: &str, subs: HashMap<String, Arc<dyn Handler<R, W>>>) -> Self {
        let subs = subs
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        self.handlers
            .insert(name.to_ascii_lowercase(), HandlerEntry::Sub(subs));
        self
    }

    /// Register a handler that needs the session's shared writer (currently
    /// only `SUBSCRIBE`, via `pubsub::subscribe_handler`/`publish_handler`).
    pub fn handle_pubsub(
        mut self,
        name: &str,
        handler: Arc<dyn crate::pubsub::PubSubHandler<W>>,
    ) -> Self {
        self.handlers
            .insert(name.to_ascii_lowercase(), HandlerEntry::PubSub(handler));
        self
    }

    pub fn build(self) -> Arc<Server<R, W>> {
        Arc::new(Server {
            handlers: self.handlers,
            config: self.config,
            info: self.info,
            shutdown: Notify::new(),
        })
    }
}

impl<R, W> Default for ServerBuilder<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// TCP-specific accept loop, available when a server's halves are exactly
/// the split halves of a `TcpStream`. Grounded on `main.rs::accept_loop`
/// (spawn-per-connection, `tracing::info!` on accept) combined with
/// `Server::shutdown`/`shutdown_requested` for graceful stop
/// (`shutdown_signal`'s select-on-ctrl_c idiom).
impl Server<tokio::net::tcp::OwnedReadHalf, tokio::net::tcp::OwnedWriteHalf> {
    /// Bind `addr` and serve accepted TCP connections until `shutdown()` is
    /// called. Each connection is driven on its own spawned task so one
    /// connection's panic or hang never affects another.
    pub async fn bind_tcp(
        self: Arc<Self>,
        addr: impl tokio::net::ToSocketAddrs,
    ) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (socket, peer) = accepted?;
                    if self.config().tcp_nodelay {
                        let _ = socket.set_nodelay(true);
                    }
                    if let Some(period) = self.config().tcp_keepalive {
                        let sock_ref = socket2::SockRef::from(&socket);
                        let params = socket2::TcpKeepalive::new().with_time(period);
                        let _ = sock_ref.set_tcp_keepalive(&params);
                    }
                    let server = self.clone();
                    tracing::info!(client = %peer, "accepted connection");
                    let (read_half, write_half) = socket.into_split();
                    tokio::spawn(async move {
                        server
                            .serve_connection_with_addr(read_half, write_half, peer.to_string())
                            .await;
                    });
                }
                _ = self.shutdown_requested() => {
                    tracing::info!("shutdown requested, no longer accepting connections");
                    return Ok(());
                }
            }
        }
    }
}

/// Unix-domain-socket accept loop, mirroring [`Server::bind_tcp`] for
/// `UnixListener`.
#[cfg(unix)]
impl Server<tokio::net::unix::OwnedReadHalf, tokio::net::unix::OwnedWriteHalf> {
    pub async fn bind_unix(self: Arc<Self>, path: impl AsRef<std::path::Path>) -> std::io::Result<()> {
        let listener = tokio::net::UnixListener::bind(path)?;
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (socket, _addr) = accepted?;
                    let server = self.clone();
                    let (read_half, write_half) = socket.into_split();
                    tokio::spawn(async move {
                        server
                            .serve_connection_with_addr(read_half, write_half, String::new())
                            .await;
                    });
                }
                _ = self.shutdown_requested() => {
                    tracing::info!("shutdown requested, no longer accepting connections");
                    return Ok(());
                }
            }
        }
    }
}
