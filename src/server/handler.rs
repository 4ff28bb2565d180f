//! Handler shapes. Grounded on `example_test.go`'s `HandleFunc`/`Handle`/
//! `WrapperFunc`/`SubCommands` surface: a plain unary handler gets a
//! fully-read `Command`, a streaming handler gets a `CommandStream` so it
//! can read a large argument incrementally, and typed handlers are sugar
//! over a unary handler that writes a `ToResp` return value.
//!
//! The original dispatches via reflection over a registered function's
//! signature; here each shape is a distinct trait, made dyn-safe with
//! `async-trait` so the registry can hold them behind `Arc<dyn _>`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::pubsub::PubSubHandler;
use crate::resp::{Command, CommandStream, RequestWriter as ReqWriter, ToResp};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A handler that receives a fully-materialized command.
#[async_trait]
pub trait Handler<R, W>: Send + Sync
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn serve(&self, w: &mut ReqWriter<W>, cmd: &mut Command);
}

/// A handler that receives a command whose arguments haven't been read yet,
/// for streaming a large payload without buffering it whole.
#[async_trait]
pub trait StreamHandler<R, W>: Send + Sync
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn serve_stream<'r>(&self, w: &mut ReqWriter<W>, cmd: &mut CommandStream<'r, R>);
}

/// Wraps a boxed-future closure as a [`Handler`] — the functional-handler
/// registration path (`ServerBuilder::handle_func`).
pub struct HandlerFn<F>(pub F);

#[async_trait]
impl<R, W, F> Handler<R, W> for HandlerFn<F>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
    F: for<'a> Fn(&'a mut ReqWriter<W>, &'a mut Command) -> BoxFuture<'a, ()> + Send + Sync,
{
    async fn serve(&self, w: &mut ReqWriter<W>, cmd: &mut Command) {
        (self.0)(w, cmd).await
    }
}

/// Wraps a closure returning a `ToResp` value as a [`Handler`] — the typed
/// sugar path (`ServerBuilder::handle_typed`). The closure synchronously
/// borrows the command to extract whatever it needs before returning its
/// future, so the future itself owns no borrow of `cmd`.
pub struct TypedFn<F>(pub F);

#[async_trait]
impl<R, W, F, Fut, T> Handler<R, W> for TypedFn<F>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
    F: Fn(&Command) -> Fut + Send + Sync,
    Fut: Future<Output = T> + Send,
    T: ToResp + Send + Sync,
{
    async fn serve(&self, w: &mut ReqWriter<W>, cmd: &mut Command) {
        let result = (self.0)(cmd).await;
        let _ = result.to_resp(w).await;
    }
}

/// Wraps a boxed-future closure as a [`StreamHandler`].
pub struct StreamHandlerFn<F>(pub F);

#[async_trait]
impl<R, W, F> StreamHandler<R, W> for StreamHandlerFn<F>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
    F: for<'a> Fn(&'a mut ReqWriter<W>, &'a mut CommandStream<'a, R>) -> BoxFuture<'a, ()>
        + Send
        + Sync,
{
    async fn serve_stream<'r>(&self, w: &mut ReqWriter<W>, cmd: &mut CommandStream<'r, R>) {
        (self.0)(w, cmd).await
    }
}

/// One entry in the handler registry: a leaf (unary or streaming handler)
/// or a sub-command table dispatched on the command's first argument
/// (e.g. `CONFIG GET`/`CONFIG SET`).
pub enum HandlerEntry<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    Unary(Arc<dyn Handler<R, W>>),
    Streaming(Arc<dyn StreamHandler<R, W>>),
    Sub(HashMap<String, Arc<dyn Handler<R, W>>>),
    /// A handler that needs the session's shared writer rather than a
    /// per-call borrow, because it may keep writing after it returns
    /// (`SUBSCRIBE`'s drain task). See `pubsub::PubSubHandler`.
    PubSub(Arc<dyn PubSubHandler<W>>),
}

pub(crate) fn lowercase_name(name: &[u8]) -> String {
    String::from_utf8_lossy(name).to_ascii_lowercase()
}
