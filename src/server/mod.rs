//! The command dispatcher: a handler registry keyed by command name, a
//! per-connection read/dispatch/write loop, and a handful of built-in
//! handlers (`PING`, `ECHO`, `INFO`, `COMMAND`) every server wires up.

mod builtins;
mod config;
mod dispatch;
mod error;
mod handler;

pub use builtins::{CommandDescription, command_handler, echo_handler, info_handler, ping_handler};
pub use config::Config;
pub use dispatch::{Server, ServerBuilder};
pub use error::DispatchError;
pub use handler::{
    BoxFuture, Handler, HandlerEntry, HandlerFn, StreamHandler, StreamHandlerFn, TypedFn,
};
