//! `redeo-rs`: a server-side framework for implementing RESP-speaking
//! services — command parsing, reply encoding, dispatch, and a handful of
//! built-ins (`PING`, `ECHO`, `INFO`, `COMMAND`, `SUBSCRIBE`/`PUBLISH`),
//! grounded in the same shape as `bsm/redeo` but expressed with Rust's own
//! idioms (typed errors, `async-trait` handlers, an explicit cancellation
//! token) rather than a transliteration of its reflection-driven API.

mod cancel;
pub mod info;
pub mod pubsub;
pub mod resp;
pub mod server;

pub use cancel::CancelToken;
