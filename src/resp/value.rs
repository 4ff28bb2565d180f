//! `ToResp`: the static replacement for the original's reflection-driven
//! `Append(interface{})`. Each reply-capable Rust type writes itself through
//! the buffered [`Writer`] directly, so there is no runtime type switch.

use std::collections::{BTreeMap, HashMap};

use tokio::io::AsyncWrite;

use super::error::Result;
use super::writer::Writer;

/// A value that can be written as a RESP reply.
pub trait ToResp {
    fn to_resp<W: AsyncWrite + Unpin + Send>(
        &self,
        w: &mut Writer<W>,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

impl ToResp for () {
    async fn to_resp<W: AsyncWrite + Unpin + Send>(&self, w: &mut Writer<W>) -> Result<()> {
        w.append_ok();
        Ok(())
    }
}

impl<T: ToResp + Sync> ToResp for Option<T> {
    async fn to_resp<W: AsyncWrite + Unpin + Send>(&self, w: &mut Writer<W>) -> Result<()> {
        match self {
            Some(v) => v.to_resp(w).await,
            None => {
                w.append_nil();
                Ok(())
            }
        }
    }
}

impl ToResp for bool {
    async fn to_resp<W: AsyncWrite + Unpin + Send>(&self, w: &mut Writer<W>) -> Result<()> {
        w.append_int(if *self { 1 } else { 0 });
        Ok(())
    }
}

macro_rules! impl_to_resp_int {
    ($($t:ty),*) => {
        $(
            impl ToResp for $t {
                async fn to_resp<W: AsyncWrite + Unpin + Send>(&self, w: &mut Writer<W>) -> Result<()> {
                    w.append_int(*self as i64);
                    Ok(())
                }
            }
        )*
    };
}

impl_to_resp_int!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl ToResp for f32 {
    async fn to_resp<W: AsyncWrite + Unpin + Send>(&self, w: &mut Writer<W>) -> Result<()> {
        // Rust's `Display` for floats is already shortest-round-trip decimal
        // notation (never scientific), matching Go's `FormatFloat(_, 'f', -1, _)`.
        w.append_inline_string(&self.to_string());
        Ok(())
    }
}

impl ToResp for f64 {
    async fn to_resp<W: AsyncWrite + Unpin + Send>(&self, w: &mut Writer<W>) -> Result<()> {
        w.append_inline_string(&self.to_string());
        Ok(())
    }
}

impl ToResp for str {
    async fn to_resp<W: AsyncWrite + Unpin + Send>(&self, w: &mut Writer<W>) -> Result<()> {
        w.append_bulk_string(self);
        Ok(())
    }
}

impl ToResp for String {
    async fn to_resp<W: AsyncWrite + Unpin + Send>(&self, w: &mut Writer<W>) -> Result<()> {
        w.append_bulk_string(self);
        Ok(())
    }
}

impl ToResp for [u8] {
    async fn to_resp<W: AsyncWrite + Unpin + Send>(&self, w: &mut Writer<W>) -> Result<()> {
        w.append_bulk(self);
        Ok(())
    }
}

impl ToResp for Vec<u8> {
    async fn to_resp<W: AsyncWrite + Unpin + Send>(&self, w: &mut Writer<W>) -> Result<()> {
        w.append_bulk(self);
        Ok(())
    }
}

impl ToResp for bytes::Bytes {
    async fn to_resp<W: AsyncWrite + Unpin + Send>(&self, w: &mut Writer<W>) -> Result<()> {
        w.append_bulk(self);
        Ok(())
    }
}

impl<T: ToResp + Sync> ToResp for Vec<T> {
    async fn to_resp<W: AsyncWrite + Unpin + Send>(&self, w: &mut Writer<W>) -> Result<()> {
        w.append_array_len(self.len());
        for item in self {
            item.to_resp(w).await?;
        }
        Ok(())
    }
}

impl<T: ToResp + Sync> ToResp for &[T] {
    async fn to_resp<W: AsyncWrite + Unpin + Send>(&self, w: &mut Writer<W>) -> Result<()> {
        w.append_array_len(self.len());
        for item in self.iter() {
            item.to_resp(w).await?;
        }
        Ok(())
    }
}

/// Maps are rendered flattened as an alternating key/value array, matching
/// how Redis encodes e.g. `HGETALL` replies over RESP2.
impl<K: AsRef<str> + Sync, V: ToResp + Sync> ToResp for HashMap<K, V> {
    async fn to_resp<W: AsyncWrite + Unpin + Send>(&self, w: &mut Writer<W>) -> Result<()> {
        w.append_array_len(self.len() * 2);
        for (k, v) in self {
            w.append_bulk_string(k.as_ref());
            v.to_resp(w).await?;
        }
        Ok(())
    }
}

impl<K: AsRef<str> + Sync, V: ToResp + Sync> ToResp for BTreeMap<K, V> {
    async fn to_resp<W: AsyncWrite + Unpin + Send>(&self, w: &mut Writer<W>) -> Result<()> {
        w.append_array_len(self.len() * 2);
        for (k, v) in self {
            w.append_bulk_string(k.as_ref());
            v.to_resp(w).await?;
        }
        Ok(())
    }
}

/// An application-level error: a handler's typed reply path can return
/// `Result<T, AppError>` and have the `Err` variant rendered as a RESP
/// error reply instead of propagating up through the dispatcher.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct AppError(pub String);

impl AppError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// The message as it should appear after the `-` on the wire: `ERR ` is
    /// prepended unless the message already starts with it.
    pub fn with_err_prefix(&self) -> String {
        if self.0.starts_with("ERR ") {
            self.0.clone()
        } else {
            format!("ERR {}", self.0)
        }
    }
}

impl<T: ToResp + Sync> ToResp for std::result::Result<T, AppError> {
    async fn to_resp<W: AsyncWrite + Unpin + Send>(&self, w: &mut Writer<W>) -> Result<()> {
        match self {
            Ok(v) => v.to_resp(w).await,
            Err(e) => {
                w.append_error(&e.with_err_prefix());
                Ok(())
            }
        }
    }
}
