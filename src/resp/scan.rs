//! `FromResp`: converts a reply frame read from a [`Reader`] into a typed
//! Rust value, for client-side (`ResponseReader`) use. The static
//! counterpart of the original's `Scan(&dst)` switch over the destination's
//! reflected kind.

use tokio::io::AsyncRead;

use super::error::Error;
use super::reader::{FrameType, Reader};

/// Failure to convert a reply frame into the requested destination type.
/// Distinct from [`super::error::Error`] because it layers on top of a
/// successfully-read frame — the bytes were valid RESP, just not the shape
/// the caller asked for.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("resp: server returned error: {0}")]
    Server(String),
    #[error("resp: reply was nil")]
    Nil,
    #[error("resp: cannot scan {frame:?} reply into requested type")]
    TypeMismatch { frame: FrameType },
    #[error(transparent)]
    Io(#[from] Error),
    #[error("resp: invalid integer reply: {0}")]
    InvalidInt(#[from] std::num::ParseIntError),
    #[error("resp: invalid float reply: {0}")]
    InvalidFloat(#[from] std::num::ParseFloatError),
    #[error("resp: invalid bool reply: {0:?}")]
    InvalidBool(String),
}

pub type ScanResult<T> = std::result::Result<T, ScanError>;

/// A type that can be parsed out of the next reply frame on a [`Reader`].
pub trait FromResp: Sized {
    fn from_resp<R: AsyncRead + Unpin + Send>(
        r: &mut Reader<R>,
    ) -> impl std::future::Future<Output = ScanResult<Self>> + Send;
}

async fn read_error_if_any<R: AsyncRead + Unpin + Send>(
    r: &mut Reader<R>,
) -> ScanResult<Option<FrameType>> {
    let ty = r.peek_type().await.map_err(ScanError::Io)?;
    if ty == FrameType::Error {
        let msg = r.read_error().await.map_err(ScanError::Io)?;
        return Err(ScanError::Server(msg));
    }
    Ok(Some(ty))
}

impl FromResp for () {
    async fn from_resp<R: AsyncRead + Unpin + Send>(r: &mut Reader<R>) -> ScanResult<Self> {
        match read_error_if_any(r).await?.unwrap() {
            FrameType::Inline => {
                r.read_inline().await.map_err(ScanError::Io)?;
                Ok(())
            }
            FrameType::Nil => {
                r.read_nil().await.map_err(ScanError::Io)?;
                Ok(())
            }
            frame => Err(ScanError::TypeMismatch { frame }),
        }
    }
}

impl<T: FromResp + Send> FromResp for Option<T> {
    async fn from_resp<R: AsyncRead + Unpin + Send>(r: &mut Reader<R>) -> ScanResult<Self> {
        let ty = read_error_if_any(r).await?.unwrap();
        if ty == FrameType::Nil {
            r.read_nil().await.map_err(ScanError::Io)?;
            return Ok(None);
        }
        Ok(Some(T::from_resp(r).await?))
    }
}

impl FromResp for i64 {
    async fn from_resp<R: AsyncRead + Unpin + Send>(r: &mut Reader<R>) -> ScanResult<Self> {
        match read_error_if_any(r).await?.unwrap() {
            FrameType::Int => r.read_int().await.map_err(ScanError::Io),
            FrameType::Bulk => {
                let len = r.read_bulk_len().await.map_err(ScanError::Io)?;
                let s = r.read_bulk_string(len).await.map_err(ScanError::Io)?;
                Ok(s.trim().parse::<i64>()?)
            }
            FrameType::Inline => {
                let s = r.read_inline().await.map_err(ScanError::Io)?;
                Ok(s.trim().parse::<i64>()?)
            }
            FrameType::Nil => Err(ScanError::Nil),
            frame => Err(ScanError::TypeMismatch { frame }),
        }
    }
}

impl FromResp for f64 {
    async fn from_resp<R: AsyncRead + Unpin + Send>(r: &mut Reader<R>) -> ScanResult<Self> {
        match read_error_if_any(r).await?.unwrap() {
            FrameType::Bulk => {
                let len = r.read_bulk_len().await.map_err(ScanError::Io)?;
                let s = r.read_bulk_string(len).await.map_err(ScanError::Io)?;
                Ok(s.trim().parse::<f64>()?)
            }
            FrameType::Inline => {
                let s = r.read_inline().await.map_err(ScanError::Io)?;
                Ok(s.trim().parse::<f64>()?)
            }
            FrameType::Int => Ok(r.read_int().await.map_err(ScanError::Io)? as f64),
            FrameType::Nil => Err(ScanError::Nil),
            frame => Err(ScanError::TypeMismatch { frame }),
        }
    }
}

/// Matches the original's `scanString`'s `*bool` case: `"1"`/`"0"` and a
/// case-insensitive `"OK"` (the reply to commands like `SET`) convert, with
/// only `"0"` mapping to `false`. Anything else is not a bool.
fn parse_bool_string(s: &str) -> ScanResult<bool> {
    if s == "1" || s == "0" || s.eq_ignore_ascii_case("OK") {
        Ok(s != "0")
    } else {
        Err(ScanError::InvalidBool(s.to_string()))
    }
}

impl FromResp for bool {
    async fn from_resp<R: AsyncRead + Unpin + Send>(r: &mut Reader<R>) -> ScanResult<Self> {
        match read_error_if_any(r).await?.unwrap() {
            FrameType::Int => match r.read_int().await.map_err(ScanError::Io)? {
                0 => Ok(false),
                1 => Ok(true),
                n => Err(ScanError::InvalidBool(n.to_string())),
            },
            FrameType::Inline => {
                let s = r.read_inline().await.map_err(ScanError::Io)?;
                parse_bool_string(&s)
            }
            FrameType::Bulk => {
                let len = r.read_bulk_len().await.map_err(ScanError::Io)?;
                let s = r.read_bulk_string(len).await.map_err(ScanError::Io)?;
                parse_bool_string(&s)
            }
            FrameType::Nil => Err(ScanError::Nil),
            frame => Err(ScanError::TypeMismatch { frame }),
        }
    }
}

impl FromResp for String {
    async fn from_resp<R: AsyncRead + Unpin + Send>(r: &mut Reader<R>) -> ScanResult<Self> {
        match read_error_if_any(r).await?.unwrap() {
            FrameType::Bulk => {
                let len = r.read_bulk_len().await.map_err(ScanError::Io)?;
                r.read_bulk_string(len).await.map_err(ScanError::Io)
            }
            FrameType::Inline => r.read_inline().await.map_err(ScanError::Io),
            FrameType::Int => Ok(r.read_int().await.map_err(ScanError::Io)?.to_string()),
            FrameType::Nil => Err(ScanError::Nil),
            frame => Err(ScanError::TypeMismatch { frame }),
        }
    }
}

impl FromResp for Vec<u8> {
    async fn from_resp<R: AsyncRead + Unpin + Send>(r: &mut Reader<R>) -> ScanResult<Self> {
        match read_error_if_any(r).await?.unwrap() {
            FrameType::Bulk => {
                let len = r.read_bulk_len().await.map_err(ScanError::Io)?;
                let mut out = Vec::with_capacity(len);
                r.read_bulk(len, &mut out).await.map_err(ScanError::Io)?;
                Ok(out)
            }
            FrameType::Nil => {
                r.read_nil().await.map_err(ScanError::Io)?;
                Ok(Vec::new())
            }
            frame => Err(ScanError::TypeMismatch { frame }),
        }
    }
}

impl<T: FromResp + Send> FromResp for Vec<T> {
    async fn from_resp<R: AsyncRead + Unpin + Send>(r: &mut Reader<R>) -> ScanResult<Self> {
        match read_error_if_any(r).await?.unwrap() {
            FrameType::Array => {
                let n = r.read_array_len().await.map_err(ScanError::Io)?;
                let n = if n < 0 { 0 } else { n as usize };
                let mut out = Vec::with_capacity(n);
                for _ in 0..n {
                    out.push(T::from_resp(r).await?);
                }
                Ok(out)
            }
            FrameType::Nil => {
                r.read_nil().await.map_err(ScanError::Io)?;
                Ok(Vec::new())
            }
            frame => Err(ScanError::TypeMismatch { frame }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resp::writer::Writer;

    async fn roundtrip_bytes() -> Vec<u8> {
        let mut w = Writer::new(Vec::new());
        w.append_bulk_string("hello");
        w.flush().await.unwrap();
        w.into_inner()
    }

    #[tokio::test]
    async fn scans_bulk_string() {
        let bytes = roundtrip_bytes().await;
        let mut r = Reader::new(std::io::Cursor::new(bytes));
        let s = String::from_resp(&mut r).await.unwrap();
        assert_eq!(s, "hello");
    }

    #[tokio::test]
    async fn scans_server_error_as_scan_error() {
        let mut r = Reader::new(std::io::Cursor::new(b"-ERR boom\r\n".to_vec()));
        let err = String::from_resp(&mut r).await.unwrap_err();
        match err {
            ScanError::Server(msg) => assert_eq!(msg, "ERR boom"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn scans_nil_into_option() {
        let mut r = Reader::new(std::io::Cursor::new(b"$-1\r\n".to_vec()));
        let v: Option<String> = Option::from_resp(&mut r).await.unwrap();
        assert_eq!(v, None);
    }

    #[tokio::test]
    async fn scans_inline_reply_as_int_and_float() {
        let mut r = Reader::new(std::io::Cursor::new(b"+123\r\n".to_vec()));
        assert_eq!(i64::from_resp(&mut r).await.unwrap(), 123);

        let mut r = Reader::new(std::io::Cursor::new(b"+1.5\r\n".to_vec()));
        assert_eq!(f64::from_resp(&mut r).await.unwrap(), 1.5);
    }

    #[tokio::test]
    async fn scans_bool_from_int_and_ok_status() {
        let mut r = Reader::new(std::io::Cursor::new(b":0\r\n".to_vec()));
        assert!(!bool::from_resp(&mut r).await.unwrap());

        let mut r = Reader::new(std::io::Cursor::new(b":1\r\n".to_vec()));
        assert!(bool::from_resp(&mut r).await.unwrap());

        let mut r = Reader::new(std::io::Cursor::new(b"+OK\r\n".to_vec()));
        assert!(bool::from_resp(&mut r).await.unwrap());

        let mut r = Reader::new(std::io::Cursor::new(b":2\r\n".to_vec()));
        assert!(matches!(
            bool::from_resp(&mut r).await.unwrap_err(),
            ScanError::InvalidBool(_)
        ));
    }

    #[tokio::test]
    async fn scans_nil_into_empty_byte_vec() {
        let mut r = Reader::new(std::io::Cursor::new(b"$-1\r\n".to_vec()));
        let v = Vec::<u8>::from_resp(&mut r).await.unwrap();
        assert_eq!(v, Vec::<u8>::new());
    }
}
