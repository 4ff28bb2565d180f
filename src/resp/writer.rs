use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::error::Result;

const CRLF: &[u8] = b"\r\n";
const NIL: &[u8] = b"$-1\r\n";
const OK: &[u8] = b"+OK\r\n";
const INT_ZERO: &[u8] = b":0\r\n";
const INT_ONE: &[u8] = b":1\r\n";

/// Buffered writer over an async byte stream. Replies accumulate in `buf`
/// until `flush` sends them and resets the buffer's length (capacity is
/// retained across commands, same as the reader's buffer).
pub struct Writer<W> {
    inner: W,
    buf: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> Writer<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(super::reader::DEFAULT_BUFFER_SIZE),
        }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Borrow the underlying sink, e.g. to inspect bytes already flushed to
    /// an in-memory `Vec<u8>` in tests.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Number of bytes currently buffered, awaiting flush.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn append_ok(&mut self) {
        self.buf.extend_from_slice(OK);
    }

    pub fn append_nil(&mut self) {
        self.buf.extend_from_slice(NIL);
    }

    pub fn append_int(&mut self, n: i64) {
        match n {
            0 => self.buf.extend_from_slice(INT_ZERO),
            1 => self.buf.extend_from_slice(INT_ONE),
            _ => {
                self.buf.push(b':');
                self.buf.extend_from_slice(n.to_string().as_bytes());
                self.buf.extend_from_slice(CRLF);
            }
        }
    }

    pub fn append_inline_string(&mut self, s: &str) {
        self.buf.push(b'+');
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.extend_from_slice(CRLF);
    }

    pub fn append_error(&mut self, msg: &str) {
        self.buf.push(b'-');
        self.buf.extend_from_slice(msg.as_bytes());
        self.buf.extend_from_slice(CRLF);
    }

    pub fn append_bulk(&mut self, data: &[u8]) {
        self.buf.push(b'$');
        self.buf
            .extend_from_slice(data.len().to_string().as_bytes());
        self.buf.extend_from_slice(CRLF);
        self.buf.extend_from_slice(data);
        self.buf.extend_from_slice(CRLF);
    }

    pub fn append_bulk_string(&mut self, s: &str) {
        self.append_bulk(s.as_bytes());
    }

    pub fn append_array_len(&mut self, n: usize) {
        self.buf.push(b'*');
        self.buf.extend_from_slice(n.to_string().as_bytes());
        self.buf.extend_from_slice(CRLF);
    }

    /// Write a bulk header `$n\r\n`, then either buffer `n` bytes copied
    /// from `src` (if they fit in the remaining buffered capacity) or flush
    /// and copy directly from `src` to the sink, bypassing the buffer —
    /// mirroring the original's flush-or-bypass `CopyBulk`.
    pub async fn copy_bulk<R: AsyncRead + Unpin>(
        &mut self,
        src: &mut R,
        n: u64,
    ) -> Result<()> {
        self.buf.push(b'$');
        self.buf.extend_from_slice(n.to_string().as_bytes());
        self.buf.extend_from_slice(CRLF);

        let n = n as usize;
        if self.buf.capacity() - self.buf.len() >= n + 2 {
            let start = self.buf.len();
            self.buf.resize(start + n, 0);
            let mut reader = src.take(n as u64);
            let mut off = start;
            loop {
                let read = reader.read(&mut self.buf[off..start + n]).await?;
                if read == 0 {
                    break;
                }
                off += read;
                if off == start + n {
                    break;
                }
            }
            self.buf.extend_from_slice(CRLF);
        } else {
            self.flush().await?;
            let mut remaining = n as u64;
            let mut chunk = [0u8; 8192];
            while remaining > 0 {
                let want = remaining.min(chunk.len() as u64) as usize;
                let read = src.read(&mut chunk[..want]).await?;
                if read == 0 {
                    break;
                }
                self.inner.write_all(&chunk[..read]).await?;
                remaining -= read as u64;
            }
            self.inner.write_all(CRLF).await?;
        }
        Ok(())
    }

    /// Flush the accumulated reply bytes to the underlying sink. Buffer
    /// length resets to zero; capacity is retained for the next command.
    pub async fn flush(&mut self) -> Result<()> {
        if !self.buf.is_empty() {
            self.inner.write_all(&self.buf).await?;
            self.buf.clear();
        }
        self.inner.flush().await?;
        Ok(())
    }
}
