use tokio::io::{AsyncRead, AsyncReadExt};

use super::error::{Error, ProtocolError, Result};

/// Default buffer size, matching the original's `MaxBufferSize`. Oversize
/// bulk payloads grow the buffer once rather than failing.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// The shape of the next frame, as determined by its leading byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Array,
    Bulk,
    Nil,
    Inline,
    Error,
    Int,
}

/// Buffered reader over an async byte stream, implementing the RESP read
/// primitives. Owns a single reusable buffer with read cursor `r` and write
/// cursor `w`: `buf[r..w]` is unread data, `buf[w..]` is free space.
pub struct Reader<R> {
    inner: R,
    buf: Vec<u8>,
    r: usize,
    w: usize,
}

impl<R: AsyncRead + Unpin> Reader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_capacity(inner, DEFAULT_BUFFER_SIZE)
    }

    pub fn with_capacity(inner: R, capacity: usize) -> Self {
        Self {
            inner,
            buf: vec![0u8; capacity],
            r: 0,
            w: 0,
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn unread(&self) -> usize {
        self.w - self.r
    }

    /// True once every buffered byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.r == self.w
    }

    /// Number of unread, already-buffered bytes.
    pub fn buffered(&self) -> usize {
        self.unread()
    }

    fn compact(&mut self) {
        if self.r > 0 {
            self.buf.copy_within(self.r..self.w, 0);
            self.w -= self.r;
            self.r = 0;
        }
    }

    /// Ensure `buf` can hold `need` unread bytes after compaction, growing
    /// (doubling, or to exactly `need` if larger) when the current capacity
    /// is insufficient. This is the one-shot growth path for oversize bulks.
    fn ensure_capacity(&mut self, need: usize) {
        self.compact();
        if self.buf.len() < need {
            let new_len = need.max(self.buf.len() * 2);
            self.buf.resize(new_len, 0);
        }
    }

    /// Guarantee at least `need` unread bytes are buffered, reading from the
    /// underlying stream (and growing the buffer if necessary) until so.
    async fn require(&mut self, need: usize) -> Result<()> {
        loop {
            if self.unread() >= need {
                return Ok(());
            }
            self.ensure_capacity(need);
            let n = self.inner.read(&mut self.buf[self.w..]).await?;
            if n == 0 {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "eof",
                )));
            }
            self.w += n;
        }
    }

    fn consume(&mut self, n: usize) {
        self.r += n;
    }

    /// Peek the first byte of the next frame without consuming it.
    pub async fn peek_byte(&mut self) -> Result<u8> {
        self.require(1).await?;
        Ok(self.buf[self.r])
    }

    /// Peek the type of the next frame without consuming anything.
    pub async fn peek_type(&mut self) -> Result<FrameType> {
        self.require(1).await?;
        Ok(match self.buf[self.r] {
            b'*' => FrameType::Array,
            b'$' => {
                // Distinguish `$-1\r\n` (nil) from a real bulk header by peeking
                // the next byte once it's available.
                self.require(2).await?;
                if self.buf[self.r + 1] == b'-' {
                    FrameType::Nil
                } else {
                    FrameType::Bulk
                }
            }
            b'-' => FrameType::Error,
            b':' => FrameType::Int,
            _ => FrameType::Inline,
        })
    }

    /// Peek the next line (up to and including `\n`) starting `offset` bytes
    /// past the read cursor, without consuming anything. The returned bytes
    /// include the trailing `\n` (and a `\r` before it, if present) so a
    /// caller chaining calls at growing offsets can add the raw length to
    /// its running offset. Lines that would exceed buffer capacity fail with
    /// `TooBigInlineRequest` rather than growing indefinitely — unlike bulk
    /// payloads, inline frames are bounded by the configured buffer size.
    pub async fn peek_line(&mut self, offset: usize) -> Result<Vec<u8>> {
        loop {
            let start = self.r + offset;
            if start <= self.w {
                if let Some(pos) = memchr(b'\n', &self.buf[start..self.w]) {
                    return Ok(self.buf[start..start + pos + 1].to_vec());
                }
            }
            if self.w == self.buf.len() {
                if self.r == 0 {
                    return Err(ProtocolError::TooBigInlineRequest.into());
                }
                self.compact();
                continue;
            }
            let n = self.inner.read(&mut self.buf[self.w..]).await?;
            if n == 0 {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "eof",
                )));
            }
            self.w += n;
        }
    }

    /// Peek exactly `n` bytes starting `offset` bytes past the read cursor,
    /// without consuming anything and without requiring a line terminator —
    /// used to look ahead at a bulk argument's raw content (e.g. a pipelined
    /// command's name) before deciding whether to read it.
    pub async fn peek_n(&mut self, offset: usize, n: usize) -> Result<Vec<u8>> {
        self.require(offset + n).await?;
        Ok(self.buf[self.r + offset..self.r + offset + n].to_vec())
    }

    /// Read one line (up to and including `\n`), trimming the trailing
    /// `\r\n` (or bare `\n`), and consuming it.
    pub async fn read_line(&mut self) -> Result<Vec<u8>> {
        let raw = self.peek_line(0).await?;
        self.consume(raw.len());
        let mut trimmed = raw.len();
        while trimmed > 0 && matches!(raw[trimmed - 1], b'\r' | b'\n') {
            trimmed -= 1;
        }
        Ok(raw[..trimmed].to_vec())
    }

    fn parse_prefixed_line(line: &[u8], prefix: u8) -> Result<&[u8]> {
        if line.first() != Some(&prefix) {
            let actual = line.first().map(|&b| b as char).unwrap_or('\0');
            return Err(ProtocolError::UnexpectedByte {
                expected: prefix as char,
                actual,
            }
            .into());
        }
        Ok(&line[1..])
    }

    fn parse_i64(digits: &[u8], err: ProtocolError) -> Result<i64> {
        std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| err.into())
    }

    /// `:N\r\n` — a signed integer reply/argument.
    pub async fn read_int(&mut self) -> Result<i64> {
        let line = self.read_line().await?;
        let digits = Self::parse_prefixed_line(&line, b':')?;
        Self::parse_i64(digits, ProtocolError::ExpectedInteger)
    }

    /// `-msg\r\n` — an error reply's message.
    pub async fn read_error(&mut self) -> Result<String> {
        let line = self.read_line().await?;
        let msg = Self::parse_prefixed_line(&line, b'-')?;
        Ok(String::from_utf8_lossy(msg).into_owned())
    }

    /// `+msg\r\n` — a simple-string/inline reply.
    pub async fn read_inline(&mut self) -> Result<String> {
        let line = self.read_line().await?;
        let msg = Self::parse_prefixed_line(&line, b'+')?;
        Ok(String::from_utf8_lossy(msg).into_owned())
    }

    /// `$-1\r\n` — consume a nil bulk header.
    pub async fn read_nil(&mut self) -> Result<()> {
        let line = self.read_line().await?;
        let rest = Self::parse_prefixed_line(&line, b'$')?;
        if rest == b"-1" {
            Ok(())
        } else {
            Err(ProtocolError::ExpectedNil.into())
        }
    }

    /// `*N\r\n` — an array header. `N < 0` is a protocol error; a `0` count
    /// is valid (an empty request) and left for callers to treat as "no
    /// command here" (see `resp::command::parse_command`).
    pub async fn read_array_len(&mut self) -> Result<i64> {
        let line = self.read_line().await?;
        let digits = Self::parse_prefixed_line(&line, b'*')?;
        let n = Self::parse_i64(digits, ProtocolError::InvalidMultibulkLength)?;
        if n < 0 {
            return Err(ProtocolError::InvalidMultibulkLength.into());
        }
        Ok(n)
    }

    /// `$L\r\n` — a bulk length header. Negative lengths are protocol
    /// errors here; nil bulks must be detected via `peek_type` first.
    pub async fn read_bulk_len(&mut self) -> Result<usize> {
        let line = self.read_line().await?;
        let digits = Self::parse_prefixed_line(&line, b'$')?;
        let n = Self::parse_i64(digits, ProtocolError::InvalidBulkLength)?;
        if n < 0 {
            return Err(ProtocolError::InvalidBulkLength.into());
        }
        Ok(n as usize)
    }

    /// Read exactly `len` payload bytes of a bulk plus its trailing CRLF,
    /// appending the payload into `out`. If the line's declared CRLF isn't
    /// found exactly where expected (the "inconsistent length" case), the
    /// two bytes at that offset are *not* required to be `\r\n` — whatever
    /// bytes are there become the start of the next frame: the trailing
    /// CRLF is never validated, only skipped as two bytes.
    pub async fn read_bulk(&mut self, len: usize, out: &mut Vec<u8>) -> Result<()> {
        self.require(len + 2).await?;
        out.extend_from_slice(&self.buf[self.r..self.r + len]);
        self.consume(len + 2);
        Ok(())
    }

    pub async fn read_bulk_string(&mut self, len: usize) -> Result<String> {
        let mut buf = Vec::with_capacity(len);
        self.read_bulk(len, &mut buf).await?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Discard one bulk of `len` bytes without allocating for its contents,
    /// reading directly from the underlying stream once the buffer is
    /// drained rather than growing the buffer to fit.
    pub async fn skip_bulk(&mut self, mut len: usize) -> Result<()> {
        len += 2; // trailing CRLF
        loop {
            let avail = self.unread();
            if avail >= len {
                self.consume(len);
                return Ok(());
            }
            self.consume(avail);
            len -= avail;
            self.compact();
            let chunk = len.min(self.buf.len());
            let n = self.inner.read(&mut self.buf[..chunk]).await?;
            if n == 0 {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "eof",
                )));
            }
            // bytes just read sit at buf[0..n) as unread data
            self.w = n;
            self.r = 0;
        }
    }

    /// A sequential reader over one bulk's payload, for streaming large
    /// arguments without fully materializing them. Draining it to
    /// completion consumes the trailing CRLF.
    pub fn stream_bulk(&mut self, len: usize) -> BulkReader<'_, R> {
        BulkReader {
            reader: self,
            remaining: len,
            trailer_consumed: false,
        }
    }
}

/// Borrowed, single-use reader over one bulk argument's payload bytes.
pub struct BulkReader<'r, R> {
    reader: &'r mut Reader<R>,
    remaining: usize,
    trailer_consumed: bool,
}

impl<'r, R: AsyncRead + Unpin> BulkReader<'r, R> {
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Read up to `out.len()` bytes of payload into `out`, returning how
    /// many were read. Returns `Ok(0)` once the payload is exhausted; the
    /// trailing CRLF is consumed automatically at that point.
    pub async fn read_chunk(&mut self, out: &mut [u8]) -> Result<usize> {
        if self.remaining == 0 {
            self.consume_trailer().await?;
            return Ok(0);
        }
        let want = out.len().min(self.remaining);
        if want == 0 {
            return Ok(0);
        }
        self.reader.require(want).await?;
        out[..want].copy_from_slice(&self.reader.buf[self.reader.r..self.reader.r + want]);
        self.reader.consume(want);
        self.remaining -= want;
        if self.remaining == 0 {
            self.consume_trailer().await?;
        }
        Ok(want)
    }

    /// Discard the remainder of the payload plus trailing CRLF without
    /// reading it into caller-visible memory.
    pub async fn discard(&mut self) -> Result<()> {
        if self.remaining > 0 {
            self.reader.skip_bulk(self.remaining).await?;
            self.remaining = 0;
            self.trailer_consumed = true;
        } else {
            self.consume_trailer().await?;
        }
        Ok(())
    }

    async fn consume_trailer(&mut self) -> Result<()> {
        if !self.trailer_consumed {
            self.reader.require(2).await?;
            self.reader.consume(2);
            self.trailer_consumed = true;
        }
        Ok(())
    }
}

fn memchr(needle: u8, haystack: &[u8]) -> Option<usize> {
    haystack.iter().position(|&b| b == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_negative_multibulk_length() {
        let mut r = Reader::new(std::io::Cursor::new(b"*-1\r\n".to_vec()));
        let err = r.read_array_len().await.unwrap_err();
        assert!(err.is_protocol());
    }

    #[tokio::test]
    async fn accepts_zero_multibulk_length() {
        let mut r = Reader::new(std::io::Cursor::new(b"*0\r\n".to_vec()));
        assert_eq!(r.read_array_len().await.unwrap(), 0);
    }
}
