//! Higher-level request/response wrappers built on top of the raw reader
//! and writer: the server side sees `RequestReader`/`RequestWriter`, a
//! client talking to a RESP server sees `ResponseReader`.

use tokio::io::{AsyncRead, AsyncWrite};

use super::command::{Command, CommandStream};
use super::error::{ProtocolError, Result};
use super::reader::Reader;
use super::scan::{FromResp, ScanResult};
use super::writer::Writer;

fn trim_crlf(data: &[u8]) -> &[u8] {
    let mut end = data.len();
    while end > 0 && matches!(data[end - 1], b'\r' | b'\n') {
        end -= 1;
    }
    &data[..end]
}

fn first_word(data: &[u8]) -> String {
    let start = data.iter().position(|&b| !matches!(b, b' ' | b'\t'));
    let Some(start) = start else {
        return String::new();
    };
    let end = data[start..]
        .iter()
        .position(|&b| matches!(b, b' ' | b'\t'))
        .map(|n| start + n)
        .unwrap_or(data.len());
    String::from_utf8_lossy(&data[start..end]).into_owned()
}

fn parse_size(data: &[u8], prefix: u8, err: ProtocolError) -> Result<i64> {
    match data.first() {
        Some(&b) if b == prefix => {}
        other => {
            let actual = other.map(|&b| b as char).unwrap_or('\0');
            return Err(ProtocolError::UnexpectedByte {
                expected: prefix as char,
                actual,
            }
            .into());
        }
    }
    std::str::from_utf8(&data[1..])
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| err.into())
}

/// Server-side reader: decodes incoming client commands.
pub struct RequestReader<R> {
    reader: Reader<R>,
}

impl<R: AsyncRead + Unpin> RequestReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: Reader::new(inner),
        }
    }

    pub fn buffered(&self) -> usize {
        self.reader.buffered()
    }

    pub fn is_empty(&self) -> bool {
        self.reader.is_empty()
    }

    /// Parse the next command into `cmd`, reusing its storage.
    pub async fn read_cmd(&mut self, cmd: &mut Command) -> Result<()> {
        cmd.read_from(&mut self.reader).await
    }

    /// Parse the next command lazily, borrowing the reader for any
    /// unread multibulk arguments.
    pub async fn stream_cmd(&mut self) -> Result<CommandStream<'_, R>> {
        CommandStream::parse(&mut self.reader).await
    }

    /// Look ahead at the next command's name (for logging a pipeline before
    /// dispatching it) without consuming any bytes.
    pub async fn peek_cmd(&mut self) -> Result<String> {
        let mut offset = 0usize;
        loop {
            let line = self.reader.peek_line(offset).await?;
            let consumed = line.len();
            let trimmed = trim_crlf(&line);
            if trimmed.is_empty() {
                return Ok(String::new());
            }
            if trimmed[0] != b'*' {
                return Ok(first_word(trimmed));
            }
            let n = parse_size(trimmed, b'*', ProtocolError::InvalidMultibulkLength)?;
            if n < 1 {
                offset += consumed;
                continue;
            }
            let line2 = self.reader.peek_line(offset + consumed).await?;
            let consumed2 = line2.len();
            let trimmed2 = trim_crlf(&line2);
            let blen = parse_size(trimmed2, b'$', ProtocolError::InvalidBulkLength)? as usize;
            let data = self
                .reader
                .peek_n(offset + consumed + consumed2, blen)
                .await?;
            return Ok(String::from_utf8_lossy(&data).into_owned());
        }
    }

    /// Discard the next command frame entirely without materializing its
    /// arguments, for recovering after an unknown-command error.
    pub async fn skip_cmd(&mut self) -> Result<()> {
        loop {
            if self.reader.peek_byte().await? == b'*' {
                let n = self.reader.read_array_len().await?;
                if n < 1 {
                    continue;
                }
                for _ in 0..n {
                    let len = self.reader.read_bulk_len().await?;
                    self.reader.skip_bulk(len).await?;
                }
                return Ok(());
            }
            self.reader.read_line().await?;
            return Ok(());
        }
    }
}

/// Server-side writer: encodes outgoing replies. A thin rename of
/// [`Writer`] so handler signatures read naturally; all behavior lives
/// there.
pub type RequestWriter<W> = Writer<W>;

/// Client-side reader: decodes replies from a RESP server.
pub struct ResponseReader<R> {
    reader: Reader<R>,
}

impl<R: AsyncRead + Unpin + Send> ResponseReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: Reader::new(inner),
        }
    }

    pub async fn scan<T: FromResp>(&mut self) -> ScanResult<T> {
        T::from_resp(&mut self.reader).await
    }
}

/// Client-side writer: encodes outgoing commands as multibulk requests.
pub struct ResponseWriter<W> {
    writer: Writer<W>,
}

impl<W: AsyncWrite + Unpin> ResponseWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            writer: Writer::new(inner),
        }
    }

    /// Write one command as a multibulk request: `name` plus each of
    /// `args`, all as bulk strings.
    pub fn write_cmd<A: AsRef<[u8]>>(&mut self, name: &str, args: &[A]) {
        self.writer.append_array_len(args.len() + 1);
        self.writer.append_bulk_string(name);
        for a in args {
            self.writer.append_bulk(a.as_ref());
        }
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn peek_cmd_does_not_consume() {
        let mut r = RequestReader::new(std::io::Cursor::new(
            b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n".to_vec(),
        ));
        assert_eq!(r.peek_cmd().await.unwrap(), "GET");
        let mut cmd = Command::new();
        r.read_cmd(&mut cmd).await.unwrap();
        assert_eq!(cmd.name(), b"GET");
        assert_eq!(cmd.arg(0), Some(&b"foo"[..]));
    }

    #[tokio::test]
    async fn peek_cmd_inline() {
        let mut r = RequestReader::new(std::io::Cursor::new(b"PING\r\n".to_vec()));
        assert_eq!(r.peek_cmd().await.unwrap(), "PING");
    }

    #[tokio::test]
    async fn skip_cmd_then_read_next() {
        let mut r = RequestReader::new(std::io::Cursor::new(
            b"*1\r\n$7\r\nUNKNOWN\r\n*1\r\n$4\r\nPING\r\n".to_vec(),
        ));
        r.skip_cmd().await.unwrap();
        let mut cmd = Command::new();
        r.read_cmd(&mut cmd).await.unwrap();
        assert_eq!(cmd.name(), b"PING");
    }
}
