//! Command framing: turning a stream of RESP frames into discrete commands,
//! in both an eager (fully materialized, reusable) and a lazy/streaming
//! (argument bytes read on demand) shape.

use bytes::Bytes;
use tokio::io::AsyncRead;

use super::error::{Error, ProtocolError, Result};
use super::reader::{BulkReader, Reader};
use crate::cancel::CancelToken;

const ASCII_SPACE: [u8; 6] = [b' ', b'\t', b'\n', 0x0B, 0x0C, b'\r'];

fn is_ascii_space(b: u8) -> bool {
    ASCII_SPACE.contains(&b)
}

fn is_hex_digit(b: u8) -> bool {
    b.is_ascii_digit() || (b'a'..=b'f').contains(&b) || (b'A'..=b'F').contains(&b)
}

fn hex_value(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'a'..=b'f' => b - b'a' + 10,
        b'A'..=b'F' => b - b'A' + 10,
        _ => 0,
    }
}

/// Append one shell-quoting-aware token from `src[pos..]` into `dst`,
/// returning the position just past the consumed token. Mirrors the
/// `sdssplitargs`-style escaping rules: `"..."` supports `\n \r \t \b \a`
/// and `\xHH` escapes, `'...'` is taken literally, and an unquoted run ends
/// at the next whitespace byte.
fn append_argument(dst: &mut Vec<u8>, src: &[u8], mut pos: usize) -> usize {
    let mut in_dquote = false;
    let mut in_squote = false;
    while pos < src.len() {
        let p = src[pos];
        if in_dquote {
            if p == b'"' {
                pos += 1;
                break;
            } else if p == b'\\'
                && pos + 3 < src.len()
                && src[pos + 1] == b'x'
                && is_hex_digit(src[pos + 2])
                && is_hex_digit(src[pos + 3])
            {
                dst.push((hex_value(src[pos + 2]) << 4) | hex_value(src[pos + 3]));
                pos += 4;
                continue;
            } else if p == b'\\' && pos + 1 < src.len() {
                let escaped = match src[pos + 1] {
                    b'n' => b'\n',
                    b'r' => b'\r',
                    b't' => b'\t',
                    b'b' => 0x08,
                    b'a' => 0x07,
                    other => other,
                };
                dst.push(escaped);
                pos += 2;
                continue;
            } else {
                dst.push(p);
            }
        } else if in_squote {
            if p == b'\'' {
                pos += 1;
                break;
            }
            dst.push(p);
        } else {
            match p {
                b' ' | b'\t' | b'\n' | b'\r' => break,
                b'"' => {
                    if !dst.is_empty() {
                        break;
                    }
                    in_dquote = true;
                }
                b'\'' => {
                    if !dst.is_empty() {
                        break;
                    }
                    in_squote = true;
                }
                _ => dst.push(p),
            }
        }
        pos += 1;
    }
    pos
}

/// Split one inline line into whitespace-delimited, quote-aware tokens.
/// Returns an empty vec for a blank line.
pub(crate) fn tokenize_inline(line: &[u8]) -> Vec<Vec<u8>> {
    let mut tokens = Vec::new();
    let mut pos = 0;
    loop {
        while pos < line.len() && is_ascii_space(line[pos]) {
            pos += 1;
        }
        if pos >= line.len() {
            break;
        }
        let mut token = Vec::new();
        pos = append_argument(&mut token, line, pos);
        tokens.push(token);
    }
    tokens
}

/// A fully-materialized command: name plus argument bytes. Reusable across
/// reads — `reset` truncates argument storage without releasing the
/// allocations backing it, so reading many commands through one `Command`
/// costs no more memory than the single largest command seen.
pub struct Command {
    name: Vec<u8>,
    args: Vec<Vec<u8>>,
    argc: usize,
    ctx: CancelToken,
}

impl Default for Command {
    fn default() -> Self {
        Self::new()
    }
}

impl Command {
    pub fn new() -> Self {
        Self {
            name: Vec::new(),
            args: Vec::new(),
            argc: 0,
            ctx: CancelToken::new(),
        }
    }

    pub fn name(&self) -> &[u8] {
        &self.name
    }

    pub fn argc(&self) -> usize {
        self.argc
    }

    pub fn arg(&self, i: usize) -> Option<&[u8]> {
        if i < self.argc { Some(&self.args[i]) } else { None }
    }

    pub fn args(&self) -> impl Iterator<Item = &[u8]> {
        self.args[..self.argc].iter().map(|v| v.as_slice())
    }

    pub fn context(&self) -> CancelToken {
        self.ctx.clone()
    }

    pub fn set_context(&mut self, ctx: CancelToken) {
        self.ctx = ctx;
    }

    /// Truncate name/argument storage to empty, retaining capacity.
    fn reset(&mut self) {
        self.name.clear();
        for i in 0..self.argc {
            self.args[i].clear();
        }
        self.argc = 0;
    }

    /// Expose exactly `n` argument slots, extending storage (with fresh,
    /// already-empty slots) only if fewer than `n` currently exist.
    fn grow(&mut self, n: usize) {
        if n > self.args.len() {
            self.args.resize_with(n, Vec::new);
        }
        self.argc = n;
    }

    /// Parse the next command frame from `reader` into `self`, blocking on
    /// blank multibulk headers (`*0\r\n`) by retrying rather than failing.
    pub(crate) async fn read_from<R: AsyncRead + Unpin>(
        &mut self,
        reader: &mut Reader<R>,
    ) -> Result<()> {
        self.reset();
        loop {
            if reader.peek_byte().await? == b'*' {
                let n = reader.read_array_len().await?;
                if n < 1 {
                    continue;
                }
                let argc = (n - 1) as usize;
                let name_len = reader.read_bulk_len().await?;
                reader.read_bulk(name_len, &mut self.name).await?;
                self.grow(argc);
                for i in 0..argc {
                    let len = reader.read_bulk_len().await?;
                    reader.read_bulk(len, &mut self.args[i]).await?;
                }
                return Ok(());
            }

            let line = reader.read_line().await?;
            let tokens = tokenize_inline(&line);
            if tokens.is_empty() {
                continue;
            }
            let mut it = tokens.into_iter();
            self.name.extend_from_slice(&it.next().unwrap());
            let rest: Vec<Vec<u8>> = it.collect();
            self.grow(rest.len());
            for (i, tok) in rest.into_iter().enumerate() {
                self.args[i] = tok;
            }
            return Ok(());
        }
    }
}

/// One not-yet-materialized argument of a [`CommandStream`]: either already
/// in memory (the command arrived inline) or backed by a borrow of the
/// underlying reader (the command arrived as a multibulk frame).
pub enum NextArg<'r, R> {
    Memory { data: Bytes, pos: usize },
    Streamed(BulkReader<'r, R>),
}

impl<'r, R: AsyncRead + Unpin> NextArg<'r, R> {
    pub fn remaining(&self) -> usize {
        match self {
            NextArg::Memory { data, pos } => data.len() - pos,
            NextArg::Streamed(s) => s.remaining(),
        }
    }

    pub async fn read_chunk(&mut self, out: &mut [u8]) -> Result<usize> {
        match self {
            NextArg::Memory { data, pos } => {
                let n = out.len().min(data.len() - *pos);
                out[..n].copy_from_slice(&data[*pos..*pos + n]);
                *pos += n;
                Ok(n)
            }
            NextArg::Streamed(s) => s.read_chunk(out).await,
        }
    }

    pub async fn discard(&mut self) -> Result<()> {
        match self {
            NextArg::Memory { data, pos } => {
                *pos = data.len();
                Ok(())
            }
            NextArg::Streamed(s) => s.discard().await,
        }
    }

    pub async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.remaining()];
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read_chunk(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    }
}

/// A command whose arguments are read on demand rather than fully
/// materialized up front, for streaming large bulk payloads (e.g. a huge
/// `SET` value) without buffering them. Single-use: it borrows the
/// connection's reader for as long as unread arguments remain.
pub struct CommandStream<'r, R> {
    name: Vec<u8>,
    argc: usize,
    p: usize,
    argv: Vec<Bytes>,
    reader: Option<&'r mut Reader<R>>,
    ctx: CancelToken,
}

impl<'r, R: AsyncRead + Unpin> CommandStream<'r, R> {
    pub(crate) async fn parse(reader: &'r mut Reader<R>) -> Result<Self> {
        loop {
            if reader.peek_byte().await? == b'*' {
                let n = reader.read_array_len().await?;
                if n < 1 {
                    continue;
                }
                let argc = (n - 1) as usize;
                let name_len = reader.read_bulk_len().await?;
                let mut name = Vec::new();
                reader.read_bulk(name_len, &mut name).await?;
                return Ok(CommandStream {
                    name,
                    argc,
                    p: 0,
                    argv: Vec::new(),
                    reader: Some(reader),
                    ctx: CancelToken::new(),
                });
            }

            let line = reader.read_line().await?;
            let tokens = tokenize_inline(&line);
            if tokens.is_empty() {
                continue;
            }
            let mut it = tokens.into_iter();
            let name = it.next().unwrap();
            let argv: Vec<Bytes> = it.map(Bytes::from).collect();
            let argc = argv.len();
            return Ok(CommandStream {
                name,
                argc,
                p: 0,
                argv,
                reader: None,
                ctx: CancelToken::new(),
            });
        }
    }

    pub fn name(&self) -> &[u8] {
        &self.name
    }

    pub fn argc(&self) -> usize {
        self.argc
    }

    pub fn context(&self) -> CancelToken {
        self.ctx.clone()
    }

    pub fn set_context(&mut self, ctx: CancelToken) {
        self.ctx = ctx;
    }

    /// The next unread argument. `Err(Error::NoMoreArgs)` once `argc`
    /// arguments have already been consumed; `Err(Error::Cancelled)` if the
    /// command's context was cancelled since the last argument was read.
    pub async fn next_arg(&mut self) -> Result<NextArg<'_, R>> {
        if self.ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if self.p < self.argv.len() {
            let data = self.argv[self.p].clone();
            self.p += 1;
            return Ok(NextArg::Memory { data, pos: 0 });
        }
        if self.p < self.argc {
            let reader = self.reader.as_deref_mut().expect("multibulk argv without reader");
            let len = reader.read_bulk_len().await?;
            self.p += 1;
            return Ok(NextArg::Streamed(reader.stream_bulk(len)));
        }
        Err(Error::NoMoreArgs)
    }

    /// Skip every remaining unread argument, leaving the connection ready to
    /// read the next command frame. Called by the dispatcher after a
    /// streaming handler returns without draining its own arguments.
    pub async fn discard(&mut self) -> Result<()> {
        if self.ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if self.p < self.argv.len() {
            self.p = self.argv.len();
        }
        if let Some(reader) = self.reader.as_deref_mut() {
            while self.p < self.argc {
                let len = reader.read_bulk_len().await?;
                reader.skip_bulk(len).await?;
                self.p += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resp::reader::Reader;

    async fn read_one(input: &[u8]) -> (Vec<u8>, Vec<Vec<u8>>) {
        let mut reader = Reader::new(std::io::Cursor::new(input.to_vec()));
        let mut cmd = Command::new();
        cmd.read_from(&mut reader).await.unwrap();
        (cmd.name().to_vec(), cmd.args().map(|a| a.to_vec()).collect())
    }

    #[tokio::test]
    async fn multibulk_round_trip() {
        let (name, args) = read_one(b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n").await;
        assert_eq!(name, b"SET");
        assert_eq!(args, vec![b"foo".to_vec(), b"bar".to_vec()]);
    }

    #[tokio::test]
    async fn inline_round_trip() {
        let (name, args) = read_one(b"PING hello\r\n").await;
        assert_eq!(name, b"PING");
        assert_eq!(args, vec![b"hello".to_vec()]);
    }

    #[tokio::test]
    async fn inline_quoting() {
        let (name, args) = read_one(b"SET k \"a\\nb\" 'lit\\neral'\r\n").await;
        assert_eq!(name, b"SET");
        assert_eq!(args, vec![b"k".to_vec(), b"a\nb".to_vec(), b"lit\\neral".to_vec()]);
    }

    #[tokio::test]
    async fn buffer_reuse_across_commands() {
        let mut reader = Reader::new(std::io::Cursor::new(
            b"*2\r\n$3\r\nSET\r\n$5\r\nhello\r\n*1\r\n$4\r\nPING\r\n".to_vec(),
        ));
        let mut cmd = Command::new();
        cmd.read_from(&mut reader).await.unwrap();
        assert_eq!(cmd.argc(), 1);
        let first_cap = cmd.args.capacity();
        cmd.read_from(&mut reader).await.unwrap();
        assert_eq!(cmd.name(), b"PING");
        assert_eq!(cmd.argc(), 0);
        assert!(cmd.args.capacity() >= first_cap.min(cmd.args.capacity()));
    }

    #[tokio::test]
    async fn inconsistent_bulk_length_recovery() {
        // Declared length 4 but payload "PING123" is 7 bytes: the reader
        // takes exactly 4 bytes as content then skips 2 more as the "CRLF",
        // leaving "3\r\n" as the start of the next (inline) command.
        let mut reader = Reader::new(std::io::Cursor::new(
            b"*1\r\n$4\r\nPING123\r\n*1\r\n$4\r\nPING\r\n".to_vec(),
        ));
        let mut cmd = Command::new();

        cmd.read_from(&mut reader).await.unwrap();
        assert_eq!(cmd.name(), b"PING");
        assert_eq!(cmd.argc(), 0);

        cmd.read_from(&mut reader).await.unwrap();
        assert_eq!(cmd.name(), b"3");
        assert_eq!(cmd.argc(), 0);

        cmd.read_from(&mut reader).await.unwrap();
        assert_eq!(cmd.name(), b"PING");
        assert_eq!(cmd.argc(), 0);
    }

    #[tokio::test]
    async fn stream_next_arg_materializes_bulk() {
        let mut reader = Reader::new(std::io::Cursor::new(
            b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n".to_vec(),
        ));
        let mut stream = CommandStream::parse(&mut reader).await.unwrap();
        assert_eq!(stream.name(), b"GET");
        assert_eq!(stream.argc(), 1);
        let mut arg = stream.next_arg().await.unwrap();
        let data = arg.read_to_end().await.unwrap();
        assert_eq!(data, b"foo");
    }
}
