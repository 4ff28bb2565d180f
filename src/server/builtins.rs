//! Ready-made handlers for the handful of commands every server needs
//! regardless of its domain logic. Grounded on `example_test.go`'s
//! `ExampleHandlerFunc`/`ExampleServer` (`PING`/`ECHO`) and
//! `original_source/info.go`/`redeo.go` for `INFO`/`COMMAND`/the exact
//! wrong-args error text (`WrongNumberOfArgs` uses the command's
//! as-received name, not a lowercased constant).

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::info::ServerInfo;
use crate::resp::{Command, RequestWriter, ToResp};

use super::handler::{Handler, HandlerFn};

fn cmd_name(cmd: &Command) -> String {
    String::from_utf8_lossy(cmd.name()).into_owned()
}

fn wrong_args<W: AsyncWrite + Unpin>(w: &mut RequestWriter<W>, cmd: &Command) {
    w.append_error(&format!(
        "ERR wrong number of arguments for '{}' command",
        cmd_name(cmd)
    ));
}

pub fn ping_handler<R, W>() -> Arc<dyn Handler<R, W>>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    Arc::new(HandlerFn(|w: &mut RequestWriter<W>, cmd: &mut Command| {
        Box::pin(async move {
            match cmd.argc() {
                0 => w.append_inline_string("PONG"),
                1 => w.append_bulk(cmd.arg(0).unwrap()),
                _ => wrong_args(w, cmd),
            }
        })
    }))
}

pub fn echo_handler<R, W>() -> Arc<dyn Handler<R, W>>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    Arc::new(HandlerFn(|w: &mut RequestWriter<W>, cmd: &mut Command| {
        Box::pin(async move {
            match cmd.argc() {
                1 => w.append_bulk(cmd.arg(0).unwrap()),
                _ => wrong_args(w, cmd),
            }
        })
    }))
}

pub fn info_handler<R, W>(info: Arc<ServerInfo>) -> Arc<dyn Handler<R, W>>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    Arc::new(HandlerFn(move |w: &mut RequestWriter<W>, cmd: &mut Command| {
        let info = info.clone();
        Box::pin(async move {
            let sections: Vec<String> = cmd
                .args()
                .map(|a| String::from_utf8_lossy(a).into_owned())
                .collect();
            w.append_bulk_string(&info.registry.render_selected(&sections));
        })
    }))
}

/// Mirrors the original's `CommandDescription` (`info.go`): the metadata
/// `COMMAND` reports per registered command, per
/// https://redis.io/commands/command's `arity`/`flags`/key-position fields.
#[derive(Debug, Clone)]
pub struct CommandDescription {
    /// Reported lowercased regardless of how the handler was registered.
    pub name: String,
    /// Positive: fixed arity. Negative: minimum arity, more allowed.
    pub arity: i64,
    pub flags: Vec<String>,
    pub first_key: i64,
    pub last_key: i64,
    pub key_step: i64,
}

impl CommandDescription {
    pub fn new(name: impl Into<String>, arity: i64) -> Self {
        Self {
            name: name.into().to_ascii_lowercase(),
            arity,
            flags: Vec::new(),
            first_key: 0,
            last_key: 0,
            key_step: 0,
        }
    }

    pub fn flags(mut self, flags: impl IntoIterator<Item = &'static str>) -> Self {
        self.flags = flags.into_iter().map(str::to_string).collect();
        self
    }

    pub fn keys(mut self, first: i64, last: i64, step: i64) -> Self {
        self.first_key = first;
        self.last_key = last;
        self.key_step = step;
        self
    }
}

impl ToResp for CommandDescription {
    async fn to_resp<W: AsyncWrite + Unpin + Send>(
        &self,
        w: &mut RequestWriter<W>,
    ) -> crate::resp::Result<()> {
        w.append_array_len(6);
        w.append_bulk_string(&self.name);
        w.append_int(self.arity);
        w.append_array_len(self.flags.len());
        for flag in &self.flags {
            w.append_bulk_string(flag);
        }
        w.append_int(self.first_key);
        w.append_int(self.last_key);
        w.append_int(self.key_step);
        Ok(())
    }
}

/// A `COMMAND` reply: each registered command's description, serialized as
/// a `*N` array of 6-tuples (`§4.7`).
pub fn command_handler<R, W>(descriptions: Vec<CommandDescription>) -> Arc<dyn Handler<R, W>>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    Arc::new(HandlerFn(move |w: &mut RequestWriter<W>, _cmd: &mut Command| {
        let descriptions = descriptions.clone();
        Box::pin(async move {
            w.append_array_len(descriptions.len());
            for desc in &descriptions {
                let _ = desc.to_resp(w).await;
            }
        })
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resp::{Command as RespCommand, RequestReader};

    async fn read_cmd(input: &[u8]) -> RespCommand {
        let mut r = RequestReader::new(std::io::Cursor::new(input.to_vec()));
        let mut cmd = RespCommand::new();
        r.read_cmd(&mut cmd).await.unwrap();
        cmd
    }

    #[tokio::test]
    async fn ping_wrong_args_uses_received_case() {
        let mut cmd = read_cmd(b"*3\r\n$4\r\nPING\r\n$3\r\nbad\r\n$4\r\nargs\r\n").await;
        let handler = ping_handler::<std::io::Cursor<Vec<u8>>, Vec<u8>>();
        let mut w = RequestWriter::new(Vec::new());
        handler.serve(&mut w, &mut cmd).await;
        w.flush().await.unwrap();
        assert_eq!(
            w.into_inner(),
            b"-ERR wrong number of arguments for 'PING' command\r\n"
        );
    }

    #[tokio::test]
    async fn echo_wrong_args_uses_received_case() {
        let mut cmd = read_cmd(b"echo\r\n").await;
        let handler = echo_handler::<std::io::Cursor<Vec<u8>>, Vec<u8>>();
        let mut w = RequestWriter::new(Vec::new());
        handler.serve(&mut w, &mut cmd).await;
        w.flush().await.unwrap();
        assert_eq!(
            w.into_inner(),
            b"-ERR wrong number of arguments for 'echo' command\r\n"
        );
    }

    #[test]
    fn command_description_builder() {
        let d = CommandDescription::new("GET", 2)
            .flags(["readonly", "fast"])
            .keys(1, 1, 1);
        assert_eq!(d.name, "get");
        assert_eq!(d.flags, vec!["readonly", "fast"]);
    }
}
