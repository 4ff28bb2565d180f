//! Drives a full `Server` over an in-memory `tokio::io::duplex` transport,
//! exercising the boundary scenarios a reader would script against a real
//! socket: a bare `PING`, a malformed one, an unknown command followed by a
//! pipelined valid one, and an oversize `ECHO` that forces the reader past
//! its default buffer capacity.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, split};

use redeo_rs::server::{Config, HandlerFn, Server, echo_handler, ping_handler};

async fn client_server_pair() -> (
    tokio::io::DuplexStream,
    tokio::task::JoinHandle<()>,
) {
    let (server_side, client_side) = tokio::io::duplex(256 * 1024);
    let server = Server::builder()
        .handle("ping", ping_handler())
        .handle("echo", echo_handler())
        .build();
    let (read_half, write_half) = split(server_side);
    let handle = tokio::spawn(async move {
        server.serve_connection(read_half, write_half).await;
    });
    (client_side, handle)
}

#[tokio::test]
async fn ping_without_args() {
    let (mut client, _server) = client_server_pair().await;
    client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();

    let mut buf = [0u8; 32];
    let n = client.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"+PONG\r\n");
}

#[tokio::test]
async fn ping_with_bad_args() {
    let (mut client, _server) = client_server_pair().await;
    client
        .write_all(b"*3\r\n$4\r\nPING\r\n$3\r\nbad\r\n$4\r\nargs\r\n")
        .await
        .unwrap();

    let mut buf = [0u8; 128];
    let n = client.read(&mut buf).await.unwrap();
    assert_eq!(
        &buf[..n],
        &b"-ERR wrong number of arguments for 'PING' command\r\n"[..]
    );
}

#[tokio::test]
async fn unknown_command_with_pipelined_follow_up() {
    let (mut client, _server) = client_server_pair().await;
    client
        .write_all(b"*1\r\n$3\r\nBAD\r\n*1\r\n$4\r\nPING\r\n")
        .await
        .unwrap();

    let mut buf = [0u8; 64];
    let mut total = Vec::new();
    while total.len() < b"-ERR unknown command 'BAD'\r\n+PONG\r\n".len() {
        let n = client.read(&mut buf).await.unwrap();
        total.extend_from_slice(&buf[..n]);
    }
    assert_eq!(total, b"-ERR unknown command 'BAD'\r\n+PONG\r\n");
}

#[tokio::test]
async fn oversize_echo_round_trips() {
    let (mut client, _server) = client_server_pair().await;
    let payload = vec![b'x'; 100_000];
    client
        .write_all(b"*2\r\n$4\r\nECHO\r\n$100000\r\n")
        .await
        .unwrap();
    client.write_all(&payload).await.unwrap();
    client.write_all(b"\r\n").await.unwrap();

    let mut expected = Vec::new();
    expected.extend_from_slice(b"$100000\r\n");
    expected.extend_from_slice(&payload);
    expected.extend_from_slice(b"\r\n");

    let mut total = Vec::new();
    let mut buf = [0u8; 8192];
    while total.len() < expected.len() {
        let n = client.read(&mut buf).await.unwrap();
        total.extend_from_slice(&buf[..n]);
    }
    assert_eq!(total, expected);
}

#[tokio::test]
async fn inconsistent_bulk_length_recovery() {
    // Declared length 4 but payload "PING123" is 7 bytes: the reader takes
    // the first 4 bytes as content and 2 more as the "terminator", leaving
    // "3\r\n" to be dispatched as its own (unknown) command.
    let (mut client, _server) = client_server_pair().await;
    client
        .write_all(b"*1\r\n$4\r\nPING123\r\n*1\r\n$4\r\nPING\r\n")
        .await
        .unwrap();

    let expected = b"+PONG\r\n-ERR unknown command '3'\r\n+PONG\r\n";
    let mut total = Vec::new();
    let mut buf = [0u8; 128];
    while total.len() < expected.len() {
        let n = client.read(&mut buf).await.unwrap();
        total.extend_from_slice(&buf[..n]);
    }
    assert_eq!(total, expected);
}

/// `request_timeout` bounds reading a command's frame, not running its
/// handler: a handler slower than the configured timeout must still finish
/// and reply normally.
#[tokio::test]
async fn request_timeout_does_not_bound_handler_execution() {
    let (server_side, mut client) = tokio::io::duplex(64 * 1024);
    let server = Server::builder()
        .config(Config {
            request_timeout: Some(Duration::from_millis(20)),
            ..Config::default()
        })
        .handle(
            "slow",
            std::sync::Arc::new(HandlerFn(
                |w: &mut redeo_rs::resp::RequestWriter<_>, _cmd: &mut redeo_rs::resp::Command| {
                    Box::pin(async move {
                        tokio::time::sleep(Duration::from_millis(60)).await;
                        w.append_inline_string("DONE");
                    })
                },
            )),
        )
        .build();
    let (read_half, write_half) = split(server_side);
    tokio::spawn(async move {
        server.serve_connection(read_half, write_half).await;
    });

    client.write_all(b"*1\r\n$4\r\nSLOW\r\n").await.unwrap();
    let mut buf = [0u8; 32];
    let n = client.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"+DONE\r\n");
}
