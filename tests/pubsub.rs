//! Drives two subscriber connections and a publisher through a real `Server`
//! instance, exercising the pub/sub fan-out boundary scenario: a second
//! subscriber joining mid-stream only sees messages published after it
//! joined, and every current subscriber sees every publish after that.

use tokio::io::{AsyncReadExt, AsyncWriteExt, split};

use redeo_rs::pubsub::{PubSub, publish_handler, subscribe_handler};
use redeo_rs::server::Server;

async fn connect(
    server: &std::sync::Arc<
        redeo_rs::server::Server<
            tokio::io::ReadHalf<tokio::io::DuplexStream>,
            tokio::io::WriteHalf<tokio::io::DuplexStream>,
        >,
    >,
) -> tokio::io::DuplexStream {
    let (server_side, client_side) = tokio::io::duplex(64 * 1024);
    let (read_half, write_half) = split(server_side);
    let server = server.clone();
    tokio::spawn(async move {
        server.serve_connection(read_half, write_half).await;
    });
    client_side
}

async fn read_exact_len(stream: &mut tokio::io::DuplexStream, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    stream.read_exact(&mut out).await.unwrap();
    out
}

#[tokio::test]
async fn publish_fans_out_to_every_current_subscriber() {
    let broker = PubSub::new();
    let server = Server::builder()
        .handle_pubsub("subscribe", subscribe_handler(broker.clone()))
        .handle_pubsub("publish", publish_handler(broker.clone()))
        .build();

    let mut s1 = connect(&server).await;
    s1.write_all(b"*2\r\n$9\r\nSUBSCRIBE\r\n$4\r\nchan\r\n")
        .await
        .unwrap();
    let ack1 = read_exact_len(&mut s1, b"*3\r\n$9\r\nsubscribe\r\n$4\r\nchan\r\n:1\r\n".len()).await;
    assert_eq!(ack1, b"*3\r\n$9\r\nsubscribe\r\n$4\r\nchan\r\n:1\r\n");

    let mut publisher = connect(&server).await;
    publisher
        .write_all(b"*3\r\n$7\r\nPUBLISH\r\n$4\r\nchan\r\n$2\r\nm1\r\n")
        .await
        .unwrap();
    let count1 = read_exact_len(&mut publisher, b":1\r\n".len()).await;
    assert_eq!(count1, b":1\r\n");

    let msg1 = read_exact_len(&mut s1, b"*3\r\n$7\r\nmessage\r\n$4\r\nchan\r\n$2\r\nm1\r\n".len()).await;
    assert_eq!(msg1, b"*3\r\n$7\r\nmessage\r\n$4\r\nchan\r\n$2\r\nm1\r\n");

    let mut s2 = connect(&server).await;
    s2.write_all(b"*2\r\n$9\r\nSUBSCRIBE\r\n$4\r\nchan\r\n")
        .await
        .unwrap();
    let ack2 = read_exact_len(&mut s2, b"*3\r\n$9\r\nsubscribe\r\n$4\r\nchan\r\n:1\r\n".len()).await;
    assert_eq!(ack2, b"*3\r\n$9\r\nsubscribe\r\n$4\r\nchan\r\n:1\r\n");

    publisher
        .write_all(b"*3\r\n$7\r\nPUBLISH\r\n$4\r\nchan\r\n$2\r\nm2\r\n")
        .await
        .unwrap();
    let count2 = read_exact_len(&mut publisher, b":2\r\n".len()).await;
    assert_eq!(count2, b":2\r\n");

    let msg2_s1 = read_exact_len(&mut s1, b"*3\r\n$7\r\nmessage\r\n$4\r\nchan\r\n$2\r\nm2\r\n".len()).await;
    assert_eq!(msg2_s1, b"*3\r\n$7\r\nmessage\r\n$4\r\nchan\r\n$2\r\nm2\r\n");

    let msg2_s2 = read_exact_len(&mut s2, b"*3\r\n$7\r\nmessage\r\n$4\r\nchan\r\n$2\r\nm2\r\n".len()).await;
    assert_eq!(msg2_s2, b"*3\r\n$7\r\nmessage\r\n$4\r\nchan\r\n$2\r\nm2\r\n");
}

#[tokio::test]
async fn publish_with_no_subscribers_reports_zero() {
    let broker = PubSub::new();
    let server = Server::builder()
        .handle_pubsub("publish", publish_handler(broker))
        .build();

    let mut publisher = connect(&server).await;
    publisher
        .write_all(b"*3\r\n$7\r\nPUBLISH\r\n$5\r\nvoid!\r\n$1\r\nx\r\n")
        .await
        .unwrap();
    let reply = read_exact_len(&mut publisher, b":0\r\n".len()).await;
    assert_eq!(reply, b":0\r\n");
}
