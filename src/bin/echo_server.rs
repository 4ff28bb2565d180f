//! A small demo server wiring up every built-in handler plus an in-memory
//! `GET`/`SET`, to exercise the library end to end. Grounded on
//! `example_test.go`'s `ExampleHandlerFunc`/`ExampleServer` composition and
//! `main.rs` for the CLI/tracing/shutdown-signal shape.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::Mutex;

use redeo_rs::info::ServerInfo;
use redeo_rs::pubsub::{PubSub, publish_handler, subscribe_handler};
use redeo_rs::resp::{AppError, Command, RequestWriter, ToResp};
use redeo_rs::server::{CommandDescription, Server, command_handler, echo_handler, info_handler, ping_handler};

#[derive(Parser, Debug)]
#[command(
    name = "echo-server",
    version,
    about = "Demo redeo-rs server: PING/ECHO/INFO/COMMAND plus an in-memory GET/SET and pub/sub"
)]
struct Args {
    /// Listen address, e.g. 127.0.0.1:6380
    #[arg(long, default_value = "127.0.0.1:6380")]
    listen: SocketAddr,
}

type Store = Arc<Mutex<HashMap<String, Vec<u8>>>>;

fn set_handler(store: Store) -> Arc<dyn redeo_rs::server::Handler<tokio::net::tcp::OwnedReadHalf, tokio::net::tcp::OwnedWriteHalf>> {
    use redeo_rs::server::HandlerFn;
    Arc::new(HandlerFn(move |w: &mut RequestWriter<tokio::net::tcp::OwnedWriteHalf>, cmd: &mut Command| {
        let store = store.clone();
        Box::pin(async move {
            let result: Result<(), AppError> = match (cmd.arg(0), cmd.arg(1)) {
                (Some(key), Some(val)) => {
                    store
                        .lock()
                        .await
                        .insert(String::from_utf8_lossy(key).into_owned(), val.to_vec());
                    Ok(())
                }
                _ => Err(AppError::new(
                    "wrong number of arguments for 'set' command",
                )),
            };
            let _ = result.to_resp(w).await;
        })
    }))
}

fn get_handler(store: Store) -> Arc<dyn redeo_rs::server::Handler<tokio::net::tcp::OwnedReadHalf, tokio::net::tcp::OwnedWriteHalf>> {
    use redeo_rs::server::HandlerFn;
    Arc::new(HandlerFn(move |w: &mut RequestWriter<tokio::net::tcp::OwnedWriteHalf>, cmd: &mut Command| {
        let store = store.clone();
        Box::pin(async move {
            match cmd.arg(0) {
                Some(key) => {
                    let value = store
                        .lock()
                        .await
                        .get(&String::from_utf8_lossy(key).into_owned())
                        .cloned();
                    match value {
                        Some(v) => w.append_bulk(&v),
                        None => w.append_nil(),
                    }
                }
                None => w.append_error("ERR wrong number of arguments for 'get' command"),
            }
        })
    }))
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    let info = Arc::new(ServerInfo::new(env!("CARGO_PKG_VERSION")));
    let broker = PubSub::new();
    let store: Store = Arc::new(Mutex::new(HashMap::new()));

    let descriptions = vec![
        CommandDescription::new("ping", -1).flags(["fast"]),
        CommandDescription::new("echo", 2).flags(["fast"]),
        CommandDescription::new("get", 2).flags(["readonly", "fast"]).keys(1, 1, 1),
        CommandDescription::new("set", 3).flags(["write"]).keys(1, 1, 1),
        CommandDescription::new("info", -1).flags(["loading", "stale"]),
        CommandDescription::new("command", -1).flags(["loading", "stale"]),
        CommandDescription::new("subscribe", -2).flags(["pubsub"]),
        CommandDescription::new("publish", 3).flags(["pubsub", "fast"]),
    ];

    let server = Server::builder()
        .with_info(info.clone())
        .handle("ping", ping_handler())
        .handle("echo", echo_handler())
        .handle("get", get_handler(store.clone()))
        .handle("set", set_handler(store.clone()))
        .handle("info", info_handler(info.clone()))
        .handle("command", command_handler(descriptions))
        .handle_pubsub("subscribe", subscribe_handler(broker.clone()))
        .handle_pubsub("publish", publish_handler(broker.clone()))
        .build();

    tracing::info!(listen = %args.listen, "echo-server listening");

    let accept = {
        let server = server.clone();
        tokio::spawn(async move { server.bind_tcp(args.listen).await })
    };

    shutdown_signal().await;
    tracing::info!("shutdown requested");
    server.shutdown();

    match accept.await {
        Ok(res) => res,
        Err(e) => {
            tracing::error!(error = %e, "accept loop task panicked");
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
}
