#![allow(dead_code)]

use std::{net::SocketAddr, time::Duration};

use anyhow::{Context, Result, anyhow};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::{
    io::{AsyncBufReadExt, BufReader, DuplexStream},
    net::{TcpListener, TcpStream},
    sync::oneshot,
    task::JoinHandle,
    time::timeout,
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use ws_chat::{console::Console, relay::Relay};

pub const READ_TIMEOUT: Duration = Duration::from_secs(3);

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// In-process relay bound to an ephemeral port.
pub struct TestRelay {
    pub addr: SocketAddr,
    pub url: String,
    shutdown: oneshot::Sender<()>,
    server: JoinHandle<()>,
}

impl TestRelay {
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let relay = Relay::new(listener);
        let addr = relay.local_addr()?;
        let url = format!("ws://{addr}");

        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.await;
            };
            let _ = relay.run_until(shutdown).await;
        });

        Ok(Self {
            addr,
            url,
            shutdown,
            server,
        })
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.server.await;
    }
}

pub async fn connect(url: &str) -> Result<Client> {
    let (client, _response) = connect_async(url)
        .await
        .with_context(|| format!("failed to connect to {url}"))?;
    Ok(client)
}

pub async fn send_json(client: &mut Client, value: Value) -> Result<()> {
    client.send(Message::text(value.to_string())).await?;
    Ok(())
}

pub async fn send_raw(client: &mut Client, text: &str) -> Result<()> {
    client.send(Message::text(text.to_string())).await?;
    Ok(())
}

/// Next text frame as JSON, skipping control frames. `None` once closed.
pub async fn recv_json(client: &mut Client) -> Result<Option<Value>> {
    loop {
        let frame = timeout(READ_TIMEOUT, client.next())
            .await
            .map_err(|_| anyhow!("timed out waiting for frame"))?;
        match frame {
            Some(Ok(Message::Text(text))) => return Ok(Some(serde_json::from_str(text.as_str())?)),
            Some(Ok(Message::Close(_))) | None => return Ok(None),
            Some(Ok(_)) => continue,
            Some(Err(_)) => return Ok(None),
        }
    }
}

pub async fn expect_json(client: &mut Client, description: &str) -> Result<Value> {
    recv_json(client)
        .await?
        .ok_or_else(|| anyhow!("{description}: connection closed"))
}

/// Authenticates a raw client and consumes its own join notice.
pub async fn join(url: &str, user: &str) -> Result<Client> {
    let mut client = connect(url).await?;
    send_json(&mut client, json!({"token": format!("token-{user}")})).await?;

    let reply = expect_json(&mut client, "waiting for auth reply").await?;
    if reply["type"] != "auth_success" {
        return Err(anyhow!("{user} was not authenticated: {reply}"));
    }

    let joined = expect_json(&mut client, "waiting for own join notice").await?;
    assert_eq!(
        joined,
        json!({"from": "SYSTEM", "to": null, "content": format!("{user} joined the chat")})
    );
    Ok(client)
}

pub fn system(content: &str) -> Value {
    json!({"from": "SYSTEM", "to": null, "content": content})
}

/// Console writing into an in-memory pipe, with a line reader for the other end.
pub fn captured_console() -> (Console, BufReader<DuplexStream>) {
    let (writer, reader) = tokio::io::duplex(64 * 1024);
    (Console::new(writer, false), BufReader::new(reader))
}

/// Reads console lines until `expected` shows up, returning everything seen.
pub async fn wait_for_line(
    reader: &mut BufReader<DuplexStream>,
    expected: &str,
) -> Result<Vec<String>> {
    let mut seen = Vec::new();
    loop {
        let mut line = String::new();
        let bytes = timeout(READ_TIMEOUT, reader.read_line(&mut line))
            .await
            .map_err(|_| anyhow!("timed out waiting for '{expected}', saw {seen:?}"))??;
        if bytes == 0 {
            return Err(anyhow!("console closed before '{expected}', saw {seen:?}"));
        }
        let line = line.trim_end_matches(['\r', '\n']).to_string();
        let found = line == expected;
        seen.push(line);
        if found {
            return Ok(seen);
        }
    }
}
