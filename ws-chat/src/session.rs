use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    select,
    sync::mpsc,
    time::timeout,
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{self, Message},
};
use tracing::{debug, info, warn};

use crate::{
    console::Console,
    credentials::Username,
    envelope::{AuthReply, AuthRequest, ChatDelivery, decode, encode, frame_text},
    error::{ChatError, is_connection_closed},
    input::Command,
};

pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:8080";
/// Overrides the relay address without changing the command line.
pub const SERVER_URL_ENV: &str = "WS_CHAT_SERVER_URL";

const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(10);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

pub type Connection = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub server_url: String,
    /// Upper bound on the wait for the relay's answer to our token.
    pub auth_timeout: Duration,
}

impl SessionConfig {
    pub fn from_env() -> Self {
        let server_url = std::env::var(SERVER_URL_ENV)
            .ok()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());
        Self {
            server_url,
            ..Self::default()
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Active,
    Closing,
    Closed,
}

impl SessionState {
    pub fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;

        matches!(
            (self, next),
            (Connecting, Authenticating)
                | (Connecting, Closed)
                | (Authenticating, Active)
                | (Authenticating, Closed)
                | (Active, Closing)
                | (Closing, Closed)
        )
    }
}

/// One user's connection to the relay, from dial to disconnect.
pub struct ChatSession {
    username: Username,
    config: SessionConfig,
    console: Console,
    state: SessionState,
}

impl ChatSession {
    pub fn new(username: Username, config: SessionConfig, console: Console) -> Self {
        Self {
            username,
            config,
            console,
            state: SessionState::Connecting,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn username(&self) -> Username {
        self.username
    }

    /// Connects, authenticates and then chats until the user quits or the
    /// relay hangs up.
    pub async fn run(mut self, lines: mpsc::Receiver<String>) -> Result<(), ChatError> {
        let mut connection = self.connect().await?;
        self.authenticate(&mut connection).await?;
        self.console.line("Authentication successful!").await?;
        self.chat(connection, lines).await
    }

    pub async fn connect(&mut self) -> Result<Connection, ChatError> {
        let url = self.config.server_url.clone();
        match connect_async(url.as_str()).await {
            Ok((connection, _response)) => {
                info!(%url, user = %self.username, "connected");
                self.advance(SessionState::Authenticating);
                self.console
                    .line(&format!("Connected to server as {}", self.username))
                    .await?;
                Ok(connection)
            }
            Err(err) => {
                self.advance(SessionState::Closed);
                Err(ChatError::Connection(format!(
                    "failed to connect to {url}: {err}"
                )))
            }
        }
    }

    /// Presents our token and waits for exactly one reply.
    pub async fn authenticate<S>(
        &mut self,
        connection: &mut WebSocketStream<S>,
    ) -> Result<(), ChatError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let outcome = self.exchange_token(connection).await;
        match &outcome {
            Ok(()) => self.advance(SessionState::Active),
            Err(error) => {
                debug!(%error, "authentication did not complete");
                self.advance(SessionState::Closed);
            }
        }
        outcome
    }

    async fn exchange_token<S>(&self, connection: &mut WebSocketStream<S>) -> Result<(), ChatError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let request = AuthRequest {
            token: self.username.token().to_string(),
        };
        connection.send(encode(&request)?).await?;
        debug!(user = %self.username, "sent auth token");

        let reply = timeout(self.config.auth_timeout, next_text(connection))
            .await
            .map_err(|_| {
                ChatError::Connection("timed out waiting for authentication reply".into())
            })??
            .ok_or_else(|| {
                ChatError::Connection("connection closed before authentication reply".into())
            })?;

        let reply: AuthReply = decode(&reply)?;
        if reply.is_failure() {
            return Err(ChatError::Auth(reply.message.unwrap_or_default()));
        }
        Ok(())
    }

    /// Runs both loops over an authenticated connection. Whichever loop ends
    /// first takes the other down with it.
    pub async fn chat<S>(
        &mut self,
        connection: WebSocketStream<S>,
        mut lines: mpsc::Receiver<String>,
    ) -> Result<(), ChatError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut sink, stream) = connection.split();
        let mut receiver = tokio::spawn(receive_loop(stream, self.console.clone()));

        let outcome = select! {
            sent = send_loop(&mut sink, &mut lines, &self.console) => {
                receiver.abort();
                match sent {
                    Ok(()) => self.console.line("Disconnecting...").await.map_err(ChatError::from),
                    Err(error) => Err(error),
                }
            }
            received = &mut receiver => {
                received.unwrap_or_else(|err| {
                    Err(ChatError::Connection(format!("receive task failed: {err}")))
                })
            }
        };

        self.advance(SessionState::Closing);
        match timeout(CLOSE_TIMEOUT, sink.close()).await {
            Ok(Ok(())) => debug!("close frame sent"),
            Ok(Err(error)) => debug!(%error, "connection already closed"),
            Err(_) => warn!("timed out sending close frame"),
        }
        self.advance(SessionState::Closed);

        outcome
    }

    fn advance(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal session transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(from = ?self.state, to = ?next, "session state");
        self.state = next;
    }
}

/// Prints every inbound envelope until the relay closes the connection.
pub async fn receive_loop<St>(mut stream: St, console: Console) -> Result<(), ChatError>
where
    St: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(text) = next_text(&mut stream).await? {
        match decode::<ChatDelivery>(&text) {
            Ok(delivery) => {
                console.notice(&delivery.classify().to_string()).await?;
                console.prompt().await?;
            }
            Err(error) => warn!(%error, frame = %text, "skipping malformed envelope"),
        }
    }

    console.notice("Connection closed by server").await?;
    Ok(())
}

/// Turns terminal lines into outbound envelopes until `/quit` or end of
/// input.
pub async fn send_loop<Si>(
    sink: &mut Si,
    lines: &mut mpsc::Receiver<String>,
    console: &Console,
) -> Result<(), ChatError>
where
    Si: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        console.prompt().await?;
        let Some(line) = lines.recv().await else {
            debug!("terminal input closed");
            return Ok(());
        };

        match Command::parse(&line) {
            Ok(Command::Quit) => return Ok(()),
            Ok(Command::Send(request)) => {
                if let Err(error) = sink.send(encode(&request)?).await {
                    if is_connection_closed(&error) {
                        debug!("relay closed the connection while sending");
                        return Ok(());
                    }
                    return Err(error.into());
                }
            }
            Err(error) => console.line(&error.to_string()).await?,
        }
    }
}

/// Next text frame, skipping control frames. `None` once the peer is gone.
async fn next_text<St>(stream: &mut St) -> Result<Option<String>, ChatError>
where
    St: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Close(_)) => return Ok(None),
            Ok(frame) => {
                if let Some(text) = frame_text(&frame) {
                    return Ok(Some(text.to_string()));
                }
            }
            Err(error) if is_connection_closed(&error) => return Ok(None),
            Err(error) => return Err(error.into()),
        }
    }
    Ok(None)
}
