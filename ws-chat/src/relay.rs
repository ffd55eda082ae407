use std::{collections::HashMap, future::Future, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use futures_util::{SinkExt, Stream, StreamExt, stream::SplitSink};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    sync::{Mutex, mpsc},
    task::JoinSet,
    time::timeout,
};
use tokio_tungstenite::{
    WebSocketStream, accept_async,
    tungstenite::{self, Message},
};
use tracing::{debug, info, warn};

use crate::{
    credentials::Username,
    envelope::{AuthReply, AuthRequest, ChatDelivery, ChatRequest, decode, encode, frame_text},
};

/// How long shutdown waits for queued notices to reach clients.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

type Outbox = mpsc::UnboundedSender<ChatDelivery>;
type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Accepts WebSocket clients and routes chat between authenticated users.
pub struct Relay {
    listener: TcpListener,
    state: Arc<RelayState>,
}

impl Relay {
    pub fn new(listener: TcpListener) -> Self {
        Self {
            listener,
            state: Arc::new(RelayState::default()),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Relay { listener, state } = self;
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("relay shutting down");
                    state.disconnect_all("relay shutting down").await;
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => spawn_connection(&mut connections, stream, peer, &state),
                    Err(err) => warn!(error = ?err, "failed to accept connection"),
                },
                Some(joined) = connections.join_next() => {
                    if let Err(err) = joined {
                        warn!(error = ?err, "connection task failed");
                    }
                }
            }
        }

        // Writers flush their queues and send a close frame once their
        // outbox is gone. Anything still running after the grace period is
        // aborted when the set drops.
        let drained = timeout(SHUTDOWN_GRACE, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = connections.len(),
                "connections still open at shutdown"
            );
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn spawn_connection(
    connections: &mut JoinSet<()>,
    stream: TcpStream,
    peer: SocketAddr,
    state: &Arc<RelayState>,
) {
    let state = Arc::clone(state);
    connections.spawn(async move {
        if let Err(err) = handle_connection(stream, peer, state).await {
            warn!(%peer, error = ?err, "client connection closed with error");
        }
    });
}

#[derive(Default)]
struct RelayState {
    clients: Mutex<HashMap<Username, Outbox>>,
}

#[derive(Debug, PartialEq, Eq)]
enum RegisterError {
    AlreadyConnected,
}

impl RelayState {
    async fn register(&self, user: Username, outbox: Outbox) -> Result<(), RegisterError> {
        let mut clients = self.clients.lock().await;
        if clients.contains_key(&user) {
            return Err(RegisterError::AlreadyConnected);
        }
        clients.insert(user, outbox);
        Ok(())
    }

    async fn remove(&self, user: Username) -> bool {
        self.clients.lock().await.remove(&user).is_some()
    }

    /// Queues a final notice for every client and drops their outboxes.
    async fn disconnect_all(&self, text: &str) {
        let notice = ChatDelivery::system(text);
        for (_, outbox) in self.clients.lock().await.drain() {
            let _ = outbox.send(notice.clone());
        }
    }

    async fn broadcast_system(&self, text: &str) {
        let notice = ChatDelivery::system(text);
        for outbox in self.clients.lock().await.values() {
            let _ = outbox.send(notice.clone());
        }
    }

    /// Direct messages reach only their target (or bounce back to the sender
    /// as a notice); broadcasts reach everyone except the sender.
    async fn route(&self, from: Username, request: ChatRequest) {
        let clients = self.clients.lock().await;
        let ChatRequest { to, content } = request;

        match to {
            Some(target) => {
                let recipient = target
                    .parse::<Username>()
                    .ok()
                    .and_then(|user| clients.get(&user));
                match recipient {
                    Some(outbox) => {
                        let _ = outbox.send(ChatDelivery {
                            from: from.to_string(),
                            to: Some(target),
                            content,
                        });
                    }
                    None => {
                        debug!(%from, %target, "direct message target offline");
                        if let Some(outbox) = clients.get(&from) {
                            let _ = outbox.send(ChatDelivery::system_to(
                                from.as_str(),
                                format!("User '{target}' not found or offline"),
                            ));
                        }
                    }
                }
            }
            None => {
                let delivery = ChatDelivery {
                    from: from.to_string(),
                    to: None,
                    content,
                };
                for (user, outbox) in clients.iter() {
                    if *user != from {
                        let _ = outbox.send(delivery.clone());
                    }
                }
            }
        }
    }

    async fn reply_to(&self, user: Username, delivery: ChatDelivery) {
        if let Some(outbox) = self.clients.lock().await.get(&user) {
            let _ = outbox.send(delivery);
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<RelayState>,
) -> Result<()> {
    let connection = accept_async(stream).await?;
    let (mut sink, mut stream) = connection.split();

    let Some(user) = authenticate(&mut sink, &mut stream).await? else {
        debug!(%peer, "rejected client");
        return Ok(());
    };

    let welcome = encode(&AuthReply::success())?;
    let (outbox, inbox) = mpsc::unbounded_channel();
    if state.register(user, outbox).await.is_err() {
        sink.send(encode(&AuthReply::failed(format!(
            "{user} is already connected"
        )))?)
        .await?;
        return Ok(());
    }
    // From here on every exit must release the username.
    if let Err(err) = sink.send(welcome).await {
        state.remove(user).await;
        return Err(err.into());
    }

    info!(%peer, %user, "client joined");
    state.broadcast_system(&format!("{user} joined the chat")).await;

    let mut writer = tokio::spawn(forward_deliveries(sink, inbox));
    let reader = read_requests(&mut stream, user, &state);

    let writer_finished = select! {
        _ = reader => {
            debug!(%user, "client stopped sending");
            false
        }
        _ = &mut writer => {
            debug!(%user, "client stopped receiving");
            true
        }
    };

    if state.remove(user).await {
        info!(%peer, %user, "client disconnected");
        state.broadcast_system(&format!("{user} left the chat")).await;
    }
    // Removing the outbox ends the writer once its queue drains.
    if !writer_finished {
        let _ = writer.await;
    }

    Ok(())
}

/// The first text frame must carry a known token.
async fn authenticate<St>(sink: &mut WsSink, stream: &mut St) -> Result<Option<Username>>
where
    St: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let first = match stream.next().await {
        Some(Ok(frame)) => frame,
        Some(Err(err)) => return Err(err.into()),
        None => return Ok(None),
    };

    let user = frame_text(&first)
        .and_then(|text| decode::<AuthRequest>(text).ok())
        .and_then(|request| Username::from_token(&request.token));

    if user.is_none() {
        sink.send(encode(&AuthReply::failed("Invalid token"))?).await?;
    }
    Ok(user)
}

async fn read_requests<St>(stream: &mut St, user: Username, state: &RelayState)
where
    St: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(Ok(frame)) = stream.next().await {
        let Some(text) = frame_text(&frame) else {
            if frame.is_close() {
                break;
            }
            continue;
        };

        match decode::<ChatRequest>(text) {
            Ok(request) => state.route(user, request).await,
            Err(err) => {
                warn!(%user, error = %err, "failed to parse message");
                state
                    .reply_to(
                        user,
                        ChatDelivery::system_to(
                            user.as_str(),
                            format!("Invalid message format: {err}"),
                        ),
                    )
                    .await;
            }
        }
    }
}

async fn forward_deliveries(mut sink: WsSink, mut inbox: mpsc::UnboundedReceiver<ChatDelivery>) {
    while let Some(delivery) = inbox.recv().await {
        let frame = match encode(&delivery) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "failed to encode delivery");
                continue;
            }
        };
        if let Err(err) = sink.send(frame).await {
            debug!(?err, "failed to deliver message to client");
            break;
        }
    }
    let _ = sink.close().await;
}
