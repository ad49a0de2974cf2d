//! WebSocket `Connector` implementation.
//!
//! ## 構成
//!
//! - `open()` で WebSocket を接続し、broker の `connected` フレームを待つ（ハンドシェイク）
//! - 接続ごとに 1 つの driver タスクが sink/stream と購読テーブルを所有する
//! - `WebSocketConnection` はコマンドチャネル経由で driver に指示するだけ
//!
//! 再接続は行わない。切断された接続は `Closed` のまま残る。

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use reqwest::Url;
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot, watch},
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message,
};

use crate::{
    client::connection::{
        ChannelEvent, Connection, ConnectionId, ConnectionState, Connector, EventHandler,
        ScopeKey, SubscriptionHandle, TransportError,
    },
    domain::Topic,
    infrastructure::dto::frame::{BrokerFrame, ClientFrame},
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Opens broker connections on one WebSocket endpoint.
pub struct WebSocketConnector {
    endpoint: String,
    handshake_timeout: Duration,
}

impl WebSocketConnector {
    /// # Arguments
    ///
    /// * `endpoint` - Broker URL, e.g. `ws://127.0.0.1:8087/ws`
    /// * `handshake_timeout` - How long to wait for the `connected` frame
    pub fn new(endpoint: impl Into<String>, handshake_timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            handshake_timeout,
        }
    }

    /// Endpoint with the credential appended as `?token=`.
    fn connection_url(&self, token: Option<&str>) -> Result<Url, TransportError> {
        let mut url = Url::parse(&self.endpoint).map_err(|e| TransportError::Connect {
            endpoint: self.endpoint.clone(),
            reason: e.to_string(),
        })?;
        if let Some(token) = token {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(url)
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(
        &self,
        scope: ScopeKey,
        token: Option<String>,
        lifecycle: EventHandler,
    ) -> Result<Box<dyn Connection>, TransportError> {
        let url = self.connection_url(token.as_deref())?;
        let id = ConnectionId::generate();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        tracing::info!("Opening connection {} for {} to {}", id, scope, self.endpoint);
        let (ws_stream, _response) =
            connect_async(url.as_str())
                .await
                .map_err(|e| TransportError::Connect {
                    endpoint: self.endpoint.clone(),
                    reason: e.to_string(),
                })?;
        let (mut sink, mut source) = ws_stream.split();

        match tokio::time::timeout(self.handshake_timeout, wait_for_connected(&mut source)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = sink.close().await;
                return Err(e);
            }
            Err(_) => {
                let _ = sink.close().await;
                return Err(TransportError::HandshakeTimeout(self.handshake_timeout));
            }
        }

        state_tx.send_replace(ConnectionState::Open);
        tracing::info!("Connection {} for {} is open", id, scope);

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        tokio::spawn(drive(id, sink, source, commands_rx, state_tx, lifecycle));

        Ok(Box::new(WebSocketConnection {
            id,
            scope,
            state: state_rx,
            commands: commands_tx,
            next_subscription: 0,
        }))
    }
}

async fn wait_for_connected(source: &mut WsSource) -> Result<(), TransportError> {
    while let Some(message) = source.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<BrokerFrame>(text.as_str()) {
                Ok(BrokerFrame::Connected { session }) => {
                    tracing::debug!("Broker handshake complete (session {:?})", session);
                    return Ok(());
                }
                Ok(BrokerFrame::Error { message }) => return Err(TransportError::Rejected(message)),
                Ok(other) => tracing::debug!("Ignoring frame before handshake: {:?}", other),
                Err(e) => tracing::warn!("Unparseable frame during handshake: {}", e),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => return Err(TransportError::Rejected(e.to_string())),
        }
    }
    Err(TransportError::Rejected(
        "connection closed during handshake".to_string(),
    ))
}

enum Command {
    Subscribe {
        id: String,
        topic: Topic,
        handler: EventHandler,
    },
    Unsubscribe {
        id: String,
    },
    Publish {
        topic: Topic,
        payload: serde_json::Value,
    },
    Close {
        done: oneshot::Sender<()>,
    },
}

async fn send_frame(sink: &mut WsSink, frame: &ClientFrame) -> Result<(), String> {
    let json = serde_json::to_string(frame).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json.into()))
        .await
        .map_err(|e| e.to_string())
}

/// Unregister every subscription, then close the socket.
async fn shutdown(sink: &mut WsSink, subscriptions: &mut HashMap<String, (Topic, EventHandler)>) {
    for (id, (topic, _)) in subscriptions.drain() {
        tracing::debug!("Unsubscribing {} ({})", id, topic);
        if send_frame(sink, &ClientFrame::Unsubscribe { id }).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}

/// Owns the socket halves and the subscription table of one connection.
async fn drive(
    id: ConnectionId,
    mut sink: WsSink,
    mut source: WsSource,
    mut commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
    lifecycle: EventHandler,
) {
    let mut subscriptions: HashMap<String, (Topic, EventHandler)> = HashMap::new();

    let reason = loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Subscribe { id: sub_id, topic, handler }) => {
                    let frame = ClientFrame::Subscribe {
                        id: sub_id.clone(),
                        topic: topic.as_str().to_string(),
                    };
                    subscriptions.insert(sub_id, (topic, handler));
                    if let Err(e) = send_frame(&mut sink, &frame).await {
                        break e;
                    }
                }
                Some(Command::Unsubscribe { id: sub_id }) => {
                    if subscriptions.remove(&sub_id).is_some()
                        && let Err(e) = send_frame(&mut sink, &ClientFrame::Unsubscribe { id: sub_id }).await
                    {
                        break e;
                    }
                }
                Some(Command::Publish { topic, payload }) => {
                    let frame = ClientFrame::Publish {
                        topic: topic.as_str().to_string(),
                        payload,
                    };
                    if let Err(e) = send_frame(&mut sink, &frame).await {
                        break e;
                    }
                }
                Some(Command::Close { done }) => {
                    shutdown(&mut sink, &mut subscriptions).await;
                    state.send_replace(ConnectionState::Closed);
                    tracing::info!("Connection {} closed", id);
                    let _ = done.send(());
                    return;
                }
                None => {
                    // handle dropped without close()
                    shutdown(&mut sink, &mut subscriptions).await;
                    state.send_replace(ConnectionState::Closed);
                    tracing::debug!("Connection {} released", id);
                    return;
                }
            },
            message = source.next() => match message {
                Some(Ok(Message::Text(text))) => dispatch(id, text.as_str(), &subscriptions),
                Some(Ok(Message::Close(_))) | None => break "closed by broker".to_string(),
                Some(Ok(_)) => {}
                Some(Err(e)) => break e.to_string(),
            },
        }
    };

    subscriptions.clear();
    state.send_replace(ConnectionState::Closed);
    tracing::warn!("Connection {} lost: {}", id, reason);
    let _ = lifecycle.send(ChannelEvent::Closed {
        connection: id,
        reason,
    });
}

fn dispatch(id: ConnectionId, text: &str, subscriptions: &HashMap<String, (Topic, EventHandler)>) {
    match serde_json::from_str::<BrokerFrame>(text) {
        Ok(BrokerFrame::Event {
            subscription,
            topic,
            payload,
        }) => match subscriptions.get(&subscription) {
            Some((_, handler)) => {
                let event = ChannelEvent::Delivered {
                    connection: id,
                    topic: Topic::from_wire(topic),
                    payload,
                };
                if handler.send(event).is_err() {
                    tracing::debug!("Handler for {} is gone", subscription);
                }
            }
            None => tracing::debug!("Event for unknown subscription {}", subscription),
        },
        Ok(BrokerFrame::Error { message }) => tracing::warn!("Broker error: {}", message),
        Ok(BrokerFrame::Connected { .. }) => {}
        Err(e) => tracing::warn!("Unparseable broker frame: {}", e),
    }
}

/// Handle to a connection driven by a background task.
pub struct WebSocketConnection {
    id: ConnectionId,
    scope: ScopeKey,
    state: watch::Receiver<ConnectionState>,
    commands: mpsc::UnboundedSender<Command>,
    next_subscription: u64,
}

impl WebSocketConnection {
    fn require_open(&self) -> Result<(), TransportError> {
        match self.state() {
            ConnectionState::Open => Ok(()),
            other => Err(TransportError::InvalidState(other)),
        }
    }

    fn send_command(&self, command: Command) -> Result<(), TransportError> {
        self.commands
            .send(command)
            .map_err(|_| TransportError::InvalidState(ConnectionState::Closed))
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn scope(&self) -> &ScopeKey {
        &self.scope
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn subscribe(
        &mut self,
        topic: Topic,
        handler: EventHandler,
    ) -> Result<SubscriptionHandle, TransportError> {
        self.require_open()?;
        let id = format!("sub-{}", self.next_subscription);
        self.next_subscription += 1;
        self.send_command(Command::Subscribe {
            id: id.clone(),
            topic: topic.clone(),
            handler,
        })?;
        tracing::debug!("Connection {} subscribed to {} as {}", self.id, topic, id);
        Ok(SubscriptionHandle { id, topic })
    }

    fn unsubscribe(&mut self, handle: &SubscriptionHandle) -> Result<(), TransportError> {
        self.require_open()?;
        self.send_command(Command::Unsubscribe {
            id: handle.id.clone(),
        })
    }

    fn publish(&self, topic: &Topic, payload: serde_json::Value) -> Result<(), TransportError> {
        self.require_open()?;
        self.send_command(Command::Publish {
            topic: topic.clone(),
            payload,
        })
    }

    async fn close(&mut self) {
        if self.state() == ConnectionState::Closed {
            return;
        }
        let (done_tx, done_rx) = oneshot::channel();
        if self.send_command(Command::Close { done: done_tx }).is_err() {
            return;
        }
        if tokio::time::timeout(CLOSE_TIMEOUT, done_rx).await.is_err() {
            tracing::warn!("Connection {} did not close within {:?}", self.id, CLOSE_TIMEOUT);
        }
    }
}
