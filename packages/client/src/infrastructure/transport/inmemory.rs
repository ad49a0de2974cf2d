//! In-process broker implementing `Connector`.
//!
//! Keeps an audit trail of every open/subscribe/publish/close so lifecycle
//! ordering can be asserted, and can route `chat/publish` to `room/{roomId}`
//! the way the real server does.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;

use crate::{
    client::connection::{
        ChannelEvent, Connection, ConnectionId, ConnectionState, Connector, EventHandler,
        ScopeKey, SubscriptionHandle, TransportError,
    },
    domain::{RoomId, Topic, topic::CHAT_PUBLISH_TOPIC},
};

/// Audit trail entry.
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerRecord {
    Opened {
        connection: ConnectionId,
        scope: ScopeKey,
    },
    Subscribed {
        connection: ConnectionId,
        topic: Topic,
    },
    Unsubscribed {
        connection: ConnectionId,
        topic: Topic,
    },
    Published {
        connection: ConnectionId,
        topic: Topic,
        payload: serde_json::Value,
    },
    Closed {
        connection: ConnectionId,
    },
}

struct Subscriber {
    topic: Topic,
    handler: EventHandler,
}

struct ConnectionEntry {
    scope: ScopeKey,
    lifecycle: EventHandler,
    subscriptions: HashMap<String, Subscriber>,
}

#[derive(Default)]
struct BrokerState {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    records: Vec<BrokerRecord>,
    tokens: Vec<Option<String>>,
    fail_next_open: Option<String>,
    route_chat_publish: bool,
    peak_room_connections: usize,
}

impl BrokerState {
    fn open_room_connections(&self) -> usize {
        self.connections
            .values()
            .filter(|entry| matches!(entry.scope, ScopeKey::Room(_)))
            .count()
    }

    fn deliver(&self, topic: &Topic, payload: &serde_json::Value) -> usize {
        let mut delivered = 0;
        for (id, entry) in &self.connections {
            for subscriber in entry.subscriptions.values() {
                if &subscriber.topic != topic {
                    continue;
                }
                let event = ChannelEvent::Delivered {
                    connection: *id,
                    topic: topic.clone(),
                    payload: payload.clone(),
                };
                if subscriber.handler.send(event).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    fn remove(&mut self, id: ConnectionId) -> Option<ConnectionEntry> {
        let entry = self.connections.remove(&id)?;
        for subscriber in entry.subscriptions.values() {
            self.records.push(BrokerRecord::Unsubscribed {
                connection: id,
                topic: subscriber.topic.clone(),
            });
        }
        self.records.push(BrokerRecord::Closed { connection: id });
        Some(entry)
    }
}

/// Shared handle to an in-process broker.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Echo payloads published on `chat/publish` to `room/{roomId}`.
    pub fn with_chat_routing(self) -> Self {
        self.lock().route_chat_publish = true;
        self
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `open` fail with a transport error.
    pub fn fail_next_open(&self, reason: impl Into<String>) {
        self.lock().fail_next_open = Some(reason.into());
    }

    /// Push `payload` to every subscriber of `topic`; returns how many received it.
    pub fn deliver(&self, topic: &Topic, payload: serde_json::Value) -> usize {
        self.lock().deliver(topic, &payload)
    }

    /// Simulate the transport dropping: the owner is told via its lifecycle handler.
    pub fn drop_connection(&self, id: ConnectionId) {
        let removed = self.lock().remove(id);
        if let Some(entry) = removed {
            let _ = entry.lifecycle.send(ChannelEvent::Closed {
                connection: id,
                reason: "transport dropped".to_string(),
            });
        }
    }

    pub fn records(&self) -> Vec<BrokerRecord> {
        self.lock().records.clone()
    }

    /// Payloads published on `topic`, in order.
    pub fn published(&self, topic: &Topic) -> Vec<serde_json::Value> {
        self.lock()
            .records
            .iter()
            .filter_map(|record| match record {
                BrokerRecord::Published {
                    topic: t, payload, ..
                } if t == topic => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    /// Currently open connections and their scopes.
    pub fn open_connections(&self) -> Vec<(ConnectionId, ScopeKey)> {
        self.lock()
            .connections
            .iter()
            .map(|(id, entry)| (*id, entry.scope.clone()))
            .collect()
    }

    /// Highest number of room-scoped connections that were open at the same time.
    pub fn peak_room_connections(&self) -> usize {
        self.lock().peak_room_connections
    }

    /// Tokens presented by each `open`, in order.
    pub fn tokens(&self) -> Vec<Option<String>> {
        self.lock().tokens.clone()
    }

    fn is_open(&self, id: ConnectionId) -> bool {
        self.lock().connections.contains_key(&id)
    }
}

#[async_trait]
impl Connector for InMemoryBroker {
    async fn open(
        &self,
        scope: ScopeKey,
        token: Option<String>,
        lifecycle: EventHandler,
    ) -> Result<Box<dyn Connection>, TransportError> {
        let mut state = self.lock();
        state.tokens.push(token);
        if let Some(reason) = state.fail_next_open.take() {
            return Err(TransportError::Connect {
                endpoint: "memory".to_string(),
                reason,
            });
        }

        let id = ConnectionId::generate();
        state.connections.insert(
            id,
            ConnectionEntry {
                scope: scope.clone(),
                lifecycle,
                subscriptions: HashMap::new(),
            },
        );
        state.records.push(BrokerRecord::Opened {
            connection: id,
            scope: scope.clone(),
        });
        state.peak_room_connections = state
            .peak_room_connections
            .max(state.open_room_connections());
        tracing::debug!("In-memory connection {} opened for {}", id, scope);

        Ok(Box::new(InMemoryConnection {
            id,
            scope,
            broker: self.clone(),
            next_subscription: 0,
        }))
    }
}

/// Connection handle into an `InMemoryBroker`.
pub struct InMemoryConnection {
    id: ConnectionId,
    scope: ScopeKey,
    broker: InMemoryBroker,
    next_subscription: u64,
}

#[async_trait]
impl Connection for InMemoryConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn scope(&self) -> &ScopeKey {
        &self.scope
    }

    fn state(&self) -> ConnectionState {
        if self.broker.is_open(self.id) {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    fn subscribe(
        &mut self,
        topic: Topic,
        handler: EventHandler,
    ) -> Result<SubscriptionHandle, TransportError> {
        let sub_id = format!("sub-{}", self.next_subscription);
        let mut state = self.broker.lock();
        let entry = state
            .connections
            .get_mut(&self.id)
            .ok_or(TransportError::InvalidState(ConnectionState::Closed))?;
        entry.subscriptions.insert(
            sub_id.clone(),
            Subscriber {
                topic: topic.clone(),
                handler,
            },
        );
        state.records.push(BrokerRecord::Subscribed {
            connection: self.id,
            topic: topic.clone(),
        });
        self.next_subscription += 1;
        Ok(SubscriptionHandle { id: sub_id, topic })
    }

    fn unsubscribe(&mut self, handle: &SubscriptionHandle) -> Result<(), TransportError> {
        let mut state = self.broker.lock();
        let entry = state
            .connections
            .get_mut(&self.id)
            .ok_or(TransportError::InvalidState(ConnectionState::Closed))?;
        if entry.subscriptions.remove(&handle.id).is_some() {
            state.records.push(BrokerRecord::Unsubscribed {
                connection: self.id,
                topic: handle.topic.clone(),
            });
        }
        Ok(())
    }

    fn publish(&self, topic: &Topic, payload: serde_json::Value) -> Result<(), TransportError> {
        let mut state = self.broker.lock();
        if !state.connections.contains_key(&self.id) {
            return Err(TransportError::InvalidState(ConnectionState::Closed));
        }
        state.records.push(BrokerRecord::Published {
            connection: self.id,
            topic: topic.clone(),
            payload: payload.clone(),
        });

        if state.route_chat_publish && topic.as_str() == CHAT_PUBLISH_TOPIC {
            let room = payload
                .get("roomId")
                .and_then(serde_json::Value::as_i64)
                .and_then(|id| RoomId::new(id).ok());
            if let Some(room_id) = room {
                state.deliver(&Topic::room(room_id), &payload);
            }
        }
        Ok(())
    }

    async fn close(&mut self) {
        if self.broker.lock().remove(self.id).is_some() {
            tracing::debug!("In-memory connection {} closed", self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    // ========================================
    // テスト作業記録
    // ========================================
    // 【何をテストするか】
    // - InMemoryBroker 上の接続の状態遷移（OPEN → CLOSED）
    // - CLOSED 接続での subscribe / publish の拒否
    // - close の冪等性と購読解除の順序
    // - chat/publish から room/{id} へのルーティング
    // ========================================

    fn room_scope(id: i64) -> ScopeKey {
        ScopeKey::Room(RoomId::new(id).unwrap())
    }

    #[tokio::test]
    async fn test_open_subscribe_and_deliver() {
        // テスト項目: 購読したトピックへの配信がハンドラに届く
        // given (前提条件):
        let broker = InMemoryBroker::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut conn = broker.open(room_scope(5), None, tx.clone()).await.unwrap();
        let topic = Topic::room(RoomId::new(5).unwrap());
        conn.subscribe(topic.clone(), tx).unwrap();

        // when (操作):
        let delivered = broker.deliver(&topic, json!({"id": 1}));

        // then (期待する結果):
        assert_eq!(delivered, 1);
        match rx.recv().await {
            Some(ChannelEvent::Delivered { connection, payload, .. }) => {
                assert_eq!(connection, conn.id());
                assert_eq!(payload, json!({"id": 1}));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_closed_connection_rejects_subscribe_and_publish() {
        // テスト項目: CLOSED の接続では subscribe / publish が InvalidState で失敗する
        // given (前提条件):
        let broker = InMemoryBroker::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut conn = broker.open(room_scope(5), None, tx.clone()).await.unwrap();
        conn.close().await;

        // when (操作):
        let sub = conn.subscribe(Topic::chat_publish(), tx);
        let publish = conn.publish(&Topic::chat_publish(), json!({}));

        // then (期待する結果):
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(matches!(sub, Err(TransportError::InvalidState(ConnectionState::Closed))));
        assert!(matches!(publish, Err(TransportError::InvalidState(ConnectionState::Closed))));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_unsubscribes_first() {
        // テスト項目: close は冪等で、購読解除がクローズより先に記録される
        // given (前提条件):
        let broker = InMemoryBroker::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut conn = broker.open(room_scope(5), None, tx.clone()).await.unwrap();
        conn.subscribe(Topic::room(RoomId::new(5).unwrap()), tx).unwrap();

        // when (操作):
        conn.close().await;
        conn.close().await;

        // then (期待する結果):
        let records = broker.records();
        let closes = records
            .iter()
            .filter(|r| matches!(r, BrokerRecord::Closed { .. }))
            .count();
        assert_eq!(closes, 1);
        assert!(matches!(records[records.len() - 2], BrokerRecord::Unsubscribed { .. }));
        assert!(matches!(records[records.len() - 1], BrokerRecord::Closed { .. }));
    }

    #[tokio::test]
    async fn test_chat_routing_echoes_to_room_topic() {
        // テスト項目: chat/publish への publish が room/{roomId} の購読者に配信される
        // given (前提条件):
        let broker = InMemoryBroker::new().with_chat_routing();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut conn = broker.open(room_scope(5), None, tx.clone()).await.unwrap();
        conn.subscribe(Topic::room(RoomId::new(5).unwrap()), tx).unwrap();

        // when (操作):
        conn.publish(&Topic::chat_publish(), json!({"roomId": 5, "type": "TEXT"}))
            .unwrap();

        // then (期待する結果):
        assert!(matches!(
            rx.recv().await,
            Some(ChannelEvent::Delivered { .. })
        ));
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        // テスト項目: unsubscribe 後はそのトピックへの配信が届かない
        // given (前提条件):
        let broker = InMemoryBroker::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut conn = broker.open(room_scope(5), None, tx.clone()).await.unwrap();
        let topic = Topic::room(RoomId::new(5).unwrap());
        let handle = conn.subscribe(topic.clone(), tx).unwrap();

        // when (操作):
        conn.unsubscribe(&handle).unwrap();
        let delivered = broker.deliver(&topic, json!({"id": 1}));

        // then (期待する結果):
        assert_eq!(delivered, 0);
        assert!(broker.records().contains(&BrokerRecord::Unsubscribed {
            connection: conn.id(),
            topic,
        }));
    }

    #[tokio::test]
    async fn test_failed_open_records_token_but_no_connection() {
        // テスト項目: 接続失敗時は TransportError となり接続は残らない
        // given (前提条件):
        let broker = InMemoryBroker::new();
        broker.fail_next_open("refused");
        let (tx, _rx) = mpsc::unbounded_channel();

        // when (操作):
        let result = broker.open(room_scope(5), Some("jwt".to_string()), tx).await;

        // then (期待する結果):
        assert!(matches!(result, Err(TransportError::Connect { .. })));
        assert!(broker.open_connections().is_empty());
        assert_eq!(broker.tokens(), vec![Some("jwt".to_string())]);
    }

    #[tokio::test]
    async fn test_drop_connection_notifies_lifecycle() {
        // テスト項目: トランスポート切断時にライフサイクルハンドラへ Closed が通知される
        // given (前提条件):
        let broker = InMemoryBroker::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = broker.open(room_scope(5), None, tx).await.unwrap();

        // when (操作):
        broker.drop_connection(conn.id());

        // then (期待する結果):
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(matches!(rx.recv().await, Some(ChannelEvent::Closed { .. })));
    }
}
