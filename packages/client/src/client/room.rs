//! Room Lifecycle Controller.
//!
//! Owns at most one room-scoped connection. A room change always closes the
//! previous connection and drops the previous store before anything for the
//! new room is set up, so there is no window with two subscribed rooms.
//!
//! Every activation gets a new generation number; fetch results and channel
//! events that belong to an older activation are discarded on arrival.
//!
//! Opening is split in two. `open_room` closes the old room and starts the
//! fetches; `apply_history` loads the snapshot and opens the live stream once
//! the history of the current activation comes back.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::{
    client::{
        connection::{
            ChannelEvent, Connection, ConnectionId, ConnectionState, Connector, EventHandler,
            ScopeKey, TransportError,
        },
        history::{HistoryFetcher, RoomDetail, RoomDetailUpdate, history_fetch_error},
        store::{AppendOutcome, DuplicatePolicy, RoomMessageStore},
    },
    domain::{
        ChatApi, CredentialStore, FileUpload, Identity, LoginId, Message, MessageType, RoomId,
        RoomKind, RoomSnapshot, Topic,
    },
    error::ClientError,
    infrastructure::dto::rest::MessageDto,
};

/// Outcome of loading a room's history. The room is active even when either error is set.
#[derive(Debug)]
pub struct RoomOpened {
    pub room_id: RoomId,
    pub generation: u64,
    /// History could not be loaded; the log starts empty.
    pub history_error: Option<ClientError>,
    /// The live stream could not be opened; only history is shown.
    pub transport_error: Option<ClientError>,
}

/// View-relevant effect of an event on the active room.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomUpdate {
    Appended(Message),
    Typing {
        room_id: RoomId,
        sender: LoginId,
        sender_name: String,
    },
    Details(RoomSnapshot),
    ConnectionLost {
        room_id: RoomId,
        reason: String,
    },
}

struct ActiveRoom {
    generation: u64,
    snapshot: RoomSnapshot,
    store: RoomMessageStore,
    /// History has been applied and the live stream attempted.
    loaded: bool,
    connection: Option<Box<dyn Connection>>,
}

impl ActiveRoom {
    fn room_id(&self) -> RoomId {
        self.snapshot.room_id
    }

    fn owns(&self, id: ConnectionId) -> bool {
        self.connection.as_ref().is_some_and(|c| c.id() == id)
    }
}

pub struct RoomController {
    identity: Identity,
    api: Arc<dyn ChatApi>,
    history: HistoryFetcher,
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialStore>,
    events: EventHandler,
    details: mpsc::UnboundedSender<RoomDetailUpdate>,
    policy: DuplicatePolicy,
    generation: u64,
    active: Option<ActiveRoom>,
}

impl RoomController {
    /// # Arguments
    ///
    /// * `events` - Where room connections deliver messages and lifecycle events
    /// * `details` - Where background metadata/participant fetches report
    pub fn new(
        identity: Identity,
        api: Arc<dyn ChatApi>,
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialStore>,
        events: EventHandler,
        details: mpsc::UnboundedSender<RoomDetailUpdate>,
        policy: DuplicatePolicy,
    ) -> Self {
        Self {
            history: HistoryFetcher::new(api.clone()),
            identity,
            api,
            connector,
            credentials,
            events,
            details,
            policy,
            generation: 0,
            active: None,
        }
    }

    pub fn active_room(&self) -> Option<RoomId> {
        self.active.as_ref().map(ActiveRoom::room_id)
    }

    pub fn snapshot(&self) -> Option<&RoomSnapshot> {
        self.active.as_ref().map(|a| &a.snapshot)
    }

    /// Log of the active room; empty when no room is open.
    pub fn messages(&self) -> &[Message] {
        self.active
            .as_ref()
            .map(|a| a.store.messages())
            .unwrap_or_default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.active
            .as_ref()
            .and_then(|a| a.connection.as_ref())
            .map(|c| c.id())
    }

    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.active
            .as_ref()
            .and_then(|a| a.connection.as_ref())
            .map(|c| c.state())
    }

    /// Whether `id` is the current room connection.
    pub fn owns(&self, id: ConnectionId) -> bool {
        self.active.as_ref().is_some_and(|a| a.owns(id))
    }

    /// Switch to `room_id` and start its fetches. Returns the new generation.
    ///
    /// The previous connection is closed and its store dropped before
    /// anything for the new room starts. Until `apply_history` runs the room
    /// has an empty log and no connection.
    pub async fn open_room(&mut self, room_id: RoomId) -> u64 {
        self.close().await;

        self.generation += 1;
        let generation = self.generation;
        tracing::info!("Opening room {} (generation {})", room_id, generation);

        self.active = Some(ActiveRoom {
            generation,
            snapshot: RoomSnapshot::placeholder(room_id),
            store: RoomMessageStore::new(room_id, self.policy),
            loaded: false,
            connection: None,
        });
        self.history.spawn(room_id, generation, self.details.clone());
        generation
    }

    /// Load the history of the active activation, then open and subscribe the
    /// live stream. The stream is opened even when the history failed.
    ///
    /// Returns `None` for anything other than the first history result of the
    /// current activation.
    pub async fn apply_history(&mut self, update: RoomDetailUpdate) -> Option<RoomOpened> {
        let RoomDetail::Messages(result) = update.detail else {
            return None;
        };
        let active = self.active.as_mut()?;
        if update.generation != active.generation || active.loaded {
            tracing::debug!(
                "Discarding stale history for room {} (generation {})",
                update.room_id,
                update.generation
            );
            return None;
        }
        let room_id = active.room_id();

        let history_error = match result {
            Ok(messages) => {
                active.store.load(messages);
                None
            }
            Err(e) => Some(history_fetch_error(e)),
        };
        active.loaded = true;

        // no point subscribing with a credential the server just rejected
        let skip_live = history_error
            .as_ref()
            .is_some_and(ClientError::is_unauthorized);
        let transport_error = if skip_live {
            None
        } else {
            match self.open_connection(room_id).await {
                Ok(connection) => {
                    if let Some(active) = self.active.as_mut() {
                        active.connection = Some(connection);
                    }
                    None
                }
                Err(e) => {
                    tracing::warn!("Room {} has no live stream: {}", room_id, e);
                    Some(e)
                }
            }
        };

        Some(RoomOpened {
            room_id,
            generation: update.generation,
            history_error,
            transport_error,
        })
    }

    async fn open_connection(&self, room_id: RoomId) -> Result<Box<dyn Connection>, ClientError> {
        let token = self.credentials.credential();
        let mut connection = self
            .connector
            .open(ScopeKey::Room(room_id), token, self.events.clone())
            .await?;
        if let Err(e) = connection.subscribe(Topic::room(room_id), self.events.clone()) {
            connection.close().await;
            return Err(e.into());
        }
        tracing::info!("Room {} live on connection {}", room_id, connection.id());
        Ok(connection)
    }

    /// Apply a metadata/participant result if it belongs to the active activation.
    ///
    /// The snapshot is always updated; a `Details` update is only returned once
    /// the room has been shown.
    pub fn apply_detail(&mut self, update: RoomDetailUpdate) -> Option<RoomUpdate> {
        let Some(active) = self.active.as_mut() else {
            tracing::debug!("Discarding details for room {}: no room open", update.room_id);
            return None;
        };
        if update.generation != active.generation {
            tracing::debug!(
                "Discarding stale details for room {} (generation {} != {})",
                update.room_id,
                update.generation,
                active.generation
            );
            return None;
        }

        match update.detail {
            RoomDetail::Metadata(Ok(metadata)) => active.snapshot.apply_metadata(metadata),
            RoomDetail::Participants(Ok(participants)) => {
                active.snapshot.participants = participants
            }
            // logged by the fetcher; defaults stay
            RoomDetail::Metadata(Err(_)) | RoomDetail::Participants(Err(_)) => return None,
            RoomDetail::Messages(_) => return None,
        }
        // before the history lands, the snapshot goes out with `RoomOpened`
        active
            .loaded
            .then(|| RoomUpdate::Details(active.snapshot.clone()))
    }

    /// Apply an event from the room connection.
    pub fn handle_event(&mut self, event: ChannelEvent) -> Option<RoomUpdate> {
        let active = self.active.as_mut()?;
        if !active.owns(event.connection()) {
            tracing::debug!("Dropping event from retired connection {}", event.connection());
            return None;
        }
        let room_id = active.room_id();

        match event {
            ChannelEvent::Delivered { payload, .. } => {
                let message = match decode_message(payload) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!("Undecodable message in room {}: {}", room_id, e);
                        return None;
                    }
                };
                if message.room_id != room_id {
                    tracing::warn!(
                        "Message for room {} arrived on room {} stream",
                        message.room_id,
                        room_id
                    );
                    return None;
                }

                if message.kind == MessageType::Typing {
                    if self.identity.is_self(&message.sender) {
                        return None;
                    }
                    return Some(RoomUpdate::Typing {
                        room_id,
                        sender: message.sender,
                        sender_name: message.sender_name,
                    });
                }

                match active.store.append(message.clone()) {
                    AppendOutcome::Appended => Some(RoomUpdate::Appended(message)),
                    AppendOutcome::SkippedDuplicate | AppendOutcome::RejectedTyping => None,
                }
            }
            ChannelEvent::Closed { reason, .. } => {
                tracing::warn!("Room {} stream closed: {}", room_id, reason);
                Some(RoomUpdate::ConnectionLost { room_id, reason })
            }
        }
    }

    fn require_active(&self) -> Result<&ActiveRoom, ClientError> {
        self.active.as_ref().ok_or(ClientError::NoActiveRoom)
    }

    fn require_connected(&self) -> Result<(&ActiveRoom, &dyn Connection), ClientError> {
        let active = self.require_active()?;
        match active.connection.as_deref() {
            Some(connection) if connection.is_open() => Ok((active, connection)),
            _ => Err(ClientError::NotConnected),
        }
    }

    /// Publish `payload` on `chat/publish` through the room connection. Never queued.
    fn publish(&self, payload: serde_json::Value) -> Result<(), ClientError> {
        let (_, connection) = self.require_connected()?;
        connection
            .publish(&Topic::chat_publish(), payload)
            .map_err(|e| match e {
                TransportError::InvalidState(_) => ClientError::NotConnected,
                other => other.into(),
            })
    }

    fn publish_message(&self, message: &Message) -> Result<(), ClientError> {
        let payload =
            serde_json::to_value(MessageDto::from(message)).map_err(TransportError::from)?;
        self.publish(payload)
    }

    fn outgoing(&self, kind: MessageType, text: String) -> Result<Message, ClientError> {
        let room_id = self.require_active()?.room_id();
        Ok(Message::outgoing(room_id, kind, &self.identity, text))
    }

    /// Publish a TEXT message. The log is only updated when the room echoes it.
    pub fn send_text(&self, text: &str) -> Result<(), ClientError> {
        if text.trim().is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        let message = self.outgoing(MessageType::Text, text.to_string())?;
        self.publish_message(&message)
    }

    /// Publish a TYPING event.
    pub fn send_typing(&self) -> Result<(), ClientError> {
        let message = self.outgoing(MessageType::Typing, String::new())?;
        self.publish_message(&message)
    }

    /// Upload a file and publish the returned FILE descriptor exactly as received.
    ///
    /// Nothing is uploaded without an OPEN connection, and nothing is published
    /// if the upload fails.
    pub async fn send_file(&self, upload: FileUpload) -> Result<(), ClientError> {
        let (active, _) = self.require_connected()?;
        let room_id = active.room_id();

        let uploaded = self
            .api
            .upload_file(room_id, self.identity.login_id.clone(), upload)
            .await
            .map_err(|e| ClientError::from_api(e, ClientError::Upload))?;
        if uploaded.message.kind != MessageType::File {
            return Err(ClientError::UnexpectedUpload(uploaded.message.kind));
        }

        tracing::info!("Publishing uploaded file to room {}", room_id);
        self.publish(uploaded.raw)
    }

    /// Leave the active room.
    ///
    /// The REST leave goes first. Only after it succeeds is a LEAVE message
    /// published (GROUP rooms only) and the connection closed.
    pub async fn leave_room(&mut self) -> Result<RoomId, ClientError> {
        let active = self.require_active()?;
        let room_id = active.room_id();
        let kind = active
            .snapshot
            .kind
            .ok_or(ClientError::RoomKindUnknown(room_id))?;

        self.api
            .leave_room(room_id, self.identity.login_id.clone(), kind)
            .await
            .map_err(|e| ClientError::from_api(e, ClientError::Api))?;

        if kind == RoomKind::Group {
            let notice = self.outgoing(
                MessageType::Leave,
                format!("{} left the room.", self.identity.display_name),
            )?;
            if let Err(e) = self.publish_message(&notice) {
                tracing::warn!("LEAVE for room {} not published: {}", room_id, e);
            }
        }

        self.close().await;
        tracing::info!("Left room {}", room_id);
        Ok(room_id)
    }

    /// Close the room connection and drop the store. Idempotent.
    pub async fn close(&mut self) {
        if let Some(mut active) = self.active.take() {
            if let Some(connection) = active.connection.as_mut() {
                connection.close().await;
            }
            tracing::info!("Room {} closed", active.room_id());
        }
    }
}

fn decode_message(payload: serde_json::Value) -> Result<Message, String> {
    let dto: MessageDto = serde_json::from_value(payload).map_err(|e| e.to_string())?;
    Message::try_from(dto).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{
            ApiError, FileDescriptor, MessageBody, MessageId, RoomMetadata, UploadedFile, UserId,
            gateway::MockChatApi,
        },
        infrastructure::{
            credential::MemoryCredentialStore,
            transport::{BrokerRecord, InMemoryBroker},
        },
    };
    use serde_json::json;

    // ========================================
    // テスト作業記録
    // ========================================
    // 【何をテストするか】
    // - ルーム切替時の「旧接続クローズ → ストア破棄 → 履歴 → 新接続」の順序
    // - 履歴 N 件 + ライブ K 件の到着順保持
    // - 旧世代のイベント・詳細情報の破棄
    // - 送信の前提条件（OPEN でなければ NotConnected、ローカル挿入なし）
    // - 退出プロトコル（GROUP は LEAVE 1 件、PRIVATE は 0 件）
    // - アップロード結果の無加工 publish
    // ========================================

    fn room(id: i64) -> RoomId {
        RoomId::new(id).unwrap()
    }

    fn me() -> Identity {
        Identity::new(UserId::new(1), LoginId::new("alice").unwrap(), "Alice")
    }

    fn text_message(id: i64, room_id: i64, sender: &str, text: &str) -> Message {
        Message {
            id: Some(MessageId::new(id)),
            room_id: room(room_id),
            kind: MessageType::Text,
            sender: LoginId::new(sender).unwrap(),
            sender_name: sender.to_string(),
            body: MessageBody::Text(text.to_string()),
            timestamp: Some(1_700_000_000_000 + id),
        }
    }

    fn typing_from(room_id: i64, sender: &str) -> Message {
        Message {
            id: None,
            room_id: room(room_id),
            kind: MessageType::Typing,
            sender: LoginId::new(sender).unwrap(),
            sender_name: sender.to_string(),
            body: MessageBody::Text(String::new()),
            timestamp: None,
        }
    }

    fn wire(message: &Message) -> serde_json::Value {
        serde_json::to_value(MessageDto::from(message)).unwrap()
    }

    /// History per room from `history`, metadata of kind `kind`, no participants.
    fn api_with(history: Vec<Message>, kind: RoomKind) -> MockChatApi {
        let mut api = MockChatApi::new();
        api.expect_fetch_messages().returning(move |room_id| {
            Ok(history
                .iter()
                .filter(|m| m.room_id == room_id)
                .cloned()
                .collect())
        });
        api.expect_fetch_room().returning(move |room_id| {
            Ok(RoomMetadata {
                room_id,
                room_name: format!("room-{}", room_id),
                kind,
            })
        });
        api.expect_fetch_participants().returning(|_| Ok(vec![]));
        api
    }

    struct Harness {
        controller: RoomController,
        broker: InMemoryBroker,
        events: mpsc::UnboundedReceiver<ChannelEvent>,
        details: mpsc::UnboundedReceiver<RoomDetailUpdate>,
        /// Metadata/participant results received while waiting for history.
        pending: Vec<RoomDetailUpdate>,
    }

    impl Harness {
        fn new(api: MockChatApi) -> Self {
            Self::with_token(api, None)
        }

        fn with_token(api: MockChatApi, token: Option<&str>) -> Self {
            let broker = InMemoryBroker::new().with_chat_routing();
            let (events_tx, events) = mpsc::unbounded_channel();
            let (details_tx, details) = mpsc::unbounded_channel();
            let controller = RoomController::new(
                me(),
                Arc::new(api),
                Arc::new(broker.clone()),
                Arc::new(MemoryCredentialStore::new(token.map(str::to_string))),
                events_tx,
                details_tx,
                DuplicatePolicy::Preserve,
            );
            Self {
                controller,
                broker,
                events,
                details,
                pending: Vec::new(),
            }
        }

        /// Open `room_id` and wait until its history is loaded and the live
        /// stream attempted.
        async fn open(&mut self, room_id: RoomId) -> RoomOpened {
            self.controller.open_room(room_id).await;
            loop {
                let update = self.details.recv().await.unwrap();
                if !update.detail.is_history() {
                    self.pending.push(update);
                } else if let Some(opened) = self.controller.apply_history(update).await {
                    return opened;
                }
            }
        }

        /// Feed every queued channel event to the controller.
        fn pump(&mut self) -> Vec<RoomUpdate> {
            let mut updates = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                updates.extend(self.controller.handle_event(event));
            }
            updates
        }

        /// Wait for both detail fetches of the current activation and apply them.
        async fn settle_details(&mut self) {
            let generation = self.controller.generation();
            let mut pending = std::mem::take(&mut self.pending).into_iter();
            let mut applied = 0;
            while applied < 2 {
                let update = match pending.next() {
                    Some(update) => update,
                    None => self.details.recv().await.unwrap(),
                };
                if update.generation == generation && !update.detail.is_history() {
                    applied += 1;
                }
                self.controller.apply_detail(update);
            }
        }
    }

    #[tokio::test]
    async fn test_room_switch_closes_previous_connection_first() {
        // テスト項目: A → B → A の切替で同時に開いているルーム接続は常に 1 本以下
        // given (前提条件):
        let mut h = Harness::new(api_with(vec![], RoomKind::Group));

        // when (操作):
        let mut ids = Vec::new();
        for id in [5, 7, 5] {
            h.open(room(id)).await;
            ids.push(h.controller.connection_id().unwrap());
        }

        // then (期待する結果):
        assert_eq!(h.broker.peak_room_connections(), 1);
        assert_ne!(ids[0], ids[2]);
        let lifecycle: Vec<_> = h
            .broker
            .records()
            .into_iter()
            .filter_map(|r| match r {
                BrokerRecord::Opened { connection, .. } => Some(("open", connection)),
                BrokerRecord::Closed { connection } => Some(("close", connection)),
                _ => None,
            })
            .collect();
        assert_eq!(
            lifecycle,
            vec![
                ("open", ids[0]),
                ("close", ids[0]),
                ("open", ids[1]),
                ("close", ids[1]),
                ("open", ids[2]),
            ]
        );
        assert_eq!(h.controller.generation(), 3);
    }

    #[tokio::test]
    async fn test_history_then_live_messages_keep_arrival_order() {
        // テスト項目: 履歴 [1] の後にライブ 2 が届くとログは [1, 2]
        // given (前提条件):
        let history = vec![text_message(1, 5, "bob", "first")];
        let mut h = Harness::new(api_with(history, RoomKind::Group));
        h.open(room(5)).await;

        // when (操作):
        let live = text_message(2, 5, "bob", "second");
        h.broker.deliver(&Topic::room(room(5)), wire(&live));
        let updates = h.pump();

        // then (期待する結果):
        assert_eq!(updates, vec![RoomUpdate::Appended(live.clone())]);
        let ids: Vec<_> = h.controller.messages().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![Some(MessageId::new(1)), Some(MessageId::new(2))]);
    }

    #[tokio::test]
    async fn test_events_from_previous_room_are_discarded() {
        // テスト項目: ルーム 7 へ切替後、ルーム 5 の接続から来たイベントはログに入らない
        // given (前提条件):
        let mut h = Harness::new(api_with(vec![], RoomKind::Group));
        h.open(room(5)).await;
        let old = h.controller.connection_id().unwrap();
        h.open(room(7)).await;

        // when (操作):
        let update = h.controller.handle_event(ChannelEvent::Delivered {
            connection: old,
            topic: Topic::room(room(5)),
            payload: wire(&text_message(9, 5, "bob", "late")),
        });

        // then (期待する結果):
        assert_eq!(update, None);
        assert!(h.controller.messages().is_empty());
        assert_eq!(h.controller.active_room(), Some(room(7)));
    }

    #[tokio::test]
    async fn test_stale_details_are_discarded() {
        // テスト項目: 旧世代のメタデータ取得結果は現在のルームに反映されない
        // given (前提条件):
        let mut h = Harness::new(api_with(vec![], RoomKind::Group));
        h.open(room(5)).await;
        h.open(room(7)).await;

        // when (操作):
        let update = h.controller.apply_detail(RoomDetailUpdate {
            room_id: room(5),
            generation: 1,
            detail: RoomDetail::Metadata(Ok(RoomMetadata {
                room_id: room(5),
                room_name: "old".to_string(),
                kind: RoomKind::Private,
            })),
        });

        // then (期待する結果):
        assert_eq!(update, None);
        let snapshot = h.controller.snapshot().unwrap();
        assert_eq!(snapshot.room_id, room(7));
        assert_ne!(snapshot.room_name, "old");
    }

    #[tokio::test]
    async fn test_superseded_history_is_discarded() {
        // テスト項目: 切替前のルームの履歴が後から届いても、ログにも接続にも反映されない
        // given (前提条件):
        let mut h = Harness::new(api_with(vec![], RoomKind::Group));
        h.controller.open_room(room(5)).await;
        h.controller.open_room(room(7)).await;

        // when (操作):
        let opened = h
            .controller
            .apply_history(RoomDetailUpdate {
                room_id: room(5),
                generation: 1,
                detail: RoomDetail::Messages(Ok(vec![text_message(1, 5, "bob", "old")])),
            })
            .await;

        // then (期待する結果):
        assert!(opened.is_none());
        assert!(h.controller.messages().is_empty());
        assert!(h.broker.open_connections().is_empty());
        assert_eq!(h.controller.active_room(), Some(room(7)));
    }

    #[tokio::test]
    async fn test_room_is_not_live_until_history_arrives() {
        // テスト項目: 履歴が届くまでは接続を開かず、送信は NotConnected になる
        // given (前提条件):
        let mut h = Harness::new(api_with(vec![], RoomKind::Group));

        // when (操作):
        let generation = h.controller.open_room(room(5)).await;
        let result = h.controller.send_text("too early");

        // then (期待する結果):
        assert_eq!(generation, 1);
        assert_eq!(h.controller.active_room(), Some(room(5)));
        assert!(h.broker.open_connections().is_empty());
        assert!(matches!(result, Err(ClientError::NotConnected)));
    }

    #[tokio::test]
    async fn test_details_before_history_are_held_back() {
        // テスト項目: 履歴より先に届いたメタデータはスナップショットに反映されるが、更新通知は出ない
        // given (前提条件):
        let mut h = Harness::new(api_with(vec![], RoomKind::Group));
        let generation = h.controller.open_room(room(5)).await;

        // when (操作):
        let update = h.controller.apply_detail(RoomDetailUpdate {
            room_id: room(5),
            generation,
            detail: RoomDetail::Metadata(Ok(RoomMetadata {
                room_id: room(5),
                room_name: "early".to_string(),
                kind: RoomKind::Group,
            })),
        });

        // then (期待する結果):
        assert_eq!(update, None);
        assert_eq!(h.controller.snapshot().unwrap().room_name, "early");
    }

    #[tokio::test]
    async fn test_current_details_fill_snapshot() {
        // テスト項目: 現世代のメタデータでルーム名と種別が埋まる
        // given (前提条件):
        let mut h = Harness::new(api_with(vec![], RoomKind::Private));
        h.open(room(5)).await;

        // when (操作):
        h.settle_details().await;

        // then (期待する結果):
        let snapshot = h.controller.snapshot().unwrap();
        assert_eq!(snapshot.room_name, "room-5");
        assert_eq!(snapshot.kind, Some(RoomKind::Private));
    }

    #[tokio::test]
    async fn test_history_failure_still_opens_live_stream() {
        // テスト項目: 履歴取得に失敗してもライブ接続は開かれ、ログは空から始まる
        // given (前提条件):
        let mut api = MockChatApi::new();
        api.expect_fetch_messages().returning(|_| {
            Err(ApiError::Status {
                status: 500,
                path: "/api/chat/rooms/5/messages".to_string(),
            })
        });
        api.expect_fetch_room()
            .returning(|_| Err(ApiError::Request("down".to_string())));
        api.expect_fetch_participants()
            .returning(|_| Err(ApiError::Request("down".to_string())));
        let mut h = Harness::new(api);

        // when (操作):
        let opened = h.open(room(5)).await;
        h.broker
            .deliver(&Topic::room(room(5)), wire(&text_message(3, 5, "bob", "hi")));
        h.pump();

        // then (期待する結果):
        assert!(matches!(opened.history_error, Some(ClientError::HistoryFetch(_))));
        assert!(opened.transport_error.is_none());
        assert_eq!(h.controller.connection_state(), Some(ConnectionState::Open));
        assert_eq!(h.controller.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_unauthorized_history_skips_live_stream() {
        // テスト項目: 履歴取得が 401 の場合は接続を開かない
        // given (前提条件):
        let mut api = MockChatApi::new();
        api.expect_fetch_messages()
            .returning(|_| Err(ApiError::Unauthorized(401)));
        api.expect_fetch_room()
            .returning(|_| Err(ApiError::Unauthorized(401)));
        api.expect_fetch_participants()
            .returning(|_| Err(ApiError::Unauthorized(401)));
        let mut h = Harness::new(api);

        // when (操作):
        let opened = h.open(room(5)).await;

        // then (期待する結果):
        assert!(matches!(opened.history_error, Some(ClientError::Unauthorized)));
        assert!(h.broker.open_connections().is_empty());
    }

    #[tokio::test]
    async fn test_connection_presents_credential() {
        // テスト項目: 接続時に認証トークンが提示される
        // given (前提条件):
        let mut h = Harness::with_token(api_with(vec![], RoomKind::Group), Some("jwt-1"));

        // when (操作):
        h.open(room(5)).await;

        // then (期待する結果):
        assert_eq!(h.broker.tokens(), vec![Some("jwt-1".to_string())]);
    }

    #[tokio::test]
    async fn test_send_text_without_connection_is_not_connected() {
        // テスト項目: 接続が無い状態での送信は NotConnected で、何も publish されずログも不変
        // given (前提条件):
        let history = vec![text_message(1, 5, "bob", "first")];
        let mut h = Harness::new(api_with(history, RoomKind::Group));
        h.broker.fail_next_open("refused");
        let opened = h.open(room(5)).await;

        // when (操作):
        let result = h.controller.send_text("hello");

        // then (期待する結果):
        assert!(matches!(opened.transport_error, Some(ClientError::Transport(_))));
        assert!(matches!(result, Err(ClientError::NotConnected)));
        assert!(h.broker.published(&Topic::chat_publish()).is_empty());
        assert_eq!(h.controller.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_send_text_is_only_logged_when_echoed() {
        // テスト項目: 送信したメッセージはエコーが届いて初めてログに載る
        // given (前提条件):
        let mut h = Harness::new(api_with(vec![], RoomKind::Group));
        h.open(room(5)).await;

        // when (操作):
        h.controller.send_text("hello").unwrap();
        let before_echo = h.controller.messages().len();
        h.pump();

        // then (期待する結果):
        assert_eq!(before_echo, 0);
        let published = h.broker.published(&Topic::chat_publish());
        assert_eq!(published.len(), 1);
        assert_eq!(published[0]["type"], "TEXT");
        assert_eq!(published[0]["sender"], "alice");
        let log = h.controller.messages();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].body.text(), Some("hello"));
    }

    #[tokio::test]
    async fn test_blank_text_is_rejected() {
        // テスト項目: 空白のみのメッセージは送信されない
        // given (前提条件):
        let mut h = Harness::new(api_with(vec![], RoomKind::Group));
        h.open(room(5)).await;

        // when (操作):
        let result = h.controller.send_text("   ");

        // then (期待する結果):
        assert!(matches!(result, Err(ClientError::EmptyMessage)));
        assert!(h.broker.published(&Topic::chat_publish()).is_empty());
    }

    #[tokio::test]
    async fn test_send_without_room_is_rejected() {
        // テスト項目: ルーム未選択での送信は NoActiveRoom
        // given (前提条件):
        let h = Harness::new(MockChatApi::new());

        // when (操作):
        let result = h.controller.send_text("hello");

        // then (期待する結果):
        assert!(matches!(result, Err(ClientError::NoActiveRoom)));
    }

    #[tokio::test]
    async fn test_typing_is_never_logged() {
        // テスト項目: TYPING はログに入らず、他人のものだけが通知される
        // given (前提条件):
        let mut h = Harness::new(api_with(vec![], RoomKind::Group));
        h.open(room(5)).await;

        // when (操作):
        h.broker
            .deliver(&Topic::room(room(5)), wire(&typing_from(5, "bob")));
        h.controller.send_typing().unwrap();
        let updates = h.pump();

        // then (期待する結果):
        assert_eq!(
            updates,
            vec![RoomUpdate::Typing {
                room_id: room(5),
                sender: LoginId::new("bob").unwrap(),
                sender_name: "bob".to_string(),
            }]
        );
        assert!(h.controller.messages().is_empty());
    }

    #[tokio::test]
    async fn test_connection_loss_is_reported() {
        // テスト項目: トランスポート切断で ConnectionLost が通知され、以降の送信は NotConnected
        // given (前提条件):
        let mut h = Harness::new(api_with(vec![], RoomKind::Group));
        h.open(room(5)).await;
        let id = h.controller.connection_id().unwrap();

        // when (操作):
        h.broker.drop_connection(id);
        let updates = h.pump();

        // then (期待する結果):
        assert!(matches!(
            updates.as_slice(),
            [RoomUpdate::ConnectionLost { .. }]
        ));
        assert_eq!(
            h.controller.connection_state(),
            Some(ConnectionState::Closed)
        );
        assert!(matches!(
            h.controller.send_text("hi"),
            Err(ClientError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_group_leave_publishes_one_leave_before_close() {
        // テスト項目: GROUP ルームの退出は REST 成功後に LEAVE を 1 件だけ publish し、その後クローズする
        // given (前提条件):
        let mut api = api_with(vec![], RoomKind::Group);
        api.expect_leave_room()
            .times(1)
            .returning(|_, _, _| Ok(()));
        let mut h = Harness::new(api);
        h.open(room(5)).await;
        h.settle_details().await;
        let id = h.controller.connection_id().unwrap();

        // when (操作):
        let result = h.controller.leave_room().await;

        // then (期待する結果):
        assert_eq!(result.unwrap(), room(5));
        let published = h.broker.published(&Topic::chat_publish());
        assert_eq!(published.len(), 1);
        assert_eq!(published[0]["type"], "LEAVE");
        assert_eq!(published[0]["roomId"], 5);

        let records = h.broker.records();
        let publish_at = records
            .iter()
            .position(|r| matches!(r, BrokerRecord::Published { .. }))
            .unwrap();
        let close_at = records
            .iter()
            .position(|r| *r == BrokerRecord::Closed { connection: id })
            .unwrap();
        assert!(publish_at < close_at);
        assert_eq!(h.controller.active_room(), None);
    }

    #[tokio::test]
    async fn test_private_leave_publishes_nothing() {
        // テスト項目: PRIVATE ルームの退出では LEAVE を publish しない
        // given (前提条件):
        let mut api = api_with(vec![], RoomKind::Private);
        api.expect_leave_room()
            .times(1)
            .returning(|_, _, _| Ok(()));
        let mut h = Harness::new(api);
        h.open(room(5)).await;
        h.settle_details().await;

        // when (操作):
        let result = h.controller.leave_room().await;

        // then (期待する結果):
        assert!(result.is_ok());
        assert!(h.broker.published(&Topic::chat_publish()).is_empty());
        assert!(h.broker.open_connections().is_empty());
    }

    #[tokio::test]
    async fn test_leave_with_unknown_kind_is_refused() {
        // テスト項目: ルーム種別が未取得の場合は退出 API を呼ばずにエラー
        // given (前提条件):
        let mut api = api_with(vec![], RoomKind::Group);
        api.expect_leave_room().never();
        let mut h = Harness::new(api);
        h.open(room(5)).await;

        // when (操作):
        let result = h.controller.leave_room().await;

        // then (期待する結果):
        assert!(matches!(result, Err(ClientError::RoomKindUnknown(id)) if id == room(5)));
        assert_eq!(h.controller.active_room(), Some(room(5)));
    }

    #[tokio::test]
    async fn test_leave_failure_keeps_room_open() {
        // テスト項目: 退出 API の失敗時は LEAVE も送らず接続も維持する
        // given (前提条件):
        let mut api = api_with(vec![], RoomKind::Group);
        api.expect_leave_room().returning(|_, _, _| {
            Err(ApiError::Status {
                status: 500,
                path: "/api/chatRoom".to_string(),
            })
        });
        let mut h = Harness::new(api);
        h.open(room(5)).await;
        h.settle_details().await;

        // when (操作):
        let result = h.controller.leave_room().await;

        // then (期待する結果):
        assert!(matches!(result, Err(ClientError::Api(_))));
        assert!(h.broker.published(&Topic::chat_publish()).is_empty());
        assert_eq!(h.controller.connection_state(), Some(ConnectionState::Open));
    }

    fn uploaded(room_id: i64) -> UploadedFile {
        let message = Message {
            id: Some(MessageId::new(40)),
            room_id: room(room_id),
            kind: MessageType::File,
            sender: LoginId::new("alice").unwrap(),
            sender_name: "Alice".to_string(),
            body: MessageBody::File(FileDescriptor {
                url: "/files/cat.png".to_string(),
                name: Some("cat.png".to_string()),
                mime_type: Some("image/png".to_string()),
            }),
            timestamp: Some(1_700_000_000_040),
        };
        let mut raw = wire(&message);
        raw["thumbnail"] = json!("/files/cat.thumb.png");
        UploadedFile { message, raw }
    }

    fn picked_file() -> FileUpload {
        FileUpload {
            file_name: "cat.png".to_string(),
            mime_type: "image/png".to_string(),
            bytes: vec![0x89, 0x50, 0x4e, 0x47],
        }
    }

    #[tokio::test]
    async fn test_upload_publishes_server_response_verbatim() {
        // テスト項目: アップロード応答はそのまま publish され、エコーまでログに載らない
        // given (前提条件):
        let mut api = api_with(vec![], RoomKind::Group);
        let response = uploaded(5);
        let raw = response.raw.clone();
        api.expect_upload_file()
            .times(1)
            .returning(move |_, _, _| Ok(response.clone()));
        let mut h = Harness::new(api);
        h.open(room(5)).await;

        // when (操作):
        h.controller.send_file(picked_file()).await.unwrap();
        let before_echo = h.controller.messages().len();
        h.pump();

        // then (期待する結果):
        assert_eq!(before_echo, 0);
        assert_eq!(h.broker.published(&Topic::chat_publish()), vec![raw]);
        let log = h.controller.messages();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].kind, MessageType::File);
    }

    #[tokio::test]
    async fn test_upload_requires_open_connection() {
        // テスト項目: 接続が無い場合はアップロード自体を行わない
        // given (前提条件):
        let mut api = api_with(vec![], RoomKind::Group);
        api.expect_upload_file().never();
        let mut h = Harness::new(api);
        h.broker.fail_next_open("refused");
        h.open(room(5)).await;

        // when (操作):
        let result = h.controller.send_file(picked_file()).await;

        // then (期待する結果):
        assert!(matches!(result, Err(ClientError::NotConnected)));
    }

    #[tokio::test]
    async fn test_upload_failure_publishes_nothing() {
        // テスト項目: アップロード失敗時は何も publish しない
        // given (前提条件):
        let mut api = api_with(vec![], RoomKind::Group);
        api.expect_upload_file().returning(|_, _, _| {
            Err(ApiError::Status {
                status: 413,
                path: "/api/chat/upload".to_string(),
            })
        });
        let mut h = Harness::new(api);
        h.open(room(5)).await;

        // when (操作):
        let result = h.controller.send_file(picked_file()).await;

        // then (期待する結果):
        assert!(matches!(result, Err(ClientError::Upload(_))));
        assert!(h.broker.published(&Topic::chat_publish()).is_empty());
    }
}
