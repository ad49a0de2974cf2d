//! Chat session: the single task that owns both controllers.
//!
//! User commands, channel events and background fetch results are all fed
//! through one `select!` loop, so controller state is only ever touched from
//! this task. Room history is fetched in the background, so opening a room
//! never holds up notifications or logout. The view talks to it through `SessionHandle` and observes it
//! through the `SessionUpdate` stream.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::{
    client::{
        connection::{ChannelEvent, Connector, ScopeKey},
        history::RoomDetailUpdate,
        notification::{NotificationController, NotificationOutcome},
        room::{RoomController, RoomOpened, RoomUpdate},
        store::DuplicatePolicy,
    },
    domain::{
        ApiError, ChatApi, CredentialStore, FileUpload, Identity, LoginId, Message,
        NotificationEvent, NotificationSink, RoomId, RoomSnapshot, RoomSummary, UserSummary,
    },
    error::ClientError,
};

/// User intents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    OpenRoom(RoomId),
    /// Find or create the PRIVATE room with this user, then open it.
    OpenPrivateChat(LoginId),
    /// Create a GROUP room, then open it.
    CreateGroupRoom {
        room_name: Option<String>,
        members: Vec<LoginId>,
    },
    SendText(String),
    SendFile(FileUpload),
    SendTyping,
    LeaveRoom,
    ListRooms,
    ListUsers,
    /// Reopen the notification connection if it is no longer OPEN.
    RestartNotifications,
    Logout,
}

/// Everything the view needs to render.
#[derive(Debug)]
pub enum SessionUpdate {
    RoomOpened {
        snapshot: RoomSnapshot,
        messages: Vec<Message>,
    },
    RoomDetails(RoomSnapshot),
    MessageAppended(Message),
    Typing {
        room_id: RoomId,
        sender_name: String,
    },
    Notification(NotificationEvent),
    /// A send was refused; `text` is handed back so it can be offered again.
    SendRejected {
        text: Option<String>,
        error: ClientError,
    },
    RoomLeft(RoomId),
    Rooms(Vec<RoomSummary>),
    Users(Vec<UserSummary>),
    ConnectionLost {
        scope: ScopeKey,
        reason: String,
    },
    Error(ClientError),
    /// Terminal. `reason` is set when the session ended on a rejected credential.
    LoggedOut {
        reason: Option<ClientError>,
    },
}

impl From<RoomUpdate> for SessionUpdate {
    fn from(update: RoomUpdate) -> Self {
        match update {
            RoomUpdate::Appended(message) => Self::MessageAppended(message),
            RoomUpdate::Typing {
                room_id,
                sender_name,
                ..
            } => Self::Typing {
                room_id,
                sender_name,
            },
            RoomUpdate::Details(snapshot) => Self::RoomDetails(snapshot),
            RoomUpdate::ConnectionLost { room_id, reason } => Self::ConnectionLost {
                scope: ScopeKey::Room(room_id),
                reason,
            },
        }
    }
}

pub struct SessionDeps {
    pub identity: Identity,
    pub api: Arc<dyn ChatApi>,
    pub connector: Arc<dyn Connector>,
    pub credentials: Arc<dyn CredentialStore>,
    pub duplicate_policy: DuplicatePolicy,
}

/// Sending side of a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    /// Queue a command. Returns `false` once the session has ended.
    pub fn send(&self, command: SessionCommand) -> bool {
        self.commands.send(command).is_ok()
    }
}

/// Forwards accepted notifications into the update stream.
struct UpdateSink(mpsc::UnboundedSender<SessionUpdate>);

impl NotificationSink for UpdateSink {
    fn notify(&self, event: &NotificationEvent) {
        let _ = self.0.send(SessionUpdate::Notification(event.clone()));
    }
}

enum Input {
    Command(Option<SessionCommand>),
    Event(ChannelEvent),
    Detail(RoomDetailUpdate),
}

enum Flow {
    Continue,
    /// End the session; `Some` carries the error that forced it.
    Stop(Option<ClientError>),
}

pub struct ChatSession {
    identity: Identity,
    api: Arc<dyn ChatApi>,
    credentials: Arc<dyn CredentialStore>,
    room: RoomController,
    notifications: NotificationController,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    details: mpsc::UnboundedReceiver<RoomDetailUpdate>,
    updates: mpsc::UnboundedSender<SessionUpdate>,
}

impl ChatSession {
    pub fn new(
        deps: SessionDeps,
    ) -> (Self, SessionHandle, mpsc::UnboundedReceiver<SessionUpdate>) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let (details_tx, details) = mpsc::unbounded_channel();
        let (updates, updates_rx) = mpsc::unbounded_channel();

        let room = RoomController::new(
            deps.identity.clone(),
            deps.api.clone(),
            deps.connector.clone(),
            deps.credentials.clone(),
            events_tx.clone(),
            details_tx,
            deps.duplicate_policy,
        );
        let notifications = NotificationController::new(
            deps.identity.clone(),
            deps.connector,
            deps.credentials.clone(),
            events_tx,
            Arc::new(UpdateSink(updates.clone())),
        );

        let session = Self {
            identity: deps.identity,
            api: deps.api,
            credentials: deps.credentials,
            room,
            notifications,
            commands,
            events,
            details,
            updates,
        };
        let handle = SessionHandle {
            commands: commands_tx,
        };
        (session, handle, updates_rx)
    }

    /// Run until logout, a rejected credential, or every `SessionHandle` is dropped.
    pub async fn run(mut self) {
        tracing::info!("Session started for {}", self.identity.login_id);
        if let Err(e) = self.notifications.start().await {
            tracing::warn!("Notifications unavailable: {}", e);
            self.emit(SessionUpdate::Error(e));
        }

        loop {
            let input = tokio::select! {
                command = self.commands.recv() => Input::Command(command),
                Some(event) = self.events.recv() => Input::Event(event),
                Some(update) = self.details.recv() => Input::Detail(update),
            };

            let flow = match input {
                Input::Command(Some(command)) => self.handle_command(command).await,
                Input::Command(None) => Flow::Stop(None),
                Input::Event(event) => self.handle_channel_event(event),
                Input::Detail(update) => self.handle_detail(update).await,
            };

            if let Flow::Stop(reason) = flow {
                self.shutdown(reason).await;
                break;
            }
        }
    }

    fn emit(&self, update: SessionUpdate) {
        if self.updates.send(update).is_err() {
            tracing::debug!("Session update dropped: view is gone");
        }
    }

    /// Surface a failure; a rejected credential ends the session instead.
    fn report(&self, error: ClientError) -> Flow {
        if error.is_unauthorized() {
            return Flow::Stop(Some(error));
        }
        tracing::error!("{}", error);
        self.emit(SessionUpdate::Error(error));
        Flow::Continue
    }

    async fn handle_command(&mut self, command: SessionCommand) -> Flow {
        match command {
            SessionCommand::OpenRoom(room_id) => self.open_room(room_id).await,
            SessionCommand::OpenPrivateChat(friend) => {
                let resolved = self
                    .api
                    .find_private_room(self.identity.login_id.clone(), friend)
                    .await;
                self.open_resolved(resolved).await
            }
            SessionCommand::CreateGroupRoom { room_name, members } => {
                let resolved = self
                    .api
                    .create_group_room(self.identity.login_id.clone(), members, room_name)
                    .await;
                self.open_resolved(resolved).await
            }
            SessionCommand::SendText(text) => {
                if let Err(error) = self.room.send_text(&text) {
                    tracing::warn!("Message not sent: {}", error);
                    self.emit(SessionUpdate::SendRejected {
                        text: Some(text),
                        error,
                    });
                }
                Flow::Continue
            }
            SessionCommand::SendFile(upload) => match self.room.send_file(upload).await {
                Ok(()) => Flow::Continue,
                Err(error) if error.is_unauthorized() => Flow::Stop(Some(error)),
                Err(error) => {
                    tracing::warn!("File not sent: {}", error);
                    self.emit(SessionUpdate::SendRejected { text: None, error });
                    Flow::Continue
                }
            },
            SessionCommand::SendTyping => {
                if let Err(e) = self.room.send_typing() {
                    tracing::debug!("Typing indicator not sent: {}", e);
                }
                Flow::Continue
            }
            SessionCommand::LeaveRoom => match self.room.leave_room().await {
                Ok(room_id) => {
                    self.emit(SessionUpdate::RoomLeft(room_id));
                    Flow::Continue
                }
                Err(e) => self.report(e),
            },
            SessionCommand::ListRooms => match self.api.list_rooms(self.identity.id).await {
                Ok(rooms) => {
                    self.emit(SessionUpdate::Rooms(rooms));
                    Flow::Continue
                }
                Err(e) => self.report(ClientError::from_api(e, ClientError::Api)),
            },
            SessionCommand::ListUsers => match self.api.list_users().await {
                Ok(users) => {
                    let others = users
                        .into_iter()
                        .filter(|u| !self.identity.is_self(&u.login_id))
                        .collect();
                    self.emit(SessionUpdate::Users(others));
                    Flow::Continue
                }
                Err(e) => self.report(ClientError::from_api(e, ClientError::Api)),
            },
            SessionCommand::RestartNotifications => match self.notifications.start().await {
                Ok(()) => Flow::Continue,
                Err(e) => self.report(e),
            },
            SessionCommand::Logout => Flow::Stop(None),
        }
    }

    async fn open_resolved(&mut self, resolved: Result<RoomSummary, ApiError>) -> Flow {
        match resolved {
            Ok(summary) => self.open_room(summary.room_id).await,
            Err(e) => self.report(ClientError::from_api(e, ClientError::Api)),
        }
    }

    async fn open_room(&mut self, room_id: RoomId) -> Flow {
        self.room.open_room(room_id).await;
        Flow::Continue
    }

    /// Show a room whose history just came back.
    fn room_loaded(&self, opened: RoomOpened) -> Flow {
        let snapshot = self
            .room
            .snapshot()
            .cloned()
            .unwrap_or_else(|| RoomSnapshot::placeholder(opened.room_id));
        self.emit(SessionUpdate::RoomOpened {
            snapshot,
            messages: self.room.messages().to_vec(),
        });
        for error in [opened.history_error, opened.transport_error]
            .into_iter()
            .flatten()
        {
            self.emit(SessionUpdate::Error(error));
        }
        Flow::Continue
    }

    fn handle_channel_event(&mut self, event: ChannelEvent) -> Flow {
        let id = event.connection();
        if self.room.owns(id) {
            if let Some(update) = self.room.handle_event(event) {
                self.emit(update.into());
            }
        } else if self.notifications.owns(id) {
            if let NotificationOutcome::ConnectionLost(reason) =
                self.notifications.handle_event(event)
            {
                self.emit(SessionUpdate::ConnectionLost {
                    scope: ScopeKey::Global(self.identity.login_id.clone()),
                    reason,
                });
            }
        } else {
            tracing::debug!("Dropping event from retired connection {}", id);
        }
        Flow::Continue
    }

    async fn handle_detail(&mut self, update: RoomDetailUpdate) -> Flow {
        if update.detail.is_unauthorized() {
            return Flow::Stop(Some(ClientError::Unauthorized));
        }
        if update.detail.is_history() {
            return match self.room.apply_history(update).await {
                Some(opened) => self.room_loaded(opened),
                None => Flow::Continue,
            };
        }
        if let Some(update) = self.room.apply_detail(update) {
            self.emit(update.into());
        }
        Flow::Continue
    }

    /// Tear down both connections and forget the credential.
    async fn shutdown(&mut self, reason: Option<ClientError>) {
        self.room.close().await;
        self.notifications.stop().await;
        self.credentials.clear();
        match &reason {
            Some(e) => tracing::warn!("Session ended: {}", e),
            None => tracing::info!("Logged out"),
        }
        self.emit(SessionUpdate::LoggedOut { reason });
    }
}
