//! Global Notification Controller.
//!
//! One user-scoped connection for the whole logged-in session, independent of
//! which room is open. Notifications the user caused themselves are dropped.

use std::sync::Arc;

use crate::{
    client::connection::{
        ChannelEvent, Connection, ConnectionId, ConnectionState, Connector, EventHandler,
        ScopeKey,
    },
    domain::{CredentialStore, Identity, NotificationEvent, NotificationSink, Topic},
    error::ClientError,
    infrastructure::dto::rest::NotificationDto,
};

/// What became of an event from the notification connection.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationOutcome {
    Forwarded(NotificationEvent),
    /// Caused by the current user.
    Suppressed,
    /// Undecodable or from a connection this controller no longer owns.
    Ignored,
    ConnectionLost(String),
}

pub struct NotificationController {
    identity: Identity,
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialStore>,
    events: EventHandler,
    sink: Arc<dyn NotificationSink>,
    connection: Option<Box<dyn Connection>>,
}

impl NotificationController {
    pub fn new(
        identity: Identity,
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialStore>,
        events: EventHandler,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            identity,
            connector,
            credentials,
            events,
            sink,
            connection: None,
        }
    }

    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.connection.as_ref().map(|c| c.state())
    }

    pub fn owns(&self, id: ConnectionId) -> bool {
        self.connection.as_ref().is_some_and(|c| c.id() == id)
    }

    /// Open and subscribe the per-user notification topic.
    ///
    /// A no-op while the current connection is OPEN; a closed one is replaced.
    pub async fn start(&mut self) -> Result<(), ClientError> {
        if self.connection.as_ref().is_some_and(|c| c.is_open()) {
            return Ok(());
        }
        self.stop().await;

        let login_id = self.identity.login_id.clone();
        let mut connection = self
            .connector
            .open(
                ScopeKey::Global(login_id.clone()),
                self.credentials.credential(),
                self.events.clone(),
            )
            .await?;
        if let Err(e) = connection.subscribe(Topic::notifications(&login_id), self.events.clone())
        {
            connection.close().await;
            return Err(e.into());
        }

        tracing::info!(
            "Notifications for {} live on connection {}",
            login_id,
            connection.id()
        );
        self.connection = Some(connection);
        Ok(())
    }

    pub fn handle_event(&mut self, event: ChannelEvent) -> NotificationOutcome {
        if !self.owns(event.connection()) {
            return NotificationOutcome::Ignored;
        }

        match event {
            ChannelEvent::Delivered { payload, .. } => {
                let notification = match decode_notification(payload) {
                    Ok(notification) => notification,
                    Err(e) => {
                        tracing::warn!("Undecodable notification: {}", e);
                        return NotificationOutcome::Ignored;
                    }
                };
                if self.identity.is_self(&notification.sender) {
                    tracing::debug!("Suppressing own notification in room {}", notification.room_id);
                    return NotificationOutcome::Suppressed;
                }
                self.sink.notify(&notification);
                NotificationOutcome::Forwarded(notification)
            }
            ChannelEvent::Closed { reason, .. } => {
                tracing::warn!("Notification stream closed: {}", reason);
                NotificationOutcome::ConnectionLost(reason)
            }
        }
    }

    /// Close the notification connection. Idempotent.
    pub async fn stop(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
            tracing::info!("Notifications stopped");
        }
    }
}

fn decode_notification(payload: serde_json::Value) -> Result<NotificationEvent, String> {
    let dto: NotificationDto = serde_json::from_value(payload).map_err(|e| e.to_string())?;
    NotificationEvent::try_from(dto).map_err(|e| e.to_string())
}
