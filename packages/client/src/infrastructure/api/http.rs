//! `reqwest` implementation of `ChatApi`.
//!
//! Every request carries `Authorization: Bearer <token>` when a credential is
//! present. 401 and 403 become `ApiError::Unauthorized`. Every request is
//! bounded by the configured timeout.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, multipart};
use serde::de::DeserializeOwned;

use crate::{
    domain::{
        ApiError, ChatApi, CredentialStore, FileUpload, LoginId, Message, Participant, RoomId,
        RoomKind, RoomMetadata, RoomSummary, UploadedFile, UserId, UserSummary,
    },
    infrastructure::dto::rest::{
        CreateGroupRoomRequest, FindPrivateRoomRequest, LeaveRoomRequest, MessageDto,
        ParticipantDto, RoomDto, UserDto,
    },
};

/// Chat REST client bound to one server.
pub struct HttpChatApi {
    base_url: String,
    client: Client,
    credentials: Arc<dyn CredentialStore>,
}

impl HttpChatApi {
    /// # Arguments
    ///
    /// * `base_url` - Server origin, e.g. `http://127.0.0.1:8087`
    /// * `credentials` - Source of the bearer token
    /// * `timeout` - Upper bound for each request, response body included
    pub fn new(
        base_url: impl Into<String>,
        credentials: Arc<dyn CredentialStore>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Request(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            credentials,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.credentials.credential() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(
        &self,
        path: &str,
        request: RequestBuilder,
    ) -> Result<reqwest::Response, ApiError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| ApiError::Request(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            tracing::warn!("{} rejected the credential (HTTP {})", path, status.as_u16());
            return Err(ApiError::Unauthorized(status.as_u16()));
        }
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                path: path.to_string(),
            });
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        path: &str,
        request: RequestBuilder,
    ) -> Result<T, ApiError> {
        self.send(path, request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

fn convert_all<D, T, E>(items: Vec<D>) -> Result<Vec<T>, ApiError>
where
    T: TryFrom<D, Error = E>,
    E: std::fmt::Display,
{
    items
        .into_iter()
        .map(|item| T::try_from(item).map_err(|e| ApiError::Decode(e.to_string())))
        .collect()
}

/// Convert what can be converted; entries that fail are logged and skipped.
fn convert_lenient<D, T, E>(items: Vec<D>, what: &str) -> Vec<T>
where
    T: TryFrom<D, Error = E>,
    E: std::fmt::Display,
{
    items
        .into_iter()
        .filter_map(|item| match T::try_from(item) {
            Ok(converted) => Some(converted),
            Err(e) => {
                tracing::warn!("Skipping undecodable {}: {}", what, e);
                None
            }
        })
        .collect()
}

fn convert<D, T, E>(item: D) -> Result<T, ApiError>
where
    T: TryFrom<D, Error = E>,
    E: std::fmt::Display,
{
    T::try_from(item).map_err(|e| ApiError::Decode(e.to_string()))
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn fetch_messages(&self, room_id: RoomId) -> Result<Vec<Message>, ApiError> {
        let path = format!("/api/chat/rooms/{}/messages", room_id);
        let dtos: Vec<MessageDto> = self.send_json(&path, self.client.get(self.url(&path))).await?;
        tracing::debug!("Fetched {} messages for room {}", dtos.len(), room_id);
        Ok(convert_lenient(dtos, "history message"))
    }

    async fn fetch_room(&self, room_id: RoomId) -> Result<RoomMetadata, ApiError> {
        let path = format!("/api/chatRoom/{}", room_id);
        let dto: RoomDto = self.send_json(&path, self.client.get(self.url(&path))).await?;
        convert(dto)
    }

    async fn fetch_participants(&self, room_id: RoomId) -> Result<Vec<Participant>, ApiError> {
        let path = format!("/api/chatRoom/{}/participants", room_id);
        let dtos: Vec<ParticipantDto> =
            self.send_json(&path, self.client.get(self.url(&path))).await?;
        convert_all(dtos)
    }

    async fn find_private_room(
        &self,
        user: LoginId,
        friend: LoginId,
    ) -> Result<RoomSummary, ApiError> {
        let path = "/api/chatRoom/find";
        let body = FindPrivateRoomRequest {
            user_id: user.into_string(),
            friend_id: friend.into_string(),
        };
        let dto: RoomDto = self
            .send_json(path, self.client.post(self.url(path)).json(&body))
            .await?;
        convert(dto)
    }

    async fn create_group_room(
        &self,
        owner: LoginId,
        members: Vec<LoginId>,
        room_name: Option<String>,
    ) -> Result<RoomSummary, ApiError> {
        let path = "/api/chatRoom/create";
        let body = CreateGroupRoomRequest {
            user_id: owner.into_string(),
            user_ids: members.into_iter().map(LoginId::into_string).collect(),
            room_name,
        };
        let dto: RoomDto = self
            .send_json(path, self.client.post(self.url(path)).json(&body))
            .await?;
        convert(dto)
    }

    async fn leave_room(
        &self,
        room_id: RoomId,
        user: LoginId,
        kind: RoomKind,
    ) -> Result<(), ApiError> {
        let path = "/api/chatRoom";
        let body = LeaveRoomRequest {
            room_id: room_id.value(),
            user_id: user.into_string(),
            r#type: kind.as_wire().to_string(),
        };
        self.send(path, self.client.delete(self.url(path)).json(&body))
            .await?;
        Ok(())
    }

    async fn upload_file(
        &self,
        room_id: RoomId,
        sender: LoginId,
        upload: FileUpload,
    ) -> Result<UploadedFile, ApiError> {
        let path = "/api/chat/upload";
        let part = multipart::Part::bytes(upload.bytes)
            .file_name(upload.file_name)
            .mime_str(&upload.mime_type)
            .map_err(|e| ApiError::Request(e.to_string()))?;
        tracing::debug!("Uploading file to room {} as '{}'", room_id, sender);
        let form = multipart::Form::new()
            .part("chatFile", part)
            .text("roomId", room_id.to_string())
            .text("sender", sender.into_string());

        let raw: serde_json::Value = self
            .send_json(path, self.client.post(self.url(path)).multipart(form))
            .await?;
        let dto: MessageDto =
            serde_json::from_value(raw.clone()).map_err(|e| ApiError::Decode(e.to_string()))?;
        Ok(UploadedFile {
            message: convert(dto)?,
            raw,
        })
    }

    async fn list_rooms(&self, user: UserId) -> Result<Vec<RoomSummary>, ApiError> {
        let path = "/api/chatRoom/list";
        let request = self
            .client
            .get(self.url(path))
            .query(&[("userId", user.value())]);
        let dtos: Vec<RoomDto> = self.send_json(path, request).await?;
        convert_all(dtos)
    }

    async fn list_users(&self) -> Result<Vec<UserSummary>, ApiError> {
        let path = "/api/users";
        let dtos: Vec<UserDto> = self.send_json(path, self.client.get(self.url(path))).await?;
        convert_all(dtos)
    }
}
