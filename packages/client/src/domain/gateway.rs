//! 外部境界（REST・認証・通知表示）の trait 定義
//!
//! コアが必要とするインターフェースをドメイン層が定義し、
//! 具体的な実装は Infrastructure 層や UI 層が提供します（依存性の逆転）。

use async_trait::async_trait;
use thiserror::Error;

use super::{
    entity::{
        Message, NotificationEvent, Participant, RoomKind, RoomMetadata, RoomSummary,
        UploadedFile, UserSummary,
    },
    value_object::{LoginId, RoomId, UserId},
};

/// REST call failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// 401/403: the credential is no longer accepted.
    #[error("unauthorized (HTTP {0})")]
    Unauthorized(u16),

    #[error("{path} failed with HTTP {status}")]
    Status { status: u16, path: String },

    #[error("request failed: {0}")]
    Request(String),

    #[error("invalid response body: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

/// A file picked for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Chat REST API
///
/// ルーム履歴・メタデータ・参加者・ルーム解決・退出・ファイルアップロード。
/// 全ての呼び出しは認証情報（Bearer トークン）付きで行われる。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Ordered message history of a room.
    async fn fetch_messages(&self, room_id: RoomId) -> Result<Vec<Message>, ApiError>;

    /// Room name and kind.
    async fn fetch_room(&self, room_id: RoomId) -> Result<RoomMetadata, ApiError>;

    /// Ordered participant list.
    async fn fetch_participants(&self, room_id: RoomId) -> Result<Vec<Participant>, ApiError>;

    /// Find or create the PRIVATE room between `user` and `friend`.
    async fn find_private_room(
        &self,
        user: LoginId,
        friend: LoginId,
    ) -> Result<RoomSummary, ApiError>;

    /// Create a GROUP room for `owner` and `members`.
    async fn create_group_room(
        &self,
        owner: LoginId,
        members: Vec<LoginId>,
        room_name: Option<String>,
    ) -> Result<RoomSummary, ApiError>;

    /// Leave (delete membership in) a room.
    async fn leave_room(
        &self,
        room_id: RoomId,
        user: LoginId,
        kind: RoomKind,
    ) -> Result<(), ApiError>;

    /// Upload a file; the server answers with a complete FILE message.
    async fn upload_file(
        &self,
        room_id: RoomId,
        sender: LoginId,
        upload: FileUpload,
    ) -> Result<UploadedFile, ApiError>;

    /// Rooms `user` belongs to.
    async fn list_rooms(&self, user: UserId) -> Result<Vec<RoomSummary>, ApiError>;

    /// User directory.
    async fn list_users(&self) -> Result<Vec<UserSummary>, ApiError>;
}

/// Auth boundary: where the session credential lives.
pub trait CredentialStore: Send + Sync {
    /// Current token, if logged in.
    fn credential(&self) -> Option<String>;

    /// Forget the token (logout or rejected credential).
    fn clear(&self);
}

/// Receives notification events accepted by the notification controller.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: &NotificationEvent);
}
