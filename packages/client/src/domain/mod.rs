//! Domain layer: identities, rooms, messages and the boundaries the core consumes.

pub mod entity;
pub mod gateway;
pub mod topic;
pub mod value_object;

pub use entity::{
    FileDescriptor, Identity, Message, MessageBody, MessageType, NotificationEvent, Participant,
    RoomKind, RoomMetadata, RoomSnapshot, RoomSummary, UploadedFile, UserSummary,
};
pub use gateway::{ApiError, ChatApi, CredentialStore, FileUpload, NotificationSink};
pub use topic::Topic;
pub use value_object::{LoginId, MessageId, RoomId, UserId, ValueError};
