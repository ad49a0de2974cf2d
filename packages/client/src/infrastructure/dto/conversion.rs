//! Conversion logic between DTOs and domain entities.

use crate::domain::{
    FileDescriptor, LoginId, Message, MessageBody, MessageId, MessageType, NotificationEvent,
    Participant, RoomId, RoomKind, RoomMetadata, RoomSummary, UserId, UserSummary, ValueError,
    entity::FALLBACK_ROOM_TITLE,
};

use super::rest::{
    MessageDto, MessageTypeDto, NotificationDto, ParticipantDto, RoomDto, UserDto,
};

// ========================================
// DTO → Domain Entity
// ========================================

impl From<MessageTypeDto> for MessageType {
    fn from(dto: MessageTypeDto) -> Self {
        match dto {
            MessageTypeDto::Text => Self::Text,
            MessageTypeDto::File => Self::File,
            MessageTypeDto::Join => Self::Join,
            MessageTypeDto::Leave => Self::Leave,
            MessageTypeDto::Typing => Self::Typing,
        }
    }
}

impl TryFrom<MessageDto> for Message {
    type Error = ValueError;

    fn try_from(dto: MessageDto) -> Result<Self, Self::Error> {
        let kind = MessageType::from(dto.r#type);
        let body = match kind {
            MessageType::File => MessageBody::File(FileDescriptor {
                url: dto.file_url.ok_or(ValueError::MissingFileUrl)?,
                name: dto.file_name,
                mime_type: dto.file_mime_type,
            }),
            _ => MessageBody::Text(dto.message.unwrap_or_default()),
        };

        Ok(Self {
            id: dto.id.map(MessageId::new),
            room_id: RoomId::new(dto.room_id)?,
            kind,
            sender: LoginId::new(dto.sender)?,
            sender_name: dto.sender_name,
            body,
            timestamp: dto.timestamp,
        })
    }
}

impl TryFrom<NotificationDto> for NotificationEvent {
    type Error = ValueError;

    fn try_from(dto: NotificationDto) -> Result<Self, Self::Error> {
        Ok(Self {
            sender: LoginId::new(dto.sender)?,
            sender_name: dto.sender_name,
            sender_avatar: dto.sender_profile_image,
            room_id: RoomId::new(dto.room_id)?,
            content: dto.content,
        })
    }
}

fn parse_room_kind(value: &str) -> Result<RoomKind, ValueError> {
    match value.to_ascii_uppercase().as_str() {
        "PRIVATE" => Ok(RoomKind::Private),
        "GROUP" => Ok(RoomKind::Group),
        _ => Err(ValueError::UnknownRoomKind(value.to_string())),
    }
}

impl TryFrom<RoomDto> for RoomMetadata {
    type Error = ValueError;

    fn try_from(dto: RoomDto) -> Result<Self, Self::Error> {
        let kind = match dto.r#type.as_deref() {
            Some(value) => parse_room_kind(value)?,
            None => return Err(ValueError::UnknownRoomKind(String::new())),
        };
        Ok(Self {
            room_id: RoomId::new(dto.id)?,
            room_name: dto
                .room_name
                .unwrap_or_else(|| FALLBACK_ROOM_TITLE.to_string()),
            kind,
        })
    }
}

impl TryFrom<RoomDto> for RoomSummary {
    type Error = ValueError;

    fn try_from(dto: RoomDto) -> Result<Self, Self::Error> {
        Ok(Self {
            room_id: RoomId::new(dto.id)?,
            room_name: dto
                .room_name
                .unwrap_or_else(|| FALLBACK_ROOM_TITLE.to_string()),
            kind: dto.r#type.as_deref().and_then(|t| parse_room_kind(t).ok()),
        })
    }
}

impl TryFrom<ParticipantDto> for Participant {
    type Error = ValueError;

    fn try_from(dto: ParticipantDto) -> Result<Self, Self::Error> {
        Ok(Self {
            login_id: LoginId::new(dto.login_id)?,
            display_name: dto.name,
            avatar_ref: dto.profile_image,
        })
    }
}

impl TryFrom<UserDto> for UserSummary {
    type Error = ValueError;

    fn try_from(dto: UserDto) -> Result<Self, Self::Error> {
        Ok(Self {
            id: UserId::new(dto.id),
            login_id: LoginId::new(dto.login_id)?,
            display_name: dto.name,
            avatar_ref: dto.profile_image,
        })
    }
}

// ========================================
// Domain Entity → DTO
// ========================================

impl From<MessageType> for MessageTypeDto {
    fn from(kind: MessageType) -> Self {
        match kind {
            MessageType::Text => Self::Text,
            MessageType::File => Self::File,
            MessageType::Join => Self::Join,
            MessageType::Leave => Self::Leave,
            MessageType::Typing => Self::Typing,
        }
    }
}

impl From<&Message> for MessageDto {
    fn from(model: &Message) -> Self {
        let (message, file_url, file_name, file_mime_type) = match &model.body {
            MessageBody::Text(text) => (Some(text.clone()), None, None, None),
            MessageBody::File(file) => (
                None,
                Some(file.url.clone()),
                file.name.clone(),
                file.mime_type.clone(),
            ),
        };
        Self {
            id: model.id.map(|id| id.value()),
            r#type: model.kind.into(),
            room_id: model.room_id.value(),
            sender: model.sender.as_str().to_string(),
            sender_name: model.sender_name.clone(),
            message,
            file_url,
            file_name,
            file_mime_type,
            timestamp: model.timestamp,
        }
    }
}

impl From<&NotificationEvent> for NotificationDto {
    fn from(model: &NotificationEvent) -> Self {
        Self {
            sender: model.sender.as_str().to_string(),
            sender_name: model.sender_name.clone(),
            sender_profile_image: model.sender_avatar.clone(),
            room_id: model.room_id.value(),
            content: model.content.clone(),
        }
    }
}
