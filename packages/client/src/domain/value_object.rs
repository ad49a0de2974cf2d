//! Value objects shared across the client.

use std::fmt;

use thiserror::Error;

/// Validation failures for value objects and wire payloads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    #[error("login id must not be empty")]
    EmptyLoginId,

    #[error("login id must not contain '/' (got '{0}')")]
    InvalidLoginId(String),

    #[error("room id must be positive (got {0})")]
    InvalidRoomId(i64),

    #[error("unknown room kind '{0}'")]
    UnknownRoomKind(String),

    #[error("file message is missing its file url")]
    MissingFileUrl,
}

/// Server-assigned room identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomId(i64);

impl RoomId {
    pub fn new(value: i64) -> Result<Self, ValueError> {
        if value <= 0 {
            return Err(ValueError::InvalidRoomId(value));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RoomId {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim().parse::<i64>().map_err(|_| ValueError::InvalidRoomId(0))?;
        Self::new(value)
    }
}

/// Server-assigned message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(i64);

impl MessageId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

/// Numeric user id used by the REST endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserId(i64);

impl UserId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

/// Stable unique handle of an identity.
///
/// This is the sender key on every message and the only thing self-suppression
/// compares. Display names are not unique and never stand in for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoginId(String);

impl LoginId {
    pub fn new(value: impl Into<String>) -> Result<Self, ValueError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(ValueError::EmptyLoginId);
        }
        // login ids are embedded in topic names
        if value.contains('/') {
            return Err(ValueError::InvalidLoginId(value));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl TryFrom<String> for LoginId {
    type Error = ValueError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl fmt::Display for LoginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
