//! In-memory credential store.

use std::sync::{PoisonError, RwLock};

use crate::domain::CredentialStore;

/// Holds the bearer token for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    token: RwLock<Option<String>>,
}

impl MemoryCredentialStore {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token.filter(|t| !t.is_empty())),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn credential(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn clear(&self) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = None;
        tracing::info!("Credential cleared");
    }
}
