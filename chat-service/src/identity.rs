use async_trait::async_trait;
use std::collections::HashMap;

use crate::{error::StoreError, models::UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub name: String,
    pub contact: String,
}

impl UserProfile {
    pub fn new(name: impl Into<String>, contact: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contact: contact.into(),
        }
    }
}

/// Read-only view of the user records owned by the auth service.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Display fields for every id that resolves; unknown ids are simply left out.
    async fn lookup(&self, ids: &[UserId]) -> Result<HashMap<UserId, UserProfile>, StoreError>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryUserDirectory {
    users: HashMap<UserId, UserProfile>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, id: UserId, profile: UserProfile) -> Self {
        self.users.insert(id, profile);
        self
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn lookup(&self, ids: &[UserId]) -> Result<HashMap<UserId, UserProfile>, StoreError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.users.get(id).map(|p| (id.clone(), p.clone())))
            .collect())
    }
}
