use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::StoreError,
    models::{ChatId, Conversation, Message, UserId},
};

pub mod memory;

pub use memory::MemoryStore;

/// Conversation records. Every mutating method is a single document update
/// and returns the record as it stands afterwards, or `None` when the
/// conversation (or the membership the update depends on) is gone.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn insert_conversation(&self, chat: &Conversation) -> Result<(), StoreError>;

    async fn find_conversation(&self, id: &ChatId) -> Result<Option<Conversation>, StoreError>;

    /// The one-on-one conversation between the two members of `chat`, in any
    /// order. `chat` is inserted when there is none yet; concurrent callers for
    /// the same pair all get the same record back.
    async fn open_direct_conversation(
        &self,
        chat: &Conversation,
    ) -> Result<Conversation, StoreError>;

    /// Conversations containing `user`, most recently updated first.
    async fn conversations_for(&self, user: &UserId) -> Result<Vec<Conversation>, StoreError>;

    async fn add_members(
        &self,
        id: &ChatId,
        users: &[UserId],
        now: DateTime<Utc>,
    ) -> Result<Option<Conversation>, StoreError>;

    async fn remove_member(
        &self,
        id: &ChatId,
        user: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<Conversation>, StoreError>;

    async fn add_admin(
        &self,
        id: &ChatId,
        user: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<Conversation>, StoreError>;

    async fn reset_unread(
        &self,
        id: &ChatId,
        user: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<Conversation>, StoreError>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Messages of a conversation in creation order.
    async fn messages_for(&self, id: &ChatId) -> Result<Vec<Message>, StoreError>;
}

#[async_trait]
pub trait ChatStore: ConversationStore + MessageStore {
    /// Persists `message` and folds it into its conversation: bumps the unread
    /// counter of every member other than the sender, as of the moment of the
    /// write, and refreshes the last-message summary.
    /// Returns `None` without writing anything when the sender is no longer a member.
    async fn deliver_message(&self, message: &Message) -> Result<Option<Conversation>, StoreError>;
}
