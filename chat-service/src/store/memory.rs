use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::{ChatStore, ConversationStore, MessageStore};
use crate::{
    error::StoreError,
    models::{ChatId, Conversation, Message, UserId},
};

#[derive(Default)]
struct MemoryState {
    conversations: HashMap<ChatId, Conversation>,
    messages: Vec<Message>,
}

/// Process-local store. One lock covers both collections, so every
/// operation is atomic.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn conversation_count(&self) -> usize {
        self.state.lock().await.conversations.len()
    }

    pub async fn message_count(&self) -> usize {
        self.state.lock().await.messages.len()
    }

    async fn update<F>(&self, id: &ChatId, apply: F) -> Option<Conversation>
    where
        F: FnOnce(&mut Conversation) + Send,
    {
        let mut state = self.state.lock().await;
        let chat = state.conversations.get_mut(id)?;
        apply(chat);
        Some(chat.clone())
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn insert_conversation(&self, chat: &Conversation) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.conversations.contains_key(&chat.id) {
            return Err(StoreError::Corrupt(format!("duplicate chat id {}", chat.id)));
        }
        state.conversations.insert(chat.id.clone(), chat.clone());
        Ok(())
    }

    async fn find_conversation(&self, id: &ChatId) -> Result<Option<Conversation>, StoreError> {
        Ok(self.state.lock().await.conversations.get(id).cloned())
    }

    async fn open_direct_conversation(
        &self,
        chat: &Conversation,
    ) -> Result<Conversation, StoreError> {
        let key = chat
            .pair_key()
            .ok_or_else(|| StoreError::Corrupt(format!("chat {} is not one-on-one", chat.id)))?;

        let mut state = self.state.lock().await;
        let existing = state
            .conversations
            .values()
            .find(|c| c.pair_key().as_deref() == Some(key.as_str()));
        if let Some(existing) = existing {
            return Ok(existing.clone());
        }
        state.conversations.insert(chat.id.clone(), chat.clone());
        Ok(chat.clone())
    }

    async fn conversations_for(&self, user: &UserId) -> Result<Vec<Conversation>, StoreError> {
        let state = self.state.lock().await;
        let mut chats: Vec<Conversation> = state
            .conversations
            .values()
            .filter(|chat| chat.is_member(user))
            .cloned()
            .collect();
        chats.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(chats)
    }

    async fn add_members(
        &self,
        id: &ChatId,
        users: &[UserId],
        now: DateTime<Utc>,
    ) -> Result<Option<Conversation>, StoreError> {
        Ok(self
            .update(id, |chat| {
                chat.add_members(users, now);
            })
            .await)
    }

    async fn remove_member(
        &self,
        id: &ChatId,
        user: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<Conversation>, StoreError> {
        Ok(self
            .update(id, |chat| {
                chat.remove_member(user, now);
            })
            .await)
    }

    async fn add_admin(
        &self,
        id: &ChatId,
        user: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<Conversation>, StoreError> {
        Ok(self
            .update(id, |chat| {
                chat.promote(user, now);
            })
            .await)
    }

    async fn reset_unread(
        &self,
        id: &ChatId,
        user: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<Conversation>, StoreError> {
        let mut state = self.state.lock().await;
        match state.conversations.get_mut(id) {
            Some(chat) if chat.is_member(user) => {
                chat.mark_read(user, now);
                Ok(Some(chat.clone()))
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn messages_for(&self, id: &ChatId) -> Result<Vec<Message>, StoreError> {
        let state = self.state.lock().await;
        let mut messages: Vec<Message> = state
            .messages
            .iter()
            .filter(|m| &m.chat_id == id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(messages)
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn deliver_message(&self, message: &Message) -> Result<Option<Conversation>, StoreError> {
        let mut state = self.state.lock().await;
        let updated = match state.conversations.get_mut(&message.chat_id) {
            Some(chat) if chat.is_member(&message.sender) => {
                chat.record_message(message);
                chat.clone()
            }
            _ => return Ok(None),
        };
        state.messages.push(message.clone());
        Ok(Some(updated))
    }
}
