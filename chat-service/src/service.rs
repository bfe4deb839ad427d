use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::{
    dto::{
        AccessChatRequest, AddParticipantsRequest, ConversationView, CreateGroupRequest,
        MemberRequest, MessageView, Profiles, SendMessageRequest, conversation_view,
        message_view, referenced_users,
    },
    error::ChatError,
    identity::UserDirectory,
    metrics::Metrics,
    models::{ChatId, Conversation, Message, UserId},
    store::ChatStore,
};

/// Authorization and state rules for every chat operation. Callers pass the
/// authenticated user explicitly; nothing here trusts ids from request bodies
/// as the caller.
pub struct ChatService {
    store: Arc<dyn ChatStore>,
    directory: Arc<dyn UserDirectory>,
}

fn required_chat_id(raw: Option<&str>, message: &str) -> Result<ChatId, ChatError> {
    match raw {
        Some(raw) if !raw.trim().is_empty() => ChatId::parse(raw),
        _ => Err(ChatError::validation(message)),
    }
}

fn parse_user_ids(raw: &[String]) -> Result<Vec<UserId>, ChatError> {
    raw.iter().map(|id| UserId::parse(id)).collect()
}

impl ChatService {
    pub fn new(store: Arc<dyn ChatStore>, directory: Arc<dyn UserDirectory>) -> Self {
        Self { store, directory }
    }

    // ==============================
    // CONVERSATION CREATION
    // ==============================

    #[instrument(skip_all, fields(caller = %caller))]
    pub async fn access_direct_chat(
        &self,
        caller: &UserId,
        request: &AccessChatRequest,
    ) -> Result<ConversationView, ChatError> {
        let target = request
            .target_user_id()
            .and_then(|raw| UserId::parse(raw).ok())
            .ok_or_else(|| {
                ChatError::validation("Target userId is required and must be a string")
            })?;
        if &target == caller {
            return Err(ChatError::validation(
                "Cannot start a one-on-one chat with yourself",
            ));
        }

        let candidate = Conversation::direct(caller.clone(), target, Utc::now());
        let chat = self.store.open_direct_conversation(&candidate).await?;
        if chat.id == candidate.id {
            Metrics::conversation_created(chat.kind.label());
            info!(chat_id = %chat.id, "created one-on-one chat");
        } else {
            debug!(chat_id = %chat.id, "found existing one-on-one chat");
        }

        Ok(self.present(&chat, None).await)
    }

    #[instrument(skip_all, fields(caller = %caller))]
    pub async fn create_group(
        &self,
        caller: &UserId,
        request: CreateGroupRequest,
    ) -> Result<ConversationView, ChatError> {
        let invalid = || ChatError::validation("Group name and at least 2 members are required");

        let name = request
            .name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(invalid)?
            .to_string();
        let invited = parse_user_ids(request.members.as_deref().ok_or_else(invalid)?)?;

        let description = request
            .description
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_string();

        let chat = Conversation::group(caller.clone(), name, description, invited, Utc::now());
        // The creator is always in, so a real group needs two more.
        if chat.members.len() < 3 {
            return Err(invalid());
        }

        self.store.insert_conversation(&chat).await?;
        Metrics::conversation_created(chat.kind.label());
        info!(chat_id = %chat.id, members = chat.members.len(), "created group chat");

        Ok(self.present(&chat, None).await)
    }

    // ==============================
    // PARTICIPANT MANAGEMENT
    // ==============================

    #[instrument(skip_all, fields(caller = %caller))]
    pub async fn add_participants(
        &self,
        caller: &UserId,
        request: AddParticipantsRequest,
    ) -> Result<ConversationView, ChatError> {
        const REQUIRED: &str = "chatId and userIds array are required";
        let chat_id = required_chat_id(request.chat_id.as_deref(), REQUIRED)?;
        let user_ids = match request.user_ids.as_deref() {
            Some(ids) if !ids.is_empty() => parse_user_ids(ids)?,
            _ => return Err(ChatError::validation(REQUIRED)),
        };

        let chat = self
            .load_group(&chat_id, "Cannot add participants to one-on-one chat")
            .await?;
        if !chat.is_admin(caller) {
            return Err(ChatError::forbidden("Only admins can add participants"));
        }

        let fresh = chat.missing_members(&user_ids);
        let chat = if fresh.is_empty() {
            debug!(chat_id = %chat.id, "all requested users already members");
            chat
        } else {
            let updated = self
                .store
                .add_members(&chat.id, &fresh, Utc::now())
                .await?
                .ok_or_else(ChatError::chat_not_found)?;
            info!(chat_id = %updated.id, added = fresh.len(), "added participants");
            updated
        };

        Ok(self.present(&chat, None).await)
    }

    #[instrument(skip_all, fields(caller = %caller))]
    pub async fn remove_participant(
        &self,
        caller: &UserId,
        request: MemberRequest,
    ) -> Result<ConversationView, ChatError> {
        const REQUIRED: &str = "chatId and userId are required";
        let chat_id = required_chat_id(request.chat_id.as_deref(), REQUIRED)?;
        let user = UserId::parse(request.user_id.as_deref().unwrap_or_default())
            .map_err(|_| ChatError::validation(REQUIRED))?;

        let chat = self
            .load_group(&chat_id, "Cannot remove participants from one-on-one chat")
            .await?;
        if !chat.is_admin(caller) && caller != &user {
            return Err(ChatError::forbidden(
                "Only admins can remove other participants",
            ));
        }

        let chat = if chat.is_member(&user) {
            let updated = self
                .store
                .remove_member(&chat.id, &user, Utc::now())
                .await?
                .ok_or_else(ChatError::chat_not_found)?;
            info!(chat_id = %updated.id, removed = %user, "removed participant");
            updated
        } else {
            chat
        };

        Ok(self.present(&chat, None).await)
    }

    #[instrument(skip_all, fields(caller = %caller))]
    pub async fn make_admin(
        &self,
        caller: &UserId,
        request: MemberRequest,
    ) -> Result<ConversationView, ChatError> {
        const REQUIRED: &str = "chatId and userId are required";
        let chat_id = required_chat_id(request.chat_id.as_deref(), REQUIRED)?;
        let user = UserId::parse(request.user_id.as_deref().unwrap_or_default())
            .map_err(|_| ChatError::validation(REQUIRED))?;

        let chat = self
            .load_group(&chat_id, "Cannot manage admins in one-on-one chat")
            .await?;
        if !chat.is_admin(caller) {
            return Err(ChatError::forbidden(
                "Only admins can make other users admins",
            ));
        }
        if !chat.is_member(&user) {
            return Err(ChatError::validation("User is not a member of this chat"));
        }

        let chat = if chat.admins.contains(&user) {
            chat
        } else {
            let updated = self
                .store
                .add_admin(&chat.id, &user, Utc::now())
                .await?
                .ok_or_else(ChatError::chat_not_found)?;
            info!(chat_id = %updated.id, promoted = %user, "promoted admin");
            updated
        };

        Ok(self.present(&chat, None).await)
    }

    // ==============================
    // CONVERSATION METADATA
    // ==============================

    #[instrument(skip_all, fields(caller = %caller))]
    pub async fn list_conversations(
        &self,
        caller: &UserId,
    ) -> Result<Vec<ConversationView>, ChatError> {
        let chats = self.store.conversations_for(caller).await?;

        let mut ids: Vec<UserId> = Vec::new();
        for chat in &chats {
            for id in referenced_users(chat) {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        let profiles = self.profiles(&ids).await;

        debug!(count = chats.len(), "listed conversations");
        Ok(chats
            .iter()
            .map(|chat| conversation_view(chat, &profiles, Some(caller)))
            .collect())
    }

    #[instrument(skip_all, fields(caller = %caller, chat_id = %chat_id))]
    pub async fn conversation_details(
        &self,
        caller: &UserId,
        chat_id: &str,
    ) -> Result<ConversationView, ChatError> {
        let chat_id = required_chat_id(Some(chat_id), "chatId is required")?;
        let chat = self.load_for_member(&chat_id, caller).await?;
        Ok(self.present(&chat, Some(caller)).await)
    }

    #[instrument(skip_all, fields(caller = %caller, chat_id = ?chat_id))]
    pub async fn mark_as_read(
        &self,
        caller: &UserId,
        chat_id: Option<&str>,
    ) -> Result<u32, ChatError> {
        let chat_id = required_chat_id(chat_id, "chatId is required")?;
        let chat = self.load_for_member(&chat_id, caller).await?;

        let updated = self
            .store
            .reset_unread(&chat.id, caller, Utc::now())
            .await?
            .ok_or_else(ChatError::not_a_member)?;

        let remaining = updated.unread_count.get(caller);
        debug!(chat_id = %updated.id, "marked as read");
        Ok(remaining)
    }

    // ==============================
    // MESSAGING
    // ==============================

    #[instrument(skip_all, fields(sender = %sender))]
    pub async fn send_message(
        &self,
        sender: &UserId,
        request: SendMessageRequest,
    ) -> Result<MessageView, ChatError> {
        const REQUIRED: &str = "chatId and text are required";
        let chat_id = required_chat_id(request.chat_id.as_deref(), REQUIRED)?;
        let text = match request.text {
            Some(text) if !text.trim().is_empty() => text,
            _ => return Err(ChatError::validation(REQUIRED)),
        };

        let chat = self.load_for_member(&chat_id, sender).await?;

        let message = Message::new(chat.id.clone(), sender.clone(), text, Utc::now());
        let delivered = self
            .store
            .deliver_message(&message)
            .await?
            .ok_or_else(ChatError::not_a_member)?;

        Metrics::chat_message_sent(delivered.kind.label());
        info!(chat_id = %delivered.id, message_id = %message.id, "message sent");

        let profiles = self.profiles(std::slice::from_ref(sender)).await;
        Ok(message_view(&message, &profiles))
    }

    #[instrument(skip_all, fields(caller = %caller, chat_id = %chat_id))]
    pub async fn list_messages(
        &self,
        caller: &UserId,
        chat_id: &str,
    ) -> Result<Vec<MessageView>, ChatError> {
        let chat_id = required_chat_id(Some(chat_id), "chatId is required")?;
        let chat = self.load_for_member(&chat_id, caller).await?;

        let messages = self.store.messages_for(&chat.id).await?;

        let mut senders: Vec<UserId> = Vec::new();
        for message in &messages {
            if !senders.contains(&message.sender) {
                senders.push(message.sender.clone());
            }
        }
        let profiles = self.profiles(&senders).await;

        Ok(messages
            .iter()
            .map(|message| message_view(message, &profiles))
            .collect())
    }

    // ==============================
    // HELPERS
    // ==============================

    async fn load(&self, chat_id: &ChatId) -> Result<Conversation, ChatError> {
        self.store
            .find_conversation(chat_id)
            .await?
            .ok_or_else(ChatError::chat_not_found)
    }

    async fn load_group(
        &self,
        chat_id: &ChatId,
        not_group: &str,
    ) -> Result<Conversation, ChatError> {
        let chat = self.load(chat_id).await?;
        if !chat.is_group() {
            return Err(ChatError::validation(not_group));
        }
        Ok(chat)
    }

    async fn load_for_member(
        &self,
        chat_id: &ChatId,
        user: &UserId,
    ) -> Result<Conversation, ChatError> {
        let chat = self.load(chat_id).await?;
        if !chat.is_member(user) {
            return Err(ChatError::not_a_member());
        }
        Ok(chat)
    }

    /// Display fields are best effort: a failing directory degrades the
    /// response to bare ids instead of failing an already applied change.
    async fn profiles(&self, ids: &[UserId]) -> Profiles {
        match self.directory.lookup(ids).await {
            Ok(profiles) => profiles,
            Err(e) => {
                warn!(%e, "user directory lookup failed");
                Profiles::new()
            }
        }
    }

    async fn present(&self, chat: &Conversation, viewer: Option<&UserId>) -> ConversationView {
        let profiles = self.profiles(&referenced_users(chat)).await;
        conversation_view(chat, &profiles, viewer)
    }
}
