use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use crate::{
    identity::UserProfile,
    models::{Conversation, Message, UserId},
};

// ------------------------------------------------------------
// REQUEST BODIES
// ------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessChatRequest {
    #[serde(default)]
    pub user_id: Option<Value>,
}

impl AccessChatRequest {
    /// The target id, given either directly or as an object carrying
    /// `userId`, `_id` or `id`.
    pub fn target_user_id(&self) -> Option<&str> {
        match self.user_id.as_ref()? {
            Value::String(s) => Some(s.as_str()),
            Value::Object(map) => ["userId", "_id", "id"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str)),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateGroupRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub members: Option<Vec<String>>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddParticipantsRequest {
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub user_ids: Option<Vec<String>>,
}

/// Body shared by remove-participant and make-admin.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRequest {
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    #[serde(default)]
    pub chat_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

// ------------------------------------------------------------
// RESPONSE VIEWS
// ------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    pub id: String,
    pub is_group_chat: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub members: Vec<UserSummary>,
    pub admins: Vec<UserSummary>,
    pub created_by: UserSummary,
    pub last_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_by: Option<UserSummary>,
    pub unread_count: BTreeMap<String, u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub my_unread_count: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: String,
    pub chat_id: String,
    pub sender: UserSummary,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadResponse {
    pub message: String,
    pub unread_count: u32,
}

// ------------------------------------------------------------
// DISPLAY JOIN
// ------------------------------------------------------------

pub type Profiles = HashMap<UserId, UserProfile>;

/// Every user a conversation view displays, without repeats.
pub fn referenced_users(chat: &Conversation) -> Vec<UserId> {
    let mut ids: Vec<UserId> = Vec::with_capacity(chat.members.len() + 2);
    let referenced = chat
        .members
        .iter()
        .chain(chat.admins.iter())
        .chain(std::iter::once(&chat.created_by))
        .chain(chat.last_message_by.iter());
    for id in referenced {
        if !ids.contains(id) {
            ids.push(id.clone());
        }
    }
    ids
}

pub fn summarize(id: &UserId, profiles: &Profiles) -> UserSummary {
    let profile = profiles.get(id);
    UserSummary {
        id: id.clone(),
        name: profile.map(|p| p.name.clone()),
        contact: profile.map(|p| p.contact.clone()),
    }
}

pub fn conversation_view(
    chat: &Conversation,
    profiles: &Profiles,
    viewer: Option<&UserId>,
) -> ConversationView {
    ConversationView {
        id: chat.id.as_str().to_string(),
        is_group_chat: chat.is_group(),
        name: chat.name.clone(),
        description: chat.description.clone(),
        avatar: chat.avatar.clone(),
        members: chat.members.iter().map(|m| summarize(m, profiles)).collect(),
        admins: chat.admins.iter().map(|a| summarize(a, profiles)).collect(),
        created_by: summarize(&chat.created_by, profiles),
        last_message: chat.last_message.clone(),
        last_message_time: chat.last_message_time,
        last_message_by: chat.last_message_by.as_ref().map(|u| summarize(u, profiles)),
        unread_count: chat
            .unread_count
            .iter()
            .map(|(user, count)| (user.as_str().to_string(), count))
            .collect(),
        my_unread_count: viewer.map(|v| chat.unread_count.get(v)),
        created_at: chat.created_at,
        updated_at: chat.updated_at,
    }
}

pub fn message_view(message: &Message, profiles: &Profiles) -> MessageView {
    MessageView {
        id: message.id.clone(),
        chat_id: message.chat_id.as_str().to_string(),
        sender: summarize(&message.sender, profiles),
        text: message.text.clone(),
        created_at: message.created_at,
    }
}
