use chrono::Utc;
use mongodb::bson::{Bson, DateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::{ChatId, Conversation, ConversationKind, Message, UnreadCounts, UserId};

pub const CHATS: &str = "chats";
pub const MESSAGES: &str = "messages";
pub const USERS: &str = "auth_users";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConversationDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub is_group_chat: bool,
    /// Sorted member pair of a one-on-one chat, unique across the collection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pair_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub members: Vec<String>,
    #[serde(default)]
    pub admins: Vec<String>,
    pub created_by: String,
    #[serde(default)]
    pub last_message: String,
    #[serde(default)]
    pub last_message_time: Option<DateTime>,
    #[serde(default)]
    pub last_message_by: Option<String>,
    #[serde(default)]
    pub unread_count: HashMap<String, i64>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MessageDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub chat_id: String,
    pub sender: String,
    pub text: String,
    pub created_at: DateTime,
}

/// Projection of an `auth_users` record; ids may be ObjectIds or strings.
#[derive(Debug, Deserialize)]
pub struct UserDocument {
    #[serde(rename = "_id")]
    pub id: Bson,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub contact: Option<String>,
}

impl UserDocument {
    pub fn key(&self) -> Option<String> {
        match &self.id {
            Bson::ObjectId(oid) => Some(oid.to_hex()),
            Bson::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

pub fn to_bson_time(time: chrono::DateTime<Utc>) -> DateTime {
    DateTime::from_millis(time.timestamp_millis())
}

pub fn from_bson_time(time: DateTime) -> chrono::DateTime<Utc> {
    chrono::DateTime::from_timestamp_millis(time.timestamp_millis()).unwrap_or_default()
}

impl From<&Conversation> for ConversationDocument {
    fn from(chat: &Conversation) -> Self {
        Self {
            id: chat.id.as_str().to_string(),
            is_group_chat: chat.is_group(),
            pair_key: chat.pair_key(),
            name: chat.name.clone(),
            description: chat.description.clone(),
            avatar: chat.avatar.clone(),
            members: chat.members.iter().map(|m| m.as_str().to_string()).collect(),
            admins: chat.admins.iter().map(|a| a.as_str().to_string()).collect(),
            created_by: chat.created_by.as_str().to_string(),
            last_message: chat.last_message.clone(),
            last_message_time: chat.last_message_time.map(to_bson_time),
            last_message_by: chat.last_message_by.as_ref().map(|u| u.as_str().to_string()),
            unread_count: chat
                .unread_count
                .iter()
                .map(|(user, count)| (user.as_str().to_string(), i64::from(count)))
                .collect(),
            created_at: to_bson_time(chat.created_at),
            updated_at: to_bson_time(chat.updated_at),
        }
    }
}

impl From<ConversationDocument> for Conversation {
    fn from(doc: ConversationDocument) -> Self {
        let mut unread_count = UnreadCounts::default();
        for (user, count) in doc.unread_count {
            let count = u32::try_from(count.max(0)).unwrap_or(u32::MAX);
            unread_count.set(UserId::from_stored(user), count);
        }

        Self {
            id: ChatId::from_stored(doc.id),
            kind: if doc.is_group_chat {
                ConversationKind::Group
            } else {
                ConversationKind::Direct
            },
            name: doc.name,
            description: doc.description,
            avatar: doc.avatar,
            members: doc.members.into_iter().map(UserId::from_stored).collect(),
            admins: doc.admins.into_iter().map(UserId::from_stored).collect(),
            created_by: UserId::from_stored(doc.created_by),
            last_message: doc.last_message,
            last_message_time: doc.last_message_time.map(from_bson_time),
            last_message_by: doc.last_message_by.map(UserId::from_stored),
            unread_count,
            created_at: from_bson_time(doc.created_at),
            updated_at: from_bson_time(doc.updated_at),
        }
    }
}

impl From<&Message> for MessageDocument {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id.clone(),
            chat_id: message.chat_id.as_str().to_string(),
            sender: message.sender.as_str().to_string(),
            text: message.text.clone(),
            created_at: to_bson_time(message.created_at),
        }
    }
}

impl From<MessageDocument> for Message {
    fn from(doc: MessageDocument) -> Self {
        Self {
            id: doc.id,
            chat_id: ChatId::from_stored(doc.chat_id),
            sender: UserId::from_stored(doc.sender),
            text: doc.text,
            created_at: from_bson_time(doc.created_at),
        }
    }
}
