use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt};
use uuid::Uuid;

use crate::error::ChatError;

const MAX_USER_ID_LEN: usize = 128;

/// Identifier of a user as issued by the auth service.
///
/// Ids double as keys of the stored unread map, so only ASCII alphanumerics,
/// `-` and `_` are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn parse(raw: &str) -> Result<Self, ChatError> {
        let raw = raw.trim();
        let valid = !raw.is_empty()
            && raw.len() <= MAX_USER_ID_LEN
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(ChatError::validation(format!("invalid user id: {:?}", raw)))
        }
    }

    pub(crate) fn from_stored(raw: String) -> Self {
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(String);

impl ChatId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn parse(raw: &str) -> Result<Self, ChatError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ChatError::validation("chatId is required"));
        }
        Ok(Self(raw.to_string()))
    }

    pub(crate) fn from_stored(raw: String) -> Self {
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Direct,
    Group,
}

impl ConversationKind {
    pub fn label(self) -> &'static str {
        match self {
            ConversationKind::Direct => "direct",
            ConversationKind::Group => "group",
        }
    }
}

/// Per-member count of messages not yet marked as read. Missing entries read as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnreadCounts(HashMap<UserId, u32>);

impl UnreadCounts {
    pub fn zeroed<'a>(members: impl IntoIterator<Item = &'a UserId>) -> Self {
        Self(members.into_iter().map(|m| (m.clone(), 0)).collect())
    }

    pub fn get(&self, user: &UserId) -> u32 {
        self.0.get(user).copied().unwrap_or(0)
    }

    pub fn set(&mut self, user: UserId, count: u32) {
        self.0.insert(user, count);
    }

    pub fn reset(&mut self, user: &UserId) {
        self.0.insert(user.clone(), 0);
    }

    pub fn increment(&mut self, user: &UserId) {
        let count = self.0.entry(user.clone()).or_insert(0);
        *count = count.saturating_add(1);
    }

    pub fn remove(&mut self, user: &UserId) {
        self.0.remove(user);
    }

    pub fn contains(&self, user: &UserId) -> bool {
        self.0.contains_key(user)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&UserId, u32)> {
        self.0.iter().map(|(user, count)| (user, *count))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    pub id: ChatId,
    pub kind: ConversationKind,
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar: Option<String>,
    pub members: Vec<UserId>,
    pub admins: Vec<UserId>,
    pub created_by: UserId,
    pub last_message: String,
    pub last_message_time: Option<DateTime<Utc>>,
    pub last_message_by: Option<UserId>,
    pub unread_count: UnreadCounts,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn direct(initiator: UserId, target: UserId, now: DateTime<Utc>) -> Self {
        let members = vec![initiator.clone(), target];
        Self {
            id: ChatId::generate(),
            kind: ConversationKind::Direct,
            name: None,
            description: None,
            avatar: None,
            unread_count: UnreadCounts::zeroed(&members),
            members,
            admins: Vec::new(),
            created_by: initiator,
            last_message: String::new(),
            last_message_time: None,
            last_message_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builds a group owned by `creator`. The creator always ends up first in
    /// the member list and is the only admin.
    pub fn group(
        creator: UserId,
        name: String,
        description: String,
        invited: Vec<UserId>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut members = vec![creator.clone()];
        for user in invited {
            if !members.contains(&user) {
                members.push(user);
            }
        }

        Self {
            id: ChatId::generate(),
            kind: ConversationKind::Group,
            name: Some(name),
            description: Some(description),
            avatar: None,
            unread_count: UnreadCounts::zeroed(&members),
            members,
            admins: vec![creator.clone()],
            created_by: creator,
            last_message: String::new(),
            last_message_time: None,
            last_message_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_group(&self) -> bool {
        self.kind == ConversationKind::Group
    }

    pub fn is_member(&self, user: &UserId) -> bool {
        self.members.contains(user)
    }

    pub fn is_admin(&self, user: &UserId) -> bool {
        self.is_group() && self.admins.contains(user)
    }

    /// Members that would be new to this conversation, in request order and without repeats.
    pub fn missing_members(&self, users: &[UserId]) -> Vec<UserId> {
        let mut fresh: Vec<UserId> = Vec::new();
        for user in users {
            if !self.is_member(user) && !fresh.contains(user) {
                fresh.push(user.clone());
            }
        }
        fresh
    }

    /// Every member except `sender`; these are the counters a new message bumps.
    pub fn recipients_of(&self, sender: &UserId) -> Vec<UserId> {
        self.members
            .iter()
            .filter(|m| *m != sender)
            .cloned()
            .collect()
    }

    pub fn add_members(&mut self, users: &[UserId], now: DateTime<Utc>) -> Vec<UserId> {
        let fresh = self.missing_members(users);
        if fresh.is_empty() {
            return fresh;
        }
        for user in &fresh {
            self.members.push(user.clone());
            self.unread_count.set(user.clone(), 0);
        }
        self.updated_at = now;
        fresh
    }

    pub fn remove_member(&mut self, user: &UserId, now: DateTime<Utc>) -> bool {
        if !self.is_member(user) {
            return false;
        }
        self.members.retain(|m| m != user);
        self.admins.retain(|a| a != user);
        self.unread_count.remove(user);
        self.updated_at = now;
        true
    }

    pub fn promote(&mut self, user: &UserId, now: DateTime<Utc>) -> bool {
        if !self.is_member(user) || self.admins.contains(user) {
            return false;
        }
        self.admins.push(user.clone());
        self.updated_at = now;
        true
    }

    pub fn mark_read(&mut self, user: &UserId, now: DateTime<Utc>) {
        self.unread_count.reset(user);
        self.updated_at = now;
    }

    /// Order-independent key of a one-on-one chat; `None` for groups.
    pub fn pair_key(&self) -> Option<String> {
        if self.is_group() {
            return None;
        }
        let mut ids: Vec<&str> = self.members.iter().map(UserId::as_str).collect();
        ids.sort_unstable();
        Some(ids.join(":"))
    }

    /// Folds `message` in: every current member but the sender gets one more unread.
    pub fn record_message(&mut self, message: &Message) {
        for user in self.recipients_of(&message.sender) {
            self.unread_count.increment(&user);
        }
        self.last_message = message.text.clone();
        self.last_message_time = Some(message.created_at);
        self.last_message_by = Some(message.sender.clone());
        self.updated_at = message.created_at;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub chat_id: ChatId,
    pub sender: UserId,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(chat_id: ChatId, sender: UserId, text: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            chat_id,
            sender,
            text,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(raw: &str) -> UserId {
        UserId::parse(raw).unwrap()
    }

    #[test]
    fn user_id_rejects_path_characters() {
        assert!(UserId::parse("64f1c0ffee").is_ok());
        assert!(UserId::parse("user_01-a").is_ok());
        assert!(UserId::parse("").is_err());
        assert!(UserId::parse("   ").is_err());
        assert!(UserId::parse("a.b").is_err());
        assert!(UserId::parse("$where").is_err());
        assert!(UserId::parse(&"x".repeat(129)).is_err());
    }

    #[test]
    fn user_id_is_trimmed() {
        assert_eq!(user("  bob ").as_str(), "bob");
    }

    #[test]
    fn group_puts_creator_first_and_dedups() {
        let now = Utc::now();
        let chat = Conversation::group(
            user("alice"),
            "team".into(),
            String::new(),
            vec![user("bob"), user("alice"), user("bob"), user("carol")],
            now,
        );

        assert_eq!(chat.members, vec![user("alice"), user("bob"), user("carol")]);
        assert_eq!(chat.admins, vec![user("alice")]);
        assert_eq!(chat.unread_count.len(), 3);
        assert!(chat.members.iter().all(|m| chat.unread_count.contains(m)));
    }

    #[test]
    fn direct_chat_has_no_admins() {
        let chat = Conversation::direct(user("alice"), user("bob"), Utc::now());
        assert!(!chat.is_group());
        assert!(chat.admins.is_empty());
        assert!(!chat.is_admin(&user("alice")));
        assert_eq!(chat.unread_count.get(&user("bob")), 0);
    }

    #[test]
    fn removing_a_member_drops_admin_and_counter() {
        let now = Utc::now();
        let mut chat = Conversation::group(
            user("alice"),
            "team".into(),
            String::new(),
            vec![user("bob"), user("carol")],
            now,
        );
        chat.promote(&user("bob"), now);

        assert!(chat.remove_member(&user("bob"), now));
        assert!(!chat.is_member(&user("bob")));
        assert!(!chat.admins.contains(&user("bob")));
        assert!(!chat.unread_count.contains(&user("bob")));

        assert!(!chat.remove_member(&user("bob"), now));
    }

    #[test]
    fn record_message_bumps_only_recipients() {
        let now = Utc::now();
        let mut chat = Conversation::group(
            user("alice"),
            "team".into(),
            String::new(),
            vec![user("bob"), user("carol")],
            now,
        );
        let message = Message::new(chat.id.clone(), user("alice"), "hi".into(), now);
        chat.record_message(&message);

        assert_eq!(chat.unread_count.get(&user("alice")), 0);
        assert_eq!(chat.unread_count.get(&user("bob")), 1);
        assert_eq!(chat.unread_count.get(&user("carol")), 1);
        assert_eq!(chat.last_message, "hi");
        assert_eq!(chat.last_message_by, Some(user("alice")));
    }

    #[test]
    fn pair_key_ignores_member_order() {
        let now = Utc::now();
        let ab = Conversation::direct(user("alice"), user("bob"), now);
        let ba = Conversation::direct(user("bob"), user("alice"), now);
        assert_eq!(ab.pair_key(), Some("alice:bob".to_string()));
        assert_eq!(ab.pair_key(), ba.pair_key());

        let group = Conversation::group(
            user("alice"),
            "g".into(),
            String::new(),
            vec![user("bob"), user("carol")],
            now,
        );
        assert_eq!(group.pair_key(), None);
    }

    #[test]
    fn missing_counter_reads_as_zero() {
        let counts = UnreadCounts::default();
        assert_eq!(counts.get(&user("ghost")), 0);
    }
}
