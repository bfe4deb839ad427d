use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::{
    Client, Collection, Database,
    bson::{Document, doc, to_document},
    error::{ErrorKind, WriteFailure},
    options::ReturnDocument,
};
use std::time::Instant;
use tracing::{debug, error, warn};

use super::models::{CHATS, ConversationDocument, MESSAGES, MessageDocument, to_bson_time};
use crate::{
    config::MongoDbConfig,
    error::StoreError,
    metrics::Metrics,
    models::{ChatId, Conversation, Message, UserId},
    store::{ChatStore, ConversationStore, MessageStore},
};

/// Reloads allowed when the member list moves under a snapshot-guarded write.
const MAX_WRITE_ATTEMPTS: usize = 5;
const DUPLICATE_KEY: i32 = 11000;

pub struct MongoChatStore {
    client: Client,
    database: Database,
    use_transactions: bool,
}

// ------------------------------------------------------------
// FILTERS & UPDATES
// ------------------------------------------------------------

fn unread_key(user: &UserId) -> String {
    format!("unread_count.{}", user.as_str())
}

fn member_ids(users: &[UserId]) -> Vec<&str> {
    users.iter().map(UserId::as_str).collect()
}

/// Matches `chat` only while its member set is exactly the one it was read with.
fn membership_snapshot(chat: &Conversation) -> Document {
    let members = member_ids(&chat.members);
    let size = members.len() as i64;

    let mut filter = doc! { "_id": chat.id.as_str() };
    if members.is_empty() {
        filter.insert("members", doc! { "$size": 0_i64 });
    } else {
        filter.insert("members", doc! { "$all": members, "$size": size });
    }
    filter
}

fn delivery_update(chat: &Conversation, message: &Message) -> Document {
    let mut inc = Document::new();
    for user in chat.recipients_of(&message.sender) {
        inc.insert(unread_key(&user), 1_i64);
    }

    let sent_at = to_bson_time(message.created_at);
    let mut update = doc! {
        "$set": {
            "last_message": message.text.as_str(),
            "last_message_time": sent_at,
            "last_message_by": message.sender.as_str(),
            "updated_at": sent_at,
        },
    };
    if !inc.is_empty() {
        update.insert("$inc", inc);
    }
    update
}

fn add_members_update(fresh: &[UserId], now: DateTime<Utc>) -> Document {
    let mut set = doc! { "updated_at": to_bson_time(now) };
    for user in fresh {
        set.insert(unread_key(user), 0_i64);
    }
    doc! {
        "$addToSet": { "members": { "$each": member_ids(fresh) } },
        "$set": set,
    }
}

fn remove_member_update(user: &UserId, now: DateTime<Utc>) -> Document {
    let mut unset = Document::new();
    unset.insert(unread_key(user), "");
    doc! {
        "$pull": { "members": user.as_str(), "admins": user.as_str() },
        "$unset": unset,
        "$set": { "updated_at": to_bson_time(now) },
    }
}

fn add_admin_filter(id: &ChatId, user: &UserId) -> Document {
    doc! {
        "_id": id.as_str(),
        "is_group_chat": true,
        "members": user.as_str(),
        "admins": { "$ne": user.as_str() },
    }
}

fn reset_unread_update(user: &UserId, now: DateTime<Utc>) -> Document {
    let mut set = doc! { "updated_at": to_bson_time(now) };
    set.insert(unread_key(user), 0_i64);
    doc! { "$set": set }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Command(e) => e.code == DUPLICATE_KEY,
        ErrorKind::Write(WriteFailure::WriteError(e)) => e.code == DUPLICATE_KEY,
        _ => false,
    }
}

impl MongoChatStore {
    pub fn new(client: Client, config: &MongoDbConfig) -> Self {
        let database = client.database(&config.database_name);
        Self {
            client,
            database,
            use_transactions: config.use_transactions,
        }
    }

    fn chats(&self) -> Collection<ConversationDocument> {
        self.database.collection(CHATS)
    }

    fn messages(&self) -> Collection<MessageDocument> {
        self.database.collection(MESSAGES)
    }

    async fn find_and_update(
        &self,
        operation: &'static str,
        filter: Document,
        update: Document,
    ) -> Result<Option<Conversation>, StoreError> {
        let start = Instant::now();
        let updated = self
            .chats()
            .find_one_and_update(filter, update)
            .return_document(ReturnDocument::After)
            .await?;
        Metrics::observe_db_query(operation, start.elapsed());
        Ok(updated.map(Conversation::from))
    }

    /// Applies `update` to the chat matching `filter` and returns the new
    /// version. When nothing matched, falls back to the current record so
    /// callers can tell a missing chat from a precondition that no longer holds.
    async fn update_or_current(
        &self,
        operation: &'static str,
        id: &ChatId,
        filter: Document,
        update: Document,
    ) -> Result<Option<Conversation>, StoreError> {
        match self.find_and_update(operation, filter, update).await? {
            Some(chat) => Ok(Some(chat)),
            None => self.find_conversation(id).await,
        }
    }

    /// Bumps counters against the member list it just read; a concurrent
    /// membership change fails the snapshot and forces a reload.
    async fn fold_message(&self, message: &Message) -> Result<Option<Conversation>, StoreError> {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let current = match self.find_conversation(&message.chat_id).await? {
                Some(chat) if chat.is_member(&message.sender) => chat,
                _ => return Ok(None),
            };

            let updated = self
                .find_and_update(
                    "deliver_message",
                    membership_snapshot(&current),
                    delivery_update(&current, message),
                )
                .await?;
            if updated.is_some() {
                return Ok(updated);
            }
            debug!(chat_id = %message.chat_id, attempt, "membership moved during delivery");
        }

        Err(StoreError::Conflict(format!(
            "chat {} kept changing during delivery",
            message.chat_id
        )))
    }

    /// The message goes in first; it is deleted again unless the conversation
    /// update lands, so a failure never leaves counters without a message.
    async fn deliver_with_rollback(
        &self,
        message: &Message,
    ) -> Result<Option<Conversation>, StoreError> {
        self.messages()
            .insert_one(MessageDocument::from(message))
            .await?;

        let outcome = self.fold_message(message).await;
        if !matches!(outcome, Ok(Some(_))) {
            if let Err(e) = self
                .messages()
                .delete_one(doc! { "_id": message.id.as_str() })
                .await
            {
                error!(%e, message_id = %message.id, "failed to discard undelivered message");
                return Err(e.into());
            }
        }
        outcome
    }

    async fn deliver_in_transaction(
        &self,
        message: &Message,
    ) -> Result<Option<Conversation>, StoreError> {
        let mut session = self.client.start_session().await?;

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            session.start_transaction().await?;

            let current = self
                .chats()
                .find_one(doc! { "_id": message.chat_id.as_str() })
                .session(&mut session)
                .await?
                .map(Conversation::from);
            let current = match current {
                Some(chat) if chat.is_member(&message.sender) => chat,
                _ => {
                    session.abort_transaction().await?;
                    return Ok(None);
                }
            };

            let updated = self
                .chats()
                .find_one_and_update(
                    membership_snapshot(&current),
                    delivery_update(&current, message),
                )
                .return_document(ReturnDocument::After)
                .session(&mut session)
                .await?;
            let Some(updated) = updated else {
                session.abort_transaction().await?;
                debug!(chat_id = %message.chat_id, attempt, "membership moved during delivery");
                continue;
            };

            self.messages()
                .insert_one(MessageDocument::from(message))
                .session(&mut session)
                .await?;

            session.commit_transaction().await?;
            return Ok(Some(updated.into()));
        }

        Err(StoreError::Conflict(format!(
            "chat {} kept changing during delivery",
            message.chat_id
        )))
    }
}

#[async_trait]
impl ConversationStore for MongoChatStore {
    async fn insert_conversation(&self, chat: &Conversation) -> Result<(), StoreError> {
        let start = Instant::now();
        self.chats()
            .insert_one(ConversationDocument::from(chat))
            .await?;
        Metrics::observe_db_query("insert_chat", start.elapsed());
        Ok(())
    }

    async fn find_conversation(&self, id: &ChatId) -> Result<Option<Conversation>, StoreError> {
        let start = Instant::now();
        let found = self.chats().find_one(doc! { "_id": id.as_str() }).await?;
        Metrics::observe_db_query("find_chat", start.elapsed());
        Ok(found.map(Conversation::from))
    }

    async fn open_direct_conversation(
        &self,
        chat: &Conversation,
    ) -> Result<Conversation, StoreError> {
        let key = chat
            .pair_key()
            .ok_or_else(|| StoreError::Corrupt(format!("chat {} is not one-on-one", chat.id)))?;
        let mut insert = to_document(&ConversationDocument::from(chat))?;
        // Supplied by the filter on upsert.
        insert.remove("pair_key");

        // A racing upsert for the same pair loses on the unique index; the
        // retry then matches the winner's record.
        for attempt in 1..=2 {
            let start = Instant::now();
            let result = self
                .chats()
                .find_one_and_update(
                    doc! { "pair_key": key.as_str() },
                    doc! { "$setOnInsert": insert.clone() },
                )
                .upsert(true)
                .return_document(ReturnDocument::After)
                .await;
            Metrics::observe_db_query("open_direct_chat", start.elapsed());

            match result {
                Ok(Some(doc)) => return Ok(doc.into()),
                Ok(None) => break,
                Err(e) if is_duplicate_key(&e) => {
                    debug!(pair = %key, attempt, "one-on-one chat opened concurrently");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(StoreError::Conflict(format!(
            "one-on-one chat {} could not be opened",
            key
        )))
    }

    async fn conversations_for(&self, user: &UserId) -> Result<Vec<Conversation>, StoreError> {
        let start = Instant::now();
        let docs: Vec<ConversationDocument> = self
            .chats()
            .find(doc! { "members": user.as_str() })
            .sort(doc! { "updated_at": -1 })
            .await?
            .try_collect()
            .await?;
        Metrics::observe_db_query("list_chats", start.elapsed());
        Ok(docs.into_iter().map(Conversation::from).collect())
    }

    async fn add_members(
        &self,
        id: &ChatId,
        users: &[UserId],
        now: DateTime<Utc>,
    ) -> Result<Option<Conversation>, StoreError> {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let Some(current) = self.find_conversation(id).await? else {
                return Ok(None);
            };
            let fresh = current.missing_members(users);
            if !current.is_group() || fresh.is_empty() {
                return Ok(Some(current));
            }

            // Zeroing a counter is only safe for users who are not members yet.
            let mut filter = membership_snapshot(&current);
            filter.insert("is_group_chat", true);
            let updated = self
                .find_and_update("add_members", filter, add_members_update(&fresh, now))
                .await?;
            if updated.is_some() {
                return Ok(updated);
            }
            debug!(chat_id = %id, attempt, "membership moved while adding participants");
        }

        Err(StoreError::Conflict(format!(
            "chat {} kept changing while adding participants",
            id
        )))
    }

    async fn remove_member(
        &self,
        id: &ChatId,
        user: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<Conversation>, StoreError> {
        self.update_or_current(
            "remove_member",
            id,
            doc! { "_id": id.as_str(), "members": user.as_str() },
            remove_member_update(user, now),
        )
        .await
    }

    async fn add_admin(
        &self,
        id: &ChatId,
        user: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<Conversation>, StoreError> {
        self.update_or_current(
            "add_admin",
            id,
            add_admin_filter(id, user),
            doc! {
                "$push": { "admins": user.as_str() },
                "$set": { "updated_at": to_bson_time(now) },
            },
        )
        .await
    }

    async fn reset_unread(
        &self,
        id: &ChatId,
        user: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<Conversation>, StoreError> {
        self.find_and_update(
            "reset_unread",
            doc! { "_id": id.as_str(), "members": user.as_str() },
            reset_unread_update(user, now),
        )
        .await
    }
}

#[async_trait]
impl MessageStore for MongoChatStore {
    async fn messages_for(&self, id: &ChatId) -> Result<Vec<Message>, StoreError> {
        let start = Instant::now();
        let docs: Vec<MessageDocument> = self
            .messages()
            .find(doc! { "chat_id": id.as_str() })
            .sort(doc! { "created_at": 1, "_id": 1 })
            .await?
            .try_collect()
            .await?;
        Metrics::observe_db_query("list_messages", start.elapsed());
        Ok(docs.into_iter().map(Message::from).collect())
    }
}

#[async_trait]
impl ChatStore for MongoChatStore {
    async fn deliver_message(&self, message: &Message) -> Result<Option<Conversation>, StoreError> {
        let delivered = if self.use_transactions {
            self.deliver_in_transaction(message).await?
        } else {
            self.deliver_with_rollback(message).await?
        };

        match &delivered {
            Some(_) => debug!(chat_id = %message.chat_id, message_id = %message.id, "message stored"),
            None => warn!(chat_id = %message.chat_id, sender = %message.sender, "delivery rejected, sender not a member"),
        }
        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mongo_db::run_database_migrations;
    use mongodb::bson::Bson;
    use std::sync::Arc;

    fn user(raw: &str) -> UserId {
        UserId::parse(raw).unwrap()
    }

    fn team() -> Conversation {
        Conversation::group(
            user("alice"),
            "team".into(),
            String::new(),
            vec![user("bob"), user("carol")],
            Utc::now(),
        )
    }

    // ==============================
    // DOCUMENT SHAPES
    // ==============================

    #[test]
    fn snapshot_pins_the_exact_member_set() {
        let chat = team();
        let filter = membership_snapshot(&chat);

        assert_eq!(filter.get_str("_id").unwrap(), chat.id.as_str());
        let members = filter.get_document("members").unwrap();
        assert_eq!(
            members.get_array("$all").unwrap(),
            &vec![
                Bson::String("alice".into()),
                Bson::String("bob".into()),
                Bson::String("carol".into())
            ]
        );
        assert_eq!(members.get_i64("$size").unwrap(), 3);
    }

    #[test]
    fn snapshot_of_an_emptied_group_matches_on_size_alone() {
        let mut chat = team();
        chat.members.clear();
        let members = membership_snapshot(&chat);
        let members = members.get_document("members").unwrap();
        assert!(members.get("$all").is_none());
        assert_eq!(members.get_i64("$size").unwrap(), 0);
    }

    #[test]
    fn delivery_increments_everyone_but_the_sender() {
        let chat = team();
        let message = Message::new(chat.id.clone(), user("bob"), "hi".into(), Utc::now());
        let update = delivery_update(&chat, &message);

        let inc = update.get_document("$inc").unwrap();
        assert_eq!(inc.len(), 2);
        assert_eq!(inc.get_i64("unread_count.alice").unwrap(), 1);
        assert_eq!(inc.get_i64("unread_count.carol").unwrap(), 1);
        assert!(inc.get("unread_count.bob").is_none());

        let set = update.get_document("$set").unwrap();
        assert_eq!(set.get_str("last_message").unwrap(), "hi");
        assert_eq!(set.get_str("last_message_by").unwrap(), "bob");
    }

    #[test]
    fn delivery_in_a_solo_chat_has_no_increment() {
        let mut chat = team();
        chat.members = vec![user("alice")];
        let message = Message::new(chat.id.clone(), user("alice"), "echo".into(), Utc::now());
        assert!(delivery_update(&chat, &message).get("$inc").is_none());
    }

    #[test]
    fn removal_pulls_membership_and_counter() {
        let update = remove_member_update(&user("bob"), Utc::now());

        let pull = update.get_document("$pull").unwrap();
        assert_eq!(pull.get_str("members").unwrap(), "bob");
        assert_eq!(pull.get_str("admins").unwrap(), "bob");
        let unset = update.get_document("$unset").unwrap();
        assert!(unset.contains_key("unread_count.bob"));
        assert!(update.get_document("$set").unwrap().contains_key("updated_at"));
    }

    #[test]
    fn adding_members_zeroes_only_the_newcomers() {
        let update = add_members_update(&[user("dave"), user("erin")], Utc::now());

        let set = update.get_document("$set").unwrap();
        assert_eq!(set.get_i64("unread_count.dave").unwrap(), 0);
        assert_eq!(set.get_i64("unread_count.erin").unwrap(), 0);
        assert_eq!(set.len(), 3);
        let each = update
            .get_document("$addToSet")
            .and_then(|d| d.get_document("members"))
            .and_then(|d| d.get_array("$each"))
            .unwrap();
        assert_eq!(each.len(), 2);
    }

    #[test]
    fn promotion_requires_membership_and_no_prior_admin() {
        let chat = team();
        let filter = add_admin_filter(&chat.id, &user("bob"));
        assert!(filter.get_bool("is_group_chat").unwrap());
        assert_eq!(filter.get_str("members").unwrap(), "bob");
        assert_eq!(
            filter.get_document("admins").unwrap().get_str("$ne").unwrap(),
            "bob"
        );
    }

    #[test]
    fn mark_read_touches_only_the_reader() {
        let update = reset_unread_update(&user("carol"), Utc::now());
        let set = update.get_document("$set").unwrap();
        assert_eq!(set.get_i64("unread_count.carol").unwrap(), 0);
        assert_eq!(set.len(), 2);
    }

    // ==============================
    // LIVE DATABASE
    // ==============================

    async fn live_store() -> MongoChatStore {
        let uri =
            std::env::var("MONGODB_URI").unwrap_or_else(|_| "mongodb://127.0.0.1:27017".into());
        let client = Client::with_uri_str(&uri).await.unwrap();
        let config = MongoDbConfig::new(uri).with_database_name(format!(
            "chat_service_test_{}",
            uuid::Uuid::new_v4().simple()
        ));
        let store = MongoChatStore::new(client, &config);
        run_database_migrations(store.database.clone()).await.unwrap();
        store
    }

    async fn live_team(store: &MongoChatStore) -> Conversation {
        let chat = team();
        store.insert_conversation(&chat).await.unwrap();
        chat
    }

    #[tokio::test]
    #[ignore = "needs a MongoDB instance at MONGODB_URI"]
    async fn test_direct_chat_is_opened_once_per_pair() {
        let store = Arc::new(live_store().await);

        let group = live_team(&store).await;
        let mut tasks = Vec::new();
        for i in 0..10 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let chat = if i % 2 == 0 {
                    Conversation::direct(user("alice"), user("bob"), Utc::now())
                } else {
                    Conversation::direct(user("bob"), user("alice"), Utc::now())
                };
                store.open_direct_conversation(&chat).await.unwrap()
            }));
        }
        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap().id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_ne!(ids[0], group.id);

        let opened = store.find_conversation(&ids[0]).await.unwrap().unwrap();
        assert!(!opened.is_group());
        assert_eq!(opened.unread_count.len(), 2);

        store.database.drop().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "needs a MongoDB instance at MONGODB_URI"]
    async fn test_delivery_follows_current_membership() {
        let store = live_store().await;
        let chat = live_team(&store).await;

        store
            .remove_member(&chat.id, &user("carol"), Utc::now())
            .await
            .unwrap();
        let message = Message::new(chat.id.clone(), user("alice"), "hi".into(), Utc::now());
        let updated = store.deliver_message(&message).await.unwrap().unwrap();

        assert_eq!(updated.members, vec![user("alice"), user("bob")]);
        assert!(!updated.unread_count.contains(&user("carol")));
        assert_eq!(updated.unread_count.get(&user("bob")), 1);
        assert_eq!(updated.unread_count.get(&user("alice")), 0);
        assert_eq!(updated.last_message, "hi");
        assert_eq!(store.messages_for(&chat.id).await.unwrap().len(), 1);

        store.database.drop().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "needs a MongoDB instance at MONGODB_URI"]
    async fn test_rejected_delivery_leaves_no_message() {
        let store = live_store().await;
        let chat = live_team(&store).await;

        let message = Message::new(chat.id.clone(), user("dave"), "knock".into(), Utc::now());
        assert!(store.deliver_message(&message).await.unwrap().is_none());
        assert!(store.messages_for(&chat.id).await.unwrap().is_empty());

        let current = store.find_conversation(&chat.id).await.unwrap().unwrap();
        assert_eq!(current.last_message, "");
        assert_eq!(current.unread_count.get(&user("alice")), 0);

        store.database.drop().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "needs a MongoDB instance at MONGODB_URI"]
    async fn test_membership_updates_keep_counters_consistent() {
        let store = live_store().await;
        let chat = live_team(&store).await;

        let message = Message::new(chat.id.clone(), user("alice"), "one".into(), Utc::now());
        store.deliver_message(&message).await.unwrap();

        // Re-adding present members must not zero their counters.
        let updated = store
            .add_members(&chat.id, &[user("bob"), user("dave")], Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.members.len(), 4);
        assert_eq!(updated.unread_count.get(&user("bob")), 1);
        assert_eq!(updated.unread_count.get(&user("dave")), 0);

        let promoted = store
            .add_admin(&chat.id, &user("bob"), Utc::now())
            .await
            .unwrap()
            .unwrap();
        let again = store
            .add_admin(&chat.id, &user("bob"), Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(promoted.admins, vec![user("alice"), user("bob")]);
        assert_eq!(again.admins, promoted.admins);

        let removed = store
            .remove_member(&chat.id, &user("bob"), Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert!(!removed.is_member(&user("bob")));
        assert_eq!(removed.admins, vec![user("alice")]);
        assert!(!removed.unread_count.contains(&user("bob")));

        let read = store
            .reset_unread(&chat.id, &user("carol"), Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read.unread_count.get(&user("carol")), 0);
        assert!(
            store
                .reset_unread(&chat.id, &user("bob"), Utc::now())
                .await
                .unwrap()
                .is_none()
        );

        store.database.drop().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "needs a MongoDB instance at MONGODB_URI"]
    async fn test_messages_and_listing_order() {
        let store = live_store().await;
        let older = live_team(&store).await;
        let newer = live_team(&store).await;

        for text in ["a", "b", "c"] {
            let message = Message::new(older.id.clone(), user("bob"), text.into(), Utc::now());
            store.deliver_message(&message).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        let texts: Vec<String> = store
            .messages_for(&older.id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts, vec!["a", "b", "c"]);

        let listed = store.conversations_for(&user("alice")).await.unwrap();
        assert_eq!(listed[0].id, older.id);
        assert_eq!(listed[1].id, newer.id);
        assert_eq!(listed[0].unread_count.get(&user("alice")), 3);

        store.database.drop().await.unwrap();
    }
}
