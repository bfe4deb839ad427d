use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    Collection, Database,
    bson::{Bson, doc, oid::ObjectId},
};
use std::{collections::HashMap, time::Instant};

use super::models::{USERS, UserDocument};
use crate::{
    error::StoreError,
    identity::{UserDirectory, UserProfile},
    metrics::Metrics,
    models::UserId,
};

pub struct MongoUserDirectory {
    users: Collection<UserDocument>,
}

impl MongoUserDirectory {
    pub fn new(database: &Database) -> Self {
        Self {
            users: database.collection(USERS),
        }
    }
}

fn id_candidates(ids: &[UserId]) -> Vec<Bson> {
    let mut candidates = Vec::with_capacity(ids.len() * 2);
    for id in ids {
        if let Ok(oid) = ObjectId::parse_str(id.as_str()) {
            candidates.push(Bson::ObjectId(oid));
        }
        candidates.push(Bson::String(id.as_str().to_string()));
    }
    candidates
}

#[async_trait]
impl UserDirectory for MongoUserDirectory {
    async fn lookup(&self, ids: &[UserId]) -> Result<HashMap<UserId, UserProfile>, StoreError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let start = Instant::now();
        let docs: Vec<UserDocument> = self
            .users
            .find(doc! { "_id": { "$in": id_candidates(ids) } })
            .projection(doc! { "name": 1, "contact": 1 })
            .await?
            .try_collect()
            .await?;
        Metrics::observe_db_query("lookup_users", start.elapsed());

        let mut profiles = HashMap::with_capacity(docs.len());
        for doc in docs {
            let Some(key) = doc.key() else { continue };
            let Some(id) = ids.iter().find(|id| id.as_str() == key) else {
                continue;
            };
            profiles.insert(
                id.clone(),
                UserProfile::new(doc.name.unwrap_or_default(), doc.contact.unwrap_or_default()),
            );
        }
        Ok(profiles)
    }
}
