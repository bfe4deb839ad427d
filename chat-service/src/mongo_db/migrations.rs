use mongodb::{Database, IndexModel, bson::doc, options::IndexOptions};
use tracing::info;

use super::models::{CHATS, ConversationDocument, MESSAGES, MessageDocument};
use crate::error::StoreError;

pub struct DatabaseMigrations {
    database: Database,
}

impl DatabaseMigrations {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        info!(database = %self.database.name(), "starting database migrations");

        self.create_chat_indexes().await?;
        self.create_message_indexes().await?;

        info!("database migrations completed");
        Ok(())
    }

    async fn create_chat_indexes(&self) -> Result<(), StoreError> {
        let chats = self.database.collection::<ConversationDocument>(CHATS);

        chats
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "members": 1 })
                    .options(IndexOptions::builder().name("members".to_string()).build())
                    .build(),
            )
            .await?;
        chats
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "updated_at": -1 })
                    .options(
                        IndexOptions::builder()
                            .name("updated_at_desc".to_string())
                            .build(),
                    )
                    .build(),
            )
            .await?;

        chats
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "pair_key": 1 })
                    .options(
                        IndexOptions::builder()
                            .name("direct_pair_key".to_string())
                            .unique(true)
                            .partial_filter_expression(doc! { "pair_key": { "$exists": true } })
                            .build(),
                    )
                    .build(),
            )
            .await?;

        info!(collection = CHATS, "indexes ready");
        Ok(())
    }

    async fn create_message_indexes(&self) -> Result<(), StoreError> {
        let messages = self.database.collection::<MessageDocument>(MESSAGES);

        messages
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "chat_id": 1, "created_at": 1 })
                    .options(
                        IndexOptions::builder()
                            .name("chat_id_created_at".to_string())
                            .build(),
                    )
                    .build(),
            )
            .await?;

        info!(collection = MESSAGES, "indexes ready");
        Ok(())
    }
}

pub async fn run_database_migrations(database: Database) -> Result<(), StoreError> {
    DatabaseMigrations::new(database).run_migrations().await
}
