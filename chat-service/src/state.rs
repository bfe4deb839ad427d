use std::sync::Arc;
use tracing::info;

use crate::{
    auth::{RedisTokenVerifier, TokenVerifier},
    config::ServiceConfig,
    identity::UserDirectory,
    mongo_db::{MongoChatStore, MongoUserDirectory, run_database_migrations},
    service::ChatService,
    store::ChatStore,
};

pub struct AppState {
    pub chats: ChatService,
    pub tokens: Arc<dyn TokenVerifier>,
}

#[derive(Default)]
pub struct AppStateBuilder {
    store: Option<Arc<dyn ChatStore>>,
    directory: Option<Arc<dyn UserDirectory>>,
    tokens: Option<Arc<dyn TokenVerifier>>,
}

impl AppStateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(mut self, store: Arc<dyn ChatStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_directory(mut self, directory: Arc<dyn UserDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn with_token_verifier(mut self, tokens: Arc<dyn TokenVerifier>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Wires the production collaborators: MongoDB for chats, messages and
    /// user profiles, Redis for session tokens. Runs index migrations first.
    pub async fn connect(self, config: &ServiceConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let client = mongodb::Client::with_uri_str(&config.mongo.connection_url).await?;
        let database = client.database(&config.mongo.database_name);
        run_database_migrations(database.clone()).await?;
        info!(database = %config.mongo.database_name, "connected to MongoDB");

        let redis_client = redis::Client::open(config.redis_url.as_str())?;
        let tokens = RedisTokenVerifier::connect(&redis_client).await?;
        info!("connected to Redis");

        Ok(self
            .with_store(Arc::new(MongoChatStore::new(client, &config.mongo)))
            .with_directory(Arc::new(MongoUserDirectory::new(&database)))
            .with_token_verifier(Arc::new(tokens)))
    }

    pub fn build(self) -> Result<AppState, Box<dyn std::error::Error>> {
        let store = self.store.ok_or("chat store required")?;
        let directory = self.directory.ok_or("user directory required")?;
        let tokens = self.tokens.ok_or("token verifier required")?;

        Ok(AppState {
            chats: ChatService::new(store, directory),
            tokens,
        })
    }
}
