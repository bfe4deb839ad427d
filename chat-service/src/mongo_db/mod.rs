pub mod directory;
pub mod migrations;
pub mod models;
pub mod store;

pub use directory::MongoUserDirectory;
pub use migrations::run_database_migrations;
pub use store::MongoChatStore;
