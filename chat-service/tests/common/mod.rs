#![allow(dead_code)]

use chat_service::{
    auth::StaticTokenVerifier,
    identity::{MemoryUserDirectory, UserProfile},
    models::UserId,
    service::ChatService,
    state::{AppState, AppStateBuilder},
    store::MemoryStore,
};
use std::sync::Arc;

pub const ALICE: &str = "alice";
pub const BOB: &str = "bob";
pub const CAROL: &str = "carol";
pub const DAVE: &str = "dave";
/// Known to tokens but absent from the user directory.
pub const ERIN: &str = "erin";

pub fn user(raw: &str) -> UserId {
    UserId::parse(raw).expect("fixture ids are valid")
}

pub fn token_for(raw: &str) -> String {
    format!("cstok_{}", raw)
}

pub fn directory() -> MemoryUserDirectory {
    MemoryUserDirectory::new()
        .with_user(user(ALICE), UserProfile::new("Alice", "alice@example.com"))
        .with_user(user(BOB), UserProfile::new("Bob", "bob@example.com"))
        .with_user(user(CAROL), UserProfile::new("Carol", "carol@example.com"))
        .with_user(user(DAVE), UserProfile::new("Dave", "dave@example.com"))
}

pub fn service() -> (ChatService, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let service = ChatService::new(store.clone(), Arc::new(directory()));
    (service, store)
}

pub fn app_state() -> (AppState, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let mut tokens = StaticTokenVerifier::new();
    for id in [ALICE, BOB, CAROL, DAVE, ERIN] {
        tokens = tokens.with_token(token_for(id), user(id));
    }

    let state = AppStateBuilder::new()
        .with_store(store.clone())
        .with_directory(Arc::new(directory()))
        .with_token_verifier(Arc::new(tokens))
        .build()
        .expect("all collaborators provided");
    (state, store)
}
