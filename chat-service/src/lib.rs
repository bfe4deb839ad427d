use axum::{
    Router,
    http::{self, Method},
    middleware,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::{
    metrics::{metrics_handler, metrics_middleware},
    state::AppState,
};

pub mod auth;
pub mod config;
pub mod dto;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod metrics;
pub mod models;
pub mod mongo_db;
pub mod service;
pub mod state;
pub mod store;

fn chat_routes() -> Router<Arc<AppState>> {
    Router::new()
        // Conversation creation
        .route("/", post(handlers::access_chat).get(handlers::fetch_chats))
        .route("/group", post(handlers::create_group_chat))
        // Participant management
        .route(
            "/group/add-participants",
            post(handlers::add_participants),
        )
        .route(
            "/group/remove-participant",
            post(handlers::remove_participant),
        )
        .route("/group/make-admin", post(handlers::make_admin))
        // Conversation metadata
        .route("/mark-read", post(handlers::mark_as_read))
        .route("/{chat_id}", get(handlers::get_chat_details))
        // Messaging
        .route("/message", post(handlers::send_message))
        .route("/message/{chat_id}", get(handlers::get_messages))
}

pub fn chat_route(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            http::header::ACCEPT,
            http::header::CONTENT_TYPE,
            http::header::AUTHORIZATION,
            http::header::ORIGIN,
        ])
        .allow_origin(AllowOrigin::any());

    Router::new()
        .route("/", get(handlers::health))
        .route("/metrics", get(metrics_handler))
        .nest("/api/chats", chat_routes())
        .layer(middleware::from_fn(metrics_middleware))
        .layer(cors)
        .with_state(state)
}
