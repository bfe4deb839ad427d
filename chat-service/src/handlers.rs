use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use std::sync::Arc;

use crate::{
    auth::AuthenticatedUser,
    dto::{
        AccessChatRequest, AddParticipantsRequest, ConversationView, CreateGroupRequest,
        MarkReadRequest, MarkReadResponse, MemberRequest, MessageView, SendMessageRequest,
    },
    error::ChatError,
    state::AppState,
};

type Body<T> = Result<Json<T>, JsonRejection>;

pub async fn health() -> &'static str {
    "Chat Service is running"
}

pub async fn access_chat(
    State(state): State<Arc<AppState>>,
    caller: AuthenticatedUser,
    body: Body<AccessChatRequest>,
) -> Result<Json<ConversationView>, ChatError> {
    let Json(request) = body?;
    let chat = state
        .chats
        .access_direct_chat(&caller.user_id, &request)
        .await?;
    Ok(Json(chat))
}

pub async fn create_group_chat(
    State(state): State<Arc<AppState>>,
    caller: AuthenticatedUser,
    body: Body<CreateGroupRequest>,
) -> Result<(StatusCode, Json<ConversationView>), ChatError> {
    let Json(request) = body?;
    let chat = state.chats.create_group(&caller.user_id, request).await?;
    Ok((StatusCode::CREATED, Json(chat)))
}

pub async fn add_participants(
    State(state): State<Arc<AppState>>,
    caller: AuthenticatedUser,
    body: Body<AddParticipantsRequest>,
) -> Result<Json<ConversationView>, ChatError> {
    let Json(request) = body?;
    let chat = state
        .chats
        .add_participants(&caller.user_id, request)
        .await?;
    Ok(Json(chat))
}

pub async fn remove_participant(
    State(state): State<Arc<AppState>>,
    caller: AuthenticatedUser,
    body: Body<MemberRequest>,
) -> Result<Json<ConversationView>, ChatError> {
    let Json(request) = body?;
    let chat = state
        .chats
        .remove_participant(&caller.user_id, request)
        .await?;
    Ok(Json(chat))
}

pub async fn make_admin(
    State(state): State<Arc<AppState>>,
    caller: AuthenticatedUser,
    body: Body<MemberRequest>,
) -> Result<Json<ConversationView>, ChatError> {
    let Json(request) = body?;
    let chat = state.chats.make_admin(&caller.user_id, request).await?;
    Ok(Json(chat))
}

pub async fn fetch_chats(
    State(state): State<Arc<AppState>>,
    caller: AuthenticatedUser,
) -> Result<Json<Vec<ConversationView>>, ChatError> {
    let chats = state.chats.list_conversations(&caller.user_id).await?;
    Ok(Json(chats))
}

pub async fn get_chat_details(
    State(state): State<Arc<AppState>>,
    caller: AuthenticatedUser,
    Path(chat_id): Path<String>,
) -> Result<Json<ConversationView>, ChatError> {
    let chat = state
        .chats
        .conversation_details(&caller.user_id, &chat_id)
        .await?;
    Ok(Json(chat))
}

pub async fn mark_as_read(
    State(state): State<Arc<AppState>>,
    caller: AuthenticatedUser,
    body: Body<MarkReadRequest>,
) -> Result<Json<MarkReadResponse>, ChatError> {
    let Json(request) = body?;
    let unread_count = state
        .chats
        .mark_as_read(&caller.user_id, request.chat_id.as_deref())
        .await?;
    Ok(Json(MarkReadResponse {
        message: "Messages marked as read".to_string(),
        unread_count,
    }))
}

pub async fn send_message(
    State(state): State<Arc<AppState>>,
    caller: AuthenticatedUser,
    body: Body<SendMessageRequest>,
) -> Result<(StatusCode, Json<MessageView>), ChatError> {
    let Json(request) = body?;
    let message = state.chats.send_message(&caller.user_id, request).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn get_messages(
    State(state): State<Arc<AppState>>,
    caller: AuthenticatedUser,
    Path(chat_id): Path<String>,
) -> Result<Json<Vec<MessageView>>, ChatError> {
    let messages = state
        .chats
        .list_messages(&caller.user_id, &chat_id)
        .await?;
    Ok(Json(messages))
}
