//! `GET /api/conversations/{id}` and `POST /api/conversations/{id}/messages`.

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};

use {
    parley_common::{Entity, Error, now_ms},
    parley_conversations::{SendOutcome, SendRequest, WindowState, is_within_window, window_state},
    parley_store::{Conversation, Message},
    serde::Serialize,
};

use crate::{error::ApiResult, server::AppState};

/// Most recent messages returned with a conversation.
const RECENT_MESSAGES: i64 = 50;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub within_window: bool,
    pub window_state: WindowState,
    pub messages: Vec<Message>,
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ConversationView>> {
    let store = &state.gateway.store;
    let conversation = store
        .get_conversation(&id)
        .await
        .map_err(Error::from)?
        .ok_or_else(|| Error::not_found(Entity::Conversation, &id))?;
    let messages = store
        .list_messages(&id, RECENT_MESSAGES)
        .await
        .map_err(Error::from)?;

    let now = now_ms();
    Ok(Json(ConversationView {
        within_window: is_within_window(&conversation, now),
        window_state: window_state(&conversation, now),
        conversation,
        messages,
    }))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<SendRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SendOutcome>)> {
    let Json(request) = payload?;
    let outcome = state.gateway.outbound.send(&id, request).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}
