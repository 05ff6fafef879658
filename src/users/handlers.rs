use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use tracing::instrument;

use crate::{
    state::AppState,
    users::{
        dto::{IndexQuery, UserPayload},
        errors::UserResult,
        repo_types::User,
    },
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(index).post(create))
        .route("/users/:id", get(view).put(update).delete(delete))
}

// Bodies are taken as raw bytes and decoded by the service, which decides
// when decoding happens relative to the existence check.

#[instrument(skip(state, body))]
pub async fn create(State(state): State<AppState>, body: Bytes) -> UserResult<Json<User>> {
    let user = state.users.create(&UserPayload::new(body)).await?;
    Ok(Json(user))
}

#[instrument(skip(state))]
pub async fn index(
    State(state): State<AppState>,
    Query(query): Query<IndexQuery>,
) -> UserResult<Json<Vec<User>>> {
    let users = state.users.index(query.country.as_deref()).await?;
    Ok(Json(users))
}

#[instrument(skip(state))]
pub async fn view(State(state): State<AppState>, Path(id): Path<String>) -> UserResult<Json<User>> {
    let user = state.users.view(&id).await?;
    Ok(Json(user))
}

#[instrument(skip(state, body))]
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> UserResult<StatusCode> {
    state.users.update(&id, &UserPayload::new(body)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn delete(State(state): State<AppState>, Path(id): Path<String>) -> UserResult<StatusCode> {
    state.users.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
