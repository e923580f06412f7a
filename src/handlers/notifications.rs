use axum::{
    extract::{Path, State},
    response::Json,
};
use uuid::Uuid;

use super::{success, Success};
use crate::{
    error::{AppError, AppResult},
    middleware::CurrentUser,
    models::{notification::UnreadCount, Notification},
    state::AppState,
};

fn not_found() -> AppError {
    AppError::not_found("Bildirim bulunamadı")
}

pub async fn list_notifications(
    State(state): State<AppState>,
    user: CurrentUser,
) -> AppResult<Json<Vec<Notification>>> {
    let notifications = sqlx::query_as::<_, Notification>(
        "SELECT * FROM notifications WHERE user_id = $1 ORDER BY created_at DESC",
    )
    .bind(user.id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(notifications))
}

pub async fn unread_count(State(state): State<AppState>, user: CurrentUser) -> AppResult<Json<UnreadCount>> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND is_read = false",
    )
    .bind(user.id)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(UnreadCount { count }))
}

pub async fn mark_read(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Notification>> {
    sqlx::query_as::<_, Notification>(
        "UPDATE notifications SET is_read = true WHERE id = $1 AND user_id = $2 RETURNING *",
    )
    .bind(id)
    .bind(user.id)
    .fetch_optional(&state.db)
    .await?
    .map(Json)
    .ok_or_else(not_found)
}

pub async fn mark_all_read(State(state): State<AppState>, user: CurrentUser) -> AppResult<Json<Success>> {
    sqlx::query("UPDATE notifications SET is_read = true WHERE user_id = $1 AND is_read = false")
        .bind(user.id)
        .execute(&state.db)
        .await?;

    Ok(success())
}

pub async fn delete_notification(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Success>> {
    let result = sqlx::query("DELETE FROM notifications WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user.id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(not_found());
    }
    Ok(success())
}

pub async fn delete_all(State(state): State<AppState>, user: CurrentUser) -> AppResult<Json<Success>> {
    sqlx::query("DELETE FROM notifications WHERE user_id = $1")
        .bind(user.id)
        .execute(&state.db)
        .await?;

    Ok(success())
}

pub async fn delete_read(State(state): State<AppState>, user: CurrentUser) -> AppResult<Json<Success>> {
    sqlx::query("DELETE FROM notifications WHERE user_id = $1 AND is_read = true")
        .bind(user.id)
        .execute(&state.db)
        .await?;

    Ok(success())
}
