use log::warn;
use uuid::Uuid;

use crate::{
    database::Database,
    error::AppResult,
    models::{NewNotification, Notification, Role},
    realtime::EventKind,
    state::AppState,
};

/// Stores one notification per recipient and pushes each to its user room.
pub async fn notify_users(
    state: &AppState,
    recipients: &[Uuid],
    notification: &NewNotification,
) -> AppResult<Vec<Notification>> {
    let mut recipients = recipients.to_vec();
    recipients.sort();
    recipients.dedup();

    if recipients.is_empty() {
        return Ok(Vec::new());
    }

    let created = sqlx::query_as::<_, Notification>(
        r#"
        INSERT INTO notifications (user_id, category, priority, title, message, link, metadata)
        SELECT recipient, $2, $3, $4, $5, $6, $7
        FROM UNNEST($1::uuid[]) AS recipient
        RETURNING *
        "#,
    )
    .bind(&recipients)
    .bind(notification.category.as_str())
    .bind(notification.priority.as_str())
    .bind(&notification.title)
    .bind(&notification.message)
    .bind(&notification.link)
    .bind(notification.metadata.clone().map(sqlx::types::Json))
    .fetch_all(&state.db)
    .await?;

    for row in &created {
        state
            .hub
            .emit_to_user(row.user_id, EventKind::NewNotification, row)
            .await;
    }

    Ok(created)
}

/// Fan-out that never fails the surrounding request.
pub async fn notify_best_effort(state: &AppState, recipients: &[Uuid], notification: NewNotification) {
    if let Err(e) = notify_users(state, recipients, &notification).await {
        warn!("Failed to deliver notification '{}': {e}", notification.title);
    }
}

pub async fn department_members(
    db: &Database,
    department: &str,
    exclude: Option<Uuid>,
) -> AppResult<Vec<Uuid>> {
    let ids = sqlx::query_scalar::<_, Uuid>(
        "SELECT id FROM profiles WHERE department = $1 AND is_active = true AND ($2::uuid IS NULL OR id <> $2)",
    )
    .bind(department)
    .bind(exclude)
    .fetch_all(db)
    .await?;

    Ok(ids)
}

pub async fn department_managers(db: &Database, department: &str) -> AppResult<Vec<Uuid>> {
    let ids = sqlx::query_scalar::<_, Uuid>(
        r#"
        SELECT p.id FROM profiles p
        JOIN user_roles ur ON ur.user_id = p.id
        WHERE p.department = $1 AND p.is_active = true AND ur.role = $2
        "#,
    )
    .bind(department)
    .bind(Role::DepartmentManager.as_str())
    .fetch_all(db)
    .await?;

    Ok(ids)
}

pub async fn admins(db: &Database) -> AppResult<Vec<Uuid>> {
    let ids = sqlx::query_scalar::<_, Uuid>(
        r#"
        SELECT p.id FROM profiles p
        JOIN user_roles ur ON ur.user_id = p.id
        WHERE p.is_active = true AND ur.role = $1
        "#,
    )
    .bind(Role::Admin.as_str())
    .fetch_all(db)
    .await?;

    Ok(ids)
}
