pub mod auth;
pub mod calendar;
pub mod dashboard;
pub mod departments;
pub mod kpis;
pub mod meeting_rooms;
pub mod notifications;
pub mod profiles;
pub mod tickets;
pub mod ws;

use axum::response::Json;
use serde::Serialize;
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{role::parse_roles, Role},
};

#[derive(Serialize)]
pub struct Success {
    pub success: bool,
}

pub fn success() -> Json<Success> {
    Json(Success { success: true })
}

pub async fn health() -> &'static str {
    "ok"
}

pub(crate) async fn load_roles<'e>(db: impl PgExecutor<'e>, user_id: Uuid) -> AppResult<Vec<Role>> {
    let names = sqlx::query_scalar::<_, String>("SELECT role FROM user_roles WHERE user_id = $1 ORDER BY role")
        .bind(user_id)
        .fetch_all(db)
        .await?;

    Ok(parse_roles(names.iter().map(String::as_str)))
}

/// Creates the department row on first use so free-text departments stay listed.
pub(crate) async fn ensure_department<'e>(db: impl PgExecutor<'e>, name: &str) -> AppResult<()> {
    sqlx::query("INSERT INTO departments (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
        .bind(name)
        .execute(db)
        .await?;

    Ok(())
}

pub(crate) fn required(value: &str, field: &str) -> AppResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(AppError::bad_request(format!("{field} alanı zorunludur")))
    } else {
        Ok(trimmed.to_string())
    }
}

pub(crate) fn one_of(value: &str, allowed: &[&str], field: &str) -> AppResult<()> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(AppError::bad_request(format!("Geçersiz {field}: {value}")))
    }
}

/// Maps a unique-constraint violation to a 400 with the given message.
pub(crate) fn unique_violation(message: &'static str) -> impl FnOnce(sqlx::Error) -> AppError {
    move |e| match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => AppError::bad_request(message),
        _ => AppError::Database(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_trims_and_rejects_blank() {
        assert_eq!(required("  IT ", "Departman").unwrap(), "IT");
        assert!(required("   ", "Departman").is_err());
    }

    #[test]
    fn one_of_checks_membership() {
        assert!(one_of("high", &["low", "high"], "öncelik").is_ok());
        let err = one_of("extreme", &["low", "high"], "öncelik").unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }
}
