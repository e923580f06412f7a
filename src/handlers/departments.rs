use axum::{
    extract::{Path, State},
    response::Json,
};
use log::info;
use uuid::Uuid;

use super::{required, success, unique_violation, Success};
use crate::{
    error::{AppError, AppResult},
    middleware::CurrentUser,
    models::department::{Department, DepartmentRequest, DepartmentWithCount},
    state::AppState,
};

const DUPLICATE: &str = "Bu isimde bir departman zaten var";

pub async fn list_departments(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> AppResult<Json<Vec<DepartmentWithCount>>> {
    let departments = sqlx::query_as::<_, DepartmentWithCount>(
        r#"
        SELECT d.id, d.name, d.created_at, d.updated_at,
               (SELECT COUNT(*) FROM profiles p WHERE p.department = d.name) AS user_count
        FROM departments d
        ORDER BY d.name
        "#,
    )
    .fetch_all(&state.db)
    .await?;

    Ok(Json(departments))
}

pub async fn create_department(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<DepartmentRequest>,
) -> AppResult<Json<Department>> {
    user.require_admin()?;
    let name = required(&payload.name, "Departman adı")?;

    let department = sqlx::query_as::<_, Department>("INSERT INTO departments (name) VALUES ($1) RETURNING *")
        .bind(&name)
        .fetch_one(&state.db)
        .await
        .map_err(unique_violation(DUPLICATE))?;

    info!("Department '{name}' created by {}", user.email);
    Ok(Json(department))
}

/// Renames a department and rewrites every text reference to the old name.
pub async fn update_department(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<DepartmentRequest>,
) -> AppResult<Json<Department>> {
    user.require_admin()?;
    let name = required(&payload.name, "Departman adı")?;

    let mut tx = state.db.begin().await?;

    let old_name = sqlx::query_scalar::<_, String>("SELECT name FROM departments WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::not_found("Departman bulunamadı"))?;

    let department = sqlx::query_as::<_, Department>(
        "UPDATE departments SET name = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(&name)
    .fetch_one(&mut *tx)
    .await
    .map_err(unique_violation(DUPLICATE))?;

    if old_name != name {
        for statement in [
            "UPDATE profiles SET department = $2 WHERE department = $1",
            "UPDATE kpi_targets SET department = $2 WHERE department = $1",
            "UPDATE tickets SET source_department = $2 WHERE source_department = $1",
            "UPDATE tickets SET target_department = $2 WHERE target_department = $1",
        ] {
            sqlx::query(statement)
                .bind(&old_name)
                .bind(&name)
                .execute(&mut *tx)
                .await?;
        }
    }

    tx.commit().await?;

    info!("Department '{old_name}' renamed to '{name}'");
    Ok(Json(department))
}

pub async fn delete_department(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Success>> {
    user.require_admin()?;

    let name = sqlx::query_scalar::<_, String>("SELECT name FROM departments WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::not_found("Departman bulunamadı"))?;

    let members = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM profiles WHERE department = $1")
        .bind(&name)
        .fetch_one(&state.db)
        .await?;

    if members > 0 {
        return Err(AppError::conflict(format!(
            "Bu departmanda {members} kullanıcı var; önce kullanıcıları taşıyın"
        )));
    }

    sqlx::query("DELETE FROM departments WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await?;

    info!("Department '{name}' deleted by {}", user.email);
    Ok(success())
}
