use axum::{
    extract::{Path, State},
    response::Json,
};
use chrono::{NaiveDate, NaiveDateTime};
use log::info;
use uuid::Uuid;

use super::{required, success, unique_violation, Success};
use crate::{
    error::{AppError, AppResult},
    middleware::CurrentUser,
    models::calendar::{
        ActivityRow, ActivityWithCategory, CalendarActivity, CalendarCategory, CategoryRequest,
        CreateActivityRequest, UpdateActivityRequest,
    },
    state::AppState,
    utils::schedule::{at, duration_minutes, parse_clock},
};

const DUPLICATE_CATEGORY: &str = "Bu isimde bir kategori zaten var";

const ACTIVITY_SELECT: &str = r#"
    SELECT a.*, c.name AS category_name, c.color AS category_color, c.created_at AS category_created_at
    FROM calendar_activities a
    JOIN calendar_categories c ON c.id = a.category_id
"#;

struct Slot {
    start: NaiveDateTime,
    end: NaiveDateTime,
    duration: i32,
}

fn resolve_slot(date: NaiveDate, start: &str, end: &str) -> AppResult<Slot> {
    let parse = |value: &str| {
        parse_clock(value).ok_or_else(|| AppError::bad_request(format!("Geçersiz saat: {value}")))
    };
    let start = at(date, parse(start)?);
    let end = at(date, parse(end)?);

    if end <= start {
        return Err(AppError::bad_request("Bitiş saati başlangıç saatinden sonra olmalıdır"));
    }

    Ok(Slot {
        start,
        end,
        duration: duration_minutes(start, end),
    })
}

pub async fn list_categories(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> AppResult<Json<Vec<CalendarCategory>>> {
    let categories = sqlx::query_as::<_, CalendarCategory>("SELECT * FROM calendar_categories ORDER BY name")
        .fetch_all(&state.db)
        .await?;

    Ok(Json(categories))
}

pub async fn create_category(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<CategoryRequest>,
) -> AppResult<Json<CalendarCategory>> {
    user.require_admin()?;
    let name = required(&payload.name, "Kategori adı")?;
    let color = required(&payload.color, "Renk")?;

    let category = sqlx::query_as::<_, CalendarCategory>(
        "INSERT INTO calendar_categories (name, color) VALUES ($1, $2) RETURNING *",
    )
    .bind(&name)
    .bind(&color)
    .fetch_one(&state.db)
    .await
    .map_err(unique_violation(DUPLICATE_CATEGORY))?;

    Ok(Json(category))
}

pub async fn update_category(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<CategoryRequest>,
) -> AppResult<Json<CalendarCategory>> {
    user.require_admin()?;
    let name = required(&payload.name, "Kategori adı")?;
    let color = required(&payload.color, "Renk")?;

    let category = sqlx::query_as::<_, CalendarCategory>(
        "UPDATE calendar_categories SET name = $2, color = $3 WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(&name)
    .bind(&color)
    .fetch_optional(&state.db)
    .await
    .map_err(unique_violation(DUPLICATE_CATEGORY))?
    .ok_or_else(|| AppError::not_found("Kategori bulunamadı"))?;

    Ok(Json(category))
}

pub async fn delete_category(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Success>> {
    user.require_admin()?;

    let in_use = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM calendar_activities WHERE category_id = $1")
        .bind(id)
        .fetch_one(&state.db)
        .await?;

    if in_use > 0 {
        return Err(AppError::conflict(format!(
            "Bu kategori {in_use} aktivitede kullanılıyor"
        )));
    }

    let result = sqlx::query("DELETE FROM calendar_categories WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("Kategori bulunamadı"));
    }
    Ok(success())
}

async fn category_exists(state: &AppState, id: Uuid) -> AppResult<()> {
    let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM calendar_categories WHERE id = $1)")
        .bind(id)
        .fetch_one(&state.db)
        .await?;

    if exists {
        Ok(())
    } else {
        Err(AppError::bad_request("Geçersiz kategori"))
    }
}

async fn find_activity(state: &AppState, id: Uuid) -> AppResult<ActivityWithCategory> {
    let sql = format!("{ACTIVITY_SELECT} WHERE a.id = $1");
    sqlx::query_as::<_, ActivityRow>(&sql)
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .map(ActivityWithCategory::from)
        .ok_or_else(|| AppError::not_found("Aktivite bulunamadı"))
}

async fn owned_activity(state: &AppState, user: &CurrentUser, id: Uuid) -> AppResult<CalendarActivity> {
    let activity = sqlx::query_as::<_, CalendarActivity>("SELECT * FROM calendar_activities WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::not_found("Aktivite bulunamadı"))?;

    if activity.user_id != user.id {
        return Err(AppError::forbidden("Yalnızca kendi aktivitelerinizi değiştirebilirsiniz"));
    }
    Ok(activity)
}

pub async fn list_activities(
    State(state): State<AppState>,
    user: CurrentUser,
) -> AppResult<Json<Vec<ActivityWithCategory>>> {
    let rows = if user.is_admin() {
        let sql = format!("{ACTIVITY_SELECT} ORDER BY a.date DESC, a.start_time");
        sqlx::query_as::<_, ActivityRow>(&sql).fetch_all(&state.db).await?
    } else if user.is_department_manager() {
        let sql = format!(
            "{ACTIVITY_SELECT} WHERE a.user_id IN (SELECT id FROM profiles WHERE department = $1) ORDER BY a.date DESC, a.start_time"
        );
        sqlx::query_as::<_, ActivityRow>(&sql)
            .bind(&user.department)
            .fetch_all(&state.db)
            .await?
    } else {
        let sql = format!("{ACTIVITY_SELECT} WHERE a.user_id = $1 ORDER BY a.date DESC, a.start_time");
        sqlx::query_as::<_, ActivityRow>(&sql)
            .bind(user.id)
            .fetch_all(&state.db)
            .await?
    };

    Ok(Json(rows.into_iter().map(ActivityWithCategory::from).collect()))
}

pub async fn create_activity(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<CreateActivityRequest>,
) -> AppResult<Json<ActivityWithCategory>> {
    let title = required(&payload.title, "Başlık")?;
    let slot = resolve_slot(payload.date, &payload.start_time, &payload.end_time)?;
    category_exists(&state, payload.category_id).await?;

    let id = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO calendar_activities
            (title, description, category_id, user_id, date, start_time, end_time, duration)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id
        "#,
    )
    .bind(&title)
    .bind(&payload.description)
    .bind(payload.category_id)
    .bind(user.id)
    .bind(payload.date)
    .bind(slot.start)
    .bind(slot.end)
    .bind(slot.duration)
    .fetch_one(&state.db)
    .await?;

    info!("Activity '{title}' logged by {} ({} min)", user.email, slot.duration);
    Ok(Json(find_activity(&state, id).await?))
}

pub async fn update_activity(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateActivityRequest>,
) -> AppResult<Json<ActivityWithCategory>> {
    let existing = owned_activity(&state, &user, id).await?;

    let title = match &payload.title {
        Some(title) => required(title, "Başlık")?,
        None => existing.title,
    };
    let description = payload.description.or(existing.description);
    let category_id = payload.category_id.unwrap_or(existing.category_id);
    if category_id != existing.category_id {
        category_exists(&state, category_id).await?;
    }

    let date = payload.date.unwrap_or(existing.date);
    let start = payload
        .start_time
        .unwrap_or_else(|| existing.start_time.format("%H:%M:%S").to_string());
    let end = payload
        .end_time
        .unwrap_or_else(|| existing.end_time.format("%H:%M:%S").to_string());
    let slot = resolve_slot(date, &start, &end)?;

    sqlx::query(
        r#"
        UPDATE calendar_activities
        SET title = $2, description = $3, category_id = $4, date = $5,
            start_time = $6, end_time = $7, duration = $8, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(&title)
    .bind(&description)
    .bind(category_id)
    .bind(date)
    .bind(slot.start)
    .bind(slot.end)
    .bind(slot.duration)
    .execute(&state.db)
    .await?;

    Ok(Json(find_activity(&state, id).await?))
}

pub async fn delete_activity(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Success>> {
    owned_activity(&state, &user, id).await?;

    sqlx::query("DELETE FROM calendar_activities WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await?;

    Ok(success())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 14).unwrap()
    }

    #[test]
    fn slot_duration_is_in_minutes() {
        let slot = resolve_slot(day(), "09:15", "10:45").unwrap();
        assert_eq!(slot.duration, 90);
        assert_eq!(slot.start.date(), day());
    }

    #[test]
    fn slot_must_end_after_it_starts() {
        assert!(resolve_slot(day(), "10:00", "10:00").is_err());
        assert!(resolve_slot(day(), "11:00", "10:00").is_err());
    }

    #[test]
    fn slot_rejects_garbage_times() {
        let err = resolve_slot(day(), "9 o'clock", "10:00").err().unwrap();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }
}
