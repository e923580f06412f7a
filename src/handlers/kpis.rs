use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    response::Json,
};
use chrono::{NaiveDate, Utc};
use log::info;
use serde_json::json;
use uuid::Uuid;

use super::{one_of, required, success, Success};
use crate::{
    error::{AppError, AppResult},
    middleware::CurrentUser,
    models::{
        kpi::{
            CommentRequest, CreateKpiRequest, DeadlineCheckResponse, KpiAssignment, KpiAssignmentRow, KpiComment,
            KpiDetail, KpiProgress, KpiStatusRequest, KpiTarget, ProgressRequest, UpdateKpiRequest,
            KPI_PERIODS, KPI_PRIORITIES, KPI_STATUSES,
        },
        NewNotification, NotificationCategory, NotificationPriority,
    },
    services::{check_kpi_deadlines, notify_best_effort},
    state::AppState,
    utils::kpi::derive_stats,
};

fn can_manage(user: &CurrentUser, department: &str) -> bool {
    user.is_admin() || user.manages(department)
}

/// Trims the requested department and checks the user may manage it.
fn managed_department(user: &CurrentUser, requested: &str, denied: &'static str) -> AppResult<String> {
    let department = required(requested, "Departman")?;
    if can_manage(user, &department) {
        Ok(department)
    } else {
        Err(AppError::forbidden(denied))
    }
}

fn can_view(user: &CurrentUser, kpi: &KpiTarget, assignments: &[KpiAssignment]) -> bool {
    if user.is_admin() || kpi.department == user.department {
        return true;
    }
    if user.is_department_manager() {
        assignments.iter().any(|a| a.user.department == user.department)
    } else {
        assignments.iter().any(|a| a.user_id == user.id)
    }
}

fn can_record_progress(user: &CurrentUser, department: &str, is_assignee: bool) -> bool {
    can_manage(user, department) || is_assignee
}

fn can_comment(user: &CurrentUser, department: &str, is_assignee: bool) -> bool {
    can_record_progress(user, department, is_assignee) || user.department == department
}

struct KpiFields<'a> {
    title: &'a str,
    department: &'a str,
    target_value: f64,
    start_date: NaiveDate,
    end_date: NaiveDate,
    period: &'a str,
    priority: &'a str,
}

fn validate(fields: &KpiFields<'_>) -> AppResult<()> {
    required(fields.title, "Başlık")?;
    required(fields.department, "Departman")?;
    if !(fields.target_value.is_finite() && fields.target_value > 0.0) {
        return Err(AppError::bad_request("Hedef değer sıfırdan büyük olmalıdır"));
    }
    if fields.end_date < fields.start_date {
        return Err(AppError::bad_request("Bitiş tarihi başlangıç tarihinden önce olamaz"));
    }
    one_of(fields.period, KPI_PERIODS, "periyot")?;
    one_of(fields.priority, KPI_PRIORITIES, "öncelik")?;
    Ok(())
}

async fn find_kpi(state: &AppState, id: Uuid) -> AppResult<KpiTarget> {
    sqlx::query_as::<_, KpiTarget>("SELECT * FROM kpi_targets WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::not_found("KPI bulunamadı"))
}

async fn is_assignee(state: &AppState, kpi_id: Uuid, user_id: Uuid) -> AppResult<bool> {
    let assigned = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM kpi_assignments WHERE kpi_id = $1 AND user_id = $2)",
    )
    .bind(kpi_id)
    .bind(user_id)
    .fetch_one(&state.db)
    .await?;

    Ok(assigned)
}

fn group_by_kpi<T>(rows: Vec<T>, key: impl Fn(&T) -> Uuid) -> HashMap<Uuid, Vec<T>> {
    let mut grouped: HashMap<Uuid, Vec<T>> = HashMap::new();
    for row in rows {
        grouped.entry(key(&row)).or_default().push(row);
    }
    grouped
}

/// Attaches progress, comments and assignments, and derives the live figures.
async fn load_details(state: &AppState, kpis: Vec<KpiTarget>) -> AppResult<Vec<KpiDetail>> {
    let ids: Vec<Uuid> = kpis.iter().map(|k| k.id).collect();

    let progress = sqlx::query_as::<_, KpiProgress>(
        "SELECT * FROM kpi_progress WHERE kpi_id = ANY($1) ORDER BY recorded_at DESC",
    )
    .bind(&ids)
    .fetch_all(&state.db)
    .await?;

    let comments = sqlx::query_as::<_, KpiComment>(
        "SELECT * FROM kpi_comments WHERE kpi_id = ANY($1) ORDER BY created_at",
    )
    .bind(&ids)
    .fetch_all(&state.db)
    .await?;

    let assignments = sqlx::query_as::<_, KpiAssignmentRow>(
        r#"
        SELECT ka.id, ka.kpi_id, ka.user_id, ka.assigned_at,
               p.first_name, p.last_name, p.email, p.department
        FROM kpi_assignments ka
        JOIN profiles p ON p.id = ka.user_id
        WHERE ka.kpi_id = ANY($1)
        ORDER BY ka.assigned_at
        "#,
    )
    .bind(&ids)
    .fetch_all(&state.db)
    .await?
    .into_iter()
    .map(KpiAssignment::from)
    .collect::<Vec<_>>();

    let mut progress = group_by_kpi(progress, |p| p.kpi_id);
    let mut comments = group_by_kpi(comments, |c| c.kpi_id);
    let mut assignments = group_by_kpi(assignments, |a| a.kpi_id);
    let now = Utc::now();

    let details = kpis
        .into_iter()
        .map(|kpi| {
            let progress = progress.remove(&kpi.id).unwrap_or_default();
            let assignments = assignments.remove(&kpi.id).unwrap_or_default();
            let current_value = progress.iter().map(|p| p.value).sum();
            let stats = derive_stats(kpi.target_value, kpi.start_date, kpi.end_date, current_value, now);

            KpiDetail {
                comments: comments.remove(&kpi.id).unwrap_or_default(),
                assigned_users: assignments.iter().map(|a| a.user_id).collect(),
                kpi,
                progress,
                assignments,
                stats,
            }
        })
        .collect();

    Ok(details)
}

async fn load_detail(state: &AppState, kpi: KpiTarget) -> AppResult<KpiDetail> {
    load_details(state, vec![kpi])
        .await?
        .pop()
        .ok_or_else(|| AppError::not_found("KPI bulunamadı"))
}

async fn assign(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    kpi_id: Uuid,
    user_ids: &[Uuid],
) -> AppResult<()> {
    let mut unique = user_ids.to_vec();
    unique.sort();
    unique.dedup();
    if unique.is_empty() {
        return Ok(());
    }

    let found = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM profiles WHERE id = ANY($1)")
        .bind(&unique)
        .fetch_one(&mut **tx)
        .await?;
    if found != unique.len() as i64 {
        return Err(AppError::bad_request("Atanan kullanıcılardan biri bulunamadı"));
    }

    sqlx::query(
        r#"
        INSERT INTO kpi_assignments (kpi_id, user_id)
        SELECT $1, user_id FROM UNNEST($2::uuid[]) AS user_id
        ON CONFLICT (kpi_id, user_id) DO NOTHING
        "#,
    )
    .bind(kpi_id)
    .bind(user_ids)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn notify_assigned(state: &AppState, kpi: &KpiTarget, user_ids: &[Uuid], assigned_by: &CurrentUser) {
    let recipients: Vec<Uuid> = user_ids.iter().copied().filter(|id| *id != assigned_by.id).collect();
    let notification = NewNotification::new(
        NotificationCategory::Kpi,
        NotificationPriority::Medium,
        "Yeni KPI ataması",
        format!("{} size \"{}\" hedefini atadı.", assigned_by.full_name(), kpi.title),
    )
    .with_link(format!("/kpi/{}", kpi.id))
    .with_metadata(json!({ "kpiId": kpi.id }));

    notify_best_effort(state, &recipients, notification).await;
}

pub async fn list_kpis(State(state): State<AppState>, user: CurrentUser) -> AppResult<Json<Vec<KpiDetail>>> {
    let kpis = if user.is_admin() {
        sqlx::query_as::<_, KpiTarget>("SELECT * FROM kpi_targets ORDER BY created_at DESC")
            .fetch_all(&state.db)
            .await?
    } else if user.is_department_manager() {
        sqlx::query_as::<_, KpiTarget>(
            r#"
            SELECT * FROM kpi_targets
            WHERE department = $1
               OR id IN (
                   SELECT ka.kpi_id FROM kpi_assignments ka
                   JOIN profiles p ON p.id = ka.user_id
                   WHERE p.department = $1
               )
            ORDER BY created_at DESC
            "#,
        )
        .bind(&user.department)
        .fetch_all(&state.db)
        .await?
    } else {
        sqlx::query_as::<_, KpiTarget>(
            r#"
            SELECT * FROM kpi_targets
            WHERE department = $1
               OR id IN (SELECT kpi_id FROM kpi_assignments WHERE user_id = $2)
            ORDER BY created_at DESC
            "#,
        )
        .bind(&user.department)
        .bind(user.id)
        .fetch_all(&state.db)
        .await?
    };

    Ok(Json(load_details(&state, kpis).await?))
}

pub async fn get_kpi(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<KpiDetail>> {
    let kpi = find_kpi(&state, id).await?;
    let detail = load_detail(&state, kpi).await?;

    if !can_view(&user, &detail.kpi, &detail.assignments) {
        return Err(AppError::forbidden("Bu KPI'yı görüntüleme yetkiniz yok"));
    }

    Ok(Json(detail))
}

pub async fn create_kpi(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<CreateKpiRequest>,
) -> AppResult<Json<KpiDetail>> {
    let department = managed_department(
        &user,
        &payload.department,
        "KPI yalnızca yöneticiler veya ilgili departman müdürü tarafından oluşturulabilir",
    )?;

    validate(&KpiFields {
        title: &payload.title,
        department: &department,
        target_value: payload.target_value,
        start_date: payload.start_date,
        end_date: payload.end_date,
        period: &payload.period,
        priority: &payload.priority,
    })?;

    let mut tx = state.db.begin().await?;

    let kpi = sqlx::query_as::<_, KpiTarget>(
        r#"
        INSERT INTO kpi_targets
            (title, description, department, target_value, unit, start_date, end_date, period, priority, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING *
        "#,
    )
    .bind(payload.title.trim())
    .bind(&payload.description)
    .bind(&department)
    .bind(payload.target_value)
    .bind(&payload.unit)
    .bind(payload.start_date)
    .bind(payload.end_date)
    .bind(&payload.period)
    .bind(&payload.priority)
    .bind(user.id)
    .fetch_one(&mut *tx)
    .await?;

    assign(&mut tx, kpi.id, &payload.assigned_to).await?;
    tx.commit().await?;

    info!("KPI '{}' created for {} by {}", kpi.title, kpi.department, user.email);
    notify_assigned(&state, &kpi, &payload.assigned_to, &user).await;

    Ok(Json(load_detail(&state, kpi).await?))
}

pub async fn update_kpi(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateKpiRequest>,
) -> AppResult<Json<KpiDetail>> {
    const DENIED: &str = "Bu KPI'yı düzenleme yetkiniz yok";
    let department = managed_department(&user, &payload.department, DENIED)?;

    let existing = find_kpi(&state, id).await?;
    if !can_manage(&user, &existing.department) {
        return Err(AppError::forbidden(DENIED));
    }

    validate(&KpiFields {
        title: &payload.title,
        department: &department,
        target_value: payload.target_value,
        start_date: payload.start_date,
        end_date: payload.end_date,
        period: &payload.period,
        priority: &payload.priority,
    })?;

    let mut tx = state.db.begin().await?;

    let kpi = sqlx::query_as::<_, KpiTarget>(
        r#"
        UPDATE kpi_targets
        SET title = $2, description = $3, department = $4, target_value = $5, unit = $6,
            start_date = $7, end_date = $8, period = $9, priority = $10, updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(payload.title.trim())
    .bind(&payload.description)
    .bind(&department)
    .bind(payload.target_value)
    .bind(&payload.unit)
    .bind(payload.start_date)
    .bind(payload.end_date)
    .bind(&payload.period)
    .bind(&payload.priority)
    .fetch_one(&mut *tx)
    .await?;

    let mut newly_assigned = Vec::new();
    if let Some(assigned_to) = &payload.assigned_to {
        let previous = sqlx::query_scalar::<_, Uuid>("DELETE FROM kpi_assignments WHERE kpi_id = $1 RETURNING user_id")
            .bind(id)
            .fetch_all(&mut *tx)
            .await?;

        assign(&mut tx, id, assigned_to).await?;
        newly_assigned = assigned_to.iter().copied().filter(|u| !previous.contains(u)).collect();
    }

    tx.commit().await?;

    notify_assigned(&state, &kpi, &newly_assigned, &user).await;

    Ok(Json(load_detail(&state, kpi).await?))
}

pub async fn update_kpi_status(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<KpiStatusRequest>,
) -> AppResult<Json<KpiTarget>> {
    one_of(&payload.status, KPI_STATUSES, "durum")?;

    let existing = find_kpi(&state, id).await?;
    if !can_manage(&user, &existing.department) {
        return Err(AppError::forbidden("Bu KPI'nın durumunu değiştirme yetkiniz yok"));
    }

    let kpi = sqlx::query_as::<_, KpiTarget>(
        "UPDATE kpi_targets SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(&payload.status)
    .fetch_one(&state.db)
    .await?;

    info!("KPI {id} status changed to {}", kpi.status);
    Ok(Json(kpi))
}

pub async fn delete_kpi(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Success>> {
    let existing = find_kpi(&state, id).await?;
    if !can_manage(&user, &existing.department) {
        return Err(AppError::forbidden("Bu KPI'yı silme yetkiniz yok"));
    }

    sqlx::query("DELETE FROM kpi_targets WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await?;

    info!("KPI '{}' deleted by {}", existing.title, user.email);
    Ok(success())
}

pub async fn record_progress(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<ProgressRequest>,
) -> AppResult<Json<KpiProgress>> {
    if !payload.value.is_finite() {
        return Err(AppError::bad_request("Geçersiz ilerleme değeri"));
    }

    let kpi = find_kpi(&state, id).await?;
    let assigned = is_assignee(&state, id, user.id).await?;
    if !can_record_progress(&user, &kpi.department, assigned) {
        return Err(AppError::forbidden("Bu KPI için ilerleme kaydetme yetkiniz yok"));
    }

    let progress = sqlx::query_as::<_, KpiProgress>(
        r#"
        INSERT INTO kpi_progress (kpi_id, user_id, value, note, recorded_by)
        VALUES ($1, $2, $3, $4, $2)
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(user.id)
    .bind(payload.value)
    .bind(&payload.note)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(progress))
}

pub async fn add_comment(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<CommentRequest>,
) -> AppResult<Json<KpiComment>> {
    let content = required(&payload.content, "Yorum")?;

    let kpi = find_kpi(&state, id).await?;
    let assigned = is_assignee(&state, id, user.id).await?;
    if !can_comment(&user, &kpi.department, assigned) {
        return Err(AppError::forbidden("Bu KPI'ya yorum yapma yetkiniz yok"));
    }

    let comment = sqlx::query_as::<_, KpiComment>(
        r#"
        INSERT INTO kpi_comments (kpi_id, user_id, user_name, content)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(user.id)
    .bind(user.full_name())
    .bind(&content)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(comment))
}

pub async fn run_deadline_check(
    State(state): State<AppState>,
    user: CurrentUser,
) -> AppResult<Json<DeadlineCheckResponse>> {
    user.require_admin()?;

    let notifications_sent = check_kpi_deadlines(&state).await?;
    info!("Manual KPI deadline check by {} sent {notifications_sent} notifications", user.email);

    Ok(Json(DeadlineCheckResponse { notifications_sent }))
}
