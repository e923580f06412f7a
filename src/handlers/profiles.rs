use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    response::Json,
};
use log::info;
use uuid::Uuid;

use super::{auth::check_password_length, ensure_department, required, success, unique_violation, Success};
use crate::{
    error::{AppError, AppResult},
    middleware::CurrentUser,
    models::{
        user::{
            ActiveAssets, DeactivationResponse, ProfileRequest, ResetPasswordRequest, TransferRequest,
            TransferResponse,
        },
        Profile, ProfileWithRoles, Role, UserRole,
    },
    state::AppState,
    utils::hash_password,
};

struct ValidProfile {
    email: String,
    first_name: String,
    last_name: String,
    department: String,
    roles: Vec<Role>,
}

fn validate(payload: ProfileRequest) -> AppResult<ValidProfile> {
    let mut roles = payload.roles;
    roles.sort_by_key(|role| role.as_str());
    roles.dedup();

    Ok(ValidProfile {
        email: required(&payload.email, "E-posta")?.to_lowercase(),
        first_name: required(&payload.first_name, "Ad")?,
        last_name: required(&payload.last_name, "Soyad")?,
        department: required(&payload.department, "Departman")?,
        roles,
    })
}

async fn profile_exists(state: &AppState, id: Uuid) -> AppResult<()> {
    sqlx::query_scalar::<_, Uuid>("SELECT id FROM profiles WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .map(|_| ())
        .ok_or_else(|| AppError::not_found("Kullanıcı bulunamadı"))
}

pub async fn list_profiles(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> AppResult<Json<Vec<ProfileWithRoles>>> {
    let profiles = sqlx::query_as::<_, Profile>("SELECT * FROM profiles ORDER BY created_at DESC")
        .fetch_all(&state.db)
        .await?;

    let roles = sqlx::query_as::<_, UserRole>("SELECT * FROM user_roles ORDER BY created_at")
        .fetch_all(&state.db)
        .await?;

    let mut by_user: HashMap<Uuid, Vec<UserRole>> = HashMap::new();
    for role in roles {
        by_user.entry(role.user_id).or_default().push(role);
    }

    let profiles = profiles
        .into_iter()
        .map(|profile| {
            let user_roles = by_user.remove(&profile.id).unwrap_or_default();
            ProfileWithRoles { profile, user_roles }
        })
        .collect();

    Ok(Json(profiles))
}

pub async fn create_profile(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<ProfileRequest>,
) -> AppResult<Json<ProfileWithRoles>> {
    user.require_admin()?;
    let input = validate(payload)?;

    let mut tx = state.db.begin().await?;

    let profile = sqlx::query_as::<_, Profile>(
        r#"
        INSERT INTO profiles (email, first_name, last_name, department)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(&input.email)
    .bind(&input.first_name)
    .bind(&input.last_name)
    .bind(&input.department)
    .fetch_one(&mut *tx)
    .await
    .map_err(unique_violation("Bu e-posta adresi zaten kayıtlı"))?;

    let user_roles = replace_roles(&mut tx, profile.id, &input.roles).await?;
    ensure_department(&mut *tx, &input.department).await?;
    tx.commit().await?;

    info!("Admin {} created profile {}", user.email, profile.email);

    Ok(Json(ProfileWithRoles { profile, user_roles }))
}

async fn replace_roles(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    roles: &[Role],
) -> AppResult<Vec<UserRole>> {
    sqlx::query("DELETE FROM user_roles WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut **tx)
        .await?;

    let names: Vec<&str> = roles.iter().map(Role::as_str).collect();
    let user_roles = sqlx::query_as::<_, UserRole>(
        r#"
        INSERT INTO user_roles (user_id, role)
        SELECT $1, role FROM UNNEST($2::text[]) AS role
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(&names)
    .fetch_all(&mut **tx)
    .await?;

    Ok(user_roles)
}

pub async fn update_profile(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<ProfileRequest>,
) -> AppResult<Json<ProfileWithRoles>> {
    user.require_admin()?;
    let input = validate(payload)?;

    let mut tx = state.db.begin().await?;

    let profile = sqlx::query_as::<_, Profile>(
        r#"
        UPDATE profiles
        SET email = $2, first_name = $3, last_name = $4, department = $5, updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(&input.email)
    .bind(&input.first_name)
    .bind(&input.last_name)
    .bind(&input.department)
    .fetch_optional(&mut *tx)
    .await
    .map_err(unique_violation("Bu e-posta adresi zaten kayıtlı"))?
    .ok_or_else(|| AppError::not_found("Kullanıcı bulunamadı"))?;

    let user_roles = replace_roles(&mut tx, id, &input.roles).await?;
    ensure_department(&mut *tx, &input.department).await?;
    tx.commit().await?;

    Ok(Json(ProfileWithRoles { profile, user_roles }))
}

pub async fn delete_profile(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Success>> {
    user.require_admin()?;
    if id == user.id {
        return Err(AppError::bad_request("Kendi hesabınızı silemezsiniz"));
    }
    profile_exists(&state, id).await?;

    let linked = sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS (SELECT 1 FROM tickets WHERE created_by = $1 OR assigned_to = $1)
            OR EXISTS (SELECT 1 FROM kpi_targets WHERE created_by = $1)
            OR EXISTS (SELECT 1 FROM kpi_assignments WHERE user_id = $1)
            OR EXISTS (SELECT 1 FROM kpi_progress WHERE user_id = $1 OR recorded_by = $1)
            OR EXISTS (SELECT 1 FROM kpi_comments WHERE user_id = $1)
            OR EXISTS (SELECT 1 FROM ticket_comments WHERE author_id = $1)
            OR EXISTS (SELECT 1 FROM meeting_reservations WHERE requested_by = $1 OR approved_by = $1)
        "#,
    )
    .bind(id)
    .fetch_one(&state.db)
    .await?;

    if linked {
        return Err(AppError::conflict(
            "Kullanıcının bağlı talepleri veya KPI kayıtları var; silmek yerine devre dışı bırakın",
        ));
    }

    sqlx::query("DELETE FROM profiles WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await?;

    info!("Admin {} deleted profile {id}", user.email);

    Ok(success())
}

async fn active_assets(state: &AppState, id: Uuid) -> AppResult<ActiveAssets> {
    let tickets = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM tickets WHERE (assigned_to = $1 OR created_by = $1) AND status IN ('open', 'in_progress')",
    )
    .bind(id)
    .fetch_one(&state.db)
    .await?;

    let kpis = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*) FROM kpi_assignments ka
        JOIN kpi_targets kt ON kt.id = ka.kpi_id
        WHERE ka.user_id = $1 AND kt.status = 'active'
        "#,
    )
    .bind(id)
    .fetch_one(&state.db)
    .await?;

    Ok(ActiveAssets { tickets, kpis })
}

async fn set_active(state: &AppState, id: Uuid, active: bool) -> AppResult<()> {
    let result = sqlx::query("UPDATE profiles SET is_active = $2, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(active)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("Kullanıcı bulunamadı"));
    }
    Ok(())
}

pub async fn deactivate_profile(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<DeactivationResponse>> {
    user.require_admin()?;
    if id == user.id {
        return Err(AppError::bad_request("Kendi hesabınızı devre dışı bırakamazsınız"));
    }

    set_active(&state, id, false).await?;
    let active_assets = active_assets(&state, id).await?;

    info!(
        "Admin {} deactivated profile {id} ({} open tickets, {} active KPIs)",
        user.email, active_assets.tickets, active_assets.kpis
    );

    Ok(Json(DeactivationResponse {
        success: true,
        active_assets,
    }))
}

pub async fn activate_profile(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Success>> {
    user.require_admin()?;
    set_active(&state, id, true).await?;
    Ok(success())
}

pub async fn transfer_assets(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<TransferRequest>,
) -> AppResult<Json<TransferResponse>> {
    user.require_admin()?;
    if payload.from_user_id == payload.to_user_id {
        return Err(AppError::bad_request("Kaynak ve hedef kullanıcı aynı olamaz"));
    }

    profile_exists(&state, payload.from_user_id).await?;
    profile_exists(&state, payload.to_user_id).await?;

    let mut tx = state.db.begin().await?;
    let mut tickets_transferred = 0;
    let mut kpis_transferred = 0;

    if payload.transfer_tickets {
        tickets_transferred = sqlx::query(
            r#"
            UPDATE tickets SET assigned_to = $2, updated_at = NOW()
            WHERE assigned_to = $1 AND status IN ('open', 'in_progress')
            "#,
        )
        .bind(payload.from_user_id)
        .bind(payload.to_user_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    }

    if payload.transfer_kpis {
        // Skip KPIs the receiver is already assigned to; the leftovers are dropped below.
        kpis_transferred = sqlx::query(
            r#"
            UPDATE kpi_assignments SET user_id = $2, assigned_at = NOW()
            WHERE user_id = $1
              AND kpi_id NOT IN (SELECT kpi_id FROM kpi_assignments WHERE user_id = $2)
            "#,
        )
        .bind(payload.from_user_id)
        .bind(payload.to_user_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query("DELETE FROM kpi_assignments WHERE user_id = $1")
            .bind(payload.from_user_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    info!(
        "Transferred {tickets_transferred} tickets and {kpis_transferred} KPI assignments from {} to {}",
        payload.from_user_id, payload.to_user_id
    );

    Ok(Json(TransferResponse {
        success: true,
        tickets_transferred,
        kpis_transferred,
    }))
}

pub async fn reset_password(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<ResetPasswordRequest>,
) -> AppResult<Json<Success>> {
    user.require_admin()?;
    check_password_length(&payload.new_password)?;

    let password_hash = hash_password(&payload.new_password)?;
    let result = sqlx::query("UPDATE profiles SET password_hash = $2, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(&password_hash)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("Kullanıcı bulunamadı"));
    }

    info!("Admin {} reset the password of {id}", user.email);
    Ok(success())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_normalizes_email_and_dedups_roles() {
        let input = validate(ProfileRequest {
            email: " Ali@Gurgil.com ".to_string(),
            first_name: "Ali".to_string(),
            last_name: "Kaya".to_string(),
            department: "IT".to_string(),
            roles: vec![Role::Employee, Role::Admin, Role::Employee],
        })
        .unwrap();

        assert_eq!(input.email, "ali@gurgil.com");
        assert_eq!(input.roles, vec![Role::Admin, Role::Employee]);
    }

    #[test]
    fn validate_requires_department() {
        let result = validate(ProfileRequest {
            email: "ali@gurgil.com".to_string(),
            first_name: "Ali".to_string(),
            last_name: "Kaya".to_string(),
            department: " ".to_string(),
            roles: vec![],
        });
        assert!(result.is_err());
    }
}
