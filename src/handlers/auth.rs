use axum::{extract::State, response::Json};
use log::{info, warn};

use super::{ensure_department, load_roles, required, unique_violation};
use crate::{
    error::{AppError, AppResult},
    middleware::CurrentUser,
    models::{
        user::{AuthResponse, LoginRequest, SignupRequest},
        Profile, ProfileWithRoles, Role, SessionUser, UserRole,
    },
    state::AppState,
    utils::{create_token, hash_password, password_matches},
};

const MIN_PASSWORD_LEN: usize = 6;

pub(crate) fn check_password_length(password: &str) -> AppResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        Err(AppError::bad_request("Şifre en az 6 karakter olmalıdır"))
    } else {
        Ok(())
    }
}

fn issue(state: &AppState, user: SessionUser) -> AppResult<Json<AuthResponse>> {
    let token = create_token(user.clone(), &state.config.jwt_secret, state.config.jwt_ttl_days)?;
    Ok(Json(AuthResponse { user, token }))
}

/// An unreadable stored hash counts as a mismatch but is logged.
fn credentials_match(profile: &Profile, password: &str, demo_password: &str) -> bool {
    match password_matches(password, profile.password_hash.as_deref(), demo_password) {
        Ok(matches) => matches,
        Err(e) => {
            warn!("Stored password hash for {} is unreadable: {e}", profile.email);
            false
        }
    }
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let email = payload.email.trim().to_lowercase();
    if email.is_empty() || payload.password.is_empty() {
        return Err(AppError::bad_request("E-posta ve şifre gerekli"));
    }

    let invalid = || AppError::Unauthorized("Geçersiz e-posta veya şifre".to_string());

    let profile = sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE lower(email) = $1")
        .bind(&email)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(invalid)?;

    let matches = credentials_match(&profile, &payload.password, &state.config.demo_password);

    if !matches {
        return Err(invalid());
    }

    if !profile.is_active {
        return Err(AppError::forbidden("Hesabınız devre dışı bırakılmış"));
    }

    let roles = load_roles(&state.db, profile.id).await?;
    info!("User {} logged in", profile.email);

    issue(&state, SessionUser::from_profile(&profile, roles))
}

pub async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupRequest>,
) -> AppResult<Json<AuthResponse>> {
    let email = required(&payload.email, "E-posta")?.to_lowercase();
    let first_name = required(&payload.first_name, "Ad")?;
    let last_name = required(&payload.last_name, "Soyad")?;
    let department = required(&payload.department, "Departman")?;
    check_password_length(&payload.password)?;

    let password_hash = hash_password(&payload.password)?;

    let mut tx = state.db.begin().await?;

    let profile = sqlx::query_as::<_, Profile>(
        r#"
        INSERT INTO profiles (email, first_name, last_name, department, password_hash)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(&email)
    .bind(&first_name)
    .bind(&last_name)
    .bind(&department)
    .bind(&password_hash)
    .fetch_one(&mut *tx)
    .await
    .map_err(unique_violation("Bu e-posta adresi zaten kayıtlı"))?;

    sqlx::query("INSERT INTO user_roles (user_id, role) VALUES ($1, $2)")
        .bind(profile.id)
        .bind(Role::Employee.as_str())
        .execute(&mut *tx)
        .await?;

    ensure_department(&mut *tx, &department).await?;
    tx.commit().await?;

    info!("New account registered: {}", profile.email);

    issue(&state, SessionUser::from_profile(&profile, vec![Role::Employee]))
}

pub async fn me(State(state): State<AppState>, user: CurrentUser) -> AppResult<Json<ProfileWithRoles>> {
    let profile = sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE id = $1")
        .bind(user.id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::not_found("Kullanıcı bulunamadı"))?;

    let user_roles = sqlx::query_as::<_, UserRole>("SELECT * FROM user_roles WHERE user_id = $1")
        .bind(user.id)
        .fetch_all(&state.db)
        .await?;

    Ok(Json(ProfileWithRoles { profile, user_roles }))
}
