use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use log::debug;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{Role, SessionUser},
    state::AppState,
    utils::verify_token,
};

/// The caller, as described by the token they presented.
///
/// Roles come from the token, not the database, so a role change only takes
/// effect after the user logs in again.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub department: String,
    pub roles: Vec<Role>,
}

impl From<SessionUser> for CurrentUser {
    fn from(user: SessionUser) -> Self {
        Self {
            id: user.id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            department: user.department,
            roles: user.roles,
        }
    }
}

impl CurrentUser {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(Role::Admin)
    }

    pub fn is_department_manager(&self) -> bool {
        self.has_role(Role::DepartmentManager)
    }

    pub fn is_board_member(&self) -> bool {
        self.has_role(Role::BoardMember)
    }

    /// Department manager of exactly this department.
    pub fn manages(&self, department: &str) -> bool {
        self.is_department_manager() && self.department == department
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn require_admin(&self) -> AppResult<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::forbidden("Bu işlem için yönetici yetkisi gerekli"))
        }
    }
}

pub fn authenticate(token: &str, secret: &str) -> AppResult<CurrentUser> {
    match verify_token(token, secret) {
        Ok(claims) => Ok(claims.user.into()),
        Err(e) => {
            debug!("Rejected token: {e}");
            Err(AppError::forbidden("Geçersiz oturum anahtarı"))
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|rejection| {
                    if rejection.is_missing() {
                        AppError::Unauthorized("Erişim anahtarı gerekli".to_string())
                    } else {
                        AppError::forbidden("Geçersiz oturum anahtarı")
                    }
                })?;

        authenticate(bearer.token(), &state.config.jwt_secret)
    }
}
