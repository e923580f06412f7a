use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use chrono::{Duration, Utc};

use crate::models::SessionUser;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    #[serde(flatten)]
    pub user: SessionUser,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn new(user: SessionUser, ttl_days: i64) -> Self {
        let now = Utc::now();
        let exp = now + Duration::days(ttl_days);

        Self {
            user,
            exp: exp.timestamp(),
            iat: now.timestamp(),
        }
    }
}

pub fn create_token(
    user: SessionUser,
    secret: &str,
    ttl_days: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = Claims::new(user, ttl_days);

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )
}

pub fn verify_token(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )?;

    Ok(token_data.claims)
}

pub fn hash_password(password: &str) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST)
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
    bcrypt::verify(password, hash)
}

/// Checks a login attempt. Profiles without a stored hash accept the demo password.
pub fn password_matches(
    password: &str,
    stored_hash: Option<&str>,
    demo_password: &str,
) -> Result<bool, bcrypt::BcryptError> {
    match stored_hash {
        Some(hash) => verify_password(password, hash),
        None => Ok(password == demo_password),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use uuid::Uuid;

    fn sample_user() -> SessionUser {
        SessionUser {
            id: Uuid::new_v4(),
            email: "manager@gurgil.com".to_string(),
            first_name: "Manager".to_string(),
            last_name: "User".to_string(),
            department: "Bilgi İşlem".to_string(),
            roles: vec![Role::DepartmentManager],
        }
    }

    #[test]
    fn token_carries_the_full_user_record() {
        let user = sample_user();
        let token = create_token(user.clone(), "test-secret", 7).unwrap();
        let claims = verify_token(&token, "test-secret").unwrap();

        assert_eq!(claims.user, user);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn token_signed_with_another_secret_is_rejected() {
        let token = create_token(sample_user(), "test-secret", 7).unwrap();
        assert!(verify_token(&token, "other-secret").is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = create_token(sample_user(), "test-secret", -2).unwrap();
        assert!(verify_token(&token, "test-secret").is_err());
    }

    #[test]
    fn demo_password_applies_only_without_a_hash() {
        assert!(password_matches("123456", None, "123456").unwrap());
        assert!(!password_matches("wrong", None, "123456").unwrap());

        let hash = bcrypt::hash("s3cret!", 4).unwrap();
        assert!(password_matches("s3cret!", Some(&hash), "123456").unwrap());
        assert!(!password_matches("123456", Some(&hash), "123456").unwrap());
    }
}
