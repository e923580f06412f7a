pub mod auth;
pub mod kpi;
pub mod schedule;
pub mod ticket;

pub use auth::{create_token, hash_password, password_matches, verify_token};
