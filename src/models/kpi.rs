use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use chrono::{DateTime, NaiveDate, Utc};

use super::user::ProfileSummary;
use crate::utils::kpi::KpiStats;

pub const KPI_PERIODS: &[&str] = &["monthly", "quarterly", "yearly"];
pub const KPI_PRIORITIES: &[&str] = &["low", "medium", "high", "critical"];
pub const KPI_STATUSES: &[&str] = &["active", "completed", "paused", "cancelled"];

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct KpiTarget {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub department: String,
    pub target_value: f64,
    pub unit: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub period: String,
    pub priority: String,
    pub status: String,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct KpiProgress {
    pub id: Uuid,
    pub kpi_id: Uuid,
    pub user_id: Uuid,
    pub value: f64,
    pub note: Option<String>,
    pub recorded_by: Uuid,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct KpiComment {
    pub id: Uuid,
    pub kpi_id: Uuid,
    pub user_id: Uuid,
    pub user_name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Flat join row of an assignment and the assigned profile.
#[derive(Debug, FromRow)]
pub struct KpiAssignmentRow {
    pub id: Uuid,
    pub kpi_id: Uuid,
    pub user_id: Uuid,
    pub assigned_at: DateTime<Utc>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub department: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiAssignment {
    pub id: Uuid,
    pub kpi_id: Uuid,
    pub user_id: Uuid,
    pub assigned_at: DateTime<Utc>,
    pub user: ProfileSummary,
}

impl From<KpiAssignmentRow> for KpiAssignment {
    fn from(row: KpiAssignmentRow) -> Self {
        Self {
            id: row.id,
            kpi_id: row.kpi_id,
            user_id: row.user_id,
            assigned_at: row.assigned_at,
            user: ProfileSummary {
                id: row.user_id,
                first_name: row.first_name,
                last_name: row.last_name,
                email: row.email,
                department: row.department,
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiDetail {
    #[serde(flatten)]
    pub kpi: KpiTarget,
    pub progress: Vec<KpiProgress>,
    pub comments: Vec<KpiComment>,
    pub assignments: Vec<KpiAssignment>,
    pub assigned_users: Vec<Uuid>,
    pub stats: KpiStats,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateKpiRequest {
    pub title: String,
    pub description: Option<String>,
    pub department: String,
    pub target_value: f64,
    pub unit: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub period: String,
    pub priority: String,
    #[serde(default)]
    pub assigned_to: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateKpiRequest {
    pub title: String,
    pub description: Option<String>,
    pub department: String,
    pub target_value: f64,
    pub unit: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub period: String,
    pub priority: String,
    pub assigned_to: Option<Vec<Uuid>>,
}

#[derive(Debug, Deserialize)]
pub struct KpiStatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct ProgressRequest {
    pub value: f64,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CommentRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadlineCheckResponse {
    pub notifications_sent: usize,
}
