use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use chrono::{DateTime, Utc};

use super::user::ProfileSummary;

pub const RESERVATION_STATUSES: &[&str] = &["pending", "approved", "rejected"];

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MeetingRoom {
    pub id: Uuid,
    pub name: String,
    pub capacity: i32,
    pub location: String,
    pub description: Option<String>,
    pub responsible_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MeetingReservation {
    pub id: Uuid,
    pub room_id: Uuid,
    pub requested_by: Uuid,
    pub approved_by: Option<Uuid>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingRoomView {
    #[serde(flatten)]
    pub room: MeetingRoom,
    pub responsible: Option<ProfileSummary>,
    pub reservations: Vec<MeetingReservation>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationView {
    #[serde(flatten)]
    pub reservation: MeetingReservation,
    pub room: Option<MeetingRoom>,
    pub requester: Option<ProfileSummary>,
    pub approver: Option<ProfileSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRequest {
    pub name: String,
    pub capacity: i32,
    pub location: String,
    pub description: Option<String>,
    pub responsible_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReservationRequest {
    pub room_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateReservationRequest {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}
