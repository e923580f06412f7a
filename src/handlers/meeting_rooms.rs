//! Meeting rooms and their reservations.
//!
//! Reservations start `pending` and are decided by an admin, a board member,
//! or the person responsible for the room. Approved and pending reservations
//! both block their slot.

use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    response::Json,
};
use chrono::{DateTime, Utc};
use log::info;
use serde_json::json;
use uuid::Uuid;

use super::{required, success, Success};
use crate::{
    error::{AppError, AppResult},
    middleware::CurrentUser,
    models::{
        meeting::{
            CreateReservationRequest, MeetingReservation, MeetingRoom, MeetingRoomView, ReservationView,
            RoomRequest, UpdateReservationRequest,
        },
        NewNotification, NotificationCategory, NotificationPriority, ProfileSummary,
    },
    realtime::EventKind,
    services::{notifier::admins, notify_best_effort},
    state::AppState,
    utils::schedule::overlaps,
};

const BLOCKING: &[&str] = &["pending", "approved"];
const APPROVED: &[&str] = &["approved"];

fn can_decide(user: &CurrentUser, room: &MeetingRoom) -> bool {
    user.is_admin() || user.is_board_member() || room.responsible_id == Some(user.id)
}

fn check_window(start: DateTime<Utc>, end: DateTime<Utc>) -> AppResult<()> {
    if end <= start {
        Err(AppError::bad_request("Bitiş zamanı başlangıç zamanından sonra olmalıdır"))
    } else {
        Ok(())
    }
}

fn first_conflict<'a>(
    existing: &'a [MeetingReservation],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    statuses: &[&str],
    exclude: Option<Uuid>,
) -> Option<&'a MeetingReservation> {
    existing.iter().find(|r| {
        Some(r.id) != exclude
            && statuses.contains(&r.status.as_str())
            && overlaps(start, end, r.start_time, r.end_time)
    })
}

async fn ensure_free(
    state: &AppState,
    room_id: Uuid,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    statuses: &[&str],
    exclude: Option<Uuid>,
) -> AppResult<()> {
    let existing = sqlx::query_as::<_, MeetingReservation>(
        "SELECT * FROM meeting_reservations WHERE room_id = $1 AND start_time < $3 AND end_time > $2",
    )
    .bind(room_id)
    .bind(start)
    .bind(end)
    .fetch_all(&state.db)
    .await?;

    match first_conflict(&existing, start, end, statuses, exclude) {
        Some(conflict) => Err(AppError::conflict(format!(
            "Oda bu saat aralığında dolu ({} - {})",
            conflict.start_time.format("%d.%m.%Y %H:%M"),
            conflict.end_time.format("%H:%M")
        ))),
        None => Ok(()),
    }
}

async fn summaries(state: &AppState, ids: Vec<Uuid>) -> AppResult<HashMap<Uuid, ProfileSummary>> {
    let people = sqlx::query_as::<_, ProfileSummary>(
        "SELECT id, first_name, last_name, email, department FROM profiles WHERE id = ANY($1)",
    )
    .bind(&ids)
    .fetch_all(&state.db)
    .await?;

    Ok(people.into_iter().map(|p| (p.id, p)).collect())
}

async fn find_room(state: &AppState, id: Uuid) -> AppResult<MeetingRoom> {
    sqlx::query_as::<_, MeetingRoom>("SELECT * FROM meeting_rooms WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::not_found("Toplantı odası bulunamadı"))
}

async fn find_reservation(state: &AppState, id: Uuid) -> AppResult<MeetingReservation> {
    sqlx::query_as::<_, MeetingReservation>("SELECT * FROM meeting_reservations WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::not_found("Rezervasyon bulunamadı"))
}

async fn reservation_views(
    state: &AppState,
    reservations: Vec<MeetingReservation>,
) -> AppResult<Vec<ReservationView>> {
    let room_ids: Vec<Uuid> = reservations.iter().map(|r| r.room_id).collect();
    let rooms: HashMap<Uuid, MeetingRoom> =
        sqlx::query_as::<_, MeetingRoom>("SELECT * FROM meeting_rooms WHERE id = ANY($1)")
            .bind(&room_ids)
            .fetch_all(&state.db)
            .await?
            .into_iter()
            .map(|room| (room.id, room))
            .collect();

    let people_ids = reservations
        .iter()
        .flat_map(|r| std::iter::once(r.requested_by).chain(r.approved_by))
        .collect();
    let people = summaries(state, people_ids).await?;

    Ok(reservations
        .into_iter()
        .map(|reservation| ReservationView {
            room: rooms.get(&reservation.room_id).cloned(),
            requester: people.get(&reservation.requested_by).cloned(),
            approver: reservation.approved_by.and_then(|id| people.get(&id).cloned()),
            reservation,
        })
        .collect())
}

async fn reservation_view(state: &AppState, reservation: MeetingReservation) -> AppResult<ReservationView> {
    reservation_views(state, vec![reservation])
        .await?
        .pop()
        .ok_or_else(|| AppError::not_found("Rezervasyon bulunamadı"))
}

async fn validate_room(state: &AppState, payload: &RoomRequest) -> AppResult<(String, String)> {
    let name = required(&payload.name, "Oda adı")?;
    let location = required(&payload.location, "Konum")?;
    if payload.capacity <= 0 {
        return Err(AppError::bad_request("Kapasite sıfırdan büyük olmalıdır"));
    }

    if let Some(responsible) = payload.responsible_id {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM profiles WHERE id = $1 AND is_active = true)",
        )
        .bind(responsible)
        .fetch_one(&state.db)
        .await?;
        if !exists {
            return Err(AppError::bad_request("Sorumlu kişi bulunamadı"));
        }
    }

    Ok((name, location))
}

async fn notify_responsibility(state: &AppState, room: &MeetingRoom, user: &CurrentUser) {
    let Some(responsible) = room.responsible_id.filter(|id| *id != user.id) else {
        return;
    };

    notify_best_effort(
        state,
        &[responsible],
        NewNotification::new(
            NotificationCategory::System,
            NotificationPriority::Medium,
            "Toplantı odası sorumluluğu",
            format!("\"{}\" toplantı odasının sorumlusu olarak atandınız.", room.name),
        )
        .with_link("/meeting-rooms")
        .with_metadata(json!({ "roomId": room.id })),
    )
    .await;
}

pub async fn list_rooms(State(state): State<AppState>, _user: CurrentUser) -> AppResult<Json<Vec<MeetingRoomView>>> {
    let rooms = sqlx::query_as::<_, MeetingRoom>("SELECT * FROM meeting_rooms ORDER BY name")
        .fetch_all(&state.db)
        .await?;

    let reservations = sqlx::query_as::<_, MeetingReservation>(
        "SELECT * FROM meeting_reservations ORDER BY start_time",
    )
    .fetch_all(&state.db)
    .await?;

    let people = summaries(&state, rooms.iter().filter_map(|r| r.responsible_id).collect()).await?;

    let mut by_room: HashMap<Uuid, Vec<MeetingReservation>> = HashMap::new();
    for reservation in reservations {
        by_room.entry(reservation.room_id).or_default().push(reservation);
    }

    let views = rooms
        .into_iter()
        .map(|room| MeetingRoomView {
            responsible: room.responsible_id.and_then(|id| people.get(&id).cloned()),
            reservations: by_room.remove(&room.id).unwrap_or_default(),
            room,
        })
        .collect();

    Ok(Json(views))
}

pub async fn create_room(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<RoomRequest>,
) -> AppResult<Json<MeetingRoom>> {
    user.require_admin()?;
    let (name, location) = validate_room(&state, &payload).await?;

    let room = sqlx::query_as::<_, MeetingRoom>(
        r#"
        INSERT INTO meeting_rooms (name, capacity, location, description, responsible_id)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(&name)
    .bind(payload.capacity)
    .bind(&location)
    .bind(&payload.description)
    .bind(payload.responsible_id)
    .fetch_one(&state.db)
    .await?;

    info!("Meeting room '{}' created by {}", room.name, user.email);
    notify_responsibility(&state, &room, &user).await;

    Ok(Json(room))
}

pub async fn update_room(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<RoomRequest>,
) -> AppResult<Json<MeetingRoom>> {
    user.require_admin()?;
    let previous = find_room(&state, id).await?;
    let (name, location) = validate_room(&state, &payload).await?;

    let room = sqlx::query_as::<_, MeetingRoom>(
        r#"
        UPDATE meeting_rooms
        SET name = $2, capacity = $3, location = $4, description = $5, responsible_id = $6, updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(&name)
    .bind(payload.capacity)
    .bind(&location)
    .bind(&payload.description)
    .bind(payload.responsible_id)
    .fetch_one(&state.db)
    .await?;

    if room.responsible_id != previous.responsible_id {
        info!(
            "Responsibility for room '{}' handed over from {:?} to {:?}",
            room.name, previous.responsible_id, room.responsible_id
        );
        notify_responsibility(&state, &room, &user).await;
    }

    Ok(Json(room))
}

pub async fn delete_room(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Success>> {
    user.require_admin()?;

    let result = sqlx::query("DELETE FROM meeting_rooms WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("Toplantı odası bulunamadı"));
    }

    info!("Meeting room {id} deleted by {}", user.email);
    Ok(success())
}

pub async fn list_reservations(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> AppResult<Json<Vec<ReservationView>>> {
    let reservations = sqlx::query_as::<_, MeetingReservation>(
        "SELECT * FROM meeting_reservations ORDER BY start_time DESC",
    )
    .fetch_all(&state.db)
    .await?;

    Ok(Json(reservation_views(&state, reservations).await?))
}

pub async fn create_reservation(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<CreateReservationRequest>,
) -> AppResult<Json<ReservationView>> {
    check_window(payload.start_time, payload.end_time)?;

    let room = find_room(&state, payload.room_id).await?;
    ensure_free(&state, room.id, payload.start_time, payload.end_time, BLOCKING, None).await?;

    let reservation = sqlx::query_as::<_, MeetingReservation>(
        r#"
        INSERT INTO meeting_reservations (room_id, requested_by, start_time, end_time, notes)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(room.id)
    .bind(user.id)
    .bind(payload.start_time)
    .bind(payload.end_time)
    .bind(&payload.notes)
    .fetch_one(&state.db)
    .await?;

    let view = reservation_view(&state, reservation).await?;
    state.hub.emit_to_all(EventKind::ReservationCreated, &view).await;

    let deciders = match room.responsible_id {
        Some(responsible) => vec![responsible],
        None => admins(&state.db).await?,
    };
    notify_best_effort(
        &state,
        &deciders,
        NewNotification::new(
            NotificationCategory::System,
            NotificationPriority::Medium,
            "Yeni rezervasyon talebi",
            format!(
                "{} \"{}\" odası için {} tarihinde rezervasyon talep etti.",
                user.full_name(),
                room.name,
                payload.start_time.format("%d.%m.%Y %H:%M")
            ),
        )
        .with_link("/meeting-rooms")
        .with_metadata(json!({ "reservationId": view.reservation.id, "roomId": room.id })),
    )
    .await;

    info!("Reservation requested for room '{}' by {}", room.name, user.email);
    Ok(Json(view))
}

pub async fn update_reservation(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateReservationRequest>,
) -> AppResult<Json<ReservationView>> {
    let existing = find_reservation(&state, id).await?;
    if !(user.is_admin() || existing.requested_by == user.id) {
        return Err(AppError::forbidden("Bu rezervasyonu yalnızca talep eden değiştirebilir"));
    }

    let start = payload.start_time.unwrap_or(existing.start_time);
    let end = payload.end_time.unwrap_or(existing.end_time);
    check_window(start, end)?;
    ensure_free(&state, existing.room_id, start, end, BLOCKING, Some(id)).await?;

    let reservation = sqlx::query_as::<_, MeetingReservation>(
        r#"
        UPDATE meeting_reservations
        SET start_time = $2, end_time = $3, notes = COALESCE($4, notes), updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(start)
    .bind(end)
    .bind(&payload.notes)
    .fetch_one(&state.db)
    .await?;

    let view = reservation_view(&state, reservation).await?;
    state.hub.emit_to_all(EventKind::ReservationUpdated, &view).await;

    Ok(Json(view))
}

async fn decide(state: &AppState, user: &CurrentUser, id: Uuid, approve: bool) -> AppResult<ReservationView> {
    let existing = find_reservation(state, id).await?;
    let room = find_room(state, existing.room_id).await?;

    if !can_decide(user, &room) {
        return Err(AppError::forbidden("Bu rezervasyonu onaylama yetkiniz yok"));
    }

    if approve {
        ensure_free(state, room.id, existing.start_time, existing.end_time, APPROVED, Some(id)).await?;
    }

    let status = if approve { "approved" } else { "rejected" };
    let reservation = sqlx::query_as::<_, MeetingReservation>(
        r#"
        UPDATE meeting_reservations
        SET status = $2, approved_by = $3, updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(status)
    .bind(user.id)
    .fetch_one(&state.db)
    .await?;

    let view = reservation_view(state, reservation).await?;
    state.hub.emit_to_all(EventKind::ReservationUpdated, &view).await;

    let (title, verdict) = if approve {
        ("Rezervasyon onaylandı", "onaylandı")
    } else {
        ("Rezervasyon reddedildi", "reddedildi")
    };
    notify_best_effort(
        state,
        &[existing.requested_by],
        NewNotification::new(
            NotificationCategory::System,
            NotificationPriority::Medium,
            title,
            format!(
                "\"{}\" odası için {} tarihli rezervasyonunuz {}.",
                room.name,
                existing.start_time.format("%d.%m.%Y %H:%M"),
                verdict
            ),
        )
        .with_link("/meeting-rooms")
        .with_metadata(json!({ "reservationId": id, "status": status })),
    )
    .await;

    info!("Reservation {id} {status} by {}", user.email);
    Ok(view)
}

pub async fn approve_reservation(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ReservationView>> {
    Ok(Json(decide(&state, &user, id, true).await?))
}

pub async fn reject_reservation(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ReservationView>> {
    Ok(Json(decide(&state, &user, id, false).await?))
}

pub async fn delete_reservation(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Success>> {
    let existing = find_reservation(&state, id).await?;
    if !(user.is_admin() || existing.requested_by == user.id) {
        return Err(AppError::forbidden("Bu rezervasyonu yalnızca talep eden silebilir"));
    }

    sqlx::query("DELETE FROM meeting_reservations WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await?;

    state
        .hub
        .emit_to_all(EventKind::ReservationDeleted, json!({ "id": id, "roomId": existing.room_id }))
        .await;

    Ok(success())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, hour, 0, 0).unwrap()
    }

    fn reservation(start: u32, end: u32, status: &str) -> MeetingReservation {
        MeetingReservation {
            id: Uuid::new_v4(),
            room_id: Uuid::new_v4(),
            requested_by: Uuid::new_v4(),
            approved_by: None,
            start_time: at(start),
            end_time: at(end),
            status: status.to_string(),
            notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn room(responsible: Option<Uuid>) -> MeetingRoom {
        MeetingRoom {
            id: Uuid::new_v4(),
            name: "Toplantı 1".to_string(),
            capacity: 8,
            location: "2. kat".to_string(),
            description: None,
            responsible_id: responsible,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn user(roles: Vec<Role>) -> CurrentUser {
        CurrentUser {
            id: Uuid::new_v4(),
            email: "x@gurgil.com".to_string(),
            first_name: "Ece".to_string(),
            last_name: "Su".to_string(),
            department: "IT".to_string(),
            roles,
        }
    }

    #[test]
    fn back_to_back_bookings_do_not_conflict() {
        let existing = [reservation(9, 10, "approved")];
        assert!(first_conflict(&existing, at(10), at(11), BLOCKING, None).is_none());
        assert!(first_conflict(&existing, at(8), at(9), BLOCKING, None).is_none());
        assert!(first_conflict(&existing, at(9), at(11), BLOCKING, None).is_some());
    }

    #[test]
    fn rejected_bookings_free_the_slot() {
        let existing = [reservation(9, 10, "rejected")];
        assert!(first_conflict(&existing, at(9), at(10), BLOCKING, None).is_none());
    }

    #[test]
    fn approval_only_checks_approved_and_skips_itself() {
        let pending = reservation(9, 10, "pending");
        let existing = [pending.clone()];
        assert!(first_conflict(&existing, at(9), at(10), APPROVED, None).is_none());

        let approved = reservation(9, 10, "approved");
        let existing = [approved.clone()];
        assert!(first_conflict(&existing, at(9), at(10), APPROVED, Some(approved.id)).is_none());
    }

    #[test]
    fn deciders_are_admins_board_members_or_the_responsible() {
        let responsible = user(vec![Role::Employee]);
        let r = room(Some(responsible.id));

        assert!(can_decide(&responsible, &r));
        assert!(can_decide(&user(vec![Role::BoardMember]), &r));
        assert!(can_decide(&user(vec![Role::Admin]), &r));
        assert!(!can_decide(&user(vec![Role::DepartmentManager]), &r));
    }

    #[test]
    fn window_must_be_positive() {
        assert!(check_window(at(10), at(10)).is_err());
        assert!(check_window(at(10), at(11)).is_ok());
    }
}
