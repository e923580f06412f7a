use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    response::Json,
};
use log::info;
use serde_json::json;
use uuid::Uuid;

use super::{one_of, required, success, Success};
use crate::{
    error::{AppError, AppResult},
    middleware::CurrentUser,
    models::{
        ticket::{
            CreateTicketRequest, Ticket, TicketComment, TicketCommentRequest, TicketRow, TicketView,
            UpdateTicketRequest, TICKET_PRIORITIES, TICKET_STATUSES,
        },
        NewNotification, NotificationCategory, NotificationPriority,
    },
    realtime::EventKind,
    services::{notifier::department_members, notify_best_effort},
    state::AppState,
    utils::ticket::ticket_number,
};

const NUMBERED_TICKETS: &str = r#"
    SELECT * FROM (
        SELECT t.*, ROW_NUMBER() OVER (PARTITION BY t.target_department ORDER BY t.created_at, t.id) AS sequence
        FROM tickets t
    ) numbered
"#;

fn can_see(user: &CurrentUser, ticket: &Ticket) -> bool {
    user.is_admin() || user.department == ticket.source_department || user.department == ticket.target_department
}

/// Only the receiving department works a ticket.
fn can_work_on(user: &CurrentUser, ticket: &Ticket) -> bool {
    user.is_admin() || user.department == ticket.target_department
}

fn visible_comments(user: &CurrentUser, ticket: &Ticket, comments: Vec<TicketComment>) -> Vec<TicketComment> {
    if can_work_on(user, ticket) {
        comments
    } else {
        comments.into_iter().filter(|c| !c.is_internal).collect()
    }
}

fn forbidden() -> AppError {
    AppError::forbidden("Bu talebe erişim yetkiniz yok")
}

async fn find_row(state: &AppState, id: Uuid) -> AppResult<TicketRow> {
    let sql = format!("{NUMBERED_TICKETS} WHERE id = $1");
    sqlx::query_as::<_, TicketRow>(&sql)
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::not_found("Talep bulunamadı"))
}

async fn comments_for(state: &AppState, ids: &[Uuid]) -> AppResult<HashMap<Uuid, Vec<TicketComment>>> {
    let comments = sqlx::query_as::<_, TicketComment>(
        "SELECT * FROM ticket_comments WHERE ticket_id = ANY($1) ORDER BY created_at",
    )
    .bind(ids)
    .fetch_all(&state.db)
    .await?;

    let mut grouped: HashMap<Uuid, Vec<TicketComment>> = HashMap::new();
    for comment in comments {
        grouped.entry(comment.ticket_id).or_default().push(comment);
    }
    Ok(grouped)
}

fn into_view(user: &CurrentUser, row: TicketRow, comments: Vec<TicketComment>) -> TicketView {
    let comments = visible_comments(user, &row.ticket, comments);
    TicketView {
        ticket_number: ticket_number(&row.ticket.target_department, row.sequence),
        ticket: row.ticket,
        comments,
    }
}

async fn load_view(state: &AppState, user: &CurrentUser, id: Uuid) -> AppResult<TicketView> {
    let row = find_row(state, id).await?;
    let mut comments = comments_for(state, &[id]).await?;
    Ok(into_view(user, row, comments.remove(&id).unwrap_or_default()))
}

async fn broadcast(state: &AppState, kind: EventKind, ticket: &Ticket, data: impl serde::Serialize + Clone) {
    state
        .hub
        .emit_to_department(&ticket.target_department, kind, data.clone())
        .await;
    if ticket.source_department != ticket.target_department {
        state.hub.emit_to_department(&ticket.source_department, kind, data).await;
    }
}

pub async fn list_tickets(State(state): State<AppState>, user: CurrentUser) -> AppResult<Json<Vec<TicketView>>> {
    let sql = format!(
        "{NUMBERED_TICKETS} WHERE $1::text IS NULL OR source_department = $1 OR target_department = $1 ORDER BY created_at DESC"
    );
    let rows = sqlx::query_as::<_, TicketRow>(&sql)
        .bind((!user.is_admin()).then_some(&user.department))
        .fetch_all(&state.db)
        .await?;

    let ids: Vec<Uuid> = rows.iter().map(|r| r.ticket.id).collect();
    let mut comments = comments_for(&state, &ids).await?;

    let tickets = rows
        .into_iter()
        .map(|row| {
            let ticket_comments = comments.remove(&row.ticket.id).unwrap_or_default();
            into_view(&user, row, ticket_comments)
        })
        .collect();

    Ok(Json(tickets))
}

pub async fn get_ticket(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<TicketView>> {
    let view = load_view(&state, &user, id).await?;
    if !can_see(&user, &view.ticket) {
        return Err(forbidden());
    }
    Ok(Json(view))
}

pub async fn create_ticket(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<CreateTicketRequest>,
) -> AppResult<Json<TicketView>> {
    let title = required(&payload.title, "Başlık")?;
    let description = required(&payload.description, "Açıklama")?;
    let target_department = required(&payload.target_department, "Hedef departman")?;
    one_of(&payload.priority, TICKET_PRIORITIES, "öncelik")?;

    let ticket = sqlx::query_as::<_, Ticket>(
        r#"
        INSERT INTO tickets
            (title, description, priority, source_department, target_department, created_by, creator_name, creator_email)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(&title)
    .bind(&description)
    .bind(&payload.priority)
    .bind(&user.department)
    .bind(&target_department)
    .bind(user.id)
    .bind(user.full_name())
    .bind(&user.email)
    .fetch_one(&state.db)
    .await?;

    let view = load_view(&state, &user, ticket.id).await?;
    info!("Ticket {} opened by {} for {}", view.ticket_number, user.email, target_department);

    state
        .hub
        .emit_to_department(&target_department, EventKind::TicketCreated, &view)
        .await;

    let recipients = department_members(&state.db, &target_department, Some(user.id)).await?;
    let priority = if payload.priority == "urgent" {
        NotificationPriority::High
    } else {
        NotificationPriority::Medium
    };
    notify_best_effort(
        &state,
        &recipients,
        NewNotification::new(
            NotificationCategory::Ticket,
            priority,
            "Yeni talep",
            format!("{} departmanından yeni talep: {}", user.department, title),
        )
        .with_link(format!("/tickets/{}", ticket.id))
        .with_metadata(json!({ "ticketId": ticket.id, "ticketNumber": view.ticket_number })),
    )
    .await;

    Ok(Json(view))
}

pub async fn update_ticket(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateTicketRequest>,
) -> AppResult<Json<TicketView>> {
    if let Some(status) = &payload.status {
        one_of(status, TICKET_STATUSES, "durum")?;
    }

    let existing = find_row(&state, id).await?.ticket;
    if !can_work_on(&user, &existing) {
        return Err(AppError::forbidden("Talebi yalnızca hedef departman güncelleyebilir"));
    }

    if let Some(Some(assignee)) = payload.assigned_to {
        let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM profiles WHERE id = $1)")
            .bind(assignee)
            .fetch_one(&state.db)
            .await?;
        if !exists {
            return Err(AppError::bad_request("Atanacak kullanıcı bulunamadı"));
        }
    }

    let ticket = sqlx::query_as::<_, Ticket>(
        r#"
        UPDATE tickets
        SET status = COALESCE($2::text, status),
            assigned_to = CASE WHEN $3 THEN $4 ELSE assigned_to END,
            resolved_at = CASE WHEN $2::text = 'resolved' AND status <> 'resolved' THEN NOW() ELSE resolved_at END,
            closed_at = CASE WHEN $2::text = 'closed' AND status <> 'closed' THEN NOW() ELSE closed_at END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(&payload.status)
    .bind(payload.assigned_to.is_some())
    .bind(payload.assigned_to.flatten())
    .fetch_one(&state.db)
    .await?;

    let view = load_view(&state, &user, id).await?;
    broadcast(&state, EventKind::TicketUpdated, &ticket, &view).await;

    if ticket.status != existing.status && ticket.created_by != user.id {
        notify_best_effort(
            &state,
            &[ticket.created_by],
            NewNotification::new(
                NotificationCategory::Ticket,
                NotificationPriority::Medium,
                "Talep durumu güncellendi",
                format!("{} numaralı talebin durumu \"{}\" oldu.", view.ticket_number, ticket.status),
            )
            .with_link(format!("/tickets/{id}"))
            .with_metadata(json!({ "ticketId": id, "status": ticket.status })),
        )
        .await;
    }

    if let Some(assignee) = ticket.assigned_to {
        if existing.assigned_to != Some(assignee) && assignee != user.id {
            notify_best_effort(
                &state,
                &[assignee],
                NewNotification::new(
                    NotificationCategory::Ticket,
                    NotificationPriority::High,
                    "Talep size atandı",
                    format!("{} numaralı talep size atandı: {}", view.ticket_number, ticket.title),
                )
                .with_link(format!("/tickets/{id}"))
                .with_metadata(json!({ "ticketId": id })),
            )
            .await;
        }
    }

    Ok(Json(view))
}

pub async fn delete_ticket(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Success>> {
    let ticket = find_row(&state, id).await?.ticket;
    if !(user.is_admin() || ticket.created_by == user.id) {
        return Err(AppError::forbidden("Talebi yalnızca oluşturan kişi silebilir"));
    }

    sqlx::query("DELETE FROM tickets WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await?;

    info!("Ticket {id} deleted by {}", user.email);
    Ok(success())
}

pub async fn list_comments(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<TicketComment>>> {
    let view = load_view(&state, &user, id).await?;
    if !can_see(&user, &view.ticket) {
        return Err(forbidden());
    }
    Ok(Json(view.comments))
}

pub async fn add_comment(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<TicketCommentRequest>,
) -> AppResult<Json<TicketComment>> {
    let content = required(&payload.content, "Yorum")?;

    let ticket = find_row(&state, id).await?.ticket;
    if !can_see(&user, &ticket) {
        return Err(forbidden());
    }
    if payload.is_internal && !can_work_on(&user, &ticket) {
        return Err(AppError::forbidden("İç notları yalnızca hedef departman ekleyebilir"));
    }

    let comment = sqlx::query_as::<_, TicketComment>(
        r#"
        INSERT INTO ticket_comments (ticket_id, content, author_id, author_name, is_internal)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(&content)
    .bind(user.id)
    .bind(user.full_name())
    .bind(payload.is_internal)
    .fetch_one(&state.db)
    .await?;

    sqlx::query("UPDATE tickets SET updated_at = NOW() WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await?;

    let event = json!({ "ticketId": id, "comment": comment });
    if comment.is_internal {
        state
            .hub
            .emit_to_department(&ticket.target_department, EventKind::TicketNewComment, &event)
            .await;
    } else {
        broadcast(&state, EventKind::TicketNewComment, &ticket, &event).await;

        if ticket.created_by != user.id {
            notify_best_effort(
                &state,
                &[ticket.created_by],
                NewNotification::new(
                    NotificationCategory::Ticket,
                    NotificationPriority::Low,
                    "Talebinize yeni yorum",
                    format!("{} \"{}\" talebinize yorum yaptı.", user.full_name(), ticket.title),
                )
                .with_link(format!("/tickets/{id}"))
                .with_metadata(json!({ "ticketId": id, "commentId": comment.id })),
            )
            .await;
        }
    }

    Ok(Json(comment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use chrono::Utc;

    fn user(roles: Vec<Role>, department: &str) -> CurrentUser {
        CurrentUser {
            id: Uuid::new_v4(),
            email: "u@gurgil.com".to_string(),
            first_name: "Can".to_string(),
            last_name: "Er".to_string(),
            department: department.to_string(),
            roles,
        }
    }

    fn ticket(source: &str, target: &str) -> Ticket {
        Ticket {
            id: Uuid::new_v4(),
            title: "Yazıcı arızası".to_string(),
            description: "Üçüncü kattaki yazıcı çalışmıyor".to_string(),
            priority: "medium".to_string(),
            status: "open".to_string(),
            source_department: source.to_string(),
            target_department: target.to_string(),
            created_by: Uuid::new_v4(),
            creator_name: "Can Er".to_string(),
            creator_email: "can@gurgil.com".to_string(),
            assigned_to: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            resolved_at: None,
            closed_at: None,
        }
    }

    fn comment(ticket: &Ticket, internal: bool) -> TicketComment {
        TicketComment {
            id: Uuid::new_v4(),
            ticket_id: ticket.id,
            content: "Bakıyoruz".to_string(),
            author_id: Uuid::new_v4(),
            author_name: "Teknik".to_string(),
            is_internal: internal,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn both_departments_see_the_ticket() {
        let t = ticket("Satış", "IT");
        assert!(can_see(&user(vec![Role::Employee], "Satış"), &t));
        assert!(can_see(&user(vec![Role::Employee], "IT"), &t));
        assert!(!can_see(&user(vec![Role::Employee], "Muhasebe"), &t));
        assert!(can_see(&user(vec![Role::Admin], "Muhasebe"), &t));
    }

    #[test]
    fn only_target_department_updates() {
        let t = ticket("Satış", "IT");
        assert!(can_work_on(&user(vec![Role::Employee], "IT"), &t));
        assert!(!can_work_on(&user(vec![Role::DepartmentManager], "Satış"), &t));
    }

    #[test]
    fn internal_comments_hidden_from_requesters() {
        let t = ticket("Satış", "IT");
        let comments = vec![comment(&t, false), comment(&t, true)];

        let requester = user(vec![Role::Employee], "Satış");
        assert_eq!(visible_comments(&requester, &t, comments.clone()).len(), 1);

        let handler = user(vec![Role::Employee], "IT");
        assert_eq!(visible_comments(&handler, &t, comments).len(), 2);
    }
}
