//! Runs against a real Postgres. Each test gets a fresh migrated database
//! from `DATABASE_URL`; run with `cargo test -- --ignored`.

mod common;

use axum::http::StatusCode;
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

use common::{server_with, token_for};
use opsdesk::models::{Role, SessionUser};

async fn profile(db: &PgPool, email: &str, department: &str, roles: Vec<Role>) -> SessionUser {
    let id = sqlx::query_scalar::<_, Uuid>(
        "INSERT INTO profiles (email, first_name, last_name, department) VALUES ($1, 'Test', 'Kullanıcı', $2) RETURNING id",
    )
    .bind(email)
    .bind(department)
    .fetch_one(db)
    .await
    .unwrap();

    for role in &roles {
        sqlx::query("INSERT INTO user_roles (user_id, role) VALUES ($1, $2)")
            .bind(id)
            .bind(role.as_str())
            .execute(db)
            .await
            .unwrap();
    }

    SessionUser {
        id,
        email: email.to_string(),
        first_name: "Test".to_string(),
        last_name: "Kullanıcı".to_string(),
        department: department.to_string(),
        roles,
    }
}

async fn kpi(db: &PgPool, department: &str, status: &str, created_by: Uuid) -> Uuid {
    sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO kpi_targets
            (title, department, target_value, unit, start_date, end_date, period, priority, status, created_by)
        VALUES ('Hedef', $1, 100, 'adet', '2024-01-01', '2024-12-31', 'yearly', 'medium', $2, $3)
        RETURNING id
        "#,
    )
    .bind(department)
    .bind(status)
    .bind(created_by)
    .fetch_one(db)
    .await
    .unwrap()
}

async fn ticket(db: &PgPool, target: &str, status: &str, creator: &SessionUser, assignee: Option<Uuid>) -> Uuid {
    sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO tickets
            (title, description, priority, status, source_department, target_department,
             created_by, creator_name, creator_email, assigned_to)
        VALUES ('Talep', 'Açıklama', 'medium', $1, $2, $3, $4, 'Test Kullanıcı', $5, $6)
        RETURNING id
        "#,
    )
    .bind(status)
    .bind(&creator.department)
    .bind(target)
    .bind(creator.id)
    .bind(&creator.email)
    .bind(assignee)
    .fetch_one(db)
    .await
    .unwrap()
}

fn counts(pairs: &[(&str, i64)]) -> Value {
    Value::Array(pairs.iter().map(|(name, value)| json!({ "name": name, "value": value })).collect())
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs DATABASE_URL"]
async fn test_dashboard_counts_match_seeded_data(db: PgPool) {
    let admin = profile(&db, "yonetici@gurgil.com", "Yönetim", vec![Role::Admin]).await;

    kpi(&db, "Satış", "active", admin.id).await;
    kpi(&db, "Satış", "active", admin.id).await;
    kpi(&db, "Satış", "completed", admin.id).await;
    kpi(&db, "IT", "paused", admin.id).await;

    ticket(&db, "IT", "open", &admin, None).await;
    ticket(&db, "IT", "open", &admin, None).await;
    ticket(&db, "IT", "in_progress", &admin, None).await;
    ticket(&db, "Satış", "resolved", &admin, None).await;
    ticket(&db, "Satış", "closed", &admin, None).await;

    let server = server_with(db);
    let response = server
        .get("/api/dashboard/stats")
        .authorization_bearer(token_for(&admin))
        .await;

    response.assert_status_ok();
    response.assert_json(&json!({
        "totalKPIs": 4,
        "completedKPIs": 1,
        "activeKPIs": 2,
        "totalTickets": 5,
        "openTickets": 2,
        "inProgressTickets": 1,
        "resolvedTickets": 1,
        "completedTickets": 1,
        "ticketsByStatus": counts(&[("Açık", 2), ("Devam Ediyor", 1), ("Çözüldü", 1), ("Kapatıldı", 1)]),
        "ticketsByDepartment": counts(&[("IT", 3), ("Satış", 2)]),
        "kpisByDepartment": counts(&[("Satış", 3), ("IT", 1)]),
    }));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs DATABASE_URL"]
async fn test_unknown_kpi_assignee_is_rejected(db: PgPool) {
    let admin = profile(&db, "yonetici@gurgil.com", "Yönetim", vec![Role::Admin]).await;
    let server = server_with(db.clone());

    let response = server
        .post("/api/kpis")
        .authorization_bearer(token_for(&admin))
        .json(&json!({
            "title": "Aylık satış adedi",
            "department": "Satış",
            "targetValue": 100.0,
            "unit": "adet",
            "startDate": "2024-01-01",
            "endDate": "2024-01-31",
            "period": "monthly",
            "priority": "high",
            "assignedTo": [admin.id, Uuid::new_v4()]
        }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let stored = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM kpi_targets")
        .fetch_one(&db)
        .await
        .unwrap();
    assert_eq!(stored, 0);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs DATABASE_URL"]
async fn test_ticket_assignee_can_be_cleared(db: PgPool) {
    let requester = profile(&db, "satis@gurgil.com", "Satış", vec![Role::Employee]).await;
    let engineer = profile(&db, "it@gurgil.com", "IT", vec![Role::Employee]).await;
    let id = ticket(&db, "IT", "in_progress", &requester, Some(engineer.id)).await;
    let server = server_with(db);

    let response = server
        .put(&format!("/api/tickets/{id}"))
        .authorization_bearer(token_for(&engineer))
        .json(&json!({ "status": "resolved" }))
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["assignedTo"], json!(engineer.id));

    let response = server
        .put(&format!("/api/tickets/{id}"))
        .authorization_bearer(token_for(&engineer))
        .json(&json!({ "assignedTo": null }))
        .await;
    response.assert_status_ok();
    let body = response.json::<Value>();
    assert_eq!(body["assignedTo"], Value::Null);
    assert_eq!(body["status"], "resolved");
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs DATABASE_URL"]
async fn test_kpi_assignee_cannot_be_deleted(db: PgPool) {
    let admin = profile(&db, "yonetici@gurgil.com", "Yönetim", vec![Role::Admin]).await;
    let employee = profile(&db, "calisan@gurgil.com", "Satış", vec![Role::Employee]).await;
    let kpi_id = kpi(&db, "Satış", "active", admin.id).await;
    sqlx::query("INSERT INTO kpi_assignments (kpi_id, user_id) VALUES ($1, $2)")
        .bind(kpi_id)
        .bind(employee.id)
        .execute(&db)
        .await
        .unwrap();
    let server = server_with(db);

    let response = server
        .delete(&format!("/api/admin/profiles/{}", employee.id))
        .authorization_bearer(token_for(&admin))
        .await;

    response.assert_status(StatusCode::CONFLICT);
}
