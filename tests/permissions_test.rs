mod common;

use axum::http::StatusCode;
use serde_json::{json, Value};
use uuid::Uuid;

use common::{server, session, token, token_for};
use opsdesk::models::Role;

fn kpi_payload(department: &str, target_value: f64) -> Value {
    json!({
        "title": "Aylık satış adedi",
        "description": "Bayi kanalı dahil",
        "department": department,
        "targetValue": target_value,
        "unit": "adet",
        "startDate": "2024-01-01",
        "endDate": "2024-01-31",
        "period": "monthly",
        "priority": "high",
        "assignedTo": []
    })
}

#[tokio::test]
async fn test_employees_cannot_manage_departments() {
    let server = server();
    let employee = token(vec![Role::Employee], "IT");

    let response = server
        .post("/api/departments")
        .authorization_bearer(&employee)
        .json(&json!({ "name": "Lojistik" }))
        .await;
    response.assert_status(StatusCode::FORBIDDEN);

    let response = server
        .delete(&format!("/api/departments/{}", Uuid::new_v4()))
        .authorization_bearer(&employee)
        .await;
    response.assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_board_members_are_not_admins() {
    let server = server();
    let board = token(vec![Role::BoardMember], "Yönetim");

    let response = server
        .post("/api/admin/profiles")
        .authorization_bearer(&board)
        .json(&json!({
            "email": "yeni@gurgil.com",
            "firstName": "Yeni",
            "lastName": "Kişi",
            "department": "IT",
            "roles": ["employee"]
        }))
        .await;

    response.assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_manager_cannot_create_kpi_for_other_department() {
    let server = server();
    let manager = token(vec![Role::DepartmentManager], "IT");

    let response = server
        .post("/api/kpis")
        .authorization_bearer(&manager)
        .json(&kpi_payload("Satış", 100.0))
        .await;

    response.assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_kpi_target_must_be_positive() {
    let server = server();
    let admin = token(vec![Role::Admin], "Yönetim");

    let response = server
        .post("/api/kpis")
        .authorization_bearer(&admin)
        .json(&kpi_payload("Satış", 0.0))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_kpi_dates_must_be_ordered() {
    let server = server();
    let manager = token(vec![Role::DepartmentManager], "Satış");

    let mut payload = kpi_payload("Satış", 50.0);
    payload["endDate"] = json!("2023-12-31");

    let response = server
        .post("/api/kpis")
        .authorization_bearer(&manager)
        .json(&payload)
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_kpi_status_is_validated() {
    let server = server();
    let admin = token(vec![Role::Admin], "Yönetim");

    let response = server
        .patch(&format!("/api/kpis/{}/status", Uuid::new_v4()))
        .authorization_bearer(&admin)
        .json(&json!({ "status": "archived" }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_deadline_check_is_admin_only() {
    let server = server();
    let manager = token(vec![Role::DepartmentManager], "IT");

    let response = server
        .post("/api/kpis/deadline-check")
        .authorization_bearer(&manager)
        .await;

    response.assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_ticket_priority_is_validated() {
    let server = server();
    let employee = token(vec![Role::Employee], "Satış");

    let response = server
        .post("/api/tickets")
        .authorization_bearer(&employee)
        .json(&json!({
            "title": "Yazıcı",
            "description": "Kağıt sıkışıyor",
            "priority": "whenever",
            "targetDepartment": "IT"
        }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_ticket_status_is_validated() {
    let server = server();
    let employee = token(vec![Role::Employee], "IT");

    let response = server
        .put(&format!("/api/tickets/{}", Uuid::new_v4()))
        .authorization_bearer(&employee)
        .json(&json!({ "status": "done" }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_activity_must_end_after_start() {
    let server = server();
    let employee = token(vec![Role::Employee], "IT");

    let response = server
        .post("/api/calendar/activities")
        .authorization_bearer(&employee)
        .json(&json!({
            "title": "Sunucu bakımı",
            "categoryId": Uuid::new_v4(),
            "date": "2024-05-14",
            "startTime": "14:00",
            "endTime": "13:30"
        }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_reservation_window_is_validated() {
    let server = server();
    let employee = token(vec![Role::Employee], "IT");

    let response = server
        .post("/api/meeting-reservations")
        .authorization_bearer(&employee)
        .json(&json!({
            "roomId": Uuid::new_v4(),
            "startTime": "2024-06-03T10:00:00Z",
            "endTime": "2024-06-03T10:00:00Z"
        }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_transfer_to_same_user_is_rejected() {
    let server = server();
    let admin = token(vec![Role::Admin], "Yönetim");
    let id = Uuid::new_v4();

    let response = server
        .post("/api/admin/profiles/transfer")
        .authorization_bearer(&admin)
        .json(&json!({
            "fromUserId": id,
            "toUserId": id,
            "transferTickets": true,
            "transferKpis": true
        }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_admin_cannot_delete_themselves() {
    let server = server();
    let admin = session(vec![Role::Admin], "Yönetim");

    let response = server
        .delete(&format!("/api/admin/profiles/{}", admin.id))
        .authorization_bearer(token_for(&admin))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_password_reset_enforces_length() {
    let server = server();
    let admin = token(vec![Role::Admin], "Yönetim");

    let response = server
        .post(&format!("/api/admin/profiles/{}/reset-password", Uuid::new_v4()))
        .authorization_bearer(&admin)
        .json(&json!({ "newPassword": "kısa" }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}
