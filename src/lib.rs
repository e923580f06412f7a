//! Departmental operations backend.
//!
//! JSON API under `/api` for KPI tracking, inter-department tickets, the
//! activity calendar, meeting room reservations and notifications, plus a
//! `/ws` socket that pushes live events to connected browsers.

pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod realtime;
pub mod services;
pub mod state;
pub mod utils;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, patch, post, put},
    Router,
};
use log::{error, info};
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use handlers::{auth, calendar, dashboard, departments, kpis, meeting_rooms, notifications, profiles, tickets, ws};
use state::AppState;

fn api_routes() -> Router<AppState> {
    Router::new()
        // Auth
        .route("/auth/login", post(auth::login))
        .route("/auth/signup", post(auth::signup))
        .route("/auth/me", get(auth::me))
        // User administration
        .route("/admin/profiles", get(profiles::list_profiles).post(profiles::create_profile))
        .route("/admin/profiles/transfer", post(profiles::transfer_assets))
        .route(
            "/admin/profiles/:id",
            put(profiles::update_profile).delete(profiles::delete_profile),
        )
        .route("/admin/profiles/:id/deactivate", post(profiles::deactivate_profile))
        .route("/admin/profiles/:id/activate", post(profiles::activate_profile))
        .route("/admin/profiles/:id/reset-password", post(profiles::reset_password))
        // Departments
        .route(
            "/departments",
            get(departments::list_departments).post(departments::create_department),
        )
        .route(
            "/departments/:id",
            put(departments::update_department).delete(departments::delete_department),
        )
        // KPIs
        .route("/kpis", get(kpis::list_kpis).post(kpis::create_kpi))
        .route("/kpis/deadline-check", post(kpis::run_deadline_check))
        .route(
            "/kpis/:id",
            get(kpis::get_kpi).put(kpis::update_kpi).delete(kpis::delete_kpi),
        )
        .route("/kpis/:id/status", patch(kpis::update_kpi_status))
        .route("/kpis/:id/progress", post(kpis::record_progress))
        .route("/kpis/:id/comments", post(kpis::add_comment))
        // Tickets
        .route("/tickets", get(tickets::list_tickets).post(tickets::create_ticket))
        .route(
            "/tickets/:id",
            get(tickets::get_ticket)
                .put(tickets::update_ticket)
                .delete(tickets::delete_ticket),
        )
        .route(
            "/tickets/:id/comments",
            get(tickets::list_comments).post(tickets::add_comment),
        )
        // Calendar
        .route(
            "/calendar/categories",
            get(calendar::list_categories).post(calendar::create_category),
        )
        .route(
            "/calendar/categories/:id",
            put(calendar::update_category).delete(calendar::delete_category),
        )
        .route(
            "/calendar/activities",
            get(calendar::list_activities).post(calendar::create_activity),
        )
        .route(
            "/calendar/activities/:id",
            put(calendar::update_activity).delete(calendar::delete_activity),
        )
        // Notifications
        .route(
            "/notifications",
            get(notifications::list_notifications).delete(notifications::delete_all),
        )
        .route("/notifications/unread-count", get(notifications::unread_count))
        .route("/notifications/read-all", put(notifications::mark_all_read))
        .route("/notifications/read", delete(notifications::delete_read))
        .route("/notifications/:id", delete(notifications::delete_notification))
        .route("/notifications/:id/read", put(notifications::mark_read))
        // Meeting rooms
        .route(
            "/meeting-rooms",
            get(meeting_rooms::list_rooms).post(meeting_rooms::create_room),
        )
        .route(
            "/meeting-rooms/:id",
            put(meeting_rooms::update_room).delete(meeting_rooms::delete_room),
        )
        .route(
            "/meeting-reservations",
            get(meeting_rooms::list_reservations).post(meeting_rooms::create_reservation),
        )
        .route(
            "/meeting-reservations/:id",
            put(meeting_rooms::update_reservation).delete(meeting_rooms::delete_reservation),
        )
        .route("/meeting-reservations/:id/approve", put(meeting_rooms::approve_reservation))
        .route("/meeting-reservations/:id/reject", put(meeting_rooms::reject_reservation))
        // Dashboard
        .route("/dashboard/stats", get(dashboard::stats))
}

pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(handlers::health))
        .route("/ws", get(ws::socket_handler))
        .nest("/api", api_routes());

    if let Some(dir) = &state.config.static_dir {
        info!("Serving static files from {dir}");
        router = router.fallback_service(ServeDir::new(dir));
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(DefaultBodyLimit::max(10 * 1024 * 1024)), // 10MB
        )
        .with_state(state)
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal as listen, SignalKind};

        match listen(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
