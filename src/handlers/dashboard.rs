use axum::{extract::State, response::Json};
use sqlx::FromRow;

use crate::{
    error::AppResult,
    middleware::CurrentUser,
    models::{
        dashboard::{ticket_status_label, DashboardStats, NamedCount},
        ticket::TICKET_STATUSES,
    },
    state::AppState,
};

#[derive(FromRow)]
struct KpiCounts {
    total: i64,
    completed: i64,
    active: i64,
}

/// Per-status counts in lifecycle order, zero-filled and labelled for charts.
fn status_breakdown(counts: &[NamedCount]) -> Vec<NamedCount> {
    TICKET_STATUSES
        .iter()
        .map(|status| NamedCount {
            name: ticket_status_label(status).to_string(),
            value: counts
                .iter()
                .find(|c| c.name == *status)
                .map_or(0, |c| c.value),
        })
        .collect()
}

fn count_of(counts: &[NamedCount], status: &str) -> i64 {
    counts.iter().filter(|c| c.name == status).map(|c| c.value).sum()
}

pub async fn stats(State(state): State<AppState>, _user: CurrentUser) -> AppResult<Json<DashboardStats>> {
    let kpis = sqlx::query_as::<_, KpiCounts>(
        r#"
        SELECT COUNT(*) AS total,
               COUNT(*) FILTER (WHERE status = 'completed') AS completed,
               COUNT(*) FILTER (WHERE status = 'active') AS active
        FROM kpi_targets
        "#,
    )
    .fetch_one(&state.db)
    .await?;

    let by_status = sqlx::query_as::<_, NamedCount>(
        "SELECT status AS name, COUNT(*) AS value FROM tickets GROUP BY status",
    )
    .fetch_all(&state.db)
    .await?;

    let tickets_by_department = sqlx::query_as::<_, NamedCount>(
        "SELECT target_department AS name, COUNT(*) AS value FROM tickets GROUP BY target_department ORDER BY value DESC, name",
    )
    .fetch_all(&state.db)
    .await?;

    let kpis_by_department = sqlx::query_as::<_, NamedCount>(
        "SELECT department AS name, COUNT(*) AS value FROM kpi_targets GROUP BY department ORDER BY value DESC, name",
    )
    .fetch_all(&state.db)
    .await?;

    Ok(Json(DashboardStats {
        total_kpis: kpis.total,
        completed_kpis: kpis.completed,
        active_kpis: kpis.active,
        total_tickets: by_status.iter().map(|c| c.value).sum(),
        open_tickets: count_of(&by_status, "open"),
        in_progress_tickets: count_of(&by_status, "in_progress"),
        resolved_tickets: count_of(&by_status, "resolved"),
        completed_tickets: count_of(&by_status, "closed"),
        tickets_by_status: status_breakdown(&by_status),
        tickets_by_department,
        kpis_by_department,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(name: &str, value: i64) -> NamedCount {
        NamedCount {
            name: name.to_string(),
            value,
        }
    }

    #[test]
    fn breakdown_is_ordered_labelled_and_zero_filled() {
        let rows = [count("closed", 4), count("open", 2)];
        let breakdown = status_breakdown(&rows);

        assert_eq!(
            breakdown,
            vec![
                count("Açık", 2),
                count("Devam Ediyor", 0),
                count("Çözüldü", 0),
                count("Kapatıldı", 4),
            ]
        );
    }

    #[test]
    fn missing_status_counts_as_zero() {
        assert_eq!(count_of(&[count("open", 3)], "resolved"), 0);
    }
}
