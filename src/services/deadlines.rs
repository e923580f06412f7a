use std::{future::Future, time::Duration};

use chrono::{DateTime, Utc};
use log::{error, info};
use serde_json::json;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{kpi::KpiTarget, NewNotification, NotificationCategory, NotificationPriority},
    services::notifier::{department_managers, notify_users},
    state::AppState,
    utils::kpi::{deadline_alert, remaining_days, DeadlineAlert},
};

fn deadline_notification(kpi: &KpiTarget, alert: DeadlineAlert) -> NewNotification {
    let (priority, title, message) = match alert {
        DeadlineAlert::Upcoming { remaining_days } => (
            NotificationPriority::High,
            "KPI bitiş tarihi yaklaşıyor",
            format!("\"{}\" hedefinin bitişine {remaining_days} gün kaldı.", kpi.title),
        ),
        DeadlineAlert::Overdue { days_late } => (
            NotificationPriority::Critical,
            "KPI süresi doldu",
            format!("\"{}\" hedefinin süresi {days_late} gün önce doldu.", kpi.title),
        ),
    };

    NewNotification::new(NotificationCategory::Kpi, priority, title, message)
        .with_link(format!("/kpi/{}", kpi.id))
        .with_metadata(json!({ "kpiId": kpi.id, "endDate": kpi.end_date }))
}

async fn recipients_for(state: &AppState, kpi: &KpiTarget) -> AppResult<Vec<Uuid>> {
    let assignees = sqlx::query_scalar::<_, Uuid>("SELECT user_id FROM kpi_assignments WHERE kpi_id = $1")
        .bind(kpi.id)
        .fetch_all(&state.db)
        .await?;

    if assignees.is_empty() {
        department_managers(&state.db, &kpi.department).await
    } else {
        Ok(assignees)
    }
}

async fn remind(state: &AppState, kpi: &KpiTarget, alert: DeadlineAlert) -> AppResult<usize> {
    let recipients = recipients_for(state, kpi).await?;
    let sent = notify_users(state, &recipients, &deadline_notification(kpi, alert)).await?;
    Ok(sent.len())
}

/// Reminds every KPI inside the alert window and returns how many
/// notifications went out. A KPI whose reminder fails is logged and skipped.
async fn sweep<F, Fut>(kpis: Vec<KpiTarget>, now: DateTime<Utc>, mut remind: F) -> usize
where
    F: FnMut(KpiTarget, DeadlineAlert) -> Fut,
    Fut: Future<Output = AppResult<usize>>,
{
    let mut sent = 0;

    for kpi in kpis {
        let Some(alert) = deadline_alert(remaining_days(kpi.end_date, now)) else {
            continue;
        };

        let id = kpi.id;
        match remind(kpi, alert).await {
            Ok(count) => sent += count,
            Err(e) => error!("Deadline reminder for KPI {id} failed: {e}"),
        }
    }

    sent
}

/// Sends upcoming and overdue reminders for every active KPI.
///
/// Reminders are not deduplicated, so each run notifies again.
pub async fn check_kpi_deadlines(state: &AppState) -> AppResult<usize> {
    let kpis = sqlx::query_as::<_, KpiTarget>("SELECT * FROM kpi_targets WHERE status = 'active'")
        .fetch_all(&state.db)
        .await?;

    let sent = sweep(kpis, Utc::now(), |kpi, alert| async move { remind(state, &kpi, alert).await }).await;

    Ok(sent)
}

/// Runs the deadline check on a fixed interval. An interval of zero disables it.
pub fn spawn_deadline_checker(state: AppState) -> Option<JoinHandle<()>> {
    let secs = state.config.deadline_check_interval_secs;
    if secs == 0 {
        info!("KPI deadline checker disabled");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(secs));
        // The first tick fires immediately; skip it so restarts don't resend.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match check_kpi_deadlines(&state).await {
                Ok(sent) => info!("KPI deadline check sent {sent} notifications"),
                Err(e) => error!("KPI deadline check failed: {e}"),
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use chrono::{NaiveDate, TimeZone};

    fn kpi() -> KpiTarget {
        KpiTarget {
            id: Uuid::new_v4(),
            title: "Aylık satış".to_string(),
            description: None,
            department: "Satış".to_string(),
            target_value: 100.0,
            unit: "adet".to_string(),
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            period: "monthly".to_string(),
            priority: "high".to_string(),
            status: "active".to_string(),
            created_by: Uuid::new_v4(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn upcoming_reminder_mentions_days_left() {
        let kpi = kpi();
        let n = deadline_notification(&kpi, DeadlineAlert::Upcoming { remaining_days: 3 });
        assert_eq!(n.priority, NotificationPriority::High);
        assert!(n.message.contains("3 gün kaldı"));
        assert_eq!(n.link.as_deref(), Some(format!("/kpi/{}", kpi.id).as_str()));
    }

    #[test]
    fn overdue_reminder_is_critical() {
        let n = deadline_notification(&kpi(), DeadlineAlert::Overdue { days_late: 2 });
        assert_eq!(n.priority, NotificationPriority::Critical);
        assert_eq!(n.category, NotificationCategory::Kpi);
        assert!(n.message.contains("2 gün önce"));
    }

    #[tokio::test]
    async fn failing_kpi_does_not_stop_the_sweep() {
        let now = Utc.with_ymd_and_hms(2024, 2, 2, 9, 0, 0).unwrap();
        let broken = kpi();
        let broken_id = broken.id;
        let mut far_off = kpi();
        far_off.end_date = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();

        let mut reminded = Vec::new();
        let sent = sweep(vec![broken, far_off, kpi(), kpi()], now, |kpi, alert| {
            reminded.push(kpi.id);
            async move {
                assert!(matches!(alert, DeadlineAlert::Overdue { .. }));
                if kpi.id == broken_id {
                    Err(AppError::bad_request("alıcılar yüklenemedi"))
                } else {
                    Ok(2)
                }
            }
        })
        .await;

        assert_eq!(reminded.len(), 3);
        assert_eq!(sent, 4);
    }
}
