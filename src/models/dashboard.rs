use serde::Serialize;
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, FromRow, PartialEq)]
pub struct NamedCount {
    pub name: String,
    pub value: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    #[serde(rename = "totalKPIs")]
    pub total_kpis: i64,
    #[serde(rename = "completedKPIs")]
    pub completed_kpis: i64,
    #[serde(rename = "activeKPIs")]
    pub active_kpis: i64,
    pub total_tickets: i64,
    pub open_tickets: i64,
    pub in_progress_tickets: i64,
    pub resolved_tickets: i64,
    pub completed_tickets: i64,
    pub tickets_by_status: Vec<NamedCount>,
    pub tickets_by_department: Vec<NamedCount>,
    pub kpis_by_department: Vec<NamedCount>,
}

/// Turkish label shown for a ticket status in charts.
pub fn ticket_status_label(status: &str) -> &str {
    match status {
        "open" => "Açık",
        "in_progress" => "Devam Ediyor",
        "resolved" => "Çözüldü",
        "closed" => "Kapatıldı",
        other => other,
    }
}
