pub mod deadlines;
pub mod notifier;

pub use deadlines::{check_kpi_deadlines, spawn_deadline_checker};
pub use notifier::{notify_best_effort, notify_users};
