pub mod calendar;
pub mod dashboard;
pub mod department;
pub mod kpi;
pub mod meeting;
pub mod notification;
pub mod role;
pub mod ticket;
pub mod user;

pub use role::{Role, UserRole};
pub use user::{Profile, ProfileSummary, ProfileWithRoles, SessionUser};
pub use notification::{NewNotification, Notification, NotificationCategory, NotificationPriority};
