pub mod cron_expr;
pub mod dispatcher;
pub mod manager;

pub use dispatcher::{dispatch, process_notifications, reset_budgets, route_event};
pub use manager::SchedulerManager;
