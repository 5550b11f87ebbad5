pub mod billing;
pub mod cron_handlers;
pub mod health;
pub mod usage_handlers;
