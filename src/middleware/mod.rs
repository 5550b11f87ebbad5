pub mod service_auth;

pub use service_auth::{cron_secret_validator, service_token_validator};
