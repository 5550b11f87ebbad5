use std::env;
use std::str::FromStr;
use crate::error::AppError;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppSettings {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub stripe: StripeConfig,
    pub billing: BillingConfig,
    pub cron: CronConfig,
    pub notifications: NotificationConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub environment: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: StoreBackend,
    pub url: Option<String>,
    pub max_connections: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Bearer token accepted on /api routes
    pub service_api_token: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    /// Maximum age of a webhook signature timestamp
    pub webhook_tolerance_secs: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BillingConfig {
    pub currency: String,
    pub auto_recharge_cooldown_minutes: i64,
    pub billing_period_days: i64,
    pub suspension_retry_days: i64,
    pub voice_credits_per_minute: i64,
    pub sms_credits_per_segment: i64,
    /// Flat tax rate applied on top of package prices, e.g. 0.0825
    pub tax_rate: BigDecimal,
    pub cycle_concurrency: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CronConfig {
    pub secret: String,
    /// Optional in-process schedule, e.g. "0 */15 * * * *"
    pub schedule: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub webhook_url: Option<String>,
    pub queue_capacity: usize,
    pub max_attempts: u32,
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: &str,
    what: &str,
) -> Result<T, AppError> {
    lookup(key)
        .unwrap_or_else(|| default.to_string())
        .parse::<T>()
        .map_err(|_| AppError::Configuration(format!("{} must be {}", key, what)))
}

fn required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String, AppError> {
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::Configuration(format!("{} must be set", key)))
}

impl AppSettings {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        // App config
        let app_name = lookup("APP_NAME").unwrap_or_else(|| "credit-ledger".to_string());
        let environment = lookup("ENVIRONMENT").unwrap_or_else(|| "development".to_string());

        // Database config
        let backend = match lookup("STORE_BACKEND").as_deref().unwrap_or("postgres") {
            "postgres" => StoreBackend::Postgres,
            "memory" => StoreBackend::Memory,
            other => {
                return Err(AppError::Configuration(format!(
                    "STORE_BACKEND must be 'postgres' or 'memory', got '{}'",
                    other
                )))
            }
        };
        let database_url = lookup("DATABASE_URL");
        if backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(AppError::Configuration(
                "DATABASE_URL must be set when STORE_BACKEND=postgres".to_string(),
            ));
        }
        let max_connections =
            parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", "10", "a valid number")?;

        // Server config
        let server_host = lookup("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let server_port = parse_or(&lookup, "SERVER_PORT", "8080", "a valid port number")?;

        let service_api_token = required(&lookup, "SERVICE_API_TOKEN")?;

        // Stripe configuration
        let stripe_secret_key = required(&lookup, "STRIPE_SECRET_KEY")?;
        let stripe_webhook_secret = required(&lookup, "STRIPE_WEBHOOK_SECRET")?;
        let stripe_api_base_url = lookup("STRIPE_API_BASE_URL")
            .unwrap_or_else(|| "https://api.stripe.com/v1".to_string());
        let stripe_timeout =
            parse_or(&lookup, "STRIPE_REQUEST_TIMEOUT_SECS", "20", "a valid number")?;
        let webhook_tolerance =
            parse_or(&lookup, "STRIPE_WEBHOOK_TOLERANCE_SECS", "300", "a valid number")?;

        // Billing
        let currency = lookup("BILLING_CURRENCY").unwrap_or_else(|| "usd".to_string());
        let cooldown = parse_or(&lookup, "AUTO_RECHARGE_COOLDOWN_MINUTES", "60", "a valid number")?;
        let period_days = parse_or(&lookup, "BILLING_PERIOD_DAYS", "30", "a valid number")?;
        let retry_days = parse_or(&lookup, "SUSPENSION_RETRY_DAYS", "7", "a valid number")?;
        let voice_rate = parse_or(&lookup, "VOICE_CREDITS_PER_MINUTE", "10", "a valid number")?;
        let sms_rate = parse_or(&lookup, "SMS_CREDITS_PER_SEGMENT", "5", "a valid number")?;
        let tax_rate = BigDecimal::from_str(&lookup("TAX_RATE").unwrap_or_else(|| "0".to_string()))
            .map_err(|_| AppError::Configuration("TAX_RATE must be a decimal".to_string()))?;
        let cycle_concurrency =
            parse_or(&lookup, "BILLING_CYCLE_CONCURRENCY", "8", "a valid number")?;

        if cooldown <= 0 || period_days <= 0 || retry_days <= 0 {
            return Err(AppError::Configuration(
                "Cooldown, billing period and retry offset must be positive".to_string(),
            ));
        }
        if voice_rate <= 0 || sms_rate <= 0 {
            return Err(AppError::Configuration("Unit rates must be positive".to_string()));
        }

        // Cron
        let cron_secret = required(&lookup, "CRON_SECRET")?;
        let cron_schedule = lookup("BILLING_CRON_SCHEDULE").filter(|s| !s.trim().is_empty());

        // Notifications
        let notification_url = lookup("NOTIFICATION_WEBHOOK_URL").filter(|s| !s.trim().is_empty());
        let queue_capacity =
            parse_or(&lookup, "NOTIFICATION_QUEUE_CAPACITY", "1024", "a valid number")?;
        let max_attempts = parse_or(&lookup, "NOTIFICATION_MAX_ATTEMPTS", "3", "a valid number")?;

        Ok(Self {
            app: AppConfig {
                name: app_name,
                environment,
            },
            database: DatabaseConfig {
                backend,
                url: database_url,
                max_connections,
            },
            server: ServerConfig {
                host: server_host,
                port: server_port,
            },
            auth: AuthConfig { service_api_token },
            stripe: StripeConfig {
                secret_key: stripe_secret_key,
                webhook_secret: stripe_webhook_secret,
                api_base_url: stripe_api_base_url,
                request_timeout_secs: stripe_timeout,
                webhook_tolerance_secs: webhook_tolerance,
            },
            billing: BillingConfig {
                currency,
                auto_recharge_cooldown_minutes: cooldown,
                billing_period_days: period_days,
                suspension_retry_days: retry_days,
                voice_credits_per_minute: voice_rate,
                sms_credits_per_segment: sms_rate,
                tax_rate,
                cycle_concurrency,
            },
            cron: CronConfig {
                secret: cron_secret,
                schedule: cron_schedule,
            },
            notifications: NotificationConfig {
                webhook_url: notification_url,
                queue_capacity,
                max_attempts,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("STORE_BACKEND", "memory"),
            ("SERVICE_API_TOKEN", "svc"),
            ("STRIPE_SECRET_KEY", "sk_test_123"),
            ("STRIPE_WEBHOOK_SECRET", "whsec_123"),
            ("CRON_SECRET", "cron"),
        ])
    }

    #[test]
    fn defaults_are_applied() {
        let vars = base();
        let settings = AppSettings::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(settings.database.backend, StoreBackend::Memory);
        assert_eq!(settings.billing.auto_recharge_cooldown_minutes, 60);
        assert_eq!(settings.billing.billing_period_days, 30);
        assert_eq!(settings.billing.suspension_retry_days, 7);
        assert_eq!(settings.server.port, 8080);
        assert!(settings.cron.schedule.is_none());
    }

    #[test]
    fn postgres_requires_database_url() {
        let mut vars = base();
        vars.insert("STORE_BACKEND", "postgres");
        let err = AppSettings::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn rejects_invalid_port() {
        let mut vars = base();
        vars.insert("SERVER_PORT", "not-a-port");
        assert!(AppSettings::from_lookup(|k| vars.get(k).map(|v| v.to_string())).is_err());
    }

    #[test]
    fn missing_cron_secret_is_an_error() {
        let mut vars = base();
        vars.remove("CRON_SECRET");
        let err = AppSettings::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap_err();
        assert!(err.to_string().contains("CRON_SECRET"));
    }
}
