//! Credit Ledger Server Library
//!
//! Prepaid credit accounting for a multi-tenant communications platform:
//! the ledger, usage authorization, payment reconciliation, auto-recharge
//! and recurring subscription billing, exposed over HTTP.

pub mod clients;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod stripe_types;
pub mod utils;

// Re-export commonly used types for convenience
pub use config::AppSettings;
pub use error::AppError;
pub use models::runtime_config::AppState;
