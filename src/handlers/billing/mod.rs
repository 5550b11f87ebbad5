// Billing-related HTTP handlers organized by domain

pub mod auto_recharge_handlers;
pub mod credit_handlers;
pub mod payment_handlers;
pub mod subscription_handlers;
pub mod webhook_handlers;

pub use auto_recharge_handlers::*;
pub use credit_handlers::*;
pub use payment_handlers::*;
pub use subscription_handlers::*;
pub use webhook_handlers::*;
