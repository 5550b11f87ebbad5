pub mod connection;
pub mod memory_store;
pub mod pool_ext;
pub mod repositories;

pub use connection::{create_pool, run_migrations, verify_connection};
pub use memory_store::MemoryStore;
pub use repositories::*;
