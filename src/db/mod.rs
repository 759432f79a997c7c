//! Postgres-backed world store and lock provider.

mod lock;
mod migrate;
mod store;

pub use lock::PgLockProvider;
pub use migrate::migrate;
pub use store::PgStore;
