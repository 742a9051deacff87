//! Durability backends.

pub mod file;
pub mod postgres;

pub use file::FileBackend;
pub use postgres::{CONNECT_RETRY_SCHEDULE, PostgresBackend, PostgresWriteMode, is_connection_error};
