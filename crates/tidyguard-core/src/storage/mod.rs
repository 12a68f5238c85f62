pub mod models;
pub mod pool;
pub mod queries;
pub mod sqlite;

pub use models::{
    AuditLogEntry, BlockedRecord, DeferredItem, DeferredStatus, DuplicateRecord, NewLogEntry,
    StatsPeriod, StatsSummary,
};
pub use pool::{ConnectionPool, PooledConnection};
pub use queries::Enqueued;
pub use sqlite::AuditStore;
