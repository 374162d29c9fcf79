//! StationThis Store - SQLite persistence for execution records
//!
//! Implements the execution record store seam from `stationthis-core` on
//! SQLite via sqlx. Conditional writes are expressed as guarded UPDATE
//! statements so the compare-and-set semantics hold across processes
//! sharing one database file, not just across tasks in one process.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod sqlite;

pub use sqlite::SqliteRecordStore;
