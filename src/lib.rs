//! StationThis - spell and cook execution pipeline
//!
//! Facade crate that re-exports the coordinator from `stationthis-core`
//! and the SQLite record store from `stationthis-store`. Platform surfaces
//! (Telegram, Discord, web) depend on this crate and talk to the
//! [`Coordinator`] only.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub use stationthis_core::*;
pub use stationthis_store::SqliteRecordStore;
