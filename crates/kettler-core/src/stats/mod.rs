//! Session statistics
//!
//! One row per completed session, appended when the session loop closes a
//! session at idle timeout. Rows are never updated or deleted.

pub mod report;
mod sqlite;

pub use sqlite::SqliteStatsStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Summary of one completed session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// First confirmed in-use poll
    pub start_time: DateTime<Utc>,
    /// Last confirmed in-use poll
    pub end_time: DateTime<Utc>,
    pub distance_km: f64,
    pub time_elapsed_sec: u32,
    pub energy_kjoule: u32,
}

/// Errors from the stats store
#[derive(Error, Debug)]
pub enum StatsError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Invalid stored row: {0}")]
    InvalidRow(String),
}

/// Append-only store of completed sessions
pub trait StatsStore {
    /// Durably append one record
    fn append(&mut self, record: &SessionRecord) -> Result<(), StatsError>;
}
