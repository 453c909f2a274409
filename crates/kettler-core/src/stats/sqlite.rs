//! `SQLite` backed stats store.
//!
//! # Schema
//!
//! The `exercise_stats` table has columns: `id`, `start_time`, `end_time`
//! (RFC 3339, UTC), `distance_km`, `time_elapsed_sec`, `energy_kjoule`.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};
use std::path::Path;

use super::{SessionRecord, StatsError, StatsStore};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS exercise_stats (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        start_time TEXT NOT NULL,
        end_time TEXT NOT NULL,
        distance_km REAL NOT NULL,
        time_elapsed_sec INTEGER NOT NULL,
        energy_kjoule INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_exercise_stats_start ON exercise_stats(start_time);
";

/// Stats store in a `SQLite` file
#[derive(Debug)]
pub struct SqliteStatsStore {
    conn: Connection,
}

impl SqliteStatsStore {
    /// Open (and create if absent) the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StatsError> {
        let conn = Connection::open(path.as_ref())?;
        Self::with_connection(conn)
    }

    /// In-memory store, gone when dropped
    pub fn open_in_memory() -> Result<Self, StatsError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StatsError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// All stored sessions, newest first
    pub fn records(&self) -> Result<Vec<SessionRecord>, StatsError> {
        let mut stmt = self.conn.prepare(
            "SELECT start_time, end_time, distance_km, time_elapsed_sec, energy_kjoule
             FROM exercise_stats
             ORDER BY start_time DESC, id DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, u32>(3)?,
                row.get::<_, u32>(4)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (start, end, distance_km, time_elapsed_sec, energy_kjoule) = row?;
            records.push(SessionRecord {
                start_time: parse_timestamp(&start)?,
                end_time: parse_timestamp(&end)?,
                distance_km,
                time_elapsed_sec,
                energy_kjoule,
            });
        }
        Ok(records)
    }
}

impl StatsStore for SqliteStatsStore {
    fn append(&mut self, record: &SessionRecord) -> Result<(), StatsError> {
        self.conn.execute(
            "INSERT INTO exercise_stats
                (start_time, end_time, distance_km, time_elapsed_sec, energy_kjoule)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                format_timestamp(&record.start_time),
                format_timestamp(&record.end_time),
                record.distance_km,
                record.time_elapsed_sec,
                record.energy_kjoule,
            ],
        )?;
        tracing::info!(
            start = %record.start_time,
            distance_km = record.distance_km,
            energy_kjoule = record.energy_kjoule,
            "Session stats stored"
        );
        Ok(())
    }
}

fn format_timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StatsError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StatsError::InvalidRow(format!("bad timestamp {s:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn record(hour: u32, energy: u32) -> SessionRecord {
        SessionRecord {
            start_time: Utc.with_ymd_and_hms(2025, 3, 1, hour, 0, 0).unwrap(),
            end_time: Utc.with_ymd_and_hms(2025, 3, 1, hour, 30, 0).unwrap(),
            distance_km: 8.4,
            time_elapsed_sec: 1800,
            energy_kjoule: energy,
        }
    }

    #[test]
    fn test_append_and_read_back() {
        let mut store = SqliteStatsStore::open_in_memory().unwrap();
        store.append(&record(7, 250)).unwrap();
        store.append(&record(18, 410)).unwrap();

        let records = store.records().unwrap();
        assert_eq!(records, vec![record(18, 410), record(7, 250)]);
    }

    #[test]
    fn test_creates_file_and_keeps_rows_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.db");

        {
            let mut store = SqliteStatsStore::open(&path).unwrap();
            store.append(&record(9, 120)).unwrap();
        }
        assert!(path.exists());

        let mut store = SqliteStatsStore::open(&path).unwrap();
        store.append(&record(10, 130)).unwrap();
        assert_eq!(store.records().unwrap().len(), 2);
    }

    #[test]
    fn test_timestamp_format() {
        let t = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(format_timestamp(&t), "2025-01-02T03:04:05Z");
        assert_eq!(parse_timestamp("2025-01-02T03:04:05Z").unwrap(), t);
        assert!(parse_timestamp("yesterday").is_err());
    }
}
