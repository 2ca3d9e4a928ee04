//! Durable storage for tracked pages and daily traffic

use crate::error::{Result, TrafficError};
use crate::page::{Event, PageKey, TrackedPage};
use crate::table::{TrafficRow, DATE_FORMAT};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Data-access collaborator the table builder and pipeline rely on
pub trait TrafficStore {
    /// Every page registered for tracking
    fn tracked_pages(&self) -> Result<Vec<TrackedPage>>;

    /// The event a page belongs to
    fn event_by_code(&self, code: i64) -> Result<Option<Event>>;

    /// Make columns known to the store so their values are kept
    fn register_columns(&self, keys: &[PageKey]) -> Result<()>;

    /// Columns the store keeps values for
    fn known_columns(&self) -> Result<Vec<PageKey>>;

    /// Insert or update one date's values
    fn upsert_traffic_row(&self, row: &TrafficRow) -> Result<()>;

    /// Insert or update many rows
    fn upsert_traffic_rows(&self, rows: &[TrafficRow]) -> Result<()> {
        for row in rows {
            self.upsert_traffic_row(row)?;
        }
        Ok(())
    }

    /// Every stored row, ascending by date
    fn traffic_rows(&self) -> Result<Vec<TrafficRow>>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    language TEXT NOT NULL,
    created_datetime TEXT NOT NULL,
    event_code INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS wikipedia_pages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    language TEXT NOT NULL,
    views INTEGER NOT NULL DEFAULT 0,
    event_code INTEGER NOT NULL,
    url TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS traffic_columns (
    language TEXT NOT NULL,
    subject TEXT NOT NULL,
    PRIMARY KEY (language, subject)
);

CREATE TABLE IF NOT EXISTS wiki_traffic (
    date TEXT NOT NULL,
    language TEXT NOT NULL,
    subject TEXT NOT NULL,
    views REAL,
    PRIMARY KEY (date, language, subject)
);

CREATE INDEX IF NOT EXISTS idx_events_code ON events(event_code);
CREATE INDEX IF NOT EXISTS idx_wiki_traffic_date ON wiki_traffic(date);
";

/// SQLite-backed store
///
/// Traffic is kept in long form (`date, language, subject, views`) and
/// pivoted back into rows on read, so new page columns need no migration.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) a database file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")?;
        Self::with_connection(conn)
    }

    /// In-memory database, used by tests
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Remove all stored traffic, keeping the catalog
    pub fn clear_traffic(&self) -> Result<()> {
        self.conn
            .execute_batch("DELETE FROM wiki_traffic; DELETE FROM traffic_columns;")?;
        Ok(())
    }
}

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|e| TrafficError::Persistence(format!("Stored date '{}' is invalid: {}", raw, e)))
}

pub(crate) fn event_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        id: row.get(0)?,
        name: row.get(1)?,
        language: row.get(2)?,
        created_datetime: row.get(3)?,
        event_code: row.get(4)?,
    })
}

impl TrafficStore for SqliteStore {
    fn tracked_pages(&self) -> Result<Vec<TrackedPage>> {
        let mut stmt = self
            .conn
            .prepare("SELECT title, language, event_code FROM wikipedia_pages ORDER BY id")?;
        let pages = stmt
            .query_map([], |row| {
                Ok(TrackedPage {
                    title: row.get(0)?,
                    language: row.get(1)?,
                    event_code: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(pages)
    }

    fn event_by_code(&self, code: i64) -> Result<Option<Event>> {
        let event = self
            .conn
            .query_row(
                "SELECT id, name, language, created_datetime, event_code
                 FROM events WHERE event_code = ?1 ORDER BY id LIMIT 1",
                params![code],
                event_from_row,
            )
            .optional()?;
        Ok(event)
    }

    fn register_columns(&self, keys: &[PageKey]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        for key in keys {
            tx.execute(
                "INSERT OR IGNORE INTO traffic_columns (language, subject) VALUES (?1, ?2)",
                params![key.language, key.subject],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn known_columns(&self) -> Result<Vec<PageKey>> {
        let mut stmt = self
            .conn
            .prepare("SELECT language, subject FROM traffic_columns ORDER BY language, subject")?;
        let keys = stmt
            .query_map([], |row| Ok(PageKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(keys)
    }

    fn upsert_traffic_row(&self, row: &TrafficRow) -> Result<()> {
        let date = format_date(row.date);
        for (key, views) in &row.values {
            self.conn.execute(
                "INSERT INTO wiki_traffic (date, language, subject, views) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(date, language, subject) DO UPDATE SET views = excluded.views",
                params![date, key.language, key.subject, views],
            )?;
        }
        Ok(())
    }

    fn upsert_traffic_rows(&self, rows: &[TrafficRow]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        for row in rows {
            self.upsert_traffic_row(row)?;
        }
        tx.commit()?;
        debug!(rows = rows.len(), "Upserted traffic rows");
        Ok(())
    }

    fn traffic_rows(&self) -> Result<Vec<TrafficRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT date, language, subject, views FROM wiki_traffic ORDER BY date, language, subject",
        )?;
        let cells = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    PageKey::new(row.get::<_, String>(1)?, row.get::<_, String>(2)?),
                    row.get::<_, Option<f64>>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        // Pivot long rows back into one row per date
        let mut by_date: BTreeMap<NaiveDate, BTreeMap<PageKey, Option<f64>>> = BTreeMap::new();
        for (date, key, views) in cells {
            by_date.entry(parse_date(&date)?).or_default().insert(key, views);
        }

        Ok(by_date
            .into_iter()
            .map(|(date, values)| TrafficRow { date, values })
            .collect())
    }
}
