//! Event and page catalog operations
//!
//! Stateless functions over an explicit [`SqliteStore`], plus the
//! default-data bootstrap that seeds the catalog from JSON files.

use crate::error::Result;
use crate::page::{Event, NewEvent, NewPage, WikipediaPage};
use crate::store::{event_from_row, SqliteStore};
use rusqlite::{params, OptionalExtension};
use std::fs;
use std::path::Path;
use tracing::info;

const EVENT_COLUMNS: &str = "id, name, language, created_datetime, event_code";
const PAGE_COLUMNS: &str = "id, title, language, views, event_code, url";

fn page_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<WikipediaPage> {
    Ok(WikipediaPage {
        id: row.get(0)?,
        title: row.get(1)?,
        language: row.get(2)?,
        views: row.get(3)?,
        event_code: row.get(4)?,
        url: row.get(5)?,
    })
}

/// Insert an event, returning its id
pub fn create_event(store: &SqliteStore, event: &NewEvent) -> Result<i64> {
    let conn = store.connection();
    conn.execute(
        "INSERT INTO events (name, language, created_datetime, event_code) VALUES (?1, ?2, ?3, ?4)",
        params![event.name, event.language, event.created_datetime, event.event_code],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Delete an event by id; returns whether a row was removed
pub fn delete_event(store: &SqliteStore, id: i64) -> Result<bool> {
    let removed = store
        .connection()
        .execute("DELETE FROM events WHERE id = ?1", params![id])?;
    Ok(removed > 0)
}

/// All events, oldest first
pub fn all_events(store: &SqliteStore) -> Result<Vec<Event>> {
    let mut stmt = store
        .connection()
        .prepare(&format!("SELECT {} FROM events ORDER BY id", EVENT_COLUMNS))?;
    let events = stmt
        .query_map([], event_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(events)
}

pub fn event_by_name(store: &SqliteStore, name: &str) -> Result<Option<Event>> {
    let event = store
        .connection()
        .query_row(
            &format!("SELECT {} FROM events WHERE name = ?1 ORDER BY id LIMIT 1", EVENT_COLUMNS),
            params![name],
            event_from_row,
        )
        .optional()?;
    Ok(event)
}

pub fn event_by_code(store: &SqliteStore, code: i64) -> Result<Option<Event>> {
    crate::store::TrafficStore::event_by_code(store, code)
}

/// Insert a page, returning its id
pub fn create_page(store: &SqliteStore, page: &NewPage) -> Result<i64> {
    let conn = store.connection();
    conn.execute(
        "INSERT INTO wikipedia_pages (title, language, views, event_code, url) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![page.title, page.language, page.views, page.event_code, page.url],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Delete a page by id; returns whether a row was removed
pub fn delete_page(store: &SqliteStore, id: i64) -> Result<bool> {
    let removed = store
        .connection()
        .execute("DELETE FROM wikipedia_pages WHERE id = ?1", params![id])?;
    Ok(removed > 0)
}

/// All pages, oldest first
pub fn all_pages(store: &SqliteStore) -> Result<Vec<WikipediaPage>> {
    let mut stmt = store
        .connection()
        .prepare(&format!("SELECT {} FROM wikipedia_pages ORDER BY id", PAGE_COLUMNS))?;
    let pages = stmt
        .query_map([], page_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(pages)
}

pub fn page_by_title(store: &SqliteStore, title: &str) -> Result<Option<WikipediaPage>> {
    let page = store
        .connection()
        .query_row(
            &format!(
                "SELECT {} FROM wikipedia_pages WHERE title = ?1 ORDER BY id LIMIT 1",
                PAGE_COLUMNS
            ),
            params![title],
            page_from_row,
        )
        .optional()?;
    Ok(page)
}

/// Seed events from a JSON array, skipping names already present
///
/// Returns the number of events inserted.
pub fn load_default_events<P: AsRef<Path>>(store: &SqliteStore, path: P) -> Result<usize> {
    let raw = fs::read_to_string(path.as_ref())?;
    let events: Vec<NewEvent> = serde_json::from_str(&raw)?;

    let mut inserted = 0;
    for event in &events {
        if event_by_name(store, &event.name)?.is_none() {
            create_event(store, event)?;
            inserted += 1;
        }
    }
    info!(inserted, total = events.len(), "Default events loaded");
    Ok(inserted)
}

/// Seed pages from a JSON array, skipping titles already present
///
/// Returns the number of pages inserted.
pub fn load_default_pages<P: AsRef<Path>>(store: &SqliteStore, path: P) -> Result<usize> {
    let raw = fs::read_to_string(path.as_ref())?;
    let pages: Vec<NewPage> = serde_json::from_str(&raw)?;

    let mut inserted = 0;
    for page in &pages {
        if page_by_title(store, &page.title)?.is_none() {
            create_page(store, page)?;
            inserted += 1;
        }
    }
    info!(inserted, total = pages.len(), "Default pages loaded");
    Ok(inserted)
}
