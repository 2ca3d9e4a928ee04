use chrono::NaiveDate;
use std::cell::RefCell;
use wiki_traffic::catalog::{create_event, create_page};
use wiki_traffic::{
    NewEvent, NewPage, PageKey, PageViewSource, Result, SqliteStore, TrafficError,
    TrafficTableBuilder,
};

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
}

/// Serves three days of views for every page except those listed as failing
struct FakeSource {
    failing: Vec<String>,
    calls: RefCell<Vec<(String, NaiveDate)>>,
}

impl FakeSource {
    fn new(failing: &[&str]) -> Self {
        Self {
            failing: failing.iter().map(|s| s.to_string()).collect(),
            calls: RefCell::new(Vec::new()),
        }
    }
}

impl PageViewSource for FakeSource {
    fn fetch_daily_views(
        &self,
        language: &str,
        title: &str,
        start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<Vec<(NaiveDate, f64)>> {
        self.calls.borrow_mut().push((title.to_string(), start));
        if self.failing.iter().any(|t| t == title) {
            return Err(TrafficError::SourceUnavailable {
                page: format!("{}:{}", language, title),
                reason: "HTTP 503".to_string(),
            });
        }
        let base = if language == "en" { 100.0 } else { 10.0 };
        Ok((0..3)
            .map(|i| (start + chrono::Duration::days(i), base + i as f64))
            .collect())
    }
}

fn seeded_store() -> SqliteStore {
    let store = SqliteStore::open_in_memory().unwrap();
    create_event(
        &store,
        &NewEvent {
            name: "Earthquake".to_string(),
            language: "en".to_string(),
            created_datetime: "01/05/2024".to_string(),
            event_code: 1,
        },
    )
    .unwrap();
    for (title, language, code) in [
        ("2024 earthquake", "en", 1),
        ("Séisme de 2024", "fr", 1),
        ("Orphan page", "de", 42),
    ] {
        create_page(
            &store,
            &NewPage {
                title: title.to_string(),
                language: language.to_string(),
                views: 0,
                event_code: code,
                url: String::new(),
            },
        )
        .unwrap();
    }
    store
}

#[test]
fn test_build_joins_pages_under_event_name() {
    let store = seeded_store();
    let source = FakeSource::new(&[]);

    let table = TrafficTableBuilder::new(&store, &source, day(20))
        .build()
        .unwrap();

    // The orphan page has no event and is never fetched
    assert_eq!(source.calls.borrow().len(), 2);
    assert!(source.calls.borrow().iter().all(|(_, start)| *start == day(1)));

    assert_eq!(table.width(), 2);
    assert_eq!(table.dates(), &[day(1), day(2), day(3)]);
    let en = PageKey::new("en", "Earthquake");
    assert_eq!(table.column(&en).unwrap(), &[Some(100.0), Some(101.0), Some(102.0)]);
    assert_eq!(table.subjects()["Earthquake"].len(), 2);
}

#[test]
fn test_fetch_failure_skips_only_that_page() {
    let store = seeded_store();
    let source = FakeSource::new(&["Séisme de 2024"]);

    let table = TrafficTableBuilder::new(&store, &source, day(20))
        .build()
        .unwrap();

    assert_eq!(table.width(), 1);
    assert!(table.column(&PageKey::new("en", "Earthquake")).is_some());
    assert!(table.column(&PageKey::new("fr", "Earthquake")).is_none());
}

#[test]
fn test_no_pages_gives_empty_table() {
    let store = SqliteStore::open_in_memory().unwrap();
    let source = FakeSource::new(&[]);

    let table = TrafficTableBuilder::new(&store, &source, day(20))
        .build()
        .unwrap();
    assert!(table.is_empty());
}

#[test]
fn test_unparseable_event_date_skips_page() {
    let store = SqliteStore::open_in_memory().unwrap();
    create_event(
        &store,
        &NewEvent {
            name: "Storm".to_string(),
            language: "en".to_string(),
            created_datetime: "last week".to_string(),
            event_code: 7,
        },
    )
    .unwrap();
    create_page(
        &store,
        &NewPage {
            title: "Storm".to_string(),
            language: "en".to_string(),
            views: 0,
            event_code: 7,
            url: String::new(),
        },
    )
    .unwrap();
    let source = FakeSource::new(&[]);

    let table = TrafficTableBuilder::new(&store, &source, day(20))
        .build()
        .unwrap();
    assert!(table.is_empty());
    assert!(source.calls.borrow().is_empty());
}
