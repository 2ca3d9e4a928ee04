use std::io::Write;
use tempfile::NamedTempFile;
use wiki_traffic::catalog::{
    all_events, all_pages, create_event, delete_event, delete_page, event_by_code,
    event_by_name, load_default_events, load_default_pages, page_by_title,
};
use wiki_traffic::{NewEvent, SqliteStore, TrafficStore};

fn json_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", content).unwrap();
    file
}

#[test]
fn test_event_crud() {
    let store = SqliteStore::open_in_memory().unwrap();
    let id = create_event(
        &store,
        &NewEvent {
            name: "Eclipse".to_string(),
            language: "en".to_string(),
            created_datetime: "08/04/2024".to_string(),
            event_code: 3,
        },
    )
    .unwrap();

    let event = event_by_name(&store, "Eclipse").unwrap().unwrap();
    assert_eq!(event.id, id);
    assert_eq!(event_by_code(&store, 3).unwrap().unwrap().name, "Eclipse");
    assert!(event_by_code(&store, 4).unwrap().is_none());

    assert!(delete_event(&store, id).unwrap());
    assert!(!delete_event(&store, id).unwrap());
    assert!(all_events(&store).unwrap().is_empty());
}

#[test]
fn test_bootstrap_is_idempotent() {
    let store = SqliteStore::open_in_memory().unwrap();
    let events = json_file(
        r#"[
            {"name": "Earthquake", "language": "en", "created_datetime": "06/02/2023", "event_code": 1},
            {"name": "Eclipse", "language": "en", "created_datetime": "2024-04-08", "event_code": 2}
        ]"#,
    );
    let pages = json_file(
        r#"[
            {"title": "2023 Turkey earthquake", "language": "en", "event_code": 1},
            {"title": "Séisme de 2023 en Turquie", "language": "fr", "event_code": 1, "views": 12},
            {"title": "Solar eclipse of April 8, 2024", "language": "en", "event_code": 2}
        ]"#,
    );

    assert_eq!(load_default_events(&store, events.path()).unwrap(), 2);
    assert_eq!(load_default_pages(&store, pages.path()).unwrap(), 3);
    assert_eq!(load_default_events(&store, events.path()).unwrap(), 0);
    assert_eq!(load_default_pages(&store, pages.path()).unwrap(), 0);

    assert_eq!(all_events(&store).unwrap().len(), 2);
    assert_eq!(all_pages(&store).unwrap().len(), 3);
    assert_eq!(store.tracked_pages().unwrap().len(), 3);

    let page = page_by_title(&store, "Séisme de 2023 en Turquie").unwrap().unwrap();
    assert_eq!(page.views, 12);
    assert!(delete_page(&store, page.id).unwrap());
    assert_eq!(store.tracked_pages().unwrap().len(), 2);
}

#[test]
fn test_bootstrap_rejects_malformed_json() {
    let store = SqliteStore::open_in_memory().unwrap();
    let events = json_file("{not json");
    assert!(load_default_events(&store, events.path()).is_err());
}
