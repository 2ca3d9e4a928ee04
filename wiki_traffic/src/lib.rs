//! # Wiki Traffic
//!
//! Daily Wikipedia page-view data for tracked pages.
//!
//! ## Features
//!
//! - Typed page identity (`PageKey`) serialised as `{language}_{subject}`
//! - A wide date-indexed `TrafficTable`, mirrored to CSV through polars
//! - A SQLite store for the event/page catalog and the traffic rows
//! - A blocking Wikimedia page-view client
//! - A table builder that skips pages it cannot resolve or fetch
//!
//! ## Quick Start
//!
//! ```no_run
//! use wiki_traffic::{SqliteStore, TrafficTable, TrafficTableBuilder, WikimediaClient};
//! use std::time::Duration;
//!
//! let store = SqliteStore::open("instance/database.db")?;
//! let client = WikimediaClient::new("wikitrends/0.1", Duration::from_secs(30))?;
//! let today = chrono::Utc::now().date_naive();
//!
//! let table = TrafficTableBuilder::new(&store, &client, today).build()?;
//! table.persist(&store, "files/wiki_traffic_data.csv")?;
//!
//! let reloaded = TrafficTable::load(&store)?;
//! # Ok::<(), wiki_traffic::TrafficError>(())
//! ```

pub mod builder;
pub mod catalog;
pub mod error;
pub mod page;
pub mod source;
pub mod store;
pub mod table;

// Re-export commonly used types
pub use crate::builder::TrafficTableBuilder;
pub use crate::error::{Result, TrafficError};
pub use crate::page::{Event, NewEvent, NewPage, PageKey, TrackedPage, WikipediaPage};
pub use crate::source::{PageViewSource, WikimediaClient};
pub use crate::store::{SqliteStore, TrafficStore};
pub use crate::table::{TrafficRow, TrafficTable};
