//! Assemble the traffic table from tracked pages

use crate::error::{Result, TrafficError};
use crate::page::{PageKey, TrackedPage};
use crate::source::PageViewSource;
use crate::store::TrafficStore;
use crate::table::TrafficTable;
use chrono::NaiveDate;
use tracing::{info, warn};

/// Fetches every tracked page and outer-joins the series into one table
///
/// Pages whose event cannot be resolved, whose start date does not parse or
/// whose fetch fails are logged and skipped.
pub struct TrafficTableBuilder<'a, S: ?Sized, P: ?Sized> {
    store: &'a S,
    source: &'a P,
    today: NaiveDate,
}

impl<'a, S, P> TrafficTableBuilder<'a, S, P>
where
    S: TrafficStore + ?Sized,
    P: PageViewSource + ?Sized,
{
    /// Create a new builder fetching up to `today`
    pub fn new(store: &'a S, source: &'a P, today: NaiveDate) -> Self {
        Self {
            store,
            source,
            today,
        }
    }

    /// Build the table; only failing to list the tracked pages is an error
    pub fn build(&self) -> Result<TrafficTable> {
        let pages = self.store.tracked_pages()?;
        info!(pages = pages.len(), "Building traffic table");

        let mut series = Vec::with_capacity(pages.len());
        for page in &pages {
            match self.fetch_page(page) {
                Ok(entry) => series.push(entry),
                Err(e) => warn!(page = %page.title, language = %page.language, "Skipping page: {}", e),
            }
        }

        let table = TrafficTable::from_series(series);
        if table.is_empty() {
            warn!("No page yielded traffic data");
        } else {
            info!(rows = table.len(), columns = table.width(), "Traffic table built");
        }
        Ok(table)
    }

    fn fetch_page(&self, page: &TrackedPage) -> Result<(PageKey, Vec<(NaiveDate, f64)>)> {
        let event = self
            .store
            .event_by_code(page.event_code)?
            .ok_or_else(|| TrafficError::ResolutionFailure {
                page: page.title.clone(),
                reason: format!("no event with code {}", page.event_code),
            })?;
        let start = event.start_date()?;

        let views = self
            .source
            .fetch_daily_views(&page.language, &page.title, start, self.today)?;
        Ok((PageKey::new(page.language.clone(), event.name), views))
    }
}
