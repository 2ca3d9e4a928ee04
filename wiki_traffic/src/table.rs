//! Wide daily traffic table: one row per date, one column per tracked page

use crate::error::{Result, TrafficError};
use crate::page::PageKey;
use crate::store::TrafficStore;
use chrono::NaiveDate;
use polars::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::path::Path;
use tracing::{debug, info, warn};

/// Name of the date column in the CSV mirror
pub const DATE_COLUMN: &str = "date";

/// On-disk date format
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// One date's worth of page views
#[derive(Debug, Clone, PartialEq)]
pub struct TrafficRow {
    pub date: NaiveDate,
    pub values: BTreeMap<PageKey, Option<f64>>,
}

/// Page views indexed by date, with a nullable column per page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrafficTable {
    /// Sorted, unique dates
    dates: Vec<NaiveDate>,
    /// Column values aligned with `dates`
    columns: BTreeMap<PageKey, Vec<Option<f64>>>,
}

impl TrafficTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Outer-join per-page series on date
    ///
    /// The result holds the union of all dates; cells a page has no
    /// observation for are `None`. When two series share a key the first
    /// value seen for a date is kept.
    pub fn from_series(series: Vec<(PageKey, Vec<(NaiveDate, f64)>)>) -> Self {
        let dates: Vec<NaiveDate> = series
            .iter()
            .flat_map(|(_, points)| points.iter().map(|(d, _)| *d))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let index: BTreeMap<NaiveDate, usize> =
            dates.iter().enumerate().map(|(i, d)| (*d, i)).collect();

        let mut columns: BTreeMap<PageKey, Vec<Option<f64>>> = BTreeMap::new();
        for (key, points) in series {
            let column = columns
                .entry(key)
                .or_insert_with(|| vec![None; dates.len()]);
            for (date, value) in points {
                if let Some(&i) = index.get(&date) {
                    if column[i].is_none() {
                        column[i] = Some(value);
                    }
                }
            }
        }

        Self { dates, columns }
    }

    /// Rebuild a table from stored rows, keeping every listed column
    pub fn from_rows(keys: &[PageKey], rows: Vec<TrafficRow>) -> Self {
        let mut by_date: BTreeMap<NaiveDate, BTreeMap<PageKey, Option<f64>>> = BTreeMap::new();
        for row in rows {
            by_date.entry(row.date).or_default().extend(row.values);
        }

        let dates: Vec<NaiveDate> = by_date.keys().copied().collect();
        let columns = keys
            .iter()
            .map(|key| {
                let values = by_date
                    .values()
                    .map(|values| values.get(key).copied().flatten())
                    .collect();
                (key.clone(), values)
            })
            .collect();

        Self { dates, columns }
    }

    /// Build a table from dates and aligned columns
    pub fn from_columns(
        dates: Vec<NaiveDate>,
        columns: BTreeMap<PageKey, Vec<Option<f64>>>,
    ) -> Result<Self> {
        let mut table = Self {
            dates,
            columns: BTreeMap::new(),
        };
        if table.dates.windows(2).any(|w| w[0] >= w[1]) {
            return Err(TrafficError::Persistence(
                "Dates must be unique and ascending".to_string(),
            ));
        }
        for (key, values) in columns {
            table.insert_column(key, values)?;
        }
        Ok(table)
    }

    /// Add or replace a column; its length must match the date index
    pub fn insert_column(&mut self, key: PageKey, values: Vec<Option<f64>>) -> Result<()> {
        if values.len() != self.dates.len() {
            return Err(TrafficError::InvalidColumn(format!(
                "{} has {} values for {} dates",
                key,
                values.len(),
                self.dates.len()
            )));
        }
        self.columns.insert(key, values);
        Ok(())
    }

    /// True when there is nothing to analyse
    pub fn is_empty(&self) -> bool {
        self.dates.is_empty() || self.columns.is_empty()
    }

    /// Number of dates
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    /// Number of page columns
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    /// Page keys in column order
    pub fn keys(&self) -> impl Iterator<Item = &PageKey> {
        self.columns.keys()
    }

    /// Columns in key order
    pub fn columns(&self) -> impl Iterator<Item = (&PageKey, &[Option<f64>])> {
        self.columns.iter().map(|(k, v)| (k, v.as_slice()))
    }

    /// Values of one column, aligned with [`dates`](Self::dates)
    pub fn column(&self, key: &PageKey) -> Option<&[Option<f64>]> {
        self.columns.get(key).map(Vec::as_slice)
    }

    /// Present observations of one page; an unknown page yields an empty series
    pub fn series(&self, key: &PageKey) -> Vec<(NaiveDate, f64)> {
        match self.columns.get(key) {
            Some(values) => self
                .dates
                .iter()
                .zip(values)
                .filter_map(|(d, v)| v.map(|v| (*d, v)))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Total views of one page
    pub fn total_views(&self, key: &PageKey) -> f64 {
        self.series(key).iter().map(|(_, v)| v).sum()
    }

    /// Average daily views of one page over its present observations
    pub fn average_views(&self, key: &PageKey) -> f64 {
        let series = self.series(key);
        if series.is_empty() {
            return 0.0;
        }
        self.total_views(key) / series.len() as f64
    }

    /// Page keys grouped by subject
    pub fn subjects(&self) -> BTreeMap<String, Vec<PageKey>> {
        let mut groups: BTreeMap<String, Vec<PageKey>> = BTreeMap::new();
        for key in self.columns.keys() {
            groups.entry(key.subject.clone()).or_default().push(key.clone());
        }
        groups
    }

    /// Rows for the durable store
    pub fn rows(&self) -> Vec<TrafficRow> {
        self.dates
            .iter()
            .enumerate()
            .map(|(i, date)| TrafficRow {
                date: *date,
                values: self
                    .columns
                    .iter()
                    .map(|(k, v)| (k.clone(), v[i]))
                    .collect(),
            })
            .collect()
    }

    /// Convert to a DataFrame with a string `date` column
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let mut series = Vec::with_capacity(self.columns.len() + 1);
        let dates: Vec<String> = self
            .dates
            .iter()
            .map(|d| d.format(DATE_FORMAT).to_string())
            .collect();
        series.push(Series::new(DATE_COLUMN, dates));

        for (key, values) in &self.columns {
            series.push(Series::new(&key.column_name(), values.clone()));
        }

        Ok(DataFrame::new(series)?)
    }

    /// Build a table from a DataFrame with a `date` column
    ///
    /// Columns whose name is not a valid page key are skipped with a warning.
    pub fn from_dataframe(df: &DataFrame) -> Result<Self> {
        let date_series = df.column(DATE_COLUMN)?.cast(&DataType::Utf8)?;
        let dates = date_series
            .utf8()?
            .into_iter()
            .map(|raw| {
                raw.and_then(|s| NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok())
                    .ok_or_else(|| {
                        TrafficError::Persistence(format!("Bad date in traffic CSV: {:?}", raw))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut columns = BTreeMap::new();
        for column in df.get_columns() {
            if column.name() == DATE_COLUMN {
                continue;
            }
            let key: PageKey = match column.name().parse() {
                Ok(key) => key,
                Err(e) => {
                    warn!(column = column.name(), "Skipping column: {}", e);
                    continue;
                }
            };
            let values: Vec<Option<f64>> = column
                .cast(&DataType::Float64)?
                .f64()?
                .into_iter()
                .collect();
            columns.insert(key, values);
        }

        Self::from_columns(dates, columns)
    }

    /// Mirror the table to a CSV file
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut df = self.to_dataframe()?;
        let mut file = File::create(path)?;
        CsvWriter::new(&mut file).has_header(true).finish(&mut df)?;
        debug!(path = %path.display(), rows = self.len(), "Traffic CSV written");
        Ok(())
    }

    /// Load a table from its CSV mirror
    pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let df = CsvReader::new(file)
            .infer_schema(None)
            .has_header(true)
            .finish()?;
        Self::from_dataframe(&df)
    }

    /// Persist to the durable store (known columns only) and mirror to CSV
    pub fn persist<S: TrafficStore + ?Sized, P: AsRef<Path>>(
        &self,
        store: &S,
        mirror: P,
    ) -> Result<()> {
        if self.is_empty() {
            info!("No traffic data to persist");
            return Ok(());
        }

        let keys: Vec<PageKey> = self.keys().cloned().collect();
        store.register_columns(&keys)?;
        let known: BTreeSet<PageKey> = store.known_columns()?.into_iter().collect();

        let rows: Vec<TrafficRow> = self
            .rows()
            .into_iter()
            .map(|mut row| {
                row.values.retain(|key, _| known.contains(key));
                row
            })
            .collect();
        store.upsert_traffic_rows(&rows)?;
        info!(rows = rows.len(), columns = known.len(), "Traffic table persisted");

        self.write_csv(mirror)
    }

    /// Reload the table from the durable store
    pub fn load<S: TrafficStore + ?Sized>(store: &S) -> Result<Self> {
        let keys = store.known_columns()?;
        let rows = store.traffic_rows()?;
        let table = Self::from_rows(&keys, rows);
        debug!(rows = table.len(), columns = table.width(), "Traffic table loaded");
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn test_outer_join_fills_gaps() {
        let en = PageKey::new("en", "Quake");
        let fr = PageKey::new("fr", "Quake");
        let table = TrafficTable::from_series(vec![
            (en.clone(), vec![(day(1), 10.0), (day(2), 12.0)]),
            (fr.clone(), vec![(day(2), 3.0), (day(3), 4.0)]),
        ]);

        assert_eq!(table.dates(), &[day(1), day(2), day(3)]);
        assert_eq!(table.column(&en).unwrap(), &[Some(10.0), Some(12.0), None]);
        assert_eq!(table.column(&fr).unwrap(), &[None, Some(3.0), Some(4.0)]);
        assert_eq!(table.subjects()["Quake"].len(), 2);
    }

    #[test]
    fn test_page_queries() {
        let en = PageKey::new("en", "Quake");
        let table = TrafficTable::from_series(vec![(en.clone(), vec![(day(1), 10.0), (day(3), 20.0)])]);
        assert_eq!(table.total_views(&en), 30.0);
        assert_eq!(table.average_views(&en), 15.0);

        let missing = PageKey::new("de", "Quake");
        assert!(table.series(&missing).is_empty());
        assert_eq!(table.average_views(&missing), 0.0);
    }

    #[test]
    fn test_insert_column_checks_length() {
        let mut table = TrafficTable::from_series(vec![(PageKey::new("en", "A"), vec![(day(1), 1.0)])]);
        assert!(table.insert_column(PageKey::new("fr", "A"), vec![]).is_err());
        assert!(table.insert_column(PageKey::new("fr", "A"), vec![Some(2.0)]).is_ok());
        assert_eq!(table.width(), 2);
    }

    #[test]
    fn test_empty_table() {
        let table = TrafficTable::from_series(Vec::new());
        assert!(table.is_empty());
        assert_eq!(table.len(), 0);
    }
}
