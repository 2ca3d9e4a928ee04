//! Page identity and catalog records

use crate::error::{Result, TrafficError};
use chrono::NaiveDate;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bytes kept as-is in file stems; everything else, `%` included, is escaped
const FILE_STEM_ESCAPES: &AsciiSet = &NON_ALPHANUMERIC.remove(b'_').remove(b'-').remove(b'.');

/// Identity of one traffic column: a subject tracked in one language
///
/// Serialised as `{language}_{subject}`. Language codes never contain an
/// underscore, so parsing splits on the first one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageKey {
    pub language: String,
    pub subject: String,
}

impl PageKey {
    /// Create a new key
    pub fn new(language: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            subject: subject.into(),
        }
    }

    /// Column name used in tables and CSV headers
    pub fn column_name(&self) -> String {
        self.to_string()
    }

    /// The column name percent-encoded for use in a file name
    ///
    /// Distinct keys always give distinct stems.
    pub fn file_stem(&self) -> String {
        utf8_percent_encode(&self.column_name(), FILE_STEM_ESCAPES).to_string()
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.language, self.subject)
    }
}

impl FromStr for PageKey {
    type Err = TrafficError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('_') {
            Some((language, subject)) if !language.is_empty() && !subject.is_empty() => {
                Ok(PageKey::new(language, subject))
            }
            _ => Err(TrafficError::InvalidColumn(s.to_string())),
        }
    }
}

/// A page registered for tracking, as the table builder sees it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedPage {
    pub title: String,
    pub language: String,
    pub event_code: i64,
}

/// An event grouping pages across languages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub name: String,
    pub language: String,
    /// Creation date as entered, `dd/mm/YYYY` or ISO
    pub created_datetime: String,
    pub event_code: i64,
}

impl Event {
    /// Day the event's traffic history starts
    pub fn start_date(&self) -> Result<NaiveDate> {
        parse_event_date(&self.created_datetime).ok_or_else(|| TrafficError::ResolutionFailure {
            page: self.name.clone(),
            reason: format!("unparseable creation date '{}'", self.created_datetime),
        })
    }
}

/// New event record, as loaded from bootstrap files or the CLI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEvent {
    pub name: String,
    pub language: String,
    pub created_datetime: String,
    pub event_code: i64,
}

/// A Wikipedia page stored in the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WikipediaPage {
    pub id: i64,
    pub title: String,
    pub language: String,
    pub views: i64,
    pub event_code: i64,
    pub url: String,
}

/// New page record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPage {
    pub title: String,
    pub language: String,
    #[serde(default)]
    pub views: i64,
    pub event_code: i64,
    #[serde(default)]
    pub url: String,
}

/// Parse an event creation date, day-first then ISO
pub fn parse_event_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    // Drop any time part
    let day = raw.split_whitespace().next().unwrap_or(raw);
    NaiveDate::parse_from_str(day, "%d/%m/%Y")
        .or_else(|_| NaiveDate::parse_from_str(day, "%Y-%m-%d"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_splits_on_first_underscore() {
        let key: PageKey = "en_Solar_eclipse".parse().unwrap();
        assert_eq!(key.language, "en");
        assert_eq!(key.subject, "Solar_eclipse");
        assert_eq!(key.to_string(), "en_Solar_eclipse");
    }

    #[test]
    fn test_key_without_separator_is_invalid() {
        assert!("Earthquake".parse::<PageKey>().is_err());
        assert!("_Earthquake".parse::<PageKey>().is_err());
        assert!("en_".parse::<PageKey>().is_err());
    }

    #[test]
    fn test_file_stem_is_escaped() {
        let key = PageKey::new("fr", "Séisme/2023 Maroc");
        assert_eq!(key.file_stem(), "fr_S%C3%A9isme%2F2023%20Maroc");
        assert_eq!(PageKey::new("en", "Earthquake").file_stem(), "en_Earthquake");
    }

    #[test]
    fn test_file_stems_do_not_collide() {
        let stems: Vec<String> = ["A B", "A/B", "A-B", "A%20B", "A?B"]
            .iter()
            .map(|subject| PageKey::new("en", *subject).file_stem())
            .collect();
        for (i, a) in stems.iter().enumerate() {
            for b in &stems[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_event_dates() {
        assert_eq!(
            parse_event_date("08/09/2023"),
            NaiveDate::from_ymd_opt(2023, 9, 8)
        );
        assert_eq!(
            parse_event_date("2023-09-08 10:00:00"),
            NaiveDate::from_ymd_opt(2023, 9, 8)
        );
        assert!(parse_event_date("yesterday").is_none());
    }
}
