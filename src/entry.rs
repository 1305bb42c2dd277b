use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

// Marker a file name must contain to count as a journal entry
pub const MARKDOWN_MARKER: &str = ".md";

// Separates the title from the date token: `<title>_<date>.md`
pub const SEPARATOR: char = '_';

// Shown in place of a date that could not be parsed
pub const UNDATED_LABEL: &str = "Undated";

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%Y.%m.%d",
    "%m-%d-%Y",
    "%m/%d/%Y",
    "%B %d %Y",
    "%B %d, %Y",
    "%b %d %Y",
    "%b %d, %Y",
    "%d %B %Y",
];

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];

/// Title and raw date token split out of an entry file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName<'a> {
    pub title: &'a str,
    pub date_token: &'a str,
}

/// Splits `<title>_<date>.md` into its parts.
///
/// Returns `None` when the name carries no markdown marker; such files are
/// simply not journal entries. A missing separator yields an empty date token.
pub fn parse_file_name(name: &str) -> Option<ParsedName<'_>> {
    let marker = name.find(MARKDOWN_MARKER)?;
    let stem = &name[..marker];

    let parsed = match stem.find(SEPARATOR) {
        Some(sep) => ParsedName {
            title: &stem[..sep],
            date_token: &stem[sep + SEPARATOR.len_utf8()..],
        },
        None => ParsedName {
            title: stem,
            date_token: "",
        },
    };
    Some(parsed)
}

pub fn is_candidate(name: &str) -> bool {
    name.contains(MARKDOWN_MARKER)
}

// Calendar date derived from a file name. Keeps the raw token so an
// unparseable date can still be shown and reasoned about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryDate {
    raw: String,
    parsed: Option<NaiveDate>,
}

impl EntryDate {
    pub fn parse(raw: &str) -> Self {
        Self {
            raw: raw.to_string(),
            parsed: parse_date_token(raw),
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn value(&self) -> Option<NaiveDate> {
        self.parsed
    }

    pub fn is_valid(&self) -> bool {
        self.parsed.is_some()
    }

    /// Long-form label, e.g. "March 1, 2020".
    pub fn display(&self) -> String {
        match self.parsed {
            Some(date) => date.format("%B %-d, %Y").to_string(),
            None => UNDATED_LABEL.to_string(),
        }
    }

    /// Most recent first. Invalid dates compare after every valid date and
    /// equal to each other, so a stable sort keeps them in scan order.
    pub fn cmp_recent_first(&self, other: &Self) -> Ordering {
        match (self.parsed, other.parsed) {
            (Some(a), Some(b)) => b.cmp(&a),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

fn parse_date_token(raw: &str) -> Option<NaiveDate> {
    let token = raw.trim();
    if token.is_empty() {
        return None;
    }

    if let Some(date) = DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(token, fmt).ok())
    {
        return Some(date);
    }

    if let Ok(stamp) = DateTime::parse_from_rfc3339(token) {
        return Some(stamp.date_naive());
    }

    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(token, fmt).ok())
        .map(|stamp| stamp.date())
}

// A journal entry as found by a directory scan. Entries are rebuilt on every
// scan and never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub path: PathBuf,
    pub title: String,
    pub date: EntryDate,
}

impl Entry {
    pub fn from_file_name(dir: &Path, name: &str) -> Option<Self> {
        let parsed = parse_file_name(name)?;
        Some(Self {
            path: dir.join(name),
            title: parsed.title.to_string(),
            date: EntryDate::parse(parsed.date_token),
        })
    }
}

// Entry metadata for sidebar display
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryView {
    pub path: String,
    pub title: String,
    pub date: String,
    pub display_date: String,
    pub valid_date: bool,
}

impl From<&Entry> for EntryView {
    fn from(entry: &Entry) -> Self {
        Self {
            path: entry.path.to_string_lossy().into_owned(),
            title: entry.title.clone(),
            date: entry.date.raw().to_string(),
            display_date: entry.date.display(),
            valid_date: entry.date.is_valid(),
        }
    }
}
