//! Book model

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// A unique identifier for a book, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BookId(Uuid);

impl BookId {
    /// Create a new unique book ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for BookId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BookId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Where a book sits on the reader's shelf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReadingStatus {
    /// Want to read
    #[default]
    Wishlist,
    /// Currently reading
    Reading,
    /// Finished
    Completed,
    /// Skimmed rather than read
    Skimmed,
    /// Paused
    OnHold,
    /// Did not finish
    Dnf,
    /// Owned but not started
    Owned,
}

impl ReadingStatus {
    /// All statuses, in display order
    pub const ALL: [Self; 7] = [
        Self::Wishlist,
        Self::Reading,
        Self::Completed,
        Self::Skimmed,
        Self::OnHold,
        Self::Dnf,
        Self::Owned,
    ];

    /// Stable lowercase name used in the database and on the command line
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Wishlist => "wishlist",
            Self::Reading => "reading",
            Self::Completed => "completed",
            Self::Skimmed => "skimmed",
            Self::OnHold => "on_hold",
            Self::Dnf => "dnf",
            Self::Owned => "owned",
        }
    }
}

impl fmt::Display for ReadingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReadingStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown reading status: {s}")))
    }
}

/// The domain payload of a book: everything that is mirrored to the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BookFields {
    /// Title (required)
    pub title: String,
    /// Author display name
    pub author: String,
    /// Shelf status
    pub status: ReadingStatus,
    /// Rating from 1 to 5
    pub rating: Option<u8>,
    /// ISBN-10, normalized
    pub isbn: Option<String>,
    /// ISBN-13, normalized
    pub isbn13: Option<String>,
    /// Page count
    pub page_count: Option<u32>,
    /// Free-form progress marker (e.g. "45%", "p. 120")
    pub progress: Option<String>,
    /// Day reading started
    pub date_started: Option<NaiveDate>,
    /// Day reading finished
    pub date_finished: Option<NaiveDate>,
    /// Lowercased, deduplicated, sorted tags
    pub tags: Vec<String>,
}

impl BookFields {
    /// Create a payload with a title and author; other fields default.
    pub fn new(title: impl Into<String>, author: impl Into<String>) -> Result<Self> {
        let fields = Self {
            title: title.into().trim().to_string(),
            author: author.into().trim().to_string(),
            ..Self::default()
        };
        fields.normalized()
    }

    /// Validate and normalize the payload.
    ///
    /// ISBNs lose hyphens and spaces, tags are lowercased and deduplicated.
    pub fn normalized(mut self) -> Result<Self> {
        self.title = self.title.trim().to_string();
        self.author = self.author.trim().to_string();

        if self.title.is_empty() {
            return Err(Error::InvalidInput("Book title cannot be empty".to_string()));
        }
        if let Some(rating) = self.rating {
            if !(1..=5).contains(&rating) {
                return Err(Error::InvalidInput(format!(
                    "Rating must be between 1 and 5, got {rating}"
                )));
            }
        }

        self.isbn = self.isbn.as_deref().map(normalize_isbn).transpose()?.flatten();
        self.isbn13 = self
            .isbn13
            .as_deref()
            .map(normalize_isbn)
            .transpose()?
            .flatten();
        self.progress = crate::util::normalize_text_option(self.progress);
        self.tags = normalize_tags(&self.tags);
        Ok(self)
    }

    /// Natural keys that can identify the same book across stores
    pub fn natural_keys(&self) -> Vec<&str> {
        self.isbn
            .iter()
            .chain(self.isbn13.iter())
            .map(String::as_str)
            .collect()
    }
}

/// A tracked book with its sync bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    /// Unique local identifier
    pub id: BookId,
    /// Remote (Notion page) identifier, set once pushed
    pub remote_id: Option<String>,
    /// Domain payload
    pub fields: BookFields,
    /// Last local mutation (Unix ms)
    pub local_modified_at: i64,
    /// Last remote-sourced write or confirmed push (Unix ms)
    pub remote_modified_at: i64,
    /// Soft delete flag for sync
    pub is_deleted: bool,
}

impl Book {
    /// Create a new, never-synced book
    #[must_use]
    pub fn new(fields: BookFields) -> Self {
        Self {
            id: BookId::new(),
            remote_id: None,
            fields,
            local_modified_at: chrono::Utc::now().timestamp_millis(),
            remote_modified_at: 0,
            is_deleted: false,
        }
    }

    /// Whether the book has ever been confirmed on the remote
    pub const fn is_pushed(&self) -> bool {
        self.remote_id.is_some()
    }

    /// One-line label for listings and logs
    #[must_use]
    pub fn label(&self) -> String {
        if self.fields.author.is_empty() {
            self.fields.title.clone()
        } else {
            format!("{} by {}", self.fields.title, self.fields.author)
        }
    }
}

/// Normalize an ISBN-10 or ISBN-13.
///
/// Hyphens and spaces are removed and a trailing `x` is uppercased. Empty
/// input yields `None`; anything that is not 10 or 13 digits is rejected.
pub fn normalize_isbn(raw: &str) -> Result<Option<String>> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect::<String>()
        .to_ascii_uppercase();

    if cleaned.is_empty() {
        return Ok(None);
    }

    let re = Regex::new(r"^(\d{9}[\dX]|\d{13})$").expect("Invalid regex");
    if re.is_match(&cleaned) {
        Ok(Some(cleaned))
    } else {
        Err(Error::InvalidInput(format!("Invalid ISBN: {raw}")))
    }
}

/// Lowercase, trim, deduplicate and sort tags
#[must_use]
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    tags.iter()
        .map(|tag| tag.trim().to_lowercase())
        .filter(|tag| !tag.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_book_id_unique() {
        let id1 = BookId::new();
        let id2 = BookId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_book_id_parse() {
        let id = BookId::new();
        let parsed: BookId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_book_new_is_unpushed() {
        let book = Book::new(BookFields::new("Dune", "Frank Herbert").unwrap());
        assert!(!book.is_pushed());
        assert!(!book.is_deleted);
        assert!(book.local_modified_at > 0);
        assert_eq!(book.remote_modified_at, 0);
        assert_eq!(book.label(), "Dune by Frank Herbert");
    }

    #[test]
    fn test_fields_require_title() {
        assert!(BookFields::new("   ", "Someone").is_err());
    }

    #[test]
    fn test_fields_reject_out_of_range_rating() {
        let fields = BookFields {
            title: "Dune".to_string(),
            rating: Some(6),
            ..BookFields::default()
        };
        assert!(fields.normalized().is_err());
    }

    #[test]
    fn test_normalize_isbn() {
        assert_eq!(
            normalize_isbn("0-441-17271-7").unwrap(),
            Some("0441172717".to_string())
        );
        assert_eq!(
            normalize_isbn("978 0 441 17271 9").unwrap(),
            Some("9780441172719".to_string())
        );
        assert_eq!(
            normalize_isbn("080442957x").unwrap(),
            Some("080442957X".to_string())
        );
        assert_eq!(normalize_isbn("  ").unwrap(), None);
        assert!(normalize_isbn("12345").is_err());
    }

    #[test]
    fn test_normalize_tags() {
        let tags = vec![
            "SciFi".to_string(),
            " classics ".to_string(),
            "scifi".to_string(),
            String::new(),
        ];
        assert_eq!(normalize_tags(&tags), vec!["classics", "scifi"]);
    }

    #[test]
    fn test_reading_status_parse() {
        assert_eq!(
            "on-hold".parse::<ReadingStatus>().unwrap(),
            ReadingStatus::OnHold
        );
        assert_eq!(
            "Completed".parse::<ReadingStatus>().unwrap(),
            ReadingStatus::Completed
        );
        assert!("finished".parse::<ReadingStatus>().is_err());
    }

    #[test]
    fn test_natural_keys() {
        let fields = BookFields {
            title: "Dune".to_string(),
            isbn: Some("0441172717".to_string()),
            isbn13: Some("9780441172719".to_string()),
            ..BookFields::default()
        };
        assert_eq!(fields.natural_keys(), vec!["0441172717", "9780441172719"]);
    }
}
