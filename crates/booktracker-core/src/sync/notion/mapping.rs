//! Translation between books and Notion page properties.
//!
//! Pushes always send every property so that cleared local fields clear the
//! page too. Parsing is lenient: values Notion accepts but the local store
//! would reject are dropped rather than failing the whole pull.

use chrono::{DateTime, NaiveDate};
use serde_json::{json, Map, Value};

use crate::models::{normalize_isbn, normalize_tags, Book, BookFields, BookId, ReadingStatus};
use crate::sync::client::{RemoteBook, RemoteError};
use crate::util::truncate_chars;

/// Notion's limit for a single rich text run
pub const MAX_TEXT_CHARS: usize = 2000;
/// Tags beyond this are not sent
pub const MAX_TAGS: usize = 10;

/// Title used for pages whose title property is empty
const UNTITLED: &str = "Untitled";

pub const PROP_TITLE: &str = "Title";
pub const PROP_AUTHOR: &str = "Author";
pub const PROP_STATUS: &str = "Status";
pub const PROP_RATING: &str = "Rating";
pub const PROP_ISBN: &str = "ISBN";
pub const PROP_ISBN13: &str = "ISBN13";
pub const PROP_PAGE_COUNT: &str = "Page Count";
pub const PROP_PROGRESS: &str = "Progress";
pub const PROP_DATE_STARTED: &str = "Date Started";
pub const PROP_DATE_FINISHED: &str = "Date Finished";
pub const PROP_TAGS: &str = "Tags";
pub const PROP_LOCAL_ID: &str = "Local ID";

/// Select option used for a local status
pub const fn status_to_notion(status: ReadingStatus) -> &'static str {
    match status {
        ReadingStatus::Reading => "Borrowed",
        ReadingStatus::Completed => "Read",
        ReadingStatus::Skimmed => "Skimmed",
        ReadingStatus::OnHold => "On Hold",
        ReadingStatus::Wishlist => "Want to Read",
        ReadingStatus::Dnf => "DNF",
        ReadingStatus::Owned => "Owned",
    }
}

/// Local status for a select option; unknown options fall back to wishlist
pub fn status_from_notion(name: &str) -> ReadingStatus {
    ReadingStatus::ALL
        .into_iter()
        .find(|status| status_to_notion(*status).eq_ignore_ascii_case(name.trim()))
        .unwrap_or_default()
}

fn rich_text(value: Option<&str>) -> Value {
    match value.filter(|v| !v.is_empty()) {
        Some(text) => json!({
            "rich_text": [{ "type": "text", "text": { "content": truncate_chars(text, MAX_TEXT_CHARS) } }]
        }),
        None => json!({ "rich_text": [] }),
    }
}

fn date(value: Option<NaiveDate>) -> Value {
    match value {
        Some(day) => json!({ "date": { "start": day.format("%Y-%m-%d").to_string() } }),
        None => json!({ "date": null }),
    }
}

/// Full property set for a page
pub fn book_properties(book: &Book) -> Value {
    let fields = &book.fields;
    let tags: Vec<Value> = fields
        .tags
        .iter()
        .take(MAX_TAGS)
        .map(|tag| json!({ "name": truncate_chars(tag, 100) }))
        .collect();

    json!({
        PROP_TITLE: {
            "title": [{ "type": "text", "text": { "content": truncate_chars(&fields.title, MAX_TEXT_CHARS) } }]
        },
        PROP_AUTHOR: rich_text(Some(&fields.author)),
        PROP_STATUS: { "select": { "name": status_to_notion(fields.status) } },
        PROP_RATING: { "number": fields.rating },
        PROP_ISBN: rich_text(fields.isbn.as_deref()),
        PROP_ISBN13: rich_text(fields.isbn13.as_deref()),
        PROP_PAGE_COUNT: { "number": fields.page_count },
        PROP_PROGRESS: rich_text(fields.progress.as_deref()),
        PROP_DATE_STARTED: date(fields.date_started),
        PROP_DATE_FINISHED: date(fields.date_finished),
        PROP_TAGS: { "multi_select": tags },
        PROP_LOCAL_ID: rich_text(Some(&book.id.to_string())),
    })
}

fn plain_text(props: &Map<String, Value>, name: &str, kind: &str) -> Option<String> {
    let runs = props.get(name)?.get(kind)?.as_array()?;
    let text: String = runs
        .iter()
        .filter_map(|run| run.get("plain_text").and_then(Value::as_str))
        .collect();
    crate::util::normalize_text_option(Some(text))
}

fn number(props: &Map<String, Value>, name: &str) -> Option<f64> {
    props.get(name)?.get("number")?.as_f64()
}

fn select(props: &Map<String, Value>, name: &str) -> Option<String> {
    props
        .get(name)?
        .get("select")?
        .get("name")?
        .as_str()
        .map(str::to_string)
}

fn date_start(props: &Map<String, Value>, name: &str) -> Option<NaiveDate> {
    let start = props.get(name)?.get("date")?.get("start")?.as_str()?;
    parse_date(start)
}

/// Notion dates are either `YYYY-MM-DD` or a full RFC 3339 timestamp
fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(value).ok().map(|dt| dt.date_naive()))
}

fn multi_select(props: &Map<String, Value>, name: &str) -> Vec<String> {
    props
        .get(name)
        .and_then(|prop| prop.get("multi_select"))
        .and_then(Value::as_array)
        .map(|options| {
            options
                .iter()
                .filter_map(|option| option.get("name").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Parse `last_edited_time` into Unix ms
pub fn parse_timestamp(value: &str) -> Result<i64, RemoteError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.timestamp_millis())
        .map_err(|error| RemoteError::Permanent(format!("Invalid last_edited_time {value}: {error}")))
}

/// Fields of a page, normalized the way the local store expects
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn page_fields(props: &Map<String, Value>) -> BookFields {
    let title = plain_text(props, PROP_TITLE, "title").unwrap_or_else(|| UNTITLED.to_string());
    let rating = number(props, PROP_RATING)
        .map(f64::round)
        .filter(|value| (1.0..=5.0).contains(value))
        .map(|value| value as u8);
    let page_count = number(props, PROP_PAGE_COUNT)
        .filter(|value| (0.0..=f64::from(u32::MAX)).contains(value) && value.fract() == 0.0)
        .map(|value| value as u32);
    let isbn = |name: &str| {
        plain_text(props, name, "rich_text").and_then(|raw| normalize_isbn(&raw).ok().flatten())
    };

    BookFields {
        title,
        author: plain_text(props, PROP_AUTHOR, "rich_text").unwrap_or_default(),
        status: select(props, PROP_STATUS)
            .map(|name| status_from_notion(&name))
            .unwrap_or_default(),
        rating,
        isbn: isbn(PROP_ISBN),
        isbn13: isbn(PROP_ISBN13),
        page_count,
        progress: plain_text(props, PROP_PROGRESS, "rich_text"),
        date_started: date_start(props, PROP_DATE_STARTED),
        date_finished: date_start(props, PROP_DATE_FINISHED),
        tags: normalize_tags(&multi_select(props, PROP_TAGS)),
    }
}

/// Parse a page object returned by the pages or query endpoints
pub fn parse_page(page: &Value) -> Result<RemoteBook, RemoteError> {
    let remote_id = page
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| RemoteError::Permanent("Page without id".to_string()))?
        .to_string();
    let modified_at = page
        .get("last_edited_time")
        .and_then(Value::as_str)
        .ok_or_else(|| RemoteError::Permanent(format!("Page {remote_id} without last_edited_time")))
        .and_then(parse_timestamp)?;
    let archived = page
        .get("archived")
        .or_else(|| page.get("in_trash"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let empty = Map::new();
    let props = page
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);
    let local_id = plain_text(props, PROP_LOCAL_ID, "rich_text").and_then(|raw| raw.parse::<BookId>().ok());

    Ok(RemoteBook {
        remote_id,
        local_id,
        fields: page_fields(props),
        modified_at,
        archived,
    })
}
