use std::path::Path;

use booktracker_core::db::{Database, LastRun};
use booktracker_core::models::{Book, BookFields, BookId, PendingChange};
use booktracker_core::sync::{NotionClient, NotionConfig, RetryingClient, SyncSummary};
use booktracker_core::{Library, SyncSettings};
use chrono::Utc;
use serde::Serialize;

use crate::auth::resolve_token;
use crate::cli::{BookArgs, ClearableField};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct BookListItem {
    pub id: String,
    pub title: String,
    pub author: String,
    pub status: String,
    pub rating: Option<u8>,
    pub progress: Option<String>,
    pub tags: Vec<String>,
    pub remote_id: Option<String>,
    pub local_modified_at: i64,
    pub relative_time: String,
    pub is_deleted: bool,
}

#[derive(Debug, Serialize)]
pub struct QueueItem {
    pub id: String,
    pub seq: i64,
    pub book_id: String,
    pub operation: String,
    pub title: String,
    pub enqueued_at: i64,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

pub fn open_database(path: &Path) -> Result<Database, CliError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(Database::open(path)?)
}

pub fn normalize_book_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyBookId)
    } else {
        Ok(trimmed.to_string())
    }
}

/// Resolve a full id or unique prefix to a live book
pub fn resolve_book(library: &Library<'_>, id: &str) -> Result<Book, CliError> {
    let normalized = normalize_book_identifier(id)?;
    let book_id: BookId = library.resolve_id(&normalized)?;
    library
        .get_book(&book_id)?
        .filter(|book| !book.is_deleted)
        .ok_or_else(|| booktracker_core::Error::NotFound(normalized).into())
}

pub fn resolve_title(title_parts: &[String]) -> Result<String, CliError> {
    let title = title_parts
        .iter()
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if title.is_empty() {
        Err(CliError::EmptyTitle)
    } else {
        Ok(title)
    }
}

/// Overlay flags on existing fields; `clear` runs after the overlay
pub fn apply_book_args(
    mut fields: BookFields,
    args: BookArgs,
    clear: &[ClearableField],
) -> BookFields {
    if let Some(author) = args.author {
        fields.author = author;
    }
    if let Some(status) = args.status {
        fields.status = status;
    }
    if args.rating.is_some() {
        fields.rating = args.rating;
    }
    if args.isbn.is_some() {
        fields.isbn = args.isbn;
    }
    if args.isbn13.is_some() {
        fields.isbn13 = args.isbn13;
    }
    if args.pages.is_some() {
        fields.page_count = args.pages;
    }
    if args.progress.is_some() {
        fields.progress = args.progress;
    }
    if args.started.is_some() {
        fields.date_started = args.started;
    }
    if args.finished.is_some() {
        fields.date_finished = args.finished;
    }
    if !args.tags.is_empty() {
        fields.tags = args.tags;
    }

    for field in clear {
        match field {
            ClearableField::Rating => fields.rating = None,
            ClearableField::Isbn => fields.isbn = None,
            ClearableField::Isbn13 => fields.isbn13 = None,
            ClearableField::Pages => fields.page_count = None,
            ClearableField::Progress => fields.progress = None,
            ClearableField::Started => fields.date_started = None,
            ClearableField::Finished => fields.date_finished = None,
            ClearableField::Tags => fields.tags.clear(),
        }
    }
    fields
}

pub fn format_book_lines(books: &[Book]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    books
        .iter()
        .map(|book| {
            let id = book.id.to_string();
            let short_id = id.chars().take(13).collect::<String>();
            let label = truncate_label(&book.label(), 48);
            let status = book.fields.status.as_str();
            let relative_time = format_relative_time(book.local_modified_at, now_ms);
            let marker = sync_marker(book);

            format!("{short_id:<13}  {label:<48}  {status:<9}  {relative_time:<8}  {marker}")
                .trim_end()
                .to_string()
        })
        .collect()
}

pub fn book_to_list_item(book: &Book) -> BookListItem {
    let now_ms = Utc::now().timestamp_millis();
    BookListItem {
        id: book.id.to_string(),
        title: book.fields.title.clone(),
        author: book.fields.author.clone(),
        status: book.fields.status.as_str().to_string(),
        rating: book.fields.rating,
        progress: book.fields.progress.clone(),
        tags: book.fields.tags.clone(),
        remote_id: book.remote_id.clone(),
        local_modified_at: book.local_modified_at,
        relative_time: format_relative_time(book.local_modified_at, now_ms),
        is_deleted: book.is_deleted,
    }
}

pub fn queue_to_item(change: &PendingChange) -> QueueItem {
    QueueItem {
        id: change.id.to_string(),
        seq: change.seq,
        book_id: change.book_id.to_string(),
        operation: change.operation.as_str().to_string(),
        title: change.payload.title.clone(),
        enqueued_at: change.enqueued_at,
        retry_count: change.retry_count,
        last_error: change.last_error.clone(),
    }
}

pub fn format_queue_lines(changes: &[PendingChange]) -> Vec<String> {
    changes
        .iter()
        .map(|change| {
            let book_id = change.book_id.to_string();
            let short_id = book_id.chars().take(13).collect::<String>();
            let title = truncate_label(&change.payload.title, 40);
            let line = format!(
                "{:>5}  {:<6}  {short_id:<13}  {title:<40}  {}",
                change.seq,
                change.operation.as_str(),
                format_sync_timestamp(change.enqueued_at)
            );
            match change.last_error.as_deref() {
                Some(error) => format!("{line}  retries={} last_error={error}", change.retry_count),
                None => line,
            }
        })
        .collect()
}

pub fn format_summary_lines(summary: &SyncSummary) -> Vec<String> {
    let mut lines = vec![format!(
        "Sync ({}) finished in phase {}: pushed {}, pulled {}, conflicts {} ({} auto-resolved), pending {}",
        summary.mode,
        summary.phase,
        summary.pushed,
        summary.pulled,
        summary.conflicts_found,
        summary.conflicts_auto_resolved,
        summary.pending
    )];
    if let Some(failure) = summary.failure.as_deref() {
        lines.push(format!("Failure: {failure}"));
    }
    for issue in &summary.errors {
        let target = issue
            .book_id
            .map_or_else(|| "-".to_string(), |id| id.to_string());
        lines.push(format!("  error  {target}  {}", issue.message));
    }
    for book_id in &summary.unresolved {
        lines.push(format!(
            "  conflict  {book_id}  resolve with `booktracker sync resolve {book_id} --winner local|remote`"
        ));
    }
    lines
}

pub fn format_last_run(last_run: Option<&LastRun>) -> String {
    last_run.map_or_else(
        || "Last run: never".to_string(),
        |run| {
            format!(
                "Last run: {} ({}, pushed {}, pulled {}, unresolved {})",
                format_sync_timestamp(run.finished_at),
                run.phase,
                run.pushed,
                run.pulled,
                run.unresolved
            )
        },
    )
}

/// Notion client with retries, built from effective settings and the stored token
pub fn build_remote_client(
    settings: &SyncSettings,
) -> Result<RetryingClient<NotionClient>, CliError> {
    if settings.notion_database_id.is_none() {
        return Err(CliError::SyncNotConfigured);
    }
    let Some((token, source)) = resolve_token()? else {
        return Err(CliError::SyncNotConfigured);
    };
    tracing::debug!("Using Notion token from {}", source.label());

    let config = NotionConfig::from_settings(settings, &token)?;
    let client = NotionClient::new(config)?;
    Ok(RetryingClient::new(client, settings.retry_policy()))
}

fn sync_marker(book: &Book) -> &'static str {
    if book.is_deleted {
        "deleted"
    } else if book.local_modified_at > book.remote_modified_at || !book.is_pushed() {
        "*"
    } else {
        ""
    }
}

fn truncate_label(label: &str, max_chars: usize) -> String {
    if label.chars().count() <= max_chars {
        label.to_string()
    } else {
        let mut truncated = label
            .chars()
            .take(max_chars.saturating_sub(3))
            .collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}
