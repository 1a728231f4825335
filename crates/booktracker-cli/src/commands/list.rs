use std::path::Path;

use booktracker_core::db::{BookRepository, SqliteBookRepository};
use booktracker_core::models::{Book, ReadingStatus};

use crate::commands::common::{book_to_list_item, format_book_lines, open_database, BookListItem};
use crate::error::CliError;

pub fn list_books(
    status: Option<ReadingStatus>,
    include_deleted: bool,
    db_path: &Path,
) -> Result<Vec<Book>, CliError> {
    let db = open_database(db_path)?;
    let books = SqliteBookRepository::new(db.connection()).list(include_deleted)?;
    Ok(books
        .into_iter()
        .filter(|book| status.is_none_or(|status| book.fields.status == status))
        .collect())
}

pub fn run_list(
    status: Option<ReadingStatus>,
    include_deleted: bool,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let books = list_books(status, include_deleted, db_path)?;

    if as_json {
        let json_items = books
            .iter()
            .map(book_to_list_item)
            .collect::<Vec<BookListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else if books.is_empty() {
        println!("No books yet. Add one with `booktracker add <title>`.");
    } else {
        for line in format_book_lines(&books) {
            println!("{line}");
        }
    }

    Ok(())
}
