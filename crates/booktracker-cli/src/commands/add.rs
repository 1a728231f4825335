use std::path::Path;

use booktracker_core::{BookFields, Library};

use crate::cli::BookArgs;
use crate::commands::common::{apply_book_args, open_database, resolve_title};
use crate::error::CliError;

pub fn run_add(title_parts: &[String], args: BookArgs, db_path: &Path) -> Result<(), CliError> {
    let title = resolve_title(title_parts)?;
    let fields = apply_book_args(BookFields::new(title, "")?, args, &[]);

    let db = open_database(db_path)?;
    let book = Library::new(&db).add_book(fields)?;

    println!("{}", book.id);
    Ok(())
}
