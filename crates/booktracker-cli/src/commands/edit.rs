use std::path::Path;

use booktracker_core::Library;

use crate::cli::{BookArgs, ClearableField};
use crate::commands::common::{apply_book_args, open_database, resolve_book};
use crate::error::CliError;

pub fn run_edit(
    id: &str,
    title: Option<String>,
    args: BookArgs,
    clear: &[ClearableField],
    db_path: &Path,
) -> Result<(), CliError> {
    let db = open_database(db_path)?;
    let library = Library::new(&db);
    let book = resolve_book(&library, id)?;

    let mut fields = apply_book_args(book.fields.clone(), args, clear);
    if let Some(title) = title {
        fields.title = title;
    }
    let fields = fields.normalized()?;

    if fields == book.fields {
        println!("{}", book.id);
        return Ok(());
    }

    let updated = library.update_book(&book.id, fields)?;
    println!("{}", updated.id);
    Ok(())
}
