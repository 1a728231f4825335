use std::path::Path;

use booktracker_core::Library;

use crate::commands::common::{open_database, resolve_book};
use crate::error::CliError;

pub fn run_delete(id: &str, db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path)?;
    let library = Library::new(&db);
    let book = resolve_book(&library, id)?;

    let removed = library.remove_book(&book.id)?;
    println!("{}", removed.id);
    Ok(())
}
