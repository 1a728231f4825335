//! Application services built on the store

mod library;

pub use library::Library;
