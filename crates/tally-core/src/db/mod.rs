//! `SQLite` persistence for Tally

mod connection;
mod migrations;
mod repository;
mod store;

pub use connection::Database;
pub use repository::Repository;
pub use store::SqliteStore;
