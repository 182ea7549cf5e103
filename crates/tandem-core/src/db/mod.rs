//! `SQLite` journal for Tandem

mod connection;
mod migrations;
mod repository;

pub use connection::Database;
pub use repository::{
    ChangeRepository, ConflictRepository, SeenChangeRepository, SqliteChangeRepository,
    SqliteConflictRepository, SqliteSeenChangeRepository,
};
