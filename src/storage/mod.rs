//! Storage layer: SQLite persistence and the in-process scratchpad

pub mod db;
pub mod scratchpad;

pub use db::{create_pool, get_connection, DbPool};
