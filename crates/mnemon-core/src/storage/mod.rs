//! Storage layer
//!
//! Durable, transactional persistence for every engine entity.

pub mod migrations;
mod sqlite;

pub use sqlite::{DeleteOutcome, Result, Storage, StorageError};
