//! Relational database readers and writers built on `sqlx`.
//!
//! Readers and writers expose the synchronous item traits. Each database call
//! is driven to completion on a tokio runtime whose [`Handle`] is captured
//! when the component is built, so steps may run on threads that are not part
//! of the runtime.

use std::future::Future;

use sqlx::{Database, query_builder::Separated};
use tokio::runtime::Handle;

use crate::error::BatchError;

pub mod sqlite_reader;

pub mod sqlite_writer;

/// Binds the column values of one item to an `INSERT` statement.
///
/// Values must be pushed in the order of the writer's columns.
pub trait DatabaseItemBinder<O, DB: Database> {
    fn bind(&self, item: &O, query_builder: Separated<DB, &str>);
}

/// Builds an item from one row of a query result.
pub trait RowMapper<T, DB: Database> {
    fn map_row(&self, row: &DB::Row) -> Result<T, sqlx::Error>;
}

/// Handle given to the builder, or the one of the runtime the builder runs in.
fn runtime_handle(handle: Option<Handle>) -> Result<Handle, BatchError> {
    match handle {
        Some(handle) => Ok(handle),
        None => Handle::try_current().map_err(|error| {
            BatchError::Configuration(format!("no tokio runtime available: {}", error))
        }),
    }
}

/// Runs `future` to completion from synchronous code.
fn block_on<F: Future>(handle: &Handle, future: F) -> F::Output {
    tokio::task::block_in_place(|| handle.block_on(future))
}

pub use sqlite_reader::{SqliteItemReader, SqliteItemReaderBuilder};
pub use sqlite_writer::{SqliteItemWriter, SqliteItemWriterBuilder};
