use std::marker::PhantomData;

use log::{debug, error};
use sqlx::{Pool, QueryBuilder, Sqlite};
use tokio::runtime::Handle;

use crate::core::item::{ItemWriter, ItemWriterResult};
use crate::error::BatchError;
use crate::item::rdbc::{DatabaseItemBinder, block_on, runtime_handle};

// Default SQLITE_MAX_VARIABLE_NUMBER since SQLite 3.32
const BIND_LIMIT: usize = 32766;

/// Inserts every chunk into one table, inside one transaction per chunk.
///
/// A chunk larger than the bind limit is split into several statements that
/// still share the chunk's transaction.
pub struct SqliteItemWriter<O, B> {
    pool: Pool<Sqlite>,
    handle: Handle,
    table: String,
    columns: Vec<String>,
    item_binder: B,
    _item: PhantomData<fn(&O)>,
}

impl<O, B> SqliteItemWriter<O, B> {
    pub fn table(&self) -> &str {
        &self.table
    }
}

impl<O, B: DatabaseItemBinder<O, Sqlite>> SqliteItemWriter<O, B> {
    async fn insert(&self, items: &[O]) -> Result<(), sqlx::Error> {
        let mut transaction = self.pool.begin().await?;

        for batch in items.chunks(BIND_LIMIT / self.columns.len()) {
            let mut query_builder = QueryBuilder::new("INSERT INTO ");
            query_builder.push(&self.table);
            query_builder.push(" (");
            query_builder.push(self.columns.join(","));
            query_builder.push(") ");

            query_builder.push_values(batch, |b, item| {
                self.item_binder.bind(item, b);
            });

            query_builder.build().execute(&mut *transaction).await?;
        }

        transaction.commit().await
    }
}

impl<O, B: DatabaseItemBinder<O, Sqlite>> ItemWriter<O> for SqliteItemWriter<O, B> {
    fn write(&self, items: &[O]) -> ItemWriterResult {
        if items.is_empty() {
            return Ok(());
        }

        match block_on(&self.handle, self.insert(items)) {
            Ok(()) => {
                debug!(
                    "Successfully wrote {} items to SQLite table {}",
                    items.len(),
                    self.table
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    "Failed to write items to SQLite table {}: {}",
                    self.table, e
                );
                Err(BatchError::SinkFailure(format!("SQLite write failed: {}", e)))
            }
        }
    }
}

#[derive(Default)]
pub struct SqliteItemWriterBuilder {
    pool: Option<Pool<Sqlite>>,
    handle: Option<Handle>,
    table: Option<String>,
    columns: Vec<String>,
}

impl SqliteItemWriterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pool(mut self, pool: Pool<Sqlite>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Runtime driving the queries. Defaults to the current runtime.
    pub fn handle(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    pub fn table(mut self, table: &str) -> Self {
        self.table = Some(table.to_string());
        self
    }

    pub fn add_column(mut self, column: &str) -> Self {
        self.columns.push(column.to_string());
        self
    }

    pub fn build<O, B: DatabaseItemBinder<O, Sqlite>>(
        self,
        item_binder: B,
    ) -> Result<SqliteItemWriter<O, B>, BatchError> {
        let pool = self
            .pool
            .ok_or_else(|| BatchError::Configuration("sqlite writer has no pool".to_string()))?;
        let table = self
            .table
            .ok_or_else(|| BatchError::Configuration("sqlite writer has no table".to_string()))?;
        if self.columns.is_empty() {
            return Err(BatchError::Configuration(format!(
                "sqlite writer for {} has no columns",
                table
            )));
        }

        Ok(SqliteItemWriter {
            pool,
            handle: runtime_handle(self.handle)?,
            table,
            columns: self.columns,
            item_binder,
            _item: PhantomData,
        })
    }
}
