use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    marker::PhantomData,
};

use log::debug;
use sqlx::{Pool, QueryBuilder, Sqlite};
use tokio::runtime::Handle;

use crate::{
    core::item::{ItemReader, ItemReaderResult},
    error::BatchError,
    item::rdbc::{RowMapper, block_on, runtime_handle},
};

/// Reads the rows of a query page by page.
///
/// Each page appends `LIMIT page_size OFFSET n` to the query, which should
/// therefore have a stable `ORDER BY`. A page shorter than `page_size` ends the
/// read.
pub struct SqliteItemReader<T, M> {
    pool: Pool<Sqlite>,
    handle: Handle,
    query: String,
    page_size: usize,
    row_mapper: M,
    offset: Cell<usize>,
    exhausted: Cell<bool>,
    buffer: RefCell<VecDeque<T>>,
    _item: PhantomData<T>,
}

impl<T, M: RowMapper<T, Sqlite>> SqliteItemReader<T, M> {
    fn read_page(&self) -> Result<(), BatchError> {
        let mut query_builder = QueryBuilder::<Sqlite>::new(&self.query);
        query_builder.push(format!(
            " LIMIT {} OFFSET {}",
            self.page_size,
            self.offset.get()
        ));

        let rows = block_on(&self.handle, async {
            query_builder.build().fetch_all(&self.pool).await
        })
        .map_err(|error| BatchError::SourceUnavailable(format!("query failed: {}", error)))?;

        debug!(
            "Fetched {} rows at offset {}",
            rows.len(),
            self.offset.get()
        );

        let mut buffer = self.buffer.borrow_mut();
        for (index, row) in rows.iter().enumerate() {
            let item = self
                .row_mapper
                .map_row(row)
                .map_err(|error| BatchError::MalformedRecord {
                    resource: self.query.clone(),
                    line: (self.offset.get() + index + 1) as u64,
                    raw: String::new(),
                    reason: error.to_string(),
                })?;
            buffer.push_back(item);
        }

        self.exhausted.set(rows.len() < self.page_size);
        self.offset.set(self.offset.get() + rows.len());
        Ok(())
    }
}

impl<T, M: RowMapper<T, Sqlite>> ItemReader<T> for SqliteItemReader<T, M> {
    /// Checks the database is reachable and rewinds to the first row.
    fn open(&self) -> Result<(), BatchError> {
        // The connection goes back to the pool inside the runtime.
        block_on(&self.handle, async { self.pool.acquire().await.map(drop) })
            .map_err(|error| BatchError::SourceUnavailable(error.to_string()))?;

        self.offset.set(0);
        self.exhausted.set(false);
        self.buffer.borrow_mut().clear();
        Ok(())
    }

    fn read(&self) -> ItemReaderResult<T> {
        if self.buffer.borrow().is_empty() {
            if self.exhausted.get() {
                return Ok(None);
            }
            self.read_page()?;
        }

        Ok(self.buffer.borrow_mut().pop_front())
    }

    fn close(&self) -> Result<(), BatchError> {
        self.buffer.borrow_mut().clear();
        self.exhausted.set(true);
        Ok(())
    }
}

#[derive(Default)]
pub struct SqliteItemReaderBuilder {
    pool: Option<Pool<Sqlite>>,
    handle: Option<Handle>,
    query: Option<String>,
    page_size: Option<usize>,
}

impl SqliteItemReaderBuilder {
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

    pub fn query(mut self, query: &str) -> Self {
        self.query = Some(query.to_string());
        self
    }

    /// Rows fetched per query, 10 by default.
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn build<T, M: RowMapper<T, Sqlite>>(
        self,
        row_mapper: M,
    ) -> Result<SqliteItemReader<T, M>, BatchError> {
        let pool = self
            .pool
            .ok_or_else(|| BatchError::Configuration("sqlite reader has no pool".to_string()))?;
        let query = self
            .query
            .ok_or_else(|| BatchError::Configuration("sqlite reader has no query".to_string()))?;
        let page_size = self.page_size.unwrap_or(10);
        if page_size == 0 {
            return Err(BatchError::Configuration(
                "sqlite reader page size must be greater than 0".to_string(),
            ));
        }

        Ok(SqliteItemReader {
            pool,
            handle: runtime_handle(self.handle)?,
            query,
            page_size,
            row_mapper,
            offset: Cell::new(0),
            exhausted: Cell::new(false),
            buffer: RefCell::new(VecDeque::with_capacity(page_size)),
            _item: PhantomData,
        })
    }
}
