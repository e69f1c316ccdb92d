use crate::error::BatchError;

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum ChunkStatus {
    /// More items can be added.
    Continuable,
    /// The chunk reached its capacity.
    Full,
    /// The reader is exhausted; the chunk may still hold a partial tail.
    Finished,
}

/// An ordered, bounded group of items committed as one unit.
///
/// A chunk is filled by sequential reads until it is full or the reader is
/// exhausted, then consumed exactly once with [`Chunk::into_items`].
#[derive(Debug)]
pub struct Chunk<R> {
    items: Vec<R>,
    status: ChunkStatus,
    capacity: usize,
}

impl<R> Chunk<R> {
    pub fn new(capacity: usize) -> Chunk<R> {
        Chunk {
            items: Vec::with_capacity(capacity),
            status: ChunkStatus::Continuable,
            capacity,
        }
    }

    /// Adds the outcome of one read to the chunk.
    ///
    /// A read error is returned as is: the chunk it belongs to must be
    /// discarded by the caller.
    pub fn add_item(&mut self, read_item: Result<Option<R>, BatchError>) -> Result<(), BatchError> {
        match read_item? {
            Some(item) => {
                self.items.push(item);
                self.status = if self.items.len() >= self.capacity {
                    ChunkStatus::Full
                } else {
                    ChunkStatus::Continuable
                };
            }
            None => self.status = ChunkStatus::Finished,
        }
        Ok(())
    }

    pub fn get_items(&self) -> &[R] {
        &self.items
    }

    pub fn get_status(&self) -> ChunkStatus {
        self.status
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether the reader reported exhaustion while filling this chunk.
    pub fn is_last(&self) -> bool {
        self.status == ChunkStatus::Finished
    }

    pub fn into_items(self) -> Vec<R> {
        self.items
    }
}
