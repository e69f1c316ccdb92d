use crate::error::BatchError;

/// Result of a single [`ItemReader::read`] call.
///
/// - `Ok(Some(item))`: one item was read
/// - `Ok(None)`: the source is exhausted
/// - `Err(error)`: the current element could not be read
pub type ItemReaderResult<R> = Result<Option<R>, BatchError>;

/// Result of a single [`ItemProcessor::process`] call.
pub type ItemProcessorResult<W> = Result<W, BatchError>;

/// Result of an [`ItemWriter`] operation.
pub type ItemWriterResult = Result<(), BatchError>;

/// An ordered source of items (one file, one query cursor, a set of files...).
///
/// The step calls `open` once before the first read and `close` once after the
/// last one, whatever the outcome. Readers use interior mutability so that the
/// step only ever needs a shared reference.
///
/// Reading after `close` is not supported.
pub trait ItemReader<R> {
    /// Prepares the underlying resource.
    ///
    /// Fails with [`BatchError::SourceUnavailable`] when the resource cannot be
    /// reached.
    fn open(&self) -> Result<(), BatchError> {
        Ok(())
    }

    /// Reads the next item.
    fn read(&self) -> ItemReaderResult<R>;

    /// Releases the underlying handles. Calling it twice is harmless.
    fn close(&self) -> Result<(), BatchError> {
        Ok(())
    }
}

/// Business transformation applied to every item of a chunk.
///
/// Implementations return a new value and never mutate their input. A
/// rejected item should be reported as [`BatchError::TransformError`] tagged
/// with the identity of the item.
pub trait ItemProcessor<R, W> {
    fn process(&self, item: &R) -> ItemProcessorResult<W>;
}

/// Destination of a step, written one whole chunk at a time.
///
/// A `write` call receives every item of one chunk and must behave as one
/// transactional unit: either all items land or none do.
pub trait ItemWriter<W> {
    fn write(&self, items: &[W]) -> ItemWriterResult;

    fn flush(&self) -> ItemWriterResult {
        Ok(())
    }

    fn open(&self) -> ItemWriterResult {
        Ok(())
    }

    fn close(&self) -> ItemWriterResult {
        Ok(())
    }
}

/// Processor returning a copy of its input.
#[derive(Default)]
pub struct PassThroughProcessor;

impl<R: Clone> ItemProcessor<R, R> for PassThroughProcessor {
    fn process(&self, item: &R) -> ItemProcessorResult<R> {
        Ok(item.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_through_processor_returns_an_equal_item() {
        let processor = PassThroughProcessor;
        let item = String::from("unchanged");

        let processed: String = processor.process(&item).unwrap();

        assert_eq!(processed, item);
    }
}
