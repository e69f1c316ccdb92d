use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::{Duration, Instant},
};

use log::{debug, info, warn};
use uuid::Uuid;

use crate::error::BatchError;

use super::{
    build_name,
    chunk::{Chunk, ChunkStatus},
    item::{ItemProcessor, ItemReader, ItemWriter},
    worker_pool::WorkerPool,
};

/// Status shared by steps and jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    /// Created but not yet consuming its source.
    NotStarted,
    /// Consuming its source.
    Running,
    /// Finished without any unresolved failure.
    Completed,
    /// Stopped on the first unrecoverable failure.
    Failed,
}

/// Run-time state of one step.
///
/// Only the step executing it mutates a `StepExecution`; once the status is
/// terminal the value no longer changes.
#[derive(Debug, Clone)]
pub struct StepExecution {
    /// Unique identifier for this step execution
    pub id: Uuid,
    /// Human-readable name for the step
    pub name: String,
    /// Current status of the step execution
    pub status: BatchStatus,
    /// Set when the step reaches `Running`
    pub start_time: Option<Instant>,
    pub end_time: Option<Instant>,
    pub duration: Option<Duration>,
    /// Number of items successfully read
    pub read_count: usize,
    /// Number of errors encountered during reading
    pub read_error_count: usize,
    /// Number of items transformed by the processor
    pub process_count: usize,
    /// Number of items successfully written
    pub write_count: usize,
    /// Number of committed chunks, i.e. successful writer calls
    pub chunk_count: usize,
    /// Number of discarded chunks
    pub failed_chunk_count: usize,
    /// Error that made the step fail
    pub last_error: Option<BatchError>,
}

impl StepExecution {
    pub fn new(name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            status: BatchStatus::NotStarted,
            start_time: None,
            end_time: None,
            duration: None,
            read_count: 0,
            read_error_count: 0,
            process_count: 0,
            write_count: 0,
            chunk_count: 0,
            failed_chunk_count: 0,
            last_error: None,
        }
    }

    fn start(&mut self) {
        self.status = BatchStatus::Running;
        self.start_time = Some(Instant::now());
    }

    fn finish(&mut self, result: &Result<(), BatchError>) {
        let end_time = Instant::now();
        self.end_time = Some(end_time);
        self.duration = self.start_time.map(|start| end_time.duration_since(start));

        match result {
            Ok(()) => self.status = BatchStatus::Completed,
            Err(error) => {
                self.status = BatchStatus::Failed;
                self.last_error = Some(error.clone());
            }
        }
    }
}

/// A runnable unit of a job.
pub trait Step {
    /// Executes the step, recording its progress in `step_execution`.
    ///
    /// # Returns
    /// - `Ok(())`: the step completed
    /// - `Err(BatchError::Step)`: the step failed, the cause is kept in
    ///   `step_execution.last_error`
    fn execute(&self, step_execution: &mut StepExecution) -> Result<(), BatchError>;

    fn get_name(&self) -> &str;
}

/// How the chunks of a step are transformed and written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskExecutor {
    /// Every chunk on the calling thread, one after the other.
    #[default]
    Sequential,
    /// `pool_size` workers fed through a queue of `queue_capacity` chunks.
    ThreadPool {
        pool_size: usize,
        queue_capacity: usize,
    },
    /// At most `concurrency_limit` chunks in flight, each handed directly to
    /// a free worker.
    SimpleAsync { concurrency_limit: usize },
}

impl TaskExecutor {
    fn worker_pool(&self) -> Option<WorkerPool> {
        match *self {
            TaskExecutor::Sequential => None,
            TaskExecutor::ThreadPool {
                pool_size,
                queue_capacity,
            } => Some(WorkerPool::new(pool_size, queue_capacity)),
            TaskExecutor::SimpleAsync { concurrency_limit } => {
                Some(WorkerPool::new(concurrency_limit, 0))
            }
        }
    }
}

/// Transforms every item of a chunk then hands the result to the writer in
/// one call. Nothing is written if any item fails.
///
/// `process_count` is increased once the whole chunk was transformed.
fn process_and_write<I, O>(
    processor: &dyn ItemProcessor<I, O>,
    writer: &dyn ItemWriter<O>,
    chunk: Chunk<I>,
    process_count: &AtomicUsize,
) -> Result<usize, BatchError> {
    let items = chunk.into_items();
    debug!("Processing chunk of {} items", items.len());

    let processed = items
        .iter()
        .map(|item| processor.process(item))
        .collect::<Result<Vec<O>, BatchError>>()
        .inspect_err(|error| warn!("Error processing item, chunk discarded: {}", error))?;
    process_count.fetch_add(processed.len(), Ordering::Relaxed);

    debug!("Writing chunk of {} items", processed.len());
    writer
        .write(&processed)
        .and_then(|()| writer.flush())
        .inspect_err(|error| warn!("Error writing chunk: {}", error))?;

    Ok(processed.len())
}

/// A step reading, processing and writing items chunk by chunk.
pub struct ChunkOrientedStep<'a, I, O> {
    name: String,
    /// Component responsible for reading items from the source
    reader: &'a dyn ItemReader<I>,
    /// Component responsible for processing items
    processor: &'a (dyn ItemProcessor<I, O> + Sync),
    /// Component responsible for writing items to the destination
    writer: &'a (dyn ItemWriter<O> + Sync),
    /// Number of items committed together
    chunk_size: usize,
    task_executor: TaskExecutor,
}

impl<I: Send, O> Step for ChunkOrientedStep<'_, I, O> {
    fn execute(&self, step_execution: &mut StepExecution) -> Result<(), BatchError> {
        info!(
            "Start of step: {}, id: {}",
            step_execution.name, step_execution.id
        );

        let result = self.open().and_then(|()| {
            step_execution.start();
            match self.task_executor.worker_pool() {
                None => self.run_sequential(step_execution),
                Some(pool) => self.run_pooled(pool, step_execution),
            }
        });

        Self::manage_error(self.reader.close());
        Self::manage_error(self.writer.close());

        step_execution.finish(&result);

        info!(
            "End of step: {}, id: {}, status: {:?}, read: {}, processed: {}, written: {}",
            step_execution.name,
            step_execution.id,
            step_execution.status,
            step_execution.read_count,
            step_execution.process_count,
            step_execution.write_count
        );

        result.map_err(|error| {
            warn!("Step {} failed: {}", self.name, error);
            BatchError::Step(self.name.clone())
        })
    }

    fn get_name(&self) -> &str {
        &self.name
    }
}

impl<I: Send, O> ChunkOrientedStep<'_, I, O> {
    fn open(&self) -> Result<(), BatchError> {
        self.reader.open()?;
        self.writer.open()
    }

    /// Reads up to `chunk_size` items.
    ///
    /// A read error discards the chunk being filled.
    fn read_chunk(&self, step_execution: &mut StepExecution) -> Result<Chunk<I>, BatchError> {
        let mut chunk = Chunk::new(self.chunk_size);

        while chunk.get_status() == ChunkStatus::Continuable {
            let read_result = self.reader.read();
            match &read_result {
                Ok(Some(_)) => step_execution.read_count += 1,
                Ok(None) => {}
                Err(error) => {
                    warn!("Error reading item: {}", error);
                    step_execution.read_error_count += 1;
                }
            }
            chunk.add_item(read_result)?;
        }

        debug!(
            "Read chunk of {} items, status: {:?}",
            chunk.len(),
            chunk.get_status()
        );
        Ok(chunk)
    }

    fn run_sequential(&self, step_execution: &mut StepExecution) -> Result<(), BatchError> {
        let process_count = AtomicUsize::new(0);

        loop {
            let outcome = self.read_chunk(step_execution).and_then(|chunk| {
                let is_last = chunk.is_last();
                if chunk.is_empty() {
                    return Ok(is_last);
                }
                let written =
                    process_and_write(self.processor, self.writer, chunk, &process_count)?;
                step_execution.chunk_count += 1;
                step_execution.write_count += written;
                Ok(is_last)
            });
            step_execution.process_count = process_count.load(Ordering::Relaxed);

            match outcome {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(error) => {
                    step_execution.failed_chunk_count += 1;
                    return Err(error);
                }
            }
        }
    }

    fn run_pooled(
        &self,
        pool: WorkerPool,
        step_execution: &mut StepExecution,
    ) -> Result<(), BatchError> {
        debug!(
            "Running step {} on {} workers, queue capacity {}",
            self.name,
            pool.workers(),
            pool.queue_capacity()
        );

        let processor = self.processor;
        let writer = self.writer;
        let process_count = AtomicUsize::new(0);
        let mut exhausted = false;

        let report = pool.run(
            || {
                if exhausted {
                    return Ok(None);
                }
                let chunk = self.read_chunk(step_execution)?;
                exhausted = chunk.is_last();
                Ok((!chunk.is_empty()).then_some(chunk))
            },
            |chunk| process_and_write(processor, writer, chunk, &process_count),
        );

        step_execution.process_count += process_count.into_inner();
        step_execution.write_count += report.written;
        step_execution.chunk_count += report.succeeded;
        step_execution.failed_chunk_count += report.failed;

        match report.first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Logs errors of operations which must not change the step outcome.
    fn manage_error(result: Result<(), BatchError>) {
        if let Err(error) = result {
            warn!("Non-fatal error: {}", error);
        }
    }
}

pub struct ChunkOrientedStepBuilder<'a, I, O> {
    name: String,
    reader: Option<&'a dyn ItemReader<I>>,
    processor: Option<&'a (dyn ItemProcessor<I, O> + Sync)>,
    writer: Option<&'a (dyn ItemWriter<O> + Sync)>,
    chunk_size: usize,
    task_executor: TaskExecutor,
}

impl<'a, I, O> ChunkOrientedStepBuilder<'a, I, O> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            reader: None,
            processor: None,
            writer: None,
            chunk_size: 10,
            task_executor: TaskExecutor::Sequential,
        }
    }

    pub fn reader(mut self, reader: &'a dyn ItemReader<I>) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn processor(mut self, processor: &'a (dyn ItemProcessor<I, O> + Sync)) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn writer(mut self, writer: &'a (dyn ItemWriter<O> + Sync)) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn task_executor(mut self, task_executor: TaskExecutor) -> Self {
        self.task_executor = task_executor;
        self
    }

    pub fn build(self) -> Result<ChunkOrientedStep<'a, I, O>, BatchError> {
        let missing = |component: &str| {
            BatchError::Configuration(format!("step {} has no {}", self.name, component))
        };

        if self.chunk_size == 0 {
            return Err(BatchError::Configuration(format!(
                "step {} has a chunk size of 0",
                self.name
            )));
        }

        Ok(ChunkOrientedStep {
            reader: self.reader.ok_or_else(|| missing("reader"))?,
            processor: self.processor.ok_or_else(|| missing("processor"))?,
            writer: self.writer.ok_or_else(|| missing("writer"))?,
            chunk_size: self.chunk_size,
            task_executor: self.task_executor,
            name: self.name,
        })
    }
}

/// Entry point for building steps.
///
/// ```
/// use person_batch::core::item::{ItemReader, ItemReaderResult, ItemWriter, ItemWriterResult, PassThroughProcessor};
/// use person_batch::core::step::{BatchStatus, Step, StepBuilder, StepExecution};
/// use std::cell::Cell;
///
/// struct Countdown(Cell<u32>);
///
/// impl ItemReader<u32> for Countdown {
///     fn read(&self) -> ItemReaderResult<u32> {
///         let left = self.0.get();
///         self.0.set(left.saturating_sub(1));
///         Ok((left > 0).then_some(left))
///     }
/// }
///
/// struct Discard;
///
/// impl ItemWriter<u32> for Discard {
///     fn write(&self, _items: &[u32]) -> ItemWriterResult {
///         Ok(())
///     }
/// }
///
/// let reader = Countdown(Cell::new(25));
/// let step = StepBuilder::new("countdown")
///     .chunk::<u32, u32>(10)
///     .reader(&reader)
///     .processor(&PassThroughProcessor)
///     .writer(&Discard)
///     .build()
///     .unwrap();
///
/// let mut execution = StepExecution::new(step.get_name());
/// step.execute(&mut execution).unwrap();
///
/// assert_eq!(execution.status, BatchStatus::Completed);
/// assert_eq!(execution.chunk_count, 3);
/// ```
pub struct StepBuilder {
    name: String,
}

impl StepBuilder {
    /// Creates a builder; an empty name is replaced by a generated one.
    pub fn new(name: &str) -> Self {
        let name = if name.is_empty() {
            build_name()
        } else {
            name.to_string()
        };
        Self { name }
    }

    pub fn chunk<'a, I, O>(self, chunk_size: usize) -> ChunkOrientedStepBuilder<'a, I, O> {
        ChunkOrientedStepBuilder::new(&self.name).chunk_size(chunk_size)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        cell::{Cell, RefCell},
        sync::Mutex,
    };

    use super::*;
    use crate::core::item::{ItemProcessorResult, ItemReaderResult, ItemWriterResult};

    struct VecReader {
        items: RefCell<Vec<Result<u32, BatchError>>>,
        opened: Cell<bool>,
        closed: Cell<usize>,
    }

    impl VecReader {
        fn new(items: Vec<Result<u32, BatchError>>) -> Self {
            let mut items = items;
            items.reverse();
            Self {
                items: RefCell::new(items),
                opened: Cell::new(false),
                closed: Cell::new(0),
            }
        }

        fn of(count: u32) -> Self {
            Self::new((1..=count).map(Ok).collect())
        }
    }

    impl ItemReader<u32> for VecReader {
        fn open(&self) -> Result<(), BatchError> {
            self.opened.set(true);
            Ok(())
        }

        fn read(&self) -> ItemReaderResult<u32> {
            self.items.borrow_mut().pop().transpose()
        }

        fn close(&self) -> Result<(), BatchError> {
            self.closed.set(self.closed.get() + 1);
            Ok(())
        }
    }

    struct FailingOpenReader;

    impl ItemReader<u32> for FailingOpenReader {
        fn open(&self) -> Result<(), BatchError> {
            Err(BatchError::NoResourcesMatched("input/*.csv".to_string()))
        }

        fn read(&self) -> ItemReaderResult<u32> {
            panic!("read must not be called when open fails")
        }
    }

    /// Rejects odd items above the given threshold.
    struct RejectAbove(u32);

    impl ItemProcessor<u32, u32> for RejectAbove {
        fn process(&self, item: &u32) -> ItemProcessorResult<u32> {
            if *item > self.0 {
                Err(BatchError::TransformError {
                    record: item.to_string(),
                    reason: "too large".to_string(),
                })
            } else {
                Ok(item * 10)
            }
        }
    }

    #[derive(Default)]
    struct RecordingWriter {
        calls: Mutex<Vec<Vec<u32>>>,
        fail_on_call: Option<usize>,
    }

    impl RecordingWriter {
        fn calls(&self) -> Vec<Vec<u32>> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ItemWriter<u32> for RecordingWriter {
        fn write(&self, items: &[u32]) -> ItemWriterResult {
            let mut calls = self.calls.lock().unwrap();
            if self.fail_on_call == Some(calls.len()) {
                return Err(BatchError::SinkFailure("constraint violation".to_string()));
            }
            calls.push(items.to_vec());
            Ok(())
        }
    }

    fn run(step: &ChunkOrientedStep<u32, u32>) -> (Result<(), BatchError>, StepExecution) {
        let mut execution = StepExecution::new(step.get_name());
        let result = step.execute(&mut execution);
        (result, execution)
    }

    #[test]
    fn tail_chunk_is_written() {
        let reader = VecReader::of(25);
        let processor = RejectAbove(u32::MAX);
        let writer = RecordingWriter::default();

        let step = StepBuilder::new("tail")
            .chunk(10)
            .reader(&reader)
            .processor(&processor)
            .writer(&writer)
            .build()
            .unwrap();

        let (result, execution) = run(&step);

        assert!(result.is_ok());
        assert_eq!(execution.status, BatchStatus::Completed);
        assert_eq!(execution.read_count, 25);
        assert_eq!(execution.process_count, 25);
        assert_eq!(execution.write_count, 25);
        assert_eq!(execution.chunk_count, 3);
        let sizes: Vec<usize> = writer.calls().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![10, 10, 5]);
        assert!(reader.opened.get());
        assert_eq!(reader.closed.get(), 1);
    }

    #[test]
    fn exact_multiple_does_not_write_an_empty_chunk() {
        let reader = VecReader::of(20);
        let processor = RejectAbove(u32::MAX);
        let writer = RecordingWriter::default();

        let step = StepBuilder::new("exact")
            .chunk(10)
            .reader(&reader)
            .processor(&processor)
            .writer(&writer)
            .build()
            .unwrap();

        let (_, execution) = run(&step);

        assert_eq!(execution.chunk_count, 2);
        assert_eq!(writer.calls().len(), 2);
    }

    #[test]
    fn empty_source_completes_without_writing() {
        let reader = VecReader::of(0);
        let processor = RejectAbove(u32::MAX);
        let writer = RecordingWriter::default();

        let step = StepBuilder::new("empty")
            .chunk(10)
            .reader(&reader)
            .processor(&processor)
            .writer(&writer)
            .build()
            .unwrap();

        let (result, execution) = run(&step);

        assert!(result.is_ok());
        assert_eq!(execution.status, BatchStatus::Completed);
        assert!(writer.calls().is_empty());
    }

    #[test]
    fn transform_error_discards_its_whole_chunk() {
        let reader = VecReader::of(25);
        // Item 14 fails: the second chunk (11..=20) must not be written.
        let processor = RejectAbove(13);
        let writer = RecordingWriter::default();

        let step = StepBuilder::new("atomic")
            .chunk(10)
            .reader(&reader)
            .processor(&processor)
            .writer(&writer)
            .build()
            .unwrap();

        let (result, execution) = run(&step);

        assert_eq!(result, Err(BatchError::Step("atomic".to_string())));
        assert_eq!(execution.status, BatchStatus::Failed);
        assert_eq!(writer.calls(), vec![(1..=10).map(|i| i * 10).collect::<Vec<_>>()]);
        assert_eq!(execution.write_count, 10);
        assert_eq!(execution.process_count, 10);
        assert_eq!(execution.failed_chunk_count, 1);
        assert!(matches!(
            execution.last_error,
            Some(BatchError::TransformError { ref record, .. }) if record == "14"
        ));
        // Processing stopped at the failing chunk.
        assert_eq!(execution.read_count, 20);
    }

    #[test]
    fn read_error_fails_the_step() {
        let reader = VecReader::new(vec![
            Ok(1),
            Ok(2),
            Err(BatchError::MalformedRecord {
                resource: "persons_1.csv".to_string(),
                line: 3,
                raw: "a,b".to_string(),
                reason: "expected 4 fields, found 2".to_string(),
            }),
            Ok(4),
        ]);
        let processor = RejectAbove(u32::MAX);
        let writer = RecordingWriter::default();

        let step = StepBuilder::new("malformed")
            .chunk(10)
            .reader(&reader)
            .processor(&processor)
            .writer(&writer)
            .build()
            .unwrap();

        let (result, execution) = run(&step);

        assert!(result.is_err());
        assert!(writer.calls().is_empty());
        assert_eq!(execution.read_count, 2);
        assert_eq!(execution.read_error_count, 1);
        assert!(matches!(
            execution.last_error,
            Some(BatchError::MalformedRecord { line: 3, .. })
        ));
    }

    #[test]
    fn writer_failure_fails_the_step() {
        let reader = VecReader::of(30);
        let processor = RejectAbove(u32::MAX);
        let writer = RecordingWriter {
            fail_on_call: Some(1),
            ..Default::default()
        };

        let step = StepBuilder::new("sink")
            .chunk(10)
            .reader(&reader)
            .processor(&processor)
            .writer(&writer)
            .build()
            .unwrap();

        let (result, execution) = run(&step);

        assert!(result.is_err());
        assert_eq!(writer.calls().len(), 1);
        assert_eq!(execution.chunk_count, 1);
        assert!(matches!(
            execution.last_error,
            Some(BatchError::SinkFailure(_))
        ));
    }

    #[test]
    fn open_failure_never_reaches_running() {
        let reader = FailingOpenReader;
        let processor = RejectAbove(u32::MAX);
        let writer = RecordingWriter::default();

        let step = StepBuilder::new("nothing")
            .chunk(10)
            .reader(&reader)
            .processor(&processor)
            .writer(&writer)
            .build()
            .unwrap();

        let (result, execution) = run(&step);

        assert!(result.is_err());
        assert_eq!(execution.status, BatchStatus::Failed);
        assert!(execution.start_time.is_none());
        assert_eq!(execution.read_count, 0);
        assert!(matches!(
            execution.last_error,
            Some(BatchError::NoResourcesMatched(_))
        ));
    }

    #[test]
    fn thread_pool_writes_every_chunk() {
        let reader = VecReader::of(95);
        let processor = RejectAbove(u32::MAX);
        let writer = RecordingWriter::default();

        let step = StepBuilder::new("pooled")
            .chunk(10)
            .reader(&reader)
            .processor(&processor)
            .writer(&writer)
            .task_executor(TaskExecutor::ThreadPool {
                pool_size: 4,
                queue_capacity: 2,
            })
            .build()
            .unwrap();

        let (result, execution) = run(&step);

        assert!(result.is_ok());
        assert_eq!(execution.write_count, 95);
        assert_eq!(execution.chunk_count, 10);
        let mut written: Vec<u32> = writer.calls().into_iter().flatten().collect();
        written.sort_unstable();
        assert_eq!(written, (1..=95).map(|i| i * 10).collect::<Vec<_>>());
    }

    #[test]
    fn simple_async_failure_fails_the_step() {
        let reader = VecReader::of(50);
        let processor = RejectAbove(35);
        let writer = RecordingWriter::default();

        let step = StepBuilder::new("limited")
            .chunk(10)
            .reader(&reader)
            .processor(&processor)
            .writer(&writer)
            .task_executor(TaskExecutor::SimpleAsync {
                concurrency_limit: 2,
            })
            .build()
            .unwrap();

        let (result, execution) = run(&step);

        assert!(result.is_err());
        assert_eq!(execution.status, BatchStatus::Failed);
        // The chunk holding 36 is never written.
        assert!(writer.calls().iter().all(|chunk| !chunk.contains(&360)));
        assert!(execution.failed_chunk_count >= 1);
    }

    #[test]
    fn builder_rejects_missing_components() {
        let reader = VecReader::of(1);

        let result = StepBuilder::new("incomplete")
            .chunk::<u32, u32>(10)
            .reader(&reader)
            .build();

        assert!(matches!(result, Err(BatchError::Configuration(_))));
    }

    #[test]
    fn builder_rejects_zero_chunk_size() {
        let reader = VecReader::of(1);
        let processor = RejectAbove(1);
        let writer = RecordingWriter::default();

        let result = StepBuilder::new("zero")
            .chunk(0)
            .reader(&reader)
            .processor(&processor)
            .writer(&writer)
            .build();

        assert!(matches!(result, Err(BatchError::Configuration(_))));
    }
}
