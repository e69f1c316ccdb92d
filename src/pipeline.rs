//! The person ETL job.
//!
//! Two steps run in order:
//!
//! 1. `import-persons` reads every input file matching the configured pattern,
//!    normalizes each person and inserts the chunks into the `person` table.
//! 2. `export-persons` reads the table back and writes every person to the
//!    output file.
//!
//! Once the job completed, the input files are moved to the output directory
//! with a timestamp prefix.

use std::str::FromStr;

use log::error;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use tokio::runtime::Handle;

use crate::{
    config::BatchConfig,
    core::{
        job::{Job, JobBuilder, JobExecution},
        step::{ChunkOrientedStep, StepBuilder},
    },
    error::BatchError,
    item::{
        csv::{CsvItemReader, CsvItemReaderBuilder, CsvItemWriter, CsvItemWriterBuilder},
        multi_resource::MultiResourceItemReader,
        rdbc::{
            SqliteItemReader, SqliteItemReaderBuilder, SqliteItemWriter, SqliteItemWriterBuilder,
        },
    },
    listener::ArchiveListener,
    person::{
        PERSON_COLUMNS, Person, PersonBinder, PersonFieldMapper, PersonItemProcessor,
        PersonRowMapper, SELECT_PERSONS,
    },
};

pub const JOB_NAME: &str = "person-etl";
pub const IMPORT_STEP: &str = "import-persons";
pub const EXPORT_STEP: &str = "export-persons";

const CREATE_PERSON_TABLE: &str = "CREATE TABLE IF NOT EXISTS person (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    first_name TEXT NOT NULL,
    last_name TEXT NOT NULL,
    email TEXT NOT NULL,
    age INTEGER NOT NULL
)";

/// Opens the sqlite database at `database_url`, creating the file if needed.
pub async fn connect(database_url: &str) -> Result<SqlitePool, BatchError> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|error| BatchError::Configuration(format!("{}: {}", database_url, error)))?
        .create_if_missing(true);

    SqlitePoolOptions::new()
        .connect_with(options)
        .await
        .map_err(|error| BatchError::SourceUnavailable(format!("{}: {}", database_url, error)))
}

/// Creates the `person` table if it does not exist.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), BatchError> {
    sqlx::query(CREATE_PERSON_TABLE)
        .execute(pool)
        .await
        .map(|_| ())
        .map_err(|error| BatchError::SinkFailure(format!("cannot create person table: {}", error)))
}

type InputReader = MultiResourceItemReader<CsvItemReader<PersonFieldMapper>>;

/// Owns every component of the job. Steps are assembled for each run.
pub struct PersonEtlJob {
    config: BatchConfig,
    input_reader: InputReader,
    processor: PersonItemProcessor,
    person_writer: SqliteItemWriter<Person, PersonBinder>,
    person_reader: SqliteItemReader<Person, PersonRowMapper>,
    output_writer: CsvItemWriter<Person, PersonFieldMapper>,
    archive_listener: ArchiveListener,
}

impl PersonEtlJob {
    /// Wires the job. Database calls are driven on `handle`.
    pub fn new(config: BatchConfig, pool: SqlitePool, handle: Handle) -> Result<Self, BatchError> {
        config.validate()?;

        let file_reader = CsvItemReaderBuilder::new()
            .tokenizer(PersonFieldMapper::tokenizer())
            .build(PersonFieldMapper)?;
        let input_reader =
            MultiResourceItemReader::new(&config.input_dir, &config.input_pattern, file_reader);

        let person_writer = PERSON_COLUMNS
            .iter()
            .fold(
                SqliteItemWriterBuilder::new()
                    .pool(pool.clone())
                    .handle(handle.clone())
                    .table("person"),
                |builder, column| builder.add_column(column),
            )
            .build(PersonBinder)?;

        let person_reader = SqliteItemReaderBuilder::new()
            .pool(pool)
            .handle(handle)
            .query(SELECT_PERSONS)
            .page_size(config.chunk_size)
            .build(PersonRowMapper)?;

        let output_writer = CsvItemWriterBuilder::new().from_path(config.output_file(), PersonFieldMapper);
        let archive_listener = ArchiveListener::new(&config.input_dir, &config.output_path);

        Ok(Self {
            config,
            input_reader,
            processor: PersonItemProcessor,
            person_writer,
            person_reader,
            output_writer,
            archive_listener,
        })
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    fn import_step(&self) -> Result<ChunkOrientedStep<'_, Person, Person>, BatchError> {
        StepBuilder::new(IMPORT_STEP)
            .chunk(self.config.chunk_size)
            .reader(&self.input_reader)
            .processor(&self.processor)
            .writer(&self.person_writer)
            .task_executor(self.config.task_executor())
            .build()
    }

    fn export_step(&self) -> Result<ChunkOrientedStep<'_, Person, Person>, BatchError> {
        StepBuilder::new(EXPORT_STEP)
            .chunk(self.config.chunk_size)
            .reader(&self.person_reader)
            .processor(&self.processor)
            .writer(&self.output_writer)
            .build()
    }
}

impl Job for PersonEtlJob {
    fn run(&self, run_id: u64) -> JobExecution {
        let steps = self
            .import_step()
            .and_then(|import| Ok((import, self.export_step()?)));

        match steps {
            Ok((import, export)) => JobBuilder::new()
                .name(JOB_NAME)
                .start(&import)
                .next(&export)
                .listener(&self.archive_listener)
                .build()
                .run(run_id),
            Err(error) => {
                error!("Job {} cannot be assembled: {}", JOB_NAME, error);
                JobExecution::failed(JOB_NAME, run_id)
            }
        }
    }

    fn get_name(&self) -> &str {
        JOB_NAME
    }
}
