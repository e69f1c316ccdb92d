#![cfg_attr(docsrs, feature(doc_cfg))]

/*!
 # Person Batch

 A chunk-oriented batch engine and the person ETL job built on it.

 ## Core Concepts

- **Job:** an ordered sequence of `Step`s run to a single terminal status. Listeners are called once the status is known.
- **Step:** reads items, processes them and writes them, one chunk at a time. A chunk is written as one unit: if any of its items fails, nothing of it is written and the step fails.
- **ItemReader:** an ordered source of items (a file, a set of files, a query).
- **ItemProcessor:** the business transformation applied to each item.
- **ItemWriter:** the destination of a step, receiving whole chunks.
- **WorkerPool:** lets a step transform and write several chunks at once while its reader stays on one thread.
- **JobLauncher / Scheduler:** launch a job once or on a fixed interval, never two runs at a time.

 ## Features

| **Feature**   | **Description**                                               |
|---------------|---------------------------------------------------------------|
| csv           | Enables the delimited file `ItemReader` and `ItemWriter`      |
| rdbc-sqlite   | Enables the SQLite `ItemReader` and `ItemWriter`              |
| full          | Enables all available features, the person job and the CLI    |

 ## The person job

 `import-persons` reads `persons_*.csv` from the input directory into the
 `person` table, `export-persons` writes the table back to
 `persons_output.csv`. When the job completed, the input files are archived
 with a timestamp prefix.

```rust,no_run
# use person_batch::{config::BatchConfig, core::launch::JobLauncher, pipeline};
# fn main() -> Result<(), Box<dyn std::error::Error>> {
let runtime = tokio::runtime::Runtime::new()?;
let config = BatchConfig::from_path("batch.json")?;

let pool = runtime.block_on(pipeline::connect(&config.database_url))?;
runtime.block_on(pipeline::init_schema(&pool))?;

let job = pipeline::PersonEtlJob::new(config, pool, runtime.handle().clone())?;
let execution = JobLauncher::new().launch(&job)?;

println!("{:?}", execution.status);
# Ok(())
# }
```

 ## License
 Licensed under either of

 -   Apache License, Version 2.0
     ([LICENSE-APACHE](LICENSE-APACHE) or <http://www.apache.org/licenses/LICENSE-2.0>)
 -   MIT license
     ([LICENSE-MIT](LICENSE-MIT) or <http://opensource.org/licenses/MIT>)

 at your option.
 */

/// Pipeline configuration
pub mod config;

/// Core module for batch operations
pub mod core;

/// Error types for batch operations
pub mod error;

#[doc(inline)]
pub use error::*;

/// Set of items readers / writers (csv files, sqlite tables)
pub mod item;

/// Job execution listeners
pub mod listener;

#[cfg(all(feature = "csv", feature = "rdbc-sqlite"))]
#[cfg_attr(docsrs, doc(cfg(all(feature = "csv", feature = "rdbc-sqlite"))))]
pub mod person;

/// The person ETL job
#[cfg(all(feature = "csv", feature = "rdbc-sqlite"))]
#[cfg_attr(docsrs, doc(cfg(all(feature = "csv", feature = "rdbc-sqlite"))))]
pub mod pipeline;
