mod common;

use std::{fs, sync::Mutex, time::Duration};

use common::{init_logger, person_lines, write_lines};
use crossbeam_channel::after;
use person_batch::{
    config::BatchConfig,
    core::{
        job::{Job, JobExecution},
        launch::{JobLauncher, Scheduler},
        step::BatchStatus,
    },
    error::BatchError,
    pipeline::{self, IMPORT_STEP, JOB_NAME, PersonEtlJob},
};
use tokio::runtime::Handle;

/// Tries a second launch through `launcher` before running `inner`.
struct EagerJob<'a> {
    launcher: &'a JobLauncher,
    inner: &'a PersonEtlJob,
    refused: Mutex<Vec<BatchError>>,
}

impl Job for EagerJob<'_> {
    fn run(&self, run_id: u64) -> JobExecution {
        if let Err(error) = self.launcher.launch(self.inner) {
            self.refused.lock().unwrap().push(error);
        }
        self.inner.run(run_id)
    }

    fn get_name(&self) -> &str {
        self.inner.get_name()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn scheduled_runs_archive_once_then_find_nothing() {
    init_logger();
    let root = tempfile::tempdir().unwrap();
    let config = BatchConfig {
        input_dir: root.path().join("in"),
        output_path: root.path().join("out"),
        database_url: format!("sqlite://{}", root.path().join("person.db").display()),
        schedule_interval_ms: 150,
        ..BatchConfig::default()
    };
    fs::create_dir_all(&config.input_dir).unwrap();
    write_lines(&config.input_dir, "persons_1.csv", &person_lines(1, 12));

    let pool = pipeline::connect(&config.database_url).await.unwrap();
    pipeline::init_schema(&pool).await.unwrap();
    let interval = config.schedule_interval();
    let job = PersonEtlJob::new(config, pool.clone(), Handle::current()).unwrap();

    let (report, refused) = tokio::task::spawn_blocking(move || {
        let launcher = JobLauncher::new();
        let eager = EagerJob {
            launcher: &launcher,
            inner: &job,
            refused: Mutex::new(Vec::new()),
        };
        let report = Scheduler::new(&launcher, interval).run(&eager, &after(Duration::from_millis(700)));
        assert!(!launcher.is_running());
        (report, eager.refused.into_inner().unwrap())
    })
    .await
    .unwrap();

    assert!(report.executions.len() >= 2);
    assert_eq!(refused.len(), report.executions.len());
    assert!(
        refused
            .iter()
            .all(|error| *error == BatchError::JobAlreadyRunning(JOB_NAME.to_string()))
    );

    let (first, later) = report.executions.split_first().unwrap();
    assert_eq!(first.status, BatchStatus::Completed);
    for execution in later {
        assert_eq!(execution.status, BatchStatus::Failed);
        assert!(matches!(
            execution.step_execution(IMPORT_STEP).unwrap().last_error,
            Some(BatchError::NoResourcesMatched(_))
        ));
        assert!(execution.run_id > first.run_id);
    }

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM person")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 12);
}
