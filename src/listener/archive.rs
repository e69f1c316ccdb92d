//! Archiving of processed input files.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local};
use log::{info, warn};

use crate::{
    core::{
        job::{JobExecution, JobExecutionListener},
        step::BatchStatus,
    },
    error::BatchError,
};

/// Prefix format of archived file names (12-hour clock).
pub const ARCHIVE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%I_%M_%S";

/// Name given to `file_name` when archived at `now`.
pub fn archive_file_name(file_name: &str, now: DateTime<Local>) -> String {
    format!("{}_{}", now.format(ARCHIVE_TIMESTAMP_FORMAT), file_name)
}

/// Moves every regular file of the input directory to the archive directory
/// once a job completed.
///
/// Files are renamed with a timestamp prefix and replace any archived file of
/// the same name. A file that cannot be moved does not stop the others; the
/// first failure is returned once every file was attempted. Nothing happens
/// when the job failed.
#[derive(Debug, Clone)]
pub struct ArchiveListener {
    input_dir: PathBuf,
    archive_dir: PathBuf,
}

impl ArchiveListener {
    pub fn new<I: AsRef<Path>, A: AsRef<Path>>(input_dir: I, archive_dir: A) -> Self {
        Self {
            input_dir: input_dir.as_ref().to_path_buf(),
            archive_dir: archive_dir.as_ref().to_path_buf(),
        }
    }

    /// Archives the input files, returning their new paths.
    pub fn archive(&self, now: DateTime<Local>) -> Result<Vec<PathBuf>, BatchError> {
        let unexpected = |path: &Path, error: io::Error| {
            BatchError::UnexpectedJobOutcome(format!("{}: {}", path.display(), error))
        };

        fs::create_dir_all(&self.archive_dir).map_err(|error| unexpected(&self.archive_dir, error))?;

        let mut sources = Vec::new();
        for entry in fs::read_dir(&self.input_dir).map_err(|error| unexpected(&self.input_dir, error))? {
            let entry = entry.map_err(|error| unexpected(&self.input_dir, error))?;
            let path = entry.path();
            if path.is_file() {
                sources.push(path);
            }
        }
        sources.sort();

        let mut archived = Vec::with_capacity(sources.len());
        let mut first_error = None;

        for source in sources {
            let file_name = source
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let target = self.archive_dir.join(archive_file_name(&file_name, now));

            match move_file(&source, &target) {
                Ok(()) => {
                    info!("Archived {} to {}", source.display(), target.display());
                    archived.push(target);
                }
                Err(error) => {
                    let error = unexpected(&source, error);
                    warn!("Could not archive file: {}", error);
                    first_error.get_or_insert(error);
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(archived),
        }
    }
}

impl JobExecutionListener for ArchiveListener {
    fn after_job(&self, job_execution: &JobExecution) -> Result<(), BatchError> {
        if job_execution.status != BatchStatus::Completed {
            return Ok(());
        }

        info!(
            "Job {} completed, archiving {}",
            job_execution.job_name,
            self.input_dir.display()
        );
        self.archive(Local::now()).map(|_| ())
    }
}

/// Renames `source` to `target`, replacing it. Falls back to copy and remove
/// when both are not on the same file system.
fn move_file(source: &Path, target: &Path) -> io::Result<()> {
    match fs::rename(source, target) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::CrossesDevices => {
            fs::copy(source, target)?;
            fs::remove_file(source)
        }
        Err(error) => Err(error),
    }
}
