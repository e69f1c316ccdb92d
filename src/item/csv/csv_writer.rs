use std::{
    fs::{self, File},
    io::Write,
    marker::PhantomData,
    path::{Path, PathBuf},
};

use csv::WriterBuilder;
use log::debug;
use parking_lot::Mutex;

use crate::{
    core::item::{ItemWriter, ItemWriterResult},
    error::BatchError,
};

use super::line_mapper::FieldExtractor;

/// Writes items as delimited lines to one file.
///
/// The file is created (or truncated) by `open`. Each `write` call encodes the
/// whole chunk first and appends it with a single write, so a chunk that
/// fails to encode leaves the file untouched.
pub struct CsvItemWriter<T, E> {
    path: PathBuf,
    delimiter: u8,
    field_extractor: E,
    file: Mutex<Option<File>>,
    _item: PhantomData<fn(&T)>,
}

impl<T, E> CsvItemWriter<T, E> {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<T, E: FieldExtractor<T>> CsvItemWriter<T, E> {
    fn encode(&self, items: &[T]) -> Result<Vec<u8>, BatchError> {
        let mut wtr = WriterBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(false)
            .flexible(false)
            .from_writer(Vec::new());

        for item in items {
            wtr.write_record(self.field_extractor.extract(item))
                .map_err(|error| BatchError::SinkFailure(error.to_string()))?;
        }

        wtr.into_inner()
            .map_err(|error| BatchError::SinkFailure(error.to_string()))
    }
}

impl<T, E: FieldExtractor<T>> ItemWriter<T> for CsvItemWriter<T, E> {
    fn write(&self, items: &[T]) -> ItemWriterResult {
        let bytes = self.encode(items)?;

        let mut file = self.file.lock();
        let file = file.as_mut().ok_or_else(|| {
            BatchError::SinkFailure(format!("{} is not open", self.path.display()))
        })?;

        file.write_all(&bytes)
            .map_err(|error| BatchError::SinkFailure(format!("{}: {}", self.path.display(), error)))?;

        debug!("Wrote {} lines to {}", items.len(), self.path.display());
        Ok(())
    }

    fn flush(&self) -> ItemWriterResult {
        match self.file.lock().as_mut() {
            Some(file) => file
                .flush()
                .map_err(|error| BatchError::SinkFailure(error.to_string())),
            None => Ok(()),
        }
    }

    fn open(&self) -> ItemWriterResult {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|error| {
                BatchError::SinkFailure(format!("{}: {}", parent.display(), error))
            })?;
        }

        let file = File::create(&self.path).map_err(|error| {
            BatchError::SinkFailure(format!("{}: {}", self.path.display(), error))
        })?;
        *self.file.lock() = Some(file);
        Ok(())
    }

    fn close(&self) -> ItemWriterResult {
        match self.file.lock().take() {
            Some(mut file) => file
                .flush()
                .map_err(|error| BatchError::SinkFailure(error.to_string())),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CsvItemWriterBuilder {
    delimiter: u8,
}

impl Default for CsvItemWriterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CsvItemWriterBuilder {
    pub fn new() -> CsvItemWriterBuilder {
        CsvItemWriterBuilder { delimiter: b',' }
    }

    pub fn delimiter(mut self, delimiter: u8) -> CsvItemWriterBuilder {
        self.delimiter = delimiter;
        self
    }

    pub fn from_path<T, E, P: AsRef<Path>>(self, path: P, field_extractor: E) -> CsvItemWriter<T, E> {
        CsvItemWriter {
            path: path.as_ref().to_path_buf(),
            delimiter: self.delimiter,
            field_extractor,
            file: Mutex::new(None),
            _item: PhantomData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Row {
        city: &'static str,
        population: u64,
    }

    struct RowExtractor;

    impl FieldExtractor<Row> for RowExtractor {
        fn extract(&self, item: &Row) -> Vec<String> {
            vec![item.city.to_string(), item.population.to_string()]
        }
    }

    #[test]
    fn chunks_are_appended_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("rows.csv");
        let writer = CsvItemWriterBuilder::new().from_path(&path, RowExtractor);

        writer.open().unwrap();
        writer
            .write(&[
                Row {
                    city: "Boston",
                    population: 4628910,
                },
                Row {
                    city: "Concord",
                    population: 42695,
                },
            ])
            .unwrap();
        writer
            .write(&[Row {
                city: "Salem, MA",
                population: 44480,
            }])
            .unwrap();
        writer.close().unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "Boston,4628910\nConcord,42695\n\"Salem, MA\",44480\n"
        );
    }

    #[test]
    fn open_truncates_a_previous_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.csv");
        fs::write(&path, "stale\n").unwrap();
        let writer = CsvItemWriterBuilder::new()
            .delimiter(b';')
            .from_path(&path, RowExtractor);

        writer.open().unwrap();
        writer
            .write(&[Row {
                city: "Lyon",
                population: 522250,
            }])
            .unwrap();
        writer.close().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "Lyon;522250\n");
    }

    #[test]
    fn write_before_open_fails() {
        let dir = tempfile::tempdir().unwrap();
        let writer = CsvItemWriterBuilder::new().from_path(dir.path().join("rows.csv"), RowExtractor);

        let result = writer.write(&[Row {
            city: "Nice",
            population: 342669,
        }]);

        assert!(matches!(result, Err(BatchError::SinkFailure(_))));
    }
}
