use std::{
    cell::{Cell, RefCell},
    fs::File,
    path::{Path, PathBuf},
};

use csv::{ReaderBuilder, StringRecordsIntoIter};
use log::{debug, warn};

use crate::{
    core::item::{ItemReader, ItemReaderResult},
    error::BatchError,
    item::multi_resource::ResourceAwareItemReader,
};

use super::line_mapper::{DelimitedLineTokenizer, FieldSetMapper};

struct OpenResource {
    name: String,
    records: StringRecordsIntoIter<File>,
}

/// Reads items from one delimited text file.
///
/// The file is opened by [`ItemReader::open`] and released by
/// [`ItemReader::close`]. A line whose field count does not match the
/// tokenizer, or whose fields the mapper rejects, is reported as
/// [`BatchError::MalformedRecord`] carrying the file name, the line number and
/// the raw line; the reader itself stays usable.
///
/// Fields are kept as written, surrounding spaces included. Empty lines are
/// skipped by the parser and never reach the tokenizer; line numbers in
/// errors still count them.
pub struct CsvItemReader<M> {
    resource: RefCell<Option<PathBuf>>,
    tokenizer: DelimitedLineTokenizer,
    field_set_mapper: M,
    has_headers: bool,
    opened: RefCell<Option<OpenResource>>,
    lines_read: Cell<u64>,
}

impl<M> CsvItemReader<M> {
    /// File currently configured, if any.
    pub fn resource(&self) -> Option<PathBuf> {
        self.resource.borrow().clone()
    }

    pub fn tokenizer(&self) -> &DelimitedLineTokenizer {
        &self.tokenizer
    }
}

impl<T, M: FieldSetMapper<T>> ItemReader<T> for CsvItemReader<M> {
    fn open(&self) -> Result<(), BatchError> {
        let path = self.resource.borrow().clone().ok_or_else(|| {
            BatchError::SourceUnavailable("no resource configured".to_string())
        })?;

        let reader = ReaderBuilder::new()
            .delimiter(self.tokenizer.delimiter())
            .has_headers(self.has_headers)
            // Field counts are checked by the tokenizer to report the line.
            .flexible(true)
            .from_path(&path)
            .map_err(|error| {
                BatchError::SourceUnavailable(format!("{}: {}", path.display(), error))
            })?;

        debug!("Opened {}", path.display());
        self.lines_read.set(0);
        *self.opened.borrow_mut() = Some(OpenResource {
            name: resource_name(&path),
            records: reader.into_records(),
        });
        Ok(())
    }

    fn read(&self) -> ItemReaderResult<T> {
        let mut opened = self.opened.borrow_mut();
        let Some(resource) = opened.as_mut() else {
            return Err(BatchError::SourceUnavailable(
                "reader is not open".to_string(),
            ));
        };

        let Some(result) = resource.records.next() else {
            return Ok(None);
        };
        self.lines_read.set(self.lines_read.get() + 1);

        let record = result.map_err(|error| BatchError::MalformedRecord {
            resource: resource.name.clone(),
            line: error
                .position()
                .map_or(self.lines_read.get(), |position| position.line()),
            raw: String::new(),
            reason: error.to_string(),
        })?;

        let line = record
            .position()
            .map_or(self.lines_read.get(), |position| position.line());

        self.tokenizer
            .tokenize(&record)
            .and_then(|field_set| self.field_set_mapper.map_field_set(&field_set))
            .map(Some)
            .map_err(|reason| {
                let error = BatchError::MalformedRecord {
                    resource: resource.name.clone(),
                    line,
                    raw: self.tokenizer.join(&record),
                    reason,
                };
                warn!("{}", error);
                error
            })
    }

    fn close(&self) -> Result<(), BatchError> {
        if let Some(resource) = self.opened.borrow_mut().take() {
            debug!("Closed {} after {} lines", resource.name, self.lines_read.get());
        }
        Ok(())
    }
}

impl<T, M: FieldSetMapper<T>> ResourceAwareItemReader<T> for CsvItemReader<M> {
    fn set_resource(&self, resource: &Path) {
        *self.resource.borrow_mut() = Some(resource.to_path_buf());
    }
}

fn resource_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub struct CsvItemReaderBuilder {
    tokenizer: Option<DelimitedLineTokenizer>,
    has_headers: bool,
    resource: Option<PathBuf>,
}

impl Default for CsvItemReaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CsvItemReaderBuilder {
    pub fn new() -> Self {
        Self {
            tokenizer: None,
            has_headers: false,
            resource: None,
        }
    }

    pub fn tokenizer(mut self, tokenizer: DelimitedLineTokenizer) -> Self {
        self.tokenizer = Some(tokenizer);
        self
    }

    pub fn has_headers(mut self, yes: bool) -> Self {
        self.has_headers = yes;
        self
    }

    /// File to read. May be left unset when the reader is driven by a
    /// multi-resource reader.
    pub fn resource<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.resource = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn build<M>(self, field_set_mapper: M) -> Result<CsvItemReader<M>, BatchError> {
        let tokenizer = self.tokenizer.ok_or_else(|| {
            BatchError::Configuration("csv reader has no tokenizer".to_string())
        })?;

        Ok(CsvItemReader {
            resource: RefCell::new(self.resource),
            tokenizer,
            field_set_mapper,
            has_headers: self.has_headers,
            opened: RefCell::new(None),
            lines_read: Cell::new(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::item::csv::line_mapper::FieldSet;

    type Item = (String, u32);

    struct Pair;

    impl FieldSetMapper<Item> for Pair {
        fn map_field_set(&self, field_set: &FieldSet) -> Result<Item, String> {
            let count = field_set.required("count")?;
            let count = count
                .parse()
                .map_err(|_| format!("invalid count {}", count))?;
            Ok((field_set.required("name")?.to_string(), count))
        }
    }

    fn reader_for(path: &Path) -> CsvItemReader<Pair> {
        CsvItemReaderBuilder::new()
            .tokenizer(DelimitedLineTokenizer::new(&["name", "count"]))
            .resource(path)
            .build(Pair)
            .unwrap()
    }

    #[test]
    fn lines_are_read_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pairs.csv");
        fs::write(&path, "a,1\nb,2\n").unwrap();

        let reader: &dyn ItemReader<Item> = &reader_for(&path);
        reader.open().unwrap();

        assert_eq!(reader.read().unwrap(), Some(("a".to_string(), 1)));
        assert_eq!(reader.read().unwrap(), Some(("b".to_string(), 2)));
        assert_eq!(reader.read().unwrap(), None);
        reader.close().unwrap();
        reader.close().unwrap();
    }

    #[test]
    fn missing_field_is_a_malformed_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pairs.csv");
        fs::write(&path, "a,1\nb\nc,3\n").unwrap();

        let reader: &dyn ItemReader<Item> = &reader_for(&path);
        reader.open().unwrap();
        reader.read().unwrap();

        let error = reader.read().unwrap_err();
        assert_eq!(
            error,
            BatchError::MalformedRecord {
                resource: "pairs.csv".to_string(),
                line: 2,
                raw: "b".to_string(),
                reason: "expected 2 fields, found 1".to_string(),
            }
        );
        // The reader moves on to the next line.
        assert_eq!(reader.read().unwrap(), Some(("c".to_string(), 3)));
    }

    #[test]
    fn surrounding_spaces_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pairs.csv");
        fs::write(&path, " a  ,1\n").unwrap();

        let reader: &dyn ItemReader<Item> = &reader_for(&path);
        reader.open().unwrap();

        assert_eq!(reader.read().unwrap(), Some((" a  ".to_string(), 1)));
    }

    #[test]
    fn empty_lines_are_skipped_but_counted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pairs.csv");
        fs::write(&path, "a,1\n\nb\r\n\r\nc,3\n").unwrap();

        let reader: &dyn ItemReader<Item> = &reader_for(&path);
        reader.open().unwrap();

        assert_eq!(reader.read().unwrap(), Some(("a".to_string(), 1)));
        assert!(matches!(
            reader.read(),
            Err(BatchError::MalformedRecord { line: 3, ref raw, .. }) if raw == "b"
        ));
        assert_eq!(reader.read().unwrap(), Some(("c".to_string(), 3)));
        assert_eq!(reader.read().unwrap(), None);
    }

    #[test]
    fn header_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pairs.csv");
        fs::write(&path, "name,count\na,1\n").unwrap();

        let reader = CsvItemReaderBuilder::new()
            .tokenizer(DelimitedLineTokenizer::new(&["name", "count"]))
            .has_headers(true)
            .resource(&path)
            .build(Pair)
            .unwrap();
        let reader: &dyn ItemReader<Item> = &reader;
        reader.open().unwrap();

        assert_eq!(reader.read().unwrap(), Some(("a".to_string(), 1)));
        assert_eq!(reader.read().unwrap(), None);
    }

    #[test]
    fn rejected_field_value_is_a_malformed_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pairs.csv");
        fs::write(&path, "a,many\n").unwrap();

        let reader: &dyn ItemReader<Item> = &reader_for(&path);
        reader.open().unwrap();

        assert!(matches!(
            reader.read(),
            Err(BatchError::MalformedRecord { ref reason, .. }) if reason == "invalid count many"
        ));
    }

    #[test]
    fn missing_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let reader: &dyn ItemReader<Item> = &reader_for(&dir.path().join("absent.csv"));

        let result = reader.open();

        assert!(matches!(result, Err(BatchError::SourceUnavailable(_))));
    }

    #[test]
    fn reading_before_open_fails() {
        let dir = tempfile::tempdir().unwrap();
        let reader = reader_for(&dir.path().join("pairs.csv"));

        let result: ItemReaderResult<Item> = reader.read();

        assert!(matches!(result, Err(BatchError::SourceUnavailable(_))));
    }

    #[test]
    fn builder_requires_a_tokenizer() {
        let result = CsvItemReaderBuilder::new().build(Pair);

        assert!(matches!(result, Err(BatchError::Configuration(_))));
    }
}
