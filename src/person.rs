//! The person record and its collaborators: line codec, processor and
//! database mapping.

use std::fmt;

use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use serde::{Deserialize, Serialize};
use sqlx::{Row, Sqlite, query_builder::Separated, sqlite::SqliteRow};

use crate::{
    core::item::{ItemProcessor, ItemProcessorResult},
    error::BatchError,
    item::{
        csv::{DelimitedLineTokenizer, FieldExtractor, FieldSet, FieldSetMapper},
        rdbc::{DatabaseItemBinder, RowMapper},
    },
};

/// Field names of a person line, in file order.
pub const PERSON_FIELDS: [&str; 4] = ["firstName", "lastName", "email", "age"];

/// Columns of the `person` table written by the import step.
pub const PERSON_COLUMNS: [&str; 4] = ["first_name", "last_name", "email", "age"];

pub const SELECT_PERSONS: &str = "SELECT id, first_name, last_name, email, age FROM person ORDER BY id";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    /// Set once the person is stored
    pub id: Option<i64>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub age: u32,
}

impl Person {
    pub fn new(first_name: &str, last_name: &str, email: &str, age: u32) -> Self {
        Self {
            id: None,
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            email: email.to_string(),
            age,
        }
    }

    /// Identifier used in error reports: the database id when known,
    /// otherwise the e-mail.
    pub fn identity(&self) -> String {
        match self.id {
            Some(id) => format!("person #{}", id),
            None => format!("person <{}>", self.email),
        }
    }
}

impl fmt::Display for Person {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} <{}>, {}",
            self.first_name, self.last_name, self.email, self.age
        )
    }
}

/// Normalizes a person: names upper-cased, e-mail trimmed and lower-cased.
///
/// Rejects persons without a first or last name, and e-mails without `@`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PersonItemProcessor;

impl ItemProcessor<Person, Person> for PersonItemProcessor {
    fn process(&self, item: &Person) -> ItemProcessorResult<Person> {
        let reject = |reason: &str| BatchError::TransformError {
            record: item.identity(),
            reason: reason.to_string(),
        };

        let first_name = item.first_name.trim();
        let last_name = item.last_name.trim();
        let email = item.email.trim();

        if first_name.is_empty() {
            return Err(reject("first name is empty"));
        }
        if last_name.is_empty() {
            return Err(reject("last name is empty"));
        }
        if !email.contains('@') {
            return Err(reject("e-mail has no @"));
        }

        Ok(Person {
            id: item.id,
            first_name: first_name.to_uppercase(),
            last_name: last_name.to_uppercase(),
            email: email.to_lowercase(),
            age: item.age,
        })
    }
}

/// Maps person lines to [`Person`] values and back.
#[derive(Debug, Default, Clone, Copy)]
pub struct PersonFieldMapper;

impl PersonFieldMapper {
    pub fn tokenizer() -> DelimitedLineTokenizer {
        DelimitedLineTokenizer::new(&PERSON_FIELDS)
    }

    /// Encodes a person as one line, without line terminator.
    pub fn encode_line(&self, person: &Person) -> Result<String, BatchError> {
        let mut wtr = WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        wtr.write_record(self.extract(person))
            .map_err(|error| BatchError::SinkFailure(error.to_string()))?;
        let bytes = wtr
            .into_inner()
            .map_err(|error| BatchError::SinkFailure(error.to_string()))?;
        let line = String::from_utf8(bytes)
            .map_err(|error| BatchError::SinkFailure(error.to_string()))?;
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Decodes one line, reporting failures as [`BatchError::MalformedRecord`].
    pub fn decode_line(&self, line: &str) -> Result<Person, BatchError> {
        let malformed = |reason: String| BatchError::MalformedRecord {
            resource: "line".to_string(),
            line: 1,
            raw: line.to_string(),
            reason,
        };

        let mut rdr = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(line.as_bytes());
        let mut record = StringRecord::new();
        let found = rdr
            .read_record(&mut record)
            .map_err(|error| malformed(error.to_string()))?;
        if !found {
            return Err(malformed("empty line".to_string()));
        }

        Self::tokenizer()
            .tokenize(&record)
            .and_then(|field_set| self.map_field_set(&field_set))
            .map_err(malformed)
    }
}

impl FieldSetMapper<Person> for PersonFieldMapper {
    fn map_field_set(&self, field_set: &FieldSet) -> Result<Person, String> {
        let age = field_set.required("age")?;
        let age = age
            .trim()
            .parse()
            .map_err(|_| format!("age {} is not a non-negative integer", age))?;

        Ok(Person {
            id: None,
            first_name: field_set.required("firstName")?.to_string(),
            last_name: field_set.required("lastName")?.to_string(),
            email: field_set.required("email")?.to_string(),
            age,
        })
    }
}

impl FieldExtractor<Person> for PersonFieldMapper {
    fn extract(&self, item: &Person) -> Vec<String> {
        vec![
            item.first_name.clone(),
            item.last_name.clone(),
            item.email.clone(),
            item.age.to_string(),
        ]
    }
}

/// Binds a person to the [`PERSON_COLUMNS`] of an insert.
#[derive(Debug, Default, Clone, Copy)]
pub struct PersonBinder;

impl DatabaseItemBinder<Person, Sqlite> for PersonBinder {
    fn bind(&self, item: &Person, mut query_builder: Separated<Sqlite, &str>) {
        query_builder.push_bind(item.first_name.clone());
        query_builder.push_bind(item.last_name.clone());
        query_builder.push_bind(item.email.clone());
        query_builder.push_bind(i64::from(item.age));
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PersonRowMapper;

impl RowMapper<Person, Sqlite> for PersonRowMapper {
    fn map_row(&self, row: &SqliteRow) -> Result<Person, sqlx::Error> {
        let age: i64 = row.try_get("age")?;
        let age = u32::try_from(age).map_err(|error| sqlx::Error::ColumnDecode {
            index: "age".to_string(),
            source: Box::new(error),
        })?;

        Ok(Person {
            id: Some(row.try_get("id")?),
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            email: row.try_get("email")?,
            age,
        })
    }
}
