use csv::StringRecord;

/// Splits a delimited line into named fields.
///
/// A tokenizer is an immutable value: the delimiter and the ordered field
/// names are fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelimitedLineTokenizer {
    delimiter: u8,
    names: Vec<String>,
}

impl DelimitedLineTokenizer {
    /// Comma-delimited tokenizer for the given field names.
    pub fn new(names: &[&str]) -> Self {
        Self {
            delimiter: b',',
            names: names.iter().map(|name| name.to_string()).collect(),
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Pairs the values of `record` with the field names.
    ///
    /// Fails with a human readable reason when the number of values differs
    /// from the number of names.
    pub fn tokenize(&self, record: &StringRecord) -> Result<FieldSet, String> {
        if record.len() != self.names.len() {
            return Err(format!(
                "expected {} fields, found {}",
                self.names.len(),
                record.len()
            ));
        }

        Ok(FieldSet {
            names: self.names.clone(),
            values: record.iter().map(str::to_string).collect(),
        })
    }

    /// Rebuilds the textual line of a record, for error reports.
    pub fn join(&self, record: &StringRecord) -> String {
        let delimiter = char::from(self.delimiter).to_string();
        record.iter().collect::<Vec<_>>().join(&delimiter)
    }
}

/// Named values of one tokenized line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSet {
    names: Vec<String>,
    values: Vec<String>,
}

impl FieldSet {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.names
            .iter()
            .position(|candidate| candidate == name)
            .map(|index| self.values[index].as_str())
    }

    /// Value of `name`, or a reason naming the missing field.
    pub fn required(&self, name: &str) -> Result<&str, String> {
        self.get(name)
            .ok_or_else(|| format!("missing field {}", name))
    }
}

/// Builds an item from the fields of one line.
pub trait FieldSetMapper<T> {
    /// Returns the item, or the reason the fields are not a valid item.
    fn map_field_set(&self, field_set: &FieldSet) -> Result<T, String>;
}

/// Lists the field values of an item, in output column order.
pub trait FieldExtractor<T> {
    fn extract(&self, item: &T) -> Vec<String>;
}
