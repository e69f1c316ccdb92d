//! Delimited text files.
//!
//! [`csv_reader::CsvItemReader`] turns the lines of one file into items with a
//! [`line_mapper::DelimitedLineTokenizer`] and a
//! [`line_mapper::FieldSetMapper`]; [`csv_writer::CsvItemWriter`] does the
//! reverse with a [`line_mapper::FieldExtractor`].

pub mod csv_reader;

pub mod csv_writer;

pub mod line_mapper;

pub use csv_reader::{CsvItemReader, CsvItemReaderBuilder};
pub use csv_writer::{CsvItemWriter, CsvItemWriterBuilder};
pub use line_mapper::{DelimitedLineTokenizer, FieldExtractor, FieldSet, FieldSetMapper};
