//! Delimited-text parser.

use csv::{ReaderBuilder, StringRecord};

use super::multi_value::MultiValueFields;
use super::record::{FieldValue, Record};
use super::{missing_columns, RecordParser};
use crate::error::ParseError;

const BOM: char = '\u{feff}';

pub struct CsvParser {
    multi_value: MultiValueFields,
    required_columns: Vec<String>,
}

impl CsvParser {
    pub fn new(multi_value: MultiValueFields) -> Self {
        Self {
            multi_value,
            required_columns: Vec::new(),
        }
    }

    /// Enables header validation. Empty by default.
    pub fn with_required_columns(mut self, columns: Vec<String>) -> Self {
        self.required_columns = columns;
        self
    }

    fn read_header(header: &StringRecord) -> Vec<String> {
        header
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let name = if i == 0 {
                    name.trim_start_matches(BOM)
                } else {
                    name
                };
                name.trim().to_string()
            })
            .collect()
    }

    fn to_record(&self, header: &[String], row: &StringRecord) -> Record {
        let mut record = Record::new();
        // Short rows leave trailing fields absent; extra cells are ignored.
        for (name, value) in header.iter().zip(row.iter()) {
            if name.is_empty() {
                continue;
            }
            record.insert(name.clone(), FieldValue::text(value));
        }
        self.multi_value.apply(header, &mut record);
        record
    }
}

impl RecordParser for CsvParser {
    fn parse_bytes(&self, data: &[u8]) -> Result<Vec<Record>, ParseError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(data);

        let header = Self::read_header(reader.headers()?);

        if !self.required_columns.is_empty() {
            let missing = missing_columns(&header, &self.required_columns);
            if !missing.is_empty() {
                return Err(ParseError::MissingRequiredColumns { missing });
            }
        }

        let mut records = Vec::new();
        for row in reader.records() {
            let row = row?;
            if row.iter().all(|cell| cell.trim().is_empty()) {
                continue;
            }
            records.push(self.to_record(&header, &row));
        }

        log::debug!(
            "Parsed {} CSV records with {} columns",
            records.len(),
            header.len()
        );
        Ok(records)
    }
}
