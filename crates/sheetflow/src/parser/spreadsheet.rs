//! Spreadsheet parser (.xlsx / .xls) backed by calamine.

use std::io::Cursor;

use calamine::{Data, Reader};

use super::multi_value::MultiValueFields;
use super::record::{FieldValue, Record};
use super::{missing_columns, RecordParser};
use crate::error::ParseError;

/// Header columns every product spreadsheet must carry.
pub const REQUIRED_PRODUCT_COLUMNS: [&str; 4] = ["ProductID", "ProductName", "Price", "Quantity"];

pub struct SpreadsheetParser {
    multi_value: MultiValueFields,
    required_columns: Vec<String>,
}

impl SpreadsheetParser {
    /// Creates a parser that validates the product header columns.
    pub fn new(multi_value: MultiValueFields) -> Self {
        Self {
            multi_value,
            required_columns: REQUIRED_PRODUCT_COLUMNS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    pub fn with_required_columns(mut self, columns: Vec<String>) -> Self {
        self.required_columns = columns;
        self
    }

    fn to_record(&self, header: &[String], row: &[Data]) -> Record {
        let mut record = Record::new();
        for (name, cell) in header.iter().zip(row.iter()) {
            if name.is_empty() {
                continue;
            }
            if let Some(value) = cell_value(cell) {
                record.insert(name.clone(), value);
            }
        }
        self.multi_value.apply(header, &mut record);
        record
    }
}

/// Header cells are always read as trimmed text.
fn header_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        other => other.to_string().trim().to_string(),
    }
}

/// Maps a cell to a field value. Rich text arrives from calamine already
/// flattened to its plain string.
fn cell_value(cell: &Data) -> Option<FieldValue> {
    match cell {
        Data::Empty => None,
        Data::String(s) => Some(FieldValue::Text(s.clone())),
        Data::Float(f) => Some(FieldValue::Number(*f)),
        Data::Int(i) => Some(FieldValue::Number(*i as f64)),
        other => Some(FieldValue::Text(other.to_string())),
    }
}

fn is_blank_row(row: &[Data]) -> bool {
    row.iter().all(|cell| match cell {
        Data::Empty => true,
        Data::String(s) => s.trim().is_empty(),
        _ => false,
    })
}

impl RecordParser for SpreadsheetParser {
    fn parse_bytes(&self, data: &[u8]) -> Result<Vec<Record>, ParseError> {
        let mut workbook = calamine::open_workbook_auto_from_rs(Cursor::new(data))
            .map_err(|e| ParseError::Spreadsheet(e.to_string()))?;

        let range = workbook
            .worksheet_range_at(0)
            .ok_or(ParseError::NoWorksheet)?
            .map_err(|e| ParseError::Spreadsheet(e.to_string()))?;

        // The range starts at the first used cell; the header must sit on row 1.
        let header_on_first_row = matches!(range.start(), Some((0, _)));
        let mut rows = range.rows();

        let header: Vec<String> = if header_on_first_row {
            rows.next()
                .map(|row| row.iter().map(header_text).collect())
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        let missing = missing_columns(&header, &self.required_columns);
        if !missing.is_empty() {
            return Err(ParseError::MissingRequiredColumns { missing });
        }

        let records: Vec<Record> = rows
            .filter(|row| !is_blank_row(row))
            .map(|row| self.to_record(&header, row))
            .collect();

        log::debug!(
            "Parsed {} spreadsheet records with {} columns",
            records.len(),
            header.len()
        );
        Ok(records)
    }
}
