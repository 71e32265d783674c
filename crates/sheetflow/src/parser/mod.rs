pub mod csv;
pub mod multi_value;
pub mod record;
pub mod spreadsheet;

use std::path::Path;

use crate::error::ParseError;
use crate::pipeline::PipelineConfig;
use crate::queue::QueueType;

pub use self::csv::CsvParser;
pub use multi_value::MultiValueFields;
pub use record::{FieldValue, Record};
pub use spreadsheet::{SpreadsheetParser, REQUIRED_PRODUCT_COLUMNS};

/// Converts a file's raw bytes into records in file order.
pub trait RecordParser: Send + Sync {
    fn parse_bytes(&self, data: &[u8]) -> Result<Vec<Record>, ParseError>;

    fn parse(&self, path: &Path) -> Result<Vec<Record>, ParseError> {
        let data = std::fs::read(path).map_err(|e| ParseError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        self.parse_bytes(&data)
    }
}

/// Builds the parser for a queue type.
pub fn parser_for(config: &PipelineConfig) -> Box<dyn RecordParser> {
    let multi_value = MultiValueFields::new(config.multi_value_fields.iter().cloned());
    let required = config.required_columns.clone();
    match config.queue_type {
        QueueType::Csv => Box::new(CsvParser::new(multi_value).with_required_columns(required)),
        QueueType::Excel => {
            Box::new(SpreadsheetParser::new(multi_value).with_required_columns(required))
        }
    }
}

/// Returns the required columns missing from `header`, in the order they were requested.
pub(crate) fn missing_columns(header: &[String], required: &[String]) -> Vec<String> {
    required
        .iter()
        .filter(|column| !header.iter().any(|h| h == *column))
        .cloned()
        .collect()
}
