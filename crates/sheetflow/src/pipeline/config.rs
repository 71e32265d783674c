use crate::config::Config;
use crate::parser::REQUIRED_PRODUCT_COLUMNS;
use crate::processor::DEFAULT_NUMERIC_FIELDS;
use crate::queue::QueueType;

/// Multi-value fields for delimited text when none are configured.
pub const DEFAULT_CSV_MULTI_VALUE_FIELDS: [&str; 3] = ["Tags", "Categories", "Attributes"];
/// Multi-value fields for spreadsheets when none are configured.
pub const DEFAULT_EXCEL_MULTI_VALUE_FIELDS: [&str; 2] = ["Tags", "Categories"];

/// Everything a job run needs to know about its queue type.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub queue_type: QueueType,
    pub multi_value_fields: Vec<String>,
    pub required_columns: Vec<String>,
    pub numeric_fields: Vec<String>,
    pub retain_failed_uploads: bool,
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl PipelineConfig {
    pub fn defaults_for(queue_type: QueueType) -> Self {
        let (multi_value_fields, required_columns) = match queue_type {
            QueueType::Csv => (owned(&DEFAULT_CSV_MULTI_VALUE_FIELDS), Vec::new()),
            QueueType::Excel => (
                owned(&DEFAULT_EXCEL_MULTI_VALUE_FIELDS),
                owned(&REQUIRED_PRODUCT_COLUMNS),
            ),
        };
        Self {
            queue_type,
            multi_value_fields,
            required_columns,
            numeric_fields: owned(&DEFAULT_NUMERIC_FIELDS),
            retain_failed_uploads: false,
        }
    }

    pub fn from_config(config: &Config, queue_type: QueueType) -> Self {
        let defaults = Self::defaults_for(queue_type);
        let worker = config.workers.get(queue_type);
        Self {
            queue_type,
            multi_value_fields: worker
                .multi_value_fields
                .clone()
                .unwrap_or(defaults.multi_value_fields),
            required_columns: worker
                .required_columns
                .clone()
                .unwrap_or(defaults.required_columns),
            numeric_fields: config.numeric_fields.clone(),
            retain_failed_uploads: config.uploads.retain_failed,
        }
    }
}
