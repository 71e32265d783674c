//! Per-record transformation.
//!
//! A processor sees one record at a time and never shares state between
//! calls, so records may be handled in any order.

use crate::error::RecordProcessingError;
use crate::parser::{FieldValue, Record};

/// Default fields coerced to numbers.
pub const DEFAULT_NUMERIC_FIELDS: [&str; 2] = ["Price", "Quantity"];

pub trait RecordProcessor: Send + Sync {
    fn process(&self, record: &Record) -> Result<Record, RecordProcessingError>;
}

/// Trims text values and coerces numeric fields.
///
/// Empty numeric fields are dropped from the output. A record fails when a
/// numeric field holds text that is not a finite number, or when no field
/// carries a value.
#[derive(Debug, Clone)]
pub struct NormalizingProcessor {
    numeric_fields: Vec<String>,
}

impl NormalizingProcessor {
    pub fn new<I, S>(numeric_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            numeric_fields: numeric_fields.into_iter().map(Into::into).collect(),
        }
    }

    fn is_numeric_field(&self, name: &str) -> bool {
        self.numeric_fields.iter().any(|f| f == name)
    }
}

impl Default for NormalizingProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_NUMERIC_FIELDS)
    }
}

impl RecordProcessor for NormalizingProcessor {
    fn process(&self, record: &Record) -> Result<Record, RecordProcessingError> {
        if record.iter().all(|(_, value)| value.is_empty()) {
            return Err(RecordProcessingError::EmptyRecord);
        }

        let mut out = Record::new();
        for (name, value) in record.iter() {
            let value = match value {
                FieldValue::Text(text) => {
                    let trimmed = text.trim();
                    if !self.is_numeric_field(name) {
                        FieldValue::text(trimmed)
                    } else if trimmed.is_empty() {
                        continue;
                    } else {
                        FieldValue::Number(parse_number(name, trimmed)?)
                    }
                }
                other => other.clone(),
            };
            out.insert(name, value);
        }
        Ok(out)
    }
}

fn parse_number(field: &str, text: &str) -> Result<f64, RecordProcessingError> {
    text.parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| RecordProcessingError::NonNumeric {
            field: field.to_string(),
            value: text.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(fields: &[(&str, FieldValue)]) -> Record {
        fields.iter().cloned().collect()
    }

    #[test]
    fn test_trims_text_and_coerces_numbers() {
        let processor = NormalizingProcessor::default();
        let input = record(&[
            ("ProductName", FieldValue::text("  Widget ")),
            ("Price", FieldValue::text(" 9.50")),
            ("Quantity", FieldValue::Number(3.0)),
            ("Tags", FieldValue::List(vec!["a".into()])),
        ]);

        let out = processor.process(&input).unwrap();
        assert_eq!(out.get("ProductName"), Some(&FieldValue::text("Widget")));
        assert_eq!(out.get("Price"), Some(&FieldValue::Number(9.5)));
        assert_eq!(out.get("Quantity"), Some(&FieldValue::Number(3.0)));
        assert_eq!(out.get("Tags"), Some(&FieldValue::List(vec!["a".into()])));
    }

    #[test]
    fn test_non_numeric_price_fails() {
        let processor = NormalizingProcessor::default();
        let input = record(&[
            ("ProductID", FieldValue::text("P1")),
            ("Price", FieldValue::text("cheap")),
        ]);

        assert_eq!(
            processor.process(&input),
            Err(RecordProcessingError::NonNumeric {
                field: "Price".to_string(),
                value: "cheap".to_string(),
            })
        );
    }

    #[test]
    fn test_infinite_values_are_not_numbers() {
        let processor = NormalizingProcessor::default();
        let input = record(&[("Price", FieldValue::text("inf"))]);
        assert!(processor.process(&input).is_err());
    }

    #[test]
    fn test_empty_numeric_field_is_dropped() {
        let processor = NormalizingProcessor::default();
        let input = record(&[
            ("ProductID", FieldValue::text("P1")),
            ("Quantity", FieldValue::text("  ")),
        ]);

        let out = processor.process(&input).unwrap();
        assert!(!out.contains("Quantity"));
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_all_empty_record_fails() {
        let processor = NormalizingProcessor::default();
        let input = record(&[
            ("ProductID", FieldValue::text("")),
            ("Tags", FieldValue::List(Vec::new())),
        ]);
        assert_eq!(
            processor.process(&input),
            Err(RecordProcessingError::EmptyRecord)
        );
        assert_eq!(
            processor.process(&Record::new()),
            Err(RecordProcessingError::EmptyRecord)
        );
    }

    #[test]
    fn test_custom_numeric_fields() {
        let processor = NormalizingProcessor::new(["Weight"]);
        let input = record(&[
            ("Price", FieldValue::text("n/a")),
            ("Weight", FieldValue::text("2")),
        ]);

        let out = processor.process(&input).unwrap();
        assert_eq!(out.get("Price"), Some(&FieldValue::text("n/a")));
        assert_eq!(out.get("Weight"), Some(&FieldValue::Number(2.0)));
    }
}
