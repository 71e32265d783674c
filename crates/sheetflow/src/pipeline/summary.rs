//! Aggregate statistics over multi-value fields.

use std::collections::{BTreeMap, BTreeSet};

use crate::parser::Record;
use crate::queue::FieldSummary;

#[derive(Debug, Default)]
struct FieldAccumulator {
    total_values: usize,
    unique_values: BTreeSet<String>,
    max_per_record: usize,
}

/// Accumulates value counts for each designated field across a job's records.
#[derive(Debug, Default)]
pub struct MultiValueStats {
    fields: BTreeMap<String, FieldAccumulator>,
}

impl MultiValueStats {
    /// Every designated field appears in the summary, even if never populated.
    pub fn new(field_names: &[String]) -> Self {
        Self {
            fields: field_names
                .iter()
                .map(|name| (name.clone(), FieldAccumulator::default()))
                .collect(),
        }
    }

    pub fn observe(&mut self, record: &Record) {
        for (name, acc) in self.fields.iter_mut() {
            let Some(values) = record.get(name).and_then(|v| v.as_list()) else {
                continue;
            };
            acc.total_values += values.len();
            acc.max_per_record = acc.max_per_record.max(values.len());
            acc.unique_values.extend(values.iter().cloned());
        }
    }

    /// Distinct values come out sorted.
    pub fn finish(self) -> BTreeMap<String, FieldSummary> {
        self.fields
            .into_iter()
            .map(|(name, acc)| {
                (
                    name,
                    FieldSummary {
                        total_values: acc.total_values,
                        unique_values: acc.unique_values.into_iter().collect(),
                        max_per_record: acc.max_per_record,
                    },
                )
            })
            .collect()
    }
}
