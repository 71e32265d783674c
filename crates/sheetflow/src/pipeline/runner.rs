use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info_span, warn};

use crate::parser::{parser_for, RecordParser};
use crate::processor::{NormalizingProcessor, RecordProcessor};
use crate::queue::{Job, JobResult, RecordOutcome};
use crate::sanitize;
use crate::storage::release_file;

use super::config::PipelineConfig;
use super::error::PipelineError;
use super::progress::{ProgressEvent, ProgressReporter, ProgressTracker};
use super::summary::MultiValueStats;

/// How a job run ended. The worker writes it to the queue unchanged.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(JobResult),
    Failed { reason: String, result: JobResult },
}

impl JobOutcome {
    pub fn result(&self) -> &JobResult {
        match self {
            JobOutcome::Completed(result) => result,
            JobOutcome::Failed { result, .. } => result,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, JobOutcome::Completed(_))
    }

    pub(crate) fn failed(error: &PipelineError, result: JobResult) -> Self {
        JobOutcome::Failed {
            reason: error.to_string(),
            result,
        }
    }
}

/// Parses a job's file and processes its records one by one.
pub struct JobRunner {
    config: Arc<PipelineConfig>,
    parser: Box<dyn RecordParser>,
    processor: Box<dyn RecordProcessor>,
}

impl JobRunner {
    /// Production constructor. Builds the parser and processor from config.
    pub fn from_config(config: Arc<PipelineConfig>) -> Self {
        let parser = parser_for(&config);
        let processor = Box::new(NormalizingProcessor::new(config.numeric_fields.clone()));
        Self {
            config,
            parser,
            processor,
        }
    }

    /// Injects specific components, for tests and custom processors.
    pub fn with_components(
        config: Arc<PipelineConfig>,
        parser: Box<dyn RecordParser>,
        processor: Box<dyn RecordProcessor>,
    ) -> Self {
        Self {
            config,
            parser,
            processor,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs one claimed job to its outcome. Never panics on bad input.
    pub fn run(&self, job: &Job, progress: &dyn ProgressReporter) -> JobOutcome {
        let source = job.payload.file_path.as_path();
        let filename = sanitize::redact_path(source);
        let _job_span = info_span!("job",
            queue = %job.queue_type,
            job_id = job.id,
            filename = %filename,
        )
        .entered();

        let records = {
            let _step = info_span!("parse").entered();
            match self.parser.parse(source) {
                Ok(records) => records,
                Err(e) => {
                    let error = PipelineError::from(e);
                    warn!("Parsing {} failed: {}", filename, error);
                    self.discard_source(source);
                    progress.report(ProgressEvent::Failed {
                        error: error.to_string(),
                    });
                    return JobOutcome::failed(&error, JobResult::aborted(error.to_string()));
                }
            }
        };

        let total = records.len();
        progress.report(ProgressEvent::Started { total });

        let mut tracker = ProgressTracker::new(total);
        let mut stats = MultiValueStats::new(&self.config.multi_value_fields);
        let mut outcomes = Vec::with_capacity(total);

        {
            let _step = info_span!("process_records", total).entered();
            for (index, record) in records.iter().enumerate() {
                let row = index + 1;
                stats.observe(record);

                let success = match self.processor.process(record) {
                    Ok(data) => {
                        tracker.record_success();
                        outcomes.push(RecordOutcome::success(row, data));
                        true
                    }
                    Err(e) => {
                        warn!("Record {} of {} failed: {}", row, filename, e);
                        tracker.record_failure();
                        outcomes.push(RecordOutcome::failure(row, e.to_string()));
                        false
                    }
                };

                progress.report(ProgressEvent::Record {
                    row,
                    success,
                    processed: tracker.processed(),
                    failed: tracker.failed(),
                    total,
                    progress: tracker.progress(),
                });
            }
        }

        let mut result = JobResult {
            processed: tracker.processed(),
            failed: tracker.failed(),
            total,
            records: outcomes,
            summary: stats.finish(),
            error: None,
        };

        {
            let _step = info_span!("release_source").entered();
            if let Err(e) = release_file(source) {
                let error = PipelineError::from(e);
                warn!("{}", error);
                result.error = Some(error.to_string());
                progress.report(ProgressEvent::Failed {
                    error: error.to_string(),
                });
                return JobOutcome::failed(&error, result);
            }
        }

        debug!(
            "Finished {}: {} processed, {} failed of {}",
            filename, result.processed, result.failed, result.total
        );
        progress.report(ProgressEvent::Completed {
            processed: result.processed,
            failed: result.failed,
            total: result.total,
        });
        JobOutcome::Completed(result)
    }

    /// Removes the upload of a failed job unless failed uploads are retained.
    pub fn discard_source(&self, source: &Path) {
        if self.config.retain_failed_uploads {
            debug!("Keeping {} for inspection", sanitize::redact_path(source));
            return;
        }
        if let Err(e) = release_file(source) {
            warn!("Failed to release {}: {}", sanitize::redact_path(source), e);
        }
    }
}
