//! Routes uploaded files to the queue for their type.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::error::DispatchError;
use crate::queue::{JobHandle, JobPayload, QueueSet, QueueType};
use crate::sanitize;
use crate::storage::UploadStore;

/// Picks the queue for a file by its extension, ignoring case.
pub fn classify(filename: &str) -> Result<QueueType, DispatchError> {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(QueueType::from_extension)
        .ok_or_else(|| DispatchError::UnsupportedFileType(filename.to_string()))
}

#[derive(Clone)]
pub struct Dispatcher {
    queues: QueueSet,
    uploads: UploadStore,
    max_upload_bytes: usize,
}

impl Dispatcher {
    pub fn new(queues: QueueSet, uploads: UploadStore, max_upload_bytes: usize) -> Self {
        Self {
            queues,
            uploads,
            max_upload_bytes,
        }
    }

    pub fn from_config(queues: QueueSet, config: &Config) -> Self {
        Self::new(
            queues,
            UploadStore::new(&config.uploads.directory),
            config.uploads.max_bytes,
        )
    }

    pub fn queues(&self) -> &QueueSet {
        &self.queues
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    /// Creates a waiting job for a file already on disk. The content is not
    /// inspected; parsing problems surface when a worker runs the job.
    pub fn enqueue(&self, file_path: PathBuf, original_name: &str) -> Result<JobHandle, DispatchError> {
        let queue_type = classify(original_name)?;
        let job = self
            .queues
            .get(queue_type)
            .add(JobPayload::new(file_path, original_name))?;
        log::info!(
            "Enqueued {} as {} job {}",
            sanitize::sanitize_filename(original_name),
            queue_type,
            job.id
        );
        Ok(job.handle())
    }

    /// Creates a job held back until `until`.
    pub fn enqueue_delayed(
        &self,
        file_path: PathBuf,
        original_name: &str,
        until: DateTime<Utc>,
    ) -> Result<JobHandle, DispatchError> {
        let queue_type = classify(original_name)?;
        let job = self
            .queues
            .get(queue_type)
            .add_delayed(JobPayload::new(file_path, original_name), until)?;
        log::info!("Scheduled {} job {} for {}", queue_type, job.id, until);
        Ok(job.handle())
    }

    /// Validates, stores and enqueues an uploaded file.
    pub fn submit(&self, content: &[u8], original_name: &str) -> Result<JobHandle, DispatchError> {
        classify(original_name)?;
        if content.len() > self.max_upload_bytes {
            return Err(DispatchError::FileTooLarge {
                size: content.len(),
                limit: self.max_upload_bytes,
            });
        }

        let path = self.uploads.save(content, original_name)?;
        match self.enqueue(path.clone(), original_name) {
            Ok(handle) => Ok(handle),
            Err(e) => {
                if let Err(release_err) = self.uploads.release(&path) {
                    log::warn!("Failed to remove orphaned upload: {}", release_err);
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use super::*;
    use crate::queue::{Job, JobId, JobQueue, JobResult, JobState, QueueError, StateCounts};

    #[test]
    fn test_classify() {
        assert_eq!(classify("items.csv").unwrap(), QueueType::Csv);
        assert_eq!(classify("ITEMS.CSV").unwrap(), QueueType::Csv);
        assert_eq!(classify("book.xlsx").unwrap(), QueueType::Excel);
        assert_eq!(classify("legacy.Xls").unwrap(), QueueType::Excel);
        assert!(matches!(
            classify("report.pdf"),
            Err(DispatchError::UnsupportedFileType(_))
        ));
        assert!(classify("csv").is_err());
        assert!(classify("archive.csv.zip").is_err());
    }

    fn dispatcher(dir: &Path, limit: usize) -> Dispatcher {
        Dispatcher::new(QueueSet::in_memory(), UploadStore::new(dir), limit)
    }

    #[test]
    fn test_submit_routes_by_type() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(dir.path(), 1024);

        let csv = dispatcher.submit(b"A,B\n1,2\n", "items.csv").unwrap();
        let xlsx = dispatcher.submit(b"PK", "items.xlsx").unwrap();
        let csv2 = dispatcher.submit(b"A\n1\n", "more.csv").unwrap();

        assert_eq!((csv.queue_type, csv.id), (QueueType::Csv, 1));
        assert_eq!((xlsx.queue_type, xlsx.id), (QueueType::Excel, 1));
        assert_eq!(csv2.id, 2);

        let job = dispatcher.queues().get(QueueType::Csv).get(1).unwrap().unwrap();
        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.payload.original_name, "items.csv");
        assert!(job.payload.file_path.exists());
    }

    #[test]
    fn test_submit_rejects_before_storing() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(dir.path(), 4);

        assert!(matches!(
            dispatcher.submit(b"hello", "notes.txt"),
            Err(DispatchError::UnsupportedFileType(_))
        ));
        assert!(matches!(
            dispatcher.submit(b"A,B\n1,2\n", "items.csv"),
            Err(DispatchError::FileTooLarge { size: 8, limit: 4 })
        ));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_enqueue_delayed() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(dir.path(), 1024);
        let handle = dispatcher
            .enqueue_delayed(
                dir.path().join("x.csv"),
                "x.csv",
                Utc::now() + Duration::minutes(5),
            )
            .unwrap();
        let job = dispatcher
            .queues()
            .get(QueueType::Csv)
            .get(handle.id)
            .unwrap()
            .unwrap();
        assert_eq!(job.state, JobState::Delayed);
    }

    struct Unreachable(QueueType);

    impl JobQueue for Unreachable {
        fn queue_type(&self) -> QueueType {
            self.0
        }
        fn add(&self, _payload: JobPayload) -> Result<Job, QueueError> {
            Err(QueueError::Connection("refused".into()))
        }
        fn add_delayed(&self, _p: JobPayload, _u: DateTime<Utc>) -> Result<Job, QueueError> {
            Err(QueueError::Connection("refused".into()))
        }
        fn claim_next(&self) -> Result<Option<Job>, QueueError> {
            Err(QueueError::Connection("refused".into()))
        }
        fn get(&self, _id: JobId) -> Result<Option<Job>, QueueError> {
            Err(QueueError::Connection("refused".into()))
        }
        fn list_by_state(&self, _state: JobState) -> Result<Vec<Job>, QueueError> {
            Err(QueueError::Connection("refused".into()))
        }
        fn counts(&self) -> Result<StateCounts, QueueError> {
            Err(QueueError::Connection("refused".into()))
        }
        fn update_progress(&self, _id: JobId, _p: u8) -> Result<(), QueueError> {
            Err(QueueError::Connection("refused".into()))
        }
        fn complete(&self, _id: JobId, _r: JobResult) -> Result<Job, QueueError> {
            Err(QueueError::Connection("refused".into()))
        }
        fn fail(&self, _id: JobId, _reason: &str, _r: JobResult) -> Result<Job, QueueError> {
            Err(QueueError::Connection("refused".into()))
        }
        fn fail_stalled(&self, _b: DateTime<Utc>, _reason: &str) -> Result<Vec<Job>, QueueError> {
            Err(QueueError::Connection("refused".into()))
        }
    }

    #[test]
    fn test_failed_enqueue_removes_stored_file() {
        let dir = tempfile::tempdir().unwrap();
        let queues = QueueSet::new(
            Arc::new(Unreachable(QueueType::Csv)),
            Arc::new(Unreachable(QueueType::Excel)),
        );
        let dispatcher = Dispatcher::new(queues, UploadStore::new(dir.path()), 1024);

        let err = dispatcher.submit(b"A\n1\n", "items.csv").unwrap_err();
        assert!(matches!(err, DispatchError::Queue(QueueError::Connection(_))));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
