/// Events emitted while a job runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Started {
        total: usize,
    },
    /// Emitted after every record, successful or not.
    Record {
        row: usize,
        success: bool,
        processed: usize,
        failed: usize,
        total: usize,
        progress: u8,
    },
    Completed {
        processed: usize,
        failed: usize,
        total: usize,
    },
    Failed {
        error: String,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Counts record outcomes for one job and derives its percentage.
///
/// The percentage is `floor((processed + failed) / total * 100)` and never
/// decreases.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total: usize,
    processed: usize,
    failed: usize,
    progress: u8,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            processed: 0,
            failed: 0,
            progress: 0,
        }
    }

    pub fn record_success(&mut self) -> u8 {
        self.processed += 1;
        self.recompute()
    }

    pub fn record_failure(&mut self) -> u8 {
        self.failed += 1;
        self.recompute()
    }

    fn recompute(&mut self) -> u8 {
        self.progress = self.progress.max(percent(self.processed + self.failed, self.total));
        self.progress
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn is_finished(&self) -> bool {
        self.processed + self.failed >= self.total
    }
}

/// Whole percent of `done` out of `total`, rounded down. An empty job is done.
pub fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let done = done.min(total) as u128;
    (done * 100 / total as u128) as u8
}
