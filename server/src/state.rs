use std::sync::Arc;

use chrono::{DateTime, Utc};
use sheetflow::queue::{QueueError, QueueSet};
use sheetflow::{Config, Dispatcher, QueryService};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    dispatcher: Dispatcher,
    query: QueryService,
    started_at: DateTime<Utc>,
}

impl AppState {
    /// Serves queries from the same queues the dispatcher writes to.
    pub fn new(dispatcher: Dispatcher) -> Self {
        let query = QueryService::new(dispatcher.queues().clone());
        Self {
            inner: Arc::new(AppStateInner {
                dispatcher,
                query,
                started_at: Utc::now(),
            }),
        }
    }

    /// Connects to the configured queue backend.
    pub fn from_config(config: &Config) -> Result<Self, QueueError> {
        let queues = QueueSet::connect(&config.queue_url)?;
        Ok(Self::new(Dispatcher::from_config(queues, config)))
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn query(&self) -> &QueryService {
        &self.inner.query
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }
}
