//! Job lifecycle events for in-process subscribers.
//!
//! Publishing never blocks and never fails; queue state stays correct with no
//! subscriber attached.

pub mod job_events;

pub use job_events::{spawn_event_logger, JobEvent, JobEventBroadcaster, JobEventKind};
