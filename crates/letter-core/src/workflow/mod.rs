//! Workflow management module

pub mod bulk;
pub mod dispatcher;
pub mod engine;
pub mod retry;
pub mod status_tracker;
pub mod trigger;

pub use bulk::{BulkCoordinator, ItemProcessor};
pub use dispatcher::LetterDispatcher;
pub use engine::{HealthReport, HealthStatus, LetterWorkflow, WorkflowSettings};
pub use retry::RetryManager;
pub use status_tracker::StatusTracker;
pub use trigger::{BulkTriggerInbox, TriggerOutcome};
