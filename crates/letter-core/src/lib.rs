//! Letter Core Library
//!
//! Generation and delivery workflow for employee letters: template
//! resolution, field binding, rendering, numbering, the letter status state
//! machine, bulk fan-out and retries.

pub mod clients;
pub mod config;
pub mod error;
pub mod paths;
pub mod services;
pub mod store;
pub mod workflow;

// Re-export main types for easy access
pub use config::LetterConfig;
pub use error::{ErrorKind, LetterError, Result};

// Re-export all client types
pub use clients::{
    DocumentRenderer, EmailDispatcher, HttpMailer, HttpRenderer, StubMailer, StubRenderer,
};

pub use store::{FileStore, LetterStore, MemoryStore};

// Re-export service types
pub use services::{LetterGenerator, LetterPreview};

// Re-export workflow types
pub use workflow::{
    BulkCoordinator, BulkTriggerInbox, HealthReport, HealthStatus, LetterDispatcher,
    LetterWorkflow, RetryManager, StatusTracker, TriggerOutcome, WorkflowSettings,
};
