//! Client modules for external collaborators

pub mod mailer;
pub mod renderer;
pub mod stub;

// Re-export all client types
pub use mailer::{EmailAttachment, EmailDispatcher, EmailMessage, HttpMailer};
pub use renderer::{DocumentRenderer, HttpRenderer, RenderRequest};
pub use stub::{StubMailer, StubRenderer};
