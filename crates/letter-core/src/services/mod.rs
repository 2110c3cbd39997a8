//! Service modules for letter generation

pub mod field_binder;
pub mod letter_generator;
pub mod sequence;
pub mod signature_selector;
pub mod template_resolver;

// Re-export service types
pub use field_binder::FieldBinder;
pub use letter_generator::{LetterGenerator, LetterPreview, SYSTEM_ACTOR};
pub use sequence::LetterNumberSequence;
pub use signature_selector::SignatureSelector;
pub use template_resolver::TemplateResolver;
