//! Core abstractions for store-agnostic migration.
//!
//! - [`value`]: Identifier and field value representation
//! - [`record`]: Source rows, target records, per-entity extraction
//! - [`traits`]: Seams for readers, writers, and identity lookup
//!
//! Everything above this module (graph passes, pipeline, runner) is written
//! against these types only; concrete stores are injected by the caller.

pub mod record;
pub mod traits;
pub mod value;

// Re-export commonly used types for convenience
pub use record::{Extraction, SourceRow, TargetRecord};
pub use traits::{Identity, IdentitySource, SourceReader, TargetWriter};
pub use value::{Id, Value};
