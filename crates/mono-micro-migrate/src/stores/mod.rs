//! Store implementations.
//!
//! Production deployments implement [`SourceReader`] and [`TargetWriter`]
//! over their actual databases and register them with the runner. This
//! module ships the in-memory implementations used by tests, dry runs, and
//! plan rehearsals, plus the logging report sink.
//!
//! [`SourceReader`]: crate::core::SourceReader
//! [`TargetWriter`]: crate::core::TargetWriter

mod log;
mod memory;

pub use log::LogReportSink;
pub use memory::{
    MemoryIdentitySource, MemoryReportSink, MemorySource, MemoryTarget, NullIdentitySource,
};
