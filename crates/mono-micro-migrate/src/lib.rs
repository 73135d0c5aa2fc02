//! # mono-micro-migrate
//!
//! Library for migrating entity data out of a shared monolith database
//! into per-service stores.
//!
//! Each entity runs a fixed pipeline of extract, validate, transform,
//! validate, load, and verify, with support for:
//!
//! - **Identifier remapping** with preserve, sequence, and UUID strategies
//! - **Graph reconstruction** for self-referential trees and embedded joins
//! - **Loosely coupled entities** that probe their dependencies instead of
//!   being cancelled by them
//! - **Idempotent loading** via clear-then-reload and sequence resync
//! - **Structured reports** per stage, per entity, and per run
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use mono_micro_migrate::stores::{MemorySource, MemoryTarget};
//! use mono_micro_migrate::{MigrationPlan, MigrationRunner, RunOptions};
//!
//! #[tokio::main]
//! async fn main() -> mono_micro_migrate::Result<()> {
//!     let plan = MigrationPlan::load("plan.yaml")?;
//!     let runner = MigrationRunner::new(plan, Arc::new(MemorySource::new()))
//!         .with_target("user-db", Arc::new(MemoryTarget::relational()));
//!     let report = runner.run(RunOptions::default()).await?;
//!     println!("Loaded {} records", report.records_loaded);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod graph;
pub mod lookup;
pub mod mapping;
pub mod pipeline;
pub mod report;
pub mod runner;
pub mod stores;

// Re-exports for convenient access
pub use crate::core::{
    Extraction, Id, Identity, IdentitySource, SourceReader, SourceRow, TargetRecord, TargetWriter,
    Value,
};
pub use config::{EntitySpec, IdStrategy, MigrationPlan, MissingRefPolicy, Relation};
pub use error::{MigrateError, Result};
pub use lookup::LookupCache;
pub use mapping::IdentityMap;
pub use pipeline::{EntityMapper, EntityPipeline, RunContext, TransformContext};
pub use report::{
    EntityReport, EntityStatus, ReportSink, RunReport, Stage, StageOutcome, StageStatus,
};
pub use runner::{MigrationRunner, RunOptions};
