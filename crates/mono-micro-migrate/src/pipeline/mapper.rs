//! The per-entity mapping seam.
//!
//! One [`EntityMapper`] implementation exists per entity and owns the
//! behavioral side of its migration: source sanity checks and the row
//! transform. The pipeline owns everything mechanical around it
//! (extraction, id allocation, relationship passes, loading, validation).

use async_trait::async_trait;

use crate::core::{Extraction, SourceRow, TargetRecord};
use crate::error::Result;
use crate::lookup::LookupCache;
use crate::pipeline::TransformContext;

/// Behavior of one entity's migration.
///
/// Implementations must be stateless across rows; anything a row needs
/// from outside arrives through the [`TransformContext`].
#[async_trait]
pub trait EntityMapper: Send + Sync {
    /// The plan entity this mapper implements.
    fn entity(&self) -> &str;

    /// Warm the lookup cache before any row transforms.
    ///
    /// Called once per run with the full extraction, so a mapper can batch
    /// every natural key it will need into one service round trip. The
    /// default prefetches nothing.
    async fn prefetch(&self, _extraction: &Extraction, _lookup: &mut LookupCache) -> Result<()> {
        Ok(())
    }

    /// Check the extracted source rows before anything is transformed.
    ///
    /// Returned messages are validation problems; any problem fails the
    /// entity before transform. The default accepts everything.
    fn validate_source(&self, _extraction: &Extraction) -> Vec<String> {
        Vec::new()
    }

    /// Transform one source row into a target record.
    ///
    /// The record must carry `ctx.new_id()` as its id. Returning `Ok(None)`
    /// drops the row deliberately (its id allocation stays in place so
    /// references to it still resolve and get caught downstream). Errors
    /// fail the whole entity.
    fn transform_row(
        &self,
        row: &SourceRow,
        ctx: &mut TransformContext<'_>,
    ) -> Result<Option<TargetRecord>>;

    /// Check one finished record, relationship fields included.
    ///
    /// Runs during post-transform validation, after the relationship
    /// passes. Entity-specific shape checks beyond what the pipeline
    /// already enforces (id presence, id uniqueness, reference closure).
    /// The default accepts everything.
    fn validate_record(&self, _record: &TargetRecord) -> Vec<String> {
        Vec::new()
    }
}
