//! Report sink that writes stage outcomes to the log.

use async_trait::async_trait;
use tracing::info;

use crate::error::Result;
use crate::report::{ReportSink, StageOutcome, StageStatus};

/// Logs every stage outcome at info level. Cannot fail.
pub struct LogReportSink;

#[async_trait]
impl ReportSink for LogReportSink {
    async fn record(&self, entity: &str, outcome: &StageOutcome) -> Result<()> {
        let status = match outcome.status {
            StageStatus::Passed => "passed",
            StageStatus::Failed => "failed",
        };
        let counts: Vec<String> = outcome
            .counts
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        info!(
            "{}: {} {} in {} ms [{}]",
            entity,
            outcome.stage.as_str(),
            status,
            outcome.duration_ms,
            counts.join(", ")
        );
        Ok(())
    }
}
