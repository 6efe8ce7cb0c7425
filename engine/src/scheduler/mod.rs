//! Batch scheduler
//!
//! Picks up to `max_artifacts` pending artifacts and feeds them to a lane in
//! fixed-size batches. Every artifact in a batch runs concurrently; the next
//! batch starts only when the whole batch has settled. One artifact's failure
//! never stops its siblings or later batches.

use anyhow::Result;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::db::ArtifactRepository;
use crate::lanes::{ArtifactLane, LaneOutcome};

/// Tally of one scheduler pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Size of each batch, in execution order
    pub batch_sizes: Vec<usize>,
    pub completed: usize,
    pub failed: usize,
    /// Claimed by another run before this one got to it
    pub skipped: usize,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.completed + self.failed + self.skipped
    }
}

pub struct BatchScheduler {
    repo: Arc<ArtifactRepository>,
    lane: Arc<dyn ArtifactLane>,
    batch_size: usize,
    max_artifacts: usize,
}

impl BatchScheduler {
    pub fn new(
        repo: Arc<ArtifactRepository>,
        lane: Arc<dyn ArtifactLane>,
        batch_size: usize,
        max_artifacts: usize,
    ) -> Self {
        Self {
            repo,
            lane,
            batch_size: batch_size.max(1),
            max_artifacts,
        }
    }

    /// Process pending artifacts. Errors only when the pending set cannot be
    /// read; per-artifact outcomes go into the report.
    pub async fn run(&self) -> Result<BatchReport> {
        let pending = self.repo.get_pending(self.max_artifacts as i64).await?;
        let mut report = BatchReport::default();

        if pending.is_empty() {
            info!("No pending artifacts");
            return Ok(report);
        }

        let batch_count = pending.len().div_ceil(self.batch_size);
        info!(
            "Processing {} pending artifacts in {} batches of up to {}",
            pending.len(),
            batch_count,
            self.batch_size
        );

        for (index, batch) in pending.chunks(self.batch_size).enumerate() {
            info!("Batch {}/{}: {} artifacts", index + 1, batch_count, batch.len());
            report.batch_sizes.push(batch.len());

            let outcomes = join_all(
                batch
                    .iter()
                    .cloned()
                    .map(|artifact| self.lane.process(artifact)),
            )
            .await;

            for outcome in outcomes {
                match outcome {
                    LaneOutcome::Completed { .. } => report.completed += 1,
                    LaneOutcome::Failed(message) => {
                        warn!("Artifact failed: {}", message);
                        report.failed += 1;
                    }
                    LaneOutcome::Skipped => report.skipped += 1,
                }
            }
        }

        info!(
            "Batch run finished: {} completed, {} failed, {} skipped",
            report.completed, report.failed, report.skipped
        );
        Ok(report)
    }
}
