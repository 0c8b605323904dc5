use tracing::{debug, error, info};

use super::{Point, TimeSeriesBackend};
use crate::error::BatchWriteError;
use crate::record::MeasurementRecord;

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const LIVE_BATCH_SIZE: usize = 1;

/// Outcome of one [`write_batches`] call.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Records contained in batches that were accepted.
    pub written: usize,
    /// Batches submitted, successful or not.
    pub batches: usize,
    pub failures: Vec<BatchWriteError>,
}

impl BatchReport {
    pub fn success_count(&self) -> usize {
        self.written
    }

    pub fn first_error(&self) -> Option<&BatchWriteError> {
        self.failures.first()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Writes `records` in contiguous batches of at most `batch_size`.
///
/// Each batch is one backend call. A failed batch is recorded and the
/// remaining batches are still attempted; nothing is retried here.
pub async fn write_batches(
    backend: &dyn TimeSeriesBackend,
    records: &[MeasurementRecord],
    batch_size: usize,
) -> BatchReport {
    let batch_size = batch_size.max(1);
    let total_batches = records.len().div_ceil(batch_size);
    let mut report = BatchReport::default();

    for (batch_index, chunk) in records.chunks(batch_size).enumerate() {
        let points: Vec<Point> = chunk.iter().map(Point::from).collect();
        report.batches += 1;

        match backend.write_points(points).await {
            Ok(()) => {
                report.written += chunk.len();
                if total_batches > 1 {
                    info!(
                        batch = batch_index + 1,
                        total_batches,
                        size = chunk.len(),
                        "Wrote batch."
                    );
                } else {
                    debug!(size = chunk.len(), "Wrote batch.");
                }
            }
            Err(e) => {
                error!(
                    batch = batch_index + 1,
                    total_batches,
                    size = chunk.len(),
                    error = %e,
                    "Failed to write batch."
                );
                report.failures.push(BatchWriteError {
                    batch_index,
                    size: chunk.len(),
                    source: e,
                });
            }
        }
    }

    report
}
