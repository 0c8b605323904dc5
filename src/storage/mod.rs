//! Time-series backend seam and the batched write discipline on top of it.
use async_trait::async_trait;

use crate::error::BackendError;

pub mod batch;
pub mod influx;
pub mod point;

pub use batch::{BatchReport, DEFAULT_BATCH_SIZE, LIVE_BATCH_SIZE, write_batches};
pub use influx::InfluxBackend;
pub use point::{FieldValue, Point};

/// Write/query interface of the time-series store.
#[async_trait]
pub trait TimeSeriesBackend: Send + Sync {
    /// Verifies the backend answers. Called once at startup.
    async fn health(&self) -> Result<(), BackendError>;

    /// Submits one batch as a single write call.
    async fn write_points(&self, points: Vec<Point>) -> Result<(), BackendError>;

    /// Total number of stored measurement points.
    async fn count_records(&self) -> Result<u64, BackendError>;
}
