//! Measurement loop: probe, measure, write, sleep.
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

pub mod clock;
pub mod probe;
pub mod speedtest;

pub use clock::{Clock, SystemClock};
pub use probe::{PingProbe, ReachabilityProbe};
pub use speedtest::{SpeedMeter, SpeedtestCli};

use crate::config::{PollerSettings, Schedule};
use crate::error::{CycleError, ProbeError};
use crate::record::{MeasurementRecord, Status, from_live_result, offline_record};
use crate::storage::{LIVE_BATCH_SIZE, TimeSeriesBackend, write_batches};

/// Poller states. `Writing` carries the status of the record being written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    CheckingReachability,
    Measuring,
    Writing(Status),
    Sleeping,
    ShuttingDown,
}

/// What a single cycle produced.
#[derive(Debug)]
pub struct CycleOutcome {
    pub record: MeasurementRecord,
    pub written: bool,
}

pub struct Poller {
    backend: Arc<dyn TimeSeriesBackend>,
    probe: Box<dyn ReachabilityProbe>,
    meter: Box<dyn SpeedMeter>,
    clock: Arc<dyn Clock>,
    schedule: Schedule,
    run_immediately: bool,
    error_cooldown: Duration,
}

impl Poller {
    pub fn new(
        settings: &PollerSettings,
        backend: Arc<dyn TimeSeriesBackend>,
        probe: Box<dyn ReachabilityProbe>,
        meter: Box<dyn SpeedMeter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            backend,
            probe,
            meter,
            clock,
            schedule: settings.schedule,
            run_immediately: settings.run_immediately,
            error_cooldown: settings.error_cooldown,
        }
    }

    /// Runs cycles until the shutdown channel fires or its sender is dropped.
    ///
    /// A cycle in progress is never interrupted; the signal is observed while
    /// sleeping and between cycles.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<()>) {
        let mut skip_sleep = self.run_immediately;
        let mut state = PollerState::Idle;

        loop {
            if !skip_sleep {
                let delay = self.schedule.delay_from(self.clock.now());
                let wake_at = self.clock.now()
                    + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
                state = self.transition(state, PollerState::Sleeping);
                info!(
                    wake_at = %wake_at,
                    delay_secs = delay.as_secs(),
                    "Next speedtest scheduled."
                );
                if self.sleep_or_shutdown(delay, &mut shutdown_rx).await {
                    break;
                }
                state = self.transition(state, PollerState::Idle);
            }
            skip_sleep = false;

            match self.run_cycle(&mut state).await {
                Ok(outcome) => {
                    if !outcome.written {
                        warn!(
                            status = ?outcome.record.status(),
                            "Measurement record was not persisted."
                        );
                    }
                    state = self.transition(state, PollerState::Idle);
                }
                Err(e) => {
                    error!(
                        error = %e,
                        cooldown_secs = self.error_cooldown.as_secs(),
                        "Unexpected error in measurement cycle."
                    );
                    state = self.transition(state, PollerState::Sleeping);
                    if self.sleep_or_shutdown(self.error_cooldown, &mut shutdown_rx).await {
                        break;
                    }
                    state = self.transition(state, PollerState::Idle);
                    skip_sleep = true;
                }
            }

            if shutdown_requested(&shutdown_rx) {
                break;
            }
        }

        self.transition(state, PollerState::ShuttingDown);
        info!("Measurement loop gracefully shut down.");
    }

    /// One probe → measure → write pass. Probe and measurement failures become
    /// offline records; only a probe that cannot run at all is an error.
    pub async fn run_cycle(&self, state: &mut PollerState) -> Result<CycleOutcome, CycleError> {
        *state = self.transition(*state, PollerState::CheckingReachability);

        let record = match self.probe.check().await {
            Ok(_) => {
                *state = self.transition(*state, PollerState::Measuring);
                self.measure().await
            }
            Err(e @ ProbeError::Socket(_)) => return Err(CycleError::Probe(e)),
            Err(e) => {
                warn!(error = %e, "Internet is offline.");
                offline_record(self.clock.now())
            }
        };

        *state = self.transition(*state, PollerState::Writing(record.status()));
        let report = write_batches(
            self.backend.as_ref(),
            std::slice::from_ref(&record),
            LIVE_BATCH_SIZE,
        )
        .await;
        let written = report.is_success();
        if written {
            info!(
                status = record.status().as_tag(),
                timestamp = %record.timestamp(),
                "Data written to InfluxDB."
            );
        } else if let Some(e) = report.first_error() {
            error!(error = %e, "Failed to write measurement to InfluxDB.");
        }

        Ok(CycleOutcome { record, written })
    }

    async fn measure(&self) -> MeasurementRecord {
        match self.meter.measure().await {
            Ok(result) => {
                let record = from_live_result(&result, self.clock.now());
                info!(
                    download_mbps = record.download_rate(),
                    upload_mbps = record.upload_rate(),
                    latency_ms = record.latency(),
                    "Speedtest completed."
                );
                record
            }
            Err(e) => {
                warn!(error = %e, "Speedtest failed.");
                offline_record(self.clock.now())
            }
        }
    }

    /// Returns true when shutdown was requested before `duration` elapsed.
    async fn sleep_or_shutdown(
        &self,
        duration: Duration,
        shutdown_rx: &mut watch::Receiver<()>,
    ) -> bool {
        if shutdown_requested(shutdown_rx) {
            return true;
        }
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                info!("Shutdown signal received while sleeping.");
                true
            }
            _ = self.clock.sleep(duration) => false,
        }
    }

    fn transition(&self, from: PollerState, to: PollerState) -> PollerState {
        tracing::trace!(?from, ?to, "Poller state change.");
        to
    }
}

fn shutdown_requested(shutdown_rx: &watch::Receiver<()>) -> bool {
    shutdown_rx.has_changed().unwrap_or(true)
}
