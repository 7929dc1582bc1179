use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::TelemetrySource;
use crate::error::FetchError;
use crate::metrics::{DeviceGauges, MetricKind, MetricsRegistry};
use crate::resolve::resolve_latest;

/// Outcome of polling a single device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceOutcome {
    Updated,
    /// Device info was applied but records could not be fetched.
    InfoOnly,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub updated: usize,
    pub info_only: usize,
    pub failed: usize,
}

impl CycleReport {
    fn record(&mut self, outcome: DeviceOutcome) {
        match outcome {
            DeviceOutcome::Updated => self.updated += 1,
            DeviceOutcome::InfoOnly => self.info_only += 1,
            DeviceOutcome::Failed => self.failed += 1,
        }
    }
}

pub struct Poller<S> {
    source: S,
    metrics: Arc<MetricsRegistry>,
    interval: Duration,
}

impl<S: TelemetrySource> Poller<S> {
    pub fn new(source: S, metrics: Arc<MetricsRegistry>, interval: Duration) -> Self {
        Self {
            source,
            metrics,
            interval,
        }
    }

    /// Runs the first cycle immediately, then one cycle per `interval` of idle time
    /// until `cancel` fires.
    pub fn start(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = self.run_cycle() => {}
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.interval) => {}
                }
            }
            info!("poller stopped");
        })
    }

    pub async fn run_cycle(&self) -> CycleReport {
        info!(devices = self.metrics.devices().len(), "fetch started");
        let started = Instant::now();
        let mut report = CycleReport::default();
        for gauges in self.metrics.devices() {
            report.record(self.poll_device(gauges).await);
        }
        info!(
            updated = report.updated,
            info_only = report.info_only,
            failed = report.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "fetch finished"
        );
        report
    }

    async fn poll_device(&self, gauges: &DeviceGauges) -> DeviceOutcome {
        let device = gauges.device();

        let info = match self.source.fetch_device_info(device).await {
            Ok(info) => info,
            Err(err) => {
                log_fetch_failure(device.activation_code(), "device info", &err);
                return DeviceOutcome::Failed;
            }
        };
        gauges.set(MetricKind::BatteryLevel, info.battery_level);
        gauges.set(MetricKind::SignalStrength, info.signal_strength as f64);
        gauges.set(MetricKind::Altitude, info.altitude);

        let records = match self.source.fetch_records(device).await {
            Ok(records) => records,
            Err(err) => {
                log_fetch_failure(device.activation_code(), "records", &err);
                return DeviceOutcome::InfoOnly;
            }
        };

        for kind in MetricKind::RECORD_KINDS {
            if let Some(semantic_type) = kind.semantic_type() {
                gauges.set(kind, resolve_latest(&records, &info, semantic_type));
            }
        }

        debug!(
            activation_code = %device.activation_code(),
            series = records.len(),
            "device metrics updated"
        );
        DeviceOutcome::Updated
    }
}

fn log_fetch_failure(activation_code: &str, what: &str, err: &FetchError) {
    warn!(
        activation_code,
        kind = err.kind(),
        error = %err,
        "fetching {what} failed"
    );
}
