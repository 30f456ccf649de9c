//! # Request Progress
//!
//! Estimates how far along a request is as a single fraction in `[0, 1]`.
//!
//! A request is split into an upload phase (skipped when there is no body) and a
//! download phase. Before any bytes move, each phase creeps forward with elapsed
//! time towards a bounded warm-up share, so that a slow server still shows
//! activity. Once bytes arrive the warm-up value is frozen and the rest of the
//! phase tracks the byte counts. When the total size is unknown the byte share
//! approaches but never reaches completion.
//!
//! The reported value never decreases and is forced to exactly `1.0` when the
//! request completes.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Transfer counters reported by a transport.
///
/// Totals are `None` (or negative) when unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestTransferMetrics {
    pub request_bytes_sent: u64,
    pub request_bytes_total: Option<i64>,
    pub response_bytes_received: u64,
    pub response_bytes_total: Option<i64>,
    /// Set once the server has started answering, which ends the upload phase.
    pub response_started: bool,
}

impl RequestTransferMetrics {
    fn known(total: Option<i64>) -> Option<u64> {
        total.and_then(|t| u64::try_from(t).ok())
    }

    fn upload_finished(&self) -> bool {
        self.response_started
            || Self::known(self.request_bytes_total)
                .is_some_and(|total| self.request_bytes_sent >= total)
    }
}

/// Tuning for the progress estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Relative weight of the upload phase.
    pub upload_weight: f64,
    /// Relative weight of the download phase. Heavier than upload by default.
    pub download_weight: f64,
    /// Largest share of a phase that elapsed time alone can account for.
    pub warmup_ceiling: f64,
    /// Time for the warm-up to reach half of its ceiling.
    pub warmup_half_life: Duration,
    /// Byte count at which a phase of unknown size is considered half done.
    pub unknown_total_half_point: u64,
    /// How often in-flight requests refresh their estimate.
    pub tick_interval: Duration,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            upload_weight: 0.2,
            download_weight: 0.8,
            warmup_ceiling: 0.25,
            warmup_half_life: Duration::from_millis(750),
            unknown_total_half_point: 64 * 1024,
            tick_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Phase {
    started_at: Option<Instant>,
    frozen_warmup: Option<f64>,
    fraction: f64,
}

impl Phase {
    fn start(&mut self, at: Instant) {
        self.started_at.get_or_insert(at);
    }

    fn warmup(&self, now: Instant, config: &ProgressConfig) -> f64 {
        let Some(started_at) = self.started_at else {
            return 0.0;
        };
        let half_life = config.warmup_half_life.as_secs_f64();
        if half_life <= 0.0 {
            return config.warmup_ceiling;
        }
        let elapsed = now.saturating_duration_since(started_at).as_secs_f64();
        config.warmup_ceiling * (1.0 - 0.5f64.powf(elapsed / half_life))
    }

    fn advance(&mut self, now: Instant, done: u64, total: Option<u64>, config: &ProgressConfig) -> f64 {
        let estimate = if done == 0 && self.frozen_warmup.is_none() {
            self.warmup(now, config)
        } else {
            let warmup = match self.frozen_warmup {
                Some(value) => value,
                None => {
                    let value = self.warmup(now, config);
                    self.frozen_warmup = Some(value);
                    value
                }
            };
            let bytes = match total {
                Some(0) => 1.0,
                Some(total) => done as f64 / total as f64,
                None => done as f64 / (done + config.unknown_total_half_point.max(1)) as f64,
            };
            warmup + (1.0 - warmup) * bytes.min(1.0)
        };

        self.fraction = self.fraction.max(estimate.clamp(0.0, 1.0));
        self.fraction
    }

    fn finish(&mut self) {
        self.fraction = 1.0;
    }
}

/// Progress of a single physical request.
#[derive(Debug, Clone)]
pub struct ProgressEstimator {
    config: ProgressConfig,
    has_body: bool,
    started_at: Instant,
    upload: Phase,
    download: Phase,
    reported: f64,
    completed: bool,
}

impl ProgressEstimator {
    pub fn new(config: ProgressConfig, has_body: bool) -> Self {
        Self::started_at(config, has_body, Instant::now())
    }

    pub fn started_at(config: ProgressConfig, has_body: bool, at: Instant) -> Self {
        Self {
            config,
            has_body,
            started_at: at,
            upload: Phase::default(),
            download: Phase::default(),
            reported: 0.0,
            completed: false,
        }
    }

    pub fn update(&mut self, metrics: &RequestTransferMetrics) -> f64 {
        self.update_at(metrics, Instant::now())
    }

    /// Recomputes the estimate as of `now`.
    pub fn update_at(&mut self, metrics: &RequestTransferMetrics, now: Instant) -> f64 {
        if self.completed {
            return self.reported;
        }

        let upload_weight = if self.has_body {
            self.config.upload_weight.max(0.0)
        } else {
            0.0
        };
        let download_weight = self.config.download_weight.max(0.0);

        let upload = if !self.has_body {
            1.0
        } else {
            self.upload.start(self.started_at);
            if metrics.upload_finished() {
                self.upload.finish();
                1.0
            } else {
                self.upload.advance(
                    now,
                    metrics.request_bytes_sent,
                    RequestTransferMetrics::known(metrics.request_bytes_total),
                    &self.config,
                )
            }
        };

        let download = if upload >= 1.0 {
            self.download
                .start(if self.has_body { now } else { self.started_at });
            self.download.advance(
                now,
                metrics.response_bytes_received,
                RequestTransferMetrics::known(metrics.response_bytes_total),
                &self.config,
            )
        } else {
            0.0
        };

        let total_weight = upload_weight + download_weight;
        let overall = if total_weight > 0.0 {
            (upload_weight * upload + download_weight * download) / total_weight
        } else {
            download
        };

        self.reported = self.reported.max(overall.clamp(0.0, 1.0));
        self.reported
    }

    /// Forces the estimate to completion.
    pub fn complete(&mut self) -> f64 {
        self.completed = true;
        self.reported = 1.0;
        self.reported
    }

    pub fn fraction(&self) -> f64 {
        self.reported
    }

    pub fn is_complete(&self) -> bool {
        self.completed
    }
}
