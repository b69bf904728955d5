//! Progress sampling and arbitration between client-measured and
//! server-reported progress

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::time::Instant;

use crate::config::UploaderConfig;

/// Which estimate drives the displayed progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProgressSource {
    #[default]
    Frontend,
    Backend,
}

/// One observation of cumulative transferred bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSample {
    /// Milliseconds since the task's clock origin
    pub timestamp_ms: u64,
    /// Cumulative bytes
    pub bytes: u64,
    /// Total bytes expected
    pub total: u64,
}

impl ProgressSample {
    pub fn new(timestamp_ms: u64, bytes: u64, total: u64) -> Self {
        Self {
            timestamp_ms,
            bytes,
            total,
        }
    }

    /// Raw percentage, unbounded by any display cap
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.bytes as f64 * 100.0 / self.total as f64).min(100.0)
    }

    pub fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.bytes)
    }
}

/// Monotonic millisecond clock anchored at task start
#[derive(Debug, Clone, Copy)]
pub struct ProgressClock {
    origin: Instant,
}

impl ProgressClock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Rolling window of samples producing a moving-average speed
#[derive(Debug, Clone)]
pub struct ProgressSampler {
    window: usize,
    points: VecDeque<ProgressSample>,
}

impl ProgressSampler {
    /// `window` is the number of instantaneous rates averaged
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            points: VecDeque::with_capacity(window + 1),
        }
    }

    pub fn record(&mut self, sample: ProgressSample) {
        if let Some(last) = self.points.back_mut() {
            if sample.bytes < last.bytes {
                // Counter went backwards: the old rates no longer describe this transfer
                self.points.clear();
            } else if sample.timestamp_ms <= last.timestamp_ms {
                *last = sample;
                return;
            }
        }

        self.points.push_back(sample);
        while self.points.len() > self.window + 1 {
            self.points.pop_front();
        }
    }

    pub fn reset(&mut self) {
        self.points.clear();
    }

    pub fn last(&self) -> Option<ProgressSample> {
        self.points.back().copied()
    }

    /// Mean of per-interval rates in bytes/sec; 0 until two points exist
    pub fn speed(&self) -> f64 {
        let rates: Vec<f64> = self
            .points
            .iter()
            .zip(self.points.iter().skip(1))
            .filter(|(a, b)| b.timestamp_ms > a.timestamp_ms)
            .map(|(a, b)| {
                let secs = (b.timestamp_ms - a.timestamp_ms) as f64 / 1000.0;
                (b.bytes - a.bytes) as f64 / secs
            })
            .collect();

        if rates.is_empty() {
            return 0.0;
        }
        rates.iter().sum::<f64>() / rates.len() as f64
    }

    /// Seconds left at the current speed, or `None` when that would be
    /// zero, infinite or meaningless
    pub fn eta_seconds(&self) -> Option<f64> {
        let last = self.last()?;
        let speed = self.speed();
        let remaining = last.remaining();
        if speed > 0.0 && remaining > 0 {
            Some(remaining as f64 / speed)
        } else {
            None
        }
    }
}

/// Input to the arbiter's reducer
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressInput {
    /// Bytes handed to the transport
    Frontend(ProgressSample),
    /// Bytes the server reports as stored
    Backend(ProgressSample),
    /// The server channel went away
    ChannelLost,
    /// The transfer switched to a mode without client-side accounting
    FrontendUnavailable,
}

/// Which source currently drives the display, with its latest sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SourceState {
    Idle,
    Frontend(ProgressSample),
    /// No client-side accounting and nothing from the server yet
    Indeterminate,
    /// Terminal: never leaves this state for the rest of the task
    Backend(ProgressSample),
}

/// Merged progress for display
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// 0-100
    pub progress: f64,
    pub uploaded_bytes: u64,
    /// Smoothed bytes/sec
    pub speed: f64,
    pub eta_seconds: Option<f64>,
    pub source: ProgressSource,
    pub indeterminate: bool,
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self {
            progress: 0.0,
            uploaded_bytes: 0,
            speed: 0.0,
            eta_seconds: None,
            source: ProgressSource::Frontend,
            indeterminate: false,
        }
    }
}

/// Merges both progress sources into one authoritative snapshot per task
#[derive(Debug, Clone)]
pub struct ProgressArbiter {
    state: SourceState,
    frontend: ProgressSampler,
    backend: ProgressSampler,
    frontend_cap: f64,
    backend_cap: f64,
    frontend_progress: Option<f64>,
    backend_progress: Option<f64>,
    /// Set once client-side accounting is gone for this run
    frontend_closed: bool,
}

impl ProgressArbiter {
    pub fn new(config: &UploaderConfig) -> Self {
        Self {
            state: SourceState::Idle,
            frontend: ProgressSampler::new(config.frontend_window),
            backend: ProgressSampler::new(config.backend_window),
            frontend_cap: config.frontend_cap.min(99.0),
            backend_cap: config.backend_cap.min(99.9),
            frontend_progress: None,
            backend_progress: None,
            frontend_closed: false,
        }
    }

    pub fn state(&self) -> SourceState {
        self.state
    }

    pub fn source(&self) -> ProgressSource {
        match self.state {
            SourceState::Backend(_) => ProgressSource::Backend,
            _ => ProgressSource::Frontend,
        }
    }

    /// Client estimate, already capped
    pub fn frontend_progress(&self) -> Option<f64> {
        self.frontend_progress
    }

    /// Server estimate, raw
    pub fn backend_progress(&self) -> Option<f64> {
        self.backend_progress
    }

    /// Apply one input. Returns the new snapshot when the display changes.
    pub fn reduce(&mut self, input: ProgressInput) -> Option<ProgressSnapshot> {
        match input {
            ProgressInput::Frontend(sample) => {
                if self.frontend_closed {
                    // Late sample from the abandoned streaming attempt
                    return None;
                }
                self.frontend.record(sample);
                self.frontend_progress = Some(sample.percent().min(self.frontend_cap));
                if matches!(self.state, SourceState::Backend(_)) {
                    return None;
                }
                self.state = SourceState::Frontend(sample);
            }
            ProgressInput::Backend(sample) => {
                self.backend.record(sample);
                self.backend_progress = Some(sample.percent());
                self.state = SourceState::Backend(sample);
            }
            ProgressInput::ChannelLost => {
                // Without a backend sample the display already runs on the frontend side
                return None;
            }
            ProgressInput::FrontendUnavailable => {
                self.frontend_closed = true;
                if matches!(self.state, SourceState::Backend(_)) {
                    return None;
                }
                self.frontend.reset();
                self.state = SourceState::Indeterminate;
            }
        }
        Some(self.snapshot())
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        match self.state {
            SourceState::Idle => ProgressSnapshot::default(),
            SourceState::Indeterminate => ProgressSnapshot {
                indeterminate: true,
                ..ProgressSnapshot::default()
            },
            SourceState::Frontend(sample) => ProgressSnapshot {
                progress: sample.percent().min(self.frontend_cap),
                uploaded_bytes: sample.bytes,
                speed: self.frontend.speed(),
                eta_seconds: self.frontend.eta_seconds(),
                source: ProgressSource::Frontend,
                indeterminate: false,
            },
            SourceState::Backend(sample) => ProgressSnapshot {
                progress: sample.percent().min(self.backend_cap),
                uploaded_bytes: sample.bytes,
                speed: self.backend.speed(),
                eta_seconds: self.backend.eta_seconds(),
                source: ProgressSource::Backend,
                indeterminate: false,
            },
        }
    }

    /// Final snapshot once the transfer call has succeeded. The only
    /// place progress reaches exactly 100.
    pub fn reconcile(&self, total: u64) -> ProgressSnapshot {
        ProgressSnapshot {
            progress: 100.0,
            uploaded_bytes: total,
            speed: 0.0,
            eta_seconds: None,
            source: self.source(),
            indeterminate: false,
        }
    }
}

/// Progress update pushed to embedding applications
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub task_id: String,
    pub snapshot: ProgressSnapshot,
}

/// Trait for receiving progress updates
pub trait ProgressCallback: Send + Sync {
    /// Called when upload progress changes
    fn on_progress(&self, update: ProgressUpdate);
}

/// No-op progress callback implementation
pub struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_progress(&self, _update: ProgressUpdate) {}
}

/// Closure-based progress callback
pub struct FnProgress<F>(pub F);

impl<F> ProgressCallback for FnProgress<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    fn on_progress(&self, update: ProgressUpdate) {
        (self.0)(update)
    }
}

/// Arc wrapper for progress callbacks
impl<T: ProgressCallback + ?Sized> ProgressCallback for Arc<T> {
    fn on_progress(&self, update: ProgressUpdate) {
        (**self).on_progress(update)
    }
}
