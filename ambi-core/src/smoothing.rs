//! Temporal color smoothing, decoupled from the capture rate.
//!
//! The capture side calls [`ColorSmoothing::set_target`] whenever a new
//! sequence is extracted; a [`SmoothingRunner`] ticks the smoother at its
//! own fixed rate and forwards every emitted sequence to an [`LedSink`].
//!
//! ```text
//!  set_target ──► target ─┐
//!                         ▼
//!  tick ──► previous += round(k · (target − previous)) ──► [delay FIFO] ──► sink
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::types::{Color, ColorSequence};

/// `set_target` calls closer together than this are dropped.
const TARGET_DEBOUNCE: Duration = Duration::from_millis(1);

const MAX_SETTLING_MS: u64 = 1000;
const MAX_OUTPUT_DELAY: usize = 10;
const MIN_FREQUENCY_HZ: u32 = 1;
const MAX_FREQUENCY_HZ: u32 = 60;

// ── SmoothingConfig ──────────────────────────────────────────────

/// Smoother tuning. Construct through [`SmoothingConfig::new`] to get
/// values clamped into their supported ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmoothingConfig {
    /// Time for an LED to fully reach a new target.
    pub settling_time: Duration,
    /// Number of ticks each output is held back.
    pub output_delay: usize,
    /// Tick rate of the runner.
    pub update_frequency_hz: u32,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            settling_time: Duration::from_millis(200),
            output_delay: 2,
            update_frequency_hz: 25,
        }
    }
}

impl SmoothingConfig {
    pub fn new(settling_ms: u64, output_delay: usize, update_frequency_hz: u32) -> Self {
        Self {
            settling_time: Duration::from_millis(settling_ms.min(MAX_SETTLING_MS)),
            output_delay: output_delay.min(MAX_OUTPUT_DELAY),
            update_frequency_hz: update_frequency_hz.clamp(MIN_FREQUENCY_HZ, MAX_FREQUENCY_HZ),
        }
    }

    /// Period between two ticks.
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(1) / self.update_frequency_hz.max(MIN_FREQUENCY_HZ)
    }
}

// ── ColorSmoothing ───────────────────────────────────────────────

/// Interpolating smoother with an optional fixed output delay.
///
/// Every buffer is sized to the length of the last accepted target. A
/// length change throws the whole session away and restarts from black.
#[derive(Debug)]
pub struct ColorSmoothing {
    config: SmoothingConfig,
    running: bool,
    previous: ColorSequence,
    target: ColorSequence,
    /// When the current target was accepted; the deadline is this plus
    /// the settling time.
    target_set_at: Option<Instant>,
    output_queue: VecDeque<ColorSequence>,
    spare: Vec<ColorSequence>,
    emitted: ColorSequence,
}

impl ColorSmoothing {
    pub fn new(config: SmoothingConfig) -> Self {
        Self {
            config,
            running: false,
            previous: Vec::new(),
            target: Vec::new(),
            target_set_at: None,
            output_queue: VecDeque::with_capacity(config.output_delay + 1),
            spare: Vec::new(),
            emitted: Vec::new(),
        }
    }

    pub fn config(&self) -> SmoothingConfig {
        self.config
    }

    /// Apply new tuning. Delayed frames beyond the new delay are dropped.
    pub fn set_config(&mut self, config: SmoothingConfig) {
        self.config = config;
        while self.output_queue.len() > config.output_delay {
            if let Some(buf) = self.output_queue.pop_front() {
                self.spare.push(buf);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Number of LEDs in the current session.
    pub fn len(&self) -> usize {
        self.previous.len()
    }

    pub fn is_empty(&self) -> bool {
        self.previous.is_empty()
    }

    /// When the current target will be fully reached.
    pub fn target_deadline(&self) -> Option<Instant> {
        self.target_set_at.map(|t| t + self.config.settling_time)
    }

    pub fn set_target(&mut self, colors: &[Color]) -> bool {
        self.set_target_at(colors, Instant::now())
    }

    /// Accept a new target at `now`. Returns `false` when the call fell
    /// inside the debounce window and was ignored.
    pub fn set_target_at(&mut self, colors: &[Color], now: Instant) -> bool {
        if let Some(last) = self.target_set_at {
            if now.saturating_duration_since(last) < TARGET_DEBOUNCE {
                return false;
            }
        }

        if colors.len() != self.target.len() {
            self.restart_session(colors.len());
        }

        self.target.copy_from_slice(colors);
        self.target_set_at = Some(now);
        if !self.running {
            tracing::debug!(leds = colors.len(), "smoothing started");
            self.running = true;
        }
        true
    }

    /// Stop emitting. The next `set_target` resumes from the current
    /// colors.
    pub fn stop(&mut self) {
        self.running = false;
        self.target_set_at = None;
        while let Some(buf) = self.output_queue.pop_front() {
            self.spare.push(buf);
        }
    }

    pub fn tick(&mut self) -> Option<&[Color]> {
        self.tick_at(Instant::now())
    }

    /// Advance the interpolation to `now`. Returns the sequence to show,
    /// or `None` while idle or while the delay FIFO is still filling.
    pub fn tick_at(&mut self, now: Instant) -> Option<&[Color]> {
        if !self.running || self.previous.is_empty() {
            return None;
        }

        let k = self.progress(now);
        for (prev, target) in self.previous.iter_mut().zip(&self.target) {
            prev.red = step_channel(prev.red, target.red, k);
            prev.green = step_channel(prev.green, target.green, k);
            prev.blue = step_channel(prev.blue, target.blue, k);
        }

        if self.config.output_delay == 0 {
            return Some(&self.previous);
        }

        let mut buf = self.spare.pop().unwrap_or_default();
        buf.clear();
        buf.extend_from_slice(&self.previous);
        self.output_queue.push_back(buf);

        if self.output_queue.len() <= self.config.output_delay {
            return None;
        }
        let oldest = self.output_queue.pop_front()?;
        let done = std::mem::replace(&mut self.emitted, oldest);
        self.spare.push(done);
        Some(&self.emitted)
    }

    /// Interpolation factor `k` in `[0, 1]`.
    fn progress(&self, now: Instant) -> f64 {
        let settling = self.config.settling_time;
        let Some(start) = self.target_set_at else {
            return 1.0;
        };
        if settling.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_duration_since(start);
        (elapsed.as_secs_f64() / settling.as_secs_f64()).clamp(0.0, 1.0)
    }

    fn restart_session(&mut self, len: usize) {
        tracing::debug!(from = self.target.len(), to = len, "LED count changed, resetting smoothing");
        self.previous.clear();
        self.previous.resize(len, Color::BLACK);
        self.target.clear();
        self.target.resize(len, Color::BLACK);
        self.emitted.clear();
        self.output_queue.clear();
        self.spare.clear();
    }
}

#[inline]
fn step_channel(prev: u8, target: u8, k: f64) -> u8 {
    let delta = (target as f64 - prev as f64) * k;
    (prev as f64 + delta.round()).clamp(0.0, 255.0) as u8
}

// ── SmoothingRunner ──────────────────────────────────────────────

/// Receiver of smoothed sequences. Called from the timer task, so
/// implementations must return promptly.
pub trait LedSink: Send + Sync {
    fn submit(&self, colors: &[Color]);
}

/// Timer task that ticks a shared [`ColorSmoothing`].
pub struct SmoothingRunner {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl SmoothingRunner {
    pub fn spawn(smoothing: Arc<Mutex<ColorSmoothing>>, sink: Arc<dyn LedSink>) -> Self {
        let cancel = CancellationToken::new();
        let interval = smoothing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .config()
            .update_interval();
        let handle = tokio::spawn(run_timer(smoothing, sink, interval, cancel.clone()));
        Self { cancel, handle }
    }

    /// Stop ticking and wait for the task to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!("smoothing task ended abnormally: {}", e);
        }
    }
}

async fn run_timer(
    smoothing: Arc<Mutex<ColorSmoothing>>,
    sink: Arc<dyn LedSink>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::debug!(?period, "smoothing timer started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let mut s = smoothing.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(colors) = s.tick_at(Instant::now()) {
                    sink.submit(colors);
                }
            }
        }
    }

    tracing::debug!("smoothing timer stopped");
}

// ── Tests ────────────────────────────────────────────────────────
