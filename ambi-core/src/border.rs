//! Letterbox / pillarbox detection with hysteresis.
//!
//! Each call to [`BorderProcessor::process`] probes the frame at three
//! positions per axis, walking inward from the edges until it meets a
//! non-black pixel. The raw per-frame result flickers on dark content, so
//! it only becomes the reported estimate after passing three counters:
//!
//! ```text
//!  observed ≠ last   ──► inconsistent_frames++ ── > debounce ──► last := observed
//!  observed == last  ──► consistent_frames++
//!
//!  last known,   current unknown/none ──► adopt now
//!  last known,   current known        ──► adopt when consistent_frames == change
//!  last unknown                       ──► adopt when consistent_frames == settle
//! ```

use crate::types::{Color, Frame};

// ── BorderEstimate ───────────────────────────────────────────────

/// Width of the black border found on each axis.
///
/// `offset_x` counts columns removed from the left and right edges,
/// `offset_y` rows removed from the top and bottom. An axis whose
/// inner third is entirely black is reported as unknown with offset 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BorderEstimate {
    pub known_x: bool,
    pub known_y: bool,
    pub offset_x: usize,
    pub offset_y: usize,
}

impl BorderEstimate {
    fn from_scan(x: Option<usize>, y: Option<usize>) -> Self {
        Self {
            known_x: x.is_some(),
            known_y: y.is_some(),
            offset_x: x.unwrap_or(0),
            offset_y: y.unwrap_or(0),
        }
    }

    /// Both axes found content.
    pub fn is_known(&self) -> bool {
        self.known_x && self.known_y
    }
}

// ── BorderThresholds ─────────────────────────────────────────────

/// Frame counts for the three hysteresis tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BorderThresholds {
    /// Differing frames tolerated before a new observation is taken seriously.
    pub debounce: u32,
    /// Consistent frames before a known estimate replaces a known one.
    pub change: u32,
    /// Consistent frames before an unknown estimate replaces anything.
    pub settle: u32,
}

impl Default for BorderThresholds {
    fn default() -> Self {
        Self {
            debounce: 10,
            change: 50,
            settle: 600,
        }
    }
}

// ── BorderProcessor ──────────────────────────────────────────────

/// Stateful border detector.
#[derive(Debug, Clone)]
pub struct BorderProcessor {
    black_threshold: u8,
    thresholds: BorderThresholds,
    previous: Option<BorderEstimate>,
    current: Option<BorderEstimate>,
    consistent_frames: u32,
    inconsistent_frames: u32,
}

impl BorderProcessor {
    /// Pixels with every channel below `black_threshold` count as black.
    pub fn new(black_threshold: u8) -> Self {
        Self::with_thresholds(black_threshold, BorderThresholds::default())
    }

    pub fn with_thresholds(black_threshold: u8, thresholds: BorderThresholds) -> Self {
        Self {
            black_threshold,
            thresholds,
            previous: None,
            current: None,
            consistent_frames: 0,
            inconsistent_frames: 0,
        }
    }

    /// The adopted estimate, if any frame has passed the hysteresis yet.
    pub fn current(&self) -> Option<&BorderEstimate> {
        self.current.as_ref()
    }

    pub fn consistent_frames(&self) -> u32 {
        self.consistent_frames
    }

    pub fn inconsistent_frames(&self) -> u32 {
        self.inconsistent_frames
    }

    /// Forget everything, e.g. after a resolution change.
    pub fn reset(&mut self) {
        self.previous = None;
        self.current = None;
        self.consistent_frames = 0;
        self.inconsistent_frames = 0;
    }

    /// Probe `frame` and feed the result through the hysteresis.
    pub fn process(&mut self, frame: &Frame<'_>) -> Option<&BorderEstimate> {
        let observed = self.find_border(frame);
        self.observe(observed);
        self.current()
    }

    /// Hysteresis step for one raw observation.
    pub fn observe(&mut self, observed: BorderEstimate) {
        if self.previous == Some(observed) {
            self.consistent_frames = self.consistent_frames.saturating_add(1);
            self.inconsistent_frames = 0;
        } else {
            self.inconsistent_frames += 1;
            if self.inconsistent_frames <= self.thresholds.debounce {
                return;
            }
            self.previous = Some(observed);
            self.consistent_frames = 0;
            // A promoted candidate starts a fresh debounce window.
            self.inconsistent_frames = 0;
        }

        if self.current == Some(observed) {
            self.inconsistent_frames = 0;
            return;
        }

        let adopt = if observed.is_known() {
            match self.current {
                None => true,
                Some(current) if !current.is_known() => true,
                Some(_) => self.consistent_frames == self.thresholds.change,
            }
        } else {
            self.consistent_frames == self.thresholds.settle
        };

        if adopt {
            tracing::debug!(?observed, "border estimate adopted");
            self.current = Some(observed);
        }
    }

    /// Raw, un-debounced border of a single frame.
    pub fn find_border(&self, frame: &Frame<'_>) -> BorderEstimate {
        let width = frame.width();
        let height = frame.height();

        let w33 = width / 3;
        let w66 = w33 * 2;
        let h33 = height / 3;
        let h66 = h33 * 2;
        let x_center = width / 2;
        let y_center = height / 2;

        // Left edge at 33% / 66% height, right edge at mid height.
        let border_x = (0..w33).find(|&x| {
            !self.is_black(frame.pixel(x, h33))
                || !self.is_black(frame.pixel(x, h66))
                || !self.is_black(frame.pixel(width - 1 - x, y_center))
        });

        // Top edge at 33% / 66% width, bottom edge at mid width.
        let border_y = (0..h33).find(|&y| {
            !self.is_black(frame.pixel(w33, y))
                || !self.is_black(frame.pixel(w66, y))
                || !self.is_black(frame.pixel(x_center, height - 1 - y))
        });

        BorderEstimate::from_scan(border_x, border_y)
    }

    #[inline]
    fn is_black(&self, c: Color) -> bool {
        c.red < self.black_threshold
            && c.green < self.black_threshold
            && c.blue < self.black_threshold
    }
}

// ── Tests ────────────────────────────────────────────────────────
