//! # Window Samplers
//!
//! Samplers turn a chronologically ordered store of `N` records into windows
//! of `window_size` consecutive record indices. The last index of a window is
//! its *anchor*; the anchor's label is the window's supervision target.
//!
//! ```text
//!   records   0   1   2   3   4   5   6   7   8   9
//!                     └───────────┘
//!                     window_size = 4, anchor = 5
//! ```
//!
//! Every sampler is restartable: each call to [`WindowSampler::sample_epoch`]
//! produces a fresh pass, and [`WindowSampler::len`] reports how many windows
//! that pass yields. Random variants own their RNG, seeded explicitly, so two
//! samplers never share or reset each other's random state.

use std::ops::Range;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::error::FlowError;
use crate::FlowResult;

/// Seed used when none is supplied
pub const DEFAULT_SEED: u64 = 42;

/// A run of consecutive record indices `[start, start + len)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window {
    start: usize,
    len: usize,
}

impl Window {
    /// The window of `size` records ending at `anchor`, if it fits.
    pub fn ending_at(anchor: usize, size: usize) -> Option<Self> {
        if size == 0 || anchor + 1 < size {
            return None;
        }
        Some(Self {
            start: anchor + 1 - size,
            len: size,
        })
    }

    /// A window holding a single record
    pub fn single(index: usize) -> Self {
        Self {
            start: index,
            len: 1,
        }
    }

    pub fn start(&self) -> usize {
        self.start
    }

    /// Last index of the window
    pub fn anchor(&self) -> usize {
        self.start + self.len - 1
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn indices(&self) -> Range<usize> {
        self.start..self.start + self.len
    }

    pub fn to_vec(&self) -> Vec<usize> {
        self.indices().collect()
    }
}

/// Source of windows for one pass over a record store
pub trait WindowSampler {
    /// Records per window
    fn window_size(&self) -> usize;

    /// Number of windows produced by each pass
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Draw the windows of a new pass
    fn sample_epoch(&mut self) -> Vec<Window>;
}

impl<S: WindowSampler + ?Sized> WindowSampler for Box<S> {
    fn window_size(&self) -> usize {
        (**self).window_size()
    }

    fn len(&self) -> usize {
        (**self).len()
    }

    fn sample_epoch(&mut self) -> Vec<Window> {
        (**self).sample_epoch()
    }
}

fn check_window_size(window_size: usize, num_records: usize) -> FlowResult<()> {
    if window_size == 0 || window_size > num_records {
        return Err(FlowError::InvalidWindowSize {
            window_size,
            num_records,
        });
    }
    Ok(())
}

/// Window ending at an anchor already known to be valid
fn window_at(anchor: usize, window_size: usize) -> Window {
    Window {
        start: anchor + 1 - window_size,
        len: window_size,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// RANDOM SLIDING WINDOW
// ═══════════════════════════════════════════════════════════════════════════

/// Draws `N - window_size + 1` anchors uniformly, with replacement.
///
/// The same window may appear several times in a pass and some may never
/// appear. Use [`SequentialWindowSampler`] for exhaustive coverage.
#[derive(Debug, Clone)]
pub struct RandomSlidingWindowSampler {
    num_records: usize,
    window_size: usize,
    num_samples: usize,
    rng: StdRng,
}

impl RandomSlidingWindowSampler {
    pub fn new(num_records: usize, window_size: usize) -> FlowResult<Self> {
        Self::with_seed(num_records, window_size, DEFAULT_SEED)
    }

    pub fn with_seed(num_records: usize, window_size: usize, seed: u64) -> FlowResult<Self> {
        check_window_size(window_size, num_records)?;
        Ok(Self {
            num_records,
            window_size,
            num_samples: num_records - window_size + 1,
            rng: StdRng::seed_from_u64(seed),
        })
    }
}

impl WindowSampler for RandomSlidingWindowSampler {
    fn window_size(&self) -> usize {
        self.window_size
    }

    fn len(&self) -> usize {
        self.num_samples
    }

    fn sample_epoch(&mut self) -> Vec<Window> {
        let lo = self.window_size - 1;
        let hi = self.num_records - 1;
        (0..self.num_samples)
            .map(|_| window_at(self.rng.gen_range(lo..=hi), self.window_size))
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// FIXED WINDOW
// ═══════════════════════════════════════════════════════════════════════════

/// Yields a precomputed list of anchors in a fresh shuffled order every pass
#[derive(Debug, Clone)]
pub struct FixedWindowSampler {
    anchors: Vec<usize>,
    window_size: usize,
    rng: StdRng,
}

impl FixedWindowSampler {
    pub fn new(anchors: Vec<usize>, num_records: usize, window_size: usize) -> FlowResult<Self> {
        Self::with_seed(anchors, num_records, window_size, DEFAULT_SEED)
    }

    pub fn with_seed(
        anchors: Vec<usize>,
        num_records: usize,
        window_size: usize,
        seed: u64,
    ) -> FlowResult<Self> {
        check_window_size(window_size, num_records)?;
        if let Some(&bad) = anchors
            .iter()
            .find(|&&a| a + 1 < window_size || a >= num_records)
        {
            return Err(FlowError::invalid_config(format!(
                "anchor {} outside [{}, {}]",
                bad,
                window_size - 1,
                num_records - 1
            )));
        }
        Ok(Self {
            anchors,
            window_size,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn anchors(&self) -> &[usize] {
        &self.anchors
    }
}

impl WindowSampler for FixedWindowSampler {
    fn window_size(&self) -> usize {
        self.window_size
    }

    fn len(&self) -> usize {
        self.anchors.len()
    }

    fn sample_epoch(&mut self) -> Vec<Window> {
        let mut order = self.anchors.clone();
        order.shuffle(&mut self.rng);
        order
            .into_iter()
            .map(|a| window_at(a, self.window_size))
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// FAIR (CLASS-BALANCED) SLIDING WINDOW
// ═══════════════════════════════════════════════════════════════════════════

/// Interleaves malicious-anchored and benign-anchored windows one-for-one.
///
/// Eligible anchors are those strictly after `window_size - 1`. Each pass
/// yields `2 * min(|malicious|, |legit|)` windows; the surplus of the
/// majority class is dropped for that pass.
#[derive(Debug, Clone)]
pub struct FairSlidingWindowSampler {
    window_size: usize,
    malicious: Vec<usize>,
    legit: Vec<usize>,
    rng: StdRng,
}

impl FairSlidingWindowSampler {
    /// Partition anchors of `labels` by comparing against `benign_label`
    pub fn new(labels: &[f32], benign_label: f32, window_size: usize) -> FlowResult<Self> {
        Self::with_seed(labels, benign_label, window_size, DEFAULT_SEED)
    }

    pub fn with_seed(
        labels: &[f32],
        benign_label: f32,
        window_size: usize,
        seed: u64,
    ) -> FlowResult<Self> {
        if window_size % 2 != 0 {
            return Err(FlowError::invalid_config(format!(
                "window size must be an even number, got {}",
                window_size
            )));
        }
        check_window_size(window_size, labels.len())?;

        let (malicious, legit): (Vec<usize>, Vec<usize>) = (window_size..labels.len())
            .partition(|&i| labels[i] != benign_label);

        log::debug!(
            "Fair sampler: {} malicious anchors, {} legit anchors",
            malicious.len(),
            legit.len()
        );

        Ok(Self {
            window_size,
            malicious,
            legit,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn malicious_anchors(&self) -> usize {
        self.malicious.len()
    }

    pub fn legit_anchors(&self) -> usize {
        self.legit.len()
    }
}

impl WindowSampler for FairSlidingWindowSampler {
    fn window_size(&self) -> usize {
        self.window_size
    }

    fn len(&self) -> usize {
        2 * self.malicious.len().min(self.legit.len())
    }

    fn sample_epoch(&mut self) -> Vec<Window> {
        self.malicious.shuffle(&mut self.rng);
        self.legit.shuffle(&mut self.rng);

        let mut windows = Vec::with_capacity(self.len());
        for (&malicious, &legit) in self.malicious.iter().zip(self.legit.iter()) {
            windows.push(window_at(malicious, self.window_size));
            windows.push(window_at(legit, self.window_size));
        }
        windows
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SEQUENTIAL SLIDING WINDOW
// ═══════════════════════════════════════════════════════════════════════════

/// Every valid window exactly once per pass, in chronological order
#[derive(Debug, Clone)]
pub struct SequentialWindowSampler {
    num_records: usize,
    window_size: usize,
}

impl SequentialWindowSampler {
    pub fn new(num_records: usize, window_size: usize) -> FlowResult<Self> {
        check_window_size(window_size, num_records)?;
        Ok(Self {
            num_records,
            window_size,
        })
    }
}

impl WindowSampler for SequentialWindowSampler {
    fn window_size(&self) -> usize {
        self.window_size
    }

    fn len(&self) -> usize {
        self.num_records - self.window_size + 1
    }

    fn sample_epoch(&mut self) -> Vec<Window> {
        (self.window_size - 1..self.num_records)
            .map(|a| window_at(a, self.window_size))
            .collect()
    }
}
