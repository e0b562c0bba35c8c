//! # Batch Assembly
//!
//! [`WindowLoader`] groups the windows of a sampler pass into fixed-size
//! batches, in the order the sampler emits them, and drops the trailing
//! partial batch:
//!
//! ```text
//! sampler pass:  w0 w1 w2 w3 w4 w5 w6      batch_size = 3
//! batches:       [w0 w1 w2] [w3 w4 w5]     (w6 dropped)
//! ```
//!
//! The trainer only depends on the [`BatchLoader`] trait, so any source that
//! yields batches in a stable order per pass can drive it.

use candle_core::{Device, Tensor};

use crate::error::FlowError;
use crate::sampler::{Window, WindowSampler};
use crate::store::RecordStore;
use crate::FlowResult;

/// A batch of windows
#[derive(Debug, Clone)]
pub struct Batch {
    /// `[batch_size, window_size, feature_width]`
    pub inputs: Tensor,
    /// Label of each window's last record, `[batch_size]`
    pub labels: Tensor,
}

impl Batch {
    pub fn new(inputs: Tensor, labels: Tensor) -> Self {
        Self { inputs, labels }
    }

    pub fn batch_size(&self) -> usize {
        self.inputs.dims()[0]
    }

    pub fn to_device(&self, device: &Device) -> FlowResult<Self> {
        Ok(Self {
            inputs: self.inputs.to_device(device)?,
            labels: self.labels.to_device(device)?,
        })
    }
}

/// Iterator over one pass of batches
pub type Batches<'a> = Box<dyn Iterator<Item = FlowResult<Batch>> + 'a>;

/// Anything that can feed batches to the trainer
pub trait BatchLoader {
    /// Number of full batches in one pass
    fn num_batches(&self) -> usize;

    /// Start a new pass
    fn batches(&mut self) -> Batches<'_>;
}

/// Batches windows drawn by a sampler from a record store
pub struct WindowLoader<'a, S> {
    store: &'a RecordStore,
    sampler: S,
    batch_size: usize,
}

impl<'a, S: WindowSampler> WindowLoader<'a, S> {
    pub fn new(store: &'a RecordStore, sampler: S, batch_size: usize) -> FlowResult<Self> {
        if batch_size == 0 {
            return Err(FlowError::invalid_config("batch size must be positive"));
        }
        Ok(Self {
            store,
            sampler,
            batch_size,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn sampler(&self) -> &S {
        &self.sampler
    }

    pub fn store(&self) -> &RecordStore {
        self.store
    }

    /// Stack a group of windows into a batch
    pub fn assemble(&self, windows: &[Window]) -> FlowResult<Batch> {
        let mut inputs = Vec::with_capacity(windows.len());
        let mut labels = Vec::with_capacity(windows.len());
        for window in windows {
            let (features, label) = self.store.window(window)?;
            inputs.push(features);
            labels.push(label);
        }
        Ok(Batch {
            inputs: Tensor::stack(&inputs, 0)?,
            labels: Tensor::stack(&labels, 0)?,
        })
    }

    /// Draw a fresh sampler pass and batch it
    pub fn epoch(&mut self) -> Batches<'_> {
        let windows = self.sampler.sample_epoch();
        let full = windows.len() / self.batch_size * self.batch_size;
        log::debug!(
            "Loader pass: {} windows, {} batches",
            windows.len(),
            full / self.batch_size
        );

        let this: &Self = self;
        Box::new(
            (0..full)
                .step_by(this.batch_size)
                .map(move |lo| this.assemble(&windows[lo..lo + this.batch_size])),
        )
    }
}

impl<S: WindowSampler> BatchLoader for WindowLoader<'_, S> {
    fn num_batches(&self) -> usize {
        self.sampler.len() / self.batch_size
    }

    fn batches(&mut self) -> Batches<'_> {
        self.epoch()
    }
}

/// Pre-assembled batches replayed in the same order every pass
#[derive(Debug, Clone, Default)]
pub struct InMemoryLoader {
    batches: Vec<Batch>,
}

impl InMemoryLoader {
    pub fn new(batches: Vec<Batch>) -> Self {
        Self { batches }
    }

    /// Materialize every pass-one batch of another loader
    pub fn collect_from(loader: &mut dyn BatchLoader) -> FlowResult<Self> {
        let batches = loader.batches().collect::<FlowResult<Vec<_>>>()?;
        Ok(Self { batches })
    }
}

impl BatchLoader for InMemoryLoader {
    fn num_batches(&self) -> usize {
        self.batches.len()
    }

    fn batches(&mut self) -> Batches<'_> {
        Box::new(self.batches.iter().cloned().map(Ok))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::{RandomSlidingWindowSampler, SequentialWindowSampler};
    use crate::transform::{one_hot, PipelineBuilder};

    fn store(n: usize) -> RecordStore {
        let numeric: Vec<f32> = (0..n * 3).map(|v| v as f32 * 0.1).collect();
        let categorical: Vec<u32> = (0..n * 2).map(|v| (v % 4) as u32).collect();
        let labels: Vec<f32> = (0..n).map(|v| if v % 3 == 0 { 1.0 } else { 0.0 }).collect();
        RecordStore::new(numeric, 3, categorical, 2, labels).unwrap()
    }

    #[test]
    fn test_num_batches_floors() {
        let s = store(30);
        let sampler = RandomSlidingWindowSampler::new(s.len(), 4).unwrap();
        // 27 windows
        let loader = WindowLoader::new(&s, sampler, 8).unwrap();
        assert_eq!(loader.num_batches(), 3);
    }

    #[test]
    fn test_batches_are_full_and_shaped() {
        let mut s = store(30);
        let mut builder = PipelineBuilder::new();
        builder.add_step("categorical_one_hot", 1, one_hot(4));
        s.set_categorical_transform(builder.build());

        let sampler = RandomSlidingWindowSampler::new(s.len(), 4).unwrap();
        let mut loader = WindowLoader::new(&s, sampler, 8).unwrap();

        let batches: Vec<Batch> = loader.batches().map(|b| b.unwrap()).collect();
        assert_eq!(batches.len(), 3);
        for b in &batches {
            assert_eq!(b.inputs.dims(), &[8, 4, 3 + 2 * 4]);
            assert_eq!(b.labels.dims(), &[8]);
            assert_eq!(b.batch_size(), 8);
        }
    }

    #[test]
    fn test_batches_follow_sampler_order() {
        let s = store(10);
        let sampler = SequentialWindowSampler::new(s.len(), 2).unwrap();
        let mut loader = WindowLoader::new(&s, sampler, 3).unwrap();

        // 9 windows -> 3 batches, anchors 1..=9 in order
        let labels: Vec<f32> = loader
            .batches()
            .flat_map(|b| b.unwrap().labels.to_vec1::<f32>().unwrap())
            .collect();
        let expected: Vec<f32> = (1..10).map(|a| s.label(a).unwrap()).collect();
        assert_eq!(labels, expected);
    }

    #[test]
    fn test_remainder_dropped() {
        let s = store(10);
        let sampler = SequentialWindowSampler::new(s.len(), 4).unwrap();
        // 7 windows, batch 3 -> 2 batches
        let mut loader = WindowLoader::new(&s, sampler, 3).unwrap();
        assert_eq!(loader.batches().count(), 2);
        assert_eq!(loader.num_batches(), 2);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let s = store(10);
        let sampler = SequentialWindowSampler::new(s.len(), 4).unwrap();
        assert!(WindowLoader::new(&s, sampler, 0).is_err());
    }

    #[test]
    fn test_in_memory_loader_replays() {
        let s = store(12);
        let sampler = SequentialWindowSampler::new(s.len(), 3).unwrap();
        let mut loader = WindowLoader::new(&s, sampler, 5).unwrap();
        let mut replay = InMemoryLoader::collect_from(&mut loader).unwrap();

        assert_eq!(replay.num_batches(), 2);
        let first: Vec<Vec<f32>> = replay
            .batches()
            .map(|b| b.unwrap().labels.to_vec1().unwrap())
            .collect();
        let second: Vec<Vec<f32>> = replay
            .batches()
            .map(|b| b.unwrap().labels.to_vec1().unwrap())
            .collect();
        assert_eq!(first, second);
    }
}
