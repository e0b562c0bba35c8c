//! # Ordered Transformation Pipelines
//!
//! Transformations are plain functions `T -> FlowResult<T>` registered on a
//! [`PipelineBuilder`] under a name and an order. `build()` sorts the steps by
//! order (registration order breaks ties) and returns an immutable
//! [`Pipeline`].
//!
//! The same builder drives table preprocessing (`T = FlowTable`) and
//! per-window sample transforms (`T = Sample`).
//!
//! ```rust,ignore
//! use nids_window::transform::{one_hot, PipelineBuilder, Sample};
//!
//! let mut builder = PipelineBuilder::<Sample>::new();
//! builder.add_step("categorical_one_hot", 1, one_hot(32));
//! let pipeline = builder.build();
//! store.set_categorical_transform(pipeline);
//! ```

use std::fmt;
use std::sync::Arc;

use candle_core::{DType, Tensor, D};

use crate::store::FeatureStats;
use crate::FlowResult;

/// Numerical floor used when dividing by spreads
const EPS: f64 = 1e-8;

type StepFn<T> = Arc<dyn Fn(T) -> FlowResult<T> + Send + Sync>;

/// A named, ordered transformation step
pub struct Step<T> {
    name: String,
    order: i32,
    func: StepFn<T>,
}

impl<T> Step<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn order(&self) -> i32 {
        self.order
    }
}

impl<T> Clone for Step<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            order: self.order,
            func: Arc::clone(&self.func),
        }
    }
}

/// Collects steps before freezing them into a [`Pipeline`]
pub struct PipelineBuilder<T> {
    steps: Vec<Step<T>>,
}

impl<T> Default for PipelineBuilder<T> {
    fn default() -> Self {
        Self { steps: Vec::new() }
    }
}

impl<T> PipelineBuilder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step. Lower orders run first.
    pub fn add_step<F>(&mut self, name: impl Into<String>, order: i32, func: F) -> &mut Self
    where
        F: Fn(T) -> FlowResult<T> + Send + Sync + 'static,
    {
        self.steps.push(Step {
            name: name.into(),
            order,
            func: Arc::new(func),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Sort the registered steps and freeze them
    pub fn build(self) -> Pipeline<T> {
        let mut steps = self.steps;
        steps.sort_by_key(|step| step.order);
        Pipeline { steps }
    }
}

/// Immutable, ordered sequence of transformation steps
pub struct Pipeline<T> {
    steps: Vec<Step<T>>,
}

impl<T> Pipeline<T> {
    /// Run every step in order, feeding each the previous output
    pub fn apply(&self, input: T) -> FlowResult<T> {
        self.steps.iter().try_fold(input, |acc, step| {
            log::trace!("Applying transformation '{}'", step.name);
            (step.func)(acc)
        })
    }

    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl<T> Clone for Pipeline<T> {
    fn clone(&self) -> Self {
        Self {
            steps: self.steps.clone(),
        }
    }
}

impl<T> fmt::Debug for Pipeline<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("steps", &self.names())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SAMPLE TRANSFORMS
// ═══════════════════════════════════════════════════════════════════════════

/// A window slice together with the store statistics
#[derive(Debug, Clone)]
pub struct Sample {
    /// `(window_size, width)` for features, `(window_size,)` for labels
    pub data: Tensor,
    pub stats: FeatureStats,
}

impl Sample {
    pub fn new(data: Tensor, stats: FeatureStats) -> Self {
        Self { data, stats }
    }
}

/// Expand categorical codes into `levels` one-hot columns per feature.
///
/// Codes outside `[0, levels)` encode as all zeros.
pub fn one_hot(levels: usize) -> impl Fn(Sample) -> FlowResult<Sample> + Send + Sync + Clone {
    move |sample: Sample| {
        let (rows, width) = sample.data.dims2()?;
        let device = sample.data.device().clone();
        let classes = Tensor::arange(0u32, levels as u32, &device)?;
        let encoded = sample
            .data
            .to_dtype(DType::U32)?
            .unsqueeze(D::Minus1)?
            .broadcast_eq(&classes)?
            .to_dtype(DType::F32)?
            .reshape((rows, width * levels))?;
        Ok(Sample {
            data: encoded,
            stats: sample.stats,
        })
    }
}

/// Z-score numeric features with the store's mean and standard deviation
pub fn standardize() -> impl Fn(Sample) -> FlowResult<Sample> + Send + Sync + Clone {
    |sample: Sample| {
        let spread = (&sample.stats.std + EPS)?;
        let data = sample
            .data
            .broadcast_sub(&sample.stats.mean)?
            .broadcast_div(&spread)?;
        Ok(Sample {
            data,
            stats: sample.stats,
        })
    }
}

/// Rescale numeric features into `[0, 1]` with the store's min and max
pub fn min_max_scale() -> impl Fn(Sample) -> FlowResult<Sample> + Send + Sync + Clone {
    |sample: Sample| {
        let spread = ((&sample.stats.max - &sample.stats.min)? + EPS)?;
        let data = sample
            .data
            .broadcast_sub(&sample.stats.min)?
            .broadcast_div(&spread)?;
        Ok(Sample {
            data,
            stats: sample.stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn stats(device: &Device) -> FeatureStats {
        FeatureStats::from_rows(&[1.0, 10.0, 3.0, 30.0], 2, device).unwrap()
    }

    #[test]
    fn test_builder_sorts_by_order() {
        let mut builder = PipelineBuilder::<Vec<&'static str>>::new();
        builder
            .add_step("third", 3, |mut v: Vec<&'static str>| {
                v.push("third");
                Ok(v)
            })
            .add_step("first", 1, |mut v: Vec<&'static str>| {
                v.push("first");
                Ok(v)
            })
            .add_step("second", 2, |mut v: Vec<&'static str>| {
                v.push("second");
                Ok(v)
            });

        let pipeline = builder.build();
        assert_eq!(pipeline.names(), vec!["first", "second", "third"]);
        assert_eq!(
            pipeline.apply(Vec::new()).unwrap(),
            vec!["first", "second", "third"]
        );
    }

    #[test]
    fn test_equal_orders_keep_registration_order() {
        let mut builder = PipelineBuilder::<String>::new();
        builder
            .add_step("a", 1, |s: String| Ok(s + "a"))
            .add_step("b", 1, |s: String| Ok(s + "b"));
        let pipeline = builder.build();
        assert_eq!(pipeline.apply(String::new()).unwrap(), "ab");
    }

    #[test]
    fn test_empty_pipeline_is_identity() {
        let pipeline = PipelineBuilder::<u32>::new().build();
        assert!(pipeline.is_empty());
        assert_eq!(pipeline.apply(7).unwrap(), 7);
    }

    #[test]
    fn test_step_error_propagates() {
        let mut builder = PipelineBuilder::<u32>::new();
        builder.add_step("fail", 0, |_| Err(crate::FlowError::data("bad cell")));
        builder.add_step("never", 1, |_| Ok(99));
        let err = builder.build().apply(1).unwrap_err();
        assert!(matches!(err, crate::FlowError::Data(_)));
    }

    #[test]
    fn test_one_hot_width_and_values() {
        let device = Device::Cpu;
        let codes = Tensor::new(&[[0u32, 2], [1, 3]], &device).unwrap();
        let out = one_hot(4)(Sample::new(codes, stats(&device))).unwrap();

        assert_eq!(out.data.dims(), &[2, 8]);
        let rows: Vec<Vec<f32>> = out.data.to_vec2().unwrap();
        assert_eq!(rows[0], vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
        assert_eq!(rows[1], vec![0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_min_max_scale() {
        let device = Device::Cpu;
        let data = Tensor::new(&[[1.0f32, 10.0], [3.0, 30.0], [2.0, 20.0]], &device).unwrap();
        let out = min_max_scale()(Sample::new(data, stats(&device))).unwrap();
        let rows: Vec<Vec<f32>> = out.data.to_vec2().unwrap();
        assert!((rows[0][0] - 0.0).abs() < 1e-5);
        assert!((rows[1][1] - 1.0).abs() < 1e-5);
        assert!((rows[2][0] - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_standardize_centers_data() {
        let device = Device::Cpu;
        let data = Tensor::new(&[[1.0f32, 10.0], [3.0, 30.0]], &device).unwrap();
        let out = standardize()(Sample::new(data, stats(&device))).unwrap();
        let col_sum: Vec<f32> = out.data.sum(0).unwrap().to_vec1().unwrap();
        for v in col_sum {
            assert!(v.abs() < 1e-4);
        }
    }
}
