//! # Windowed Record Store
//!
//! Chronologically ordered flow records held as three row-aligned tensors:
//!
//! ```text
//! numeric      [N, D_num]  f32
//! categorical  [N, D_cat]  u32 codes
//! labels       [N]         f32   (0 = benign, 1 = malicious)
//! ```
//!
//! Summary statistics of the numeric features are computed once when the
//! store is built and handed, read-only, to every transformation.

use candle_core::{DType, Device, Tensor};

use crate::error::FlowError;
use crate::sampler::Window;
use crate::transform::{Pipeline, Sample};
use crate::FlowResult;

/// Per-feature statistics of the numeric table, each of shape `[D_num]`
#[derive(Debug, Clone)]
pub struct FeatureStats {
    pub mean: Tensor,
    pub std: Tensor,
    pub min: Tensor,
    pub max: Tensor,
}

impl FeatureStats {
    /// Compute statistics from row-major numeric data of the given width.
    ///
    /// The standard deviation is the sample (n - 1) estimate; it is zero when
    /// fewer than two rows exist.
    pub fn from_rows(data: &[f32], width: usize, device: &Device) -> FlowResult<Self> {
        let rows = if width == 0 { 0 } else { data.len() / width };
        if rows == 0 {
            let zeros = Tensor::zeros(width, DType::F32, device)?;
            return Ok(Self {
                mean: zeros.clone(),
                std: zeros.clone(),
                min: zeros.clone(),
                max: zeros,
            });
        }

        // Reductions run in f64.
        let table =
            Tensor::from_slice(&data[..rows * width], (rows, width), device)?.to_dtype(DType::F64)?;
        let mean = table.mean(0)?;
        let std = if rows > 1 {
            table
                .broadcast_sub(&mean)?
                .sqr()?
                .sum(0)?
                .affine(1.0 / (rows - 1) as f64, 0.0)?
                .sqrt()?
        } else {
            mean.zeros_like()?
        };

        Ok(Self {
            mean: mean.to_dtype(DType::F32)?,
            std: std.to_dtype(DType::F32)?,
            min: table.min(0)?.to_dtype(DType::F32)?,
            max: table.max(0)?.to_dtype(DType::F32)?,
        })
    }
}

/// Indexed, ordered collection of flow records
#[derive(Debug, Clone)]
pub struct RecordStore {
    numeric: Tensor,
    categorical: Tensor,
    labels: Tensor,
    /// Host copy of the labels, used for class partitioning
    label_values: Vec<f32>,
    stats: FeatureStats,
    numeric_transform: Option<Pipeline<Sample>>,
    categorical_transform: Option<Pipeline<Sample>>,
    labels_transform: Option<Pipeline<Sample>>,
}

impl RecordStore {
    /// Build a store from row-major tables.
    ///
    /// `numeric` holds `labels.len() * numeric_width` values and
    /// `categorical` holds `labels.len() * categorical_width` codes.
    pub fn new(
        numeric: Vec<f32>,
        numeric_width: usize,
        categorical: Vec<u32>,
        categorical_width: usize,
        labels: Vec<f32>,
    ) -> FlowResult<Self> {
        let n = labels.len();
        if numeric.len() != n * numeric_width {
            return Err(FlowError::DimensionMismatch {
                expected: n * numeric_width,
                got: numeric.len(),
            });
        }
        if categorical.len() != n * categorical_width {
            return Err(FlowError::DimensionMismatch {
                expected: n * categorical_width,
                got: categorical.len(),
            });
        }

        // Tables live on the host; batches move to the compute device later.
        let device = Device::Cpu;
        let stats = FeatureStats::from_rows(&numeric, numeric_width, &device)?;
        let numeric = Tensor::from_vec(numeric, (n, numeric_width), &device)?;
        let categorical = Tensor::from_vec(categorical, (n, categorical_width), &device)?;
        let label_tensor = Tensor::from_vec(labels.clone(), n, &device)?;

        log::debug!(
            "Record store: {} records, {} numeric, {} categorical features",
            n,
            numeric_width,
            categorical_width
        );

        Ok(Self {
            numeric,
            categorical,
            labels: label_tensor,
            label_values: labels,
            stats,
            numeric_transform: None,
            categorical_transform: None,
            labels_transform: None,
        })
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.label_values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.label_values.is_empty()
    }

    pub fn numeric_width(&self) -> usize {
        self.numeric.dims()[1]
    }

    pub fn categorical_width(&self) -> usize {
        self.categorical.dims()[1]
    }

    pub fn stats(&self) -> &FeatureStats {
        &self.stats
    }

    pub fn labels(&self) -> &[f32] {
        &self.label_values
    }

    pub fn label(&self, index: usize) -> Option<f32> {
        self.label_values.get(index).copied()
    }

    pub fn numeric(&self) -> &Tensor {
        &self.numeric
    }

    pub fn categorical(&self) -> &Tensor {
        &self.categorical
    }

    pub fn set_numeric_transform(&mut self, pipeline: Pipeline<Sample>) {
        self.numeric_transform = Some(pipeline);
    }

    pub fn set_categorical_transform(&mut self, pipeline: Pipeline<Sample>) {
        self.categorical_transform = Some(pipeline);
    }

    pub fn set_labels_transform(&mut self, pipeline: Pipeline<Sample>) {
        self.labels_transform = Some(pipeline);
    }

    /// Materialize one window.
    ///
    /// Returns the features `[window_size, D_num + D_cat_encoded]` and the
    /// scalar label of the window's last (anchor) record.
    pub fn window(&self, window: &Window) -> FlowResult<(Tensor, Tensor)> {
        if window.is_empty() || window.anchor() >= self.len() {
            return Err(FlowError::data(format!(
                "window {:?} out of bounds for {} records",
                window.indices(),
                self.len()
            )));
        }

        let start = window.start();
        let size = window.len();

        let numeric = self.apply(
            self.numeric_transform.as_ref(),
            self.numeric.narrow(0, start, size)?,
        )?;
        let categorical = self.apply(
            self.categorical_transform.as_ref(),
            self.categorical.narrow(0, start, size)?,
        )?;
        let labels = self.apply(
            self.labels_transform.as_ref(),
            self.labels.narrow(0, start, size)?,
        )?;

        log::trace!(
            "Numeric sample shape: {:?} Categorical sample shape: {:?}",
            numeric.dims(),
            categorical.dims()
        );

        let parts: Vec<Tensor> = [numeric, categorical]
            .into_iter()
            .filter(|t| t.dims().last().copied().unwrap_or(0) > 0)
            .map(|t| t.to_dtype(DType::F32))
            .collect::<candle_core::Result<_>>()?;
        let features = Tensor::cat(&parts, 1)?;

        let last = labels.dim(0)? - 1;
        let label = labels.get(last)?.to_dtype(DType::F32)?;

        Ok((features, label))
    }

    /// Width of a materialized record after all transformations
    pub fn feature_width(&self) -> FlowResult<usize> {
        if self.is_empty() {
            return Err(FlowError::invalid_config("record store is empty"));
        }
        let (features, _) = self.window(&Window::single(0))?;
        Ok(features.dim(1)?)
    }

    /// Split chronologically at `index`: records `[0, index)` and `[index, N)`.
    ///
    /// Each part recomputes its own statistics; transformations are shared.
    pub fn split_at(&self, index: usize) -> FlowResult<(Self, Self)> {
        if index > self.len() {
            return Err(FlowError::invalid_config(format!(
                "split index {} exceeds {} records",
                index,
                self.len()
            )));
        }

        let numeric: Vec<f32> = self.numeric.flatten_all()?.to_vec1()?;
        let categorical: Vec<u32> = self.categorical.flatten_all()?.to_vec1()?;
        let (dn, dc) = (self.numeric_width(), self.categorical_width());

        let make = |lo: usize, hi: usize| -> FlowResult<Self> {
            let mut part = Self::new(
                numeric[lo * dn..hi * dn].to_vec(),
                dn,
                categorical[lo * dc..hi * dc].to_vec(),
                dc,
                self.label_values[lo..hi].to_vec(),
            )?;
            part.numeric_transform = self.numeric_transform.clone();
            part.categorical_transform = self.categorical_transform.clone();
            part.labels_transform = self.labels_transform.clone();
            Ok(part)
        };

        Ok((make(0, index)?, make(index, self.len())?))
    }

    fn apply(&self, pipeline: Option<&Pipeline<Sample>>, data: Tensor) -> FlowResult<Tensor> {
        match pipeline {
            Some(p) => Ok(p.apply(Sample::new(data, self.stats.clone()))?.data),
            None => Ok(data),
        }
    }
}
