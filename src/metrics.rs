//! # Evaluation Metrics
//!
//! A [`Metric`] accumulates `(predictions, labels)` batch by batch during a
//! test pass and is finalized once with [`Metric::apply`].
//!
//! ```rust,ignore
//! use nids_window::metrics::BinaryClassificationMetric;
//!
//! let mut metric = BinaryClassificationMetric::new();
//! let report = trainer.test(&mut test_loader, Some(&mut metric))?;
//! println!("{}", metric.report());
//! ```

use std::collections::BTreeMap;
use std::fmt;

use candle_core::{DType, Tensor};
use serde::Serialize;

use crate::error::FlowError;
use crate::FlowResult;

/// Named scalar results of a finished metric
pub type MetricReport = BTreeMap<String, f64>;

pub trait Metric {
    /// Accumulate one batch
    fn step(&mut self, predictions: &Tensor, labels: &Tensor) -> FlowResult<()>;

    /// Finalize the accumulated batches
    fn apply(&mut self) -> FlowResult<MetricReport>;
}

/// Confusion counts at a fixed probability threshold
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConfusionMatrix {
    pub true_positive: u64,
    pub false_positive: u64,
    pub true_negative: u64,
    pub false_negative: u64,
}

impl ConfusionMatrix {
    pub fn total(&self) -> u64 {
        self.true_positive + self.false_positive + self.true_negative + self.false_negative
    }
}

/// Scores derived from a [`ConfusionMatrix`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ClassificationReport {
    pub confusion: ConfusionMatrix,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub false_positive_rate: f64,
}

impl ClassificationReport {
    pub fn from_confusion(confusion: ConfusionMatrix) -> Self {
        let ConfusionMatrix {
            true_positive: tp,
            false_positive: fp,
            true_negative: tn,
            false_negative: fn_,
        } = confusion;
        let ratio = |num: u64, den: u64| if den == 0 { 0.0 } else { num as f64 / den as f64 };

        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let f1 = if precision + recall == 0.0 {
            0.0
        } else {
            2.0 * precision * recall / (precision + recall)
        };

        Self {
            confusion,
            accuracy: ratio(tp + tn, confusion.total()),
            precision,
            recall,
            f1,
            false_positive_rate: ratio(fp, fp + tn),
        }
    }

    pub fn to_map(&self) -> MetricReport {
        [
            ("accuracy", self.accuracy),
            ("precision", self.precision),
            ("recall", self.recall),
            ("f1", self.f1),
            ("false_positive_rate", self.false_positive_rate),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.confusion;
        writeln!(f, "samples:   {}", c.total())?;
        writeln!(
            f,
            "confusion: tp={} fp={} tn={} fn={}",
            c.true_positive, c.false_positive, c.true_negative, c.false_negative
        )?;
        writeln!(f, "accuracy:  {:.4}", self.accuracy)?;
        writeln!(f, "precision: {:.4}", self.precision)?;
        writeln!(f, "recall:    {:.4}", self.recall)?;
        writeln!(f, "f1:        {:.4}", self.f1)?;
        write!(f, "fpr:       {:.4}", self.false_positive_rate)
    }
}

/// Thresholded binary classification scores
#[derive(Debug, Clone)]
pub struct BinaryClassificationMetric {
    threshold: f32,
    confusion: ConfusionMatrix,
}

impl Default for BinaryClassificationMetric {
    fn default() -> Self {
        Self::with_threshold(0.5)
    }
}

impl BinaryClassificationMetric {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_threshold(threshold: f32) -> Self {
        Self {
            threshold,
            confusion: ConfusionMatrix::default(),
        }
    }

    pub fn confusion(&self) -> ConfusionMatrix {
        self.confusion
    }

    pub fn report(&self) -> ClassificationReport {
        ClassificationReport::from_confusion(self.confusion)
    }

    pub fn reset(&mut self) {
        self.confusion = ConfusionMatrix::default();
    }
}

impl Metric for BinaryClassificationMetric {
    fn step(&mut self, predictions: &Tensor, labels: &Tensor) -> FlowResult<()> {
        let predictions = predictions.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
        let labels = labels.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
        if predictions.len() != labels.len() {
            return Err(FlowError::DimensionMismatch {
                expected: labels.len(),
                got: predictions.len(),
            });
        }

        for (p, y) in predictions.into_iter().zip(labels) {
            let predicted = p >= self.threshold;
            let actual = y != 0.0;
            let c = &mut self.confusion;
            match (predicted, actual) {
                (true, true) => c.true_positive += 1,
                (true, false) => c.false_positive += 1,
                (false, false) => c.true_negative += 1,
                (false, true) => c.false_negative += 1,
            }
        }
        Ok(())
    }

    fn apply(&mut self) -> FlowResult<MetricReport> {
        let report = self.report();
        log::info!("Test results:\n{}", report);
        Ok(report.to_map())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_confusion_counts() {
        let device = Device::Cpu;
        let mut metric = BinaryClassificationMetric::new();
        let p = Tensor::new(&[0.9f32, 0.8, 0.1, 0.3, 0.6], &device).unwrap();
        let y = Tensor::new(&[1.0f32, 0.0, 0.0, 1.0, 1.0], &device).unwrap();
        metric.step(&p, &y).unwrap();

        assert_eq!(
            metric.confusion(),
            ConfusionMatrix {
                true_positive: 2,
                false_positive: 1,
                true_negative: 1,
                false_negative: 1,
            }
        );

        let report = metric.apply().unwrap();
        assert!((report["accuracy"] - 0.6).abs() < 1e-12);
        assert!((report["precision"] - 2.0 / 3.0).abs() < 1e-12);
        assert!((report["recall"] - 2.0 / 3.0).abs() < 1e-12);
        assert!((report["false_positive_rate"] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_accumulates_across_steps() {
        let device = Device::Cpu;
        let mut metric = BinaryClassificationMetric::new();
        for _ in 0..3 {
            let p = Tensor::new(&[0.7f32, 0.2], &device).unwrap();
            let y = Tensor::new(&[1.0f32, 0.0], &device).unwrap();
            metric.step(&p, &y).unwrap();
        }
        let report = metric.report();
        assert_eq!(report.confusion.total(), 6);
        assert_eq!(report.f1, 1.0);
    }

    #[test]
    fn test_empty_metric_reports_zeros() {
        let report = BinaryClassificationMetric::new().report();
        assert_eq!(report.accuracy, 0.0);
        assert_eq!(report.f1, 0.0);
        assert!(report.to_string().contains("samples:   0"));
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let device = Device::Cpu;
        let mut metric = BinaryClassificationMetric::new();
        let p = Tensor::new(&[0.7f32, 0.2], &device).unwrap();
        let y = Tensor::new(&[1.0f32], &device).unwrap();
        assert!(metric.step(&p, &y).is_err());
    }
}
