//! Loss functions over per-window probabilities

use candle_core::Tensor;

use crate::error::FlowError;
use crate::FlowResult;

const PROB_EPS: f64 = 1e-7;

/// A differentiable criterion comparing predictions with labels
pub trait Loss {
    /// Scalar loss for `predictions` and `labels` of the same shape
    fn loss(&self, predictions: &Tensor, labels: &Tensor) -> FlowResult<Tensor>;
}

/// Binary cross-entropy on probabilities, optionally rescaled by a class weight
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BinaryCrossEntropy {
    weight: Option<f64>,
}

impl BinaryCrossEntropy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn weighted(weight: f64) -> Self {
        Self {
            weight: Some(weight),
        }
    }

    /// Weighted by the malicious-class entry of [`class_weights`]
    pub fn balanced(labels: &[f32]) -> FlowResult<Self> {
        let [_, malicious] = class_weights(labels)?;
        Ok(Self::weighted(malicious))
    }

    pub fn weight(&self) -> Option<f64> {
        self.weight
    }
}

impl Loss for BinaryCrossEntropy {
    fn loss(&self, predictions: &Tensor, labels: &Tensor) -> FlowResult<Tensor> {
        if predictions.dims() != labels.dims() {
            return Err(FlowError::data(format!(
                "prediction shape {:?} does not match label shape {:?}",
                predictions.dims(),
                labels.dims()
            )));
        }
        let labels = labels.to_dtype(predictions.dtype())?;
        let p = predictions.clamp(PROB_EPS, 1.0 - PROB_EPS)?;

        let positive = (&labels * p.log()?)?;
        let negative = (labels.affine(-1.0, 1.0)? * p.affine(-1.0, 1.0)?.log()?)?;
        let loss = (positive + negative)?.neg()?.mean_all()?;

        match self.weight {
            Some(w) => Ok((loss * w)?),
            None => Ok(loss),
        }
    }
}

/// Normalized inverse class proportions `[benign, malicious]` of binary labels
pub fn class_weights(labels: &[f32]) -> FlowResult<[f64; 2]> {
    let total = labels.len() as f64;
    let malicious = labels.iter().filter(|&&l| l != 0.0).count() as f64;
    let benign = total - malicious;
    if malicious == 0.0 || benign == 0.0 {
        return Err(FlowError::data(
            "class weights need at least one label of each class",
        ));
    }

    let inverse = [total / benign, total / malicious];
    let norm = inverse[0] + inverse[1];
    Ok([inverse[0] / norm, inverse[1] / norm])
}
