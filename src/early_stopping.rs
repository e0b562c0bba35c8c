//! # Early Stopping
//!
//! Tracks the best validation score seen during one `train` call and keeps
//! the matching weights in a single checkpoint file.
//!
//! The score is the negated validation loss. A later score counts as a
//! regression when it falls below `best - best * delta`; `patience`
//! consecutive regressions stop training.

use std::path::{Path, PathBuf};

use candle_nn::VarMap;

use crate::error::FlowError;
use crate::FlowResult;

pub const DEFAULT_CHECKPOINT_PATH: &str = "checkpoints/checkpoint.safetensors";

/// Outcome of one [`EarlyStopping::evaluate`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoppingDecision {
    /// Score improved (or was the first one); weights were checkpointed
    NewBest,
    /// Score regressed; `remaining` more regressions are tolerated
    NoImprovement { count: usize, remaining: usize },
    /// Patience exhausted
    Stop,
}

impl StoppingDecision {
    pub fn is_stop(&self) -> bool {
        matches!(self, StoppingDecision::Stop)
    }
}

#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    delta: f64,
    counter: usize,
    best_score: Option<f64>,
    val_loss_min: f64,
    checkpoint_path: PathBuf,
}

impl EarlyStopping {
    pub fn new(patience: usize, delta: f64) -> Self {
        Self::with_checkpoint(patience, delta, DEFAULT_CHECKPOINT_PATH)
    }

    pub fn with_checkpoint(patience: usize, delta: f64, path: impl Into<PathBuf>) -> Self {
        Self {
            patience,
            delta,
            counter: 0,
            best_score: None,
            val_loss_min: f64::INFINITY,
            checkpoint_path: path.into(),
        }
    }

    pub fn patience(&self) -> usize {
        self.patience
    }

    pub fn delta(&self) -> f64 {
        self.delta
    }

    pub fn counter(&self) -> usize {
        self.counter
    }

    pub fn best_score(&self) -> Option<f64> {
        self.best_score
    }

    /// Lowest validation loss checkpointed so far
    pub fn val_loss_min(&self) -> f64 {
        self.val_loss_min
    }

    pub fn checkpoint_path(&self) -> &Path {
        &self.checkpoint_path
    }

    /// Record a validation loss, checkpointing `weights` on improvement
    pub fn evaluate(&mut self, val_loss: f64, weights: &VarMap) -> FlowResult<StoppingDecision> {
        let score = -val_loss;

        let best = match self.best_score {
            None => {
                self.improve(score, val_loss, weights)?;
                return Ok(StoppingDecision::NewBest);
            }
            Some(best) => best,
        };

        if score < best - best * self.delta {
            self.counter += 1;
            log::info!(
                "EarlyStopping counter: {} out of {}",
                self.counter,
                self.patience
            );
            if self.counter >= self.patience {
                return Ok(StoppingDecision::Stop);
            }
            return Ok(StoppingDecision::NoImprovement {
                count: self.counter,
                remaining: self.patience - self.counter,
            });
        }

        self.improve(score, val_loss, weights)?;
        self.counter = 0;
        Ok(StoppingDecision::NewBest)
    }

    /// Load the checkpointed weights back into `weights`
    pub fn restore(&self, weights: &mut VarMap) -> FlowResult<()> {
        if !self.checkpoint_path.exists() {
            return Err(FlowError::MissingWeights(self.checkpoint_path.clone()));
        }
        weights.load(&self.checkpoint_path)?;
        log::info!("Restored best weights from {:?}", self.checkpoint_path);
        Ok(())
    }

    fn improve(&mut self, score: f64, val_loss: f64, weights: &VarMap) -> FlowResult<()> {
        log::debug!(
            "Validation loss decreased ({:.6} --> {:.6}). Saving model...",
            self.val_loss_min,
            val_loss
        );
        if let Some(parent) = self.checkpoint_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        weights.save(&self.checkpoint_path)?;
        self.best_score = Some(score);
        self.val_loss_min = val_loss;
        Ok(())
    }
}
