//! # Training Loop
//!
//! [`Trainer`] drives a model over [`BatchLoader`]s:
//!
//! ```text
//! train:  BeforeTrain ─▶ ( BeforeEpoch ─▶ (BeforeBatch ─ step ─ AfterBatch)* ─▶ AfterEpoch
//!                          [─▶ BeforeValidation ─ eval* ─ AfterValidation ─▶ early stop?] )*
//!                     ─▶ AfterTrain
//! test:   BeforeTest ─▶ eval* ─▶ metric.apply() ─▶ AfterTest
//! ```
//!
//! Every phase boundary fires its hook, registered callbacks or not. The model
//! is any `candle_nn::ModuleT`; `forward_t(xs, train)` switches between train
//! and evaluation behaviour. Evaluation outputs are detached from the graph.

use std::path::{Path, PathBuf};

use candle_core::{Device, ModuleT, Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};

use crate::early_stopping::{EarlyStopping, StoppingDecision, DEFAULT_CHECKPOINT_PATH};
use crate::error::FlowError;
use crate::hooks::{HookEvent, HookRegistry};
use crate::loader::{Batch, BatchLoader};
use crate::loss::Loss;
use crate::metrics::{Metric, MetricReport};
use crate::FlowResult;

pub const DEFAULT_MODEL_PATH: &str = "saves/model.safetensors";

// ═══════════════════════════════════════════════════════════════════════════
// CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════

/// Per-call options of [`Trainer::train`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainOptions {
    /// Batches per epoch; the whole loader when unset
    pub epoch_steps: Option<usize>,
    /// Validate every this many epochs
    pub epochs_until_validation: Option<usize>,
    /// Regressions tolerated before stopping
    pub patience: Option<usize>,
    /// Relative score tolerance for early stopping
    pub delta: Option<f64>,
    /// Also validate after the last epoch when it is off the schedule
    pub validate_final_epoch: bool,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            epoch_steps: None,
            epochs_until_validation: None,
            patience: None,
            delta: None,
            validate_final_epoch: true,
        }
    }
}

impl TrainOptions {
    fn validate(&self) -> FlowResult<()> {
        if self.epoch_steps == Some(0) {
            return Err(FlowError::invalid_config("epoch_steps must be positive"));
        }
        if self.epochs_until_validation == Some(0) {
            return Err(FlowError::invalid_config(
                "epochs_until_validation must be positive",
            ));
        }
        Ok(())
    }

    fn early_stopping(&self, checkpoint: &Path) -> Option<EarlyStopping> {
        match (self.patience, self.delta) {
            (Some(patience), Some(delta)) => {
                Some(EarlyStopping::with_checkpoint(patience, delta, checkpoint))
            }
            _ => None,
        }
    }
}

/// AdamW hyper-parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            learning_rate: 5e-4,
            weight_decay: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
        }
    }
}

impl OptimizerConfig {
    pub fn adamw(&self, vars: Vec<Var>) -> FlowResult<AdamW> {
        let optimizer = AdamW::new(
            vars,
            ParamsAdamW {
                lr: self.learning_rate,
                weight_decay: self.weight_decay,
                beta1: self.beta1,
                beta2: self.beta2,
                eps: self.eps,
            },
        )?;
        Ok(optimizer)
    }
}

/// Outcome of [`Trainer::train`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrainReport {
    /// Mean training loss over the epochs actually run
    pub mean_loss: f64,
    pub epoch_losses: Vec<f64>,
    /// `(epoch, loss)` for every validation pass
    pub validation_losses: Vec<(usize, f64)>,
    pub stopped_early: bool,
}

impl TrainReport {
    pub fn epochs_run(&self) -> usize {
        self.epoch_losses.len()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TRAINER
// ═══════════════════════════════════════════════════════════════════════════

pub struct Trainer<M, L, O> {
    model: M,
    var_map: VarMap,
    criterion: L,
    optimizer: O,
    device: Device,
    hooks: HookRegistry,
    checkpoint_path: PathBuf,
    training: bool,
}

impl<M: ModuleT, L: Loss> Trainer<M, L, AdamW> {
    /// Trainer optimizing every variable of `var_map` with AdamW
    pub fn with_adamw(
        model: M,
        var_map: VarMap,
        criterion: L,
        config: &OptimizerConfig,
        device: &Device,
    ) -> FlowResult<Self> {
        let optimizer = config.adamw(var_map.all_vars())?;
        Ok(Self::new(model, var_map, criterion, optimizer, device))
    }
}

impl<M: ModuleT, L: Loss, O: Optimizer> Trainer<M, L, O> {
    pub fn new(model: M, var_map: VarMap, criterion: L, optimizer: O, device: &Device) -> Self {
        Self {
            model,
            var_map,
            criterion,
            optimizer,
            device: device.clone(),
            hooks: HookRegistry::new(),
            checkpoint_path: PathBuf::from(DEFAULT_CHECKPOINT_PATH),
            training: false,
        }
    }

    /// Where early stopping keeps its best weights
    pub fn set_checkpoint_path(&mut self, path: impl Into<PathBuf>) {
        self.checkpoint_path = path.into();
    }

    pub fn checkpoint_path(&self) -> &Path {
        &self.checkpoint_path
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut HookRegistry {
        &mut self.hooks
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn var_map(&self) -> &VarMap {
        &self.var_map
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Whether the model is currently in train mode
    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Train for up to `n_epoch` epochs, validating and early stopping per `options`
    pub fn train(
        &mut self,
        n_epoch: usize,
        train_loader: &mut dyn BatchLoader,
        options: &TrainOptions,
        mut valid_loader: Option<&mut dyn BatchLoader>,
    ) -> FlowResult<TrainReport> {
        if n_epoch == 0 {
            return Err(FlowError::invalid_config("n_epoch must be positive"));
        }
        options.validate()?;
        check_epoch_steps(options.epoch_steps, train_loader)?;

        let schedule = match (valid_loader.is_some(), options.epochs_until_validation) {
            (true, Some(k)) => Some(k),
            _ => None,
        };
        let mut early_stopping = schedule.and(options.early_stopping(&self.checkpoint_path));

        log::info!(
            "Training for {} epochs ({} batches per epoch)",
            n_epoch,
            options.epoch_steps.unwrap_or(train_loader.num_batches())
        );

        let mut report = TrainReport::default();
        self.hooks.fire(HookEvent::BeforeTrain)?;
        self.training = true;

        for epoch in 0..n_epoch {
            let loss = self.train_one_epoch(train_loader, options.epoch_steps)?;
            report.epoch_losses.push(loss);
            log::info!("Epoch {}/{}: train loss {:.6}", epoch + 1, n_epoch, loss);

            let (Some(k), Some(valid)) = (schedule, valid_loader.as_deref_mut()) else {
                continue;
            };
            let last = epoch + 1 == n_epoch;
            if (epoch + 1) % k != 0 && !(last && options.validate_final_epoch) {
                continue;
            }

            let val_loss = self.validate(valid)?;
            report.validation_losses.push((epoch, val_loss));
            log::info!("Epoch {}/{}: validation loss {:.6}", epoch + 1, n_epoch, val_loss);

            if let Some(stopper) = early_stopping.as_mut() {
                match stopper.evaluate(val_loss, &self.var_map)? {
                    StoppingDecision::Stop => {
                        log::info!(
                            "Early stopping after epoch {}; restoring best weights (val loss {:.6})",
                            epoch + 1,
                            stopper.val_loss_min()
                        );
                        stopper.restore(&mut self.var_map)?;
                        report.stopped_early = true;
                        break;
                    }
                    StoppingDecision::NoImprovement { remaining, .. } => {
                        log::debug!("No improvement, {} regression(s) left", remaining);
                    }
                    StoppingDecision::NewBest => {}
                }
            }
            self.training = true;
        }

        self.training = false;
        self.hooks.fire(HookEvent::AfterTrain)?;

        report.mean_loss =
            report.epoch_losses.iter().sum::<f64>() / report.epoch_losses.len() as f64;
        Ok(report)
    }

    /// One epoch of parameter updates; returns the mean batch loss
    pub fn train_one_epoch(
        &mut self,
        loader: &mut dyn BatchLoader,
        epoch_steps: Option<usize>,
    ) -> FlowResult<f64> {
        check_epoch_steps(epoch_steps, loader)?;
        self.training = true;
        self.hooks.fire(HookEvent::BeforeEpoch)?;

        let limit = epoch_steps.unwrap_or(usize::MAX);
        let pb = progress_bar(epoch_steps.unwrap_or(loader.num_batches()), "train");
        let mut total = 0.0;
        let mut steps = 0usize;
        for batch in loader.batches().take(limit) {
            let batch = batch?;
            self.hooks.fire(HookEvent::BeforeBatch)?;
            let loss = self.train_step(&batch)?;
            self.hooks.fire(HookEvent::AfterBatch)?;
            total += loss;
            steps += 1;
            pb.set_message(format!("loss {:.4}", loss));
            pb.inc(1);
        }
        pb.finish_and_clear();

        if let Some(requested) = epoch_steps {
            if steps < requested {
                return Err(FlowError::data(format!(
                    "loader exhausted after {} of {} batches",
                    steps, requested
                )));
            }
        }
        if steps == 0 {
            return Err(FlowError::invalid_config("training loader yielded no batches"));
        }

        self.hooks.fire(HookEvent::AfterEpoch)?;
        Ok(total / steps as f64)
    }

    /// Forward, loss, backward and optimizer update for one batch
    pub fn train_step(&mut self, batch: &Batch) -> FlowResult<f64> {
        let batch = batch.to_device(&self.device)?;
        let predictions = self.model.forward_t(&batch.inputs, true)?;
        let loss = self.criterion.loss(&predictions, &batch.labels)?;
        self.optimizer.backward_step(&loss)?;
        Ok(scalar(&loss)?)
    }

    /// Mean loss over every batch of `loader`, in evaluation mode
    pub fn validate(&mut self, loader: &mut dyn BatchLoader) -> FlowResult<f64> {
        self.training = false;
        self.hooks.fire(HookEvent::BeforeValidation)?;

        let pb = progress_bar(loader.num_batches(), "validate");
        let mut total = 0.0;
        let mut steps = 0usize;
        for batch in loader.batches() {
            let batch = batch?;
            let predictions = self.predict(&batch.inputs)?;
            let labels = batch.labels.to_device(&self.device)?;
            total += scalar(&self.criterion.loss(&predictions, &labels)?)?;
            steps += 1;
            pb.inc(1);
        }
        pb.finish_and_clear();
        if steps == 0 {
            return Err(FlowError::invalid_config(
                "validation loader yielded no batches",
            ));
        }

        self.hooks.fire(HookEvent::AfterValidation)?;
        Ok(total / steps as f64)
    }

    /// Feed every batch of `loader` to `metric`, then finalize it
    pub fn test(
        &mut self,
        loader: &mut dyn BatchLoader,
        metric: Option<&mut dyn Metric>,
    ) -> FlowResult<MetricReport> {
        let metric = metric.ok_or(FlowError::MissingMetric)?;
        self.training = false;
        self.hooks.fire(HookEvent::BeforeTest)?;

        let pb = progress_bar(loader.num_batches(), "test");
        let mut batches = 0usize;
        for batch in loader.batches() {
            let batch = batch?;
            let predictions = self.predict(&batch.inputs)?;
            metric.step(&predictions, &batch.labels)?;
            batches += 1;
            pb.inc(1);
        }
        pb.finish_and_clear();
        log::debug!("Tested on {} batches", batches);

        let report = metric.apply()?;
        self.hooks.fire(HookEvent::AfterTest)?;
        Ok(report)
    }

    /// Evaluation-mode forward pass, detached from the graph
    pub fn predict(&self, inputs: &Tensor) -> FlowResult<Tensor> {
        let inputs = inputs.to_device(&self.device)?;
        Ok(self.model.forward_t(&inputs, false)?.detach())
    }

    /// Write model parameters (no optimizer state) as safetensors
    pub fn save_model(&self, path: impl AsRef<Path>) -> FlowResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        self.var_map.save(path)?;
        log::info!("Model saved to {:?}", path);
        Ok(())
    }

    /// Overwrite model parameters from a safetensors file
    pub fn load_model(&mut self, path: impl AsRef<Path>) -> FlowResult<()> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(FlowError::MissingWeights(path.to_path_buf()));
        }
        self.var_map.load(path)?;
        log::info!("Model loaded from {:?}", path);
        Ok(())
    }
}

/// Per-loop bar; hidden when stderr is not a terminal
fn progress_bar(len: usize, phase: &'static str) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    let style = ProgressStyle::default_bar()
        .template("{prefix:>8} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos:>6}/{len:6} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb.set_prefix(phase);
    pb
}

fn check_epoch_steps(epoch_steps: Option<usize>, loader: &dyn BatchLoader) -> FlowResult<()> {
    match epoch_steps {
        Some(requested) if requested > loader.num_batches() => Err(FlowError::EpochStepsExceeded {
            requested,
            available: loader.num_batches(),
        }),
        _ => Ok(()),
    }
}

fn scalar(loss: &Tensor) -> candle_core::Result<f64> {
    loss.to_dtype(candle_core::DType::F64)?.to_scalar::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::InMemoryLoader;
    use crate::loss::BinaryCrossEntropy;
    use crate::metrics::BinaryClassificationMetric;
    use crate::model::{ModelConfig, WindowClassifier};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use tempfile::TempDir;

    const WINDOW: usize = 3;
    const WIDTH: usize = 4;

    fn loader(n_batches: usize) -> InMemoryLoader {
        let device = Device::Cpu;
        let batches = (0..n_batches)
            .map(|i| {
                let inputs = Tensor::randn(0f32, 1.0, (2, WINDOW, WIDTH), &device).unwrap();
                let labels = Tensor::new(&[(i % 2) as f32, 1.0], &device).unwrap();
                Batch::new(inputs, labels)
            })
            .collect();
        InMemoryLoader::new(batches)
    }

    fn trainer(lr: f64) -> Trainer<WindowClassifier, BinaryCrossEntropy, AdamW> {
        let device = Device::Cpu;
        let (model, varmap) = WindowClassifier::new_random(WIDTH, ModelConfig::tiny(), &device).unwrap();
        let config = OptimizerConfig {
            learning_rate: lr,
            weight_decay: 0.0,
            ..OptimizerConfig::default()
        };
        Trainer::with_adamw(model, varmap, BinaryCrossEntropy::new(), &config, &device).unwrap()
    }

    fn counter(trainer: &mut Trainer<WindowClassifier, BinaryCrossEntropy, AdamW>, event: HookEvent) -> Rc<Cell<usize>> {
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        trainer.hooks_mut().register(event, move || {
            c.set(c.get() + 1);
            Ok(())
        });
        count
    }

    fn snapshot(varmap: &VarMap) -> Vec<(String, Vec<f32>)> {
        let data = varmap.data().lock().unwrap();
        let mut vars: Vec<(String, Vec<f32>)> = data
            .iter()
            .map(|(k, v)| {
                (
                    k.clone(),
                    v.as_tensor().flatten_all().unwrap().to_vec1().unwrap(),
                )
            })
            .collect();
        vars.sort_by(|a, b| a.0.cmp(&b.0));
        vars
    }

    #[test]
    fn test_epoch_steps_limits_batches() {
        let mut t = trainer(1e-3);
        let batches = counter(&mut t, HookEvent::AfterBatch);
        let epochs = counter(&mut t, HookEvent::AfterEpoch);

        let options = TrainOptions {
            epoch_steps: Some(3),
            ..TrainOptions::default()
        };
        let report = t.train(2, &mut loader(5), &options, None).unwrap();

        assert_eq!(batches.get(), 6);
        assert_eq!(epochs.get(), 2);
        assert_eq!(report.epochs_run(), 2);
        assert!(report.mean_loss.is_finite());
    }

    #[test]
    fn test_epoch_steps_exceeding_batches_rejected() {
        let mut t = trainer(1e-3);
        let before = counter(&mut t, HookEvent::BeforeTrain);
        let options = TrainOptions {
            epoch_steps: Some(6),
            ..TrainOptions::default()
        };
        let err = t.train(1, &mut loader(5), &options, None).unwrap_err();

        assert!(matches!(
            err,
            FlowError::EpochStepsExceeded {
                requested: 6,
                available: 5
            }
        ));
        assert_eq!(before.get(), 0);
    }

    #[test]
    fn test_zero_epochs_rejected() {
        let mut t = trainer(1e-3);
        let err = t.train(0, &mut loader(2), &TrainOptions::default(), None).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_validation_schedule_with_final_epoch() {
        let mut t = trainer(1e-3);
        let validations = counter(&mut t, HookEvent::AfterValidation);
        let options = TrainOptions {
            epochs_until_validation: Some(2),
            ..TrainOptions::default()
        };
        let mut valid = loader(2);
        let report = t
            .train(5, &mut loader(2), &options, Some(&mut valid))
            .unwrap();

        // epochs 2, 4 and the final 5
        assert_eq!(validations.get(), 3);
        let epochs: Vec<usize> = report.validation_losses.iter().map(|(e, _)| *e).collect();
        assert_eq!(epochs, vec![1, 3, 4]);
        assert!(!t.is_training());
    }

    #[test]
    fn test_validation_schedule_without_final_epoch() {
        let mut t = trainer(1e-3);
        let options = TrainOptions {
            epochs_until_validation: Some(2),
            validate_final_epoch: false,
            ..TrainOptions::default()
        };
        let mut valid = loader(2);
        let report = t
            .train(5, &mut loader(2), &options, Some(&mut valid))
            .unwrap();
        assert_eq!(report.validation_losses.len(), 2);
    }

    #[test]
    fn test_early_stopping_restores_checkpoint() {
        let dir = TempDir::new().unwrap();
        // lr 0 keeps the validation loss constant, so every later pass regresses
        let mut t = trainer(0.0);
        t.set_checkpoint_path(dir.path().join("best.safetensors"));
        let options = TrainOptions {
            epochs_until_validation: Some(1),
            patience: Some(1),
            delta: Some(0.5),
            ..TrainOptions::default()
        };
        let mut valid = loader(2);
        let before = snapshot(t.var_map());
        let report = t
            .train(10, &mut loader(3), &options, Some(&mut valid))
            .unwrap();

        assert!(report.stopped_early);
        assert_eq!(report.epochs_run(), 2);
        assert!(dir.path().join("best.safetensors").exists());
        assert_eq!(snapshot(t.var_map()), before);
    }

    #[test]
    fn test_empty_validation_loader_rejected() {
        let mut t = trainer(1e-3);
        let err = t.validate(&mut InMemoryLoader::default()).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_test_requires_metric() {
        let mut t = trainer(1e-3);
        let err = t.test(&mut loader(1), None).unwrap_err();
        assert!(matches!(err, FlowError::MissingMetric));
    }

    #[test]
    fn test_test_feeds_metric() {
        let mut t = trainer(1e-3);
        let after = counter(&mut t, HookEvent::AfterTest);
        let mut metric = BinaryClassificationMetric::new();
        let report = t.test(&mut loader(3), Some(&mut metric)).unwrap();

        assert_eq!(metric.confusion().total(), 6);
        assert!(report.contains_key("f1"));
        assert_eq!(after.get(), 1);
    }

    struct RecordingMetric {
        events: Rc<RefCell<Vec<&'static str>>>,
    }

    impl Metric for RecordingMetric {
        fn step(&mut self, _predictions: &Tensor, _labels: &Tensor) -> FlowResult<()> {
            self.events.borrow_mut().push("step");
            Ok(())
        }

        fn apply(&mut self) -> FlowResult<MetricReport> {
            self.events.borrow_mut().push("apply");
            Ok(MetricReport::new())
        }
    }

    #[test]
    fn test_after_test_fires_once_metric_is_applied() {
        let mut t = trainer(1e-3);
        let events = Rc::new(RefCell::new(Vec::new()));
        let e = Rc::clone(&events);
        t.hooks_mut().register(HookEvent::AfterTest, move || {
            e.borrow_mut().push("after_test");
            Ok(())
        });

        let mut metric = RecordingMetric {
            events: Rc::clone(&events),
        };
        t.test(&mut loader(2), Some(&mut metric)).unwrap();
        assert_eq!(*events.borrow(), vec!["step", "step", "apply", "after_test"]);
    }

    #[test]
    fn test_progress_bar_sized_to_loop() {
        let pb = progress_bar(7, "train");
        assert_eq!(pb.length(), Some(7));
        assert_eq!(pb.prefix(), "train");
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("saves/model.safetensors");

        let a = trainer(1e-3);
        a.save_model(&path).unwrap();

        let mut b = trainer(1e-3);
        assert_ne!(snapshot(a.var_map()), snapshot(b.var_map()));
        b.load_model(&path).unwrap();
        assert_eq!(snapshot(a.var_map()), snapshot(b.var_map()));
    }

    #[test]
    fn test_load_missing_weights() {
        let dir = TempDir::new().unwrap();
        let mut t = trainer(1e-3);
        let err = t.load_model(dir.path().join("nope.safetensors")).unwrap_err();
        assert!(matches!(err, FlowError::MissingWeights(_)));
        assert!(err.is_resource());
    }

    #[test]
    fn test_hook_error_aborts_training() {
        let mut t = trainer(1e-3);
        t.hooks_mut().register(HookEvent::BeforeEpoch, || {
            Err(FlowError::Hook {
                event: "before_epoch".into(),
                message: "halt".into(),
            })
        });
        assert!(t.train(3, &mut loader(2), &TrainOptions::default(), None).is_err());
    }
}
