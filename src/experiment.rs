//! # End-to-End Experiment
//!
//! Wires the whole pipeline for one [`ExperimentConfig`]: ingest the train
//! and test CSVs, fit preprocessing on the training table, build stores and
//! loaders, train a [`WindowClassifier`], save it and score the test split.

use candle_core::Device;
use serde::Serialize;

use crate::config::{ExperimentConfig, SamplerKind};
use crate::dataset::FlowTable;
use crate::loader::{BatchLoader, WindowLoader};
use crate::loss::BinaryCrossEntropy;
use crate::metrics::{BinaryClassificationMetric, ClassificationReport};
use crate::model::WindowClassifier;
use crate::preprocess::Preprocessor;
use crate::sampler::{
    FairSlidingWindowSampler, RandomSlidingWindowSampler, SequentialWindowSampler, WindowSampler,
};
use crate::store::RecordStore;
use crate::trainer::{TrainReport, Trainer};
use crate::transform::{one_hot, PipelineBuilder};
use crate::FlowResult;

#[derive(Debug, Clone, Serialize)]
pub struct ExperimentSummary {
    pub input_dim: usize,
    pub num_parameters: usize,
    pub train: TrainReport,
    pub test: ClassificationReport,
}

/// Run training and testing as described by `config`
pub fn run_experiment(config: &ExperimentConfig, device: &Device) -> FlowResult<ExperimentSummary> {
    config.validate()?;
    let properties = config.properties()?;

    let train_table = FlowTable::from_csv(&config.train_path, &properties)?;
    let test_table = FlowTable::from_csv(&config.test_path, &properties)?;

    let preprocessor = Preprocessor::fit(&train_table, config.bound, config.categorical_levels)?;
    let mut train_store = preprocessor.transform(train_table)?.into_store()?;
    let mut test_store = preprocessor.transform(test_table)?.into_store()?;

    let mut valid_store = match config.validation_fraction {
        Some(fraction) if fraction > 0.0 => {
            let held_out = (train_store.len() as f64 * fraction) as usize;
            let (train, valid) = train_store.split_at(train_store.len() - held_out)?;
            train_store = train;
            Some(valid)
        }
        _ => None,
    };

    let mut encoding = PipelineBuilder::new();
    encoding.add_step("categorical_one_hot", 1, one_hot(config.categorical_levels));
    let encoding = encoding.build();
    train_store.set_categorical_transform(encoding.clone());
    test_store.set_categorical_transform(encoding.clone());
    if let Some(store) = valid_store.as_mut() {
        store.set_categorical_transform(encoding);
    }

    let input_dim = train_store.feature_width()?;
    let (model, varmap) = WindowClassifier::new_random(input_dim, config.model.clone(), device)?;
    let num_parameters: usize = varmap.all_vars().iter().map(|v| v.elem_count()).sum();
    log::info!("Total number of parameters: {}", num_parameters);

    let criterion = criterion(config, &train_store);
    let mut trainer = Trainer::with_adamw(model, varmap, criterion, &config.optimizer, device)?;
    trainer.set_checkpoint_path(&config.checkpoint_path);

    let mut train_loader = WindowLoader::new(
        &train_store,
        train_sampler(config, &train_store)?,
        config.batch_size,
    )?;
    let mut valid_loader = match &valid_store {
        Some(store) => Some(WindowLoader::new(
            store,
            SequentialWindowSampler::new(store.len(), config.window_size)?,
            config.batch_size,
        )?),
        None => None,
    };

    let train = trainer.train(
        config.n_epoch,
        &mut train_loader,
        &config.train,
        valid_loader.as_mut().map(|l| l as &mut dyn BatchLoader),
    )?;
    trainer.save_model(&config.save_path)?;

    let mut test_loader = WindowLoader::new(
        &test_store,
        SequentialWindowSampler::new(test_store.len(), config.window_size)?,
        config.batch_size,
    )?;
    let mut metric = BinaryClassificationMetric::new();
    trainer.test(&mut test_loader, Some(&mut metric))?;

    Ok(ExperimentSummary {
        input_dim,
        num_parameters,
        train,
        test: metric.report(),
    })
}

fn train_sampler(
    config: &ExperimentConfig,
    store: &RecordStore,
) -> FlowResult<Box<dyn WindowSampler>> {
    let (n, w, seed) = (store.len(), config.window_size, config.seed);
    let sampler: Box<dyn WindowSampler> = match config.sampler {
        SamplerKind::Random => Box::new(RandomSlidingWindowSampler::with_seed(n, w, seed)?),
        SamplerKind::Fair => Box::new(FairSlidingWindowSampler::with_seed(
            store.labels(),
            0.0,
            w,
            seed,
        )?),
        SamplerKind::Sequential => Box::new(SequentialWindowSampler::new(n, w)?),
    };
    Ok(sampler)
}

fn criterion(config: &ExperimentConfig, store: &RecordStore) -> BinaryCrossEntropy {
    if !config.class_weighting {
        return BinaryCrossEntropy::new();
    }
    match BinaryCrossEntropy::balanced(store.labels()) {
        Ok(bce) => {
            log::info!("Malicious class weight: {:.4}", bce.weight().unwrap_or(1.0));
            bce
        }
        Err(e) => {
            log::warn!("Class weighting disabled: {}", e);
            BinaryCrossEntropy::new()
        }
    }
}
