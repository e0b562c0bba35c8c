//! # Windowed Flow Classification
//!
//! Sliding-window sampling and sequential training for network intrusion
//! detection on NetFlow record datasets (NF-UNSW-NB15-v2, NF-ToN-IoT-v2).
//! Each training sample is a window of consecutive flow records, labelled by
//! its last record.
//!
//! ## Architecture
//!
//! ```text
//!  CSV ─▶ FlowTable ─▶ Preprocessor ─▶ RecordStore
//!                                          │ random / fixed / fair / sequential
//!                                          ▼
//!                                   WindowSampler ─▶ WindowLoader ─▶ Batch
//!                                                                      │
//!          HookRegistry ◀── fire ── Trainer ◀──────────────────────────┘
//!                                     │  ├─ WindowClassifier (ModuleT)
//!                                     │  ├─ Loss / Optimizer
//!                                     │  └─ EarlyStopping ─▶ checkpoint
//!                                     ▼
//!                                  Metric ─▶ report
//! ```

// Data
pub mod config;
pub mod dataset;
pub mod error;
pub mod preprocess;
pub mod store;
pub mod transform;

// Windows and batches
pub mod loader;
pub mod sampler;

// Model and training
pub mod early_stopping;
pub mod experiment;
pub mod hooks;
pub mod loss;
pub mod metrics;
pub mod model;
pub mod trainer;


pub use config::{DatasetProperties, ExperimentConfig, NamedDatasetProperties, SamplerKind};
pub use dataset::{split_csv, FlowTable};
pub use early_stopping::{EarlyStopping, StoppingDecision};
pub use error::FlowError;
pub use experiment::{run_experiment, ExperimentSummary};
pub use hooks::{HookEvent, HookRegistry};
pub use loader::{Batch, BatchLoader, InMemoryLoader, WindowLoader};
pub use loss::{BinaryCrossEntropy, Loss};
pub use metrics::{BinaryClassificationMetric, ClassificationReport, Metric, MetricReport};
pub use model::{ModelConfig, WindowClassifier};
pub use preprocess::Preprocessor;
pub use sampler::{
    FairSlidingWindowSampler, FixedWindowSampler, RandomSlidingWindowSampler,
    SequentialWindowSampler, Window, WindowSampler,
};
pub use store::{FeatureStats, RecordStore};
pub use trainer::{OptimizerConfig, TrainOptions, TrainReport, Trainer};
pub use transform::{Pipeline, PipelineBuilder, Sample};

/// Result type for flow pipeline operations
pub type FlowResult<T> = Result<T, FlowError>;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        // Data
        DatasetProperties,
        ExperimentConfig,
        FlowTable,
        Preprocessor,
        RecordStore,
        PipelineBuilder,
        Sample,

        // Sampling
        FairSlidingWindowSampler,
        FixedWindowSampler,
        RandomSlidingWindowSampler,
        SequentialWindowSampler,
        WindowSampler,
        WindowLoader,
        BatchLoader,

        // Training
        BinaryClassificationMetric,
        BinaryCrossEntropy,
        HookEvent,
        Metric,
        ModelConfig,
        TrainOptions,
        Trainer,
        WindowClassifier,

        // Result type
        FlowResult,
        FlowError,
    };
}
