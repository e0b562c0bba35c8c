//! # Experiment Configuration
//!
//! JSON-backed settings for a training run and for the datasets it can read.
//! Every section has defaults, so a config file only needs the keys it
//! changes:
//!
//! ```json
//! {
//!   "dataset": "nf_unsw_nb15_v2",
//!   "train_path": "datasets/NF-UNSW-NB15-v2/train.csv",
//!   "test_path": "datasets/NF-UNSW-NB15-v2/test.csv",
//!   "window_size": 8,
//!   "train": { "epoch_steps": 500 }
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::early_stopping::DEFAULT_CHECKPOINT_PATH;
use crate::error::FlowError;
use crate::model::ModelConfig;
use crate::sampler::DEFAULT_SEED;
use crate::trainer::{OptimizerConfig, TrainOptions, DEFAULT_MODEL_PATH};
use crate::FlowResult;

// ═══════════════════════════════════════════════════════════════════════════
// DATASET PROPERTIES
// ═══════════════════════════════════════════════════════════════════════════

/// Column layout of one flow dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetProperties {
    pub numeric_features: Vec<String>,
    pub categorical_features: Vec<String>,
    /// Name of the label column
    pub label: String,
    /// Raw label value of benign flows
    #[serde(default = "default_benign_label")]
    pub benign_label: String,
}

fn default_benign_label() -> String {
    "0".to_string()
}

const NETFLOW_V2_NUMERIC: &[&str] = &[
    "IN_BYTES",
    "IN_PKTS",
    "OUT_BYTES",
    "OUT_PKTS",
    "FLOW_DURATION_MILLISECONDS",
    "DURATION_IN",
    "DURATION_OUT",
    "MIN_TTL",
    "MAX_TTL",
    "LONGEST_FLOW_PKT",
    "SHORTEST_FLOW_PKT",
    "MIN_IP_PKT_LEN",
    "MAX_IP_PKT_LEN",
    "SRC_TO_DST_SECOND_BYTES",
    "DST_TO_SRC_SECOND_BYTES",
    "RETRANSMITTED_IN_BYTES",
    "RETRANSMITTED_IN_PKTS",
    "RETRANSMITTED_OUT_BYTES",
    "RETRANSMITTED_OUT_PKTS",
    "SRC_TO_DST_AVG_THROUGHPUT",
    "DST_TO_SRC_AVG_THROUGHPUT",
    "NUM_PKTS_UP_TO_128_BYTES",
    "NUM_PKTS_128_TO_256_BYTES",
    "NUM_PKTS_256_TO_512_BYTES",
    "NUM_PKTS_512_TO_1024_BYTES",
    "NUM_PKTS_1024_TO_1514_BYTES",
    "TCP_WIN_MAX_IN",
    "TCP_WIN_MAX_OUT",
    "DNS_TTL_ANSWER",
];

const NETFLOW_V2_CATEGORICAL: &[&str] = &[
    "L4_SRC_PORT",
    "L4_DST_PORT",
    "PROTOCOL",
    "L7_PROTO",
    "TCP_FLAGS",
    "CLIENT_TCP_FLAGS",
    "SERVER_TCP_FLAGS",
    "ICMP_TYPE",
    "ICMP_IPV4_TYPE",
    "DNS_QUERY_TYPE",
    "FTP_COMMAND_RET_CODE",
];

impl DatasetProperties {
    /// NetFlow v2 feature set shared by the NF-*-v2 datasets
    pub fn netflow_v2() -> Self {
        Self {
            numeric_features: NETFLOW_V2_NUMERIC.iter().map(|s| s.to_string()).collect(),
            categorical_features: NETFLOW_V2_CATEGORICAL
                .iter()
                .map(|s| s.to_string())
                .collect(),
            label: "Label".to_string(),
            benign_label: default_benign_label(),
        }
    }

    /// Every column the dataset reads
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.numeric_features
            .iter()
            .chain(&self.categorical_features)
            .map(String::as_str)
            .chain(std::iter::once(self.label.as_str()))
    }
}

/// Dataset properties keyed by dataset name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NamedDatasetProperties {
    datasets: BTreeMap<String, DatasetProperties>,
}

impl Default for NamedDatasetProperties {
    fn default() -> Self {
        Self::presets()
    }
}

impl NamedDatasetProperties {
    /// Built-in NF-UNSW-NB15-v2 and NF-ToN-IoT-v2 layouts
    pub fn presets() -> Self {
        let mut datasets = BTreeMap::new();
        datasets.insert("nf_unsw_nb15_v2".to_string(), DatasetProperties::netflow_v2());
        datasets.insert("nf_ton_iot_v2".to_string(), DatasetProperties::netflow_v2());
        Self { datasets }
    }

    pub fn from_file(path: impl AsRef<Path>) -> FlowResult<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn get(&self, name: &str) -> FlowResult<&DatasetProperties> {
        self.datasets.get(&name.to_lowercase()).ok_or_else(|| {
            FlowError::invalid_config(format!(
                "unknown dataset '{}' (known: {})",
                name,
                self.names().collect::<Vec<_>>().join(", ")
            ))
        })
    }

    pub fn insert(&mut self, name: impl Into<String>, properties: DatasetProperties) {
        self.datasets.insert(name.into().to_lowercase(), properties);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.datasets.keys().map(String::as_str)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// EXPERIMENT
// ═══════════════════════════════════════════════════════════════════════════

/// Which sampler draws the training windows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplerKind {
    #[default]
    Random,
    Fair,
    Sequential,
}

/// Complete settings of one training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub dataset: String,
    /// Dataset properties file; built-in presets when unset
    pub properties_path: Option<PathBuf>,
    pub train_path: PathBuf,
    pub test_path: PathBuf,
    /// Chronological tail of the training table held out for validation
    pub validation_fraction: Option<f64>,
    pub categorical_levels: usize,
    /// Numeric values are clipped to `[-bound, bound]`
    pub bound: f64,
    pub window_size: usize,
    pub batch_size: usize,
    pub n_epoch: usize,
    pub seed: u64,
    pub sampler: SamplerKind,
    pub model: ModelConfig,
    pub optimizer: OptimizerConfig,
    pub train: TrainOptions,
    /// Rescale the loss by the malicious-class weight
    pub class_weighting: bool,
    pub save_path: PathBuf,
    pub checkpoint_path: PathBuf,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            dataset: "nf_ton_iot_v2".to_string(),
            properties_path: None,
            train_path: PathBuf::from("datasets/NF-ToN-IoT-v2/NF-ToN-IoT-v2-Train.csv"),
            test_path: PathBuf::from("datasets/NF-ToN-IoT-v2/NF-ToN-IoT-v2-Test.csv"),
            validation_fraction: None,
            categorical_levels: 32,
            bound: 100_000_000.0,
            window_size: 8,
            batch_size: 64,
            n_epoch: 1,
            seed: DEFAULT_SEED,
            sampler: SamplerKind::Random,
            model: ModelConfig::default(),
            optimizer: OptimizerConfig::default(),
            train: TrainOptions {
                epoch_steps: Some(500),
                ..TrainOptions::default()
            },
            class_weighting: true,
            save_path: PathBuf::from(DEFAULT_MODEL_PATH),
            checkpoint_path: PathBuf::from(DEFAULT_CHECKPOINT_PATH),
        }
    }
}

impl ExperimentConfig {
    pub fn from_file(path: impl AsRef<Path>) -> FlowResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        log::debug!("Loaded experiment config from {:?}", path);
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> FlowResult<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Dataset layout from `properties_path`, or the built-in presets
    pub fn properties(&self) -> FlowResult<DatasetProperties> {
        let named = match &self.properties_path {
            Some(path) => NamedDatasetProperties::from_file(path)?,
            None => NamedDatasetProperties::presets(),
        };
        named.get(&self.dataset).cloned()
    }

    pub fn validate(&self) -> FlowResult<()> {
        if self.window_size == 0 {
            return Err(FlowError::invalid_config("window_size must be positive"));
        }
        if self.batch_size == 0 {
            return Err(FlowError::invalid_config("batch_size must be positive"));
        }
        if self.n_epoch == 0 {
            return Err(FlowError::invalid_config("n_epoch must be positive"));
        }
        if self.categorical_levels < 2 {
            return Err(FlowError::invalid_config(
                "categorical_levels must be at least 2",
            ));
        }
        if self.bound.is_nan() || self.bound <= 0.0 {
            return Err(FlowError::invalid_config("bound must be positive"));
        }
        if let Some(f) = self.validation_fraction {
            if !(0.0..1.0).contains(&f) {
                return Err(FlowError::invalid_config(format!(
                    "validation_fraction must be in [0, 1), got {}",
                    f
                )));
            }
        }
        if self.sampler == SamplerKind::Fair && self.window_size % 2 != 0 {
            return Err(FlowError::invalid_config(
                "the fair sampler needs an even window_size",
            ));
        }
        self.model.validate()
    }
}
