//! # NIDS Window CLI
//!
//! ```bash
//! # Chronological 85/15 split of a NetFlow export
//! nids-window split --input NF-UNSW-NB15-v2.csv --train train.csv --test test.csv
//!
//! # Train and test with a config file, overriding a few values
//! nids-window train --config experiment.json --window-size 8 --epochs 3
//! ```

use std::path::PathBuf;

use anyhow::Context;
use candle_core::Device;
use clap::{Parser, Subcommand};
use nids_window::{dataset, run_experiment, ExperimentConfig, SamplerKind};

#[derive(Parser, Debug)]
#[command(name = "nids-window")]
#[command(about = "Sliding-window intrusion detection on NetFlow records")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train, save and test a window classifier
    Train(TrainArgs),
    /// Split a CSV chronologically into train and test files
    Split {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(long)]
        train: PathBuf,

        #[arg(long)]
        test: PathBuf,

        /// Fraction of rows kept for training
        #[arg(long, default_value_t = dataset::DEFAULT_TRAIN_FRACTION)]
        train_fraction: f64,
    },
}

#[derive(clap::Args, Debug)]
struct TrainArgs {
    /// Experiment config (JSON); defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dataset name in the properties file
    #[arg(long)]
    dataset: Option<String>,

    #[arg(long)]
    properties: Option<PathBuf>,

    #[arg(long)]
    train_data: Option<PathBuf>,

    #[arg(long)]
    test_data: Option<PathBuf>,

    #[arg(short, long)]
    window_size: Option<usize>,

    #[arg(short, long)]
    batch_size: Option<usize>,

    #[arg(short, long)]
    epochs: Option<usize>,

    #[arg(long)]
    epoch_steps: Option<usize>,

    #[arg(long, value_parser = parse_sampler)]
    sampler: Option<SamplerKind>,

    #[arg(long)]
    learning_rate: Option<f64>,

    #[arg(long)]
    seed: Option<u64>,

    /// Where to write the trained weights
    #[arg(long)]
    save: Option<PathBuf>,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

fn parse_sampler(s: &str) -> Result<SamplerKind, String> {
    match s {
        "random" => Ok(SamplerKind::Random),
        "fair" => Ok(SamplerKind::Fair),
        "sequential" => Ok(SamplerKind::Sequential),
        other => Err(format!(
            "unknown sampler '{}' (expected random, fair or sequential)",
            other
        )),
    }
}

impl TrainArgs {
    fn into_config(self) -> anyhow::Result<ExperimentConfig> {
        let mut config = match &self.config {
            Some(path) => ExperimentConfig::from_file(path)
                .with_context(|| format!("reading config {:?}", path))?,
            None => ExperimentConfig::default(),
        };

        if let Some(v) = self.dataset {
            config.dataset = v;
        }
        if let Some(v) = self.properties {
            config.properties_path = Some(v);
        }
        if let Some(v) = self.train_data {
            config.train_path = v;
        }
        if let Some(v) = self.test_data {
            config.test_path = v;
        }
        if let Some(v) = self.window_size {
            config.window_size = v;
        }
        if let Some(v) = self.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = self.epochs {
            config.n_epoch = v;
        }
        if let Some(v) = self.epoch_steps {
            config.train.epoch_steps = Some(v);
        }
        if let Some(v) = self.sampler {
            config.sampler = v;
        }
        if let Some(v) = self.learning_rate {
            config.optimizer.learning_rate = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
        if let Some(v) = self.save {
            config.save_path = v;
        }

        config.validate()?;
        Ok(config)
    }
}

fn select_device() -> Device {
    if cfg!(feature = "cuda") {
        match Device::cuda_if_available(0) {
            Ok(device) => return device,
            Err(e) => log::warn!("CUDA not available ({}), using CPU", e),
        }
    }
    if cfg!(feature = "metal") {
        match Device::new_metal(0) {
            Ok(device) => return device,
            Err(e) => log::warn!("Metal not available ({}), using CPU", e),
        }
    }
    Device::Cpu
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Split {
            input,
            train,
            test,
            train_fraction,
        } => {
            let (n_train, n_test) = dataset::split_csv(&input, &train, &test, train_fraction)
                .with_context(|| format!("splitting {:?}", input))?;
            println!("train: {} rows -> {:?}", n_train, train);
            println!("test:  {} rows -> {:?}", n_test, test);
        }
        Command::Train(args) => {
            let json = args.json;
            let config = args.into_config()?;
            let device = select_device();
            log::info!("Using device {:?}", device);

            let summary = run_experiment(&config, &device)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "trained {} epoch(s), mean loss {:.6}{}",
                    summary.train.epochs_run(),
                    summary.train.mean_loss,
                    if summary.train.stopped_early {
                        " (stopped early)"
                    } else {
                        ""
                    }
                );
                println!("{}", summary.test);
            }
        }
    }
    Ok(())
}
