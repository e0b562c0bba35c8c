//! # Flow Record Tables
//!
//! Reads NetFlow CSV exports into a column-oriented [`FlowTable`] holding
//! only the columns named by a [`DatasetProperties`], in file order.
//!
//! ```rust,ignore
//! use nids_window::dataset::{split_csv, FlowTable};
//!
//! split_csv("NF-UNSW-NB15-v2.csv", "train.csv", "test.csv", 0.85)?;
//! let table = FlowTable::from_csv("train.csv", &properties)?;
//! ```
//!
//! Categorical cells and labels stay raw strings until preprocessing maps
//! them to codes (see `preprocess`).

use std::io;
use std::path::Path;

use crate::config::DatasetProperties;
use crate::error::FlowError;
use crate::store::RecordStore;
use crate::FlowResult;

pub const DEFAULT_TRAIN_FRACTION: f64 = 0.85;

/// Flow records, one `Vec` per column
#[derive(Debug, Clone, PartialEq)]
pub struct FlowTable {
    pub properties: DatasetProperties,
    /// `numeric[feature][row]`
    pub numeric: Vec<Vec<f64>>,
    /// `categorical[feature][row]`, raw cell text
    pub categorical: Vec<Vec<String>>,
    /// Bucketed categorical codes, same layout as `categorical`
    pub codes: Vec<Vec<u32>>,
    pub raw_labels: Vec<String>,
    /// Binary labels, filled by label conversion
    pub labels: Vec<f32>,
}

impl FlowTable {
    pub fn from_csv(path: impl AsRef<Path>, properties: &DatasetProperties) -> FlowResult<Self> {
        let path = path.as_ref();
        let reader = csv::Reader::from_path(path)?;
        let table = Self::read(reader, properties)?;
        log::info!("Loaded {} flows from {:?}", table.len(), path);
        Ok(table)
    }

    pub fn from_reader<R: io::Read>(rdr: R, properties: &DatasetProperties) -> FlowResult<Self> {
        Self::read(csv::Reader::from_reader(rdr), properties)
    }

    fn read<R: io::Read>(
        mut reader: csv::Reader<R>,
        properties: &DatasetProperties,
    ) -> FlowResult<Self> {
        let headers = reader.headers()?.clone();
        let position = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim() == name)
                .ok_or_else(|| FlowError::data(format!("missing column '{}'", name)))
        };
        let numeric_idx = properties
            .numeric_features
            .iter()
            .map(|n| position(n.as_str()))
            .collect::<FlowResult<Vec<_>>>()?;
        let categorical_idx = properties
            .categorical_features
            .iter()
            .map(|n| position(n.as_str()))
            .collect::<FlowResult<Vec<_>>>()?;
        let label_idx = position(properties.label.as_str())?;

        let mut table = Self {
            properties: properties.clone(),
            numeric: vec![Vec::new(); numeric_idx.len()],
            categorical: vec![Vec::new(); categorical_idx.len()],
            codes: Vec::new(),
            raw_labels: Vec::new(),
            labels: Vec::new(),
        };

        for (row, record) in reader.records().enumerate() {
            let record = record?;
            let cell = |idx: usize| record.get(idx).map(str::trim).unwrap_or("");

            for (column, &idx) in table.numeric.iter_mut().zip(&numeric_idx) {
                column.push(parse_numeric(cell(idx)).ok_or_else(|| {
                    FlowError::data(format!(
                        "row {}: column '{}' is not numeric: '{}'",
                        row + 1,
                        headers.get(idx).unwrap_or("?"),
                        cell(idx)
                    ))
                })?);
            }
            for (column, &idx) in table.categorical.iter_mut().zip(&categorical_idx) {
                column.push(cell(idx).to_string());
            }
            table.raw_labels.push(cell(label_idx).to_string());
        }

        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.raw_labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw_labels.is_empty()
    }

    /// Convert a fully preprocessed table into a record store
    pub fn into_store(self) -> FlowResult<RecordStore> {
        let rows = self.len();
        if self.labels.len() != rows {
            return Err(FlowError::data("labels have not been converted"));
        }
        if self.codes.len() != self.categorical.len() {
            return Err(FlowError::data("categorical columns have not been bucketed"));
        }

        let numeric_width = self.numeric.len();
        let mut numeric = Vec::with_capacity(rows * numeric_width);
        let categorical_width = self.codes.len();
        let mut categorical = Vec::with_capacity(rows * categorical_width);
        for row in 0..rows {
            numeric.extend(self.numeric.iter().map(|col| col[row] as f32));
            categorical.extend(self.codes.iter().map(|col| col[row]));
        }

        RecordStore::new(
            numeric,
            numeric_width,
            categorical,
            categorical_width,
            self.labels,
        )
    }
}

/// Empty cells read as NaN and are cleaned up by preprocessing
fn parse_numeric(cell: &str) -> Option<f64> {
    if cell.is_empty() {
        return Some(f64::NAN);
    }
    cell.parse().ok()
}

/// Split a CSV chronologically: the first `train_fraction` of rows go to
/// `train_path`, the rest to `test_path`. Returns the two row counts.
pub fn split_csv(
    input: impl AsRef<Path>,
    train_path: impl AsRef<Path>,
    test_path: impl AsRef<Path>,
    train_fraction: f64,
) -> FlowResult<(usize, usize)> {
    if !(0.0..=1.0).contains(&train_fraction) {
        return Err(FlowError::invalid_config(format!(
            "train fraction must be in [0, 1], got {}",
            train_fraction
        )));
    }
    let input = input.as_ref();

    let total = csv::Reader::from_path(input)?.records().count();
    let train_size = (total as f64 * train_fraction) as usize;

    let mut reader = csv::Reader::from_path(input)?;
    let headers = reader.headers()?.clone();
    let mut train = csv::Writer::from_path(train_path.as_ref())?;
    let mut test = csv::Writer::from_path(test_path.as_ref())?;
    train.write_record(&headers)?;
    test.write_record(&headers)?;

    for (i, record) in reader.records().enumerate() {
        let record = record?;
        if i < train_size {
            train.write_record(&record)?;
        } else {
            test.write_record(&record)?;
        }
    }
    train.flush()?;
    test.flush()?;

    log::info!(
        "Split {:?}: {} train rows -> {:?}, {} test rows -> {:?}",
        input,
        train_size,
        train_path.as_ref(),
        total - train_size,
        test_path.as_ref()
    );
    Ok((train_size, total - train_size))
}
