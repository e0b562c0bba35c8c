//! # Flow Table Preprocessing
//!
//! Parameters are fitted once on the training table and then applied to
//! every table (train, validation, test) through an ordered pipeline:
//!
//! | order | step                      | effect                                                   |
//! |-------|---------------------------|----------------------------------------------------------|
//! | 1     | `base_pre_processing`     | non-finite → 0, clip to `[-bound, bound]`                |
//! | 2     | `log_pre_processing`      | `ln(1 + x - min) / ln(1 + max - min)`, clamped to `[0,1]` |
//! | 3     | `categorical_conversion`  | rank in the `levels - 1` most frequent values, else `levels - 1` |
//! | 4     | `binary_label_conversion` | benign → 0, anything else → 1                            |

use std::collections::HashMap;
use std::sync::Arc;

use crate::dataset::FlowTable;
use crate::error::FlowError;
use crate::transform::{Pipeline, PipelineBuilder};
use crate::FlowResult;

/// Parameters fitted on a training table
#[derive(Debug, Clone, PartialEq)]
pub struct Preprocessor {
    bound: f64,
    levels: usize,
    min: Vec<f64>,
    max: Vec<f64>,
    /// Most frequent values per categorical column, most frequent first
    frequent: Vec<Vec<String>>,
}

impl Preprocessor {
    pub fn fit(table: &FlowTable, bound: f64, levels: usize) -> FlowResult<Self> {
        if levels < 2 {
            return Err(FlowError::invalid_config(
                "categorical levels must be at least 2",
            ));
        }
        if table.is_empty() {
            return Err(FlowError::data("cannot fit preprocessing on an empty table"));
        }

        let (min, max): (Vec<f64>, Vec<f64>) = table
            .numeric
            .iter()
            .map(|column| {
                column
                    .iter()
                    .map(|&x| clean(x, bound))
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), x| {
                        (lo.min(x), hi.max(x))
                    })
            })
            .unzip();

        let frequent = table
            .categorical
            .iter()
            .map(|column| most_frequent(column, levels - 1))
            .collect();

        log::debug!(
            "Fitted preprocessing on {} flows ({} numeric, {} categorical columns)",
            table.len(),
            table.numeric.len(),
            table.categorical.len()
        );

        Ok(Self {
            bound,
            levels,
            min,
            max,
            frequent,
        })
    }

    pub fn levels(&self) -> usize {
        self.levels
    }

    pub fn frequent_values(&self, column: usize) -> Option<&[String]> {
        self.frequent.get(column).map(Vec::as_slice)
    }

    /// The four preprocessing steps, ordered
    pub fn pipeline(&self) -> Pipeline<FlowTable> {
        let mut builder = PipelineBuilder::new();

        let bound = self.bound;
        builder.add_step("base_pre_processing", 1, move |mut table: FlowTable| {
            for column in &mut table.numeric {
                for x in column.iter_mut() {
                    *x = clean(*x, bound);
                }
            }
            Ok(table)
        });

        let (min, max) = (Arc::new(self.min.clone()), Arc::new(self.max.clone()));
        builder.add_step("log_pre_processing", 2, move |mut table: FlowTable| {
            if table.numeric.len() != min.len() {
                return Err(FlowError::DimensionMismatch {
                    expected: min.len(),
                    got: table.numeric.len(),
                });
            }
            for ((column, &lo), &hi) in table.numeric.iter_mut().zip(min.iter()).zip(max.iter()) {
                for x in column.iter_mut() {
                    *x = log_scale(*x, lo, hi);
                }
            }
            Ok(table)
        });

        let levels = self.levels;
        let lookup: Arc<Vec<HashMap<String, u32>>> = Arc::new(
            self.frequent
                .iter()
                .map(|values| {
                    values
                        .iter()
                        .enumerate()
                        .map(|(rank, v)| (v.clone(), rank as u32))
                        .collect()
                })
                .collect(),
        );
        builder.add_step("categorical_conversion", 3, move |mut table: FlowTable| {
            if table.categorical.len() != lookup.len() {
                return Err(FlowError::DimensionMismatch {
                    expected: lookup.len(),
                    got: table.categorical.len(),
                });
            }
            let other = (levels - 1) as u32;
            table.codes = table
                .categorical
                .iter()
                .zip(lookup.iter())
                .map(|(column, ranks)| {
                    column
                        .iter()
                        .map(|v| ranks.get(v).copied().unwrap_or(other))
                        .collect()
                })
                .collect();
            Ok(table)
        });

        builder.add_step("binary_label_conversion", 4, |mut table: FlowTable| {
            let benign = table.properties.benign_label.clone();
            table.labels = table
                .raw_labels
                .iter()
                .map(|raw| if is_benign(raw, &benign) { 0.0 } else { 1.0 })
                .collect();
            Ok(table)
        });

        builder.build()
    }

    pub fn transform(&self, table: FlowTable) -> FlowResult<FlowTable> {
        self.pipeline().apply(table)
    }
}

fn clean(x: f64, bound: f64) -> f64 {
    if x.is_finite() {
        x.clamp(-bound, bound)
    } else {
        0.0
    }
}

fn log_scale(x: f64, min: f64, max: f64) -> f64 {
    let span = (1.0 + (max - min)).ln();
    if !span.is_finite() || span <= 0.0 {
        return 0.0;
    }
    ((1.0 + (x - min).max(0.0)).ln() / span).clamp(0.0, 1.0)
}

fn is_benign(raw: &str, benign: &str) -> bool {
    if raw == benign {
        return true;
    }
    match (raw.parse::<f64>(), benign.parse::<f64>()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// The `k` most frequent values, ties broken by first appearance
fn most_frequent(column: &[String], k: usize) -> Vec<String> {
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for (i, v) in column.iter().enumerate() {
        counts.entry(v.as_str()).or_insert((0, i)).0 += 1;
    }
    let mut ranked: Vec<(&str, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
    ranked.into_iter().take(k).map(|(v, _)| v.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatasetProperties;

    fn table() -> FlowTable {
        let csv = "\
IN_BYTES,PROTOCOL,L7_PROTO,Label
0,6,7.0,0
100,6,7.0,0
,17,91.0,1
1e12,6,0.0,0
50,1,7.0,2
";
        let props = DatasetProperties {
            numeric_features: vec!["IN_BYTES".into()],
            categorical_features: vec!["PROTOCOL".into(), "L7_PROTO".into()],
            label: "Label".into(),
            benign_label: "0".into(),
        };
        FlowTable::from_reader(csv.as_bytes(), &props).unwrap()
    }

    #[test]
    fn test_pipeline_step_order() {
        let pre = Preprocessor::fit(&table(), 1000.0, 3).unwrap();
        assert_eq!(
            pre.pipeline().names(),
            vec![
                "base_pre_processing",
                "log_pre_processing",
                "categorical_conversion",
                "binary_label_conversion"
            ]
        );
    }

    #[test]
    fn test_numeric_cleaned_and_scaled() {
        let pre = Preprocessor::fit(&table(), 1000.0, 3).unwrap();
        let out = pre.transform(table()).unwrap();
        let col = &out.numeric[0];

        // min 0, max 1000 after clipping 1e12
        assert_eq!(col[0], 0.0);
        assert_eq!(col[2], 0.0);
        assert!((col[3] - 1.0).abs() < 1e-12);
        let expected = 101f64.ln() / 1001f64.ln();
        assert!((col[1] - expected).abs() < 1e-12);
        assert!(col.iter().all(|x| (0.0..=1.0).contains(x)));
    }

    #[test]
    fn test_categorical_bucketing() {
        let pre = Preprocessor::fit(&table(), 1000.0, 3).unwrap();
        assert_eq!(pre.frequent_values(0).unwrap(), &["6".to_string(), "17".to_string()]);

        let out = pre.transform(table()).unwrap();
        assert_eq!(out.codes[0], vec![0, 0, 1, 0, 2]);
        // "7.0" most frequent, "91.0" first of the ties
        assert_eq!(out.codes[1], vec![0, 0, 1, 2, 0]);
    }

    #[test]
    fn test_binary_labels() {
        let pre = Preprocessor::fit(&table(), 1000.0, 3).unwrap();
        let out = pre.transform(table()).unwrap();
        assert_eq!(out.labels, vec![0.0, 0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_unseen_values_map_to_other() {
        let pre = Preprocessor::fit(&table(), 1000.0, 3).unwrap();
        let mut test = table();
        test.categorical[0] = vec!["47".into(); 5];
        test.numeric[0] = vec![-5.0, 2000.0, 10.0, 0.0, 0.0];
        let out = pre.transform(test).unwrap();

        assert_eq!(out.codes[0], vec![2; 5]);
        assert_eq!(out.numeric[0][0], 0.0);
        assert_eq!(out.numeric[0][1], 1.0);
    }

    #[test]
    fn test_into_store_after_preprocessing() {
        let pre = Preprocessor::fit(&table(), 1000.0, 3).unwrap();
        let store = pre.transform(table()).unwrap().into_store().unwrap();
        assert_eq!(store.len(), 5);
        assert_eq!(store.numeric_width(), 1);
        assert_eq!(store.categorical_width(), 2);
        assert_eq!(store.labels(), &[0.0, 0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_levels_below_two_rejected() {
        assert!(Preprocessor::fit(&table(), 1000.0, 1).unwrap_err().is_config());
    }
}
