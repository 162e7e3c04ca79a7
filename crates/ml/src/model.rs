//! The classifier file format and its scoring function.
//!
//! Models are plain logistic regressions exported by the offline trainer:
//! `{model_version, feature_names, bias, weights}`. The engine only reads
//! these files; promotion is out-of-band.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Errors loading a classifier file.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model file unreadable: {0}")]
    Io(#[from] std::io::Error),

    #[error("model file malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("model {version} has no weights")]
    Empty {
        /// Version string of the rejected model.
        version: String,
    },
}

/// A logistic-regression classifier over a named feature bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub model_version: String,
    pub feature_names: Vec<String>,
    pub bias: f64,
    pub weights: BTreeMap<String, f64>,
}

impl LinearModel {
    /// Loads and validates a model file.
    ///
    /// # Errors
    /// Returns an error on unreadable or malformed files, or a model with
    /// no weights at all.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let raw = std::fs::read_to_string(path)?;
        let model: Self = serde_json::from_str(&raw)?;
        if model.weights.is_empty() {
            return Err(ModelError::Empty { version: model.model_version });
        }
        Ok(model)
    }

    /// Probability-of-up score: `sigma(bias + sum w_i*f_i)` over the features that
    /// are present in the bag, finite, and named by the model. Missing or
    /// non-finite features contribute nothing.
    #[must_use]
    pub fn score(&self, features: &BTreeMap<String, f64>) -> f64 {
        let mut z = self.bias;
        for (name, weight) in &self.weights {
            if let Some(value) = features.get(name) {
                if value.is_finite() {
                    z += weight * value;
                }
            }
        }
        sigmoid(z)
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> LinearModel {
        LinearModel {
            model_version: "2026-02-24_01".into(),
            feature_names: vec!["rsi_m5".into(), "atr_ratio".into()],
            bias: -0.5,
            weights: BTreeMap::from([("rsi_m5".into(), 0.02), ("atr_ratio".into(), -0.3)]),
        }
    }

    fn features(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
    }

    // ==================== Scoring Tests ====================

    #[test]
    fn score_is_sigmoid_of_linear_combination() {
        let m = model();
        let s = m.score(&features(&[("rsi_m5", 60.0), ("atr_ratio", 1.0)]));
        let expected = 1.0 / (1.0 + (-(-0.5 + 0.02 * 60.0 - 0.3f64)).exp());
        assert!((s - expected).abs() < 1e-12);
    }

    #[test]
    fn score_stays_in_unit_interval() {
        let m = model();
        for v in [-1e6, -1.0, 0.0, 1.0, 1e6] {
            let s = m.score(&features(&[("rsi_m5", v)]));
            assert!((0.0..=1.0).contains(&s));
        }
    }

    #[test]
    fn missing_features_contribute_nothing() {
        let m = model();
        let empty = m.score(&BTreeMap::new());
        let expected = 1.0 / (1.0 + 0.5f64.exp());
        assert!((empty - expected).abs() < 1e-12);
    }

    #[test]
    fn non_finite_features_are_ignored() {
        let m = model();
        let with_nan = m.score(&features(&[("rsi_m5", f64::NAN), ("atr_ratio", 1.0)]));
        let without = m.score(&features(&[("atr_ratio", 1.0)]));
        assert_eq!(with_nan, without);
    }

    #[test]
    fn unknown_features_are_ignored() {
        let m = model();
        let with_extra = m.score(&features(&[("rsi_m5", 60.0), ("mystery", 1e9)]));
        let without = m.score(&features(&[("rsi_m5", 60.0)]));
        assert_eq!(with_extra, without);
    }

    #[test]
    fn score_monotone_in_positive_weight_feature() {
        let m = model();
        let mut prev = f64::MIN;
        for v in [10.0, 30.0, 50.0, 70.0, 90.0] {
            let s = m.score(&features(&[("rsi_m5", v), ("atr_ratio", 1.0)]));
            assert!(s > prev);
            prev = s;
        }
    }

    #[test]
    fn score_monotone_decreasing_in_negative_weight_feature() {
        let m = model();
        let low = m.score(&features(&[("atr_ratio", 0.5)]));
        let high = m.score(&features(&[("atr_ratio", 2.0)]));
        assert!(high < low);
    }

    // ==================== Loading Tests ====================

    #[test]
    fn loads_trainer_export_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("current.json");
        std::fs::write(
            &path,
            r#"{
                "model_version": "2026-02-24_02",
                "feature_names": ["rsi_m5"],
                "bias": 0.1,
                "weights": {"rsi_m5": 0.05}
            }"#,
        )
        .unwrap();

        let m = LinearModel::load(&path).unwrap();
        assert_eq!(m.model_version, "2026-02-24_02");
        assert_eq!(m.weights.len(), 1);
    }

    #[test]
    fn empty_weights_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(
            &path,
            r#"{"model_version": "x", "feature_names": [], "bias": 0.0, "weights": {}}"#,
        )
        .unwrap();
        assert!(matches!(LinearModel::load(&path), Err(ModelError::Empty { .. })));
    }

    #[test]
    fn missing_file_is_io_error() {
        assert!(matches!(
            LinearModel::load("/definitely/not/here.json"),
            Err(ModelError::Io(_))
        ));
    }
}
