//! Champion/challenger model holder with atomic hot reload.
//!
//! The champion is the only model allowed to block trades; the challenger
//! is scored in its shadow for offline comparison. Either file may be
//! absent, which simply means "no decision" for that slot. Reload swaps a
//! whole `Arc` so a scorer can never observe a half-loaded model.

use crate::model::LinearModel;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// A score together with the version of the model that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Scored {
    pub score: f64,
    pub version: String,
}

/// Holds the deployed classifier and its shadow alternative.
pub struct MlGate {
    champion_path: PathBuf,
    challenger_path: PathBuf,
    champion: RwLock<Option<Arc<LinearModel>>>,
    challenger: RwLock<Option<Arc<LinearModel>>>,
}

impl MlGate {
    /// Creates the gate and performs an initial load of both slots.
    #[must_use]
    pub fn new(champion_path: impl Into<PathBuf>, challenger_path: impl Into<PathBuf>) -> Self {
        let gate = Self {
            champion_path: champion_path.into(),
            challenger_path: challenger_path.into(),
            champion: RwLock::new(None),
            challenger: RwLock::new(None),
        };
        gate.reload();
        gate
    }

    /// Re-reads both model files from disk. A missing or malformed file
    /// empties that slot; the other slot is unaffected.
    pub fn reload(&self) {
        *self.champion.write() = Self::load_slot(&self.champion_path, "champion");
        *self.challenger.write() = Self::load_slot(&self.challenger_path, "challenger");
    }

    fn load_slot(path: &PathBuf, slot: &str) -> Option<Arc<LinearModel>> {
        match LinearModel::load(path) {
            Ok(model) => {
                info!(slot, version = %model.model_version, "Model loaded");
                Some(Arc::new(model))
            }
            Err(e) => {
                if path.exists() {
                    warn!(slot, error = %e, "Model file rejected");
                } else {
                    info!(slot, path = %path.display(), "No model file; slot empty");
                }
                None
            }
        }
    }

    /// Whether a champion is currently deployed.
    #[must_use]
    pub fn has_champion(&self) -> bool {
        self.champion.read().is_some()
    }

    /// Scores the feature bag with the champion, if one is deployed.
    #[must_use]
    pub fn score_champion(&self, features: &BTreeMap<String, f64>) -> Option<Scored> {
        let model = self.champion.read().clone()?;
        Some(Scored {
            score: model.score(features),
            version: model.model_version.clone(),
        })
    }

    /// Scores the feature bag with the challenger. Never used to act.
    #[must_use]
    pub fn score_challenger(&self, features: &BTreeMap<String, f64>) -> Option<Scored> {
        let model = self.challenger.read().clone()?;
        Some(Scored {
            score: model.score(features),
            version: model.model_version.clone(),
        })
    }
}
