//! Probabilistic confidence gate for GoldBot.
//!
//! Loads logistic-regression classifiers exported by the offline trainer
//! and scores the strategy's feature bag. Only the champion can block a
//! trade; the challenger is shadow-scored for evaluation.

pub mod gate;
pub mod model;

pub use gate::{MlGate, Scored};
pub use model::{LinearModel, ModelError};
