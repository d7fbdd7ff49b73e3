//! Model ensemble: estimator families, per-fold training and blend weights.
//!
//! Each fold trains every configured model independently on its train rows,
//! then searches simplex weights on its eval rows. A model that cannot be
//! fitted is carried as unavailable with weight zero rather than failing the
//! fold.

pub mod base_rate;
pub mod estimator;
pub mod knn;
pub mod logistic;
pub mod naive_bayes;
pub mod trainer;
pub mod weights;

pub use base_rate::BaseRate;
pub use estimator::{Estimator, FittedModel, ModelError};
pub use knn::NearestNeighbours;
pub use logistic::LogisticRegression;
pub use naive_bayes::GaussianNaiveBayes;
pub use trainer::{build_estimator, EnsembleTrainer, ModelStatus, TrainedModel};
pub use weights::{EnsembleWeights, ModelWeight, WeightError, WeightOptimizer};
