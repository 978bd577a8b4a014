//! Speech emotion recognition from acoustic functionals.
//!
//! Clips are reduced to a fixed 88-value functional vector, standardised and
//! classified by a one-vs-one RBF SVM whose hyperparameters are chosen by a
//! Bayesian search inside nested stratified cross-validation.

pub mod audio;
pub mod config;
pub mod cv;
pub mod dataset;
pub mod features;
pub mod labels;
pub mod model;
pub mod pipeline;
pub mod tracking;
