//! 爪・皮膚画像の分類器
//!
//! 凍結した VGG16 特徴抽出器の上で分類ヘッドを学習し、HTTP で推論を提供します。

#![recursion_limit = "256"]

pub mod cli;
pub mod dataset;
pub mod error;
pub mod inference;
pub mod model;
pub mod observability;
pub mod preprocess;
pub mod server;
pub mod types;

#[cfg(feature = "ml")]
pub mod ml;

pub use error::{ClassifierError, Result};
pub use inference::{Classifier, InferenceEngine};
pub use types::{ImageSize, ImageTensor, Prediction, PredictionResult, UnlabeledPrediction};
