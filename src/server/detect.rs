//! `/predict` の検出器
//!
//! 検出モデル本体は外部の協力者として扱い、ここでは差し替え口だけを持ちます。

use std::path::Path;

use crate::error::{ClassifierError, Result};
use crate::inference::InferenceEngine;
use crate::types::UnlabeledPrediction;

/// 画像から `(class, confidence)` の列を返すもの
pub trait Detector: Send + Sync {
    fn detect(&self, image_path: &Path) -> Result<Vec<UnlabeledPrediction>>;
}

/// 分類モデルの出力をラベル無しで返す
pub struct ClassifierDetector {
    engine: InferenceEngine,
}

impl ClassifierDetector {
    pub fn new(engine: InferenceEngine) -> Self {
        Self { engine }
    }
}

impl Detector for ClassifierDetector {
    fn detect(&self, image_path: &Path) -> Result<Vec<UnlabeledPrediction>> {
        self.engine.predict_path_unlabeled(image_path)
    }
}

/// 検出バックエンドが無い環境用。常に失敗する
pub struct UnavailableDetector {
    reason: String,
}

impl UnavailableDetector {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Default for UnavailableDetector {
    fn default() -> Self {
        Self::new("No detection backend is configured.")
    }
}

impl Detector for UnavailableDetector {
    fn detect(&self, _image_path: &Path) -> Result<Vec<UnlabeledPrediction>> {
        Err(ClassifierError::DetectorUnavailable(self.reason.clone()))
    }
}
