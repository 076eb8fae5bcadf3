//! 推論エンジン
//!
//! モデル本体は [`Classifier`] の向こう側にあり、このモジュールは
//! 画像の前処理・出力とラベルの対応付け・最大確率の選択だけを担当します。

use std::path::Path;
use std::sync::Arc;

use crate::dataset::ClassIndexMap;
use crate::error::{ClassifierError, Result};
use crate::preprocess;
use crate::types::{ImageSize, ImageTensor, Prediction, PredictionResult, UnlabeledPrediction};

/// 前処理済み画像からクラスごとの確率を出すモデル
pub trait Classifier: Send + Sync {
    /// モデルが期待する入力サイズ
    fn input_size(&self) -> ImageSize;

    /// 出力インデックス順のラベル表
    fn labels(&self) -> &ClassIndexMap;

    /// softmax 済みの確率（クラスインデックス順）
    fn probabilities(&self, tensor: &ImageTensor) -> Result<Vec<f32>>;
}

/// 確率ベクトルにラベルを付ける
///
/// 要素数とラベル数が違う場合はラベルをずらして返さずにエラーにする
pub fn label_probabilities(probabilities: &[f32], labels: &ClassIndexMap) -> Result<PredictionResult> {
    if probabilities.len() != labels.len() {
        return Err(ClassifierError::LabelCardinality {
            outputs: probabilities.len(),
            labels: labels.len(),
        });
    }

    Ok(PredictionResult::new(
        labels
            .labels()
            .iter()
            .zip(probabilities)
            .map(|(label, p)| Prediction {
                label: label.clone(),
                probability: *p,
            })
            .collect(),
    ))
}

pub fn unlabeled_probabilities(probabilities: &[f32]) -> Vec<UnlabeledPrediction> {
    probabilities
        .iter()
        .enumerate()
        .map(|(class, p)| UnlabeledPrediction {
            class,
            confidence: *p,
        })
        .collect()
}

/// 推論エンジン
#[derive(Clone)]
pub struct InferenceEngine {
    classifier: Arc<dyn Classifier>,
}

impl InferenceEngine {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self { classifier }
    }

    pub fn labels(&self) -> &ClassIndexMap {
        self.classifier.labels()
    }

    pub fn input_size(&self) -> ImageSize {
        self.classifier.input_size()
    }

    fn load(&self, image_path: &Path) -> Result<ImageTensor> {
        preprocess::load_tensor(image_path, self.classifier.input_size())
    }

    pub fn predict_tensor(&self, tensor: &ImageTensor) -> Result<PredictionResult> {
        let probabilities = self.classifier.probabilities(tensor)?;
        label_probabilities(&probabilities, self.classifier.labels())
    }

    /// 単一画像を分類
    pub fn predict_path(&self, image_path: &Path) -> Result<PredictionResult> {
        let tensor = self.load(image_path)?;
        self.predict_tensor(&tensor)
    }

    /// ラベル表を使わずにクラスインデックスと確率だけ返す
    pub fn predict_path_unlabeled(&self, image_path: &Path) -> Result<Vec<UnlabeledPrediction>> {
        let tensor = self.load(image_path)?;
        let probabilities = self.classifier.probabilities(&tensor)?;
        Ok(unlabeled_probabilities(&probabilities))
    }
}

/// テスト用: 入力に関係なく決まった確率を返す
#[cfg(test)]
pub(crate) struct FixedClassifier {
    pub labels: ClassIndexMap,
    pub output: Vec<f32>,
    pub input_size: ImageSize,
}

#[cfg(test)]
impl FixedClassifier {
    pub fn new(output: Vec<f32>) -> Self {
        Self {
            labels: ClassIndexMap::default_labels(),
            output,
            input_size: ImageSize::new(32, 32),
        }
    }
}

#[cfg(test)]
impl Classifier for FixedClassifier {
    fn input_size(&self) -> ImageSize {
        self.input_size
    }

    fn labels(&self) -> &ClassIndexMap {
        &self.labels
    }

    fn probabilities(&self, tensor: &ImageTensor) -> Result<Vec<f32>> {
        assert_eq!(tensor.size(), self.input_size);
        Ok(self.output.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::tempdir;

    fn write_jpeg(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("sample.jpg");
        RgbImage::from_pixel(50, 50, Rgb([120, 80, 60])).save(&path).unwrap();
        path
    }

    #[test]
    fn test_predict_path_labels_in_index_order() {
        let dir = tempdir().unwrap();
        let path = write_jpeg(dir.path());
        let engine = InferenceEngine::new(Arc::new(FixedClassifier::new(vec![0.1, 0.7, 0.1, 0.1])));

        let result = engine.predict_path(&path).unwrap();
        assert_eq!(result.len(), 4);
        assert!(result.iter().all(|p| (0.0..=1.0).contains(&p.probability)));
        assert!((result.total_probability() - 1.0).abs() < 1e-5);

        let top = result.top().unwrap();
        assert_eq!(top.label, "psoriasis");
        assert!((top.probability - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_cardinality_mismatch_is_error() {
        let err = label_probabilities(&[0.5, 0.5], &ClassIndexMap::default_labels()).unwrap_err();
        assert!(matches!(
            err,
            ClassifierError::LabelCardinality { outputs: 2, labels: 4 }
        ));
    }

    #[test]
    fn test_unlabeled_output() {
        let dir = tempdir().unwrap();
        let path = write_jpeg(dir.path());
        let engine = InferenceEngine::new(Arc::new(FixedClassifier::new(vec![0.25; 4])));

        let result = engine.predict_path_unlabeled(&path).unwrap();
        assert_eq!(result.len(), 4);
        assert_eq!(result[3].class, 3);
        assert_eq!(result[3].confidence, 0.25);
    }

    #[test]
    fn test_undecodable_image_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"nope").unwrap();
        let engine = InferenceEngine::new(Arc::new(FixedClassifier::new(vec![0.25; 4])));
        assert!(matches!(
            engine.predict_path(&path).unwrap_err(),
            ClassifierError::ImageDecode { .. }
        ));
    }
}
