use serde::{Deserialize, Serialize};
use std::fmt;

/// RGB のチャネル数
pub const CHANNELS: usize = 3;

/// モデル入力解像度（高さ x 幅）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub height: u32,
    pub width: u32,
}

impl ImageSize {
    pub const fn new(height: u32, width: u32) -> Self {
        Self { height, width }
    }

    pub fn pixels(&self) -> usize {
        self.height as usize * self.width as usize
    }
}

impl Default for ImageSize {
    fn default() -> Self {
        Self::new(224, 224)
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.height, self.width)
    }
}

/// 正規化済み画像データ
///
/// (C, H, W) の順で平坦化され、各値は [0, 1] に収まります。
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    size: ImageSize,
    data: Vec<f32>,
}

impl ImageTensor {
    pub(crate) fn new(size: ImageSize, data: Vec<f32>) -> Self {
        debug_assert_eq!(data.len(), CHANNELS * size.pixels());
        Self { size, data }
    }

    pub fn size(&self) -> ImageSize {
        self.size
    }

    /// [channels, height, width]
    pub fn shape(&self) -> [usize; 3] {
        [CHANNELS, self.size.height as usize, self.size.width as usize]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

}

/// ラベル付きの予測1件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub probability: f32,
}

/// ラベル表が無い場合の予測1件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnlabeledPrediction {
    pub class: usize,
    pub confidence: f32,
}

/// クラスごとの予測結果（クラスインデックス順）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PredictionResult(Vec<Prediction>);

impl PredictionResult {
    pub fn new(predictions: Vec<Prediction>) -> Self {
        Self(predictions)
    }

    /// 最大確率の予測。同値の場合は先頭のインデックスを返す
    pub fn top(&self) -> Option<&Prediction> {
        let mut best: Option<&Prediction> = None;
        for p in &self.0 {
            match best {
                Some(b) if p.probability <= b.probability => {}
                _ => best = Some(p),
            }
        }
        best
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Prediction> {
        self.0.iter()
    }

    pub fn total_probability(&self) -> f32 {
        self.0.iter().map(|p| p.probability).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(probs: &[f32]) -> PredictionResult {
        PredictionResult::new(
            probs
                .iter()
                .enumerate()
                .map(|(i, p)| Prediction {
                    label: format!("c{}", i),
                    probability: *p,
                })
                .collect(),
        )
    }

    #[test]
    fn test_top_prediction() {
        let r = result(&[0.1, 0.7, 0.1, 0.1]);
        assert_eq!(r.top().unwrap().label, "c1");
    }

    #[test]
    fn test_top_tie_first_index_wins() {
        let r = result(&[0.4, 0.1, 0.4, 0.1]);
        assert_eq!(r.top().unwrap().label, "c0");
    }

    #[test]
    fn test_top_empty() {
        assert!(result(&[]).top().is_none());
    }

    #[test]
    fn test_serialize_transparent() {
        let json = serde_json::to_string(&result(&[1.0])).unwrap();
        assert_eq!(json, r#"[{"label":"c0","probability":1.0}]"#);
    }

    #[test]
    fn test_image_size_display() {
        assert_eq!(ImageSize::new(224, 200).to_string(), "224x200");
        assert_eq!(ImageSize::default().pixels(), 224 * 224);
    }
}
