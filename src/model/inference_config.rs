//! モデルメタデータを使用した推論設定
//!
//! 保存されたモデルメタデータを読み込んで推論に必要な情報を取得します。

use tracing::info;

use crate::dataset::ClassIndexMap;
use crate::model::model_metadata::ModelMetadata;
use crate::types::ImageSize;

/// モデルメタデータから推論用情報を取得
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    /// 全クラスラベル（出力インデックス順）
    pub labels: ClassIndexMap,

    /// モデル入力解像度
    pub input_size: ImageSize,

    /// 分類ヘッドの中間ユニット数
    pub hidden_units: usize,
}

impl InferenceConfig {
    /// メタデータからInferenceConfigを作成
    pub fn from_metadata(metadata: &ModelMetadata) -> Self {
        Self {
            labels: metadata.class_labels.clone(),
            input_size: metadata.input_size,
            hidden_units: metadata.hidden_units,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.labels.len()
    }

    /// クラスインデックスからラベルを取得
    pub fn class_index_to_label(&self, index: usize) -> Option<&str> {
        self.labels.label(index)
    }

    /// 設定情報をログに出す
    pub fn log_info(&self) {
        info!(
            labels = %self.labels.labels().join(", "),
            input_size = %self.input_size,
            classes = self.num_classes(),
            "推論設定"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_metadata() {
        let metadata = ModelMetadata::new(
            ClassIndexMap::default_labels(),
            ImageSize::new(96, 128),
            64,
            0.5,
            1,
            1,
            1.0,
        );
        let config = InferenceConfig::from_metadata(&metadata);
        assert_eq!(config.num_classes(), 4);
        assert_eq!(config.input_size, ImageSize::new(96, 128));
        assert_eq!(config.class_index_to_label(0), Some("onycholysis"));
        assert_eq!(config.class_index_to_label(4), None);
    }
}
