//! モデルメタデータの定義
//!
//! tar.gz 内の `metadata.json` として保存され、推論時はこれだけを頼りに
//! ネットワークを組み立て直します。クラスの順序もここに入るので、
//! 推論側でラベル表を手で書き直す必要はありません。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::dataset::ClassIndexMap;
use crate::types::ImageSize;

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// 全クラスラベル（出力インデックス順）
    /// 例: ["onycholysis", "psoriasis", "skin_infection", "stunted_growth"]
    /// ラベルを持たない古い成果物では既定の4クラスを使う
    #[serde(default = "ClassIndexMap::default_labels")]
    pub class_labels: ClassIndexMap,

    /// モデル入力サイズ（学習時と推論時で同一でなければならない）
    pub input_size: ImageSize,

    /// 分類ヘッドの中間ユニット数
    pub hidden_units: usize,

    /// 学習時のドロップアウト率（推論時は無効）
    pub dropout: f64,

    /// 実行したエポック数
    pub num_epochs: u32,

    /// 最良エポック（1始まり）
    pub best_epoch: u32,

    /// 最良エポックの検証精度
    pub val_accuracy: f64,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    pub fn new(
        class_labels: ClassIndexMap,
        input_size: ImageSize,
        hidden_units: usize,
        dropout: f64,
        num_epochs: u32,
        best_epoch: u32,
        val_accuracy: f64,
    ) -> Self {
        let trained_at = chrono::Local::now().to_rfc3339();

        Self {
            class_labels,
            input_size,
            hidden_units,
            dropout,
            num_epochs,
            best_epoch,
            val_accuracy,
            trained_at,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.class_labels.len()
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}
