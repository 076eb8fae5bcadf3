//! アプリケーション設定管理モジュール
//!
//! 計算デバイス・学習・サーバー設定などをJSON形式で保存・読み込みします。

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::preprocess::Augmentation;
use crate::types::ImageSize;

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    #[default]
    Wgpu,
    /// NdArray (CPU) バックエンド
    Cpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

impl std::str::FromStr for DeviceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wgpu" | "gpu" => Ok(DeviceType::Wgpu),
            "cpu" | "ndarray" => Ok(DeviceType::Cpu),
            other => Err(format!("unknown device type: {}", other)),
        }
    }
}

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// 学習済みモデル（tar.gz）のパス
    pub model_path: PathBuf,
    /// 事前学習済み特徴抽出器の重み（burn mpk 形式）
    pub backbone_weights: Option<PathBuf>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("model/vgg16_finetuned.tar.gz"),
            backbone_weights: None,
        }
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    /// エポック数
    pub num_epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// ワーカー数
    pub num_workers: usize,
    /// 学習率
    pub learning_rate: f64,
    /// 入力画像サイズ
    pub image_size: ImageSize,
    /// 検証精度が改善しないまま許容するエポック数
    pub patience: usize,
    /// 分類ヘッドの中間ユニット数
    pub hidden_units: usize,
    /// ドロップアウト率
    pub dropout: f64,
    /// シャッフル用シード
    pub seed: u64,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            num_epochs: 20,
            batch_size: 32,
            num_workers: 1,
            learning_rate: 1e-4,
            image_size: ImageSize::default(),
            patience: 5,
            hidden_units: 256,
            dropout: 0.5,
            seed: 42,
        }
    }
}

/// `/predict` で使う検出器
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    /// 分類モデルの出力をラベル無しで返す
    #[default]
    Classifier,
    /// 検出器なし（常に 500）
    Unavailable,
}

/// HTTPサーバー設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind_addr: String,
    /// アップロード画像の一時保存先
    pub upload_dir: PathBuf,
    /// true の場合、リクエスト後もアップロード画像を残す
    pub retain_uploads: bool,
    pub max_upload_bytes: usize,
    pub cors: bool,
    pub detector: DetectorKind,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5000".to_string(),
            upload_dir: PathBuf::from("uploads"),
            retain_uploads: false,
            max_upload_bytes: 16 * 1024 * 1024,
            cors: true,
            detector: DetectorKind::default(),
        }
    }
}

/// ログ設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// RUST_LOG が無い場合に使うフィルタ
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// 設定の読み込み元
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    /// 設定ファイルが無い
    Defaults,
    /// 設定ファイルが壊れているためデフォルト設定を使用
    Fallback { path: PathBuf, error: String },
}

impl ConfigSource {
    pub fn log(&self) {
        match self {
            ConfigSource::File(path) => {
                info!(path = %path.display(), "設定ファイルを読み込みました")
            }
            ConfigSource::Defaults => {
                info!("設定ファイルが存在しません。デフォルト設定を使用します")
            }
            ConfigSource::Fallback { path, error } => warn!(
                path = %path.display(),
                error = %error,
                "設定ファイルの読み込みに失敗しました。デフォルト設定を使用します"
            ),
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 計算デバイスの種類
    pub device_type: DeviceType,
    /// モデル設定
    pub model: ModelSettings,
    /// トレーニング設定
    pub training: TrainingSettings,
    /// 学習時のデータ拡張
    pub augmentation: Augmentation,
    /// サーバー設定
    pub server: ServerSettings,
    pub logging: LoggingSettings,
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: AppConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }

    /// 明示されたパスは必ず読み込む。未指定ならデフォルトパスを試し、無ければデフォルト設定
    ///
    /// ロギング初期化前に呼ばれるため、結果は `ConfigSource` で返し呼び出し側でログに出す。
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<(Self, ConfigSource)> {
        Self::load_or_default_at(path, &Self::default_path())
    }

    fn load_or_default_at(
        path: Option<&Path>,
        default_path: &Path,
    ) -> anyhow::Result<(Self, ConfigSource)> {
        if let Some(path) = path {
            let config = Self::load(path)?;
            return Ok((config, ConfigSource::File(path.to_path_buf())));
        }

        if !default_path.exists() {
            return Ok((Self::default(), ConfigSource::Defaults));
        }

        match Self::load(default_path) {
            Ok(config) => Ok((config, ConfigSource::File(default_path.to_path_buf()))),
            Err(e) => Ok((
                Self::default(),
                ConfigSource::Fallback {
                    path: default_path.to_path_buf(),
                    error: format!("{:#}", e),
                },
            )),
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 設定情報をログに出す
    pub fn log_summary(&self) {
        info!(
            device = %self.device_type,
            model_path = %self.model.model_path.display(),
            image_size = %self.training.image_size,
            epochs = self.training.num_epochs,
            batch_size = self.training.batch_size,
            learning_rate = self.training.learning_rate,
            bind_addr = %self.server.bind_addr,
            "アプリケーション設定"
        );
    }
}
