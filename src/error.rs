//! エラー型
//!
//! ライブラリ全体で使う [`ClassifierError`] と `Result` エイリアスを提供します。

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// 分類器のエラー
#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("cannot decode image {path:?}: {source}")]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// 学習側に存在するクラスが検証側に無い
    #[error("class directories differ between train and val: missing in val {missing:?}")]
    ClassMismatch { missing: Vec<String> },

    #[error("no training samples found in {0:?}")]
    EmptyDataset(PathBuf),

    #[error("model produces {outputs} outputs but the label map has {labels} labels")]
    LabelCardinality { outputs: usize, labels: usize },

    #[error("model artifact error: {0}")]
    Artifact(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("{0}")]
    DetectorUnavailable(String),
}

impl ClassifierError {
    pub fn decode(path: impl Into<PathBuf>, source: image::ImageError) -> Self {
        Self::ImageDecode {
            path: path.into(),
            source,
        }
    }
}

impl From<anyhow::Error> for ClassifierError {
    fn from(err: anyhow::Error) -> Self {
        // {:#} で context チェーンごと保持する
        Self::Artifact(format!("{:#}", err))
    }
}

pub type Result<T> = std::result::Result<T, ClassifierError>;
