//! データセットの探索とクラスインデックス表

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{ClassifierError, Result};

/// 学習済みモデルが前提とするクラス（インデックス順）
pub const DEFAULT_CLASS_LABELS: [&str; 4] =
    ["onycholysis", "psoriasis", "skin_infection", "stunted_growth"];

/// 学習データとして読み込む拡張子
const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "bmp", "gif", "webp"];

/// 拡張子で画像ファイルか判定（大文字小文字は区別しない）
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

/// クラスラベル <-> インデックスの対応表
///
/// 学習時にディレクトリ名のソート順で作成し、モデルのメタデータに保存します。
/// 推論時は同じ表を読み戻すので、両者がずれることはありません。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct ClassIndexMap {
    labels: Vec<String>,
    index: HashMap<String, usize>,
}

impl ClassIndexMap {
    pub fn new(labels: Vec<String>) -> Result<Self> {
        if labels.is_empty() {
            return Err(ClassifierError::InvalidArgument(
                "class index map must contain at least one label".to_string(),
            ));
        }
        let mut index = HashMap::with_capacity(labels.len());
        for (i, label) in labels.iter().enumerate() {
            if index.insert(label.clone(), i).is_some() {
                return Err(ClassifierError::InvalidArgument(format!(
                    "duplicate class label: {}",
                    label
                )));
            }
        }
        Ok(Self { labels, index })
    }

    /// onycholysis / psoriasis / skin_infection / stunted_growth
    pub fn default_labels() -> Self {
        Self::new(DEFAULT_CLASS_LABELS.iter().map(|s| s.to_string()).collect())
            .unwrap_or_else(|_| unreachable!("default labels are unique and non-empty"))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn label(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.index.get(label).copied()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

impl TryFrom<Vec<String>> for ClassIndexMap {
    type Error = ClassifierError;

    fn try_from(labels: Vec<String>) -> Result<Self> {
        Self::new(labels)
    }
}

impl From<ClassIndexMap> for Vec<String> {
    fn from(map: ClassIndexMap) -> Self {
        map.labels
    }
}

/// クラス別サブフォルダを持つ画像ディレクトリ
#[derive(Debug, Clone)]
pub struct LabeledImageSet {
    /// (クラス名, 画像パス) をクラス名順で保持
    classes: Vec<(String, Vec<PathBuf>)>,
}

impl LabeledImageSet {
    /// ディレクトリを走査してクラスと画像を収集
    ///
    /// クラス名・ファイル名ともにソートするので、同じツリーなら結果も同じ順序になります。
    pub fn discover(root: &Path) -> Result<Self> {
        let mut classes = Vec::new();

        for entry in std::fs::read_dir(root)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            let class_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| {
                    ClassifierError::InvalidArgument(format!(
                        "class directory name is not valid UTF-8: {:?}",
                        path
                    ))
                })?
                .to_string();

            let mut images = Vec::new();
            for img_entry in std::fs::read_dir(&path)? {
                let img_path = img_entry?.path();
                if img_path.is_file() && is_image_file(&img_path) {
                    images.push(img_path);
                }
            }
            images.sort();
            classes.push((class_name, images));
        }

        classes.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(Self { classes })
    }

    pub fn class_names(&self) -> Vec<String> {
        self.classes.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn class_map(&self) -> Result<ClassIndexMap> {
        ClassIndexMap::new(self.class_names())
    }

    pub fn num_images(&self) -> usize {
        self.classes.iter().map(|(_, images)| images.len()).sum()
    }

    /// クラスごとの画像枚数
    pub fn counts(&self) -> Vec<(&str, usize)> {
        self.classes
            .iter()
            .map(|(name, images)| (name.as_str(), images.len()))
            .collect()
    }

    /// 指定した対応表でラベル付けしたサンプル一覧
    ///
    /// 対応表に無いクラスのフォルダは無視します。
    pub fn samples(&self, class_map: &ClassIndexMap) -> Vec<(PathBuf, usize)> {
        let mut samples = Vec::with_capacity(self.num_images());
        for (name, images) in &self.classes {
            if let Some(class_id) = class_map.index_of(name) {
                samples.extend(images.iter().map(|p| (p.clone(), class_id)));
            }
        }
        samples
    }

    /// `other` に存在しないクラス名
    pub fn classes_missing_from(&self, other: &LabeledImageSet) -> Vec<String> {
        let theirs = other.class_names();
        self.class_names()
            .into_iter()
            .filter(|name| !theirs.contains(name))
            .collect()
    }
}
