//! 学習用/検証用へのデータセット分割

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{ClassifierError, Result};

/// 1クラス分の分割結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassSplit {
    pub class_name: String,
    pub train: usize,
    pub val: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SplitReport {
    pub classes: Vec<ClassSplit>,
}

impl SplitReport {
    pub fn total_train(&self) -> usize {
        self.classes.iter().map(|c| c.train).sum()
    }

    pub fn total_val(&self) -> usize {
        self.classes.iter().map(|c| c.val).sum()
    }

    pub fn class(&self, name: &str) -> Option<&ClassSplit> {
        self.classes.iter().find(|c| c.class_name == name)
    }
}

/// `source` のクラス別フォルダを `train_dir` / `val_dir` にコピーして分割する
///
/// 各クラスのファイルをシャッフルし、先頭 `floor(N * val_ratio)` 件を検証側、
/// 残りを学習側へコピーします。元ファイルは変更しません。
/// 空のクラスでも両側に空フォルダを作成します。
pub fn split_dataset<R: Rng + ?Sized>(
    source_dir: &Path,
    train_dir: &Path,
    val_dir: &Path,
    val_ratio: f64,
    rng: &mut R,
) -> Result<SplitReport> {
    if !(val_ratio > 0.0 && val_ratio < 1.0) {
        return Err(ClassifierError::InvalidArgument(format!(
            "val_ratio must be in (0, 1), got {}",
            val_ratio
        )));
    }

    std::fs::create_dir_all(train_dir)?;
    std::fs::create_dir_all(val_dir)?;

    let mut classes = Vec::new();
    for entry in std::fs::read_dir(source_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            classes.push(entry.file_name());
        }
    }
    classes.sort();

    let mut report = SplitReport::default();

    for class in classes {
        let cls_source = source_dir.join(&class);
        let cls_train = train_dir.join(&class);
        let cls_val = val_dir.join(&class);
        std::fs::create_dir_all(&cls_train)?;
        std::fs::create_dir_all(&cls_val)?;

        let mut files = Vec::new();
        for entry in std::fs::read_dir(&cls_source)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.file_name());
            }
        }
        // read_dir の順序はファイルシステム依存なので、シード固定時の再現性のため先にソート
        files.sort();
        files.shuffle(rng);

        let val_count = (files.len() as f64 * val_ratio).floor() as usize;
        let (val_files, train_files) = files.split_at(val_count);

        for f in train_files {
            std::fs::copy(cls_source.join(f), cls_train.join(f))?;
        }
        for f in val_files {
            std::fs::copy(cls_source.join(f), cls_val.join(f))?;
        }

        let class_name = class.to_string_lossy().into_owned();
        debug!(
            class = %class_name,
            train = train_files.len(),
            val = val_files.len(),
            "クラスを分割しました"
        );
        report.classes.push(ClassSplit {
            class_name,
            train: train_files.len(),
            val: val_files.len(),
        });
    }

    info!(
        classes = report.classes.len(),
        train = report.total_train(),
        val = report.total_val(),
        "データセット分割完了"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;
    use std::fs;
    use tempfile::tempdir;

    fn make_source(root: &Path, classes: &[(&str, usize)]) {
        for (name, n) in classes {
            let dir = root.join(name);
            fs::create_dir_all(&dir).unwrap();
            for i in 0..*n {
                fs::write(dir.join(format!("img_{:03}.jpg", i)), [i as u8]).unwrap();
            }
        }
    }

    fn names(dir: &Path) -> HashSet<String> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_split_counts_per_class() {
        let tmp = tempdir().unwrap();
        let source = tmp.path().join("source");
        make_source(&source, &[("psoriasis", 10), ("onycholysis", 7), ("empty", 0)]);
        let train = tmp.path().join("train");
        let val = tmp.path().join("val");

        let mut rng = StdRng::seed_from_u64(7);
        let report = split_dataset(&source, &train, &val, 0.2, &mut rng).unwrap();

        let pso = report.class("psoriasis").unwrap();
        assert_eq!((pso.train, pso.val), (8, 2));
        let ony = report.class("onycholysis").unwrap();
        assert_eq!((ony.train, ony.val), (6, 1));
        let empty = report.class("empty").unwrap();
        assert_eq!((empty.train, empty.val), (0, 0));

        for class in ["psoriasis", "onycholysis", "empty"] {
            let t = names(&train.join(class));
            let v = names(&val.join(class));
            assert!(t.is_disjoint(&v));
            let all: HashSet<_> = t.union(&v).cloned().collect();
            assert_eq!(all, names(&source.join(class)));
        }
    }

    #[test]
    fn test_split_does_not_touch_source() {
        let tmp = tempdir().unwrap();
        let source = tmp.path().join("source");
        make_source(&source, &[("a", 5)]);
        let before = names(&source.join("a"));

        let mut rng = StdRng::seed_from_u64(1);
        split_dataset(
            &source,
            &tmp.path().join("train"),
            &tmp.path().join("val"),
            0.5,
            &mut rng,
        )
        .unwrap();

        assert_eq!(names(&source.join("a")), before);
        let copied = fs::read(tmp.path().join("train/a").join(
            names(&tmp.path().join("train/a")).into_iter().next().unwrap(),
        ))
        .unwrap();
        assert_eq!(copied.len(), 1);
    }

    #[test]
    fn test_split_rejects_bad_ratio() {
        let tmp = tempdir().unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        for ratio in [0.0, 1.0, -0.1, 1.5] {
            let err = split_dataset(
                tmp.path(),
                &tmp.path().join("t"),
                &tmp.path().join("v"),
                ratio,
                &mut rng,
            )
            .unwrap_err();
            assert!(matches!(err, ClassifierError::InvalidArgument(_)));
        }
    }

    #[test]
    fn test_split_missing_source_is_error() {
        let tmp = tempdir().unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let err = split_dataset(
            &tmp.path().join("nope"),
            &tmp.path().join("t"),
            &tmp.path().join("v"),
            0.2,
            &mut rng,
        )
        .unwrap_err();
        assert!(matches!(err, ClassifierError::Io(_)));
    }
}
