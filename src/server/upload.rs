//! アップロード画像の検証と一時保存
//!
//! 両エンドポイントで同じ [`UploadPolicy`] を使います。
//! 保存先は [`UploadStore`] が作る一意な一時ファイルで、レスポンス後に削除されます。

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

/// 受け付ける拡張子（小文字）
pub const ALLOWED_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "gif", "webp"];

/// multipart のファイルフィールド名
pub const IMAGE_FIELD: &str = "image";

/// リクエストから取り出したファイル部分
#[derive(Debug, Clone)]
pub struct ImageUpload {
    /// クライアントが送ったファイル名
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// 検証で弾かれた理由（すべて 400）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadRejection {
    MissingFile,
    EmptyFilename,
    Avif,
    InvalidType,
}

impl UploadRejection {
    pub fn message(&self) -> &'static str {
        match self {
            UploadRejection::MissingFile => "No image file part in the request",
            UploadRejection::EmptyFilename => "No selected file",
            UploadRejection::Avif => {
                "AVIF image format not supported. Please upload JPEG or PNG images."
            }
            UploadRejection::InvalidType => "Invalid file type",
        }
    }
}

impl std::fmt::Display for UploadRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

/// アップロード検証ルール
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    allowed: Vec<String>,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            allowed: ALLOWED_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl UploadPolicy {
    /// 検査順: フィールド有無 → 空ファイル名 → avif → 許可拡張子
    pub fn validate(&self, upload: Option<ImageUpload>) -> Result<ImageUpload, UploadRejection> {
        let upload = upload.ok_or(UploadRejection::MissingFile)?;
        if upload.filename.is_empty() {
            return Err(UploadRejection::EmptyFilename);
        }

        let ext = extension(&upload.filename).ok_or(UploadRejection::InvalidType)?;
        if ext == "avif" {
            return Err(UploadRejection::Avif);
        }
        if !self.allowed.iter().any(|a| *a == ext) {
            return Err(UploadRejection::InvalidType);
        }
        Ok(upload)
    }
}

/// 最後の '.' より後ろを小文字で返す。'.' が無ければ None
fn extension(filename: &str) -> Option<String> {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
}

/// ファイル名を安全な形にする
///
/// ASCII 以外は捨て、パス区切りは空白扱い、空白の連続は `_` 1つ、
/// `[A-Za-z0-9_.-]` 以外は削除、先頭と末尾の `.` `_` は取り除く。
pub fn secure_filename(filename: &str) -> String {
    let ascii: String = filename
        .chars()
        .filter(|c| c.is_ascii())
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();
    let joined = ascii.split_whitespace().collect::<Vec<_>>().join("_");
    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();
    kept.trim_matches(|c| c == '.' || c == '_').to_string()
}

/// 保存済みのアップロード
///
/// `Scoped` は drop 時に削除されます。
#[derive(Debug)]
pub enum StoredUpload {
    Scoped(NamedTempFile),
    Retained(PathBuf),
}

impl StoredUpload {
    pub fn path(&self) -> &Path {
        match self {
            StoredUpload::Scoped(file) => file.path(),
            StoredUpload::Retained(path) => path,
        }
    }
}

/// アップロードの保存先
#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
    retain: bool,
}

impl UploadStore {
    pub fn new(dir: impl Into<PathBuf>, retain: bool) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, retain })
    }

    /// 一意な名前で書き込む
    ///
    /// 同じファイル名が同時に届いても上書きし合わない。
    pub fn store(&self, upload: &ImageUpload) -> std::io::Result<StoredUpload> {
        let safe = secure_filename(&upload.filename);
        let (stem, ext) = match safe.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), format!(".{}", ext)),
            _ => ("upload".to_string(), String::new()),
        };

        let mut file = tempfile::Builder::new()
            .prefix(&format!("{}-", stem))
            .suffix(&ext)
            .tempfile_in(&self.dir)?;
        file.write_all(&upload.bytes)?;
        file.flush()?;

        if self.retain {
            let (_, path) = file.keep()?;
            debug!(path = %path.display(), "アップロードを保持します");
            Ok(StoredUpload::Retained(path))
        } else {
            Ok(StoredUpload::Scoped(file))
        }
    }
}
