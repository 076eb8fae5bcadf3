//! クラス別フォルダ形式の画像データセット
//!
//! ```text
//! root/
//!     onycholysis/*.jpg
//!     psoriasis/*.jpg
//!     ...
//! ```

pub mod folder;
pub mod split;

pub use folder::{is_image_file, ClassIndexMap, LabeledImageSet, DEFAULT_CLASS_LABELS};
pub use split::{split_dataset, ClassSplit, SplitReport};
