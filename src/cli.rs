//! コマンドライン定義

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::model::{AppConfig, DeviceType};
use crate::types::ImageSize;

/// Nail and skin condition classifier: training, dataset splitting and HTTP serving.
#[derive(Parser, Debug)]
#[command(name = "nail_classifier")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path (JSON)
    #[arg(short, long, env = "NAIL_CLASSIFIER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error). RUST_LOG takes precedence
    #[arg(short, long, env = "NAIL_CLASSIFIER_LOG_LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP prediction service
    Serve(ServeArgs),

    /// Fine-tune the classification head on data_dir/train and data_dir/val
    Train(TrainArgs),

    /// Copy a class-per-folder dataset into train and val trees
    Split(SplitArgs),

    /// Print the metadata stored in a model artifact
    Inspect {
        /// Model artifact (defaults to the configured model path)
        model_path: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Bind address
    #[arg(short, long, env = "NAIL_CLASSIFIER_BIND")]
    pub bind: Option<String>,

    /// Model artifact to load
    #[arg(long)]
    pub model_path: Option<PathBuf>,

    /// Compute device (wgpu, cpu)
    #[arg(long)]
    pub device: Option<DeviceType>,

    /// Directory for temporary upload files
    #[arg(long)]
    pub upload_dir: Option<PathBuf>,

    /// Keep uploaded files after the request finishes
    #[arg(long)]
    pub retain_uploads: bool,
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Directory containing train/ and val/
    #[arg(long)]
    pub data_dir: PathBuf,

    /// Where to write the model artifact
    #[arg(long)]
    pub model_save_path: Option<PathBuf>,

    /// Input image size
    #[arg(long, num_args = 2, value_names = ["HEIGHT", "WIDTH"])]
    pub img_size: Option<Vec<u32>>,

    #[arg(long)]
    pub batch_size: Option<usize>,

    #[arg(long)]
    pub epochs: Option<usize>,

    #[arg(long)]
    pub learning_rate: Option<f64>,

    /// Epochs without validation improvement before stopping
    #[arg(long)]
    pub patience: Option<usize>,

    /// Compute device (wgpu, cpu)
    #[arg(long)]
    pub device: Option<DeviceType>,

    /// Pretrained feature extractor weights (burn mpk record)
    #[arg(long)]
    pub backbone_weights: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct SplitArgs {
    /// Dataset root with one subdirectory per class
    #[arg(long)]
    pub source: PathBuf,

    #[arg(long)]
    pub train_dir: PathBuf,

    #[arg(long)]
    pub val_dir: PathBuf,

    /// Fraction of each class copied to val
    #[arg(long, default_value_t = 0.2)]
    pub val_ratio: f64,

    /// Shuffle seed (random when omitted)
    #[arg(long)]
    pub seed: Option<u64>,
}

impl Cli {
    /// ログ関連のフラグを設定に反映
    pub fn apply_logging(&self, config: &mut AppConfig) {
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if self.json_logs {
            config.logging.json = true;
        }
    }
}

impl ServeArgs {
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(bind) = &self.bind {
            config.server.bind_addr = bind.clone();
        }
        if let Some(path) = &self.model_path {
            config.model.model_path = path.clone();
        }
        if let Some(device) = self.device {
            config.device_type = device;
        }
        if let Some(dir) = &self.upload_dir {
            config.server.upload_dir = dir.clone();
        }
        if self.retain_uploads {
            config.server.retain_uploads = true;
        }
    }
}

impl TrainArgs {
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(path) = &self.model_save_path {
            config.model.model_path = path.clone();
        }
        if let Some([height, width]) = self.img_size.as_deref() {
            config.training.image_size = ImageSize::new(*height, *width);
        }
        if let Some(batch_size) = self.batch_size {
            config.training.batch_size = batch_size;
        }
        if let Some(epochs) = self.epochs {
            config.training.num_epochs = epochs;
        }
        if let Some(lr) = self.learning_rate {
            config.training.learning_rate = lr;
        }
        if let Some(patience) = self.patience {
            config.training.patience = patience;
        }
        if let Some(device) = self.device {
            config.device_type = device;
        }
        if let Some(weights) = &self.backbone_weights {
            config.model.backbone_weights = Some(weights.clone());
        }
    }
}
