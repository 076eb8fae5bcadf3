//! モデル学習
//!
//! `data_dir/train` と `data_dir/val` のクラス別フォルダから学習し、
//! 検証精度が改善するたびに成果物を書き出します。

use burn::{
    backend::Wgpu,
    data::dataloader::{batcher::Batcher, DataLoaderBuilder},
    module::{AutodiffModule, Module},
    optim::{AdamConfig, GradientsParams, Optimizer},
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor,
    },
};
use burn_autodiff::Autodiff;
use burn_dataset::Dataset;
use burn_ndarray::{NdArray, NdArrayDevice};
use burn_wgpu::WgpuDevice;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::dataset::{ClassIndexMap, LabeledImageSet};
use crate::error::{ClassifierError, Result};
use crate::ml::stopping::TrainingMonitor;
use crate::ml::{ModelConfig, NailClassifier};
use crate::model::{save_model_with_metadata, AppConfig, DeviceType, ModelMetadata};
use crate::preprocess::{self, Augmentation};
use crate::types::{ImageSize, CHANNELS};

/// 学習データセット（パスのリストのみ保持）
pub struct ImageFolderDataset {
    samples: Vec<(PathBuf, usize)>, // (画像パス, クラスID)
}

impl ImageFolderDataset {
    pub fn new(set: &LabeledImageSet, class_map: &ClassIndexMap) -> Self {
        Self {
            samples: set.samples(class_map),
        }
    }
}

/// データセットアイテム（画像パスのみ保持）
#[derive(Clone, Debug)]
pub struct ImageItem {
    pub path: PathBuf,
    pub label: usize,
}

impl Dataset<ImageItem> for ImageFolderDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        let (path, label) = self.samples.get(index)?;
        Some(ImageItem {
            path: path.clone(),
            label: *label,
        })
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// バッチャー
///
/// `augmentation` が Some の場合、サンプルごと・エポックごとに別の変換を掛けます。
#[derive(Clone)]
pub struct ImageBatcher<B: Backend> {
    device: B::Device,
    image_size: ImageSize,
    augmentation: Option<Augmentation>,
}

impl<B: Backend> ImageBatcher<B> {
    pub fn new(device: B::Device, image_size: ImageSize, augmentation: Option<Augmentation>) -> Self {
        Self {
            device,
            image_size,
            augmentation,
        }
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher<B> {
    fn batch(&self, items: Vec<ImageItem>, _device: &B::Device) -> ImageBatch<B> {
        let batch_size = items.len();
        let ImageSize { height, width } = self.image_size;
        let sample_len = CHANNELS * self.image_size.pixels();
        let mut all_pixels = Vec::with_capacity(batch_size * sample_len);
        let mut targets_vec = Vec::with_capacity(batch_size);
        let mut rng = rand::thread_rng();

        for item in items {
            let loaded = match &self.augmentation {
                Some(aug) => {
                    preprocess::load_augmented_tensor(&item.path, self.image_size, aug, &mut rng)
                }
                None => preprocess::load_tensor(&item.path, self.image_size),
            };
            match loaded {
                Ok(tensor) => all_pixels.extend_from_slice(tensor.as_slice()),
                Err(e) => {
                    // 1枚の破損で学習全体を止めない
                    warn!(path = %item.path.display(), error = %e, "画像読み込み失敗。ゼロで埋めます");
                    all_pixels.extend(std::iter::repeat(0.0f32).take(sample_len));
                }
            }
            targets_vec.push(item.label as i64);
        }

        // 1回の転送でバッチ全体をデバイスへ
        let images = Tensor::<B, 1>::from_floats(all_pixels.as_slice(), &self.device).reshape([
            batch_size,
            CHANNELS,
            height as usize,
            width as usize,
        ]);
        let targets = Tensor::<B, 1, Int>::from_ints(targets_vec.as_slice(), &self.device);

        ImageBatch { images, targets }
    }
}

/// 学習パラメータ
#[derive(Debug, Clone)]
pub struct TrainRequest {
    /// train/ と val/ を含むディレクトリ
    pub data_dir: PathBuf,
    pub output_path: PathBuf,
    pub image_size: ImageSize,
    pub batch_size: usize,
    pub num_epochs: usize,
    pub learning_rate: f64,
    pub patience: usize,
    pub hidden_units: usize,
    pub dropout: f64,
    pub num_workers: usize,
    pub seed: u64,
    pub augmentation: Augmentation,
    pub backbone_weights: Option<PathBuf>,
    pub device_type: DeviceType,
}

impl TrainRequest {
    pub fn from_config(config: &AppConfig, data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            output_path: config.model.model_path.clone(),
            image_size: config.training.image_size,
            batch_size: config.training.batch_size,
            num_epochs: config.training.num_epochs,
            learning_rate: config.training.learning_rate,
            patience: config.training.patience,
            hidden_units: config.training.hidden_units,
            dropout: config.training.dropout,
            num_workers: config.training.num_workers,
            seed: config.training.seed,
            augmentation: config.augmentation.clone(),
            backbone_weights: config.model.backbone_weights.clone(),
            device_type: config.device_type,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(ClassifierError::InvalidArgument("batch_size must be positive".into()));
        }
        if self.num_epochs == 0 {
            return Err(ClassifierError::InvalidArgument("epochs must be positive".into()));
        }
        if !(self.learning_rate > 0.0) {
            return Err(ClassifierError::InvalidArgument(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }
}

/// 学習結果
#[derive(Debug, Clone, Serialize)]
pub struct TrainingSummary {
    pub artifact_path: PathBuf,
    pub class_labels: Vec<String>,
    pub epochs_run: usize,
    pub best_epoch: usize,
    pub best_val_accuracy: f64,
    pub stopped_early: bool,
}

/// train/ と val/ を読み込み、クラス構成を検証する
fn load_splits(data_dir: &Path) -> Result<(LabeledImageSet, LabeledImageSet, ClassIndexMap)> {
    let train_dir = data_dir.join("train");
    let val_dir = data_dir.join("val");
    let train = LabeledImageSet::discover(&train_dir)?;
    let val = LabeledImageSet::discover(&val_dir)?;

    let missing = train.classes_missing_from(&val);
    if !missing.is_empty() {
        return Err(ClassifierError::ClassMismatch { missing });
    }
    if train.num_images() == 0 {
        return Err(ClassifierError::EmptyDataset(train_dir));
    }
    if val.num_images() == 0 {
        return Err(ClassifierError::EmptyDataset(val_dir));
    }

    let class_map = train.class_map()?;
    for (name, count) in train.counts() {
        info!(class = name, images = count, "学習データ");
    }
    for (name, count) in val.counts() {
        info!(class = name, images = count, "検証データ");
    }

    Ok((train, val, class_map))
}

/// モデル学習を実行
///
/// 設定されたデバイスのバックエンドを選び、成果物（tar.gz）を書き出します。
pub fn train_model(request: &TrainRequest) -> Result<TrainingSummary> {
    request.validate()?;

    match request.device_type {
        DeviceType::Wgpu => {
            info!("GPU (WGPU) モードで学習を開始します");
            run_training::<Autodiff<Wgpu>>(WgpuDevice::default(), request)
        }
        DeviceType::Cpu => {
            info!("CPU (NdArray) モードで学習を開始します");
            run_training::<Autodiff<NdArray>>(NdArrayDevice::Cpu, request)
        }
    }
}

fn run_training<B: AutodiffBackend>(device: B::Device, request: &TrainRequest) -> Result<TrainingSummary> {
    let (train_set, val_set, class_map) = load_splits(&request.data_dir)?;
    let num_classes = class_map.len();
    info!(
        classes = num_classes,
        labels = %class_map.labels().join(", "),
        train = train_set.num_images(),
        val = val_set.num_images(),
        "データセットを読み込みました"
    );

    let model_config = ModelConfig::for_input(num_classes, request.image_size)
        .with_hidden_units(request.hidden_units)
        .with_dropout(request.dropout);
    let mut model: NailClassifier<B> = model_config.init(&device)?;
    match &request.backbone_weights {
        Some(weights) => {
            model = model.with_backbone(weights, &device)?;
            info!(weights = %weights.display(), "事前学習済みの特徴抽出器を読み込みました");
        }
        None => warn!("特徴抽出器の重みが指定されていません。ランダム初期化のまま学習します"),
    }

    let batcher_train =
        ImageBatcher::<B>::new(device.clone(), request.image_size, Some(request.augmentation.clone()));
    let batcher_val = ImageBatcher::<B::InnerBackend>::new(device.clone(), request.image_size, None);

    let dataloader_train = DataLoaderBuilder::new(batcher_train)
        .batch_size(request.batch_size)
        .shuffle(request.seed)
        .num_workers(request.num_workers)
        .build(ImageFolderDataset::new(&train_set, &class_map));

    let dataloader_val = DataLoaderBuilder::new(batcher_val)
        .batch_size(request.batch_size)
        .num_workers(request.num_workers)
        .build(ImageFolderDataset::new(&val_set, &class_map));

    let mut optim = AdamConfig::new().init();
    let mut monitor = TrainingMonitor::<NailClassifier<B::InnerBackend>>::new(request.patience);

    info!(
        epochs = request.num_epochs,
        batch_size = request.batch_size,
        learning_rate = request.learning_rate,
        patience = request.patience,
        "学習を開始します"
    );

    for epoch in 1..=request.num_epochs {
        let mut loss_sum = 0.0;
        let mut batches = 0usize;
        let mut train_correct = 0usize;
        let mut train_total = 0usize;

        for batch in dataloader_train.iter() {
            let item = model.forward_classification(batch.images, batch.targets);
            train_total += item.targets.dims()[0];
            train_correct += count_correct(item.output.clone(), item.targets.clone());
            loss_sum += item.loss.clone().into_scalar().elem::<f64>();
            batches += 1;

            let grads = item.loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optim.step(request.learning_rate, model, grads);
        }

        let model_valid = model.valid();
        let val_accuracy = evaluate(&model_valid, dataloader_val.iter());

        info!(
            epoch,
            train_loss = loss_sum / batches.max(1) as f64,
            train_accuracy = ratio(train_correct, train_total),
            val_accuracy,
            "エポック完了"
        );

        let decision = monitor.observe(epoch, val_accuracy, model_valid);
        if let (true, Some(best)) = (decision.improved, monitor.best_model()) {
            let metadata = ModelMetadata::new(
                class_map.clone(),
                request.image_size,
                request.hidden_units,
                request.dropout,
                epoch as u32,
                epoch as u32,
                val_accuracy,
            );
            let saved =
                save_model_with_metadata(&request.output_path, &metadata, &model_to_bytes(best)?)?;
            info!(epoch, val_accuracy, path = %saved.display(), "検証精度が改善したため保存しました");
        }

        if decision.stop {
            info!(
                epoch,
                patience = request.patience,
                "検証精度が改善しないため早期終了します"
            );
            break;
        }
    }

    // 最良エポックの重みを戻し、実行エポック数を反映して書き直す
    let outcome = monitor.finish(|| model.valid());
    let epochs_run = outcome.epochs_run;
    let best_epoch = outcome.best_epoch;
    let best_val_accuracy = outcome.best_metric;
    let metadata = ModelMetadata::new(
        class_map.clone(),
        request.image_size,
        request.hidden_units,
        request.dropout,
        epochs_run as u32,
        best_epoch as u32,
        best_val_accuracy,
    );
    let artifact_path =
        save_model_with_metadata(&request.output_path, &metadata, &model_to_bytes(&outcome.model)?)?;

    info!(
        epochs_run,
        best_epoch,
        best_val_accuracy,
        path = %artifact_path.display(),
        "学習完了"
    );

    Ok(TrainingSummary {
        artifact_path,
        class_labels: class_map.labels().to_vec(),
        epochs_run,
        best_epoch,
        best_val_accuracy,
        stopped_early: outcome.stopped_early,
    })
}

/// 検証データ全体の正解率
pub fn evaluate<B: Backend>(
    model: &NailClassifier<B>,
    batches: impl Iterator<Item = ImageBatch<B>>,
) -> f64 {
    let mut correct = 0usize;
    let mut total = 0usize;
    for batch in batches {
        total += batch.targets.dims()[0];
        correct += count_correct(model.forward(batch.images), batch.targets);
    }
    ratio(correct, total)
}

fn count_correct<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let [batch_size, _] = logits.dims();
    let predicted = logits.argmax(1).reshape([batch_size]);
    predicted
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem::<i64>() as usize
}

fn ratio(correct: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        correct as f64 / total as f64
    }
}

/// モデルの重みを f32 精度のバイナリにする（CompactRecorder は f16 になるので使わない）
pub fn model_to_bytes<B: Backend>(model: &NailClassifier<B>) -> Result<Vec<u8>> {
    BinBytesRecorder::<FullPrecisionSettings>::default()
        .record(model.clone().into_record(), ())
        .map_err(|e| ClassifierError::Model(format!("failed to serialize model weights: {:?}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::load_model_with_metadata;
    use image::{Rgb, RgbImage};
    use std::fs;
    use tempfile::tempdir;

    type TestBackend = NdArray<f32>;

    fn write_image(path: &Path, color: [u8; 3]) {
        RgbImage::from_pixel(40, 40, Rgb(color)).save(path).unwrap();
    }

    fn make_split(root: &Path, split: &str, classes: &[(&str, [u8; 3])], per_class: usize) {
        for (name, color) in classes {
            let dir = root.join(split).join(name);
            fs::create_dir_all(&dir).unwrap();
            for i in 0..per_class {
                write_image(&dir.join(format!("{}.png", i)), *color);
            }
        }
    }

    fn request(data_dir: &Path, output: &Path) -> TrainRequest {
        TrainRequest {
            data_dir: data_dir.to_path_buf(),
            output_path: output.to_path_buf(),
            image_size: ImageSize::new(32, 32),
            batch_size: 2,
            num_epochs: 2,
            learning_rate: 1e-3,
            patience: 5,
            hidden_units: 8,
            dropout: 0.5,
            num_workers: 1,
            seed: 1,
            augmentation: Augmentation::default(),
            backbone_weights: None,
            device_type: DeviceType::Cpu,
        }
    }

    #[test]
    fn test_batcher_shapes_and_normalization() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        write_image(&a, [255, 255, 255]);
        write_image(&b, [0, 0, 0]);

        let batcher =
            ImageBatcher::<TestBackend>::new(NdArrayDevice::Cpu, ImageSize::new(32, 32), None);
        let batch = batcher.batch(
            vec![
                ImageItem { path: a, label: 1 },
                ImageItem { path: b, label: 0 },
            ],
            &NdArrayDevice::Cpu,
        );

        assert_eq!(batch.images.dims(), [2, 3, 32, 32]);
        let max: f32 = batch.images.clone().max().into_scalar().elem();
        let min: f32 = batch.images.min().into_scalar().elem();
        assert_eq!((min, max), (0.0, 1.0));
        let targets: Vec<i64> = batch.targets.into_data().convert::<i64>().to_vec().unwrap();
        assert_eq!(targets, vec![1, 0]);
    }

    #[test]
    fn test_batcher_zero_fills_broken_image() {
        let dir = tempdir().unwrap();
        let broken = dir.path().join("broken.png");
        fs::write(&broken, b"xx").unwrap();

        let batcher =
            ImageBatcher::<TestBackend>::new(NdArrayDevice::Cpu, ImageSize::new(32, 32), None);
        let batch = batcher.batch(vec![ImageItem { path: broken, label: 0 }], &NdArrayDevice::Cpu);
        let sum: f32 = batch.images.sum().into_scalar().elem();
        assert_eq!(sum, 0.0);
    }

    #[test]
    fn test_missing_val_class_fails_fast() {
        let dir = tempdir().unwrap();
        make_split(dir.path(), "train", &[("psoriasis", [255, 0, 0]), ("onycholysis", [0, 255, 0])], 1);
        make_split(dir.path(), "val", &[("psoriasis", [255, 0, 0])], 1);

        let err = train_model(&request(dir.path(), &dir.path().join("m"))).unwrap_err();
        match err {
            ClassifierError::ClassMismatch { missing } => assert_eq!(missing, vec!["onycholysis"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_training_set_fails() {
        let dir = tempdir().unwrap();
        make_split(dir.path(), "train", &[("a", [0, 0, 0])], 0);
        make_split(dir.path(), "val", &[("a", [0, 0, 0])], 1);
        assert!(matches!(
            train_model(&request(dir.path(), &dir.path().join("m"))).unwrap_err(),
            ClassifierError::EmptyDataset(_)
        ));
    }

    #[test]
    fn test_train_writes_artifact_with_label_map() {
        let dir = tempdir().unwrap();
        let classes = [("onycholysis", [250, 10, 10]), ("psoriasis", [10, 10, 250])];
        make_split(dir.path(), "train", &classes, 2);
        make_split(dir.path(), "val", &classes, 1);

        let output = dir.path().join("out/model.h5");
        let summary = train_model(&request(dir.path(), &output)).unwrap();

        assert_eq!(summary.artifact_path, dir.path().join("out/model.tar.gz"));
        assert_eq!(summary.class_labels, vec!["onycholysis", "psoriasis"]);
        assert!(summary.epochs_run >= 1 && summary.epochs_run <= 2);
        assert!(summary.best_epoch >= 1);
        assert!((0.0..=1.0).contains(&summary.best_val_accuracy));

        let (metadata, binary) = load_model_with_metadata(&summary.artifact_path).unwrap();
        assert_eq!(metadata.class_labels.labels(), &["onycholysis", "psoriasis"]);
        assert_eq!(metadata.input_size, ImageSize::new(32, 32));
        assert_eq!(metadata.best_epoch as usize, summary.best_epoch);
        assert!(!binary.is_empty());
    }
}
