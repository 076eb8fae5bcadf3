//! 機械学習モデルの共通定義
//!
//! 凍結した VGG16 特徴抽出器の上に小さな分類ヘッドを載せたモデルを提供します。

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::CrossEntropyLossConfig,
        pool::{MaxPool2d, MaxPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::{activation::softmax, backend::Backend, Int, Tensor},
    train::ClassificationOutput,
};
use std::path::Path;
use tracing::info;

use crate::error::{self, ClassifierError};
use crate::types::ImageSize;

/// VGG16 の畳み込みブロック構成（各ブロックの後に 2x2 max pool）
const VGG16_BLOCKS: [&[usize]; 5] = [
    &[64, 64],
    &[128, 128],
    &[256, 256, 256],
    &[512, 512, 512],
    &[512, 512, 512],
];

/// 特徴抽出器の出力チャネル数
pub const FEATURE_CHANNELS: usize = 512;

/// 5回のプーリングで 1/32 になる
const DOWNSAMPLE: u32 = 32;

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    pub num_classes: usize,
    /// 入力画像の高さ
    pub image_height: usize,
    /// 入力画像の幅
    pub image_width: usize,
    /// 中間全結合層のユニット数
    #[config(default = 256)]
    pub hidden_units: usize,
    /// ドロップアウト率
    #[config(default = 0.5)]
    pub dropout: f64,
}

impl ModelConfig {
    pub fn for_input(num_classes: usize, size: ImageSize) -> Self {
        Self::new(num_classes, size.height as usize, size.width as usize)
    }

    /// 特徴抽出器の出力を平坦化した次元
    ///
    /// 512 * (H / 32) * (W / 32)
    pub fn feature_dim(&self) -> usize {
        let h = self.image_height / DOWNSAMPLE as usize;
        let w = self.image_width / DOWNSAMPLE as usize;
        FEATURE_CHANNELS * h * w
    }

    pub fn validate(&self) -> error::Result<()> {
        if self.num_classes == 0 {
            return Err(ClassifierError::Model("num_classes must be positive".to_string()));
        }
        if self.image_height < DOWNSAMPLE as usize || self.image_width < DOWNSAMPLE as usize {
            return Err(ClassifierError::Model(format!(
                "input size {}x{} is too small (minimum {}x{})",
                self.image_height, self.image_width, DOWNSAMPLE, DOWNSAMPLE
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(ClassifierError::Model(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        Ok(())
    }

    /// モデルを初期化
    ///
    /// 特徴抽出器は勾配を持たない状態で作られます。
    pub fn init<B: Backend>(&self, device: &B::Device) -> error::Result<NailClassifier<B>> {
        self.validate()?;

        let d = self.feature_dim();
        info!(
            input = %format!("{}x{}", self.image_height, self.image_width),
            feature_dim = d,
            hidden = self.hidden_units,
            classes = self.num_classes,
            "モデルを構築します"
        );

        Ok(NailClassifier {
            features: Vgg16Features::init(device).no_grad(),
            hidden: LinearConfig::new(d, self.hidden_units).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            output: LinearConfig::new(self.hidden_units, self.num_classes).init(device),
            activation: Relu::new(),
        })
    }
}

/// 3x3 畳み込み (same padding) + ReLU を繰り返し、最後に 2x2 max pool
#[derive(Module, Debug)]
pub struct Vgg16Block<B: Backend> {
    convs: Vec<Conv2d<B>>,
    pool: MaxPool2d,
    activation: Relu,
}

impl<B: Backend> Vgg16Block<B> {
    fn init(in_channels: usize, channels: &[usize], device: &B::Device) -> Self {
        let mut convs = Vec::with_capacity(channels.len());
        let mut c_in = in_channels;
        for &c_out in channels {
            convs.push(
                Conv2dConfig::new([c_in, c_out], [3, 3])
                    .with_padding(PaddingConfig2d::Same)
                    .init(device),
            );
            c_in = c_out;
        }

        Self {
            convs,
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            activation: Relu::new(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = x;
        for conv in &self.convs {
            x = self.activation.forward(conv.forward(x));
        }
        self.pool.forward(x)
    }
}

/// VGG16 の畳み込み部分（全結合層なし）
///
/// 入力 [batch, 3, H, W] -> 出力 [batch, 512, H/32, W/32]
#[derive(Module, Debug)]
pub struct Vgg16Features<B: Backend> {
    blocks: Vec<Vgg16Block<B>>,
}

impl<B: Backend> Vgg16Features<B> {
    pub fn init(device: &B::Device) -> Self {
        let mut blocks = Vec::with_capacity(VGG16_BLOCKS.len());
        let mut in_channels = 3;
        for channels in VGG16_BLOCKS {
            blocks.push(Vgg16Block::init(in_channels, channels, device));
            in_channels = *channels.last().unwrap_or(&in_channels);
        }
        Self { blocks }
    }

    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        self.blocks
            .iter()
            .fold(images, |x, block| block.forward(x))
    }
}

/// 爪・皮膚画像の分類モデル
///
/// # アーキテクチャ
/// - VGG16 特徴抽出器（凍結）
/// - Flatten
/// - FC: d -> 256 + ReLU
/// - Dropout (0.5)
/// - FC: 256 -> num_classes
/// - Softmax (分類時)
#[derive(Module, Debug)]
pub struct NailClassifier<B: Backend> {
    features: Vgg16Features<B>,
    hidden: Linear<B>,
    dropout: Dropout,
    output: Linear<B>,
    activation: Relu,
}

impl<B: Backend> NailClassifier<B> {
    /// 事前学習済みの特徴抽出器の重みを読み込む（読み込み後も凍結したまま）
    pub fn with_backbone(mut self, weights: &Path, device: &B::Device) -> error::Result<Self> {
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        self.features = self
            .features
            .load_file(weights.to_path_buf(), &recorder, device)
            .map_err(|e| {
                ClassifierError::Model(format!(
                    "failed to load backbone weights {:?}: {:?}",
                    weights, e
                ))
            })?
            .no_grad();
        Ok(self)
    }

    /// 出力層のユニット数
    pub fn num_classes(&self) -> usize {
        // Linear の重みは [d_input, d_output]
        self.output.weight.val().dims()[1]
    }

    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, H, W]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let x = self.features.forward(images);

        // Flatten
        let [_, c, h, w] = x.dims();
        let x = x.reshape([batch_size, c * h * w]);

        let x = self.hidden.forward(x);
        let x = self.activation.forward(x);
        let x = self.dropout.forward(x);

        self.output.forward(x)
    }

    /// クラスごとの確率 [batch_size, num_classes]（各行の和は 1）
    pub fn forward_probabilities(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    /// 順伝播と損失計算（学習用）
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::{Distribution, TensorData};
    use burn_ndarray::{NdArray, NdArrayDevice};

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_feature_dim() {
        let config = ModelConfig::for_input(4, ImageSize::new(224, 224));
        assert_eq!(config.feature_dim(), 512 * 7 * 7);
        let config = ModelConfig::for_input(4, ImageSize::new(64, 96));
        assert_eq!(config.feature_dim(), 512 * 2 * 3);
    }

    #[test]
    fn test_validate_rejects_small_input() {
        let config = ModelConfig::for_input(4, ImageSize::new(16, 224));
        assert!(matches!(config.validate(), Err(ClassifierError::Model(_))));
        let config = ModelConfig::for_input(0, ImageSize::new(224, 224));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_forward_shapes_and_softmax() {
        let device = NdArrayDevice::Cpu;
        let model = ModelConfig::for_input(4, ImageSize::new(32, 64))
            .init::<TestBackend>(&device)
            .unwrap();
        assert_eq!(model.num_classes(), 4);

        let images = Tensor::<TestBackend, 4>::random(
            [2, 3, 32, 64],
            Distribution::Uniform(0.0, 1.0),
            &device,
        );
        let probs = model.forward_probabilities(images);
        assert_eq!(probs.dims(), [2, 4]);

        let values: Vec<f32> = probs.into_data().convert::<f32>().to_vec().unwrap();
        for row in values.chunks(4) {
            assert!(row.iter().all(|p| (0.0..=1.0).contains(p)));
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_forward_classification_loss_is_finite() {
        let device = NdArrayDevice::Cpu;
        let model = ModelConfig::for_input(2, ImageSize::new(32, 32))
            .init::<TestBackend>(&device)
            .unwrap();
        let images = Tensor::<TestBackend, 4>::zeros([1, 3, 32, 32], &device);
        let targets = Tensor::<TestBackend, 1, Int>::from_data(TensorData::from([1i64]), &device);

        let output = model.forward_classification(images, targets);
        let loss: f32 = output.loss.into_data().convert::<f32>().to_vec().unwrap()[0];
        assert!(loss.is_finite());
    }
}
