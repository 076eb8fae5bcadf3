//! 学習済みモデルによる推論

use burn::{
    backend::Wgpu,
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, Tensor},
};
use burn_ndarray::{NdArray, NdArrayDevice};
use burn_wgpu::WgpuDevice;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::dataset::ClassIndexMap;
use crate::error::{ClassifierError, Result};
use crate::inference::Classifier;
use crate::ml::{ModelConfig, NailClassifier};
use crate::model::{load_model_with_metadata, DeviceType, InferenceConfig};
use crate::types::{ImageSize, ImageTensor, CHANNELS};

/// burn モデルを [`Classifier`] として使う
pub struct BurnClassifier<B: Backend> {
    model: Mutex<NailClassifier<B>>,
    config: InferenceConfig,
    device: B::Device,
}

impl<B: Backend> BurnClassifier<B> {
    /// 成果物（tar.gz）からモデルを復元
    ///
    /// 出力層の次元とラベル数が一致しない成果物は読み込まない。
    pub fn load(model_path: &Path, device: B::Device) -> Result<Self> {
        let (metadata, model_binary) = load_model_with_metadata(model_path)?;
        let config = InferenceConfig::from_metadata(&metadata);

        // 推論時はドロップアウトなし
        let model_config = ModelConfig::for_input(config.num_classes(), config.input_size)
            .with_hidden_units(config.hidden_units)
            .with_dropout(0.0);
        let model = model_config.init::<B>(&device)?;

        let record = BinBytesRecorder::<FullPrecisionSettings>::default()
            .load(model_binary, &device)
            .map_err(|e| ClassifierError::Model(format!("failed to load model weights: {:?}", e)))?;
        let model = model.load_record(record);

        if model.num_classes() != config.num_classes() {
            return Err(ClassifierError::LabelCardinality {
                outputs: model.num_classes(),
                labels: config.num_classes(),
            });
        }

        config.log_info();
        info!(path = %model_path.display(), "モデルを読み込みました");

        Ok(Self {
            model: Mutex::new(model),
            config,
            device,
        })
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }
}

impl<B: Backend> Classifier for BurnClassifier<B> {
    fn input_size(&self) -> ImageSize {
        self.config.input_size
    }

    fn labels(&self) -> &ClassIndexMap {
        &self.config.labels
    }

    fn probabilities(&self, tensor: &ImageTensor) -> Result<Vec<f32>> {
        if tensor.size() != self.config.input_size {
            return Err(ClassifierError::InvalidArgument(format!(
                "expected {} input, got {}",
                self.config.input_size,
                tensor.size()
            )));
        }
        let ImageSize { height, width } = tensor.size();
        let input = Tensor::<B, 1>::from_floats(tensor.as_slice(), &self.device).reshape([
            1,
            CHANNELS,
            height as usize,
            width as usize,
        ]);

        let output = {
            let model = self
                .model
                .lock()
                .map_err(|_| ClassifierError::Model("model lock poisoned".to_string()))?;
            model.forward_probabilities(input)
        };

        output
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| ClassifierError::Model(format!("failed to read model output: {:?}", e)))
    }
}

/// 設定されたデバイスでモデルを読み込む
pub fn load_classifier(model_path: &Path, device_type: DeviceType) -> Result<Arc<dyn Classifier>> {
    info!(device = %device_type, path = %model_path.display(), "モデルを読み込みます");
    let classifier: Arc<dyn Classifier> = match device_type {
        DeviceType::Wgpu => Arc::new(BurnClassifier::<Wgpu>::load(model_path, WgpuDevice::default())?),
        DeviceType::Cpu => Arc::new(BurnClassifier::<NdArray>::load(model_path, NdArrayDevice::Cpu)?),
    };
    Ok(classifier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::training::model_to_bytes;
    use crate::model::{save_model_with_metadata, ModelMetadata};
    use crate::preprocess;
    use image::{Rgb, RgbImage};
    use tempfile::tempdir;

    type TestBackend = NdArray<f32>;

    fn write_artifact(dir: &Path, labels: ClassIndexMap, outputs: usize) -> std::path::PathBuf {
        let size = ImageSize::new(32, 32);
        let model = ModelConfig::for_input(outputs, size)
            .with_hidden_units(8)
            .init::<TestBackend>(&NdArrayDevice::Cpu)
            .unwrap();
        let metadata = ModelMetadata::new(labels, size, 8, 0.5, 1, 1, 0.5);
        save_model_with_metadata(&dir.join("model"), &metadata, &model_to_bytes(&model).unwrap())
            .unwrap()
    }

    #[test]
    fn test_load_and_predict_probabilities() {
        let dir = tempdir().unwrap();
        let path = write_artifact(dir.path(), ClassIndexMap::default_labels(), 4);
        let classifier = BurnClassifier::<TestBackend>::load(&path, NdArrayDevice::Cpu).unwrap();
        assert_eq!(classifier.input_size(), ImageSize::new(32, 32));
        assert_eq!(classifier.config().hidden_units, 8);

        let image = dir.path().join("x.png");
        RgbImage::from_pixel(60, 40, Rgb([200, 100, 50])).save(&image).unwrap();
        let tensor = preprocess::load_tensor(&image, classifier.input_size()).unwrap();

        let probs = classifier.probabilities(&tensor).unwrap();
        assert_eq!(probs.len(), 4);
        assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_label_count_mismatch_fails_at_load() {
        let dir = tempdir().unwrap();
        let labels = ClassIndexMap::new(vec!["a".to_string(), "b".to_string()]).unwrap();
        let path = write_artifact(dir.path(), labels, 3);

        // 出力 3 に対してラベル 2 だと record の形が合わない、またはカーディナリティ検査で落ちる
        assert!(BurnClassifier::<TestBackend>::load(&path, NdArrayDevice::Cpu).is_err());
    }

    #[test]
    fn test_missing_model_is_error() {
        let dir = tempdir().unwrap();
        assert!(load_classifier(&dir.path().join("none.tar.gz"), DeviceType::Cpu).is_err());
    }
}
