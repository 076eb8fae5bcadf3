pub mod ml_model;
pub mod stopping;
pub mod training;
pub mod inference;

pub use ml_model::{ModelConfig, NailClassifier, Vgg16Features};
pub use training::{train_model, ImageBatcher, ImageFolderDataset, ImageItem, TrainRequest, TrainingSummary};
pub use inference::{load_classifier, BurnClassifier};
