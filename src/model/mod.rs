pub mod config;
pub mod labels;
pub mod model_metadata;
pub mod model_storage;

pub use config::{AppConfig, DeviceType, HistoryMode, HistorySettings, InferenceSettings, ModelSettings};
pub use labels::LabelTable;
pub use model_metadata::ModelMetadata;
pub use model_storage::{load_metadata, load_model_with_metadata, save_model_with_metadata};
