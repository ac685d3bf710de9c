pub mod ml_model;
pub mod runtime;
#[cfg(feature = "ml")]
pub mod inference;

pub use ml_model::decode_and_normalize;
#[cfg(feature = "ml")]
pub use ml_model::{ModelConfig, SignClassifier};
#[cfg(feature = "ml")]
pub use inference::{load_backend, BurnClassifier};
pub use runtime::{ClassifierBackend, ModelRuntime, RuntimeState};
