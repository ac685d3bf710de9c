pub mod engine;
pub mod preprocess;
pub mod ranking;

pub use engine::{Classified, PredictOutcome, PredictionEngine};
pub use preprocess::{preprocess, to_rgb, DEFAULT_JPEG_QUALITY};
pub use ranking::{ranked_indices, top_k, DEFAULT_TOP_K};
