pub mod interpret;
pub mod model;
pub mod preprocess;

pub use interpret::{ClassMap, ClassificationResult, interpret};
pub use model::{InferenceError, ModelHandle, ModelLoadError};
pub use preprocess::{DecodeError, normalize};
