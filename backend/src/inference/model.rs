use std::path::Path;
use std::sync::Arc;

use super::preprocess::{INPUT_SHAPE, NormalizedTensor};

/// Width of the classifier head; one probability per entry of the class map.
pub const NUM_CLASSES: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    #[error("model artifact not found at {0}")]
    NotFound(String),
    #[cfg(feature = "torch")]
    #[error("torch runtime error: {0}")]
    Torch(#[from] tch::TchError),
    #[error("model produced {actual} outputs, expected {expected}")]
    OutputWidth { expected: usize, actual: usize },
    #[error("model load was already attempted")]
    AlreadyAttempted,
    #[error("warm-up inference failed: {0}")]
    WarmUp(#[from] InferenceError),
    #[cfg(not(feature = "torch"))]
    #[error("no inference backend compiled in")]
    BackendUnavailable,
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("input tensor has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        expected: [usize; 4],
        actual: Vec<usize>,
    },
    #[error("model produced {actual} outputs, expected {expected}")]
    OutputWidth { expected: usize, actual: usize },
    #[error("model produced {value} at index {index}")]
    InvalidOutput { index: usize, value: f32 },
    #[error("model backend error: {0}")]
    Backend(String),
    #[error("model lock poisoned")]
    Poisoned,
}

/// Raw per-class scores as emitted by the network.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityVector(Vec<f32>);

impl ProbabilityVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }
}

/// A runtime able to execute a forward pass.
///
/// Implementations receive tensors that already passed the shape check and
/// must not mutate any state that changes later outputs.
pub trait Backend: Send + Sync {
    fn forward(&self, input: &NormalizedTensor) -> Result<Vec<f32>, InferenceError>;
}

/// Loaded classifier shared read-only by every request.
#[derive(Clone)]
pub struct ModelHandle {
    backend: Arc<dyn Backend>,
}

impl ModelHandle {
    /// Loads the TorchScript artifact at `path` and validates its head.
    #[cfg(feature = "torch")]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelLoadError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ModelLoadError::NotFound(path.display().to_string()));
        }
        let backend = torch::TorchBackend::load(path)?;
        Self::from_backend(backend)
    }

    #[cfg(not(feature = "torch"))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelLoadError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ModelLoadError::NotFound(path.display().to_string()));
        }
        Err(ModelLoadError::BackendUnavailable)
    }

    /// Wraps an already constructed backend, running one warm-up pass on an
    /// all-zero input to check the output width.
    pub fn from_backend(backend: impl Backend + 'static) -> Result<Self, ModelLoadError> {
        let handle = Self {
            backend: Arc::new(backend),
        };
        let output = handle.backend.forward(&NormalizedTensor::zeros())?;
        if output.len() != NUM_CLASSES {
            return Err(ModelLoadError::OutputWidth {
                expected: NUM_CLASSES,
                actual: output.len(),
            });
        }
        Ok(handle)
    }

    pub fn infer(&self, input: &NormalizedTensor) -> Result<ProbabilityVector, InferenceError> {
        if !input.has_input_shape() {
            return Err(InferenceError::ShapeMismatch {
                expected: INPUT_SHAPE,
                actual: input.shape().to_vec(),
            });
        }

        let output = self.backend.forward(input)?;
        if output.len() != NUM_CLASSES {
            return Err(InferenceError::OutputWidth {
                expected: NUM_CLASSES,
                actual: output.len(),
            });
        }
        if let Some((index, &value)) = output
            .iter()
            .enumerate()
            .find(|(_, v)| !v.is_finite() || **v < 0.0)
        {
            return Err(InferenceError::InvalidOutput { index, value });
        }
        Ok(ProbabilityVector::new(output))
    }
}

#[cfg(feature = "torch")]
mod torch {
    use std::path::Path;
    use std::sync::Mutex;

    use tch::{CModule, Device, Kind, Tensor};

    use super::{Backend, InferenceError};
    use crate::inference::preprocess::{INPUT_SHAPE, NormalizedTensor};

    /// TorchScript module. Forward passes are serialized through the mutex.
    pub struct TorchBackend {
        module: Mutex<CModule>,
        device: Device,
    }

    impl TorchBackend {
        pub fn load(path: &Path) -> Result<Self, tch::TchError> {
            let device = Device::cuda_if_available();
            let mut module = CModule::load_on_device(path, device)?;
            module.set_eval();
            log::info!("Loaded TorchScript module from {} on {:?}", path.display(), device);
            Ok(Self {
                module: Mutex::new(module),
                device,
            })
        }
    }

    impl Backend for TorchBackend {
        fn forward(&self, input: &NormalizedTensor) -> Result<Vec<f32>, InferenceError> {
            let shape: Vec<i64> = INPUT_SHAPE.iter().map(|&d| d as i64).collect();
            let tensor = Tensor::from_slice(&input.to_contiguous_vec())
                .view(shape.as_slice())
                .to_device(self.device);

            let output = {
                let module = self.module.lock().map_err(|_| InferenceError::Poisoned)?;
                tch::no_grad(|| module.forward_ts(&[tensor]))
            }
            .map_err(|e| InferenceError::Backend(e.to_string()))?;

            let output_flat = output.to_device(Device::Cpu).to_kind(Kind::Float).view([-1]);
            Vec::<f32>::try_from(&output_flat).map_err(|e| InferenceError::Backend(e.to_string()))
        }
    }
}
