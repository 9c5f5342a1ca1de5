use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use log::{error, info, warn};
use sha2::{Digest, Sha256};

use crate::error::{PredictError, ServerError, ValidationError};
use crate::inference::{ClassMap, ClassificationResult, ModelHandle, ModelLoadError, interpret, normalize};

pub const MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;
const ALLOWED_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// An uploaded file as received from the client.
#[derive(Debug, Clone)]
pub struct RawUpload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl RawUpload {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
        }
    }

    fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.bytes);
        hex::encode(hasher.finalize())
    }
}

/// Lifecycle of the one model this process serves.
#[derive(Clone)]
pub enum ModelState {
    Loading,
    Ready(ModelHandle),
    Failed(String),
}

/// Runs uploads through validation, normalization, inference and
/// interpretation. Cloning is cheap and every clone shares the model state.
#[derive(Clone)]
pub struct InferenceService {
    state: Arc<RwLock<ModelState>>,
    load_claimed: Arc<AtomicBool>,
    class_map: Arc<ClassMap>,
}

impl InferenceService {
    pub fn new(class_map: ClassMap) -> Self {
        Self {
            state: Arc::new(RwLock::new(ModelState::Loading)),
            load_claimed: Arc::new(AtomicBool::new(false)),
            class_map: Arc::new(class_map),
        }
    }

    pub fn with_model(model: ModelHandle, class_map: ClassMap) -> Self {
        let service = Self::new(class_map);
        service.load_claimed.store(true, Ordering::SeqCst);
        service.set_state(ModelState::Ready(model));
        service
    }

    pub fn model_loaded(&self) -> bool {
        matches!(self.state.read().as_deref(), Ok(ModelState::Ready(_)))
    }

    /// Loads the artifact and records the outcome.
    ///
    /// The first call claims the load; every later or concurrent call returns
    /// `AlreadyAttempted` without touching the artifact or the state.
    pub fn load_model(&self, path: &Path) -> Result<(), ModelLoadError> {
        if self.load_claimed.swap(true, Ordering::SeqCst) {
            warn!("Ignoring repeated model load request for {}", path.display());
            return Err(ModelLoadError::AlreadyAttempted);
        }

        match ModelHandle::load(path) {
            Ok(model) => {
                self.set_state(ModelState::Ready(model));
                info!(
                    "Model loaded successfully from {} ({} classes)",
                    path.display(),
                    self.class_map.len()
                );
                Ok(())
            }
            Err(e) => {
                error!("Error loading model from {}: {}", path.display(), e);
                self.set_state(ModelState::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    pub fn mark_failed(&self, reason: impl Into<String>) {
        self.set_state(ModelState::Failed(reason.into()));
    }

    fn set_state(&self, state: ModelState) {
        match self.state.write() {
            Ok(mut guard) => *guard = state,
            Err(poisoned) => *poisoned.into_inner() = state,
        }
    }

    fn model(&self) -> Result<ModelHandle, ServerError> {
        let state = self.state.read().map_err(|_| ServerError::Poisoned)?;
        match &*state {
            ModelState::Ready(model) => Ok(model.clone()),
            ModelState::Loading => Err(ServerError::ModelUnavailable("still loading".into())),
            ModelState::Failed(reason) => Err(ServerError::ModelUnavailable(reason.clone())),
        }
    }

    /// Classifies one upload and logs the outcome.
    pub fn classify(&self, upload: Option<&RawUpload>) -> Result<ClassificationResult, PredictError> {
        let outcome = self.run(upload);
        let name = upload.map(|u| u.filename.as_str()).unwrap_or("<none>");
        match &outcome {
            Ok(result) => info!(
                "Prediction: {} ({:.2}%) severity={} file={} sha256={}",
                result.label,
                result.confidence_percent,
                result.severity,
                name,
                upload.map(RawUpload::digest).unwrap_or_default()
            ),
            Err(PredictError::Server(e)) => {
                error!("Prediction error kind=server file={}: {}", name, e)
            }
            Err(e) => warn!("Prediction rejected kind={} file={}: {:?}", e.kind(), name, e),
        }
        outcome
    }

    fn run(&self, upload: Option<&RawUpload>) -> Result<ClassificationResult, PredictError> {
        let upload = validate(upload)?;
        let tensor = normalize(&upload.bytes)?;
        let model = self.model()?;
        let scores = model.infer(&tensor).map_err(ServerError::from)?;
        Ok(interpret(&scores, &self.class_map))
    }
}

fn validate(upload: Option<&RawUpload>) -> Result<&RawUpload, ValidationError> {
    let upload = upload.ok_or(ValidationError::Missing)?;
    if upload.filename.is_empty() || upload.bytes.is_empty() {
        return Err(ValidationError::EmptySelection);
    }
    if !has_allowed_extension(&upload.filename) {
        return Err(ValidationError::BadType);
    }
    if upload.bytes.len() > MAX_UPLOAD_BYTES {
        return Err(ValidationError::TooLarge);
    }
    Ok(upload)
}

fn has_allowed_extension(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .is_some_and(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
}
