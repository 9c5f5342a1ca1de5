use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use shared::ErrorResponse;

use crate::inference::{DecodeError, InferenceError};

/// Client mistakes caught before any decoding happens.
///
/// `Missing` and `EmptySelection` are both the "missing upload" case; they
/// only differ in the message sent back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("No image file provided")]
    Missing,
    #[error("No image selected")]
    EmptySelection,
    #[error("Invalid file type")]
    BadType,
    #[error("File too large. Max 5MB")]
    TooLarge,
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("model is not available: {0}")]
    ModelUnavailable(String),
    #[error("inference failed: {0}")]
    Inference(#[from] InferenceError),
    #[error("model state lock poisoned")]
    Poisoned,
    #[error("blocking task failed: {0}")]
    Blocking(String),
}

/// Everything `/predict` can fail with. The `Display` text is what the
/// client sees, so server failures never expose their cause.
#[derive(Debug, thiserror::Error)]
pub enum PredictError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Image processing failed")]
    Processing(#[from] DecodeError),
    #[error("Internal server error")]
    Server(#[from] ServerError),
}

impl PredictError {
    pub fn kind(&self) -> &'static str {
        match self {
            PredictError::Validation(ValidationError::Missing)
            | PredictError::Validation(ValidationError::EmptySelection) => "missing",
            PredictError::Validation(ValidationError::BadType) => "badType",
            PredictError::Validation(ValidationError::TooLarge) => "tooLarge",
            PredictError::Processing(_) => "processing",
            PredictError::Server(_) => "server",
        }
    }
}

impl ResponseError for PredictError {
    fn status_code(&self) -> StatusCode {
        match self {
            PredictError::Validation(_) | PredictError::Processing(_) => StatusCode::BAD_REQUEST,
            PredictError::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.to_string(),
        })
    }
}
