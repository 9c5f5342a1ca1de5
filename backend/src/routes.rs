use actix_multipart::{Multipart, MultipartError};
use actix_web::{HttpResponse, web};
use futures::{StreamExt, TryStreamExt};
use log::{error, warn};
use shared::{HealthResponse, PredictionResponse};

use crate::config::Settings;
use crate::error::{PredictError, ServerError};
use crate::service::{InferenceService, RawUpload};

const IMAGE_FIELD: &str = "image";

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(health)))
        .service(web::resource("/predict").route(web::post().to(predict)));
}

async fn health(service: web::Data<InferenceService>, settings: web::Data<Settings>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".into(),
        service: settings.service_name.clone(),
        model_loaded: service.model_loaded(),
    })
}

async fn predict(
    service: web::Data<InferenceService>,
    payload: Multipart,
) -> Result<HttpResponse, PredictError> {
    let upload = match read_image_field(payload).await {
        Ok(upload) => upload,
        Err(e) => {
            warn!("Could not read multipart payload: {}", e);
            None
        }
    };

    let service = service.get_ref().clone();
    let outcome = web::block(move || service.classify(upload.as_ref()))
        .await
        .map_err(|e| {
            error!("Prediction task failed: {}", e);
            ServerError::Blocking(e.to_string())
        })?;

    let result = outcome?;
    Ok(HttpResponse::Ok().json(PredictionResponse::from(result)))
}

/// Drains the whole payload and keeps the first `image` file in memory.
///
/// A part without a `filename` parameter is a plain form value, not a file,
/// and is skipped like any other field.
async fn read_image_field(mut payload: Multipart) -> Result<Option<RawUpload>, MultipartError> {
    let mut upload = None;

    while let Some(mut field) = payload.try_next().await? {
        let filename = if upload.is_none() && field.name() == Some(IMAGE_FIELD) {
            field
                .content_disposition()
                .and_then(|cd| cd.get_filename())
                .map(str::to_owned)
        } else {
            None
        };

        let mut image_data = Vec::new();
        while let Some(chunk) = field.next().await {
            let data = chunk?;
            if filename.is_some() {
                image_data.extend_from_slice(&data);
            }
        }

        if let Some(filename) = filename {
            upload = Some(RawUpload::new(filename, image_data));
        }
    }

    Ok(upload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{ClassMap, ModelHandle};
    use crate::test_support::{FailingBackend, FixedBackend, leaf_png, padded_png, random_bytes};
    use actix_web::http::StatusCode;
    use actix_web::http::header::CONTENT_TYPE;
    use actix_web::{App, test};
    use serde_json::Value;
    use shared::Severity;

    const BOUNDARY: &str = "----rootly-test-boundary";

    fn multipart_body(field: &str, filename: &str, bytes: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n")
                .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn value_body(field: &str, value: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(format!("Content-Disposition: form-data; name=\"{field}\"\r\n\r\n").as_bytes());
        body.extend_from_slice(value);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn upload_request(field: &str, filename: &str, bytes: &[u8]) -> test::TestRequest {
        test::TestRequest::post()
            .uri("/predict")
            .insert_header((CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}")))
            .set_payload(multipart_body(field, filename, bytes))
    }

    fn ready_service(scores: Vec<f32>) -> InferenceService {
        let model = ModelHandle::from_backend(FixedBackend::new(scores)).unwrap();
        InferenceService::with_model(model, ClassMap::leaf_diseases())
    }

    macro_rules! app {
        ($service:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($service))
                    .app_data(web::Data::new(Settings::default()))
                    .configure(configure_routes),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_health_before_and_after_load() {
        let service = InferenceService::new(ClassMap::leaf_diseases());
        let app = app!(service.clone());

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: HealthResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body.status, "healthy");
        assert_eq!(body.service, "Rootly AI Plant Disease Detection");
        assert!(!body.model_loaded);

        let loaded = ready_service(vec![0.1; 10]);
        let app = app!(loaded);
        let req = test::TestRequest::get().uri("/health").to_request();
        let body: HealthResponse = test::call_and_read_body_json(&app, req).await;
        assert!(body.model_loaded);
    }

    #[actix_web::test]
    async fn test_health_after_failed_load() {
        let service = InferenceService::new(ClassMap::leaf_diseases());
        service.mark_failed("weights corrupted");
        let app = app!(service);

        let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: HealthResponse = test::read_body_json(resp).await;
        assert!(!body.model_loaded);
    }

    #[actix_web::test]
    async fn test_predict_success() {
        let app = app!(ready_service(vec![0.02, 0.01, 0.01, 0.01, 0.01, 0.03, 0.01, 0.01, 0.85, 0.04]));
        let resp = test::call_service(&app, upload_request("image", "leaf.jpg", &leaf_png(300, 120)).to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["diseaseName"], "Tomato Mosaic Virus Disease");
        assert_eq!(body["confidence"], 85.0);
        assert_eq!(body["severity"], "high");
    }

    #[actix_web::test]
    async fn test_predict_reference_scores() {
        let app = app!(ready_service(vec![0.1, 0.05, 0.05, 0.05, 0.05, 0.05, 0.05, 0.05, 0.05, 0.5]));
        let resp = test::call_service(&app, upload_request("image", "leaf.png", &leaf_png(64, 64)).to_request()).await;
        let body: PredictionResponse = test::read_body_json(resp).await;
        assert_eq!(body.confidence, 50.0);
        assert_eq!(body.severity, Severity::Low);
    }

    #[actix_web::test]
    async fn test_missing_image_field() {
        let app = app!(ready_service(vec![0.1; 10]));
        let resp = test::call_service(&app, upload_request("photo", "leaf.png", &leaf_png(8, 8)).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "No image file provided");
    }

    #[actix_web::test]
    async fn test_empty_filename() {
        let app = app!(ready_service(vec![0.1; 10]));
        let resp = test::call_service(&app, upload_request("image", "", &leaf_png(8, 8)).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "No image selected");
    }

    #[actix_web::test]
    async fn test_gif_is_rejected() {
        let app = app!(ready_service(vec![0.1; 10]));
        let resp = test::call_service(&app, upload_request("image", "leaf.gif", &leaf_png(8, 8)).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Invalid file type");
    }

    #[actix_web::test]
    async fn test_image_field_without_filename_is_not_a_file() {
        let app = app!(ready_service(vec![0.1; 10]));
        let req = test::TestRequest::post()
            .uri("/predict")
            .insert_header((CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}")))
            .set_payload(value_body("image", &leaf_png(8, 8)))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "No image file provided");
    }

    #[actix_web::test]
    async fn test_oversized_upload_is_rejected() {
        let app = app!(ready_service(vec![0.1; 10]));
        let bytes = padded_png(6 * 1024 * 1024);
        let resp = test::call_service(&app, upload_request("image", "leaf.png", &bytes).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "File too large. Max 5MB");
    }

    #[actix_web::test]
    async fn test_random_bytes_fail_processing() {
        let app = app!(ready_service(vec![0.1; 10]));
        let resp = test::call_service(&app, upload_request("image", "leaf.png", &random_bytes(10)).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Image processing failed");
    }

    #[actix_web::test]
    async fn test_inference_failure_is_generic_500() {
        let model = ModelHandle::from_backend(FailingBackend::new()).unwrap();
        let app = app!(InferenceService::with_model(model, ClassMap::leaf_diseases()));
        let resp = test::call_service(&app, upload_request("image", "leaf.png", &leaf_png(16, 16)).to_request()).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Internal server error");
    }

    #[actix_web::test]
    async fn test_nan_scores_are_a_server_error() {
        let mut scores = vec![0.1; 9];
        scores.push(f32::NAN);
        let app = app!(ready_service(scores));
        let resp = test::call_service(&app, upload_request("image", "leaf.png", &leaf_png(16, 16)).to_request()).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Internal server error");
        assert!(body.get("confidence").is_none());
    }

    #[actix_web::test]
    async fn test_predict_while_model_unavailable() {
        let app = app!(InferenceService::new(ClassMap::leaf_diseases()));
        let resp = test::call_service(&app, upload_request("image", "leaf.png", &leaf_png(16, 16)).to_request()).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
