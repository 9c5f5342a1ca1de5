mod config;
mod error;
mod inference;
mod routes;
mod service;
#[cfg(test)]
mod test_support;

use actix_cors::Cors;
use actix_web::{App, HttpServer, web};
use config::Settings;
use inference::ClassMap;
use routes::configure_routes;
use service::InferenceService;
use std::env;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    } else {
        log::error!("Failed to get the current working directory.");
    }

    let settings = Settings::load().map_err(|e| {
        log::error!("Invalid configuration: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;
    log::info!("Settings: {:?}", settings);

    let service = InferenceService::new(ClassMap::leaf_diseases());

    // Health answers with model_loaded=false until this finishes.
    let loader = service.clone();
    let model_path = settings.model_path.clone();
    actix_web::rt::spawn(async move {
        let task_loader = loader.clone();
        match web::block(move || task_loader.load_model(&model_path)).await {
            Ok(Ok(())) => log::info!("Model ready, accepting predictions"),
            Ok(Err(_)) => log::error!("Model not loaded. Predictions will fail until restart"),
            Err(e) => {
                log::error!("Model loading task aborted: {}", e);
                loader.mark_failed(e.to_string());
            }
        }
    });

    let bind_address = settings.bind_address();
    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(web::Data::new(service.clone()))
            .app_data(web::Data::new(settings.clone()))
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await
}
