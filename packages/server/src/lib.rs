#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web API server for the crime API.
//!
//! Serves read-only JSON endpoints over a MongoDB collection of geocoded
//! crime records: distinct-value lookups for the filter controls, and
//! `/crimes`, which sanitises its query string, builds an aggregation
//! pipeline, and returns whatever the pipeline produces.

mod handlers;
pub mod interactive;

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use crime_api_database::{CrimeStore, db};

/// Shared application state.
pub struct AppState {
    /// Crime record storage, shared by every request.
    pub store: Arc<dyn CrimeStore>,
}

/// Registers every API route.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(handlers::health))
        .route("/all-crime-types", web::get().to(handlers::all_crime_types))
        .route("/all-dates", web::get().to(handlers::all_dates))
        .route("/all-year-months", web::get().to(handlers::all_year_months))
        .route(
            "/all-falls-within-location",
            web::get().to(handlers::all_falls_within_location),
        )
        .route("/crimes", web::get().to(handlers::crimes));
}

/// Starts the crime API server.
///
/// Connects to MongoDB (see [`db::MongoConfig::from_env`]) and serves the
/// API on `BIND_ADDR:PORT`. This is a regular async function; the caller
/// provides the runtime (e.g. via `#[actix_web::main]`).
///
/// # Errors
///
/// Returns an `std::io::Result` error if the database is unreachable, or if
/// the HTTP server fails to bind or encounters a runtime error.
#[allow(clippy::future_not_send)]
pub async fn run_server() -> std::io::Result<()> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    log::info!("Connecting to MongoDB...");
    let store = db::connect_from_env().await.map_err(std::io::Error::other)?;

    let state = web::Data::new(AppState {
        store: Arc::new(store),
    });

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    log::info!("Starting server on {bind_addr}:{port}");

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(configure)
    })
    .bind((bind_addr, port))?
    .run()
    .await
}
