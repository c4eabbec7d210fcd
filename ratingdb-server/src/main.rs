use actix_web::{web, App, HttpServer};
use ratingdb::Store;

mod handlers;

/// Shared application state
pub struct AppState {
    pub store: Store,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init();
    log::info!("Starting RatingDB server");

    let data_dir = std::env::var("RATINGDB_DATA_DIR").unwrap_or_else(|_| "data".to_string());
    let host = std::env::var("RATINGDB_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = std::env::var("RATINGDB_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    log::info!("Opening store at: {data_dir}");
    let store = Store::open(&data_dir).expect("Failed to open RatingDB store");

    let state = web::Data::new(AppState { store });

    log::info!("Listening on {host}:{port}");
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(handlers::configure)
    })
    .bind((host.as_str(), port))?
    .run()
    .await
}
