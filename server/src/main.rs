use actix_web::{web, App, HttpServer};
use clap::Parser;

use canvas_server::config::Config;
use canvas_server::connection::{audio_ws_index, drawing_ws_index, AppState};
use canvas_server::relay::spawn_relay;
use canvas_server::server::spawn_server;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init();

    let config = Config::parse();

    let state = web::Data::new(AppState {
        drawing_tx: spawn_server(),
        audio_tx: spawn_relay(),
        limits: config.outbound_limits(),
        max_frame_size: config.max_frame_bytes,
    });

    log::info!("Listening on {}:{}", config.host, config.port);

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .route("/ws/drawing/", web::get().to(drawing_ws_index))
            .route("/ws/audio/", web::get().to(audio_ws_index))
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await
}
