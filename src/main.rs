use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use dotenv::dotenv;
use std::sync::Arc;

mod collaborators;
mod config;
mod controllers;
mod db;
mod errors;
mod models;
mod platforms;
mod services;

use collaborators::{DbDonationLedger, DbExperienceLedger, DbRankLedger, DbStreamerDirectory};
use config::Config;
use db::Database;
use platforms::twitch::TwitchModerationClient;
use platforms::youtube::YoutubeModerationClient;
use platforms::ModerationClients;
use services::{LinkService, Reconciler};

pub struct AppState {
    pub db: Arc<Database>,
    pub config: Config,
    pub link_service: Arc<LinkService>,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = Config::from_env();
    let port = config.port;

    log::info!("Initializing database at {}", config.database_url);
    let db = Database::new(&config.database_url).expect("Failed to initialize database");
    let db = Arc::new(db);

    log::info!("Initializing moderation clients");
    let moderation = Arc::new(
        ModerationClients::new()
            .register(Arc::new(YoutubeModerationClient::new(
                &config.youtube_moderation_url,
            )))
            .register(Arc::new(TwitchModerationClient::new(
                &config.twitch_moderation_url,
            ))),
    );

    log::info!("Initializing link orchestrator");
    let link_service = Arc::new(LinkService::new(
        db.clone(),
        Arc::new(DbExperienceLedger::new(db.clone())),
        Arc::new(DbDonationLedger::new(db.clone())),
        Arc::new(DbRankLedger::new(db.clone())),
        Arc::new(DbStreamerDirectory::new(db.clone())),
        Arc::new(Reconciler::new(moderation)),
        config.max_linked_channels,
    ));

    log::info!("Starting chatlink server on port {}", port);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(AppState {
                db: Arc::clone(&db),
                config: config.clone(),
                link_service: Arc::clone(&link_service),
            }))
            .wrap(Logger::default())
            .wrap(cors)
            .configure(controllers::health::config)
            .configure(controllers::link::config)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
