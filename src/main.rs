// A small service relaying live train status to iOS Live Activities
// through APNs. Devices register a push token per journey; the latest
// train state is stored in memory, refreshed from the railway provider
// and broadcast to every registered device on a fixed interval.
mod apns;
mod authtoken;
mod broadcast;
mod models;
mod providers;
mod registry;
mod routes;
mod util;

use actix_web::{
    error,
    web::{self, Data},
    App, HttpResponse, HttpServer,
};
use dotenv::dotenv;
use log::{error as log_error, info};
use std::{env, process::exit, sync::Arc};
use tokio::{sync::RwLock, time::Duration};

use apns::ApnsClient;
use authtoken::{AuthToken, AuthTokenError};
use broadcast::BroadcastSettings;
use providers::RailClient;
use registry::Registry;
use routes::{end_train_activity, health, register_activity, update_train_activity};
use util::{
    HOST, PORT, VAR_APNS_HOST_NAME, VAR_AUTH_KEY_ID, VAR_BROADCAST_CONCURRENCY,
    VAR_BROADCAST_INTERVAL_S, VAR_TEAM_ID, VAR_TOKEN_KEY_PATH, VAR_TOPIC,
};

pub const LOG_CONFIG_PATH: &str = "log4rs.yaml";

const AUTH_TOKEN_REFRESH_RATE_S: u64 = 60 * 50; // Needs refresh between 20-60 minutes

const DEFAULT_BROADCAST_INTERVAL_S: u64 = 10;
const DEFAULT_BROADCAST_CONCURRENCY: u64 = 8;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    if util::check_environment_vars().is_err() {
        eprintln!("Missing environment variable");
        eprintln!("Required environment variables: {VAR_TOPIC} {VAR_TEAM_ID} {VAR_AUTH_KEY_ID} {VAR_TOKEN_KEY_PATH} {VAR_APNS_HOST_NAME}");
        exit(1)
    }
    util::init_logging();

    // vars checked above
    let auth_token = AuthToken::new(
        env::var(VAR_TEAM_ID).unwrap(),
        env::var(VAR_AUTH_KEY_ID).unwrap(),
        env::var(VAR_TOKEN_KEY_PATH).unwrap(),
    );
    let auth_token = match auth_token {
        Ok(token) => Arc::new(RwLock::new(token)),
        Err(e) => {
            eprintln!("Failed to generate authentication token {:?}", e);
            if let AuthTokenError::IO(_) = e {
                eprintln!("Failed to read token key path. If using Docker, ensure the private key is made available to a mounted volume.")
            }
            exit(1)
        }
    };
    let auth_data = Data::new(auth_token.clone());
    info!("Initial auth token: {}", &auth_token.read().await.token);

    let registry = Arc::new(RwLock::new(Registry::new()));
    let registry_data = Data::new(registry.clone());

    let apns = ApnsClient::new(
        env::var(VAR_APNS_HOST_NAME).unwrap(),
        env::var(VAR_TOPIC).unwrap(),
    );
    let apns = match apns {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Failed to build APNs client: {e}");
            exit(1)
        }
    };
    let apns_data = Data::new(apns.clone());

    let rail = match RailClient::new() {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Failed to build railway provider client: {e}");
            exit(1)
        }
    };

    let settings = BroadcastSettings {
        interval: Duration::from_secs(util::env_u64(
            VAR_BROADCAST_INTERVAL_S,
            DEFAULT_BROADCAST_INTERVAL_S,
        )),
        concurrency: util::env_u64(VAR_BROADCAST_CONCURRENCY, DEFAULT_BROADCAST_CONCURRENCY)
            as usize,
    };
    let broadcast_handle = tokio::spawn(broadcast::run_broadcast_loop(
        Arc::clone(&registry),
        Arc::clone(&auth_token),
        apns,
        rail,
        settings,
    ));
    let refresh_loop_handle = tokio::spawn(auth_token_refresh_loop(Arc::clone(&auth_token)));

    let host = env::var(HOST).unwrap_or(String::from("0.0.0.0"));
    let port = env::var(PORT).unwrap_or(String::from("8000"));

    let server_handle = HttpServer::new(move || {
        let json_cfg = web::JsonConfig::default().error_handler(|err, _req| {
            log_error!("Json config error: {}", err);
            error::InternalError::from_response(err, HttpResponse::BadRequest().into()).into()
        });
        App::new()
            .app_data(Data::clone(&auth_data))
            .app_data(Data::clone(&registry_data))
            .app_data(Data::clone(&apns_data))
            .app_data(json_cfg)
            .service(register_activity)
            .service(update_train_activity)
            .service(end_train_activity)
            .service(health)
    })
    .bind(format!("{}:{}", host, port))?
    .run();

    tokio::select! {
        _ = server_handle => {}
        _ = broadcast_handle => {}
        _ = refresh_loop_handle => {}
    }
    Ok(())
}

async fn auth_token_refresh_loop(auth_token: Arc<RwLock<AuthToken>>) {
    loop {
        tokio::time::sleep(Duration::from_secs(AUTH_TOKEN_REFRESH_RATE_S)).await;
        let result = auth_token.write().await.refresh();
        match result {
            Ok(_) => info!("AuthToken refreshed successfully"),
            Err(e) => log_error!("AuthToken refresh error {:?}", e),
        }
    }
}
