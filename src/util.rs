use std::env;
use std::env::VarError;

pub const HOST: &str = "HOST";
pub const PORT: &str = "PORT";

pub const VAR_TOPIC: &str = "TOPIC";
pub const VAR_TEAM_ID: &str = "TEAM_ID";
pub const VAR_TOKEN_KEY_PATH: &str = "TOKEN_KEY_PATH";
pub const VAR_AUTH_KEY_ID: &str = "AUTH_KEY_ID";
pub const VAR_APNS_HOST_NAME: &str = "APNS_HOST_NAME";

pub const VAR_BROADCAST_INTERVAL_S: &str = "BROADCAST_INTERVAL_S";
pub const VAR_BROADCAST_CONCURRENCY: &str = "BROADCAST_CONCURRENCY";

pub fn check_environment_vars() -> Result<(), VarError> {
    env::var(VAR_TOPIC)?;
    env::var(VAR_TEAM_ID)?;
    env::var(VAR_TOKEN_KEY_PATH)?;
    env::var(VAR_AUTH_KEY_ID)?;
    env::var(VAR_APNS_HOST_NAME)?;
    Ok(())
}

pub fn env_u64(var: &str, default: u64) -> u64 {
    env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub fn init_logging() {
    if let Err(e) = log4rs::init_file(crate::LOG_CONFIG_PATH, Default::default()) {
        eprintln!(
            "Failed to initialize logging from {}: {}",
            crate::LOG_CONFIG_PATH,
            e
        );
    }
}

/// Push tokens are long and sensitive; log only the tail.
pub fn get_short_token(token: &str) -> &str {
    token
        .get(token.len().saturating_sub(8)..)
        .unwrap_or(token)
}
