use std::env;

/// Runtime settings for the engine binary.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub log_level: String,
    /// Recorded as the calculating/finalizing actor on every write.
    pub actor: String,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .ok_or(ConfigError::MissingDatabaseUrl)?;

        let max_connections = match env::var("TERM_REPORTING_MAX_CONNECTIONS") {
            Ok(value) => value
                .trim()
                .parse::<u32>()
                .map_err(|_| ConfigError::InvalidMaxConnections(value))?,
            Err(_) => 5,
        };

        let log_level =
            env::var("TERM_REPORTING_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let actor = env::var("TERM_REPORTING_ACTOR").unwrap_or_else(|_| "system".to_string());

        Ok(Self {
            database_url,
            max_connections,
            log_level,
            actor,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DATABASE_URL must be set to a production Postgres instance")]
    MissingDatabaseUrl,
    #[error("TERM_REPORTING_MAX_CONNECTIONS must be a valid u32, got '{0}'")]
    InvalidMaxConnections(String),
}
