//! Application configuration management.
//!
//! This module handles loading configuration from environment variables.
//! It uses the `envy` crate to deserialize environment variables into a type-safe struct.

use serde::Deserialize;

use crate::models::api_key::ClientSource;

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (optional): PostgreSQL connection string; keys are kept in memory without it
/// - `SERVER_PORT` (optional): HTTP server port, defaults to 3000
/// - `ADMIN_USER` / `ADMIN_PASSWORD` (optional): credentials for `/jarvis`; the admin routes
///   reject every request unless both are set
/// - `DELIVERY_URL` / `DELIVERY_SECRET` (optional): endpoint receiving delivered links; links
///   are only logged without it
/// - `DELIVERY_WORKERS` (optional): worker count, defaults to 4
/// - `DELIVERY_QUEUE_CAPACITY` (optional): pending task slots, defaults to 1024
/// - `TRUSTED_SOURCES` (optional): comma separated sources that skip email confirmation,
///   defaults to `ios,android`
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default)]
    pub admin_user: Option<String>,

    #[serde(default)]
    pub admin_password: Option<String>,

    #[serde(default)]
    pub delivery_url: Option<String>,

    #[serde(default)]
    pub delivery_secret: Option<String>,

    #[serde(default = "default_workers")]
    pub delivery_workers: usize,

    #[serde(default = "default_queue_capacity")]
    pub delivery_queue_capacity: usize,

    #[serde(default = "default_trusted_sources")]
    pub trusted_sources: Vec<ClientSource>,
}

/// Default port if SERVER_PORT environment variable is not set.
fn default_port() -> u16 {
    3000
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_trusted_sources() -> Vec<ClientSource> {
    vec![ClientSource::Ios, ClientSource::Android]
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// This method first attempts to load a `.env` file (which is optional),
    /// then reads environment variables and deserializes them into a Config struct.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed into its expected type
    /// (e.g. an unknown source in `TRUSTED_SOURCES`).
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();

        envy::from_env::<Config>()
    }

    /// Admin credentials, when both halves are configured.
    pub fn admin_credentials(&self) -> Option<AdminCredentials> {
        match (&self.admin_user, &self.admin_password) {
            (Some(user), Some(password)) if !user.is_empty() && !password.is_empty() => {
                Some(AdminCredentials {
                    user: user.clone(),
                    password: password.clone(),
                })
            }
            _ => None,
        }
    }
}

/// Username and password guarding the admin routes.
#[derive(Clone)]
pub struct AdminCredentials {
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for AdminCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminCredentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}
