use std::{
    env,
    fmt::{self, Display},
    fs::read_to_string,
    str::FromStr,
};

use tracing::{info, warn};

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub database_max_connections: u32,
    pub redis_url: Option<String>,
    pub meili_url: Option<String>,
    pub meili_key: Option<String>,
    pub payment_key_secret: Option<String>,
    pub otp_ttl_secs: u64,
    pub otp_max_attempts: u32,
    pub expose_otp: bool,
    pub cors_origin: String,
}

impl Config {
    pub fn load() -> Self {
        Self {
            port: try_load("RUST_PORT", "4000"),
            database_url: try_load("DATABASE_URL", "sqlite://nyaynow.db?mode=rwc"),
            database_max_connections: try_load("DATABASE_MAX_CONNECTIONS", "8"),
            redis_url: optional("REDIS_URL"),
            meili_url: optional("MEILI_URL"),
            meili_key: read_secret("MEILI_ADMIN_KEY"),
            payment_key_secret: read_secret("PAYMENT_KEY_SECRET"),
            otp_ttl_secs: try_load("OTP_TTL_SECS", "300"),
            otp_max_attempts: try_load("OTP_MAX_ATTEMPTS", "5"),
            expose_otp: try_load("EXPOSE_OTP", "false"),
            cors_origin: try_load("CORS_ORIGIN", "http://localhost:5173"),
        }
    }
}

/// Secrets print as `Some("<redacted>")`.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted = |secret: &Option<String>| secret.as_ref().map(|_| "<redacted>");

        f.debug_struct("Config")
            .field("port", &self.port)
            .field("database_url", &self.database_url)
            .field("database_max_connections", &self.database_max_connections)
            .field("redis_url", &self.redis_url)
            .field("meili_url", &self.meili_url)
            .field("meili_key", &redacted(&self.meili_key))
            .field("payment_key_secret", &redacted(&self.payment_key_secret))
            .field("otp_ttl_secs", &self.otp_ttl_secs)
            .field("otp_max_attempts", &self.otp_max_attempts)
            .field("expose_otp", &self.expose_otp)
            .field("cors_origin", &self.cors_origin)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 4000,
            database_url: "sqlite::memory:".to_string(),
            database_max_connections: 1,
            redis_url: None,
            meili_url: None,
            meili_key: None,
            payment_key_secret: None,
            otp_ttl_secs: 300,
            otp_max_attempts: 5,
            expose_otp: false,
            cors_origin: "http://localhost:5173".to_string(),
        }
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        warn!("Environment variable {key} not found, using default");
    })
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|_| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
        })
        .expect("Environment misconfigured!")
}

fn optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        _ => {
            info!("{key} not set, feature disabled");
            None
        }
    }
}

/// Docker secret first, then the plain environment.
fn read_secret(secret_name: &str) -> Option<String> {
    let path = format!("/run/secrets/{secret_name}");

    match read_to_string(&path) {
        Ok(s) => Some(s.trim().to_string()),
        Err(e) => {
            warn!("Failed to read {secret_name} from file: {e}");
            optional(secret_name)
        }
    }
}
