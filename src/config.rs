use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde::Deserialize;
use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    /// `None` runs the engine on the in-memory store.
    pub database: Option<DatabaseConfig>,
    pub app: AppConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: Option<u32>,
    pub min_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub environment: Environment,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Host used in certificate verification URLs.
    pub public_host: String,
    /// Upper bound for aggregation and verification reads.
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let host = env::var("SERVER_HOST")
            .unwrap_or_else(|_| "0.0.0.0".to_string())
            .parse::<IpAddr>()
            .context("Failed to parse SERVER_HOST")?;

        let port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "8000".to_string())
            .parse::<u16>()
            .context("Failed to parse SERVER_PORT")?;

        let database = match env::var("DATABASE_URL") {
            Ok(url) => Some(DatabaseConfig {
                url,
                max_connections: Some(parse_or("DATABASE_MAX_CONNECTIONS", 10)?),
                min_connections: Some(parse_or("DATABASE_MIN_CONNECTIONS", 1)?),
            }),
            Err(_) => None,
        };

        let environment = env::var("APP_ENVIRONMENT")
            .unwrap_or_else(|_| "development".to_string())
            .parse::<Environment>()
            .map_err(anyhow::Error::msg)
            .context("Failed to parse APP_ENVIRONMENT")?;
        let name = env::var("APP_NAME").unwrap_or_else(|_| "Learning Engine".to_string());

        let public_host = env::var("PUBLIC_HOST").unwrap_or_else(|_| format!("localhost:{}", port));
        let request_timeout = Duration::from_secs(parse_or("REQUEST_TIMEOUT_SECS", 5)?);

        Ok(Config {
            server: ServerConfig { host, port },
            database,
            app: AppConfig { name, environment },
            engine: EngineConfig {
                public_host,
                request_timeout,
            },
        })
    }

    pub fn server_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server.host, self.server.port)
    }

    pub fn is_production(&self) -> bool {
        self.app.environment == Environment::Production
    }
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(val) => val
            .parse()
            .with_context(|| format!("Failed to parse {}", key)),
        Err(_) => Ok(default),
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: IpAddr::V4(Ipv4Addr::LOCALHOST),
                port: 8000,
            },
            database: None,
            app: AppConfig {
                name: "Learning Engine".to_string(),
                environment: Environment::Development,
            },
            engine: EngineConfig {
                public_host: "localhost:8000".to_string(),
                request_timeout: Duration::from_secs(5),
            },
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "production" => Ok(Environment::Production),
            "staging" => Ok(Environment::Staging),
            "development" => Ok(Environment::Development),
            _ => Err(format!("Unknown environment: {}", s)),
        }
    }
}

// Loaded once per process.
static CONFIG: OnceCell<Config> = OnceCell::new();

pub fn init() -> Result<&'static Config> {
    CONFIG.get_or_try_init(Config::from_env)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_environment_names() {
        assert_eq!("Production".parse::<Environment>(), Ok(Environment::Production));
        assert!("moon".parse::<Environment>().is_err());
    }

    #[test]
    fn default_config_runs_in_memory() {
        let config = Config::default();
        assert!(config.database.is_none());
        assert!(!config.is_production());
        assert_eq!(config.server_addr().port(), 8000);
    }
}
