//! Configuration loading and representation.
//!
//! Sources, later ones winning: built-in defaults, an optional `docket.toml`
//! next to the binary, then `DOCKET__*` environment variables (a `.env` file
//! is loaded first when present). Nested keys use `__`, e.g.
//! `DOCKET__DATABASE__URL`.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

pub use docket_observability::LogFormat;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default)]
    pub log: LogSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// Postgres URL. When absent the in-memory backend is used.
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_bind")]
    pub bind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthSettings {
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogSettings {
    #[serde(default)]
    pub format: LogFormat,
}

fn default_max_connections() -> u32 {
    5
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

/// Signing secret used when none is configured. Only fit for local
/// development.
pub const DEV_JWT_SECRET: &str = "dev-secret";

fn default_jwt_secret() -> String {
    DEV_JWT_SECRET.to_string()
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

impl AuthSettings {
    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Config::builder()
            .add_source(File::with_name("docket").required(false))
            .add_source(Environment::with_prefix("DOCKET").prefix_separator("__").separator("__"))
            .build()?
            .try_deserialize::<Self>()
            .and_then(|settings| settings.validate().map(|()| settings))
    }

    /// Refuse the development signing secret once a real database is
    /// configured.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.is_some() && self.auth.uses_dev_secret() {
            return Err(ConfigError::Message(
                "auth.jwt_secret must be set when database.url is configured".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use config::FileFormat;

    use super::*;

    fn from_toml(raw: &str) -> Settings {
        Config::builder()
            .add_source(File::from_str(raw, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn empty_source_yields_defaults() {
        let settings = from_toml("");
        assert_eq!(settings.database.url, None);
        assert_eq!(settings.database.max_connections, 5);
        assert_eq!(settings.http.bind, "0.0.0.0:8080");
        assert_eq!(settings.log.format, LogFormat::Json);
    }

    #[test]
    fn nested_keys_override_defaults() {
        let settings = from_toml(
            r#"
            [database]
            url = "postgres://localhost/docket"
            max_connections = 12

            [log]
            format = "pretty"
            "#,
        );
        assert_eq!(settings.database.url.as_deref(), Some("postgres://localhost/docket"));
        assert_eq!(settings.database.max_connections, 12);
        assert_eq!(settings.log.format, LogFormat::Pretty);
        assert_eq!(settings.auth.jwt_secret, "dev-secret");
    }

    #[test]
    fn dev_secret_is_refused_with_a_database() {
        let in_memory = from_toml("");
        assert!(in_memory.auth.uses_dev_secret());
        assert!(in_memory.validate().is_ok());

        let exposed = from_toml("[database]\nurl = \"postgres://localhost/docket\"\n");
        assert!(matches!(exposed.validate(), Err(ConfigError::Message(_))));

        let configured = from_toml(
            "[database]\nurl = \"postgres://localhost/docket\"\n[auth]\njwt_secret = \"s3cr3t\"\n",
        );
        assert!(configured.validate().is_ok());
    }
}
