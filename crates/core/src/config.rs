use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub portal: PortalConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

/// Remote CRM portal settings: the OAuth application credentials issued by
/// the platform vendor, the token endpoint, and the base URL the portal
/// uses to call back into this server (connector/placement handlers).
#[derive(Clone, Debug)]
pub struct PortalConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
    pub oauth_token_url: String,
    pub callback_base_url: Option<String>,
    pub linking_token_ttl_minutes: u64,
    pub http_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub portal_client_id: Option<String>,
    pub portal_client_secret: Option<String>,
    pub portal_oauth_token_url: Option<String>,
    pub portal_callback_base_url: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://chatlink.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            portal: PortalConfig {
                client_id: None,
                client_secret: None,
                oauth_token_url: "https://oauth.bitrix.info/oauth/token/".to_string(),
                callback_base_url: None,
                linking_token_ttl_minutes: 30,
                http_timeout_secs: 30,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    portal: Option<PortalPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PortalPatch {
    client_id: Option<String>,
    client_secret: Option<String>,
    oauth_token_url: Option<String>,
    callback_base_url: Option<String>,
    linking_token_ttl_minutes: Option<u64>,
    http_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("chatlink.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(portal) = patch.portal {
            if let Some(client_id) = portal.client_id {
                self.portal.client_id = Some(client_id);
            }
            if let Some(client_secret) = portal.client_secret {
                self.portal.client_secret = Some(secret_value(client_secret));
            }
            if let Some(oauth_token_url) = portal.oauth_token_url {
                self.portal.oauth_token_url = oauth_token_url;
            }
            if let Some(callback_base_url) = portal.callback_base_url {
                self.portal.callback_base_url = Some(callback_base_url);
            }
            if let Some(linking_token_ttl_minutes) = portal.linking_token_ttl_minutes {
                self.portal.linking_token_ttl_minutes = linking_token_ttl_minutes;
            }
            if let Some(http_timeout_secs) = portal.http_timeout_secs {
                self.portal.http_timeout_secs = http_timeout_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("CHATLINK_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("CHATLINK_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("CHATLINK_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("CHATLINK_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("CHATLINK_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CHATLINK_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("CHATLINK_SERVER_PORT") {
            self.server.port = parse_u16("CHATLINK_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("CHATLINK_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("CHATLINK_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("CHATLINK_PORTAL_CLIENT_ID") {
            self.portal.client_id = Some(value);
        }
        if let Some(value) = read_env("CHATLINK_PORTAL_CLIENT_SECRET") {
            self.portal.client_secret = Some(secret_value(value));
        }
        if let Some(value) = read_env("CHATLINK_PORTAL_OAUTH_TOKEN_URL") {
            self.portal.oauth_token_url = value;
        }
        if let Some(value) = read_env("CHATLINK_PORTAL_CALLBACK_BASE_URL") {
            self.portal.callback_base_url = Some(value);
        }
        if let Some(value) = read_env("CHATLINK_PORTAL_LINKING_TOKEN_TTL_MINUTES") {
            self.portal.linking_token_ttl_minutes =
                parse_u64("CHATLINK_PORTAL_LINKING_TOKEN_TTL_MINUTES", &value)?;
        }
        if let Some(value) = read_env("CHATLINK_PORTAL_HTTP_TIMEOUT_SECS") {
            self.portal.http_timeout_secs =
                parse_u64("CHATLINK_PORTAL_HTTP_TIMEOUT_SECS", &value)?;
        }

        let log_level =
            read_env("CHATLINK_LOGGING_LEVEL").or_else(|| read_env("CHATLINK_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CHATLINK_LOGGING_FORMAT").or_else(|| read_env("CHATLINK_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(client_id) = overrides.portal_client_id {
            self.portal.client_id = Some(client_id);
        }
        if let Some(client_secret) = overrides.portal_client_secret {
            self.portal.client_secret = Some(secret_value(client_secret));
        }
        if let Some(oauth_token_url) = overrides.portal_oauth_token_url {
            self.portal.oauth_token_url = oauth_token_url;
        }
        if let Some(callback_base_url) = overrides.portal_callback_base_url {
            self.portal.callback_base_url = Some(callback_base_url);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_portal(&self.portal)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("chatlink.toml"), PathBuf::from("config/chatlink.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.bind_address.trim().is_empty() {
        return Err(ConfigError::Validation("server.bind_address must not be empty".to_string()));
    }
    if server.graceful_shutdown_secs > 120 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be at most 120".to_string(),
        ));
    }
    Ok(())
}

fn validate_portal(portal: &PortalConfig) -> Result<(), ConfigError> {
    match (&portal.client_id, &portal.client_secret) {
        (Some(id), Some(secret)) => {
            if id.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "portal.client_id must not be empty when set".to_string(),
                ));
            }
            if secret.expose_secret().is_empty() {
                return Err(ConfigError::Validation(
                    "portal.client_secret must not be empty when set".to_string(),
                ));
            }
        }
        (Some(_), None) | (None, Some(_)) => {
            return Err(ConfigError::Validation(
                "portal.client_id and portal.client_secret must be configured together"
                    .to_string(),
            ));
        }
        (None, None) => {}
    }

    if !portal.oauth_token_url.starts_with("https://")
        && !portal.oauth_token_url.starts_with("http://")
    {
        return Err(ConfigError::Validation(
            "portal.oauth_token_url must be an http(s) URL".to_string(),
        ));
    }

    if let Some(callback) = &portal.callback_base_url {
        if !callback.starts_with("https://") && !callback.starts_with("http://") {
            return Err(ConfigError::Validation(
                "portal.callback_base_url must be an http(s) URL".to_string(),
            ));
        }
    }

    if portal.linking_token_ttl_minutes == 0 || portal.linking_token_ttl_minutes > 1440 {
        return Err(ConfigError::Validation(
            "portal.linking_token_ttl_minutes must be in range 1..=1440".to_string(),
        ));
    }

    if portal.http_timeout_secs == 0 || portal.http_timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "portal.http_timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
    let level = logging.level.trim().to_ascii_lowercase();
    if !LEVELS.contains(&level.as_str()) {
        return Err(ConfigError::Validation(format!(
            "logging.level must be one of trace|debug|info|warn|error, got `{}`",
            logging.level
        )));
    }
    Ok(())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::PathBuf;

    use secrecy::ExposeSecret;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    #[test]
    fn defaults_validate() {
        let config = AppConfig::default();
        config.validate().expect("default config should validate");
        assert_eq!(config.logging.format, LogFormat::Compact);
    }

    #[test]
    fn file_patch_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"
[database]
url = "sqlite::memory:"
max_connections = 2

[portal]
client_id = "app.12345"
client_secret = "s3cr3t"
callback_base_url = "https://hooks.chatlink.example"
linking_token_ttl_minutes = 15

[logging]
level = "debug"
format = "json"
"#
        )
        .expect("write config");

        let config = AppConfig::load(LoadOptions {
            config_path: Some(file.path().to_path_buf()),
            require_file: true,
            overrides: ConfigOverrides::default(),
        })
        .expect("config should load");

        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.database.max_connections, 2);
        assert_eq!(config.portal.client_id.as_deref(), Some("app.12345"));
        assert_eq!(
            config.portal.client_secret.as_ref().map(|s| s.expose_secret().to_string()),
            Some("s3cr3t".to_string())
        );
        assert_eq!(config.portal.linking_token_ttl_minutes, 15);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn missing_required_file_is_an_error() {
        let result = AppConfig::load(LoadOptions {
            config_path: Some(PathBuf::from("/nonexistent/chatlink.toml")),
            require_file: true,
            overrides: ConfigOverrides::default(),
        });

        assert!(matches!(result, Err(ConfigError::MissingConfigFile(_))));
    }

    #[test]
    fn client_id_without_secret_fails_validation() {
        let mut config = AppConfig::default();
        config.portal.client_id = Some("app.12345".to_string());

        let error = config.validate().expect_err("should fail");
        assert!(error.to_string().contains("configured together"));
    }

    #[test]
    fn overrides_win_over_defaults() {
        let config = AppConfig::load(LoadOptions {
            config_path: Some(PathBuf::from("/nonexistent/chatlink.toml")),
            require_file: false,
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                portal_client_id: Some("app.override".to_string()),
                portal_client_secret: Some("secret".to_string()),
                ..ConfigOverrides::default()
            },
        })
        .expect("config should load");

        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.portal.client_id.as_deref(), Some("app.override"));
    }

    #[test]
    fn bad_linking_ttl_fails_validation() {
        let mut config = AppConfig::default();
        config.portal.linking_token_ttl_minutes = 0;
        assert!(config.validate().is_err());

        config.portal.linking_token_ttl_minutes = 2000;
        assert!(config.validate().is_err());
    }
}
