use crate::schema::{default_collection_specs, BootstrapSpec, CollectionSpec, DEFAULT_DATABASE_NAME};

use config::{Config, File, FileFormat, Map, Value};
use mongodb::options::Credential;
use regex::Regex;
use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

#[derive(thiserror::Error, Debug)]
pub enum BootstrapConfigError {
    #[error("failed to load config")]
    InvalidConfigError(#[from] config::ConfigError),
    #[error("could not find config file {0}")]
    ConfigFileNotFound(String),
    #[error("could not read config file {path}")]
    ReadConfigFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("environment variable expansion error")]
    EnvExpansionError(#[from] ExpandError),
    #[error("database username and password must be set together")]
    IncompleteCredentials,
    #[error("database password is set but empty")]
    EmptyPassword,
    #[error("{key} is out of range: {value}")]
    OutOfRange { key: String, value: i64 },
}

#[derive(thiserror::Error, Debug)]
pub enum ExpandError {
    #[error("Missing environment variable '{var_name}' for placeholder '{placeholder}'")]
    MissingVariable {
        var_name: String,
        placeholder: String,
    },
}

/// Loads environment variables from a .env file if it exists.
/// Call it before loading the configuration.
///
/// The function looks for .env files in this order:
/// 1. .env in the current working directory
/// 2. .env in the parent directory
/// 3. If none found, continues without error (env vars may be set by system)
pub fn load_dotenv() {
    if Path::new(".env").exists() {
        match dotenvy::dotenv() {
            Ok(_) => info!("Loaded environment variables from .env file"),
            Err(e) => warn!("Found .env file but failed to load it: {}", e),
        }
        return;
    }

    if Path::new("../.env").exists() {
        match dotenvy::from_path("../.env") {
            Ok(_) => info!("Loaded environment variables from ../.env file"),
            Err(e) => warn!("Found ../.env file but failed to load it: {}", e),
        }
        return;
    }

    debug!("No .env file found, using system environment variables only");
}

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([^}:]+)(?::-(.*?))?\}").expect("placeholder pattern is a valid regex")
});

/// Expands environment variable placeholders in a string.
/// Supports both ${VAR_NAME} and ${VAR_NAME:-default_value} syntax.
///
/// Examples:
/// - "${BUGTRACKER_DB_PASSWORD}" -> reads from BUGTRACKER_DB_PASSWORD
/// - "${BUGTRACKER_DB_HOST:-localhost}" -> falls back to "localhost" when unset
pub fn expand_env_vars(input: &str) -> Result<String, ExpandError> {
    let mut result = input.to_string();
    let mut replacements: HashMap<String, String> = HashMap::new();

    for capture in PLACEHOLDER.captures_iter(input) {
        let full_match = &capture[0];
        let var_name = &capture[1];
        let default_value = capture.get(2).map(|m| m.as_str());

        if replacements.contains_key(full_match) {
            continue;
        }

        let env_value = match env::var(var_name) {
            Ok(value) => {
                debug!("Expanded environment variable: {} = [REDACTED]", var_name);
                value
            }
            Err(_) => match default_value {
                Some(default) => {
                    warn!(
                        "Environment variable {} not found, using default value",
                        var_name
                    );
                    default.to_string()
                }
                None => {
                    return Err(ExpandError::MissingVariable {
                        var_name: var_name.to_string(),
                        placeholder: full_match.to_string(),
                    });
                }
            },
        };

        result = result.replace(full_match, &env_value);
        replacements.insert(full_match.to_string(), env_value);
    }

    Ok(result)
}

fn file_format(path: &Path) -> FileFormat {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => FileFormat::Toml,
        Some("json") => FileFormat::Json,
        _ => FileFormat::Yaml,
    }
}

/// Read a config file, expand environment placeholders in its text, and parse
/// the result.
#[instrument(err)]
pub fn load_raw_config(filepath: &str) -> Result<Config, BootstrapConfigError> {
    let path = Path::new(filepath);

    if !path.exists() {
        return Err(BootstrapConfigError::ConfigFileNotFound(filepath.to_string()));
    }

    let file_content =
        std::fs::read_to_string(path).map_err(|source| BootstrapConfigError::ReadConfigFile {
            path: filepath.to_string(),
            source,
        })?;

    let expanded_content = expand_env_vars(&file_content)?;

    let conf = Config::builder()
        .add_source(File::from_str(&expanded_content, file_format(path)))
        .build()?;

    Ok(conf)
}

/// Connection settings for the MongoDB deployment.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub max_pool_size: Option<u32>,
    pub replica_set: Option<String>,
    pub srv: bool,
    pub server_selection_timeout_ms: Option<u64>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            name: DEFAULT_DATABASE_NAME.to_string(),
            host: "localhost".to_string(),
            port: 27017,
            username: None,
            password: None,
            max_pool_size: None,
            replica_set: None,
            srv: false,
            server_selection_timeout_ms: None,
        }
    }
}

// null and empty strings both mean "not set"
fn optional_string(table: &Map<String, Value>, key: &str) -> Option<String> {
    table
        .get(key)
        .and_then(|value| value.clone().into_string().ok())
        .filter(|value| !value.is_empty() && value != "null")
}

fn in_range<T: TryFrom<i64>>(key: &str, value: i64) -> Result<T, BootstrapConfigError> {
    T::try_from(value).map_err(|_| BootstrapConfigError::OutOfRange {
        key: key.to_string(),
        value,
    })
}

impl DatabaseConfig {
    pub fn from_config(config: &Config) -> Result<Self, BootstrapConfigError> {
        let db_conf = match config.get_table("database") {
            Ok(table) => table,
            Err(config::ConfigError::NotFound(_)) => {
                warn!("no database section in config, using defaults");
                Map::new()
            }
            Err(e) => return Err(e.into()),
        };
        let defaults = DatabaseConfig::default();

        let host = db_conf
            .get("host")
            .map(|h| h.clone().into_string())
            .transpose()?
            .unwrap_or(defaults.host);

        let port = db_conf
            .get("port")
            .map(|p| p.clone().into_int())
            .transpose()?
            .map(|p| in_range::<u16>("database.port", p))
            .transpose()?
            .unwrap_or(defaults.port);

        let name = db_conf
            .get("name")
            .map(|n| n.clone().into_string())
            .transpose()?
            .unwrap_or(defaults.name);

        let max_pool_size = db_conf
            .get("max_pool_size")
            .map(|mps| mps.clone().into_int())
            .transpose()?
            .map(|mps| in_range::<u32>("database.max_pool_size", mps))
            .transpose()?;

        let server_selection_timeout_ms = db_conf
            .get("server_selection_timeout_ms")
            .map(|t| t.clone().into_uint())
            .transpose()?;

        let srv = db_conf
            .get("srv")
            .map(|s| s.clone().into_bool())
            .transpose()?
            .unwrap_or(false);

        let replica_set = optional_string(&db_conf, "replica_set");
        let username = optional_string(&db_conf, "username");
        let password = db_conf
            .get("password")
            .and_then(|p| p.clone().into_string().ok());

        match (&username, &password) {
            (Some(_), None) => return Err(BootstrapConfigError::IncompleteCredentials),
            (None, Some(pass)) if !pass.is_empty() => {
                return Err(BootstrapConfigError::IncompleteCredentials)
            }
            (Some(_), Some(pass)) if pass.is_empty() => {
                return Err(BootstrapConfigError::EmptyPassword)
            }
            _ => {}
        }
        let password = password.filter(|_| username.is_some());

        Ok(DatabaseConfig {
            name,
            host,
            port,
            username,
            password,
            max_pool_size,
            replica_set,
            srv,
            server_selection_timeout_ms,
        })
    }

    /// Connection string for the MongoDB client.
    ///
    /// Credentials are not part of it, see [`DatabaseConfig::credential`].
    pub fn uri(&self) -> String {
        let mut uri = match self.srv {
            true => "mongodb+srv://".to_string(),
            false => "mongodb://".to_string(),
        };

        uri.push_str(&self.host);
        // SRV records carry the port
        if !self.srv {
            uri.push(':');
            uri.push_str(&self.port.to_string());
        }
        uri.push('/');

        let mut params = Vec::new();
        if !self.srv && self.replica_set.is_none() {
            params.push("directConnection=true".to_string());
        }
        if let Some(ref replica_set) = self.replica_set {
            params.push(format!("replicaSet={}", replica_set));
        }
        if let Some(max_pool_size) = self.max_pool_size {
            params.push(format!("maxPoolSize={}", max_pool_size));
        }
        if let Some(timeout) = self.server_selection_timeout_ms {
            params.push(format!("serverSelectionTimeoutMS={}", timeout));
        }
        if !params.is_empty() {
            uri.push('?');
            uri.push_str(&params.join("&"));
        }
        uri
    }

    /// Credentials to authenticate with against the `admin` database.
    ///
    /// Passed to the driver as is, so the password may hold characters that
    /// are reserved in a connection string.
    pub fn credential(&self) -> Option<Credential> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(
                Credential::builder()
                    .username(username.clone())
                    .password(password.clone())
                    .source("admin".to_string())
                    .build(),
            ),
            _ => None,
        }
    }
}

/// Everything the bootstrapper reads from its configuration file.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub schema: Vec<CollectionSpec>,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            database: DatabaseConfig::default(),
            schema: default_collection_specs(),
        }
    }
}

impl AppConfig {
    pub fn from_config(config: &Config) -> Result<Self, BootstrapConfigError> {
        let database = DatabaseConfig::from_config(config)?;
        let schema = match config.get::<Vec<CollectionSpec>>("schema") {
            Ok(schema) => schema,
            Err(config::ConfigError::NotFound(_)) => default_collection_specs(),
            Err(e) => return Err(e.into()),
        };
        Ok(AppConfig { database, schema })
    }

    pub fn from_path(config_path: &str) -> Result<Self, BootstrapConfigError> {
        let config = load_raw_config(config_path)?;
        Self::from_config(&config)
    }

    /// Load `config.yaml` if present, otherwise fall back to the built-in
    /// bug-tracker defaults.
    pub fn from_default_path() -> Result<Self, BootstrapConfigError> {
        if !Path::new(DEFAULT_CONFIG_FILE).exists() {
            warn!(
                "{} not found, using built-in defaults",
                DEFAULT_CONFIG_FILE
            );
            return Ok(AppConfig::default());
        }
        Self::from_path(DEFAULT_CONFIG_FILE)
    }

    pub fn from_test_config() -> Result<Self, BootstrapConfigError> {
        Self::from_path(crate::utils::testing::TEST_CONFIG_FILE)
    }

    pub fn bootstrap_spec(&self) -> BootstrapSpec {
        BootstrapSpec::new(&self.database.name, self.schema.clone())
    }
}
