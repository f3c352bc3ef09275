//! Configuration system for the Parley client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/parley/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use crate::connection::Endpoint;
use crate::net::NetConfig;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerFileConfig,
    connection: ConnectionFileConfig,
    session: SessionFileConfig,
    api: ApiFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    host: Option<String>,
    port: Option<u16>,
    secure: Option<bool>,
    api_url: Option<String>,
}

/// `[connection]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConnectionFileConfig {
    reconnect_delay_ms: Option<u64>,
    connect_timeout_secs: Option<u64>,
    channel_capacity: Option<usize>,
}

/// `[session]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SessionFileConfig {
    user_id: Option<String>,
    token: Option<String>,
}

/// `[api]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ApiFileConfig {
    request_timeout_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Credentials for starting a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// The local user.
    pub user_id: String,
    /// Bearer credential for REST and the realtime connection.
    pub token: String,
}

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Server --
    /// Host of the chat service.
    pub host: String,
    /// Port of the chat service.
    pub port: u16,
    /// Use TLS (`wss://` and `https://`).
    pub secure: bool,
    /// Base URL of the REST API; derived from host and port when unset.
    pub api_url: Option<String>,

    // -- Connection --
    /// Delay before reconnecting after the socket closes.
    pub reconnect_delay: Duration,
    /// Timeout for the WebSocket handshake.
    pub connect_timeout: Duration,
    /// Channel capacity for the runtime's mpsc channels.
    pub channel_capacity: usize,

    // -- Session --
    /// Local user id.
    pub user_id: Option<String>,
    /// Session credential.
    pub token: Option<String>,

    // -- API --
    /// Timeout for a single REST request.
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
            secure: false,
            api_url: None,
            reconnect_delay: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(10),
            channel_capacity: 256,
            user_id: None,
            token: None,
            request_timeout: Duration::from_secs(15),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// Otherwise the default path (`~/.config/parley/config.toml`) is tried
    /// and silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a config file exists but cannot be read
    /// or parsed, or if an explicit `--config` file is missing.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            host: cli
                .host
                .clone()
                .or_else(|| file.server.host.clone())
                .unwrap_or(defaults.host),
            port: cli.port.or(file.server.port).unwrap_or(defaults.port),
            secure: cli.secure || file.server.secure.unwrap_or(defaults.secure),
            api_url: cli.api_url.clone().or_else(|| file.server.api_url.clone()),
            reconnect_delay: file
                .connection
                .reconnect_delay_ms
                .map_or(defaults.reconnect_delay, Duration::from_millis),
            connect_timeout: file
                .connection
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            channel_capacity: file
                .connection
                .channel_capacity
                .unwrap_or(defaults.channel_capacity),
            user_id: cli.user.clone().or_else(|| file.session.user_id.clone()),
            token: cli.token.clone().or_else(|| file.session.token.clone()),
            request_timeout: file
                .api
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
        }
    }

    /// The realtime endpoint.
    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.host.clone(),
            port: self.port,
            secure: self.secure,
        }
    }

    /// Base URL of the REST API.
    #[must_use]
    pub fn api_base_url(&self) -> String {
        self.api_url.clone().unwrap_or_else(|| {
            let scheme = if self.secure { "https" } else { "http" };
            format!("{scheme}://{}:{}", self.host, self.port)
        })
    }

    /// Build a [`NetConfig`] from this configuration.
    #[must_use]
    pub fn to_net_config(&self) -> NetConfig {
        NetConfig {
            endpoint: self.endpoint(),
            reconnect_delay: self.reconnect_delay,
            channel_capacity: self.channel_capacity,
        }
    }

    /// The configured session, if both user id and token are present and
    /// non-empty.
    #[must_use]
    pub fn session(&self) -> Option<Session> {
        let user_id = self.user_id.clone().filter(|s| !s.is_empty())?;
        let token = self.token.clone().filter(|s| !s.is_empty())?;
        Some(Session { user_id, token })
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Realtime chat client")]
pub struct CliArgs {
    /// Host of the chat service.
    #[arg(long, env = "PARLEY_HOST")]
    pub host: Option<String>,

    /// Port of the chat service.
    #[arg(long, env = "PARLEY_PORT")]
    pub port: Option<u16>,

    /// Connect over TLS.
    #[arg(long)]
    pub secure: bool,

    /// Base URL of the REST API (default: derived from host and port).
    #[arg(long, env = "PARLEY_API_URL")]
    pub api_url: Option<String>,

    /// Your user id.
    #[arg(long, env = "PARLEY_USER")]
    pub user: Option<String>,

    /// Session credential.
    #[arg(long, env = "PARLEY_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Path to config file (default: `~/.config/parley/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "PARLEY_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/parley.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        // No config dir available: use defaults.
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("parley").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
