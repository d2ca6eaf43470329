//! # Configuration
//!
//! Centralizes all settings with a clear override hierarchy:
//! defaults → config file → env vars → CLI flags.
//!
//! Config lives at `~/.planstream/config.toml`. If missing on first run, a
//! commented-out default is generated so users can discover all options.

use log::{LevelFilter, debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Config Structs (all fields Option<T> for sparse TOML)
// ============================================================================

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct PlanstreamConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub transcripts: TranscriptConfig,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct BackendConfig {
    pub ws_url: Option<String>,
    pub api_url: Option<String>,
    pub api_token: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub file: Option<String>,
    pub level: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct TranscriptConfig {
    pub save: Option<bool>,
}

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_WS_URL: &str = "ws://localhost:8000/api/socket";
pub const DEFAULT_API_URL: &str = "http://localhost:8000/api/v3";
pub const DEFAULT_LOG_FILE: &str = "planstream.log";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Resolved Config (concrete values, no Options)
// ============================================================================

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub ws_url: String,
    pub api_url: String,
    pub api_token: Option<String>,
    pub log_file: PathBuf,
    pub log_level: LevelFilter,
    pub save_transcripts: bool,
    pub request_timeout: Duration,
}

/// Values given on the command line. `None` = not specified.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub ws_url: Option<String>,
    pub api_url: Option<String>,
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "config I/O error: {e}"),
            ConfigError::Parse(e) => write!(f, "config parse error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Loading
// ============================================================================

/// Returns `~/.planstream`.
pub fn config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".planstream"))
}

/// Returns the path to `~/.planstream/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Load config from `~/.planstream/config.toml`.
///
/// If the file doesn't exist, generates a commented-out default and
/// returns `PlanstreamConfig::default()`. If it exists but is malformed,
/// returns `ConfigError::Parse`.
pub fn load_config() -> Result<PlanstreamConfig, ConfigError> {
    match config_path() {
        Some(path) => load_config_from(&path),
        None => {
            warn!("Could not determine home directory, using default config");
            Ok(PlanstreamConfig::default())
        }
    }
}

pub fn load_config_from(path: &Path) -> Result<PlanstreamConfig, ConfigError> {
    if !path.exists() {
        info!("No config file found, generating default at {}", path.display());
        generate_default_config(path);
        return Ok(PlanstreamConfig::default());
    }

    let contents = fs::read_to_string(path).map_err(ConfigError::Io)?;
    let config: PlanstreamConfig = toml::from_str(&contents).map_err(ConfigError::Parse)?;
    info!("Loaded config from {}", path.display());
    debug!("Config: {:?}", redacted(&config));
    Ok(config)
}

fn redacted(config: &PlanstreamConfig) -> String {
    format!(
        "ws_url={:?} api_url={:?} api_token={} logging={:?} transcripts={:?}",
        config.backend.ws_url,
        config.backend.api_url,
        if config.backend.api_token.is_some() { "<set>" } else { "<unset>" },
        config.logging,
        config.transcripts,
    )
}

/// Generates a commented-out default config file at the given path.
fn generate_default_config(path: &Path) {
    let default_content = r#"# planstream configuration
# All settings are optional. Defaults are used for anything not specified.
# Override hierarchy: defaults → this file → env vars → CLI flags.

# [backend]
# ws_url = "ws://localhost:8000/api/socket"   # Or PLANSTREAM_WS_URL / --ws-url
# api_url = "http://localhost:8000/api/v3"    # Or PLANSTREAM_API_URL / --api-url
# api_token = "..."                           # Or PLANSTREAM_API_TOKEN
# request_timeout_secs = 30

# [logging]
# file = "planstream.log"
# level = "debug"                             # "error", "warn", "info", "debug", "trace", "off"

# [transcripts]
# save = true                                 # Written to ~/.planstream/sessions/
"#;

    if let Some(parent) = path.parent()
        && let Err(e) = fs::create_dir_all(parent)
    {
        warn!("Failed to create config directory: {}", e);
        return;
    }
    if let Err(e) = fs::write(path, default_content) {
        warn!("Failed to write default config: {}", e);
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// Resolve the final config by collapsing: defaults → config file → env vars → CLI.
pub fn resolve(config: &PlanstreamConfig, cli: &CliOverrides) -> ResolvedConfig {
    resolve_with(config, cli, |key| std::env::var(key).ok())
}

/// Same as [`resolve`], with the environment lookup injected.
pub fn resolve_with(
    config: &PlanstreamConfig,
    cli: &CliOverrides,
    env: impl Fn(&str) -> Option<String>,
) -> ResolvedConfig {
    // Websocket endpoint: CLI → env → config → default
    let ws_url = cli
        .ws_url
        .clone()
        .or_else(|| env("PLANSTREAM_WS_URL"))
        .or_else(|| config.backend.ws_url.clone())
        .unwrap_or_else(|| DEFAULT_WS_URL.to_string());

    // API base URL: CLI → env → config → default
    let api_url = cli
        .api_url
        .clone()
        .or_else(|| env("PLANSTREAM_API_URL"))
        .or_else(|| config.backend.api_url.clone())
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());

    // API token: env → config
    let api_token = env("PLANSTREAM_API_TOKEN")
        .or_else(|| config.backend.api_token.clone())
        .filter(|t| !t.trim().is_empty());

    let log_level = match config.logging.level.as_deref() {
        None => LevelFilter::Debug,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Unknown log level '{}', using debug", raw);
            LevelFilter::Debug
        }),
    };

    ResolvedConfig {
        ws_url,
        api_url,
        api_token,
        log_file: PathBuf::from(
            config
                .logging
                .file
                .clone()
                .unwrap_or_else(|| DEFAULT_LOG_FILE.to_string()),
        ),
        log_level,
        save_transcripts: config.transcripts.save.unwrap_or(true),
        request_timeout: Duration::from_secs(
            config
                .backend
                .request_timeout_secs
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_resolve_uses_defaults_when_empty() {
        let resolved = resolve_with(&PlanstreamConfig::default(), &CliOverrides::default(), no_env);
        assert_eq!(resolved.ws_url, DEFAULT_WS_URL);
        assert_eq!(resolved.api_url, DEFAULT_API_URL);
        assert!(resolved.api_token.is_none());
        assert_eq!(resolved.log_file, PathBuf::from(DEFAULT_LOG_FILE));
        assert_eq!(resolved.log_level, LevelFilter::Debug);
        assert!(resolved.save_transcripts);
        assert_eq!(resolved.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_resolve_config_values_override_defaults() {
        let config = PlanstreamConfig {
            backend: BackendConfig {
                ws_url: Some("ws://backend/socket".to_string()),
                api_url: Some("http://backend/api".to_string()),
                api_token: Some("tok".to_string()),
                request_timeout_secs: Some(5),
            },
            logging: LoggingConfig {
                file: Some("/tmp/ps.log".to_string()),
                level: Some("warn".to_string()),
            },
            transcripts: TranscriptConfig { save: Some(false) },
        };
        let resolved = resolve_with(&config, &CliOverrides::default(), no_env);
        assert_eq!(resolved.ws_url, "ws://backend/socket");
        assert_eq!(resolved.api_url, "http://backend/api");
        assert_eq!(resolved.api_token.as_deref(), Some("tok"));
        assert_eq!(resolved.log_level, LevelFilter::Warn);
        assert!(!resolved.save_transcripts);
        assert_eq!(resolved.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_env_beats_config_and_cli_beats_env() {
        let config = PlanstreamConfig {
            backend: BackendConfig {
                ws_url: Some("ws://config".to_string()),
                api_url: Some("http://config".to_string()),
                api_token: Some("config-token".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let env = |key: &str| match key {
            "PLANSTREAM_WS_URL" => Some("ws://env".to_string()),
            "PLANSTREAM_API_URL" => Some("http://env".to_string()),
            "PLANSTREAM_API_TOKEN" => Some("env-token".to_string()),
            _ => None,
        };
        let cli = CliOverrides {
            ws_url: Some("ws://cli".to_string()),
            api_url: None,
        };
        let resolved = resolve_with(&config, &cli, env);
        assert_eq!(resolved.ws_url, "ws://cli");
        assert_eq!(resolved.api_url, "http://env");
        assert_eq!(resolved.api_token.as_deref(), Some("env-token"));
    }

    #[test]
    fn test_blank_token_is_ignored() {
        let config = PlanstreamConfig {
            backend: BackendConfig {
                api_token: Some("  ".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let resolved = resolve_with(&config, &CliOverrides::default(), no_env);
        assert!(resolved.api_token.is_none());
    }

    #[test]
    fn test_bad_log_level_falls_back() {
        let config = PlanstreamConfig {
            logging: LoggingConfig {
                level: Some("chatty".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let resolved = resolve_with(&config, &CliOverrides::default(), no_env);
        assert_eq!(resolved.log_level, LevelFilter::Debug);
    }

    #[test]
    fn test_sparse_toml_parses() {
        // Only override one thing; everything else stays default
        let toml_str = r#"
[backend]
api_url = "http://10.0.0.2:8000/api/v3"
"#;
        let config: PlanstreamConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(
            config.backend.api_url.as_deref(),
            Some("http://10.0.0.2:8000/api/v3")
        );
        assert!(config.backend.ws_url.is_none());
        assert!(config.logging.level.is_none());
        assert!(config.transcripts.save.is_none());
    }

    #[test]
    fn test_generated_default_is_all_comments() {
        let dir = std::env::temp_dir().join(format!("planstream-cfg-{}", uuid::Uuid::new_v4()));
        let path = dir.join("config.toml");

        let config = load_config_from(&path).unwrap();
        assert!(config.backend.ws_url.is_none());
        assert!(path.exists());

        // the generated file must load back as an empty config
        let reloaded = load_config_from(&path).unwrap();
        assert!(reloaded.backend.api_url.is_none());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let dir = std::env::temp_dir().join(format!("planstream-cfg-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        fs::write(&path, "[backend\nws_url = ").unwrap();

        assert!(matches!(load_config_from(&path), Err(ConfigError::Parse(_))));
        let _ = fs::remove_dir_all(&dir);
    }
}
