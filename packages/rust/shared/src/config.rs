//! Application configuration for geonote.
//!
//! User config lives at `~/.geonote/geonote.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GeonoteError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "geonote.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".geonote";

// ---------------------------------------------------------------------------
// Config structs (matching geonote.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Location lookup command settings.
    #[serde(default)]
    pub resolver: ResolverSection,

    /// File watching settings.
    #[serde(default)]
    pub watch: WatchSection,

    /// Note directories watched when `geonote watch` gets no arguments.
    #[serde(default)]
    pub vaults: Vec<VaultEntry>,
}

/// `[resolver]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverSection {
    /// Executable to run.
    #[serde(default = "default_program")]
    pub program: String,

    /// Arguments passed to the executable.
    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Text written to the command's stdin.
    #[serde(default = "default_payload")]
    pub payload: String,

    /// Per-attempt timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between attempts.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for ResolverSection {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            payload: default_payload(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_program() -> String {
    "shortcuts".into()
}
fn default_args() -> Vec<String> {
    vec!["run".into(), "Get Location".into(), "-i".into(), "-".into()]
}
fn default_payload() -> String {
    "{LAT},{LON}\n".into()
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    1000
}

/// `[watch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchSection {
    /// File extensions treated as notes (without the dot).
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Watch subdirectories too.
    #[serde(default = "default_true")]
    pub recursive: bool,

    /// Quiet period after a create before the note is processed.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

impl Default for WatchSection {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            recursive: true,
            settle_ms: default_settle_ms(),
        }
    }
}

fn default_extensions() -> Vec<String> {
    vec!["md".into()]
}
fn default_true() -> bool {
    true
}
fn default_settle_ms() -> u64 {
    250
}

/// `[[vaults]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultEntry {
    /// Human-readable name.
    pub name: String,
    /// Directory on disk; a leading `~` expands to the home directory.
    pub path: String,
}

// ---------------------------------------------------------------------------
// Runtime configs (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime configuration for the location resolver.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub program: String,
    pub args: Vec<String>,
    pub payload: String,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Fixed (non-exponential) delay between attempts.
    pub retry_delay: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for ResolverConfig {
    fn from(config: &AppConfig) -> Self {
        let section = &config.resolver;
        Self {
            program: section.program.clone(),
            args: section.args.clone(),
            payload: section.payload.clone(),
            timeout: Duration::from_secs(section.timeout_secs),
            max_attempts: section.max_attempts,
            retry_delay: Duration::from_millis(section.retry_delay_ms),
        }
    }
}

/// Runtime configuration for the note watcher and pipeline eligibility.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Directories to watch.
    pub roots: Vec<PathBuf>,
    pub recursive: bool,
    pub settle: Duration,
    /// Extensions the pipeline accepts.
    pub extensions: Vec<String>,
}

impl From<&AppConfig> for WatchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            roots: config
                .vaults
                .iter()
                .map(|vault| expand_home(&vault.path))
                .collect(),
            recursive: config.watch.recursive,
            settle: Duration::from_millis(config.watch.settle_ms),
            extensions: config.watch.extensions.clone(),
        }
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.trim_start_matches('/'),
        _ => return PathBuf::from(path),
    };

    match dirs::home_dir() {
        Some(home) if rest.is_empty() => home,
        Some(home) => home.join(rest),
        None => PathBuf::from(path),
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.geonote/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| GeonoteError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.geonote/geonote.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| GeonoteError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| GeonoteError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| GeonoteError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| GeonoteError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| GeonoteError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Reject configurations the pipeline cannot run with.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    let resolver = &config.resolver;
    if resolver.program.trim().is_empty() {
        return Err(GeonoteError::validation("resolver.program must not be empty"));
    }
    if resolver.max_attempts == 0 {
        return Err(GeonoteError::validation(
            "resolver.max_attempts must be at least 1",
        ));
    }
    if resolver.timeout_secs == 0 {
        return Err(GeonoteError::validation(
            "resolver.timeout_secs must be at least 1",
        ));
    }
    if config.watch.extensions.is_empty() {
        return Err(GeonoteError::validation(
            "watch.extensions must list at least one extension",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("shortcuts"));
        assert!(toml_str.contains("Get Location"));
        assert!(toml_str.contains("settle_ms"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.resolver.max_attempts, 3);
        assert_eq!(parsed.resolver.payload, "{LAT},{LON}\n");
        assert_eq!(parsed.watch.extensions, vec!["md".to_string()]);
    }

    #[test]
    fn config_with_vaults_and_partial_resolver() {
        let toml_str = r#"
[resolver]
program = "corelocationcli"
args = []

[[vaults]]
name = "journal"
path = "/tmp/journal"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.vaults.len(), 1);
        assert_eq!(config.vaults[0].name, "journal");
        assert_eq!(config.resolver.program, "corelocationcli");
        assert!(config.resolver.args.is_empty());
        assert_eq!(config.resolver.timeout_secs, 10);
    }

    #[test]
    fn resolver_config_from_app_config() {
        let resolver = ResolverConfig::from(&AppConfig::default());
        assert_eq!(resolver.timeout, Duration::from_secs(10));
        assert_eq!(resolver.max_attempts, 3);
        assert_eq!(resolver.retry_delay, Duration::from_secs(1));
        assert_eq!(resolver.args, ["run", "Get Location", "-i", "-"]);
    }

    #[test]
    fn watch_config_from_app_config() {
        let mut app = AppConfig::default();
        app.vaults.push(VaultEntry {
            name: "notes".into(),
            path: "/srv/notes".into(),
        });
        let watch = WatchConfig::from(&app);
        assert_eq!(watch.roots, vec![PathBuf::from("/srv/notes")]);
        assert_eq!(watch.settle, Duration::from_millis(250));
        assert!(watch.recursive);
    }

    #[test]
    fn expand_home_only_touches_leading_tilde() {
        assert_eq!(expand_home("/abs/path"), PathBuf::from("/abs/path"));
        assert_eq!(expand_home("~user/notes"), PathBuf::from("~user/notes"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~"), home);
            assert_eq!(expand_home("~/Notes"), home.join("Notes"));
        }
    }

    #[test]
    fn load_config_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("geonote.toml");
        std::fs::write(&path, "[watch]\nextensions = [\"md\", \"markdown\"]\n").expect("write");

        let config = load_config_from(&path).expect("load");
        assert_eq!(config.watch.extensions, ["md", "markdown"]);
        assert_eq!(config.resolver.max_attempts, 3);
    }

    #[test]
    fn load_config_reports_parse_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("geonote.toml");
        std::fs::write(&path, "[resolver\nprogram = 1").expect("write");

        let err = load_config_from(&path).unwrap_err();
        assert!(err.to_string().contains("failed to parse"));
    }

    #[test]
    fn validation_rejects_unusable_values() {
        assert!(validate_config(&AppConfig::default()).is_ok());

        let mut config = AppConfig::default();
        config.resolver.max_attempts = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("max_attempts"));

        let mut config = AppConfig::default();
        config.resolver.timeout_secs = 0;
        assert!(validate_config(&config).is_err());

        let mut config = AppConfig::default();
        config.resolver.program = "  ".into();
        assert!(validate_config(&config).is_err());

        let mut config = AppConfig::default();
        config.watch.extensions.clear();
        assert!(validate_config(&config).is_err());
    }
}
