use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_TOKEN_TTL_MINUTES: i64 = 60 * 24 * 7;
pub const DEFAULT_MAX_OUTPUT_CHARS: usize = 30_000;

/// Top-level config (flux.toml + FLUX_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FluxConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Base URL scripts use to call back into the API (`FLUX_API_URL`).
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            public_url: default_public_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_admin_user")]
    pub admin_user: String,
    #[serde(default = "default_admin_password")]
    pub admin_password: String,
    /// HMAC key for bearer tokens. A random key is generated per process when
    /// unset, which invalidates outstanding tokens on restart.
    pub token_secret: Option<String>,
    #[serde(default = "default_token_ttl")]
    pub token_ttl_minutes: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            admin_user: default_admin_user(),
            admin_password: default_admin_password(),
            token_secret: None,
            token_ttl_minutes: DEFAULT_TOKEN_TTL_MINUTES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// On-disk layout: one script file per job and one environment dir per job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: PathBuf,
    #[serde(default = "default_envs_dir")]
    pub envs_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            scripts_dir: default_scripts_dir(),
            envs_dir: default_envs_dir(),
        }
    }
}

impl PathsConfig {
    /// Create both directories if they do not exist yet.
    pub fn ensure(&self) -> crate::error::Result<()> {
        std::fs::create_dir_all(&self.scripts_dir)?;
        std::fs::create_dir_all(&self.envs_dir)?;
        Ok(())
    }
}

/// Toolchain binaries and execution limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Interpreter used to bootstrap per-job virtualenvs.
    #[serde(default = "default_python_bin")]
    pub python_bin: String,
    #[serde(default = "default_node_bin")]
    pub node_bin: String,
    #[serde(default = "default_npm_bin")]
    pub npm_bin: String,
    /// Package index mirror handed to `pip install -i`.
    pub pip_index_url: Option<String>,
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,
    /// Kill scripts that run longer than this. Unlimited when unset.
    pub script_timeout_secs: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            python_bin: default_python_bin(),
            node_bin: default_node_bin(),
            npm_bin: default_npm_bin(),
            pip_index_url: None,
            max_output_chars: DEFAULT_MAX_OUTPUT_CHARS,
            script_timeout_secs: None,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_public_url() -> String {
    format!("http://{DEFAULT_BIND}:{DEFAULT_PORT}")
}
fn default_admin_user() -> String {
    "admin".to_string()
}
fn default_admin_password() -> String {
    "admin".to_string()
}
fn default_token_ttl() -> i64 {
    DEFAULT_TOKEN_TTL_MINUTES
}
fn default_python_bin() -> String {
    "python3".to_string()
}
fn default_node_bin() -> String {
    "node".to_string()
}
fn default_npm_bin() -> String {
    "npm".to_string()
}
fn default_max_output_chars() -> usize {
    DEFAULT_MAX_OUTPUT_CHARS
}

fn flux_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".flux")
}
fn default_db_path() -> String {
    flux_home().join("flux.db").to_string_lossy().into_owned()
}
fn default_scripts_dir() -> PathBuf {
    flux_home().join("scripts")
}
fn default_envs_dir() -> PathBuf {
    flux_home().join("envs")
}

impl FluxConfig {
    /// Load config from a TOML file with FLUX_* env var overrides.
    ///
    /// Nested keys use a double underscore: `FLUX_AUTH__ADMIN_PASSWORD`.
    /// Path resolution: explicit argument, then `~/.flux/flux.toml`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::figment(&path)
            .extract()
            .map_err(|e| crate::error::FluxError::Config(e.to_string()))
    }

    fn figment(path: &str) -> Figment {
        Figment::from(Serialized::defaults(FluxConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("FLUX_").split("__"))
    }
}

fn default_config_path() -> String {
    flux_home().join("flux.toml").to_string_lossy().into_owned()
}
