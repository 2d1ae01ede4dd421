//! Configuration for the code intelligence service.
//!
//! Layered configuration: built-in defaults, a TOML file, then environment
//! variable overrides.
//!
//! # Environment Variables
//!
//! Variables are prefixed with `MRCIS_` and use double underscores for
//! nesting:
//! - `MRCIS_EMBEDDING__BATCH_SIZE=64` sets `embedding.batch_size`
//! - `MRCIS_INDEXING__MAX_RETRIES=5` sets `indexing.max_retries`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Repositories to index
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,

    /// Storage locations
    #[serde(default)]
    pub storage: StorageConfig,

    /// Embedding provider settings
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Indexing behavior
    #[serde(default)]
    pub indexing: IndexingConfig,

    /// File discovery filters
    #[serde(default)]
    pub files: FilesConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// MCP server settings
    #[serde(default)]
    pub mcp: McpConfig,
}

/// One watched source repository.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RepositoryConfig {
    /// Unique repository name
    pub name: String,
    /// Absolute path to the repository root
    pub path: PathBuf,
    /// Branch expected to be checked out (informational)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    /// Directory holding the state database, vector snapshot, and lock file
    #[serde(default = "default_data_directory")]
    pub data_directory: PathBuf,

    /// File name of the SQLite state database inside the data directory
    #[serde(default = "default_state_db_name")]
    pub state_db_name: String,

    /// File name of the vector snapshot inside the data directory
    #[serde(default = "default_vectors_file_name")]
    pub vectors_file_name: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    /// Base URL of an OpenAI-compatible embeddings endpoint
    #[serde(default = "default_embedding_url")]
    pub api_url: String,

    /// API key sent as a bearer token
    #[serde(default)]
    pub api_key: String,

    /// Model identifier passed to the provider
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Expected vector dimensions
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Maximum texts per provider request
    #[serde(default = "default_embed_batch_size")]
    pub batch_size: usize,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Append a trailing sentinel token to every text
    #[serde(default)]
    pub append_eos_token: bool,

    /// The sentinel token appended when `append_eos_token` is set
    #[serde(default = "default_eos_token")]
    pub eos_token: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IndexingConfig {
    /// Pending references fetched per resolver pass
    #[serde(default = "default_indexing_batch_size")]
    pub batch_size: usize,

    /// Failures before a file is promoted to permanent_failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Interval of the failed-file retry sweep
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,

    /// Interval of the periodic resolver pass
    #[serde(default = "default_resolution_interval")]
    pub resolution_interval_seconds: u64,

    /// Debounce window for file events
    #[serde(default = "default_watch_debounce")]
    pub watch_debounce_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FilesConfig {
    /// Glob patterns to include (empty = include everything)
    #[serde(default)]
    pub include_patterns: Vec<String>,

    /// Glob patterns to exclude
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,

    /// Maximum directory depth for repository walks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<usize>,

    /// Maximum YAML key nesting depth indexed as variables
    #[serde(default = "default_yaml_max_depth")]
    pub yaml_max_depth: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default level filter (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module level overrides
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct McpConfig {
    /// Host for network transports
    #[serde(default = "default_mcp_host")]
    pub host: String,

    /// Port for network transports
    #[serde(default = "default_mcp_port")]
    pub port: u16,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_data_directory() -> PathBuf {
    PathBuf::from(".mrcis")
}
fn default_state_db_name() -> String {
    "state.db".to_string()
}
fn default_vectors_file_name() -> String {
    "vectors.json".to_string()
}
fn default_embedding_url() -> String {
    "http://localhost:11434/v1".to_string()
}
fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_dimensions() -> usize {
    768
}
fn default_embed_batch_size() -> usize {
    32
}
fn default_timeout_seconds() -> u64 {
    30
}
fn default_eos_token() -> String {
    "</s>".to_string()
}
fn default_indexing_batch_size() -> usize {
    100
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    60
}
fn default_resolution_interval() -> u64 {
    60
}
fn default_watch_debounce() -> u64 {
    500
}
fn default_exclude_patterns() -> Vec<String> {
    vec![
        "**/.git/**".to_string(),
        "**/node_modules/**".to_string(),
        "**/target/**".to_string(),
        "**/__pycache__/**".to_string(),
        "**/*.min.js".to_string(),
    ]
}
fn default_yaml_max_depth() -> usize {
    5
}
fn default_log_level() -> String {
    "warn".to_string()
}
fn default_mcp_host() -> String {
    "127.0.0.1".to_string()
}
fn default_mcp_port() -> u16 {
    8000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            repositories: Vec::new(),
            storage: StorageConfig::default(),
            embedding: EmbeddingConfig::default(),
            indexing: IndexingConfig::default(),
            files: FilesConfig::default(),
            logging: LoggingConfig::default(),
            mcp: McpConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_directory: default_data_directory(),
            state_db_name: default_state_db_name(),
            vectors_file_name: default_vectors_file_name(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_url: default_embedding_url(),
            api_key: String::new(),
            model: default_embedding_model(),
            dimensions: default_dimensions(),
            batch_size: default_embed_batch_size(),
            timeout_seconds: default_timeout_seconds(),
            append_eos_token: false,
            eos_token: default_eos_token(),
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_indexing_batch_size(),
            max_retries: default_max_retries(),
            retry_delay_seconds: default_retry_delay(),
            resolution_interval_seconds: default_resolution_interval(),
            watch_debounce_ms: default_watch_debounce(),
        }
    }
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            include_patterns: Vec::new(),
            exclude_patterns: default_exclude_patterns(),
            max_depth: None,
            yaml_max_depth: default_yaml_max_depth(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            host: default_mcp_host(),
            port: default_mcp_port(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from("mrcis.toml")
    }

    /// Load configuration from a specific file, layering env overrides.
    pub fn load_from(path: impl AsRef<std::path::Path>) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("MRCIS_").map(|key| {
                key.as_str()
                    .to_lowercase()
                    .replace("__", ".")
                    .into()
            }))
            .extract()
    }

    /// Save current configuration to file.
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = path.as_ref().parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    /// Create a default settings file at `mrcis.toml`.
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = PathBuf::from("mrcis.toml");
        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }
        Settings::default().save(&config_path)?;
        Ok(config_path)
    }

    /// Absolute path of the SQLite state database.
    pub fn state_db_path(&self) -> PathBuf {
        self.storage.data_directory.join(&self.storage.state_db_name)
    }

    /// Absolute path of the vector snapshot file.
    pub fn vectors_path(&self) -> PathBuf {
        self.storage
            .data_directory
            .join(&self.storage.vectors_file_name)
    }

    /// Look up a configured repository by name.
    pub fn repository(&self, name: &str) -> Option<&RepositoryConfig> {
        self.repositories.iter().find(|r| r.name == name)
    }
}
