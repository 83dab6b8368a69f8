//! Configuration Vault – reads/writes `~/.vox/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use vox_memory::MemoryConfig;
use zeroize::Zeroize;

/// Where memory index entries live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    /// Process-local index; rebuilt empty on every start.
    #[default]
    Memory,
    Qdrant,
}

impl std::fmt::Display for IndexBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexBackend::Memory => write!(f, "memory"),
            IndexBackend::Qdrant => write!(f, "qdrant"),
        }
    }
}

/// Which embedding model turns summaries into vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderKind {
    /// Offline feature hashing, no model download needed.
    #[default]
    Hash,
    Ollama,
}

impl std::fmt::Display for EmbedderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbedderKind::Hash => write!(f, "hash"),
            EmbedderKind::Ollama => write!(f, "ollama"),
        }
    }
}

/// Persisted user configuration stored in `~/.vox/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Identity every message and memory is filed under.
    #[serde(default = "default_user_id")]
    pub user_id: String,

    /// SQLite file holding messages and memory nodes.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    #[serde(default)]
    pub index_backend: IndexBackend,

    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,

    #[serde(default = "default_qdrant_collection")]
    pub qdrant_collection: String,

    /// Qdrant API key. Wiped from memory when the config is dropped.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub qdrant_api_key: String,

    #[serde(default)]
    pub embedder: EmbedderKind,

    /// Base URL of the Ollama instance.
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// Ollama embedding model, e.g. `all-minilm`.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Embedding dimension; must match the model.
    #[serde(default = "default_vector_size")]
    pub vector_size: usize,

    /// Timeout applied to every Qdrant and Ollama request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_promotion_threshold")]
    pub promotion_threshold: f32,

    #[serde(default = "default_global_recall_threshold")]
    pub global_recall_threshold: f32,

    #[serde(default = "default_recall_limit")]
    pub session_recall_limit: usize,

    #[serde(default = "default_recall_limit")]
    pub global_recall_limit: usize,

    /// Messages shown by `/history` and `/context` when no count is given.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("user_id", &self.user_id)
            .field("database_path", &self.database_path)
            .field("index_backend", &self.index_backend)
            .field("qdrant_url", &self.qdrant_url)
            .field("qdrant_collection", &self.qdrant_collection)
            .field(
                "qdrant_api_key",
                if self.qdrant_api_key.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("embedder", &self.embedder)
            .field("ollama_url", &self.ollama_url)
            .field("embedding_model", &self.embedding_model)
            .field("vector_size", &self.vector_size)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("promotion_threshold", &self.promotion_threshold)
            .field("global_recall_threshold", &self.global_recall_threshold)
            .field("session_recall_limit", &self.session_recall_limit)
            .field("global_recall_limit", &self.global_recall_limit)
            .field("history_limit", &self.history_limit)
            .finish()
    }
}

impl Drop for Config {
    fn drop(&mut self) {
        self.qdrant_api_key.zeroize();
    }
}

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

fn default_user_id() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "local_user".to_string())
}
fn default_database_path() -> String {
    PathBuf::from(home_dir())
        .join(".vox")
        .join("memory.db")
        .to_string_lossy()
        .into_owned()
}
fn default_qdrant_url() -> String {
    "http://localhost:6333".to_string()
}
fn default_qdrant_collection() -> String {
    "vox_memories".to_string()
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_embedding_model() -> String {
    "all-minilm".to_string()
}
fn default_vector_size() -> usize {
    384
}
fn default_request_timeout_secs() -> u64 {
    10
}
fn default_promotion_threshold() -> f32 {
    MemoryConfig::default().promotion_threshold
}
fn default_global_recall_threshold() -> f32 {
    MemoryConfig::default().global_recall_threshold
}
fn default_recall_limit() -> usize {
    3
}
fn default_history_limit() -> usize {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user_id: default_user_id(),
            database_path: default_database_path(),
            index_backend: IndexBackend::default(),
            qdrant_url: default_qdrant_url(),
            qdrant_collection: default_qdrant_collection(),
            qdrant_api_key: String::new(),
            embedder: EmbedderKind::default(),
            ollama_url: default_ollama_url(),
            embedding_model: default_embedding_model(),
            vector_size: default_vector_size(),
            request_timeout_secs: default_request_timeout_secs(),
            promotion_threshold: default_promotion_threshold(),
            global_recall_threshold: default_global_recall_threshold(),
            session_recall_limit: default_recall_limit(),
            global_recall_limit: default_recall_limit(),
            history_limit: default_history_limit(),
        }
    }
}

impl Config {
    /// Promotion and recall knobs for the memory service.
    pub fn memory_config(&self) -> MemoryConfig {
        MemoryConfig {
            promotion_threshold: self.promotion_threshold,
            global_recall_threshold: self.global_recall_threshold,
            session_recall_limit: self.session_recall_limit,
            global_recall_limit: self.global_recall_limit,
            ..MemoryConfig::default()
        }
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// Return the path to `~/.vox/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(&home_dir())
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".vox").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `VOX_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `VOX_USER_ID` | `user_id` |
/// | `VOX_DATABASE_PATH` | `database_path` |
/// | `VOX_QDRANT_URL` | `qdrant_url` |
/// | `VOX_OLLAMA_URL` | `ollama_url` |
/// | `VOX_EMBEDDING_MODEL` | `embedding_model` |
/// | `VOX_VECTOR_SIZE` | `vector_size` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("VOX_USER_ID") {
        cfg.user_id = v;
    }
    if let Ok(v) = std::env::var("VOX_DATABASE_PATH") {
        cfg.database_path = v;
    }
    if let Ok(v) = std::env::var("VOX_QDRANT_URL") {
        cfg.qdrant_url = v;
    }
    if let Ok(v) = std::env::var("VOX_OLLAMA_URL") {
        cfg.ollama_url = v;
    }
    if let Ok(v) = std::env::var("VOX_EMBEDDING_MODEL") {
        cfg.embedding_model = v;
    }
    if let Ok(v) = std::env::var("VOX_VECTOR_SIZE")
        && let Ok(size) = v.parse::<usize>()
        && size > 0
    {
        cfg.vector_size = size;
    }
}

/// Save the config to disk, creating `~/.vox/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        // Owner only (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_debug_redacts_api_key() {
        let mut cfg = Config::default();
        cfg.qdrant_api_key = "qd-super-secret".to_string();
        let debug_str = format!("{:?}", cfg);
        assert!(!debug_str.contains("qd-super-secret"), "api key must not appear in debug output");
        assert!(debug_str.contains("<redacted>"));
    }

    #[test]
    fn config_debug_shows_not_set_for_empty_key() {
        let debug_str = format!("{:?}", Config::default());
        assert!(debug_str.contains("<not set>"));
    }

    #[test]
    fn empty_api_key_is_not_written() {
        let raw = toml::to_string_pretty(&Config::default()).expect("serialize");
        assert!(!raw.contains("qdrant_api_key"));
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode =
            std::fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .expect("dir metadata")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn roundtrip_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let mut cfg = Config::default();
        cfg.index_backend = IndexBackend::Qdrant;
        cfg.embedder = EmbedderKind::Ollama;
        cfg.qdrant_api_key = "key".to_string();
        cfg.history_limit = 25;
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.index_backend, IndexBackend::Qdrant);
        assert_eq!(loaded.embedder, EmbedderKind::Ollama);
        assert_eq!(loaded.qdrant_api_key, "key");
        assert_eq!(loaded.history_limit, 25);
        assert_eq!(loaded.qdrant_collection, "vox_memories");
    }

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: Config =
            toml::from_str("user_id = \"alice\"\nembedder = \"ollama\"\n").expect("parse");
        assert_eq!(cfg.user_id, "alice");
        assert_eq!(cfg.embedder, EmbedderKind::Ollama);
        assert_eq!(cfg.index_backend, IndexBackend::Memory);
        assert_eq!(cfg.vector_size, 384);
        assert_eq!(cfg.memory_config(), MemoryConfig::default());
    }

    #[test]
    fn unknown_backend_is_a_parse_error() {
        assert!(toml::from_str::<Config>("index_backend = \"pinecone\"\n").is_err());
    }

    #[test]
    fn backend_names_display_as_written_in_the_file() {
        let mut cfg = Config::default();
        cfg.index_backend = IndexBackend::Qdrant;
        cfg.embedder = EmbedderKind::Ollama;
        let written = toml::to_string(&cfg).unwrap();
        assert!(written.contains(&format!("index_backend = \"{}\"", cfg.index_backend)));
        assert!(written.contains(&format!("embedder = \"{}\"", cfg.embedder)));
        assert_eq!(IndexBackend::Memory.to_string(), "memory");
        assert_eq!(EmbedderKind::Hash.to_string(), "hash");
    }

    #[test]
    fn config_path_points_to_vox_dir() {
        let p = config_path_for_home("/home/testuser");
        assert_eq!(p, PathBuf::from("/home/testuser/.vox/config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn zero_timeout_is_raised_to_one_second() {
        let mut cfg = Config::default();
        cfg.request_timeout_secs = 0;
        assert_eq!(cfg.request_timeout(), std::time::Duration::from_secs(1));
    }

    #[test]
    fn apply_env_overrides_changes_qdrant_url() {
        // SAFETY: no other test reads this variable.
        unsafe { std::env::set_var("VOX_QDRANT_URL", "http://qdrant-host:6333") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.qdrant_url, "http://qdrant-host:6333");
        unsafe { std::env::remove_var("VOX_QDRANT_URL") };
    }

    #[test]
    fn apply_env_overrides_changes_embedding_model() {
        // SAFETY: no other test reads this variable.
        unsafe { std::env::set_var("VOX_EMBEDDING_MODEL", "nomic-embed-text") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.embedding_model, "nomic-embed-text");
        unsafe { std::env::remove_var("VOX_EMBEDDING_MODEL") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_vector_size() {
        // SAFETY: no other test reads this variable.
        unsafe { std::env::set_var("VOX_VECTOR_SIZE", "zero") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.vector_size, 384);

        unsafe { std::env::set_var("VOX_VECTOR_SIZE", "768") };
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.vector_size, 768);
        unsafe { std::env::remove_var("VOX_VECTOR_SIZE") };
    }
}
