//! Layered configuration and path helpers.
//!
//! Uses Figment to merge `config.toml` + `config.<env>.toml` + `APP_*` env vars
//! (nested keys separated by `__`, e.g. `APP_LLM__MODEL=phi3`). Typed
//! [`Settings`] carry defaults for every key so a missing file still yields a
//! runnable configuration.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::Error;

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::from(Serialized::defaults(Settings::default())).merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        Ok(Self { figment })
    }

    /// Builds a config from inline TOML layered over the defaults.
    pub fn from_toml_str(toml: &str) -> Self {
        Self { figment: Figment::from(Serialized::defaults(Settings::default())).merge(Toml::string(toml)) }
    }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    pub fn settings(&self) -> anyhow::Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to extract settings: {}", e))?;
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data: DataSettings,
    pub retrieval: RetrievalSettings,
    pub safety: SafetySettings,
    pub llm: LlmSettings,
    pub embedding: EmbeddingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    pub sqlite_path: String,
    pub lancedb_dir: String,
    pub lancedb_table: String,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            sqlite_path: "data/cosmetic_csv.db".to_string(),
            lancedb_dir: "data/lancedb".to_string(),
            lancedb_table: "cosmetics".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub max_sql_results: usize,
    pub max_semantic_results: usize,
    /// Hybrid search asks the index for `k * hybrid_overfetch` neighbours.
    pub hybrid_overfetch: usize,
    /// Restrict COMBINED semantic retrieval to the structured query's WHERE clause.
    pub hybrid_combined: bool,
    pub id_column: String,
    pub filter_table: String,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            max_sql_results: 6,
            max_semantic_results: 5,
            hybrid_overfetch: 10,
            hybrid_combined: false,
            id_column: "CDPHId".to_string(),
            filter_table: "cosmetic_csv".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetySettings {
    pub allowed_tables: Vec<String>,
    pub max_query_len: usize,
}

impl Default for SafetySettings {
    fn default() -> Self {
        let allowed_tables = [
            "cosmetic_csv",
            "products",
            "ingredients",
            "product_ingredients",
            "companies",
            "brands",
            "categories",
            "cosmetics",
            "chemicals",
        ];
        Self { allowed_tables: allowed_tables.iter().map(|t| (*t).to_string()).collect(), max_query_len: 5000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self { base_url: "http://localhost:11434".to_string(), model: "phi3".to_string(), timeout_secs: 120 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// `minilm` (local BERT weights) or `hash` (deterministic, offline).
    pub provider: String,
    pub model_dir: String,
    pub dim: usize,
    pub max_len: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self { provider: "minilm".to_string(), model_dir: "models/all-MiniLM-L6-v2".to_string(), dim: 384, max_len: 256 }
    }
}

impl Settings {
    pub fn validate(&self) -> crate::Result<()> {
        if self.retrieval.max_sql_results == 0 || self.retrieval.max_semantic_results == 0 {
            return Err(Error::InvalidConfig("result caps must be greater than zero".into()));
        }
        if self.retrieval.hybrid_overfetch == 0 {
            return Err(Error::InvalidConfig("retrieval.hybrid_overfetch must be at least 1".into()));
        }
        if self.safety.allowed_tables.is_empty() {
            return Err(Error::InvalidConfig("safety.allowed_tables must not be empty".into()));
        }
        if self.embedding.dim == 0 {
            return Err(Error::InvalidConfig("embedding.dim must be greater than zero".into()));
        }
        Ok(())
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
