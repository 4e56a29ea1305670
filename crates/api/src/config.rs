use anyhow::{Context, Result, bail};
use extract::llm::{
    ANTHROPIC_BASE_URL, ANTHROPIC_DEFAULT_MODEL, DEFAULT_MAX_TOKENS, OLLAMA_BASE_URL,
    OLLAMA_DEFAULT_MODEL,
};
use ingest::DEFAULT_MAX_CHUNK_CHARS;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub model: ModelConfig,
    pub analysis: AnalysisConfig,
    /// Emit logs as JSON lines instead of human-readable text
    pub log_json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ModelProvider {
    Anthropic,
    Ollama,
}

impl ModelProvider {
    fn default_base_url(&self) -> &'static str {
        match self {
            Self::Anthropic => ANTHROPIC_BASE_URL,
            Self::Ollama => OLLAMA_BASE_URL,
        }
    }

    fn default_model(&self) -> &'static str {
        match self {
            Self::Anthropic => ANTHROPIC_DEFAULT_MODEL,
            Self::Ollama => OLLAMA_DEFAULT_MODEL,
        }
    }
}

impl FromStr for ModelProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            other => bail!("Unknown model provider: {other} (expected anthropic or ollama)"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: ModelProvider,
    pub base_url: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub max_chunk_chars: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        let provider = ModelProvider::Anthropic;
        Self {
            server: ServerConfig {
                bind_addr: "0.0.0.0:3000".to_string(),
            },
            database: DatabaseConfig {
                path: PathBuf::from("data/manuscripts.db"),
            },
            model: ModelConfig {
                provider,
                base_url: provider.default_base_url().to_string(),
                name: provider.default_model().to_string(),
                api_key: None,
                max_tokens: DEFAULT_MAX_TOKENS,
                request_timeout_secs: 120,
            },
            analysis: AnalysisConfig {
                max_chunk_chars: DEFAULT_MAX_CHUNK_CHARS,
            },
            log_json: false,
        }
    }
}

impl AppConfig {
    /// Read settings from the process environment, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(addr) = var("BIND_ADDR") {
            config.server.bind_addr = addr;
        }
        if let Some(path) = var("DATABASE_PATH") {
            config.database.path = PathBuf::from(path);
        }

        if let Some(provider) = var("MODEL_PROVIDER") {
            config.model.provider = provider.parse()?;
        }
        let provider = config.model.provider;
        config.model.base_url =
            var("MODEL_BASE_URL").unwrap_or_else(|| provider.default_base_url().to_string());
        config.model.name =
            var("MODEL_NAME").unwrap_or_else(|| provider.default_model().to_string());
        config.model.api_key = var("ANTHROPIC_API_KEY");

        if let Some(raw) = var("MODEL_MAX_TOKENS") {
            config.model.max_tokens = parse_number("MODEL_MAX_TOKENS", &raw)?;
        }
        if let Some(raw) = var("MODEL_TIMEOUT_SECS") {
            config.model.request_timeout_secs = parse_number("MODEL_TIMEOUT_SECS", &raw)?;
        }
        if let Some(raw) = var("MAX_CHUNK_CHARS") {
            config.analysis.max_chunk_chars = parse_number("MAX_CHUNK_CHARS", &raw)?;
        }

        config.log_json = var("LOG_FORMAT").is_some_and(|format| format.eq_ignore_ascii_case("json"));

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.model.provider == ModelProvider::Anthropic && self.model.api_key.is_none() {
            bail!("ANTHROPIC_API_KEY must be set when MODEL_PROVIDER is anthropic");
        }
        if self.analysis.max_chunk_chars == 0 {
            bail!("MAX_CHUNK_CHARS must be greater than zero");
        }
        if self.model.max_tokens == 0 {
            bail!("MODEL_MAX_TOKENS must be greater than zero");
        }
        Ok(())
    }
}

fn parse_number<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("{key} must be a number, got {raw:?}"))
}
