use std::path::PathBuf;
use std::sync::LazyLock;

use clap::Parser;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Collection names must match this pattern (§3, §6).
pub const COLLECTION_NAME_PATTERN: &str = r"^[A-Za-z0-9_-]+$";

static COLLECTION_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(COLLECTION_NAME_PATTERN).expect("COLLECTION_NAME_PATTERN is a valid regex"));

/// Absolute-path prefixes ingestion refuses to walk, independent of OS casing.
pub const DENYLISTED_PATH_PREFIXES: &[&str] = &[
    "C:\\Windows",
    "C:\\Program Files",
    "/etc",
    "/var",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub ollama_url: String,
    pub embedding_model: String,
    pub chat_model: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub min_score: f32,
    pub max_context_tokens: usize,
    pub data_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        let base = dirs::data_local_dir()
            .map(|d| d.join("localragd"))
            .unwrap_or_else(|| PathBuf::from(".localragd-data"));

        Self {
            ollama_url: "http://localhost:11434".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            chat_model: "llama3.1:8b".to_string(),
            chunk_size: 1000,
            chunk_overlap: 200,
            top_k: 5,
            min_score: 0.5,
            max_context_tokens: 4000,
            data_dir: base.join("data"),
            logs_dir: base.join("logs"),
            port: 3001,
        }
    }
}

/// File-backed layer: every field optional, so an absent `config.toml` key
/// falls through to the compiled-in default instead of erroring.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    ollama_url: Option<String>,
    embedding_model: Option<String>,
    chat_model: Option<String>,
    chunk_size: Option<usize>,
    chunk_overlap: Option<usize>,
    top_k: Option<usize>,
    min_score: Option<f32>,
    max_context_tokens: Option<usize>,
    data_dir: Option<PathBuf>,
    logs_dir: Option<PathBuf>,
    port: Option<u16>,
}

/// CLI flags, highest-precedence layer. Every field is optional so that an
/// unset flag leaves the config-file/env/default value untouched.
#[derive(Debug, Parser)]
#[command(name = "localragd", about = "Offline RAG backend for a single workstation")]
pub struct Cli {
    /// Path to a TOML config file (defaults to ./config.toml if present).
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub ollama_url: Option<String>,
    #[arg(long)]
    pub embedding_model: Option<String>,
    #[arg(long)]
    pub chat_model: Option<String>,
    #[arg(long)]
    pub chunk_size: Option<usize>,
    #[arg(long)]
    pub chunk_overlap: Option<usize>,
    #[arg(long)]
    pub top_k: Option<usize>,
    #[arg(long)]
    pub min_score: Option<f32>,
    #[arg(long)]
    pub max_context_tokens: Option<usize>,
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    #[arg(long)]
    pub logs_dir: Option<PathBuf>,
    #[arg(long)]
    pub port: Option<u16>,
}

impl AppConfig {
    /// Layer defaults -> optional TOML file -> environment -> CLI flags,
    /// each layer overriding only the keys it actually sets (§6).
    pub fn load(cli: &Cli) -> Self {
        let mut cfg = Self::default();

        let config_path = cli
            .config
            .clone()
            .or_else(|| std::env::var("LOCALRAGD_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config.toml"));

        if let Ok(raw) = std::fs::read_to_string(&config_path) {
            match toml::from_str::<FileConfig>(&raw) {
                Ok(file) => cfg.apply_file(file),
                Err(e) => {
                    tracing::warn!("Failed to parse config file {}: {}", config_path.display(), e);
                }
            }
        }

        cfg.apply_env();
        cfg.apply_cli(cli);
        cfg
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(v) = file.ollama_url {
            self.ollama_url = v;
        }
        if let Some(v) = file.embedding_model {
            self.embedding_model = v;
        }
        if let Some(v) = file.chat_model {
            self.chat_model = v;
        }
        if let Some(v) = file.chunk_size {
            self.chunk_size = v;
        }
        if let Some(v) = file.chunk_overlap {
            self.chunk_overlap = v;
        }
        if let Some(v) = file.top_k {
            self.top_k = v;
        }
        if let Some(v) = file.min_score {
            self.min_score = v;
        }
        if let Some(v) = file.max_context_tokens {
            self.max_context_tokens = v;
        }
        if let Some(v) = file.data_dir {
            self.data_dir = v;
        }
        if let Some(v) = file.logs_dir {
            self.logs_dir = v;
        }
        if let Some(v) = file.port {
            self.port = v;
        }
    }

    fn apply_env(&mut self) {
        macro_rules! env_str {
            ($var:literal, $field:expr) => {
                if let Ok(v) = std::env::var($var) {
                    $field = v;
                }
            };
        }
        macro_rules! env_parse {
            ($var:literal, $field:expr) => {
                if let Ok(v) = std::env::var($var) {
                    if let Ok(parsed) = v.parse() {
                        $field = parsed;
                    }
                }
            };
        }

        env_str!("LOCALRAGD_OLLAMA_URL", self.ollama_url);
        env_str!("LOCALRAGD_EMBEDDING_MODEL", self.embedding_model);
        env_str!("LOCALRAGD_CHAT_MODEL", self.chat_model);
        env_parse!("LOCALRAGD_CHUNK_SIZE", self.chunk_size);
        env_parse!("LOCALRAGD_CHUNK_OVERLAP", self.chunk_overlap);
        env_parse!("LOCALRAGD_TOP_K", self.top_k);
        env_parse!("LOCALRAGD_MIN_SCORE", self.min_score);
        env_parse!("LOCALRAGD_MAX_CONTEXT_TOKENS", self.max_context_tokens);
        if let Ok(v) = std::env::var("LOCALRAGD_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("LOCALRAGD_LOGS_DIR") {
            self.logs_dir = PathBuf::from(v);
        }
        env_parse!("LOCALRAGD_PORT", self.port);
    }

    fn apply_cli(&mut self, cli: &Cli) {
        if let Some(v) = &cli.ollama_url {
            self.ollama_url = v.clone();
        }
        if let Some(v) = &cli.embedding_model {
            self.embedding_model = v.clone();
        }
        if let Some(v) = &cli.chat_model {
            self.chat_model = v.clone();
        }
        if let Some(v) = cli.chunk_size {
            self.chunk_size = v;
        }
        if let Some(v) = cli.chunk_overlap {
            self.chunk_overlap = v;
        }
        if let Some(v) = cli.top_k {
            self.top_k = v;
        }
        if let Some(v) = cli.min_score {
            self.min_score = v;
        }
        if let Some(v) = cli.max_context_tokens {
            self.max_context_tokens = v;
        }
        if let Some(v) = &cli.data_dir {
            self.data_dir = v.clone();
        }
        if let Some(v) = &cli.logs_dir {
            self.logs_dir = v.clone();
        }
        if let Some(v) = cli.port {
            self.port = v;
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }
}

/// Validate a collection name against [`COLLECTION_NAME_PATTERN`] (§3, §6).
pub fn is_valid_collection_name(name: &str) -> bool {
    COLLECTION_NAME_REGEX.is_match(name)
}

/// Reject ingestion paths that are relative, contain `..`, or fall under a
/// denylisted system directory (§6).
pub fn validate_ingest_path(path: &str) -> Result<(), String> {
    let p = std::path::Path::new(path);
    if !p.is_absolute() {
        return Err("path must be absolute".to_string());
    }
    if path.split(['/', '\\']).any(|seg| seg == "..") {
        return Err("path must not contain '..'".to_string());
    }
    let normalized = path.replace('/', "\\");
    for denied in DENYLISTED_PATH_PREFIXES {
        let denied_normalized = denied.replace('/', "\\");
        if normalized
            .to_lowercase()
            .starts_with(&denied_normalized.to_lowercase())
            || path.starts_with(denied)
        {
            return Err(format!("path under denylisted directory: {}", denied));
        }
    }
    Ok(())
}
