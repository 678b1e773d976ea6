//! Centralized configuration management for codescout
//!
//! This crate provides a unified configuration system that eliminates duplication
//! across the codebase and provides type-safe, validated configuration.
//!
//! Configuration follows a simple hierarchy:
//! 1. Safe defaults (defined as constants)
//! 2. Environment variable overrides
//! 3. Runtime validation

pub mod error;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use validation::Validate;

use sqlx::postgres::{PgConnectOptions, PgSslMode};
use uuid::{Uuid, uuid};

// =============================================================================
// SAFE DEFAULTS - Work for any environment (dev, staging, prod, test)
// =============================================================================

// Embedding Service Configuration
const DEFAULT_EMBEDDING_API_URL: &str = "http://localhost:8080/v1";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_EMBEDDING_MAX_TOKENS: usize = 8000; // Per-request token cap
const DEFAULT_EMBEDDING_CONCURRENCY: usize = 4; // Parallel embed calls per run

// Indexing Configuration
const DEFAULT_INLINE_THRESHOLD_TOKENS: i64 = 30_000; // Inline vs background cutover
const DEFAULT_CHUNK_TARGET_TOKENS: usize = 512;
const DEFAULT_CHUNK_OVERLAP_TOKENS: usize = 64;
const DEFAULT_MAX_FILE_BYTES: usize = 1_048_576; // 1 MiB
const DEFAULT_IGNORE_FILE: &str = ".codebaseindexignore";

/// Namespace for deterministic chunk point IDs (randomly generated once).
/// Overridable so co-hosted deployments cannot collide.
const DEFAULT_POINT_NAMESPACE: Uuid = uuid!("6ba7b811-9dad-11d1-80b4-00c04fd430c8");

// Database Configuration (safe local defaults)
const DEFAULT_DB_HOST: &str = "localhost";
const DEFAULT_DB_PORT: u16 = 5432;
const DEFAULT_DB_NAME: &str = "codescout";
const DEFAULT_DB_USER: &str = "codescout";
const DEFAULT_DB_PASSWORD: &str = "localdev123";
const DEFAULT_DB_SSL_MODE: &str = "disable";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_DB_TIMEOUT_SECONDS: u64 = 30;

// Vector Storage Configuration
const DEFAULT_QDRANT_URL: &str = "http://localhost:6334";

// Job Queue Configuration
const DEFAULT_QUEUE_CONCURRENCY: usize = 2;
const DEFAULT_QUEUE_LOCK_DURATION_SECS: u64 = 600; // 10 minutes
const DEFAULT_QUEUE_STALLED_CHECK_SECS: u64 = 30;
const DEFAULT_QUEUE_MAX_STALLED_COUNT: u32 = 2;
const DEFAULT_QUEUE_ATTEMPTS: u32 = 3;
const DEFAULT_QUEUE_BACKOFF_BASE_MS: u64 = 2000;
const DEFAULT_QUEUE_REMOVE_ON_COMPLETE: u32 = 100;
const DEFAULT_QUEUE_REMOVE_ON_FAIL: u32 = 50;

/// Core configuration for the entire codescout application
///
/// All settings have safe defaults and can be overridden via environment variables.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ApplicationConfig {
    /// Embedding service configuration
    pub embedding: EmbeddingConfig,

    /// Indexing configuration
    pub indexing: IndexingConfig,

    /// Vector storage configuration
    pub vector_storage: VectorStorageConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Background job queue configuration
    pub queue: QueueConfig,

    /// Credential handling configuration
    pub security: SecurityConfig,
}

impl ApplicationConfig {
    /// Load configuration from environment variables with safe defaults
    pub fn from_env() -> Self {
        codescout_common::initialize_environment();
        Self {
            embedding: EmbeddingConfig::from_env(),
            indexing: IndexingConfig::from_env(),
            vector_storage: VectorStorageConfig::from_env(),
            database: DatabaseConfig::from_env(),
            queue: QueueConfig::from_env(),
            security: SecurityConfig::from_env(),
        }
    }
}

impl Validate for ApplicationConfig {
    fn validate(&self) -> ConfigResult<()> {
        self.embedding.validate()?;
        self.indexing.validate()?;
        self.vector_storage.validate()?;
        self.database.validate()?;
        self.queue.validate()?;
        self.security.validate()?;
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Embedding service configuration
///
/// The embedding model runs as an external HTTP service; only its URL,
/// credentials, and batching limits are configured here.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EmbeddingConfig {
    /// Base URL of the embeddings API
    pub api_url: String,

    /// Optional bearer token for the embeddings API
    pub api_key: Option<String>,

    /// Model identifier passed on every request
    pub model: String,

    /// Maximum tokens per embed request
    pub max_tokens: usize,

    /// Maximum parallel embed calls per indexing run
    pub concurrency: usize,
}

impl EmbeddingConfig {
    /// Load configuration from environment variables with safe defaults
    pub fn from_env() -> Self {
        Self {
            api_url: env_string("CODESCOUT_EMBEDDING_API_URL", DEFAULT_EMBEDDING_API_URL),
            api_key: std::env::var("CODESCOUT_EMBEDDING_API_KEY").ok(),
            model: env_string("CODESCOUT_EMBEDDING_MODEL", DEFAULT_EMBEDDING_MODEL),
            max_tokens: env_parse("CODESCOUT_EMBEDDING_MAX_TOKENS", DEFAULT_EMBEDDING_MAX_TOKENS),
            concurrency: env_parse(
                "CODESCOUT_EMBEDDING_CONCURRENCY",
                DEFAULT_EMBEDDING_CONCURRENCY,
            ),
        }
    }
}

impl Validate for EmbeddingConfig {
    fn validate(&self) -> ConfigResult<()> {
        validation::validate_url(&self.api_url, "embedding.api_url")?;
        validation::validate_non_empty(&self.model, "embedding.model")?;
        validation::validate_range(self.max_tokens as u64, 16, 1_000_000, "embedding.max_tokens")?;
        validation::validate_range(self.concurrency as u64, 1, 64, "embedding.concurrency")?;
        Ok(())
    }
}

/// Indexing configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct IndexingConfig {
    /// Estimated-token cutover between inline and background indexing
    pub inline_threshold_tokens: i64,

    /// Chunk window size in tokens (clamped to `embedding.max_tokens`)
    pub chunk_target_tokens: usize,

    /// Chunk window overlap in tokens (clamped to `chunk_target_tokens - 1`)
    pub chunk_overlap_tokens: usize,

    /// Files larger than this many bytes are skipped
    pub max_file_bytes: usize,

    /// Name of the per-repo ignore file, gitignore syntax
    pub ignore_file: String,

    /// Namespace UUID for deterministic point IDs
    pub point_namespace: Uuid,
}

impl IndexingConfig {
    /// Load configuration from environment variables with safe defaults
    pub fn from_env() -> Self {
        let point_namespace = std::env::var("CODESCOUT_POINT_NAMESPACE")
            .ok()
            .and_then(|s| Uuid::parse_str(&s).ok())
            .unwrap_or(DEFAULT_POINT_NAMESPACE);

        Self {
            inline_threshold_tokens: env_parse(
                "CODESCOUT_INLINE_THRESHOLD_TOKENS",
                DEFAULT_INLINE_THRESHOLD_TOKENS,
            ),
            chunk_target_tokens: env_parse(
                "CODESCOUT_CHUNK_TARGET_TOKENS",
                DEFAULT_CHUNK_TARGET_TOKENS,
            ),
            chunk_overlap_tokens: env_parse(
                "CODESCOUT_CHUNK_OVERLAP_TOKENS",
                DEFAULT_CHUNK_OVERLAP_TOKENS,
            ),
            max_file_bytes: env_parse("CODESCOUT_MAX_FILE_BYTES", DEFAULT_MAX_FILE_BYTES),
            ignore_file: env_string("CODESCOUT_IGNORE_FILE", DEFAULT_IGNORE_FILE),
            point_namespace,
        }
    }
}

impl Validate for IndexingConfig {
    fn validate(&self) -> ConfigResult<()> {
        validation::validate_range(
            self.chunk_target_tokens as u64,
            1,
            100_000,
            "indexing.chunk_target_tokens",
        )?;
        validation::validate_range(
            self.max_file_bytes as u64,
            1,
            1_073_741_824,
            "indexing.max_file_bytes",
        )?;
        validation::validate_non_empty(&self.ignore_file, "indexing.ignore_file")?;
        Ok(())
    }
}

/// Vector storage configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct VectorStorageConfig {
    /// Qdrant server URL
    pub url: String,

    /// Optional API key for the vector store
    pub api_key: Option<String>,
}

impl VectorStorageConfig {
    /// Load configuration from environment variables with safe defaults
    pub fn from_env() -> Self {
        Self {
            url: env_string("QDRANT_URL", DEFAULT_QDRANT_URL),
            api_key: std::env::var("QDRANT_API_KEY").ok(),
        }
    }
}

impl Validate for VectorStorageConfig {
    fn validate(&self) -> ConfigResult<()> {
        validation::validate_url(&self.url, "vector_storage.url")?;
        Ok(())
    }
}

/// Database configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub ssl_mode: String,
    pub max_connections: u32,
    pub timeout_seconds: u64,
}

impl DatabaseConfig {
    /// Load configuration from environment variables with safe defaults
    pub fn from_env() -> Self {
        Self {
            host: env_string("CODESCOUT_DB_HOST", DEFAULT_DB_HOST),
            port: env_parse("CODESCOUT_DB_PORT", DEFAULT_DB_PORT),
            database: env_string("CODESCOUT_DB_NAME", DEFAULT_DB_NAME),
            user: env_string("CODESCOUT_DB_USER", DEFAULT_DB_USER),
            password: env_string("CODESCOUT_DB_PASSWORD", DEFAULT_DB_PASSWORD),
            ssl_mode: env_string("CODESCOUT_DB_SSL_MODE", DEFAULT_DB_SSL_MODE),
            max_connections: env_parse("CODESCOUT_DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS),
            timeout_seconds: env_parse("CODESCOUT_DB_TIMEOUT_SECONDS", DEFAULT_DB_TIMEOUT_SECONDS),
        }
    }

    /// Build sqlx connection options from this configuration
    pub fn connect_options(&self) -> PgConnectOptions {
        let ssl_mode = match self.ssl_mode.as_str() {
            "require" => PgSslMode::Require,
            "prefer" => PgSslMode::Prefer,
            _ => PgSslMode::Disable,
        };

        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.user)
            .password(&self.password)
            .ssl_mode(ssl_mode)
    }

    /// Connection string with the password redacted, safe for logs
    pub fn safe_connection_string(&self) -> String {
        format!(
            "postgres://{}:***@{}:{}/{}",
            self.user, self.host, self.port, self.database
        )
    }
}

impl Validate for DatabaseConfig {
    fn validate(&self) -> ConfigResult<()> {
        validation::validate_non_empty(&self.host, "database.host")?;
        validation::validate_non_empty(&self.database, "database.database")?;
        validation::validate_range(
            u64::from(self.max_connections),
            1,
            1000,
            "database.max_connections",
        )?;
        Ok(())
    }
}

/// Background job queue configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct QueueConfig {
    /// Number of concurrent job workers
    pub concurrency: usize,

    /// How long a claimed job stays locked before it is considered stalled
    pub lock_duration_secs: u64,

    /// Interval of the stalled-job scan
    pub stalled_check_secs: u64,

    /// How many times a job may stall before it is failed outright
    pub max_stalled_count: u32,

    /// Total delivery attempts per job
    pub attempts: u32,

    /// Base delay for exponential retry backoff
    pub backoff_base_ms: u64,

    /// Completed jobs kept for inspection
    pub remove_on_complete: u32,

    /// Failed jobs kept for inspection
    pub remove_on_fail: u32,
}

impl QueueConfig {
    /// Load configuration from environment variables with safe defaults
    pub fn from_env() -> Self {
        Self {
            concurrency: env_parse("CODESCOUT_QUEUE_CONCURRENCY", DEFAULT_QUEUE_CONCURRENCY),
            lock_duration_secs: env_parse(
                "CODESCOUT_QUEUE_LOCK_DURATION_SECS",
                DEFAULT_QUEUE_LOCK_DURATION_SECS,
            ),
            stalled_check_secs: env_parse(
                "CODESCOUT_QUEUE_STALLED_CHECK_SECS",
                DEFAULT_QUEUE_STALLED_CHECK_SECS,
            ),
            max_stalled_count: env_parse(
                "CODESCOUT_QUEUE_MAX_STALLED_COUNT",
                DEFAULT_QUEUE_MAX_STALLED_COUNT,
            ),
            attempts: env_parse("CODESCOUT_QUEUE_ATTEMPTS", DEFAULT_QUEUE_ATTEMPTS),
            backoff_base_ms: env_parse(
                "CODESCOUT_QUEUE_BACKOFF_BASE_MS",
                DEFAULT_QUEUE_BACKOFF_BASE_MS,
            ),
            remove_on_complete: env_parse(
                "CODESCOUT_QUEUE_REMOVE_ON_COMPLETE",
                DEFAULT_QUEUE_REMOVE_ON_COMPLETE,
            ),
            remove_on_fail: env_parse(
                "CODESCOUT_QUEUE_REMOVE_ON_FAIL",
                DEFAULT_QUEUE_REMOVE_ON_FAIL,
            ),
        }
    }
}

impl Validate for QueueConfig {
    fn validate(&self) -> ConfigResult<()> {
        validation::validate_range(self.concurrency as u64, 1, 64, "queue.concurrency")?;
        validation::validate_range(
            self.lock_duration_secs,
            10,
            86_400,
            "queue.lock_duration_secs",
        )?;
        validation::validate_range(u64::from(self.attempts), 1, 100, "queue.attempts")?;
        Ok(())
    }
}

/// Credential handling configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SecurityConfig {
    /// 32-byte AEAD key for repository access tokens, hex encoded in the
    /// environment. Absent means stored tokens cannot be decrypted.
    pub credential_key: Option<Vec<u8>>,
}

impl SecurityConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let credential_key = std::env::var("CODESCOUT_CREDENTIAL_KEY")
            .ok()
            .and_then(|hex| decode_hex(&hex));
        Self { credential_key }
    }
}

impl Validate for SecurityConfig {
    fn validate(&self) -> ConfigResult<()> {
        if let Some(key) = &self.credential_key
            && key.len() != 32
        {
            return Err(ConfigError::InvalidKey {
                field: "security.credential_key".to_string(),
                reason: format!("expected 32 bytes, got {}", key.len()),
            });
        }
        Ok(())
    }
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    let s = s.trim();
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = ApplicationConfig {
            embedding: EmbeddingConfig {
                api_url: DEFAULT_EMBEDDING_API_URL.to_string(),
                api_key: None,
                model: DEFAULT_EMBEDDING_MODEL.to_string(),
                max_tokens: DEFAULT_EMBEDDING_MAX_TOKENS,
                concurrency: DEFAULT_EMBEDDING_CONCURRENCY,
            },
            indexing: IndexingConfig {
                inline_threshold_tokens: DEFAULT_INLINE_THRESHOLD_TOKENS,
                chunk_target_tokens: DEFAULT_CHUNK_TARGET_TOKENS,
                chunk_overlap_tokens: DEFAULT_CHUNK_OVERLAP_TOKENS,
                max_file_bytes: DEFAULT_MAX_FILE_BYTES,
                ignore_file: DEFAULT_IGNORE_FILE.to_string(),
                point_namespace: DEFAULT_POINT_NAMESPACE,
            },
            vector_storage: VectorStorageConfig {
                url: DEFAULT_QDRANT_URL.to_string(),
                api_key: None,
            },
            database: DatabaseConfig {
                host: DEFAULT_DB_HOST.to_string(),
                port: DEFAULT_DB_PORT,
                database: DEFAULT_DB_NAME.to_string(),
                user: DEFAULT_DB_USER.to_string(),
                password: DEFAULT_DB_PASSWORD.to_string(),
                ssl_mode: DEFAULT_DB_SSL_MODE.to_string(),
                max_connections: DEFAULT_DB_MAX_CONNECTIONS,
                timeout_seconds: DEFAULT_DB_TIMEOUT_SECONDS,
            },
            queue: QueueConfig::from_env(),
            security: SecurityConfig {
                credential_key: None,
            },
        };

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_decode_hex() {
        assert_eq!(decode_hex("00ff"), Some(vec![0x00, 0xff]));
        assert_eq!(decode_hex("0f0"), None, "odd length rejected");
        assert_eq!(decode_hex("zz"), None, "non-hex rejected");
    }

    #[test]
    fn test_credential_key_length_enforced() {
        let short = SecurityConfig {
            credential_key: Some(vec![0u8; 16]),
        };
        assert!(short.validate().is_err());

        let full = SecurityConfig {
            credential_key: Some(vec![0u8; 32]),
        };
        assert!(full.validate().is_ok());
    }

    #[test]
    fn test_safe_connection_string_redacts_password() {
        let db = DatabaseConfig::from_env();
        let safe = db.safe_connection_string();
        assert!(safe.contains("***"));
        assert!(!safe.contains(&db.password) || db.password.is_empty() || db.password == "***");
    }
}
