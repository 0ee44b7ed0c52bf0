use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::gate::{AuthPolicy, AuthScheme, RateLimit};
use crate::pipeline::DEFAULT_CHUNK_SIZE;

/// Accepted range for the relay chunk size
pub const CHUNK_SIZE_RANGE: std::ops::RangeInclusive<usize> = (64 * 1024)..=(128 * 1024);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP listener settings
    pub server: ServerConfig,

    /// Caller authentication
    pub auth: AuthConfig,

    /// Per-caller request budgets
    pub limits: LimitsConfig,

    /// URL admission policy
    pub policy: PolicyConfig,

    /// External tools
    pub tools: ToolsConfig,

    /// Streaming pipeline tuning
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on
    pub bind: String,

    /// Allow any origin, method and header
    pub permissive_cors: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// `none`, `api_key` or `bearer`
    pub scheme: AuthScheme,

    /// Per-route overrides of `scheme`
    pub routes: RouteAuthConfig,

    /// Header carrying the key on routes that use `api_key`
    pub api_key_header: String,

    /// Token to caller name
    pub tokens: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteAuthConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analyze: Option<AuthScheme>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<AuthScheme>,
}

impl AuthConfig {
    /// Effective scheme per route
    pub fn policy(&self) -> AuthPolicy {
        AuthPolicy {
            analyze: self.routes.analyze.unwrap_or(self.scheme),
            stream: self.routes.stream.unwrap_or(self.scheme),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub analyze: RateLimit,
    pub stream: RateLimit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Reject URLs outside the supported platforms before extraction
    pub enforce_allowlist: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Program used to inspect URLs
    pub extractor: String,

    /// Program used to produce the output stream
    pub transcoder: String,

    /// Upper bound for one extraction
    pub extract_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Bytes read from the transcoder per chunk
    pub chunk_size: usize,

    /// How long to wait for the transcoder to exit
    pub kill_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
            permissive_cors: true,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            scheme: AuthScheme::Bearer,
            routes: RouteAuthConfig::default(),
            api_key_header: "X-API-Key".to_string(),
            tokens: HashMap::new(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            analyze: RateLimit::new(10, Duration::from_secs(60)),
            stream: RateLimit::new(3, Duration::from_secs(60)),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            enforce_allowlist: true,
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            extractor: "yt-dlp".to_string(),
            transcoder: "yt-dlp".to_string(),
            extract_timeout_secs: 60,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            kill_timeout_secs: 5,
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from the default locations.
    ///
    /// An explicit path must exist. Without one, a missing file means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::config_path()?,
        };

        if config_path.exists() {
            let content = fs_err::read_to_string(&config_path)
                .context("Failed to read config file")?;

            let config: Config = serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", config_path.display()))?;

            config.validate()?;
            tracing::debug!("Loaded configuration from {}", config_path.display());
            Ok(config)
        } else if path.is_some() {
            anyhow::bail!("Config file not found: {}", config_path.display());
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to `path`, or to the default location
    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::config_path()?,
        };

        if let Some(parent) = config_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs_err::create_dir_all(parent)?;
            }
        }

        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;

        fs_err::write(&config_path, content).context("Failed to write config file")?;

        Ok(config_path)
    }

    /// Get configuration file path
    pub fn config_path() -> Result<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir().context("Could not determine config directory")?;

        Ok(config_dir.join("media-gateway").join("config.yaml"))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.bind.parse::<std::net::SocketAddr>().is_err() {
            anyhow::bail!("server.bind is not a socket address: {}", self.server.bind);
        }

        if self.auth.policy().uses(AuthScheme::ApiKey)
            && axum::http::HeaderName::from_bytes(self.auth.api_key_header.as_bytes()).is_err()
        {
            anyhow::bail!(
                "auth.api_key_header is not a valid header name: {}",
                self.auth.api_key_header
            );
        }

        if !CHUNK_SIZE_RANGE.contains(&self.pipeline.chunk_size) {
            anyhow::bail!(
                "pipeline.chunk_size must be between {} and {} bytes",
                CHUNK_SIZE_RANGE.start(),
                CHUNK_SIZE_RANGE.end()
            );
        }

        if self.tools.extractor.trim().is_empty() || self.tools.transcoder.trim().is_empty() {
            anyhow::bail!("tools.extractor and tools.transcoder must be set");
        }

        Ok(())
    }

    /// Checks that only matter when serving requests
    pub fn validate_for_serving(&self) -> Result<()> {
        self.validate()?;

        let policy = self.auth.policy();
        if policy.requires_credentials() && self.auth.tokens.is_empty() {
            anyhow::bail!(
                "analyze uses {} and stream uses {} auth but no tokens are configured; add auth.tokens or set auth.scheme to none",
                policy.analyze,
                policy.stream
            );
        }

        Ok(())
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  Bind Address: {}", self.server.bind);
        println!("  Permissive CORS: {}", self.server.permissive_cors);
        let policy = self.auth.policy();
        println!("  Auth Scheme: {}", self.auth.scheme);
        println!("  Analyze Auth: {}", policy.analyze);
        println!("  Stream Auth: {}", policy.stream);
        if policy.uses(AuthScheme::ApiKey) {
            println!("  API Key Header: {}", self.auth.api_key_header);
        }
        println!("  Tokens: {}", self.auth.tokens.len());
        println!("  Analyze Limit: {}", self.limits.analyze);
        println!("  Stream Limit: {}", self.limits.stream);
        println!("  Enforce Allowlist: {}", self.policy.enforce_allowlist);
        println!("  Extractor: {}", self.tools.extractor);
        println!("  Transcoder: {}", self.tools.transcoder);
        println!("  Chunk Size: {} bytes", self.pipeline.chunk_size);
    }

    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.tools.extract_timeout_secs)
    }

    pub fn kill_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline.kill_timeout_secs)
    }
}
