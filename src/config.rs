//! Gateway configuration
//!
//! Static input supplied at startup: provider selection, credentials, model
//! identifier, and turn limits. Configuration is passed programmatically via
//! builder methods or loaded from `PARLEY_*` environment variables; it is
//! never consulted again after the gateway is constructed.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A string wrapper that redacts its value in Debug and Display output.
/// Prevents API keys from leaking into logs and error messages.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Access the secret value (use sparingly — only for HTTP headers)
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Which provider adapter to construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Claude,
    OpenAi,
}

impl ProviderKind {
    /// Parse a provider name. Unrecognized names fall back to the
    /// OpenAI-compatible adapter, which most third-party backends speak.
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "claude" | "anthropic" => ProviderKind::Claude,
            "openai" | "gpt" => ProviderKind::OpenAi,
            other => {
                tracing::info!("Using OpenAI-compatible adapter for provider '{}'", other);
                ProviderKind::OpenAi
            }
        }
    }
}

/// Default timeout for a pending permission decision
pub const DEFAULT_PERMISSION_TIMEOUT_MS: u64 = 30_000;

/// Default cap on provider rounds within one turn
pub const DEFAULT_MAX_ROUNDS: usize = 16;

/// Gateway configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Provider backend to use
    pub provider: ProviderKind,
    /// Model identifier (e.g. "claude-sonnet-4-20250514", "gpt-4o")
    pub model: String,
    /// API key for the provider
    pub api_key: SecretString,
    /// Base URL override (defaults to the provider's public endpoint)
    #[serde(default)]
    pub base_url: Option<String>,
    /// System prompt prepended to every turn
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// How long a permission request may stay pending before the turn fails
    #[serde(default = "default_permission_timeout_ms")]
    pub permission_timeout_ms: u64,
    /// Maximum provider rounds (tool round-trips) per turn
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
}

fn default_permission_timeout_ms() -> u64 {
    DEFAULT_PERMISSION_TIMEOUT_MS
}

fn default_max_rounds() -> usize {
    DEFAULT_MAX_ROUNDS
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("permission_timeout_ms", &self.permission_timeout_ms)
            .field("max_rounds", &self.max_rounds)
            .finish()
    }
}

impl GatewayConfig {
    pub fn new(
        provider: ProviderKind,
        model: impl Into<String>,
        api_key: impl Into<SecretString>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            api_key: api_key.into(),
            base_url: None,
            system_prompt: None,
            permission_timeout_ms: DEFAULT_PERMISSION_TIMEOUT_MS,
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    /// Load configuration from `PARLEY_*` environment variables.
    ///
    /// Recognized variables: `PARLEY_PROVIDER`, `PARLEY_MODEL`,
    /// `PARLEY_API_KEY`, `PARLEY_BASE_URL`, `PARLEY_SYSTEM_PROMPT`,
    /// `PARLEY_PERMISSION_TIMEOUT_MS`, `PARLEY_MAX_ROUNDS`.
    pub fn from_env() -> anyhow::Result<Self> {
        use anyhow::Context;

        let provider = std::env::var("PARLEY_PROVIDER")
            .map(|v| ProviderKind::parse(&v))
            .unwrap_or(ProviderKind::Claude);
        let model = std::env::var("PARLEY_MODEL").context("PARLEY_MODEL is required")?;
        let api_key = std::env::var("PARLEY_API_KEY").context("PARLEY_API_KEY is required")?;

        let mut config = Self::new(provider, model, api_key);
        if let Ok(url) = std::env::var("PARLEY_BASE_URL") {
            config.base_url = Some(url);
        }
        if let Ok(prompt) = std::env::var("PARLEY_SYSTEM_PROMPT") {
            config.system_prompt = Some(prompt);
        }
        if let Ok(ms) = std::env::var("PARLEY_PERMISSION_TIMEOUT_MS") {
            config.permission_timeout_ms = ms
                .parse()
                .context("PARLEY_PERMISSION_TIMEOUT_MS must be an integer")?;
        }
        if let Ok(rounds) = std::env::var("PARLEY_MAX_ROUNDS") {
            config.max_rounds = rounds.parse().context("PARLEY_MAX_ROUNDS must be an integer")?;
        }
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_permission_timeout(mut self, timeout: Duration) -> Self {
        self.permission_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn permission_timeout(&self) -> Duration {
        Duration::from_millis(self.permission_timeout_ms)
    }
}
