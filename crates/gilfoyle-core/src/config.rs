use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::GilfoyleError;

/// Top-level configuration loaded from `gilfoyle.toml`.
///
/// Secrets may be left out of the file and supplied through the environment,
/// see [`GilfoyleConfig::with_env_overrides`].
///
/// # Examples
///
/// ```
/// use gilfoyle_core::GilfoyleConfig;
///
/// let config = GilfoyleConfig::default();
/// assert_eq!(config.server.port, 8000);
/// assert_eq!(config.gitlab.bot_username, "gilfoyle");
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GilfoyleConfig {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// GitLab connection and webhook settings.
    #[serde(default)]
    pub gitlab: GitLabConfig,
    /// Teamwork connection settings.
    #[serde(default)]
    pub teamwork: TeamworkConfig,
    /// Reasoning model settings.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Review run behavior.
    #[serde(default)]
    pub review: ReviewConfig,
}

impl GilfoyleConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`GilfoyleError::Io`] if the file cannot be read, or
    /// [`GilfoyleError::Toml`] if the content is not valid TOML.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use gilfoyle_core::GilfoyleConfig;
    /// use std::path::Path;
    ///
    /// let config = GilfoyleConfig::from_file(Path::new("gilfoyle.toml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, GilfoyleError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// Trailing slashes are stripped from service URLs.
    ///
    /// # Errors
    ///
    /// Returns [`GilfoyleError::Toml`] if parsing fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use gilfoyle_core::GilfoyleConfig;
    ///
    /// let toml = r#"
    /// [gitlab]
    /// url = "https://gitlab.example.com/"
    ///
    /// [review]
    /// retention_secs = 60
    /// "#;
    /// let config = GilfoyleConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.gitlab.url, "https://gitlab.example.com");
    /// assert_eq!(config.review.retention_secs, 60);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, GilfoyleError> {
        let mut config: Self = toml::from_str(content)?;
        config.normalize();
        Ok(config)
    }

    /// Fill secrets from the process environment.
    ///
    /// Reads `GITLAB_TOKEN`, `GITLAB_WEBHOOK_SECRET`, `TEAMWORK_API_KEY` and
    /// `LLM_API_KEY`, falling back to `OPENAI_API_KEY` or `ANTHROPIC_API_KEY`
    /// depending on `llm.provider`. Non-empty environment values win over the file.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Same as [`with_env_overrides`](Self::with_env_overrides) with an explicit lookup.
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(v) = get("GITLAB_TOKEN") {
            self.gitlab.token = Some(v);
        }
        if let Some(v) = get("GITLAB_WEBHOOK_SECRET") {
            self.gitlab.webhook_secret = Some(v);
        }
        if let Some(v) = get("TEAMWORK_API_KEY") {
            self.teamwork.api_key = Some(v);
        }
        let provider_var = match self.llm.provider.as_str() {
            "anthropic" => "ANTHROPIC_API_KEY",
            _ => "OPENAI_API_KEY",
        };
        if let Some(v) = get("LLM_API_KEY").or_else(|| get(provider_var)) {
            self.llm.api_key = Some(v);
        }
        self
    }

    /// Check that everything the webhook service needs is present.
    ///
    /// # Errors
    ///
    /// Returns [`GilfoyleError::Config`] naming the first missing value.
    pub fn validate_for_serve(&self) -> Result<(), GilfoyleError> {
        self.validate_for_review()?;
        if self.gitlab.webhook_secret.as_deref().unwrap_or("").is_empty() {
            return Err(GilfoyleError::Config(
                "gitlab.webhook_secret is required (or set GITLAB_WEBHOOK_SECRET)".into(),
            ));
        }
        Ok(())
    }

    /// Check that a one-shot review can reach GitLab and the model.
    ///
    /// # Errors
    ///
    /// Returns [`GilfoyleError::Config`] naming the first missing value.
    pub fn validate_for_review(&self) -> Result<(), GilfoyleError> {
        if self.gitlab.url.is_empty() {
            return Err(GilfoyleError::Config("gitlab.url is required".into()));
        }
        if self.gitlab.token.as_deref().unwrap_or("").is_empty() {
            return Err(GilfoyleError::Config(
                "gitlab.token is required (or set GITLAB_TOKEN)".into(),
            ));
        }
        if self.llm.api_key.as_deref().unwrap_or("").is_empty() {
            return Err(GilfoyleError::Config(format!(
                "llm.api_key is required for provider '{}' (or set LLM_API_KEY)",
                self.llm.provider
            )));
        }
        Ok(())
    }

    fn normalize(&mut self) {
        trim_trailing_slashes(&mut self.gitlab.url);
        trim_trailing_slashes(&mut self.teamwork.url);
        if let Some(base) = self.llm.base_url.as_mut() {
            trim_trailing_slashes(base);
        }
    }
}

fn trim_trailing_slashes(url: &mut String) {
    let trimmed = url.trim_end_matches('/').len();
    url.truncate(trimmed);
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Default `tracing` filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
        }
    }
}

/// GitLab connection and webhook configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitLabConfig {
    /// Instance base URL, e.g. `https://gitlab.example.com`.
    #[serde(default)]
    pub url: String,
    /// Personal or project access token of the bot account.
    pub token: Option<String>,
    /// Shared secret GitLab sends in `X-Gitlab-Token`.
    pub webhook_secret: Option<String>,
    /// Username of the bot; `@{bot_username}` in a note triggers a review.
    #[serde(default = "default_bot_username")]
    pub bot_username: String,
}

fn default_bot_username() -> String {
    "gilfoyle".into()
}

impl Default for GitLabConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: None,
            webhook_secret: None,
            bot_username: default_bot_username(),
        }
    }
}

/// Teamwork connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeamworkConfig {
    /// Site URL. Task lookups are skipped when empty.
    #[serde(default)]
    pub url: String,
    pub api_key: Option<String>,
}

impl TeamworkConfig {
    /// Returns `true` if task lookups can be made.
    pub fn is_configured(&self) -> bool {
        !self.url.is_empty() && self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

/// Reasoning model configuration.
///
/// # Examples
///
/// ```
/// use gilfoyle_core::LlmConfig;
///
/// let config = LlmConfig::default();
/// assert_eq!(config.provider, "anthropic");
/// assert_eq!(config.effective_base_url(), "https://api.anthropic.com");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name (`"anthropic"`, `"openai"` or any OpenAI-compatible host).
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub api_key: Option<String>,
    /// Override for the chat completions host.
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Upper bound on tool-call round trips before a verdict is demanded.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
}

fn default_provider() -> String {
    "anthropic".into()
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f64 {
    0.3
}

fn default_max_tool_rounds() -> usize {
    8
}

impl LlmConfig {
    /// Base URL for chat completions, derived from the provider when unset.
    pub fn effective_base_url(&self) -> &str {
        match self.base_url.as_deref() {
            Some(url) => url,
            None => match self.provider.as_str() {
                "anthropic" => "https://api.anthropic.com",
                _ => "https://api.openai.com",
            },
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: None,
            base_url: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            max_tool_rounds: default_max_tool_rounds(),
        }
    }
}

/// Review run configuration.
///
/// # Examples
///
/// ```
/// use gilfoyle_core::ReviewConfig;
///
/// let config = ReviewConfig::default();
/// assert_eq!(config.max_concurrent_reviews, 5);
/// assert_eq!(config.run_timeout().as_secs(), 300);
/// assert_eq!(config.retry.max_attempts, 3);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewConfig {
    /// Time budget for one run once it holds a concurrency permit.
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
    /// How long a completed revision suppresses repeat triggers.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    #[serde(default = "default_max_concurrent_reviews")]
    pub max_concurrent_reviews: usize,
    /// Diff lines sent to the model; positions still use the full diff.
    #[serde(default = "default_max_diff_lines")]
    pub max_diff_lines: usize,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_run_timeout_secs() -> u64 {
    300
}

fn default_retention_secs() -> u64 {
    3600
}

fn default_max_concurrent_reviews() -> usize {
    5
}

fn default_max_diff_lines() -> usize {
    1000
}

impl ReviewConfig {
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            run_timeout_secs: default_run_timeout_secs(),
            retention_secs: default_retention_secs(),
            max_concurrent_reviews: default_max_concurrent_reviews(),
            max_diff_lines: default_max_diff_lines(),
            retry: RetryConfig::default(),
        }
    }
}

/// Backoff applied to every collaborator call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    2000
}

fn default_multiplier() -> u32 {
    2
}

fn default_max_delay_ms() -> u64 {
    10_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}
