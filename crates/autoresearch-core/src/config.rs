use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{ResearchError, SecretValue, require_env, search::JITTER_FRACTION};

const DEFAULT_CONFIG_PATH: &str = "autoresearch.toml";
const CONFIG_PATH_ENV: &str = "AUTORESEARCH_CONFIG";
/// Upper bound on `session.retry.max_attempts`.
pub const MAX_RETRY_ATTEMPTS: u32 = 5;

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub session: SessionConfig,
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Resolve the configured model API key (from environment only).
    pub fn llm_api_key(&self) -> Result<SecretValue, ResearchError> {
        require_env(&self.llm.api_key_env)
    }

    /// Resolve the configured search API key (from environment only).
    pub fn search_api_key(&self) -> Result<SecretValue, ResearchError> {
        require_env(&self.search.api_key_env)
    }
}

/// Helper to load configuration from disk.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a provided path or discoverable defaults.
    ///
    /// Resolution order:
    /// 1. Explicit `path` argument (must exist).
    /// 2. `AUTORESEARCH_CONFIG` environment variable (must exist).
    /// 3. `autoresearch.toml` in the current working directory, falling back to
    ///    built-in defaults when absent.
    pub fn load(path: Option<PathBuf>) -> Result<Config, ResearchError> {
        match resolve_path(path) {
            Some(candidate) => {
                let raw = fs::read_to_string(&candidate)
                    .map_err(|err| ResearchError::config_io(candidate.clone(), err))?;
                Self::from_toml(&raw)
            }
            None => Ok(Config::default()),
        }
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(raw: &str) -> Result<Config, ResearchError> {
        let config: Config = toml::from_str(raw)
            .map_err(|err| ResearchError::InvalidConfiguration(err.to_string()))?;
        Self::validate(&config)?;
        Ok(config)
    }

    pub fn validate(config: &Config) -> Result<(), ResearchError> {
        config.session.validate()?;

        if config.llm.api_key_env.trim().is_empty() {
            return Err(invalid("llm.api_key_env must reference an environment variable"));
        }
        if config.search.api_key_env.trim().is_empty() {
            return Err(invalid(
                "search.api_key_env must reference an environment variable",
            ));
        }
        Ok(())
    }
}

fn resolve_path(path: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = path {
        return Some(path);
    }

    if let Ok(from_env) = env::var(CONFIG_PATH_ENV) {
        if !from_env.trim().is_empty() {
            return Some(PathBuf::from(from_env));
        }
    }

    let default = Path::new(DEFAULT_CONFIG_PATH);
    default.exists().then(|| default.to_path_buf())
}

fn invalid(message: impl Into<String>) -> ResearchError {
    ResearchError::InvalidConfiguration(message.into())
}

/// Orchestration settings supplied to a graph at session start.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Minimum critic score (0-100) for a draft to pass.
    pub pass_threshold: u8,
    /// Upper bound on the revision counter.
    pub max_revisions: u32,
    pub session_timeout_secs: u64,
    /// Timeout for each individual model or search call.
    pub call_timeout_secs: u64,
    pub retry: RetryConfig,
    pub planner: PlannerConfig,
    pub research: ResearchConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pass_threshold: 80,
            max_revisions: 3,
            session_timeout_secs: 600,
            call_timeout_secs: 60,
            retry: RetryConfig::default(),
            planner: PlannerConfig::default(),
            research: ResearchConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ResearchError> {
        if self.pass_threshold > 100 {
            return Err(invalid("session.pass_threshold must be within 0..=100"));
        }
        if self.session_timeout_secs == 0 || self.call_timeout_secs == 0 {
            return Err(invalid("session timeouts must be greater than zero"));
        }
        self.retry.validate()?;
        if self.retry.longest_delay() >= self.session_timeout() {
            return Err(invalid(format!(
                "session.retry backoff can wait {:?}, which exceeds session_timeout_secs",
                self.retry.longest_delay()
            )));
        }
        self.planner.validate()?;
        self.research.validate()
    }
}

/// Backoff policy for search calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total calls per query, including the first.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff_ms: 500,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    fn validate(&self) -> Result<(), ResearchError> {
        if self.max_attempts == 0 || self.max_attempts > MAX_RETRY_ATTEMPTS {
            return Err(invalid(format!(
                "session.retry.max_attempts must be within 1..={MAX_RETRY_ATTEMPTS}"
            )));
        }
        if self.initial_backoff_ms == 0 {
            return Err(invalid("session.retry.initial_backoff_ms must be at least 1"));
        }
        // Each delay must exceed the largest possible previous delay.
        let floor = if self.jitter { 1.0 + JITTER_FRACTION } else { 1.0 };
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier <= floor {
            return Err(invalid(format!(
                "session.retry.backoff_multiplier must be greater than {floor}"
            )));
        }
        Ok(())
    }

    /// Worst-case delay before the final attempt, jitter included.
    pub fn longest_delay(&self) -> Duration {
        if self.max_attempts < 2 {
            return Duration::ZERO;
        }
        let exponent = (self.max_attempts - 2) as i32;
        let mut ms = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exponent);
        if self.jitter {
            ms *= 1.0 + JITTER_FRACTION;
        }
        Duration::from_millis(ms.ceil() as u64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub min_queries: usize,
    pub max_queries: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            min_queries: 3,
            max_queries: 5,
        }
    }
}

impl PlannerConfig {
    fn validate(&self) -> Result<(), ResearchError> {
        if self.min_queries == 0 || self.min_queries > self.max_queries {
            return Err(invalid(
                "session.planner requires 1 <= min_queries <= max_queries",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    /// Maximum in-flight search calls.
    pub concurrency: usize,
    pub max_results_per_query: usize,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_results_per_query: 3,
        }
    }
}

impl ResearchConfig {
    fn validate(&self) -> Result<(), ResearchError> {
        if self.concurrency == 0 || self.max_results_per_query == 0 {
            return Err(invalid(
                "session.research concurrency and max_results_per_query must be positive",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub api_key_env: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            model: "openai/gpt-oss-20b:free".to_string(),
            temperature: 0.2,
            api_key_env: "OPENROUTER_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub base_url: String,
    pub api_key_env: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.tavily.com".to_string(),
            api_key_env: "TAVILY_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.session.pass_threshold, 80);
        assert_eq!(config.session.max_revisions, 3);
        assert_eq!(config.session.retry.max_attempts, 4);
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = ConfigLoader::from_toml(
            r#"
            [session]
            pass_threshold = 90

            [session.retry]
            max_attempts = 5
            "#,
        )
        .expect("config should parse");

        assert_eq!(config.session.pass_threshold, 90);
        assert_eq!(config.session.max_revisions, 3);
        assert_eq!(config.session.retry.max_attempts, 5);
        assert_eq!(config.session.retry.initial_backoff_ms, 500);
        assert_eq!(config.llm.api_key_env, "OPENROUTER_API_KEY");
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let err = ConfigLoader::from_toml("[session]\npass_threshold = 101\n").unwrap_err();
        assert!(matches!(err, ResearchError::InvalidConfiguration(_)));
    }

    #[test]
    fn retry_attempts_are_capped() {
        let err = ConfigLoader::from_toml("[session.retry]\nmax_attempts = 50\n").unwrap_err();
        assert!(err.to_string().contains("max_attempts"));

        let err = ConfigLoader::from_toml("[session.retry]\nmax_attempts = 0\n").unwrap_err();
        assert!(matches!(err, ResearchError::InvalidConfiguration(_)));
    }

    #[test]
    fn backoff_must_fit_in_session_timeout() {
        let err = ConfigLoader::from_toml(
            r#"
            [session]
            session_timeout_secs = 10

            [session.retry]
            max_attempts = 5
            initial_backoff_ms = 2000
            backoff_multiplier = 3.0
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("session_timeout_secs"));

        let retry = RetryConfig {
            max_attempts: 4,
            initial_backoff_ms: 500,
            backoff_multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(retry.longest_delay(), Duration::from_millis(2000));
    }

    #[test]
    fn rejects_non_growing_backoff() {
        let err = ConfigLoader::from_toml("[session.retry]\nbackoff_multiplier = 1.2\n")
            .unwrap_err();
        assert!(err.to_string().contains("backoff_multiplier"));

        let ok = ConfigLoader::from_toml(
            "[session.retry]\nbackoff_multiplier = 1.2\njitter = false\n",
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn rejects_inverted_planner_bounds() {
        let err = ConfigLoader::from_toml("[session.planner]\nmin_queries = 6\nmax_queries = 5\n")
            .unwrap_err();
        assert!(err.to_string().contains("min_queries"));
    }

    #[test]
    fn explicit_path_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[session]\nmax_revisions = 1\n").unwrap();

        let config = ConfigLoader::load(Some(file.path().to_path_buf())).expect("config");
        assert_eq!(config.session.max_revisions, 1);
    }

    #[test]
    fn missing_explicit_path_is_an_io_error() {
        let err = ConfigLoader::load(Some(PathBuf::from("/nonexistent/autoresearch.toml")))
            .unwrap_err();
        assert!(matches!(err, ResearchError::ConfigIo { .. }));
    }
}
