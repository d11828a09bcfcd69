//! Run configuration.
//!
//! Every section has defaults, so an empty file (or no file) is a valid
//! configuration. YAML files may reference environment variables as
//! `${NAME}`; unknown variables are left verbatim.

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration of a probe run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub oracle: OracleConfig,
    pub synthesis: SynthesisConfig,
    pub target: TargetConfig,
    pub execution: ExecutionConfig,
    pub auth: AuthConfig,
    pub report: ReportConfig,
}

/// Generative oracle settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub enabled: bool,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub base_url: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
    /// Larger responses are rejected as oversized.
    pub max_response_bytes: usize,
    /// Endpoints synthesized concurrently.
    pub max_in_flight: usize,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "claude-sonnet-4-20250514".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 4096,
            temperature: 0.2,
            timeout_secs: 120,
            max_response_bytes: 256 * 1024,
            max_in_flight: 4,
        }
    }
}

impl OracleConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Scenario synthesis settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub count_per_category: usize,
    /// Endpoints whose schema complexity exceeds this skip the oracle.
    pub complexity_threshold: usize,
    /// Serialized prompts larger than this skip the oracle.
    pub max_prompt_bytes: usize,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            count_per_category: 1,
            complexity_threshold: 200,
            max_prompt_bytes: 32 * 1024,
        }
    }
}

/// The API under test.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub base_url: Option<String>,
}

/// Execution harness settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub concurrency: usize,
    pub unit_timeout_secs: u64,
    /// Overall deadline for the whole suite. Unset means none.
    pub suite_timeout_secs: Option<u64>,
    pub max_transport_retries: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            unit_timeout_secs: 30,
            suite_timeout_secs: None,
            max_transport_retries: 2,
        }
    }
}

impl ExecutionConfig {
    pub fn unit_timeout(&self) -> Duration {
        Duration::from_secs(self.unit_timeout_secs)
    }

    pub fn suite_timeout(&self) -> Option<Duration> {
        self.suite_timeout_secs.map(Duration::from_secs)
    }
}

/// Credentials available for injection.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub api_key: Option<String>,
    pub bearer_token: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("AuthConfig")
            .field("api_key", &redact(&self.api_key))
            .field("bearer_token", &redact(&self.bearer_token))
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .finish()
    }
}

/// Report output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Json,
    Markdown,
    #[default]
    Both,
}

impl ReportFormat {
    pub fn includes_json(&self) -> bool {
        matches!(self, ReportFormat::Json | ReportFormat::Both)
    }

    pub fn includes_markdown(&self) -> bool {
        matches!(self, ReportFormat::Markdown | ReportFormat::Both)
    }
}

/// Report output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub output_dir: PathBuf,
    pub format: ReportFormat,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("reports"),
            format: ReportFormat::Both,
        }
    }
}

impl ProbeConfig {
    /// Loads a YAML file, substituting `${VAR}` from the process environment.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded configuration from {}", path.display());
        Self::from_yaml_with(&text, |name| std::env::var(name).ok())
    }

    /// Parses YAML text, resolving `${VAR}` through `lookup`.
    pub fn from_yaml_with<F>(text: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let substituted = substitute_env_vars(text, lookup)?;
        if substituted.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(&substituted)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (self.execution.concurrency == 0, "execution.concurrency must be at least 1"),
            (self.execution.unit_timeout_secs == 0, "execution.unit_timeout_secs must be positive"),
            (self.execution.suite_timeout_secs == Some(0), "execution.suite_timeout_secs must be positive"),
            (self.synthesis.count_per_category == 0, "synthesis.count_per_category must be at least 1"),
            (self.oracle.timeout_secs == 0, "oracle.timeout_secs must be positive"),
            (self.oracle.max_in_flight == 0, "oracle.max_in_flight must be at least 1"),
        ];
        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, message)) => Err(ConfigError::Invalid((*message).to_string())),
            None => Ok(()),
        }
    }
}

/// Replaces `${VAR}` references. Unknown variables stay as written.
pub fn substitute_env_vars<F>(text: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let pattern =
        Regex::new(r"\$\{([^}]+)\}").map_err(|e| ConfigError::Invalid(e.to_string()))?;
    let replaced = pattern.replace_all(text, |caps: &Captures<'_>| {
        let name = &caps[1];
        match lookup(name) {
            Some(value) => value,
            None => {
                warn!("Environment variable not found: {}", name);
                caps[0].to_string()
            }
        }
    });
    Ok(replaced.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(name: &str) -> Option<String> {
        match name {
            "TARGET_URL" => Some("https://staging.example.com".to_string()),
            "TOKEN" => Some("s3cret".to_string()),
            _ => None,
        }
    }

    #[test]
    fn test_defaults_from_empty_document() {
        let config = ProbeConfig::from_yaml_with("", env).unwrap();
        assert_eq!(config, ProbeConfig::default());
        assert_eq!(config.oracle.api_key_env, "ANTHROPIC_API_KEY");
        assert_eq!(config.execution.unit_timeout(), Duration::from_secs(30));
        assert!(config.execution.suite_timeout().is_none());
    }

    #[test]
    fn test_partial_sections_with_substitution() {
        let yaml = r"
target:
  base_url: ${TARGET_URL}
auth:
  bearer_token: ${TOKEN}
  api_key: ${MISSING_KEY}
execution:
  concurrency: 2
report:
  format: json
";
        let config = ProbeConfig::from_yaml_with(yaml, env).unwrap();
        assert_eq!(
            config.target.base_url.as_deref(),
            Some("https://staging.example.com")
        );
        assert_eq!(config.auth.bearer_token.as_deref(), Some("s3cret"));
        assert_eq!(config.auth.api_key.as_deref(), Some("${MISSING_KEY}"));
        assert_eq!(config.execution.concurrency, 2);
        assert_eq!(config.execution.max_transport_retries, 2);
        assert_eq!(config.report.format, ReportFormat::Json);
        assert!(!config.report.format.includes_markdown());
    }

    #[test]
    fn test_validation_rejects_zero_concurrency() {
        let err = ProbeConfig::from_yaml_with("execution:\n  concurrency: 0\n", env).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("concurrency")));
    }

    #[test]
    fn test_auth_debug_redacts_secrets() {
        let auth = AuthConfig {
            bearer_token: Some("s3cret".to_string()),
            ..AuthConfig::default()
        };
        let rendered = format!("{:?}", auth);
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.yaml");
        std::fs::write(&path, "synthesis:\n  count_per_category: 3\n").unwrap();
        let config = ProbeConfig::load(&path).unwrap();
        assert_eq!(config.synthesis.count_per_category, 3);

        let missing = ProbeConfig::load(&dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }
}
