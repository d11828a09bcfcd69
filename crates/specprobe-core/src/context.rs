//! Per-run state threaded through the pipeline stages.

use chrono::{DateTime, Utc};

use crate::config::ProbeConfig;
use crate::model::ApiModel;

/// Used when neither the caller, the config nor the description names a target.
pub const DEFAULT_BASE_URL: &str = "http://localhost";

/// Identity and settings of one run. Created once and passed by reference;
/// no stage keeps global state.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub config: ProbeConfig,
    base_url_override: Option<String>,
}

impl RunContext {
    pub fn new(config: ProbeConfig) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            config,
            base_url_override: None,
        }
    }

    /// Target URL given on the command line; wins over everything else.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url_override = Some(base_url.into());
        self
    }

    /// Short form of the run id used in file names and log lines.
    pub fn short_id(&self) -> &str {
        self.run_id.get(..8).unwrap_or(&self.run_id)
    }

    /// Resolves the target: override, then `target.base_url`, then the first
    /// declared server, then [`DEFAULT_BASE_URL`].
    pub fn base_url(&self, model: &ApiModel) -> String {
        self.base_url_override
            .iter()
            .chain(self.config.target.base_url.iter())
            .chain(model.servers.iter())
            .map(|url| url.trim())
            .find(|url| !url.is_empty())
            .unwrap_or(DEFAULT_BASE_URL)
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ApiInfo;

    fn model(servers: &[&str]) -> ApiModel {
        ApiModel {
            info: ApiInfo::default(),
            servers: servers.iter().map(|s| (*s).to_string()).collect(),
            endpoints: vec![],
        }
    }

    #[test]
    fn test_base_url_precedence() {
        let mut config = ProbeConfig::default();
        let ctx = RunContext::new(config.clone());
        assert_eq!(ctx.base_url(&model(&[])), "http://localhost");
        assert_eq!(
            ctx.base_url(&model(&["https://api.example.com/v1"])),
            "https://api.example.com/v1"
        );

        config.target.base_url = Some("http://staging:8080".to_string());
        let ctx = RunContext::new(config);
        assert_eq!(
            ctx.base_url(&model(&["https://api.example.com/v1"])),
            "http://staging:8080"
        );

        let ctx = ctx.with_base_url("http://127.0.0.1:3000");
        assert_eq!(ctx.base_url(&model(&[])), "http://127.0.0.1:3000");
    }

    #[test]
    fn test_blank_override_is_ignored() {
        let ctx = RunContext::new(ProbeConfig::default()).with_base_url("  ");
        assert_eq!(ctx.base_url(&model(&["http://s"])), "http://s");
    }

    #[test]
    fn test_run_ids_are_unique() {
        let a = RunContext::new(ProbeConfig::default());
        let b = RunContext::new(ProbeConfig::default());
        assert_ne!(a.run_id, b.run_id);
        assert_eq!(a.short_id().len(), 8);
    }
}
