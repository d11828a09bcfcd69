//! Wires the stages together.
//!
//! `description → ApiModel → EndpointSynthesis[] → CompiledSuite → TestOutcome[] → ReportModel`.
//! [`ProbePipeline::generate`] stops after compilation so a suite can be
//! written out and inspected without touching the target.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::aggregator::{ReportModel, RunMetadata, SynthesisMetadata, aggregate};
use crate::compiler::TestArtifactCompiler;
use crate::config::{OracleConfig, ProbeConfig};
use crate::context::RunContext;
use crate::error::PipelineError;
use crate::harness::{ExecutionHarness, HarnessSettings};
use crate::model::{ApiInfo, CompiledTestUnit, EndpointId};
use crate::normalizer::normalize;
use crate::oracle::{AnthropicOracle, ScenarioOracle};
use crate::synthesizer::{ScenarioSynthesizer, SynthesisSettings};
use crate::transport::{HttpTransport, ReqwestTransport};

/// A compiled suite, ready to execute or to write out as `suite.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedSuite {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub api: ApiInfo,
    pub base_url: String,
    pub synthesis: SynthesisMetadata,
    pub units: Vec<CompiledTestUnit>,
}

impl GeneratedSuite {
    /// Units grouped by endpoint, in first-appearance order.
    pub fn endpoint_groups(&self) -> Vec<(&EndpointId, Vec<&CompiledTestUnit>)> {
        let mut groups: Vec<(&EndpointId, Vec<&CompiledTestUnit>)> = Vec::new();
        for unit in &self.units {
            match groups.iter_mut().find(|(id, _)| **id == unit.endpoint) {
                Some((_, units)) => units.push(unit),
                None => groups.push((&unit.endpoint, vec![unit])),
            }
        }
        groups
    }
}

/// The oracle and transport a run talks to.
pub struct ProbePipeline {
    oracle: Option<Arc<dyn ScenarioOracle>>,
    transport: Arc<dyn HttpTransport>,
}

impl ProbePipeline {
    pub fn new(oracle: Option<Arc<dyn ScenarioOracle>>, transport: Arc<dyn HttpTransport>) -> Self {
        Self { oracle, transport }
    }

    /// Production wiring: Anthropic oracle (when enabled and keyed) plus a
    /// `reqwest` transport.
    pub fn from_config(config: &ProbeConfig) -> Result<Self, PipelineError> {
        let transport = ReqwestTransport::new()?;
        Ok(Self::new(oracle_from_config(&config.oracle), Arc::new(transport)))
    }

    /// Normalizes, synthesizes and compiles. Fails only on an invalid
    /// description or an unusable base URL.
    pub async fn generate(
        &self,
        ctx: &RunContext,
        description: &Value,
    ) -> Result<GeneratedSuite, PipelineError> {
        let model = normalize(description)?;
        let base_url = ctx.base_url(&model);
        let compiler = TestArtifactCompiler::new(&base_url)?;
        info!(
            "[{}] {} v{}: {} endpoints, target {}",
            ctx.short_id(),
            model.info.title,
            model.info.version,
            model.endpoints.len(),
            base_url
        );

        let synthesizer = ScenarioSynthesizer::new(
            self.oracle.clone(),
            SynthesisSettings::from_config(&ctx.config.synthesis, &ctx.config.oracle),
        );
        let syntheses = synthesizer.synthesize_all(&model.endpoints).await;
        let compiled = compiler.compile_all(&model, &syntheses);
        let synthesis = SynthesisMetadata::collect(&syntheses, &compiled.defects);

        info!(
            "[{}] Compiled {} units ({} from fallback, {} candidates dropped, {} defects)",
            ctx.short_id(),
            compiled.units.len(),
            synthesis.fallback_scenarios,
            synthesis.dropped_candidates.len(),
            synthesis.compile_defects.len()
        );

        Ok(GeneratedSuite {
            run_id: ctx.run_id.clone(),
            generated_at: Utc::now(),
            api: model.info,
            base_url,
            synthesis,
            units: compiled.units,
        })
    }

    /// Executes a generated suite and aggregates the outcomes.
    pub async fn execute(&self, ctx: &RunContext, suite: &GeneratedSuite) -> ReportModel {
        let harness = ExecutionHarness::new(
            Arc::clone(&self.transport),
            ctx.config.auth.clone(),
            HarnessSettings::from(&ctx.config.execution),
        );
        let outcomes = harness.execute(&suite.units).await;

        let report = aggregate(
            &outcomes,
            RunMetadata {
                run_id: ctx.run_id.clone(),
                api: suite.api.clone(),
                base_url: suite.base_url.clone(),
                started_at: ctx.started_at,
                finished_at: Utc::now(),
                synthesis: suite.synthesis.clone(),
            },
        );
        info!(
            "[{}] {} passed, {} failed, {} errored, {} skipped ({:.1}%)",
            ctx.short_id(),
            report.totals.passed,
            report.totals.failed,
            report.totals.errored,
            report.totals.skipped,
            report.pass_rate
        );
        report
    }

    /// Full run: generate then execute.
    pub async fn run(&self, ctx: &RunContext, description: &Value) -> Result<ReportModel, PipelineError> {
        let suite = self.generate(ctx, description).await?;
        Ok(self.execute(ctx, &suite).await)
    }
}

/// Builds the Anthropic oracle, or `None` when it is disabled or has no key.
/// A missing key degrades to fallback-only synthesis rather than failing.
pub fn oracle_from_config(config: &OracleConfig) -> Option<Arc<dyn ScenarioOracle>> {
    if !config.enabled {
        info!("Oracle disabled, using deterministic scenarios only");
        return None;
    }
    match AnthropicOracle::from_env(config.clone()) {
        Ok(oracle) => Some(Arc::new(oracle)),
        Err(err) => {
            warn!(
                "Oracle unavailable ({}; set {}), using deterministic scenarios only",
                err, config.api_key_env
            );
            None
        }
    }
}
