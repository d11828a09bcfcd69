//! Reduces raw outcomes into the report model.
//!
//! Everything here is a pure function of the outcome list plus run metadata:
//! aggregating the same outcomes always yields the same totals, whatever
//! order they arrive in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::compiler::CompileDefect;
use crate::model::{ApiInfo, Category, EndpointId, OutcomeStatus, TestOutcome};
use crate::synthesizer::{DroppedCandidate, EndpointSynthesis};

const SLOWEST_UNITS: usize = 5;

/// Counts per outcome status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub skipped: usize,
}

impl Totals {
    pub fn from_outcomes<'a>(outcomes: impl IntoIterator<Item = &'a TestOutcome>) -> Self {
        let mut totals = Self::default();
        for outcome in outcomes {
            totals.record(outcome.status);
        }
        totals
    }

    pub fn record(&mut self, status: OutcomeStatus) {
        self.total += 1;
        match status {
            OutcomeStatus::Passed => self.passed += 1,
            OutcomeStatus::Failed => self.failed += 1,
            OutcomeStatus::Errored => self.errored += 1,
            OutcomeStatus::Skipped => self.skipped += 1,
        }
    }

    /// `passed / total * 100`; 0 for an empty run.
    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.passed as f64 / self.total as f64 * 100.0
        }
    }

    /// Failed plus errored.
    pub fn failing(&self) -> usize {
        self.failed + self.errored
    }
}

/// Per-endpoint slice of the results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointBreakdown {
    pub endpoint: EndpointId,
    pub totals: Totals,
    pub pass_rate: f64,
}

/// Latency over units that received a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub measured: usize,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlowUnit {
    pub unit_id: String,
    pub endpoint: EndpointId,
    pub latency_ms: f64,
}

/// Failures sharing a cause (assertion name or transport error kind).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureCluster {
    pub key: String,
    pub count: usize,
    pub unit_ids: Vec<String>,
    /// Detail of the first unit in the cluster.
    pub sample: String,
}

/// What happened before execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SynthesisMetadata {
    pub endpoints: usize,
    /// Every endpoint the description declares, in document order.
    #[serde(default)]
    pub declared_endpoints: Vec<EndpointId>,
    pub scenarios: usize,
    pub oracle_scenarios: usize,
    pub fallback_scenarios: usize,
    /// Endpoints generated entirely by the fallback.
    pub fallback_endpoints: Vec<EndpointId>,
    pub dropped_candidates: Vec<DroppedCandidate>,
    pub compile_defects: Vec<CompileDefect>,
}

impl SynthesisMetadata {
    pub fn collect(syntheses: &[EndpointSynthesis], compile_defects: &[CompileDefect]) -> Self {
        let scenarios: usize = syntheses.iter().map(|s| s.scenarios.len()).sum();
        let fallback_scenarios: usize = syntheses
            .iter()
            .map(EndpointSynthesis::fallback_scenario_count)
            .sum();
        Self {
            endpoints: syntheses.len(),
            declared_endpoints: syntheses.iter().map(|s| s.endpoint.clone()).collect(),
            scenarios,
            oracle_scenarios: scenarios - fallback_scenarios,
            fallback_scenarios,
            fallback_endpoints: syntheses
                .iter()
                .filter(|s| s.used_fallback())
                .map(|s| s.endpoint.clone())
                .collect(),
            dropped_candidates: syntheses
                .iter()
                .flat_map(|s| s.dropped.iter().cloned())
                .collect(),
            compile_defects: compile_defects.to_vec(),
        }
    }
}

/// Which declared endpoints actually got exercised.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Coverage {
    pub total_endpoints: usize,
    /// Endpoints with at least one unit that was sent (not skipped).
    pub tested_endpoints: usize,
    pub coverage_pct: f64,
    pub untested_endpoints: Vec<EndpointId>,
}

impl Coverage {
    pub fn compute(declared: &[EndpointId], outcomes: &[TestOutcome]) -> Self {
        let (tested, untested): (Vec<&EndpointId>, Vec<&EndpointId>) =
            declared.iter().partition(|endpoint| {
                outcomes
                    .iter()
                    .any(|o| o.endpoint == **endpoint && o.status != OutcomeStatus::Skipped)
            });
        let coverage_pct = if declared.is_empty() {
            0.0
        } else {
            tested.len() as f64 / declared.len() as f64 * 100.0
        };
        Self {
            total_endpoints: declared.len(),
            tested_endpoints: tested.len(),
            coverage_pct,
            untested_endpoints: untested.into_iter().cloned().collect(),
        }
    }
}

/// Run identity supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: String,
    pub api: ApiInfo,
    pub base_url: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub synthesis: SynthesisMetadata,
}

/// Structured result of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportModel {
    pub run_id: String,
    pub api: ApiInfo,
    pub base_url: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: f64,
    pub totals: Totals,
    pub by_category: BTreeMap<Category, Totals>,
    pub endpoints: Vec<EndpointBreakdown>,
    pub pass_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency: Option<LatencyStats>,
    pub slowest: Vec<SlowUnit>,
    pub failures_by_category: BTreeMap<Category, Vec<String>>,
    pub failure_clusters: Vec<FailureCluster>,
    pub coverage: Coverage,
    pub synthesis: SynthesisMetadata,
    pub outcomes: Vec<TestOutcome>,
}

impl ReportModel {
    /// Whether any unit failed or errored.
    pub fn has_failures(&self) -> bool {
        self.totals.failing() > 0
    }
}

/// Reduces outcomes into a report. The outcome list is kept in input order.
pub fn aggregate(outcomes: &[TestOutcome], metadata: RunMetadata) -> ReportModel {
    let totals = Totals::from_outcomes(outcomes);

    let mut by_category: BTreeMap<Category, Totals> = BTreeMap::new();
    let mut failures_by_category: BTreeMap<Category, Vec<String>> = BTreeMap::new();
    let mut endpoints: Vec<EndpointBreakdown> = Vec::new();
    let mut clusters: Vec<FailureCluster> = Vec::new();

    for outcome in outcomes {
        by_category
            .entry(outcome.category)
            .or_default()
            .record(outcome.status);

        match endpoints.iter_mut().find(|e| e.endpoint == outcome.endpoint) {
            Some(entry) => entry.totals.record(outcome.status),
            None => {
                let mut entry_totals = Totals::default();
                entry_totals.record(outcome.status);
                endpoints.push(EndpointBreakdown {
                    endpoint: outcome.endpoint.clone(),
                    totals: entry_totals,
                    pass_rate: 0.0,
                });
            }
        }

        if matches!(outcome.status, OutcomeStatus::Failed | OutcomeStatus::Errored) {
            failures_by_category
                .entry(outcome.category)
                .or_default()
                .push(outcome.unit_id.clone());

            if let Some(detail) = &outcome.detail {
                let key = detail.cluster_key();
                match clusters.iter_mut().find(|c| c.key == key) {
                    Some(cluster) => {
                        cluster.count += 1;
                        cluster.unit_ids.push(outcome.unit_id.clone());
                    }
                    None => clusters.push(FailureCluster {
                        key,
                        count: 1,
                        unit_ids: vec![outcome.unit_id.clone()],
                        sample: detail.to_string(),
                    }),
                }
            }
        }
    }

    for entry in &mut endpoints {
        entry.pass_rate = entry.totals.pass_rate();
    }
    // Largest clusters first; ties keep first-appearance order.
    clusters.sort_by(|a, b| b.count.cmp(&a.count));

    let responded: Vec<&TestOutcome> = outcomes
        .iter()
        .filter(|o| o.observed_status.is_some())
        .collect();
    let latency = latency_stats(&responded);

    let mut slowest: Vec<&TestOutcome> = responded;
    slowest.sort_by(|a, b| b.latency.cmp(&a.latency));
    let slowest = slowest
        .into_iter()
        .take(SLOWEST_UNITS)
        .map(|o| SlowUnit {
            unit_id: o.unit_id.clone(),
            endpoint: o.endpoint.clone(),
            latency_ms: millis(o.latency),
        })
        .collect();

    let duration_ms = (metadata.finished_at - metadata.started_at)
        .to_std()
        .map(millis)
        .unwrap_or(0.0);

    ReportModel {
        run_id: metadata.run_id,
        api: metadata.api,
        base_url: metadata.base_url,
        started_at: metadata.started_at,
        finished_at: metadata.finished_at,
        duration_ms,
        pass_rate: totals.pass_rate(),
        totals,
        by_category,
        endpoints,
        latency,
        slowest,
        failures_by_category,
        failure_clusters: clusters,
        coverage: Coverage::compute(&metadata.synthesis.declared_endpoints, outcomes),
        synthesis: metadata.synthesis,
        outcomes: outcomes.to_vec(),
    }
}

fn latency_stats(responded: &[&TestOutcome]) -> Option<LatencyStats> {
    let min = responded.iter().map(|o| o.latency).min()?;
    let max = responded.iter().map(|o| o.latency).max()?;
    let sum: Duration = responded.iter().map(|o| o.latency).sum();
    Some(LatencyStats {
        measured: responded.len(),
        avg_ms: millis(sum) / responded.len() as f64,
        min_ms: millis(min),
        max_ms: millis(max),
    })
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
