//! Scenario synthesis: oracle first, deterministic fallback always.
//!
//! Each endpoint walks an explicit state sequence:
//!
//! ```text
//! Synthesizing ──▶ OracleAccepted
//!      │
//!      ├──▶ OracleFailed(reason) ──▶ FallbackGenerated
//!      │
//!      └──▶ ComplexityBypass ──────▶ FallbackGenerated
//! ```
//!
//! Oracle output is parsed strictly. Candidates are validated one by one and
//! dropped individually; a single bad candidate never discards the batch.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{OracleConfig, SynthesisConfig};
use crate::error::OracleUnavailableError;
use crate::fallback::{fallback_scenario, fallback_scenarios, scenario_id};
use crate::model::{
    Category, EndpointDescriptor, EndpointId, ExpectedStatus, Expectation, ParamLocation,
    ScenarioOrigin, ScenarioRequest, TestScenario,
};
use crate::normalizer::normalize_path;
use crate::oracle::{OracleRequest, ScenarioOracle};

/// One step of an endpoint's synthesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SynthesisState {
    Synthesizing,
    OracleAccepted,
    OracleFailed { reason: String },
    ComplexityBypass { reason: String },
    FallbackGenerated,
}

/// Why a candidate was discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum DropReason {
    NotAnObject,
    MissingCategory,
    UnknownCategory(String),
    EndpointMismatch(String),
    MissingPathParam(String),
    UndeclaredPathParam(String),
    InvalidPathValue(String),
    MissingQueryParam(String),
    MissingStatus,
    InvalidStatus(String),
    OverQuota(Category),
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::NotAnObject => write!(f, "candidate is not an object"),
            DropReason::MissingCategory => write!(f, "missing category"),
            DropReason::UnknownCategory(c) => write!(f, "unknown category `{}`", c),
            DropReason::EndpointMismatch(e) => write!(f, "targets a different endpoint ({})", e),
            DropReason::MissingPathParam(p) => write!(f, "missing path parameter `{}`", p),
            DropReason::UndeclaredPathParam(p) => {
                write!(f, "path parameter `{}` is not declared by the endpoint", p)
            }
            DropReason::InvalidPathValue(p) => {
                write!(f, "path parameter `{}` must be a non-null scalar", p)
            }
            DropReason::MissingQueryParam(p) => {
                write!(f, "missing required query parameter `{}`", p)
            }
            DropReason::MissingStatus => write!(f, "missing expected status"),
            DropReason::InvalidStatus(s) => write!(f, "invalid expected status {}", s),
            DropReason::OverQuota(c) => write!(f, "over quota for category {}", c),
        }
    }
}

/// A rejected oracle candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroppedCandidate {
    pub endpoint: EndpointId,
    /// Position in the oracle's `scenarios` array.
    pub index: usize,
    pub reason: DropReason,
}

/// Result of synthesizing one endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointSynthesis {
    pub endpoint: EndpointId,
    pub scenarios: Vec<TestScenario>,
    pub transitions: Vec<SynthesisState>,
    pub dropped: Vec<DroppedCandidate>,
    /// Categories filled from the fallback after an accepted oracle pass.
    pub topped_up: Vec<Category>,
}

impl EndpointSynthesis {
    /// Whether the whole endpoint was generated by the fallback.
    pub fn used_fallback(&self) -> bool {
        self.transitions.contains(&SynthesisState::FallbackGenerated)
    }

    pub fn fallback_scenario_count(&self) -> usize {
        self.scenarios
            .iter()
            .filter(|s| s.origin == ScenarioOrigin::Fallback)
            .count()
    }
}

/// Settings the synthesizer runs with.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisSettings {
    pub count_per_category: usize,
    pub complexity_threshold: usize,
    pub max_prompt_bytes: usize,
    pub max_response_bytes: usize,
    pub oracle_timeout: Duration,
    pub max_in_flight: usize,
}

impl SynthesisSettings {
    pub fn from_config(synthesis: &SynthesisConfig, oracle: &OracleConfig) -> Self {
        Self {
            count_per_category: synthesis.count_per_category.max(1),
            complexity_threshold: synthesis.complexity_threshold,
            max_prompt_bytes: synthesis.max_prompt_bytes,
            max_response_bytes: oracle.max_response_bytes,
            oracle_timeout: oracle.timeout(),
            max_in_flight: oracle.max_in_flight.max(1),
        }
    }
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self::from_config(&SynthesisConfig::default(), &OracleConfig::default())
    }
}

/// Produces validated scenarios for endpoints.
pub struct ScenarioSynthesizer {
    oracle: Option<Arc<dyn ScenarioOracle>>,
    settings: SynthesisSettings,
}

impl ScenarioSynthesizer {
    /// `oracle: None` means every endpoint goes to the fallback.
    pub fn new(oracle: Option<Arc<dyn ScenarioOracle>>, settings: SynthesisSettings) -> Self {
        Self { oracle, settings }
    }

    /// Synthesizes every endpoint and returns results in endpoint order.
    ///
    /// At most `max_in_flight` endpoints wait on the oracle at once, and a
    /// slot frees as soon as its endpoint finishes. Endpoints that will not
    /// ask the oracle are resolved without taking a slot.
    pub async fn synthesize_all(&self, endpoints: &[EndpointDescriptor]) -> Vec<EndpointSynthesis> {
        let (direct, via_oracle): (Vec<_>, Vec<_>) = endpoints
            .iter()
            .enumerate()
            .partition(|(_, endpoint)| {
                self.oracle.is_none() || self.bypass_reason(endpoint).is_some()
            });

        let oracle_bound = stream::iter(via_oracle)
            .map(|(index, endpoint)| async move { (index, self.synthesize(endpoint).await) })
            .buffer_unordered(self.settings.max_in_flight)
            .collect::<Vec<_>>();
        let local = stream::iter(direct)
            .then(|(index, endpoint)| async move { (index, self.synthesize(endpoint).await) })
            .collect::<Vec<_>>();

        let (mut results, local) = futures::join!(oracle_bound, local);
        results.extend(local);
        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, synthesis)| synthesis).collect()
    }

    /// Synthesizes scenarios for one endpoint. Never empty.
    pub async fn synthesize(&self, endpoint: &EndpointDescriptor) -> EndpointSynthesis {
        let id = endpoint.id();
        let mut transitions = vec![SynthesisState::Synthesizing];
        let mut dropped = Vec::new();

        let outcome = match self.bypass_reason(endpoint) {
            Some(reason) => {
                info!("{}: skipping oracle ({})", id, reason);
                transitions.push(SynthesisState::ComplexityBypass { reason });
                None
            }
            None => match self.ask_oracle(endpoint).await {
                Ok(candidates) => {
                    let accepted = self.validate_all(endpoint, &candidates, &mut dropped);
                    if accepted.is_empty() {
                        warn!(
                            "{}: oracle returned {} candidate(s), none usable",
                            id,
                            candidates.len()
                        );
                        transitions.push(SynthesisState::OracleFailed {
                            reason: "no_usable_candidates".to_string(),
                        });
                        None
                    } else {
                        transitions.push(SynthesisState::OracleAccepted);
                        Some(accepted)
                    }
                }
                Err(err) => {
                    if err == OracleUnavailableError::NotConfigured {
                        debug!("{}: {}", id, err);
                    } else {
                        warn!("{}: {}, using fallback", id, err);
                    }
                    transitions.push(SynthesisState::OracleFailed {
                        reason: err.reason().to_string(),
                    });
                    None
                }
            },
        };

        let mut topped_up = Vec::new();
        let mut scenarios = match outcome {
            Some(mut accepted) => {
                for category in Category::all() {
                    if !accepted.iter().any(|s| s.category == *category) {
                        debug!("{}: topping up {} from fallback", id, category);
                        accepted.push(fallback_scenario(endpoint, *category));
                        topped_up.push(*category);
                    }
                }
                accepted
            }
            None => {
                transitions.push(SynthesisState::FallbackGenerated);
                fallback_scenarios(endpoint)
            }
        };

        scenarios.sort_by_key(|s| s.category);
        assign_ids(&id, &mut scenarios);

        for candidate in &dropped {
            debug!("{}: dropped candidate #{}: {}", id, candidate.index, candidate.reason);
        }
        info!(
            "{}: {} scenario(s), {} dropped, {} from fallback",
            id,
            scenarios.len(),
            dropped.len(),
            scenarios
                .iter()
                .filter(|s| s.origin == ScenarioOrigin::Fallback)
                .count()
        );

        EndpointSynthesis {
            endpoint: id,
            scenarios,
            transitions,
            dropped,
            topped_up,
        }
    }

    fn bypass_reason(&self, endpoint: &EndpointDescriptor) -> Option<String> {
        let complexity = endpoint.schema_complexity();
        if complexity > self.settings.complexity_threshold {
            return Some(format!(
                "schema complexity {} exceeds threshold {}",
                complexity, self.settings.complexity_threshold
            ));
        }
        let prompt_len = OracleRequest::new(endpoint, self.settings.count_per_category)
            .prompt()
            .len();
        if prompt_len > self.settings.max_prompt_bytes {
            return Some(format!(
                "prompt of {} bytes exceeds budget of {}",
                prompt_len, self.settings.max_prompt_bytes
            ));
        }
        None
    }

    async fn ask_oracle(
        &self,
        endpoint: &EndpointDescriptor,
    ) -> Result<Vec<Value>, OracleUnavailableError> {
        let oracle = self
            .oracle
            .as_ref()
            .ok_or(OracleUnavailableError::NotConfigured)?;
        let request = OracleRequest::new(endpoint, self.settings.count_per_category);

        let raw = tokio::time::timeout(self.settings.oracle_timeout, oracle.propose(&request))
            .await
            .map_err(|_| OracleUnavailableError::Timeout(self.settings.oracle_timeout))??;

        if raw.len() > self.settings.max_response_bytes {
            return Err(OracleUnavailableError::SizeExceeded {
                limit: self.settings.max_response_bytes,
                actual: raw.len(),
            });
        }
        parse_envelope(&raw)
    }

    fn validate_all(
        &self,
        endpoint: &EndpointDescriptor,
        candidates: &[Value],
        dropped: &mut Vec<DroppedCandidate>,
    ) -> Vec<TestScenario> {
        let id = endpoint.id();
        let mut per_category: BTreeMap<Category, usize> = BTreeMap::new();
        let mut accepted = Vec::new();

        for (index, candidate) in candidates.iter().enumerate() {
            let result = validate_candidate(endpoint, candidate).and_then(|scenario| {
                let count = per_category.entry(scenario.category).or_default();
                if *count >= self.settings.count_per_category {
                    Err(DropReason::OverQuota(scenario.category))
                } else {
                    *count += 1;
                    Ok(scenario)
                }
            });
            match result {
                Ok(scenario) => accepted.push(scenario),
                Err(reason) => dropped.push(DroppedCandidate {
                    endpoint: id.clone(),
                    index,
                    reason,
                }),
            }
        }
        accepted
    }
}

/// Renumbers scenario ids per category in list order.
fn assign_ids(endpoint: &EndpointId, scenarios: &mut [TestScenario]) {
    let mut ordinals: BTreeMap<Category, usize> = BTreeMap::new();
    for scenario in scenarios {
        let ordinal = ordinals.entry(scenario.category).or_default();
        *ordinal += 1;
        scenario.id = scenario_id(endpoint, scenario.category, *ordinal);
    }
}

/// Extracts the `scenarios` array from the oracle's raw text.
///
/// The text must be a JSON object with a `scenarios` array. Surrounding prose
/// or a code fence is tolerated by taking the outermost `{ ... }`.
pub fn parse_envelope(raw: &str) -> Result<Vec<Value>, OracleUnavailableError> {
    let trimmed = raw.trim();
    let envelope = match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => value,
        Err(direct) => {
            let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) else {
                return Err(OracleUnavailableError::Malformed(format!(
                    "no JSON object in response: {}",
                    direct
                )));
            };
            if end < start {
                return Err(OracleUnavailableError::Malformed(
                    "no JSON object in response".to_string(),
                ));
            }
            serde_json::from_str::<Value>(&trimmed[start..=end])
                .map_err(|e| OracleUnavailableError::Malformed(e.to_string()))?
        }
    };

    match envelope {
        Value::Object(mut map) => match map.remove("scenarios") {
            Some(Value::Array(items)) => Ok(items),
            Some(_) => Err(OracleUnavailableError::Malformed(
                "`scenarios` is not an array".to_string(),
            )),
            None => Err(OracleUnavailableError::Malformed(
                "response has no `scenarios` field".to_string(),
            )),
        },
        _ => Err(OracleUnavailableError::Malformed(
            "response is not a JSON object".to_string(),
        )),
    }
}

/// Validates and repairs one candidate. The returned scenario has a
/// provisional id; ids are assigned once the endpoint's list is final.
pub fn validate_candidate(
    endpoint: &EndpointDescriptor,
    candidate: &Value,
) -> Result<TestScenario, DropReason> {
    let candidate = candidate.as_object().ok_or(DropReason::NotAnObject)?;
    let id = endpoint.id();

    let category = match candidate.get("category") {
        None | Some(Value::Null) => return Err(DropReason::MissingCategory),
        Some(Value::String(raw)) => {
            Category::parse(raw).ok_or_else(|| DropReason::UnknownCategory(raw.trim().to_string()))?
        }
        Some(other) => return Err(DropReason::UnknownCategory(other.to_string())),
    };

    if let Some(named) = candidate.get("endpoint").filter(|v| !v.is_null()) {
        let matches = named
            .as_str()
            .and_then(EndpointId::parse)
            .is_some_and(|named| named.method == id.method && normalize_path(&named.path) == id.path);
        if !matches {
            return Err(DropReason::EndpointMismatch(text_of(named)));
        }
    }

    let empty = Map::new();
    let raw_request = candidate
        .get("request")
        .and_then(Value::as_object)
        .unwrap_or(&empty);
    let request = repair_request(endpoint, raw_request)?;

    let status_value = candidate
        .get("expected_status")
        .or_else(|| candidate.get("status"));
    let status = match status_value {
        None | Some(Value::Null) => return Err(DropReason::MissingStatus),
        Some(value) => ExpectedStatus::from_value(value)
            .ok_or_else(|| DropReason::InvalidStatus(value.to_string()))?,
    };

    let assertions = candidate.get("assertions");
    let flag = |name: &str| {
        assertions
            .and_then(|a| a.get(name))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    };
    let required_fields = assertions
        .and_then(|a| a.get("required_fields"))
        .and_then(Value::as_array)
        .map(|fields| {
            fields
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let intent = ["description", "intent", "scenario_name"]
        .iter()
        .filter_map(|key| candidate.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("{} scenario for {}", category, id));

    Ok(TestScenario {
        id: scenario_id(&id, category, 0),
        category,
        endpoint: id,
        intent,
        origin: ScenarioOrigin::Oracle,
        request,
        expectation: Expectation {
            status,
            json_body: flag("json_body"),
            required_fields,
            non_empty_body: flag("non_empty_body"),
        },
    })
}

fn repair_request(
    endpoint: &EndpointDescriptor,
    raw: &Map<String, Value>,
) -> Result<ScenarioRequest, DropReason> {
    let section = |name: &str| -> BTreeMap<String, Value> {
        raw.get(name)
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .map(|(k, v)| (k.trim().to_string(), trim_strings(v)))
                    .collect()
            })
            .unwrap_or_default()
    };

    let path_params = section("path_params");
    let placeholders = endpoint.placeholders();
    for name in &placeholders {
        match path_params.get(name) {
            None => return Err(DropReason::MissingPathParam(name.clone())),
            Some(Value::String(_) | Value::Number(_) | Value::Bool(_)) => {}
            Some(_) => return Err(DropReason::InvalidPathValue(name.clone())),
        }
    }
    // Only declared placeholders may be supplied.
    if let Some(extra) = path_params.keys().find(|key| !placeholders.contains(key)) {
        return Err(DropReason::UndeclaredPathParam(extra.clone()));
    }

    let query = section("query");
    if let Some(missing) = endpoint
        .required_params(ParamLocation::Query)
        .find(|p| !query.contains_key(&p.name))
    {
        return Err(DropReason::MissingQueryParam(missing.name.clone()));
    }

    let headers = section("headers")
        .into_iter()
        .filter_map(|(name, value)| match value {
            Value::String(s) => Some((name, s)),
            Value::Number(n) => Some((name, n.to_string())),
            Value::Bool(b) => Some((name, b.to_string())),
            _ => None,
        })
        .collect();

    let body = match raw.get("body") {
        None | Some(Value::Null) => None,
        Some(body) => Some(body.clone()),
    };

    Ok(ScenarioRequest {
        path_params,
        query,
        headers,
        body,
        omit_auth: raw
            .get("omit_auth")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

fn trim_strings(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.trim().to_string()),
        other => other.clone(),
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}
