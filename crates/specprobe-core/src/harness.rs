//! Executes compiled units against the live target.
//!
//! Units are independent: each one prepares its own request, measures its own
//! latency from dispatch and yields exactly one [`TestOutcome`]. At most
//! `concurrency` units are in flight, and outcomes come back in input order
//! whatever order they finish in.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::assertions::first_failure;
use crate::config::{AuthConfig, ExecutionConfig};
use crate::model::{
    ApiKeyLocation, AuthPlan, AuthRequirement, CompiledTestUnit, FailureDetail, OutcomeStatus,
    TestOutcome,
};
use crate::transport::{
    ExecutionTransportError, HttpTransport, ObservedResponse, PreparedRequest, TransportErrorKind,
};

/// Timeouts and limits the harness enforces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessSettings {
    pub concurrency: usize,
    pub unit_timeout: Duration,
    pub suite_timeout: Option<Duration>,
    pub max_transport_retries: u32,
}

impl From<&ExecutionConfig> for HarnessSettings {
    fn from(config: &ExecutionConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            unit_timeout: config.unit_timeout(),
            suite_timeout: config.suite_timeout(),
            max_transport_retries: config.max_transport_retries,
        }
    }
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self::from(&ExecutionConfig::default())
    }
}

/// Runs units through an [`HttpTransport`].
pub struct ExecutionHarness {
    transport: Arc<dyn HttpTransport>,
    auth: AuthConfig,
    settings: HarnessSettings,
}

enum Prepared {
    Ready(PreparedRequest),
    Skip(String),
    Broken(String),
}

impl ExecutionHarness {
    pub fn new(transport: Arc<dyn HttpTransport>, auth: AuthConfig, settings: HarnessSettings) -> Self {
        Self {
            transport,
            auth,
            settings,
        }
    }

    /// Executes every unit and returns one outcome per unit, in input order.
    pub async fn execute(&self, units: &[CompiledTestUnit]) -> Vec<TestOutcome> {
        let deadline = self.settings.suite_timeout.map(|d| Instant::now() + d);
        info!(
            "Executing {} unit(s) with concurrency {}",
            units.len(),
            self.settings.concurrency
        );

        // A slot frees as soon as its unit finishes; order is restored after.
        let mut indexed: Vec<(usize, TestOutcome)> = stream::iter(units.iter().enumerate())
            .map(|(index, unit)| async move {
                (index, self.execute_within_deadline(unit, deadline).await)
            })
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;
        indexed.sort_by_key(|(index, _)| *index);
        let outcomes: Vec<TestOutcome> = indexed.into_iter().map(|(_, outcome)| outcome).collect();

        let passed = outcomes
            .iter()
            .filter(|o| o.status == OutcomeStatus::Passed)
            .count();
        info!("Executed {} unit(s): {} passed", outcomes.len(), passed);
        outcomes
    }

    async fn execute_within_deadline(
        &self,
        unit: &CompiledTestUnit,
        deadline: Option<Instant>,
    ) -> TestOutcome {
        let Some(deadline) = deadline else {
            return self.execute_unit(unit).await;
        };
        let dispatched = Instant::now();
        if dispatched >= deadline {
            warn!("{}: suite deadline passed before dispatch", unit.id);
            return suite_deadline_outcome(unit, Duration::ZERO, 0);
        }
        match tokio::time::timeout_at(deadline, self.execute_unit(unit)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("{}: suite deadline reached while in flight", unit.id);
                suite_deadline_outcome(unit, dispatched.elapsed(), 1)
            }
        }
    }

    /// Executes one unit, retrying transient transport failures.
    pub async fn execute_unit(&self, unit: &CompiledTestUnit) -> TestOutcome {
        let request = match self.prepare(unit) {
            Prepared::Ready(request) => request,
            Prepared::Skip(reason) => {
                debug!("{}: skipped ({})", unit.id, reason);
                return outcome(
                    unit,
                    OutcomeStatus::Skipped,
                    None,
                    Duration::ZERO,
                    0,
                    Some(FailureDetail::Precondition { reason }),
                );
            }
            Prepared::Broken(message) => {
                return outcome(
                    unit,
                    OutcomeStatus::Errored,
                    None,
                    Duration::ZERO,
                    0,
                    Some(FailureDetail::Transport {
                        error: TransportErrorKind::Other,
                        message,
                    }),
                );
            }
        };

        let started = Instant::now();
        let mut attempts: u32 = 0;
        let result = tokio::time::timeout(
            self.settings.unit_timeout,
            self.send_with_retries(unit, &request, &mut attempts),
        )
        .await;
        let latency = started.elapsed();

        match result {
            Ok(Ok(response)) => classify(unit, &response, latency, attempts),
            Ok(Err(err)) => {
                debug!("{}: transport error after {} attempt(s): {}", unit.id, attempts, err);
                outcome(
                    unit,
                    OutcomeStatus::Errored,
                    None,
                    latency,
                    attempts,
                    Some(FailureDetail::Transport {
                        error: err.kind,
                        message: err.message,
                    }),
                )
            }
            Err(_) => {
                let err = ExecutionTransportError::timeout(self.settings.unit_timeout);
                debug!("{}: {}", unit.id, err);
                outcome(
                    unit,
                    OutcomeStatus::Errored,
                    None,
                    latency,
                    attempts,
                    Some(FailureDetail::Transport {
                        error: err.kind,
                        message: err.message,
                    }),
                )
            }
        }
    }

    async fn send_with_retries(
        &self,
        unit: &CompiledTestUnit,
        request: &PreparedRequest,
        attempts: &mut u32,
    ) -> Result<ObservedResponse, ExecutionTransportError> {
        loop {
            *attempts += 1;
            match self.transport.send(request).await {
                Ok(response) => return Ok(response),
                Err(err)
                    if err.kind.is_transient() && *attempts <= self.settings.max_transport_retries =>
                {
                    debug!(
                        "{}: transient error on attempt {}, retrying: {}",
                        unit.id, attempts, err
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Materializes credentials according to the unit's auth plan.
    fn prepare(&self, unit: &CompiledTestUnit) -> Prepared {
        let mut request = PreparedRequest {
            method: unit.request.method,
            url: unit.request.url.clone(),
            headers: unit.request.headers.clone(),
            body: unit.request.body.clone(),
            basic_auth: None,
        };

        let requirement = match &unit.auth {
            AuthPlan::None | AuthPlan::Withheld => return Prepared::Ready(request),
            AuthPlan::Inject { requirement } => requirement,
        };

        match requirement {
            AuthRequirement::None => {}
            AuthRequirement::ApiKey { name, location } => {
                let Some(key) = self.auth.api_key.as_deref() else {
                    return Prepared::Skip("no api key configured".to_string());
                };
                match location {
                    ApiKeyLocation::Header => set_header(&mut request, name, key),
                    ApiKeyLocation::Query => match Url::parse(&request.url) {
                        Ok(mut url) => {
                            url.query_pairs_mut().append_pair(name, key);
                            request.url = url.to_string();
                        }
                        Err(e) => return Prepared::Broken(format!("invalid url: {}", e)),
                    },
                }
            }
            AuthRequirement::Bearer => {
                let Some(token) = self.auth.bearer_token.as_deref() else {
                    return Prepared::Skip("no bearer token configured".to_string());
                };
                set_header(&mut request, "Authorization", &format!("Bearer {}", token));
            }
            AuthRequirement::Basic => {
                let (Some(user), Some(password)) =
                    (self.auth.username.as_deref(), self.auth.password.as_deref())
                else {
                    return Prepared::Skip("no basic auth credentials configured".to_string());
                };
                request
                    .headers
                    .retain(|existing, _| !existing.eq_ignore_ascii_case("authorization"));
                request.basic_auth = Some((user.to_string(), password.to_string()));
            }
        }
        Prepared::Ready(request)
    }
}

fn set_header(request: &mut PreparedRequest, name: &str, value: &str) {
    request
        .headers
        .retain(|existing, _| !existing.eq_ignore_ascii_case(name));
    request.headers.insert(name.to_string(), value.to_string());
}

fn classify(
    unit: &CompiledTestUnit,
    response: &ObservedResponse,
    latency: Duration,
    attempts: u32,
) -> TestOutcome {
    match first_failure(&unit.assertions, response) {
        None => outcome(
            unit,
            OutcomeStatus::Passed,
            Some(response.status),
            latency,
            attempts,
            None,
        ),
        Some(failure) => {
            debug!("{}: {}", unit.id, failure);
            outcome(
                unit,
                OutcomeStatus::Failed,
                Some(response.status),
                latency,
                attempts,
                Some(FailureDetail::Assertion(failure)),
            )
        }
    }
}

fn suite_deadline_outcome(unit: &CompiledTestUnit, latency: Duration, attempts: u32) -> TestOutcome {
    let err = ExecutionTransportError::suite_deadline();
    outcome(
        unit,
        OutcomeStatus::Errored,
        None,
        latency,
        attempts,
        Some(FailureDetail::Transport {
            error: err.kind,
            message: err.message,
        }),
    )
}

fn outcome(
    unit: &CompiledTestUnit,
    status: OutcomeStatus,
    observed_status: Option<u16>,
    latency: Duration,
    attempts: u32,
    detail: Option<FailureDetail>,
) -> TestOutcome {
    TestOutcome {
        unit_id: unit.id.clone(),
        endpoint: unit.endpoint.clone(),
        category: unit.category,
        status,
        observed_status,
        latency,
        attempts,
        detail,
        timestamp: Utc::now(),
    }
}
