//! Oracle that replays scripted answers.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::OracleUnavailableError;
use crate::oracle::{OracleRequest, ScenarioOracle};

/// Returns scripted replies in order; the last one repeats once exhausted.
///
/// Clones share state, so a clone kept by a test observes the calls made
/// through the copy handed to the synthesizer.
#[derive(Debug, Clone, Default)]
pub struct ScriptedOracle {
    state: Arc<Mutex<OracleState>>,
}

#[derive(Debug, Default)]
struct OracleState {
    replies: Vec<Result<String, OracleUnavailableError>>,
    current: usize,
    delay: Option<Duration>,
    endpoint_delays: BTreeMap<String, Duration>,
    requests: Vec<OracleRequest>,
    received_at: Vec<Instant>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a raw text answer.
    pub fn with_response(self, text: impl Into<String>) -> Self {
        self.lock().replies.push(Ok(text.into()));
        self
    }

    /// Queues a failure.
    pub fn with_error(self, error: OracleUnavailableError) -> Self {
        self.lock().replies.push(Err(error));
        self
    }

    /// Delays every answer (use with paused tokio time).
    pub fn with_delay(self, delay: Duration) -> Self {
        self.lock().delay = Some(delay);
        self
    }

    /// Delays answers for one endpoint (`"GET /slow"`), overriding
    /// [`with_delay`](Self::with_delay).
    pub fn with_endpoint_delay(self, endpoint: &str, delay: Duration) -> Self {
        self.lock().endpoint_delays.insert(endpoint.to_string(), delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.lock().requests.len()
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<OracleRequest> {
        self.lock().requests.clone()
    }

    /// When each request arrived, paired with its endpoint, in arrival order.
    pub fn arrivals(&self) -> Vec<(String, Instant)> {
        let state = self.lock();
        state
            .requests
            .iter()
            .map(|r| r.endpoint.clone())
            .zip(state.received_at.iter().copied())
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, OracleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ScenarioOracle for ScriptedOracle {
    async fn propose(&self, request: &OracleRequest) -> Result<String, OracleUnavailableError> {
        let (reply, delay) = {
            let mut state = self.lock();
            state.requests.push(request.clone());
            state.received_at.push(Instant::now());
            let reply = match state.replies.get(state.current).or(state.replies.last()) {
                Some(reply) => reply.clone(),
                None => Err(OracleUnavailableError::Malformed(
                    "no scripted response".to_string(),
                )),
            };
            state.current += 1;
            let delay = state
                .endpoint_delays
                .get(&request.endpoint)
                .copied()
                .or(state.delay);
            (reply, delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        reply
    }
}
