//! Transport that answers from a routing table instead of the network.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::transport::{ExecutionTransportError, HttpTransport, ObservedResponse, PreparedRequest};

/// One scripted answer.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Respond {
        status: u16,
        headers: BTreeMap<String, String>,
        body: Vec<u8>,
        delay: Option<Duration>,
    },
    Fail(ExecutionTransportError),
}

impl ScriptedReply {
    /// Empty-bodied response.
    pub fn status(status: u16) -> Self {
        ScriptedReply::Respond {
            status,
            headers: BTreeMap::new(),
            body: Vec::new(),
            delay: None,
        }
    }

    pub fn json(status: u16, body: &Value) -> Self {
        ScriptedReply::Respond {
            status,
            headers: BTreeMap::from([(
                "content-type".to_string(),
                "application/json".to_string(),
            )]),
            body: body.to_string().into_bytes(),
            delay: None,
        }
    }

    pub fn text(status: u16, body: &str) -> Self {
        ScriptedReply::Respond {
            status,
            headers: BTreeMap::from([("content-type".to_string(), "text/plain".to_string())]),
            body: body.as_bytes().to_vec(),
            delay: None,
        }
    }

    /// Answers only after `after` has elapsed.
    pub fn delayed(self, after: Duration) -> Self {
        match self {
            ScriptedReply::Respond {
                status,
                headers,
                body,
                ..
            } => ScriptedReply::Respond {
                status,
                headers,
                body,
                delay: Some(after),
            },
            fail => fail,
        }
    }
}

/// Routes requests by URL substring. Each route replays its queue in order
/// and repeats its last reply; unmatched requests get the default reply.
///
/// Clones share state.
#[derive(Debug, Clone)]
pub struct ScriptedTransport {
    state: Arc<Mutex<TransportState>>,
}

#[derive(Debug)]
struct TransportState {
    routes: Vec<(String, VecDeque<ScriptedReply>)>,
    default: ScriptedReply,
    requests: Vec<PreparedRequest>,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TransportState {
                routes: Vec::new(),
                default: ScriptedReply::json(200, &Value::Object(serde_json::Map::new())),
                requests: Vec::new(),
            })),
        }
    }

    /// Appends `reply` to the queue of the route matching `url_fragment`.
    pub fn on(self, url_fragment: &str, reply: ScriptedReply) -> Self {
        {
            let mut state = self.lock();
            match state.routes.iter_mut().find(|(f, _)| f == url_fragment) {
                Some((_, queue)) => queue.push_back(reply),
                None => state
                    .routes
                    .push((url_fragment.to_string(), VecDeque::from([reply]))),
            }
        }
        self
    }

    pub fn with_default(self, reply: ScriptedReply) -> Self {
        self.lock().default = reply;
        self
    }

    /// Requests sent so far, in arrival order.
    pub fn requests(&self) -> Vec<PreparedRequest> {
        self.lock().requests.clone()
    }

    pub fn call_count(&self) -> usize {
        self.lock().requests.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TransportState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_reply(&self, request: &PreparedRequest) -> ScriptedReply {
        let mut state = self.lock();
        state.requests.push(request.clone());
        let index = state
            .routes
            .iter()
            .position(|(fragment, _)| request.url.contains(fragment.as_str()));
        let Some(index) = index else {
            return state.default.clone();
        };
        let queue = &mut state.routes[index].1;
        let reply = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        reply.unwrap_or_else(|| ScriptedReply::status(500))
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(
        &self,
        request: &PreparedRequest,
    ) -> Result<ObservedResponse, ExecutionTransportError> {
        match self.next_reply(request) {
            ScriptedReply::Respond {
                status,
                headers,
                body,
                delay,
            } => {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                Ok(ObservedResponse::new(status, headers, body))
            }
            ScriptedReply::Fail(err) => Err(err),
        }
    }
}
