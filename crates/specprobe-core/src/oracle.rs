//! Generative oracle boundary.
//!
//! The synthesizer never trusts what comes back from here: an oracle only
//! returns raw text, and parsing/validation happens on the synthesizer side.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::config::OracleConfig;
use crate::error::OracleUnavailableError;
use crate::model::{Category, EndpointDescriptor};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Bounded structural description of one endpoint sent to the oracle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OracleRequest {
    pub endpoint: String,
    pub summary: String,
    pub parameters: Vec<OracleParam>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<Value>,
    pub responses: Vec<String>,
    pub auth: String,
    pub categories: Vec<Category>,
    pub count_per_category: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OracleParam {
    pub name: String,
    #[serde(rename = "in")]
    pub location: String,
    pub required: bool,
    #[serde(rename = "type")]
    pub param_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example: Option<Value>,
}

impl OracleRequest {
    pub fn new(endpoint: &EndpointDescriptor, count_per_category: usize) -> Self {
        Self {
            endpoint: endpoint.id().to_string(),
            summary: endpoint.summary.clone(),
            parameters: endpoint
                .parameters
                .iter()
                .map(|p| OracleParam {
                    name: p.name.clone(),
                    location: to_json_string(&p.location),
                    required: p.required,
                    param_type: to_json_string(&p.param_type),
                    example: p.example.clone(),
                })
                .collect(),
            request_body: endpoint.request_body.as_ref().map(|b| b.schema.clone()),
            responses: endpoint.response_codes.clone(),
            auth: endpoint.auth.to_string(),
            categories: Category::all().to_vec(),
            count_per_category,
        }
    }

    /// Renders the full prompt text.
    pub fn prompt(&self) -> String {
        let payload = serde_json::to_string_pretty(self).unwrap_or_default();
        format!(
            r#"You are a QA engineer writing HTTP API test scenarios for a single endpoint.

Endpoint:
{payload}

Write up to {count} scenario(s) for EACH category in {categories:?}:
- positive: a valid request that should succeed
- negative: invalid input that the API should reject
- edge: boundary values, empty strings, very large or very small numbers
- security: missing credentials, injection payloads, authorization bypass

Return ONLY a JSON object, no prose, in exactly this shape:
{{"scenarios": [{{
  "category": "positive",
  "endpoint": "{endpoint}",
  "description": "what the scenario checks",
  "request": {{
    "path_params": {{}},
    "query": {{}},
    "headers": {{}},
    "body": null,
    "omit_auth": false
  }},
  "expected_status": 200,
  "assertions": {{"json_body": true, "required_fields": [], "non_empty_body": false}}
}}]}}

Rules:
1. Use literal JSON values, never code expressions.
2. Supply every required path and query parameter.
3. expected_status is an integer status code or a class such as "4xx"."#,
            payload = payload,
            count = self.count_per_category,
            categories = self
                .categories
                .iter()
                .map(Category::as_str)
                .collect::<Vec<_>>(),
            endpoint = self.endpoint,
        )
    }
}

fn to_json_string<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(Value::String(s)) => s,
        _ => String::new(),
    }
}

/// A source of candidate scenarios.
#[async_trait]
pub trait ScenarioOracle: Send + Sync {
    /// Returns the oracle's raw text answer to `request`.
    async fn propose(&self, request: &OracleRequest) -> Result<String, OracleUnavailableError>;
}

/// Oracle backed by the Anthropic Messages API.
pub struct AnthropicOracle {
    client: Client,
    api_key: String,
    config: OracleConfig,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

impl AnthropicOracle {
    pub fn new(api_key: String, config: OracleConfig) -> Result<Self, OracleUnavailableError> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            client,
            api_key,
            config,
        })
    }

    /// Builds an oracle from the key in `config.api_key_env`, if present.
    pub fn from_env(config: OracleConfig) -> Result<Self, OracleUnavailableError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or(OracleUnavailableError::NotConfigured)?;
        Self::new(api_key, config)
    }
}

#[async_trait]
impl ScenarioOracle for AnthropicOracle {
    async fn propose(&self, request: &OracleRequest) -> Result<String, OracleUnavailableError> {
        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));
        let body = json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "messages": [{"role": "user", "content": request.prompt()}],
        });

        debug!("Requesting scenarios for {} from {}", request.endpoint, url);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OracleUnavailableError::Timeout(self.config.timeout())
                } else {
                    OracleUnavailableError::from(e)
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 || status.as_u16() == 529 {
            return Err(OracleUnavailableError::Capacity(status.as_u16()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleUnavailableError::Api {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let bytes = response.bytes().await?;
        // The envelope wraps the text, so allow some headroom over the text limit.
        let limit = self.config.max_response_bytes.saturating_mul(2);
        if bytes.len() > limit {
            return Err(OracleUnavailableError::SizeExceeded {
                limit,
                actual: bytes.len(),
            });
        }
        let parsed: MessagesResponse = serde_json::from_slice(&bytes)
            .map_err(|e| OracleUnavailableError::Malformed(e.to_string()))?;

        let text: String = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text)
            .collect();
        if text.trim().is_empty() {
            return Err(OracleUnavailableError::Malformed(
                "response contained no text content".to_string(),
            ));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AuthRequirement, HttpMethod, ParamLocation, ParamType, Parameter};

    fn endpoint() -> EndpointDescriptor {
        EndpointDescriptor {
            method: HttpMethod::Get,
            path: "/posts/{id}".to_string(),
            operation_id: None,
            summary: "Fetch a post".to_string(),
            tags: vec![],
            parameters: vec![Parameter {
                name: "id".to_string(),
                location: ParamLocation::Path,
                required: true,
                param_type: ParamType::Integer,
                schema: json!({"type": "integer"}),
                example: Some(json!(1)),
            }],
            request_body: None,
            response_codes: vec!["200".to_string(), "404".to_string()],
            auth: AuthRequirement::Bearer,
        }
    }

    #[test]
    fn test_request_summarizes_endpoint() {
        let request = OracleRequest::new(&endpoint(), 2);
        assert_eq!(request.endpoint, "GET /posts/{id}");
        assert_eq!(request.parameters[0].location, "path");
        assert_eq!(request.parameters[0].param_type, "integer");
        assert_eq!(request.auth, "bearer");
        assert_eq!(request.categories.len(), 4);
    }

    #[test]
    fn test_prompt_embeds_payload_and_contract() {
        let prompt = OracleRequest::new(&endpoint(), 2).prompt();
        assert!(prompt.contains("\"endpoint\": \"GET /posts/{id}\""));
        assert!(prompt.contains("Write up to 2 scenario(s)"));
        assert!(prompt.contains("\"scenarios\""));
    }

    #[test]
    fn test_from_env_without_key_is_not_configured() {
        let config = OracleConfig {
            api_key_env: "SPECPROBE_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..OracleConfig::default()
        };
        assert!(matches!(
            AnthropicOracle::from_env(config),
            Err(OracleUnavailableError::NotConfigured)
        ));
    }
}
