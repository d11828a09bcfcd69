//! Data model shared by every pipeline stage.
//!
//! Each stage produces a fresh value of one of these types and never mutates
//! the output of an earlier stage:
//!
//! ```text
//! ApiModel ──▶ TestScenario ──▶ CompiledTestUnit ──▶ TestOutcome ──▶ ReportModel
//! ```

use crate::assertions::{Assertion, AssertionFailure};
use crate::transport::TransportErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// HTTP methods an endpoint can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Options,
    Head,
}

impl HttpMethod {
    /// Returns all methods in the order operations are read from a path item.
    pub fn all() -> &'static [HttpMethod] {
        &[
            HttpMethod::Get,
            HttpMethod::Post,
            HttpMethod::Put,
            HttpMethod::Patch,
            HttpMethod::Delete,
            HttpMethod::Options,
            HttpMethod::Head,
        ]
    }

    /// Returns the upper-case wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Head => "HEAD",
        }
    }

    /// Returns the lower-case key used for operations inside a path item.
    pub fn operation_key(&self) -> &'static str {
        match self {
            HttpMethod::Get => "get",
            HttpMethod::Post => "post",
            HttpMethod::Put => "put",
            HttpMethod::Patch => "patch",
            HttpMethod::Delete => "delete",
            HttpMethod::Options => "options",
            HttpMethod::Head => "head",
        }
    }

    /// Parses a method name, ignoring case.
    pub fn parse(s: &str) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
    }

    /// Whether requests with this method conventionally carry a JSON body.
    pub fn accepts_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of an endpoint: (method, path template).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointId {
    pub method: HttpMethod,
    pub path: String,
}

impl EndpointId {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
        }
    }

    /// Parses the `"GET /posts/{id}"` form.
    pub fn parse(s: &str) -> Option<Self> {
        let (method, path) = s.trim().split_once(char::is_whitespace)?;
        let path = path.trim();
        if !path.starts_with('/') {
            return None;
        }
        Some(Self::new(HttpMethod::parse(method)?, path))
    }

    /// Filesystem/identifier friendly form, e.g. `get_posts_id`.
    pub fn slug(&self) -> String {
        let mut slug = self.method.operation_key().to_string();
        let mut last_underscore = false;
        for c in self.path.chars() {
            if c.is_ascii_alphanumeric() {
                if !last_underscore {
                    slug.push('_');
                }
                slug.push(c.to_ascii_lowercase());
                last_underscore = true;
            } else {
                last_underscore = false;
            }
        }
        if slug == self.method.operation_key() {
            slug.push_str("_root");
        } else if self.path.ends_with('/') {
            // Keeps `/items/` apart from `/items`.
            slug.push_str("_slash");
        }
        slug
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// Where a parameter travels in the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamLocation {
    Path,
    Query,
    Header,
    Body,
}

impl ParamLocation {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "path" => Some(ParamLocation::Path),
            "query" => Some(ParamLocation::Query),
            "header" => Some(ParamLocation::Header),
            "body" | "formData" => Some(ParamLocation::Body),
            _ => None,
        }
    }
}

/// Declared primitive type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    #[default]
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    /// Reads the `type` keyword of a (resolved) schema. Untyped schemas are strings.
    pub fn from_schema(schema: &Value) -> Self {
        match schema.get("type").and_then(Value::as_str) {
            Some("integer") => ParamType::Integer,
            Some("number") => ParamType::Number,
            Some("boolean") => ParamType::Boolean,
            Some("array") => ParamType::Array,
            Some("object") => ParamType::Object,
            _ if schema.get("properties").is_some() => ParamType::Object,
            _ => ParamType::String,
        }
    }

    /// Whether `value` is an acceptable instance of this type.
    pub fn admits(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_str().is_some_and(|s| s.parse::<i64>().is_ok())
            }
            ParamType::Number => {
                value.is_number() || value.as_str().is_some_and(|s| s.parse::<f64>().is_ok())
            }
            ParamType::Boolean => {
                value.is_boolean() || matches!(value.as_str(), Some("true" | "false"))
            }
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
        }
    }
}

/// A single declared parameter after inheritance has been flattened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub location: ParamLocation,
    pub required: bool,
    pub param_type: ParamType,
    /// Resolved schema (`{}` when the description declared none).
    pub schema: Value,
    /// Declared `example` (or schema `example`/`default`), if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<Value>,
}

/// Declared request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestBody {
    pub content_type: String,
    pub required: bool,
    /// Fully `$ref`-resolved schema.
    pub schema: Value,
}

/// Where an API key credential is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyLocation {
    Header,
    Query,
}

/// Authentication an endpoint declares.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthRequirement {
    #[default]
    None,
    ApiKey {
        name: String,
        location: ApiKeyLocation,
    },
    Bearer,
    Basic,
}

impl AuthRequirement {
    pub fn is_none(&self) -> bool {
        matches!(self, AuthRequirement::None)
    }
}

impl fmt::Display for AuthRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthRequirement::None => write!(f, "none"),
            AuthRequirement::ApiKey { name, .. } => write!(f, "api_key ({})", name),
            AuthRequirement::Bearer => write!(f, "bearer"),
            AuthRequirement::Basic => write!(f, "basic"),
        }
    }
}

/// One (method, path) operation of the described API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    pub method: HttpMethod,
    /// Normalized path template using `{name}` placeholders.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub parameters: Vec<Parameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body: Option<RequestBody>,
    /// Declared response keys in document order (`"200"`, `"4XX"`, `"default"`).
    pub response_codes: Vec<String>,
    pub auth: AuthRequirement,
}

impl EndpointDescriptor {
    pub fn id(&self) -> EndpointId {
        EndpointId::new(self.method, self.path.clone())
    }

    /// Looks up a declared parameter by name and location.
    pub fn param(&self, name: &str, location: ParamLocation) -> Option<&Parameter> {
        self.parameters
            .iter()
            .find(|p| p.location == location && p.name == name)
    }

    /// Declared parameters in the given location.
    pub fn params_in(&self, location: ParamLocation) -> impl Iterator<Item = &Parameter> {
        self.parameters.iter().filter(move |p| p.location == location)
    }

    /// Required parameters in the given location.
    pub fn required_params(&self, location: ParamLocation) -> impl Iterator<Item = &Parameter> {
        self.params_in(location).filter(|p| p.required)
    }

    /// Placeholder names in the path template, in order of appearance.
    pub fn placeholders(&self) -> Vec<String> {
        placeholders(&self.path)
    }

    /// The success status a well-formed request should produce: the lowest
    /// declared 2xx code, else the conventional code for the method.
    pub fn success_status(&self) -> u16 {
        self.response_codes
            .iter()
            .filter_map(|code| code.parse::<u16>().ok())
            .filter(|code| (200..300).contains(code))
            .min()
            .unwrap_or(match self.method {
                HttpMethod::Post => 201,
                HttpMethod::Delete => 204,
                _ => 200,
            })
    }

    /// Size of the declared input surface: schema nodes plus parameters.
    pub fn schema_complexity(&self) -> usize {
        let params: usize = self
            .parameters
            .iter()
            .map(|p| 1 + count_schema_nodes(&p.schema))
            .sum();
        let body = self
            .request_body
            .as_ref()
            .map_or(0, |b| count_schema_nodes(&b.schema));
        params + body
    }
}

/// Extracts `{name}` placeholders from a path template.
pub fn placeholders(path: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = path;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                names.push(after[..end].to_string());
                rest = &after[end + 1..];
            }
            None => break,
        }
    }
    names
}

fn count_schema_nodes(schema: &Value) -> usize {
    match schema {
        Value::Object(map) => {
            let mut count = usize::from(!map.is_empty());
            if let Some(Value::Object(props)) = map.get("properties") {
                count += props.values().map(count_schema_nodes).sum::<usize>();
            }
            if let Some(items) = map.get("items") {
                count += count_schema_nodes(items);
            }
            for key in ["allOf", "anyOf", "oneOf"] {
                if let Some(Value::Array(variants)) = map.get(key) {
                    count += variants.iter().map(count_schema_nodes).sum::<usize>();
                }
            }
            if let Some(additional @ Value::Object(_)) = map.get("additionalProperties") {
                count += count_schema_nodes(additional);
            }
            count
        }
        _ => 0,
    }
}

/// Descriptive metadata of the API.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ApiInfo {
    pub title: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
}

/// Normalized API description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiModel {
    pub info: ApiInfo,
    /// Declared server URLs in document order.
    pub servers: Vec<String>,
    pub endpoints: Vec<EndpointDescriptor>,
}

impl ApiModel {
    pub fn endpoint(&self, id: &EndpointId) -> Option<&EndpointDescriptor> {
        self.endpoints
            .iter()
            .find(|e| e.method == id.method && e.path == id.path)
    }
}

/// Test category taxonomy. Closed: candidates outside it are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Positive,
    Negative,
    Edge,
    Security,
}

impl Category {
    pub fn all() -> &'static [Category] {
        &[
            Category::Positive,
            Category::Negative,
            Category::Edge,
            Category::Security,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Positive => "positive",
            Category::Negative => "negative",
            Category::Edge => "edge",
            Category::Security => "security",
        }
    }

    /// Exact taxonomy lookup (case-insensitive). No aliases.
    pub fn parse(s: &str) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which generator produced a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioOrigin {
    Oracle,
    Fallback,
}

/// An HTTP status class (`2xx`, `4xx`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusClass {
    #[serde(rename = "1xx")]
    Informational,
    #[serde(rename = "2xx")]
    Success,
    #[serde(rename = "3xx")]
    Redirection,
    #[serde(rename = "4xx")]
    ClientError,
    #[serde(rename = "5xx")]
    ServerError,
}

impl StatusClass {
    pub fn of(code: u16) -> Option<Self> {
        match code / 100 {
            1 => Some(StatusClass::Informational),
            2 => Some(StatusClass::Success),
            3 => Some(StatusClass::Redirection),
            4 => Some(StatusClass::ClientError),
            5 => Some(StatusClass::ServerError),
            _ => None,
        }
    }

    /// Parses `"4xx"` (also `"4XX"`).
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let mut chars = s.chars();
        let digit = chars.next()?.to_digit(10)?;
        if s.len() != 3 || !chars.all(|c| c == 'x' || c == 'X') {
            return None;
        }
        Self::of((digit * 100) as u16)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusClass::Informational => "1xx",
            StatusClass::Success => "2xx",
            StatusClass::Redirection => "3xx",
            StatusClass::ClientError => "4xx",
            StatusClass::ServerError => "5xx",
        }
    }
}

/// Expected response status: an exact code or a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExpectedStatus {
    Exact(u16),
    Class(StatusClass),
}

impl ExpectedStatus {
    pub fn matches(&self, code: u16) -> bool {
        match self {
            ExpectedStatus::Exact(expected) => *expected == code,
            ExpectedStatus::Class(class) => StatusClass::of(code) == Some(*class),
        }
    }

    /// Reads an expected status from loosely-typed input: `201`, `"201"`, `"4xx"`.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n
                .as_u64()
                .filter(|code| (100..=599).contains(code))
                .map(|code| ExpectedStatus::Exact(code as u16)),
            Value::String(s) => {
                let s = s.trim();
                if let Ok(code) = s.parse::<u16>() {
                    (100..=599)
                        .contains(&code)
                        .then_some(ExpectedStatus::Exact(code))
                } else {
                    StatusClass::parse(s).map(ExpectedStatus::Class)
                }
            }
            _ => None,
        }
    }
}

impl fmt::Display for ExpectedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedStatus::Exact(code) => write!(f, "{}", code),
            ExpectedStatus::Class(class) => f.write_str(class.as_str()),
        }
    }
}

/// Concrete inputs of a scenario.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScenarioRequest {
    #[serde(default)]
    pub path_params: BTreeMap<String, Value>,
    #[serde(default)]
    pub query: BTreeMap<String, Value>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Send without credentials even if the endpoint requires them.
    #[serde(default)]
    pub omit_auth: bool,
}

/// Expected outcome predicate of a scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expectation {
    pub status: ExpectedStatus,
    #[serde(default)]
    pub json_body: bool,
    #[serde(default)]
    pub required_fields: Vec<String>,
    #[serde(default)]
    pub non_empty_body: bool,
}

impl Expectation {
    pub fn status(status: ExpectedStatus) -> Self {
        Self {
            status,
            json_body: false,
            required_fields: Vec::new(),
            non_empty_body: false,
        }
    }
}

/// A validated, synthesized test intent for one endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestScenario {
    /// `<endpoint slug>.<category>.<ordinal>`
    pub id: String,
    pub category: Category,
    pub endpoint: EndpointId,
    pub intent: String,
    pub origin: ScenarioOrigin,
    pub request: ScenarioRequest,
    pub expectation: Expectation,
}

/// How the harness treats credentials for a unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AuthPlan {
    /// Endpoint declares no auth: never inject.
    None,
    /// Inject the configured credential matching this requirement.
    Inject { requirement: AuthRequirement },
    /// Endpoint requires auth but the scenario deliberately sends none.
    Withheld,
}

/// A request ready to be sent as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRequest {
    pub method: HttpMethod,
    /// Absolute URL with path parameters substituted and the query string appended.
    pub url: String,
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// A scenario resolved into an executable request plus assertions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledTestUnit {
    pub id: String,
    pub scenario_id: String,
    pub endpoint: EndpointId,
    pub category: Category,
    pub origin: ScenarioOrigin,
    pub intent: String,
    pub request: ResolvedRequest,
    pub auth: AuthPlan,
    pub assertions: Vec<Assertion>,
}

/// Result classification of one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Passed,
    Failed,
    Errored,
    Skipped,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Passed => "passed",
            OutcomeStatus::Failed => "failed",
            OutcomeStatus::Errored => "errored",
            OutcomeStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a unit did not pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureDetail {
    Assertion(AssertionFailure),
    Transport {
        error: TransportErrorKind,
        message: String,
    },
    Precondition {
        reason: String,
    },
}

impl FailureDetail {
    /// Key used to cluster failures with a shared cause.
    pub fn cluster_key(&self) -> String {
        match self {
            FailureDetail::Assertion(failure) => format!("assertion:{}", failure.assertion),
            FailureDetail::Transport { error, .. } => format!("transport:{}", error.as_str()),
            FailureDetail::Precondition { .. } => "precondition".to_string(),
        }
    }
}

impl fmt::Display for FailureDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureDetail::Assertion(failure) => write!(f, "{}", failure),
            FailureDetail::Transport { message, .. } => f.write_str(message),
            FailureDetail::Precondition { reason } => write!(f, "precondition not met: {}", reason),
        }
    }
}

/// Recorded result of executing one compiled unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub unit_id: String,
    pub endpoint: EndpointId,
    pub category: Category,
    pub status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_status: Option<u16>,
    #[serde(rename = "latency_ms", with = "duration_ms")]
    pub latency: Duration,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<FailureDetail>,
    pub timestamp: DateTime<Utc>,
}

/// Serde helper: `Duration` as fractional milliseconds.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_secs_f64() * 1000.0).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(ms.max(0.0) / 1000.0))
    }
}
