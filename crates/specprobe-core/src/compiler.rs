//! Compiles validated scenarios into executable, self-contained units.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::assertions::Assertion;
use crate::error::CompilationError;
use crate::model::{
    ApiModel, AuthPlan, CompiledTestUnit, EndpointDescriptor, EndpointId, ParamLocation,
    ResolvedRequest, TestScenario, placeholders,
};
use crate::synthesizer::EndpointSynthesis;

/// A scenario that failed to compile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileDefect {
    pub scenario_id: String,
    pub endpoint: EndpointId,
    pub error: String,
}

/// Output of compiling a whole scenario set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompiledSuite {
    /// Units in endpoint order, then scenario order.
    pub units: Vec<CompiledTestUnit>,
    pub defects: Vec<CompileDefect>,
}

/// Resolves scenarios against a base URL.
#[derive(Debug, Clone)]
pub struct TestArtifactCompiler {
    base_url: Url,
}

impl TestArtifactCompiler {
    pub fn new(base_url: &str) -> Result<Self, CompilationError> {
        let invalid = |reason: String| CompilationError::InvalidUrl {
            url: base_url.to_string(),
            reason,
        };
        let url = Url::parse(base_url.trim()).map_err(|e| invalid(e.to_string()))?;
        if url.cannot_be_a_base() {
            return Err(invalid("cannot be used as a base".to_string()));
        }
        Ok(Self { base_url: url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Compiles every scenario. Failures become defects; the rest still compile.
    pub fn compile_all(&self, model: &ApiModel, syntheses: &[EndpointSynthesis]) -> CompiledSuite {
        let mut suite = CompiledSuite::default();
        for synthesis in syntheses {
            let Some(endpoint) = model.endpoint(&synthesis.endpoint) else {
                for scenario in &synthesis.scenarios {
                    suite.defects.push(CompileDefect {
                        scenario_id: scenario.id.clone(),
                        endpoint: synthesis.endpoint.clone(),
                        error: format!("endpoint {} is not in the model", synthesis.endpoint),
                    });
                }
                continue;
            };
            for scenario in &synthesis.scenarios {
                match self.compile(scenario, endpoint) {
                    Ok(unit) => suite.units.push(unit),
                    Err(err) => {
                        warn!("Dropping scenario {}: {}", scenario.id, err);
                        suite.defects.push(CompileDefect {
                            scenario_id: scenario.id.clone(),
                            endpoint: scenario.endpoint.clone(),
                            error: err.to_string(),
                        });
                    }
                }
            }
        }
        debug!(
            "Compiled {} unit(s), {} defect(s)",
            suite.units.len(),
            suite.defects.len()
        );
        suite
    }

    /// Compiles one scenario against its endpoint.
    pub fn compile(
        &self,
        scenario: &TestScenario,
        endpoint: &EndpointDescriptor,
    ) -> Result<CompiledTestUnit, CompilationError> {
        let id = endpoint.id();
        if scenario.endpoint != id {
            return Err(CompilationError::EndpointMismatch {
                scenario: scenario.endpoint.to_string(),
                endpoint: id.to_string(),
            });
        }

        let url = self.resolve_url(scenario, endpoint)?;
        let request = ResolvedRequest {
            method: endpoint.method,
            url: url.to_string(),
            headers: build_headers(scenario),
            body: scenario.request.body.clone(),
        };

        let auth = if endpoint.auth.is_none() {
            AuthPlan::None
        } else if scenario.request.omit_auth {
            AuthPlan::Withheld
        } else {
            AuthPlan::Inject {
                requirement: endpoint.auth.clone(),
            }
        };

        Ok(CompiledTestUnit {
            id: scenario.id.clone(),
            scenario_id: scenario.id.clone(),
            endpoint: id,
            category: scenario.category,
            origin: scenario.origin,
            intent: scenario.intent.clone(),
            request,
            auth,
            assertions: build_assertions(scenario),
        })
    }

    fn resolve_url(
        &self,
        scenario: &TestScenario,
        endpoint: &EndpointDescriptor,
    ) -> Result<Url, CompilationError> {
        let names: BTreeSet<String> = placeholders(&endpoint.path).into_iter().collect();
        if let Some(unknown) = scenario
            .request
            .path_params
            .keys()
            .find(|name| !names.contains(*name))
        {
            return Err(CompilationError::UnknownPathParam(unknown.clone()));
        }

        let mut values: BTreeMap<&str, String> = BTreeMap::new();
        for name in &names {
            let value = scenario
                .request
                .path_params
                .get(name)
                .filter(|v| !v.is_null())
                .or_else(|| {
                    endpoint
                        .param(name, ParamLocation::Path)
                        .and_then(|p| p.example.as_ref())
                })
                .ok_or_else(|| CompilationError::UnresolvedPathParam(name.clone()))?;
            values.insert(name.as_str(), value_text(value));
        }

        // Empty segments are kept so a declared trailing slash survives.
        let segments: Vec<String> = endpoint
            .path
            .trim_start_matches('/')
            .split('/')
            .map(|segment| substitute(segment, &values))
            .collect();

        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| CompilationError::InvalidUrl {
                    url: self.base_url.to_string(),
                    reason: "cannot be used as a base".to_string(),
                })?;
            path.pop_if_empty().extend(segments.iter().map(String::as_str));
        }

        if !scenario.request.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &scenario.request.query {
                match value {
                    Value::Array(items) => {
                        for item in items {
                            pairs.append_pair(key, &value_text(item));
                        }
                    }
                    other => {
                        pairs.append_pair(key, &value_text(other));
                    }
                }
            }
        }
        Ok(url)
    }
}

/// Replaces `{name}` occurrences inside a single path segment.
fn substitute(segment: &str, values: &BTreeMap<&str, String>) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut rest = segment;
    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start..].find('}') else {
            break;
        };
        let name = &rest[start + 1..start + len];
        out.push_str(&rest[..start]);
        match values.get(name) {
            Some(value) => out.push_str(value),
            None => out.push_str(&rest[start..=start + len]),
        }
        rest = &rest[start + len + 1..];
    }
    out.push_str(rest);
    out
}

/// Text form of a JSON value for paths, query strings and headers.
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn build_headers(scenario: &TestScenario) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    headers.insert("Accept".to_string(), "application/json".to_string());
    if scenario.request.body.is_some() {
        headers.insert("Content-Type".to_string(), "application/json".to_string());
    }
    for (name, value) in &scenario.request.headers {
        headers.retain(|existing: &String, _| !existing.eq_ignore_ascii_case(name));
        headers.insert(name.clone(), value.clone());
    }
    headers
}

fn build_assertions(scenario: &TestScenario) -> Vec<Assertion> {
    let expectation = &scenario.expectation;
    let mut assertions = vec![Assertion::Status {
        expected: expectation.status,
    }];
    if expectation.json_body {
        assertions.push(Assertion::JsonBody);
    }
    if !expectation.required_fields.is_empty() {
        assertions.push(Assertion::RequiredFields {
            fields: expectation.required_fields.clone(),
        });
    }
    if expectation.non_empty_body {
        assertions.push(Assertion::NonEmptyBody);
    }
    assertions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        AuthRequirement, Category, ExpectedStatus, Expectation, HttpMethod, ParamType, Parameter,
        ScenarioOrigin, ScenarioRequest,
    };
    use serde_json::json;

    fn endpoint(path: &str, auth: AuthRequirement) -> EndpointDescriptor {
        EndpointDescriptor {
            method: HttpMethod::Get,
            path: path.to_string(),
            operation_id: None,
            summary: String::new(),
            tags: vec![],
            parameters: placeholders(path)
                .into_iter()
                .map(|name| Parameter {
                    name,
                    location: ParamLocation::Path,
                    required: true,
                    param_type: ParamType::String,
                    schema: json!({"type": "string"}),
                    example: None,
                })
                .collect(),
            request_body: None,
            response_codes: vec!["200".to_string()],
            auth,
        }
    }

    fn scenario(ep: &EndpointDescriptor, request: ScenarioRequest) -> TestScenario {
        TestScenario {
            id: "get_posts_id.positive.1".to_string(),
            category: Category::Positive,
            endpoint: ep.id(),
            intent: "fetch".to_string(),
            origin: ScenarioOrigin::Oracle,
            request,
            expectation: Expectation::status(ExpectedStatus::Exact(200)),
        }
    }

    fn with_path(pairs: &[(&str, Value)]) -> ScenarioRequest {
        ScenarioRequest {
            path_params: pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
            ..ScenarioRequest::default()
        }
    }

    #[test]
    fn test_path_substitution_is_encoded() {
        let compiler = TestArtifactCompiler::new("https://api.example.com/v1/").unwrap();
        let ep = endpoint("/posts/{id}", AuthRequirement::None);
        let unit = compiler
            .compile(&scenario(&ep, with_path(&[("id", json!("a b/{c}"))])), &ep)
            .unwrap();
        assert_eq!(unit.request.url, "https://api.example.com/v1/posts/a%20b%2F%7Bc%7D");
        assert!(!unit.request.url.contains('{'));
    }

    #[test]
    fn test_trailing_slash_is_kept() {
        let compiler = TestArtifactCompiler::new("http://h/api").unwrap();
        let ep = endpoint("/items/", AuthRequirement::None);
        let unit = compiler.compile(&scenario(&ep, ScenarioRequest::default()), &ep).unwrap();
        assert_eq!(unit.request.url, "http://h/api/items/");

        let root = endpoint("/", AuthRequirement::None);
        let unit = compiler.compile(&scenario(&root, ScenarioRequest::default()), &root).unwrap();
        assert_eq!(unit.request.url, "http://h/api/");
    }

    #[test]
    fn test_declared_example_fills_missing_value() {
        let compiler = TestArtifactCompiler::new("http://localhost:8080").unwrap();
        let mut ep = endpoint("/posts/{id}", AuthRequirement::None);
        ep.parameters[0].example = Some(json!(7));
        let unit = compiler.compile(&scenario(&ep, ScenarioRequest::default()), &ep).unwrap();
        assert_eq!(unit.request.url, "http://localhost:8080/posts/7");
    }

    #[test]
    fn test_query_string_shapes() {
        let compiler = TestArtifactCompiler::new("http://localhost").unwrap();
        let ep = endpoint("/search", AuthRequirement::None);
        let mut request = ScenarioRequest::default();
        request.query.insert("tag".to_string(), json!(["a", "b"]));
        request.query.insert("empty".to_string(), Value::Null);
        request.query.insert("filter".to_string(), json!({"x": 1}));
        let unit = compiler.compile(&scenario(&ep, request), &ep).unwrap();
        assert_eq!(
            unit.request.url,
            "http://localhost/search?empty=&filter=%7B%22x%22%3A1%7D&tag=a&tag=b"
        );
    }

    #[test]
    fn test_headers_and_assertions() {
        let compiler = TestArtifactCompiler::new("http://localhost").unwrap();
        let ep = endpoint("/posts", AuthRequirement::None);
        let mut request = ScenarioRequest {
            body: Some(json!({"title": "x"})),
            ..ScenarioRequest::default()
        };
        request.headers.insert("accept".to_string(), "text/plain".to_string());
        let mut sc = scenario(&ep, request);
        sc.expectation.json_body = true;
        sc.expectation.required_fields = vec!["id".to_string()];
        let unit = compiler.compile(&sc, &ep).unwrap();

        assert_eq!(unit.request.headers.get("accept").map(String::as_str), Some("text/plain"));
        assert!(!unit.request.headers.contains_key("Accept"));
        assert_eq!(
            unit.request.headers.get("Content-Type").map(String::as_str),
            Some("application/json")
        );
        let names: Vec<&str> = unit.assertions.iter().map(Assertion::name).collect();
        assert_eq!(names, vec!["status_code", "json_body", "required_fields"]);
    }

    #[test]
    fn test_auth_plan() {
        let compiler = TestArtifactCompiler::new("http://localhost").unwrap();
        let open = endpoint("/open", AuthRequirement::None);
        let mut request = ScenarioRequest::default();
        request.omit_auth = true;
        let unit = compiler.compile(&scenario(&open, request.clone()), &open).unwrap();
        assert_eq!(unit.auth, AuthPlan::None);

        let secured = endpoint("/secured", AuthRequirement::Bearer);
        let withheld = compiler.compile(&scenario(&secured, request), &secured).unwrap();
        assert_eq!(withheld.auth, AuthPlan::Withheld);
        let injected = compiler
            .compile(&scenario(&secured, ScenarioRequest::default()), &secured)
            .unwrap();
        assert_eq!(
            injected.auth,
            AuthPlan::Inject {
                requirement: AuthRequirement::Bearer
            }
        );
    }

    #[test]
    fn test_compile_is_deterministic() {
        let compiler = TestArtifactCompiler::new("http://localhost").unwrap();
        let ep = endpoint("/users/{userId}/posts/{id}", AuthRequirement::None);
        let mut request = with_path(&[("userId", json!(3)), ("id", json!(9))]);
        request.query.insert("b".to_string(), json!(2));
        request.query.insert("a".to_string(), json!(1));
        let sc = scenario(&ep, request);
        assert_eq!(compiler.compile(&sc, &ep), compiler.compile(&sc, &ep));
    }

    #[test]
    fn test_compilation_errors() {
        let compiler = TestArtifactCompiler::new("http://localhost").unwrap();
        let ep = endpoint("/posts/{id}", AuthRequirement::None);

        assert_eq!(
            compiler.compile(&scenario(&ep, ScenarioRequest::default()), &ep),
            Err(CompilationError::UnresolvedPathParam("id".to_string()))
        );
        assert_eq!(
            compiler.compile(&scenario(&ep, with_path(&[("id", json!(1)), ("slug", json!("x"))])), &ep),
            Err(CompilationError::UnknownPathParam("slug".to_string()))
        );

        let other = endpoint("/users", AuthRequirement::None);
        assert!(matches!(
            compiler.compile(&scenario(&other, ScenarioRequest::default()), &ep),
            Err(CompilationError::EndpointMismatch { .. })
        ));

        assert!(matches!(
            TestArtifactCompiler::new("not a url"),
            Err(CompilationError::InvalidUrl { .. })
        ));
        assert!(matches!(
            TestArtifactCompiler::new("mailto:someone@example.com"),
            Err(CompilationError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_partial_segment_substitution() {
        let values = BTreeMap::from([("name", "report".to_string())]);
        assert_eq!(substitute("{name}.json", &values), "report.json");
        assert_eq!(substitute("plain", &values), "plain");
    }
}
