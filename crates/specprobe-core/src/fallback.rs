//! Deterministic scenario generation from the declared schema.
//!
//! Used whenever the oracle is unavailable, bypassed or unusable, and to top
//! up categories the oracle left empty. Always produces exactly one scenario
//! per category.

use serde_json::{Map, Value, json};

use crate::model::{
    Category, EndpointDescriptor, EndpointId, ExpectedStatus, Expectation, ParamLocation,
    ParamType, Parameter, ScenarioOrigin, ScenarioRequest, StatusClass, TestScenario,
};

const MAX_DEPTH: usize = 4;
const SQL_INJECTION: &str = "' OR '1'='1";
const SCRIPT_INJECTION: &str = "<script>alert(1)</script>";

/// Builds a scenario id: `<endpoint slug>.<category>.<ordinal>`.
pub fn scenario_id(endpoint: &EndpointId, category: Category, ordinal: usize) -> String {
    format!("{}.{}.{}", endpoint.slug(), category, ordinal)
}

/// One fallback scenario per category, in taxonomy order.
pub fn fallback_scenarios(endpoint: &EndpointDescriptor) -> Vec<TestScenario> {
    Category::all()
        .iter()
        .map(|category| fallback_scenario(endpoint, *category))
        .collect()
}

/// The fallback scenario for a single category.
pub fn fallback_scenario(endpoint: &EndpointDescriptor, category: Category) -> TestScenario {
    let (intent, request, status) = match category {
        Category::Positive => positive(endpoint),
        Category::Negative => negative(endpoint),
        Category::Edge => edge(endpoint),
        Category::Security => security(endpoint),
    };
    let id = endpoint.id();
    TestScenario {
        id: scenario_id(&id, category, 1),
        category,
        endpoint: id,
        intent,
        origin: ScenarioOrigin::Fallback,
        request,
        expectation: Expectation::status(status),
    }
}

type Draft = (String, ScenarioRequest, ExpectedStatus);

fn client_error() -> ExpectedStatus {
    ExpectedStatus::Class(StatusClass::ClientError)
}

fn positive(endpoint: &EndpointDescriptor) -> Draft {
    (
        format!("valid request to {} succeeds", endpoint.id()),
        baseline(endpoint),
        ExpectedStatus::Exact(endpoint.success_status()),
    )
}

fn negative(endpoint: &EndpointDescriptor) -> Draft {
    let mut request = baseline(endpoint);

    if let Some(param) = numeric_path_param(endpoint) {
        request
            .path_params
            .insert(param.name.clone(), json!("not-a-number"));
        return (
            format!("non-numeric value for path parameter `{}` is rejected", param.name),
            request,
            client_error(),
        );
    }

    if let Some(field) = endpoint
        .request_body
        .as_ref()
        .and_then(|b| required_fields(&b.schema).into_iter().next())
        && let Some(Value::Object(body)) = request.body.as_mut()
    {
        body.remove(&field);
        return (
            format!("body without required field `{}` is rejected", field),
            request,
            client_error(),
        );
    }

    if let Some(param) = endpoint.required_params(ParamLocation::Query).next() {
        request.query.remove(&param.name);
        return (
            format!("missing required query parameter `{}` is rejected", param.name),
            request,
            client_error(),
        );
    }

    if let Some(param) = endpoint.params_in(ParamLocation::Path).next() {
        request
            .path_params
            .insert(param.name.clone(), json!("nonexistent-0000"));
        return (
            format!("unknown `{}` is reported as a client error", param.name),
            request,
            client_error(),
        );
    }

    request
        .headers
        .insert("Accept".to_string(), "application/x-unsupported".to_string());
    (
        "unsupported Accept header is rejected".to_string(),
        request,
        client_error(),
    )
}

fn edge(endpoint: &EndpointDescriptor) -> Draft {
    let mut request = baseline(endpoint);

    if let Some(param) = numeric_path_param(endpoint) {
        request.path_params.insert(param.name.clone(), json!(0));
        return (
            format!("boundary value 0 for path parameter `{}`", param.name),
            request,
            client_error(),
        );
    }

    if let Some(body) = request.body.take() {
        request.body = Some(blank(&body));
        return (
            "body with empty and zero values is rejected".to_string(),
            request,
            client_error(),
        );
    }

    let optional: Vec<&Parameter> = endpoint
        .params_in(ParamLocation::Query)
        .filter(|p| !p.required)
        .collect();
    if optional.is_empty() {
        request.query.insert("_edge".to_string(), json!(""));
    } else {
        for param in optional {
            request
                .query
                .insert(param.name.clone(), boundary_query_value(param));
        }
    }
    (
        "empty and boundary query values are tolerated".to_string(),
        request,
        ExpectedStatus::Exact(endpoint.success_status()),
    )
}

fn security(endpoint: &EndpointDescriptor) -> Draft {
    let mut request = baseline(endpoint);

    if !endpoint.auth.is_none() {
        request.omit_auth = true;
        return (
            format!("request without {} credentials is refused", endpoint.auth),
            request,
            ExpectedStatus::Exact(401),
        );
    }

    if let Some(param) = endpoint
        .params_in(ParamLocation::Path)
        .find(|p| p.param_type == ParamType::String)
    {
        request
            .path_params
            .insert(param.name.clone(), json!(SQL_INJECTION));
        return (
            format!("SQL injection in path parameter `{}` is rejected", param.name),
            request,
            client_error(),
        );
    }

    if let Some(Value::Object(body)) = request.body.as_mut()
        && let Some((field, value)) = body.iter_mut().find(|(_, v)| v.is_string())
    {
        *value = json!(SCRIPT_INJECTION);
        let field = field.clone();
        return (
            format!("script injection in body field `{}` is rejected", field),
            request,
            client_error(),
        );
    }

    if let Some(param) = numeric_path_param(endpoint) {
        request
            .path_params
            .insert(param.name.clone(), json!(SQL_INJECTION));
        return (
            format!("SQL injection in path parameter `{}` is rejected", param.name),
            request,
            client_error(),
        );
    }

    request.query.insert("q".to_string(), json!(SQL_INJECTION));
    (
        "SQL injection in an unknown query parameter is ignored".to_string(),
        request,
        ExpectedStatus::Class(StatusClass::Success),
    )
}

/// A schema-conformant request: every path parameter, required query and
/// header parameters, and a minimal body.
fn baseline(endpoint: &EndpointDescriptor) -> ScenarioRequest {
    let mut request = ScenarioRequest::default();
    for param in endpoint.params_in(ParamLocation::Path) {
        request
            .path_params
            .insert(param.name.clone(), param_value(param));
    }
    for param in endpoint.required_params(ParamLocation::Query) {
        request.query.insert(param.name.clone(), param_value(param));
    }
    for param in endpoint.required_params(ParamLocation::Header) {
        request
            .headers
            .insert(param.name.clone(), scalar_text(&param_value(param)));
    }
    if let Some(body) = &endpoint.request_body
        && (body.required || endpoint.method.accepts_body())
    {
        request.body = Some(sample(&body.schema, 0));
    }
    request
}

fn numeric_path_param(endpoint: &EndpointDescriptor) -> Option<&Parameter> {
    endpoint
        .params_in(ParamLocation::Path)
        .find(|p| matches!(p.param_type, ParamType::Integer | ParamType::Number))
}

fn param_value(param: &Parameter) -> Value {
    match &param.example {
        Some(example) => example.clone(),
        None => sample(&param.schema, 0),
    }
}

fn boundary_query_value(param: &Parameter) -> Value {
    match param.param_type {
        ParamType::Integer | ParamType::Number => param
            .schema
            .get("minimum")
            .cloned()
            .unwrap_or_else(|| json!(0)),
        ParamType::Boolean => json!(false),
        ParamType::Array => json!([]),
        _ => json!(""),
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn required_fields(schema: &Value) -> Vec<String> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|fields| {
            fields
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Produces a minimal instance of `schema`.
pub(crate) fn sample(schema: &Value, depth: usize) -> Value {
    if let Some(value) = schema.get("example").or_else(|| schema.get("default")) {
        return value.clone();
    }
    if let Some(first) = schema
        .get("enum")
        .and_then(Value::as_array)
        .and_then(|values| values.first())
    {
        return first.clone();
    }
    for key in ["allOf", "oneOf", "anyOf"] {
        if let Some(first) = schema
            .get(key)
            .and_then(Value::as_array)
            .and_then(|variants| variants.first())
        {
            return sample(first, depth + 1);
        }
    }

    match ParamType::from_schema(schema) {
        ParamType::Integer => schema.get("minimum").cloned().unwrap_or_else(|| json!(1)),
        ParamType::Number => schema.get("minimum").cloned().unwrap_or_else(|| json!(1.5)),
        ParamType::Boolean => json!(true),
        ParamType::Array => {
            if depth >= MAX_DEPTH {
                return json!([]);
            }
            match schema.get("items") {
                Some(items) => json!([sample(items, depth + 1)]),
                None => json!([]),
            }
        }
        ParamType::Object => sample_object(schema, depth),
        ParamType::String => sample_string(schema),
    }
}

fn sample_object(schema: &Value, depth: usize) -> Value {
    let mut out = Map::new();
    if depth >= MAX_DEPTH {
        return Value::Object(out);
    }
    let Some(Value::Object(properties)) = schema.get("properties") else {
        return Value::Object(out);
    };
    let required = required_fields(schema);
    for (name, property) in properties {
        if required.is_empty() || required.contains(name) {
            out.insert(name.clone(), sample(property, depth + 1));
        }
    }
    Value::Object(out)
}

fn sample_string(schema: &Value) -> Value {
    let text = match schema.get("format").and_then(Value::as_str) {
        Some("email") => "test@example.com".to_string(),
        Some("date-time") => "2024-01-01T00:00:00Z".to_string(),
        Some("date") => "2024-01-01".to_string(),
        Some("uuid") => "00000000-0000-4000-8000-000000000001".to_string(),
        Some("uri" | "url") => "https://example.com".to_string(),
        _ => {
            let min = schema
                .get("minLength")
                .and_then(Value::as_u64)
                .unwrap_or(0) as usize;
            if min > 4 { "a".repeat(min) } else { "test".to_string() }
        }
    };
    Value::String(text)
}

/// Replaces every leaf with its empty/zero counterpart.
fn blank(value: &Value) -> Value {
    match value {
        Value::String(_) => json!(""),
        Value::Number(_) => json!(0),
        Value::Array(_) => json!([]),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), blank(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AuthRequirement, HttpMethod, RequestBody};

    fn param(name: &str, location: ParamLocation, ty: ParamType, required: bool) -> Parameter {
        Parameter {
            name: name.to_string(),
            location,
            required,
            param_type: ty,
            schema: serde_json::to_value(ty)
                .map(|t| json!({"type": t}))
                .unwrap_or_default(),
            example: None,
        }
    }

    fn endpoint(method: HttpMethod, path: &str, parameters: Vec<Parameter>) -> EndpointDescriptor {
        EndpointDescriptor {
            method,
            path: path.to_string(),
            operation_id: None,
            summary: String::new(),
            tags: vec![],
            parameters,
            request_body: None,
            response_codes: vec!["200".to_string()],
            auth: AuthRequirement::None,
        }
    }

    fn get_post() -> EndpointDescriptor {
        endpoint(
            HttpMethod::Get,
            "/posts/{id}",
            vec![param("id", ParamLocation::Path, ParamType::Integer, true)],
        )
    }

    fn create_post() -> EndpointDescriptor {
        let mut ep = endpoint(HttpMethod::Post, "/posts", vec![]);
        ep.response_codes = vec!["201".to_string()];
        ep.request_body = Some(RequestBody {
            content_type: "application/json".to_string(),
            required: true,
            schema: json!({
                "type": "object",
                "required": ["title", "userId"],
                "properties": {
                    "title": {"type": "string"},
                    "userId": {"type": "integer"},
                    "draft": {"type": "boolean"}
                }
            }),
        });
        ep
    }

    #[test]
    fn test_one_scenario_per_category() {
        for ep in [get_post(), create_post(), endpoint(HttpMethod::Get, "/health", vec![])] {
            let scenarios = fallback_scenarios(&ep);
            let categories: Vec<Category> = scenarios.iter().map(|s| s.category).collect();
            assert_eq!(categories, Category::all().to_vec());
            assert!(scenarios.iter().all(|s| s.origin == ScenarioOrigin::Fallback));
            assert!(scenarios.iter().all(|s| s.endpoint == ep.id()));
        }
    }

    #[test]
    fn test_negative_uses_non_integer_id() {
        let scenario = fallback_scenario(&get_post(), Category::Negative);
        assert_eq!(scenario.request.path_params["id"], json!("not-a-number"));
        assert_eq!(
            scenario.expectation.status,
            ExpectedStatus::Class(StatusClass::ClientError)
        );
        assert_eq!(scenario.id, "get_posts_id.negative.1");
    }

    #[test]
    fn test_positive_body_is_minimal_and_conformant() {
        let scenario = fallback_scenario(&create_post(), Category::Positive);
        assert_eq!(scenario.request.body, Some(json!({"title": "test", "userId": 1})));
        assert_eq!(scenario.expectation.status, ExpectedStatus::Exact(201));
    }

    #[test]
    fn test_negative_omits_required_body_field() {
        let scenario = fallback_scenario(&create_post(), Category::Negative);
        assert_eq!(scenario.request.body, Some(json!({"userId": 1})));
    }

    #[test]
    fn test_edge_blanks_body() {
        let scenario = fallback_scenario(&create_post(), Category::Edge);
        assert_eq!(scenario.request.body, Some(json!({"title": "", "userId": 0})));
    }

    #[test]
    fn test_security_withholds_credentials_when_auth_required() {
        let mut ep = get_post();
        ep.auth = AuthRequirement::Bearer;
        let scenario = fallback_scenario(&ep, Category::Security);
        assert!(scenario.request.omit_auth);
        assert_eq!(scenario.expectation.status, ExpectedStatus::Exact(401));
    }

    #[test]
    fn test_security_injects_into_body_without_auth() {
        let scenario = fallback_scenario(&create_post(), Category::Security);
        assert!(!scenario.request.omit_auth);
        assert_eq!(scenario.request.body.unwrap()["title"], json!(SCRIPT_INJECTION));
    }

    #[test]
    fn test_no_input_endpoint_still_covered() {
        let ep = endpoint(HttpMethod::Get, "/health", vec![]);
        let negative = fallback_scenario(&ep, Category::Negative);
        assert_eq!(
            negative.request.headers.get("Accept").map(String::as_str),
            Some("application/x-unsupported")
        );
        let edge = fallback_scenario(&ep, Category::Edge);
        assert_eq!(edge.expectation.status, ExpectedStatus::Exact(200));
    }

    #[test]
    fn test_sample_respects_examples_and_formats() {
        assert_eq!(sample(&json!({"type": "string", "example": "x"}), 0), json!("x"));
        assert_eq!(sample(&json!({"enum": ["a", "b"]}), 0), json!("a"));
        assert_eq!(
            sample(&json!({"type": "string", "format": "email"}), 0),
            json!("test@example.com")
        );
        assert_eq!(sample(&json!({"type": "integer", "minimum": 5}), 0), json!(5));
        assert_eq!(
            sample(&json!({"type": "array", "items": {"type": "boolean"}}), 0),
            json!([true])
        );
    }
}
