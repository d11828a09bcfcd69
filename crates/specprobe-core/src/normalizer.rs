//! Normalizes an OpenAPI description into an [`ApiModel`].
//!
//! Input is an already-deserialized `serde_json::Value`; loading from disk or
//! a URL is the caller's concern. Normalization is pure and produces endpoints
//! in document order (paths as declared, methods in the fixed order of
//! [`HttpMethod::all`]).

use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::error::SpecInvalidError;
use crate::model::{
    ApiInfo, ApiKeyLocation, ApiModel, AuthRequirement, EndpointDescriptor, HttpMethod,
    ParamLocation, ParamType, Parameter, RequestBody, placeholders,
};

const DEFAULT_TITLE: &str = "Unknown API";
const DEFAULT_VERSION: &str = "1.0.0";

/// Normalizes a deserialized API description.
pub fn normalize(description: &Value) -> Result<ApiModel, SpecInvalidError> {
    let root = description
        .as_object()
        .ok_or(SpecInvalidError::NotAnObject)?;
    let paths = root
        .get("paths")
        .and_then(Value::as_object)
        .ok_or(SpecInvalidError::MissingPaths)?;

    let resolver = Resolver { root: description };
    let schemes = security_schemes(description);
    let global_security = root.get("security");

    let mut endpoints: Vec<EndpointDescriptor> = Vec::new();
    let mut declared_as: Vec<String> = Vec::new();
    for (raw_path, item) in paths {
        let item = resolver.shallow(item)?;
        let Some(item) = item.as_object() else {
            warn!("Skipping path {}: path item is not an object", raw_path);
            continue;
        };
        let path = normalize_path(raw_path);
        let shared_params = item.get("parameters");

        for method in HttpMethod::all() {
            let Some(operation) = item.get(method.operation_key()).and_then(Value::as_object)
            else {
                continue;
            };
            let context = format!("{} {}", method, raw_path);
            let endpoint = build_endpoint(
                &resolver,
                *method,
                &path,
                &context,
                shared_params,
                operation,
                &schemes,
                global_security,
            )?;
            debug!(
                "Normalized {} ({} params, auth: {})",
                endpoint.id(),
                endpoint.parameters.len(),
                endpoint.auth
            );
            if let Some(first) = endpoints.iter().position(|e| e.id() == endpoint.id()) {
                return Err(SpecInvalidError::DuplicateEndpoint {
                    endpoint: endpoint.id().to_string(),
                    first: declared_as[first].clone(),
                    second: raw_path.clone(),
                });
            }
            endpoints.push(endpoint);
            declared_as.push(raw_path.clone());
        }
    }

    let model = ApiModel {
        info: extract_info(root),
        servers: extract_servers(root),
        endpoints,
    };
    info!(
        "Parsed description: {} v{} ({} endpoints)",
        model.info.title,
        model.info.version,
        model.endpoints.len()
    );
    Ok(model)
}

/// Rewrites a path template into canonical `{name}` form.
///
/// `:id` and `<id>` (including `<int:id>`) become `{id}`. Everything else,
/// trailing and repeated slashes included, is kept as declared; the result
/// always starts with `/`.
pub fn normalize_path(raw: &str) -> String {
    let path = raw
        .split('/')
        .map(|segment| match placeholder_name(segment) {
            Some(name) => format!("{{{}}}", name),
            None => segment.to_string(),
        })
        .collect::<Vec<_>>()
        .join("/");
    if path.starts_with('/') {
        path
    } else {
        format!("/{}", path)
    }
}

fn placeholder_name(segment: &str) -> Option<&str> {
    let name = match segment.strip_prefix(':') {
        Some(name) => name,
        None => {
            let inner = segment.strip_prefix('<')?.strip_suffix('>')?;
            inner.rsplit(':').next().unwrap_or(inner)
        }
    };
    (!name.is_empty()).then_some(name)
}

#[allow(clippy::too_many_arguments)]
fn build_endpoint(
    resolver: &Resolver<'_>,
    method: HttpMethod,
    path: &str,
    context: &str,
    shared_params: Option<&Value>,
    operation: &Map<String, Value>,
    schemes: &Map<String, Value>,
    global_security: Option<&Value>,
) -> Result<EndpointDescriptor, SpecInvalidError> {
    let mut parameters: Vec<Parameter> = Vec::new();
    let mut body_params: Vec<Parameter> = Vec::new();

    let inherited = param_list(resolver, shared_params, context)?;
    let own = param_list(resolver, operation.get("parameters"), context)?;
    for param in inherited.into_iter().chain(own) {
        let target = if param.location == ParamLocation::Body {
            &mut body_params
        } else {
            &mut parameters
        };
        // Later declarations (operation level) win on (name, location).
        match target
            .iter_mut()
            .find(|p| p.name == param.name && p.location == param.location)
        {
            Some(existing) => *existing = param,
            None => target.push(param),
        }
    }

    for name in placeholders(path) {
        if !parameters
            .iter()
            .any(|p| p.location == ParamLocation::Path && p.name == name)
        {
            debug!("{}: implicit path parameter `{}`", context, name);
            parameters.push(Parameter {
                name,
                location: ParamLocation::Path,
                required: true,
                param_type: ParamType::String,
                schema: json!({"type": "string"}),
                example: None,
            });
        }
    }

    let request_body = match operation.get("requestBody") {
        Some(body) => request_body(resolver, body)?,
        None => legacy_body(body_params),
    };

    let response_codes = match operation.get("responses") {
        Some(Value::Object(responses)) => responses.keys().cloned().collect(),
        _ => Vec::new(),
    };

    let security = operation.get("security").or(global_security);
    let auth = auth_requirement(resolver, security, schemes, context)?;

    Ok(EndpointDescriptor {
        method,
        path: path.to_string(),
        operation_id: operation
            .get("operationId")
            .and_then(Value::as_str)
            .map(str::to_string),
        summary: operation
            .get("summary")
            .or_else(|| operation.get("description"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string(),
        tags: operation
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        parameters,
        request_body,
        response_codes,
        auth,
    })
}

fn param_list(
    resolver: &Resolver<'_>,
    raw: Option<&Value>,
    context: &str,
) -> Result<Vec<Parameter>, SpecInvalidError> {
    let Some(Value::Array(items)) = raw else {
        return Ok(Vec::new());
    };

    let mut params = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let item = resolver.shallow(item)?;
        let malformed = |field| SpecInvalidError::MalformedParameter {
            context: context.to_string(),
            index,
            field,
        };
        let name = item
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("name"))?;
        let location = item
            .get("in")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("in"))?;
        if location == "cookie" {
            debug!("{}: ignoring cookie parameter `{}`", context, name);
            continue;
        }
        let Some(location) = ParamLocation::parse(location) else {
            return Err(malformed("in"));
        };

        let schema = match item.get("schema") {
            Some(schema) => resolver.deep(schema)?,
            // Swagger 2 keeps the type inline on non-body parameters.
            None => inline_schema(&item),
        };
        let example = item
            .get("example")
            .or_else(|| schema.get("example"))
            .or_else(|| schema.get("default"))
            .cloned();

        params.push(Parameter {
            name: name.to_string(),
            location,
            required: location == ParamLocation::Path
                || item.get("required").and_then(Value::as_bool).unwrap_or(false),
            param_type: ParamType::from_schema(&schema),
            schema,
            example,
        });
    }
    Ok(params)
}

fn inline_schema(item: &Value) -> Value {
    let mut schema = Map::new();
    for key in ["type", "format", "items", "enum", "minimum", "maximum", "default"] {
        if let Some(value) = item.get(key) {
            schema.insert(key.to_string(), value.clone());
        }
    }
    Value::Object(schema)
}

fn request_body(
    resolver: &Resolver<'_>,
    raw: &Value,
) -> Result<Option<RequestBody>, SpecInvalidError> {
    let body = resolver.shallow(raw)?;
    let Some(content) = body.get("content").and_then(Value::as_object) else {
        return Ok(None);
    };
    let chosen = content
        .iter()
        .find(|(ct, _)| ct.as_str() == "application/json")
        .or_else(|| content.iter().find(|(ct, _)| ct.contains("json")))
        .or_else(|| content.iter().next());
    let Some((content_type, media)) = chosen else {
        return Ok(None);
    };
    let schema = match media.get("schema") {
        Some(schema) => resolver.deep(schema)?,
        None => json!({}),
    };
    Ok(Some(RequestBody {
        content_type: content_type.clone(),
        required: body.get("required").and_then(Value::as_bool).unwrap_or(false),
        schema,
    }))
}

/// Folds Swagger 2 `body`/`formData` parameters into a request body.
fn legacy_body(params: Vec<Parameter>) -> Option<RequestBody> {
    match params.len() {
        0 => None,
        1 if params[0].param_type == ParamType::Object || params[0].name == "body" => {
            let param = params.into_iter().next()?;
            Some(RequestBody {
                content_type: "application/json".to_string(),
                required: param.required,
                schema: param.schema,
            })
        }
        _ => {
            let required: Vec<&str> = params
                .iter()
                .filter(|p| p.required)
                .map(|p| p.name.as_str())
                .collect();
            let properties: Map<String, Value> = params
                .iter()
                .map(|p| (p.name.clone(), p.schema.clone()))
                .collect();
            Some(RequestBody {
                content_type: "application/json".to_string(),
                required: !required.is_empty(),
                schema: json!({
                    "type": "object",
                    "properties": properties,
                    "required": required,
                }),
            })
        }
    }
}

fn security_schemes(root: &Value) -> Map<String, Value> {
    root.pointer("/components/securitySchemes")
        .or_else(|| root.get("securityDefinitions"))
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

fn auth_requirement(
    resolver: &Resolver<'_>,
    security: Option<&Value>,
    schemes: &Map<String, Value>,
    context: &str,
) -> Result<AuthRequirement, SpecInvalidError> {
    let Some(Value::Array(alternatives)) = security else {
        return Ok(AuthRequirement::None);
    };
    // `{}` among the alternatives marks auth as optional; the first concrete
    // alternative is the one we exercise.
    let Some(scheme_name) = alternatives
        .iter()
        .filter_map(Value::as_object)
        .find_map(|alt| alt.keys().next())
    else {
        return Ok(AuthRequirement::None);
    };

    let scheme = schemes
        .get(scheme_name)
        .ok_or_else(|| SpecInvalidError::UnknownSecurityScheme {
            endpoint: context.to_string(),
            scheme: scheme_name.clone(),
        })?;
    let scheme = resolver.shallow(scheme)?;

    let kind = scheme.get("type").and_then(Value::as_str).unwrap_or_default();
    let requirement = match kind {
        "apiKey" => {
            let name = scheme
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("X-API-Key")
                .to_string();
            match scheme.get("in").and_then(Value::as_str) {
                Some("query") => AuthRequirement::ApiKey {
                    name,
                    location: ApiKeyLocation::Query,
                },
                Some("cookie") => {
                    warn!(
                        "{}: cookie api keys are not supported, treating as unauthenticated",
                        context
                    );
                    AuthRequirement::None
                }
                _ => AuthRequirement::ApiKey {
                    name,
                    location: ApiKeyLocation::Header,
                },
            }
        }
        "http" => match scheme.get("scheme").and_then(Value::as_str) {
            Some(s) if s.eq_ignore_ascii_case("basic") => AuthRequirement::Basic,
            _ => AuthRequirement::Bearer,
        },
        "basic" => AuthRequirement::Basic,
        "oauth2" | "openIdConnect" => AuthRequirement::Bearer,
        other => {
            warn!("{}: unsupported security scheme type `{}`", context, other);
            AuthRequirement::None
        }
    };
    Ok(requirement)
}

fn extract_info(root: &Map<String, Value>) -> ApiInfo {
    let info = root.get("info");
    let text = |key: &str| {
        info.and_then(|i| i.get(key))
            .and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
    };
    ApiInfo {
        title: text("title").unwrap_or_else(|| DEFAULT_TITLE.to_string()),
        version: text("version").unwrap_or_else(|| DEFAULT_VERSION.to_string()),
        description: text("description").unwrap_or_default(),
    }
}

fn extract_servers(root: &Map<String, Value>) -> Vec<String> {
    if let Some(Value::Array(servers)) = root.get("servers") {
        return servers
            .iter()
            .filter_map(|server| {
                let url = server.get("url")?.as_str()?;
                Some(expand_server_variables(url, server.get("variables")))
            })
            .collect();
    }

    // Swagger 2: scheme + host + basePath.
    match root.get("host").and_then(Value::as_str) {
        Some(host) => {
            let scheme = root
                .get("schemes")
                .and_then(Value::as_array)
                .and_then(|s| s.first())
                .and_then(Value::as_str)
                .unwrap_or("https");
            let base = root.get("basePath").and_then(Value::as_str).unwrap_or("");
            vec![format!("{}://{}{}", scheme, host, base)]
        }
        None => Vec::new(),
    }
}

fn expand_server_variables(url: &str, variables: Option<&Value>) -> String {
    let Some(Value::Object(vars)) = variables else {
        return url.to_string();
    };
    vars.iter().fold(url.to_string(), |acc, (name, var)| {
        match var.get("default").and_then(Value::as_str) {
            Some(default) => acc.replace(&format!("{{{}}}", name), default),
            None => acc,
        }
    })
}

/// Resolves local `$ref` pointers against the document root.
struct Resolver<'a> {
    root: &'a Value,
}

impl Resolver<'_> {
    fn lookup(&self, reference: &str) -> Result<&Value, SpecInvalidError> {
        reference
            .strip_prefix('#')
            .and_then(|pointer| self.root.pointer(pointer))
            .ok_or_else(|| SpecInvalidError::UnresolvedRef(reference.to_string()))
    }

    /// Follows a `$ref` chain on the top-level object only.
    fn shallow(&self, value: &Value) -> Result<Value, SpecInvalidError> {
        let mut current = value;
        let mut seen: Vec<&str> = Vec::new();
        while let Some(reference) = current.get("$ref").and_then(Value::as_str) {
            if seen.contains(&reference) {
                return Ok(opaque_object());
            }
            seen.push(reference);
            current = self.lookup(reference)?;
        }
        Ok(current.clone())
    }

    /// Resolves every `$ref` in the tree. A reference back into the chain
    /// currently being expanded becomes an opaque object schema.
    fn deep(&self, value: &Value) -> Result<Value, SpecInvalidError> {
        let mut stack = Vec::new();
        self.deep_inner(value, &mut stack)
    }

    fn deep_inner(&self, value: &Value, stack: &mut Vec<String>) -> Result<Value, SpecInvalidError> {
        match value {
            Value::Object(map) => {
                if let Some(reference) = map.get("$ref").and_then(Value::as_str) {
                    if stack.iter().any(|r| r == reference) {
                        return Ok(opaque_object());
                    }
                    let target = self.lookup(reference)?;
                    stack.push(reference.to_string());
                    let resolved = self.deep_inner(target, stack);
                    stack.pop();
                    return resolved;
                }
                let mut out = Map::with_capacity(map.len());
                for (key, child) in map {
                    out.insert(key.clone(), self.deep_inner(child, stack)?);
                }
                Ok(Value::Object(out))
            }
            Value::Array(items) => items
                .iter()
                .map(|item| self.deep_inner(item, stack))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            other => Ok(other.clone()),
        }
    }
}

fn opaque_object() -> Value {
    json!({"type": "object"})
}
