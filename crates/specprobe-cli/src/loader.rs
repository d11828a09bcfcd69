//! Loads an API description from a file or URL into a JSON value.

use serde_json::{Map, Number, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("{origin} is not valid {expected}: {message}")]
    Parse {
        origin: String,
        expected: &'static str,
        message: String,
    },
}

/// Where the description comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptionSource {
    /// Local file path
    File(PathBuf),
    /// Remote URL (`http://` or `https://`)
    Remote(String),
}

impl DescriptionSource {
    pub fn parse(s: &str) -> Self {
        if s.starts_with("http://") || s.starts_with("https://") {
            DescriptionSource::Remote(s.to_string())
        } else {
            DescriptionSource::File(PathBuf::from(s))
        }
    }
}

impl std::fmt::Display for DescriptionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DescriptionSource::File(path) => write!(f, "{}", path.display()),
            DescriptionSource::Remote(url) => f.write_str(url),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Syntax {
    Json,
    Yaml,
    Unknown,
}

impl Syntax {
    fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("json") => Syntax::Json,
            Some("yaml" | "yml") => Syntax::Yaml,
            _ => Syntax::Unknown,
        }
    }
}

/// Reads and parses the description.
pub async fn load_description(source: &DescriptionSource) -> Result<Value, LoadError> {
    match source {
        DescriptionSource::File(path) => {
            let text = tokio::fs::read_to_string(path)
                .await
                .map_err(|source| LoadError::Io {
                    path: path.clone(),
                    source,
                })?;
            parse_text(&text, Syntax::from_path(path), &path.display().to_string())
        }
        DescriptionSource::Remote(url) => {
            let text = fetch(url).await?;
            parse_text(&text, Syntax::Unknown, url)
        }
    }
}

async fn fetch(url: &str) -> Result<String, LoadError> {
    let fetch_error = |message: String| LoadError::Fetch {
        url: url.to_string(),
        message,
    };
    let client = reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .map_err(|e| fetch_error(e.to_string()))?;

    debug!("Fetching description from {}", url);
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| fetch_error(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(fetch_error(format!("http status {}", status.as_u16())));
    }
    response.text().await.map_err(|e| fetch_error(e.to_string()))
}

/// Parses description text. Unknown syntax tries JSON first, then YAML.
fn parse_text(text: &str, syntax: Syntax, origin: &str) -> Result<Value, LoadError> {
    let parse_error = |expected: &'static str, message: String| LoadError::Parse {
        origin: origin.to_string(),
        expected,
        message,
    };
    match syntax {
        Syntax::Json => serde_json::from_str(text).map_err(|e| parse_error("JSON", e.to_string())),
        Syntax::Yaml => parse_yaml(text).map_err(|e| parse_error("YAML", e.to_string())),
        Syntax::Unknown => serde_json::from_str(text).or_else(|json_err| {
            parse_yaml(text).map_err(|yaml_err| {
                parse_error(
                    "JSON or YAML",
                    format!("json: {}; yaml: {}", json_err, yaml_err),
                )
            })
        }),
    }
}

fn parse_yaml(text: &str) -> Result<Value, serde_yaml::Error> {
    let yaml: serde_yaml::Value = serde_yaml::from_str(text)?;
    Ok(yaml_to_json(yaml))
}

/// YAML allows non-string keys (`200:` under `responses`); JSON does not.
/// Keys are stringified.
fn yaml_to_json(value: serde_yaml::Value) -> Value {
    match value {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                n.as_f64()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            }
        }
        serde_yaml::Value::String(s) => Value::String(s),
        serde_yaml::Value::Sequence(items) => {
            Value::Array(items.into_iter().map(yaml_to_json).collect())
        }
        serde_yaml::Value::Mapping(mapping) => {
            let mut map = Map::new();
            for (key, value) in mapping {
                map.insert(yaml_key(&key), yaml_to_json(value));
            }
            Value::Object(map)
        }
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(tagged.value),
    }
}

fn yaml_key(key: &serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Null => "null".to_string(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}
