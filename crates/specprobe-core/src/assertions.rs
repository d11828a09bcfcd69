//! Executable assertions compiled from a scenario's expectation.
//!
//! Assertions are evaluated in order against an [`ObservedResponse`]; the first
//! one that does not hold becomes the unit's [`AssertionFailure`]. Bodies that
//! are not JSON are valid input: JSON-dependent checks fail cleanly instead of
//! erroring.

use crate::model::ExpectedStatus;
use crate::transport::ObservedResponse;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A single discrete check against a received response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum Assertion {
    /// Response status equals a code or falls in a class.
    Status { expected: ExpectedStatus },
    /// Response body decodes as JSON.
    JsonBody,
    /// JSON body contains every listed field (dotted paths allowed).
    RequiredFields { fields: Vec<String> },
    /// Response body is not empty.
    NonEmptyBody,
}

/// A mismatch between an assertion and what the target returned.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("expected {expected}, got {actual}")]
pub struct AssertionFailure {
    /// Name of the assertion that failed.
    pub assertion: String,
    pub expected: String,
    pub actual: String,
}

impl Assertion {
    /// Stable name used in failure details and clustering.
    pub fn name(&self) -> &'static str {
        match self {
            Assertion::Status { .. } => "status_code",
            Assertion::JsonBody => "json_body",
            Assertion::RequiredFields { .. } => "required_fields",
            Assertion::NonEmptyBody => "non_empty_body",
        }
    }

    pub fn evaluate(&self, response: &ObservedResponse) -> Result<(), AssertionFailure> {
        match self {
            Assertion::Status { expected } => {
                if expected.matches(response.status) {
                    Ok(())
                } else {
                    Err(self.failure(expected.to_string(), response.status.to_string()))
                }
            }
            Assertion::JsonBody => match response.json() {
                Some(_) => Ok(()),
                None => Err(self.failure("JSON body", describe_body(response))),
            },
            Assertion::RequiredFields { fields } => {
                let Some(json) = response.json() else {
                    return Err(self.failure(
                        format!("JSON body with fields {}", fields.join(", ")),
                        describe_body(response),
                    ));
                };
                let missing: Vec<&str> = fields
                    .iter()
                    .filter(|field| lookup(json, field).is_none())
                    .map(String::as_str)
                    .collect();
                if missing.is_empty() {
                    Ok(())
                } else {
                    Err(self.failure(
                        format!("fields {}", fields.join(", ")),
                        format!("missing {}", missing.join(", ")),
                    ))
                }
            }
            Assertion::NonEmptyBody => {
                if response.body.iter().any(|b| !b.is_ascii_whitespace()) {
                    Ok(())
                } else {
                    Err(self.failure("non-empty body", "empty body"))
                }
            }
        }
    }

    fn failure(&self, expected: impl Into<String>, actual: impl Into<String>) -> AssertionFailure {
        AssertionFailure {
            assertion: self.name().to_string(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

/// Evaluates assertions in order and returns the first failure.
pub fn first_failure(
    assertions: &[Assertion],
    response: &ObservedResponse,
) -> Option<AssertionFailure> {
    assertions.iter().find_map(|a| a.evaluate(response).err())
}

/// Resolves a dotted field path. Arrays are searched through their first element.
fn lookup<'a>(json: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(json, |current, key| {
        let current = match current {
            Value::Array(items) => items.first()?,
            other => other,
        };
        current.get(key)
    })
}

fn describe_body(response: &ObservedResponse) -> String {
    if response.body.is_empty() {
        return "empty body".to_string();
    }
    let text = String::from_utf8_lossy(&response.body);
    format!("non-JSON body: {}", truncate(text.trim(), 80))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StatusClass;

    fn response(status: u16, body: &str) -> ObservedResponse {
        ObservedResponse::new(status, Default::default(), body.as_bytes().to_vec())
    }

    #[test]
    fn test_status_mismatch_detail() {
        let assertion = Assertion::Status {
            expected: ExpectedStatus::Exact(201),
        };
        let failure = assertion.evaluate(&response(500, "")).unwrap_err();
        assert_eq!(failure.assertion, "status_code");
        assert_eq!(failure.to_string(), "expected 201, got 500");
    }

    #[test]
    fn test_status_class_match() {
        let assertion = Assertion::Status {
            expected: ExpectedStatus::Class(StatusClass::ClientError),
        };
        assert!(assertion.evaluate(&response(404, "")).is_ok());
        let failure = assertion.evaluate(&response(200, "")).unwrap_err();
        assert_eq!(failure.to_string(), "expected 4xx, got 200");
    }

    #[test]
    fn test_json_checks_survive_non_json_bodies() {
        let html = response(200, "<html>hello</html>");
        let failure = Assertion::JsonBody.evaluate(&html).unwrap_err();
        assert!(failure.actual.starts_with("non-JSON body"));

        let fields = Assertion::RequiredFields {
            fields: vec!["id".to_string()],
        };
        assert!(fields.evaluate(&html).is_err());
    }

    #[test]
    fn test_required_fields_with_dotted_paths() {
        let body = response(200, r#"{"id": 1, "author": {"name": "x"}}"#);
        let ok = Assertion::RequiredFields {
            fields: vec!["id".to_string(), "author.name".to_string()],
        };
        assert!(ok.evaluate(&body).is_ok());

        let missing = Assertion::RequiredFields {
            fields: vec!["id".to_string(), "title".to_string()],
        };
        let failure = missing.evaluate(&body).unwrap_err();
        assert_eq!(failure.actual, "missing title");
    }

    #[test]
    fn test_required_fields_on_array_body() {
        let body = response(200, r#"[{"id": 1}, {"id": 2}]"#);
        let check = Assertion::RequiredFields {
            fields: vec!["id".to_string()],
        };
        assert!(check.evaluate(&body).is_ok());
    }

    #[test]
    fn test_non_empty_body() {
        assert!(Assertion::NonEmptyBody.evaluate(&response(200, "{}")).is_ok());
        assert!(Assertion::NonEmptyBody.evaluate(&response(200, "  \n")).is_err());
    }

    #[test]
    fn test_first_failure_is_in_order() {
        let assertions = vec![
            Assertion::Status {
                expected: ExpectedStatus::Exact(200),
            },
            Assertion::JsonBody,
        ];
        let failure = first_failure(&assertions, &response(500, "oops")).unwrap();
        assert_eq!(failure.assertion, "status_code");
        assert!(first_failure(&assertions, &response(200, "{}")).is_none());
    }
}
