//! Attribute validation from per-column config rules.

use crate::config::ValidationRule;
use crate::error::{ApiError, FieldError};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;

pub struct RequestValidator;

impl RequestValidator {
    /// Validate new-resource attributes. Every required field must be present and non-null.
    pub fn validate(attributes: &Map<String, Value>, rules: &HashMap<String, ValidationRule>) -> Result<(), ApiError> {
        let mut errors = Vec::new();
        for (col, rule) in rules {
            match attributes.get(col) {
                None | Some(Value::Null) if rule.required == Some(true) => errors.push(FieldError {
                    field: col.clone(),
                    message: format!("{} is required", col),
                }),
                Some(v) => check_field(col, v, rule, &mut errors),
                None => {}
            }
        }
        finish(errors)
    }

    /// Validate only the attributes present (PATCH); required is not enforced for missing fields.
    pub fn validate_partial(
        attributes: &Map<String, Value>,
        rules: &HashMap<String, ValidationRule>,
    ) -> Result<(), ApiError> {
        let mut errors = Vec::new();
        for (col, v) in attributes {
            if let Some(rule) = rules.get(col) {
                if rule.required == Some(true) && v.is_null() {
                    errors.push(FieldError {
                        field: col.clone(),
                        message: format!("{} is required", col),
                    });
                    continue;
                }
                check_field(col, v, rule, &mut errors);
            }
        }
        finish(errors)
    }
}

fn finish(mut errors: Vec<FieldError>) -> Result<(), ApiError> {
    if errors.is_empty() {
        return Ok(());
    }
    errors.sort_by(|a, b| a.field.cmp(&b.field));
    Err(ApiError::Validation(errors))
}

fn check_field(col: &str, v: &Value, rule: &ValidationRule, errors: &mut Vec<FieldError>) {
    if v.is_null() {
        return;
    }
    let mut fail = |message: String| {
        errors.push(FieldError {
            field: col.to_string(),
            message,
        })
    };
    if let Some(format) = &rule.format {
        if let Some(message) = check_format(col, v, format) {
            fail(message);
        }
    }
    if let Some(s) = v.as_str() {
        let len = s.chars().count();
        if let Some(max) = rule.max_length {
            if len > max as usize {
                fail(format!("{} must be at most {} characters", col, max));
            }
        }
        if let Some(min) = rule.min_length {
            if len < min as usize {
                fail(format!("{} must be at least {} characters", col, min));
            }
        }
        if let Some(pattern) = &rule.pattern {
            match Regex::new(pattern) {
                Ok(re) if !re.is_match(s) => fail(format!("{} does not match required pattern", col)),
                Ok(_) => {}
                Err(_) => fail(format!("invalid pattern for {}", col)),
            }
        }
    }
    if let Some(allowed) = &rule.allowed {
        if !allowed.iter().any(|a| value_eq(v, a)) {
            fail(format!(
                "{} must be one of: {:?}",
                col,
                allowed.iter().take(5).collect::<Vec<_>>()
            ));
        }
    }
    if let Some(n) = v.as_f64() {
        if let Some(min) = rule.minimum {
            if n < min {
                fail(format!("{} must be at least {}", col, min));
            }
        }
        if let Some(max) = rule.maximum {
            if n > max {
                fail(format!("{} must be at most {}", col, max));
            }
        }
    }
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(n), Value::Number(m)) => n.as_f64() == m.as_f64(),
        _ => a == b,
    }
}

fn check_format(col: &str, v: &Value, format: &str) -> Option<String> {
    let s = v.as_str()?;
    match format.to_lowercase().as_str() {
        "email" if !s.contains('@') || s.len() < 3 => Some(format!("{} must be a valid email", col)),
        "uuid" if uuid::Uuid::parse_str(s).is_err() => Some(format!("{} must be a valid UUID", col)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rules() -> HashMap<String, ValidationRule> {
        let mut rules = HashMap::new();
        rules.insert(
            "email".to_string(),
            ValidationRule {
                required: Some(true),
                format: Some("email".into()),
                ..Default::default()
            },
        );
        rules.insert(
            "age".to_string(),
            ValidationRule {
                minimum: Some(0.0),
                maximum: Some(150.0),
                ..Default::default()
            },
        );
        rules
    }

    fn attrs(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn required_fields_on_create() {
        let err = RequestValidator::validate(&attrs(json!({"age": 3})), &rules()).unwrap_err();
        match err {
            ApiError::Validation(fields) => {
                assert_eq!(fields.len(), 1);
                assert_eq!(fields[0].field, "email");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn collects_every_failure() {
        let err = RequestValidator::validate(&attrs(json!({"email": "x", "age": 200})), &rules()).unwrap_err();
        let ApiError::Validation(fields) = err else {
            panic!("expected validation error");
        };
        let names: Vec<&str> = fields.iter().map(|f| f.field.as_str()).collect();
        assert_eq!(names, vec!["age", "email"]);
    }

    #[test]
    fn partial_skips_missing_required() {
        assert!(RequestValidator::validate_partial(&attrs(json!({"age": 5})), &rules()).is_ok());
        assert!(RequestValidator::validate_partial(&attrs(json!({"email": null})), &rules()).is_err());
    }

    #[test]
    fn allowed_values_compare_numbers_loosely() {
        let mut rules = HashMap::new();
        rules.insert(
            "level".to_string(),
            ValidationRule {
                allowed: Some(vec![json!(1), json!(2)]),
                ..Default::default()
            },
        );
        assert!(RequestValidator::validate(&attrs(json!({"level": 2.0})), &rules).is_ok());
        assert!(RequestValidator::validate(&attrs(json!({"level": 3})), &rules).is_err());
    }
}
