use crate::errors::{AppError, AppResult};
use serde::de::DeserializeOwned;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct StructuredOutputValidationResult {
    pub value: Option<Value>,
    pub error: Option<String>,
    pub errors: Vec<String>,
}

/// Pulls the outermost `{...}` out of a model reply, ignoring code fences and chatter.
pub fn extract_json_block(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

pub fn parse_json_block(raw: &str) -> Option<Value> {
    extract_json_block(raw).and_then(|block| serde_json::from_str(block).ok())
}

/// Extracts, parses and checks a reply against `schema`, then deserializes it.
pub fn parse_structured<T: DeserializeOwned>(raw: &str, schema: &Value, what: &str) -> AppResult<T> {
    let block = extract_json_block(raw)
        .ok_or_else(|| AppError::Parse(format!("{} returned no JSON", what)))?;
    let value: Value = serde_json::from_str(block)
        .map_err(|error| AppError::Parse(format!("{} returned invalid JSON: {}", what, error)))?;
    let validation = validate_structured_output(Some(value), Some(schema));
    if let Some(error) = validation.error {
        return Err(AppError::Parse(format!("{}: {} {}", what, error, validation.errors.join("; "))));
    }
    let value = validation
        .value
        .ok_or_else(|| AppError::Parse(format!("{} returned no JSON", what)))?;
    serde_json::from_value(value).map_err(|error| AppError::Parse(format!("{}: {}", what, error)))
}

pub fn validate_structured_output(
    value: Option<Value>,
    schema: Option<&Value>,
) -> StructuredOutputValidationResult {
    let Some(value) = value else {
        if schema.is_some() {
            return StructuredOutputValidationResult {
                value: None,
                error: Some("Structured output is missing or invalid JSON.".to_string()),
                errors: vec![],
            };
        }
        return StructuredOutputValidationResult {
            value: None,
            error: None,
            errors: vec![],
        };
    };

    let Some(schema) = schema else {
        return StructuredOutputValidationResult {
            value: Some(value),
            error: None,
            errors: vec![],
        };
    };

    let compiled = match jsonschema::JSONSchema::compile(schema) {
        Ok(compiled) => compiled,
        Err(error) => {
            return StructuredOutputValidationResult {
                value: Some(value),
                error: Some(format!("Failed to validate structured output schema: {}", error)),
                errors: vec![],
            }
        }
    };

    let errors: Vec<String> = compiled
        .validate(&value)
        .err()
        .map(|errors| {
            errors
                .map(|error| {
                    let path = error.instance_path.to_string();
                    if path.is_empty() {
                        error.to_string()
                    } else {
                        format!("{}: {}", path, error)
                    }
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    if errors.is_empty() {
        StructuredOutputValidationResult {
            value: Some(value),
            error: None,
            errors,
        }
    } else {
        StructuredOutputValidationResult {
            value: Some(value),
            error: Some("Structured output did not match schema.".to_string()),
            errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{extract_json_block, parse_structured, validate_structured_output};
    use serde::Deserialize;

    #[test]
    fn finds_json_inside_fences_and_prose() {
        let raw = "Sure! Here you go:\n```json\n{\"title\": \"A\", \"nested\": {\"b\": 1}}\n```\nAnything else?";
        assert_eq!(
            extract_json_block(raw),
            Some("{\"title\": \"A\", \"nested\": {\"b\": 1}}")
        );
        assert!(extract_json_block("no braces here").is_none());
        assert!(extract_json_block("} backwards {").is_none());
    }

    #[test]
    fn validates_schema_and_reports_errors() {
        let schema = serde_json::json!({
            "type": "object",
            "properties": { "ok": { "type": "boolean" } },
            "required": ["ok"]
        });
        let validation = validate_structured_output(Some(serde_json::json!({"ok": "nope"})), Some(&schema));
        assert!(validation.error.is_some());
        assert!(!validation.errors.is_empty());
    }

    #[test]
    fn parse_structured_deserializes_valid_replies() {
        #[derive(Debug, Deserialize)]
        struct Reply {
            summary: String,
        }
        let schema = serde_json::json!({
            "type": "object",
            "properties": { "summary": { "type": "string" } },
            "required": ["summary"]
        });
        let reply: Reply = parse_structured("```{\"summary\":\"fine\"}```", &schema, "Analysis").expect("reply");
        assert_eq!(reply.summary, "fine");
        let err = parse_structured::<Reply>("{\"summary\": 3}", &schema, "Analysis").expect_err("schema");
        assert!(err.to_string().starts_with("AI_PARSE"));
    }
}
