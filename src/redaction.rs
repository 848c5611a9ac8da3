use once_cell::sync::Lazy;
use regex::Regex;

static SECRET_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r#"(?i)(api[_-]?key|key|token|secret|password|authorization)\s*[:=]\s*["']?(?:bearer\s+)?([A-Za-z0-9_\-\.]{6,})["']?"#)
            .expect("valid regex"),
        // Google API keys.
        Regex::new(r"\b(AIza[0-9A-Za-z_\-]{30,})\b").expect("valid regex"),
        Regex::new(r"\b(sk-[A-Za-z0-9]{20,})\b").expect("valid regex"),
    ]
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedactionResult {
    pub content: String,
    pub redaction_count: usize,
}

/// Scrubs credentials out of text before it is logged or mirrored remotely.
#[derive(Debug, Default, Clone)]
pub struct Redactor {
    extra: Vec<String>,
}

impl Redactor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also replace these literal values, e.g. the configured API key.
    pub fn with_known_secrets(secrets: impl IntoIterator<Item = String>) -> Self {
        Self {
            extra: secrets.into_iter().filter(|secret| secret.len() >= 6).collect(),
        }
    }

    pub fn redact(&self, input: &str) -> RedactionResult {
        if input.is_empty() {
            return RedactionResult {
                content: String::new(),
                redaction_count: 0,
            };
        }

        let mut result = input.to_string();
        let mut redaction_count = 0usize;

        for secret in &self.extra {
            let matches = result.matches(secret.as_str()).count();
            if matches > 0 {
                redaction_count += matches;
                result = result.replace(secret.as_str(), "[REDACTED]");
            }
        }

        for pattern in SECRET_PATTERNS.iter() {
            let matches = pattern.find_iter(&result).count();
            if matches == 0 {
                continue;
            }

            redaction_count += matches;
            result = pattern
                .replace_all(&result, |caps: &regex::Captures<'_>| {
                    if caps.len() > 2 {
                        let key = caps
                            .get(1)
                            .map(|m| m.as_str())
                            .unwrap_or("secret")
                            .to_ascii_lowercase();
                        format!("{}=[REDACTED]", key)
                    } else {
                        "[REDACTED]".to_string()
                    }
                })
                .to_string();
        }

        RedactionResult {
            content: result,
            redaction_count,
        }
    }

    pub fn scrub(&self, input: &str) -> String {
        self.redact(input).content
    }
}
