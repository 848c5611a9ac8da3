use super::{BackendKind, GenerateRequest, Generation, TextBackend, TokenCounts};
use crate::errors::{looks_like_quota, AppError, AppResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::RwLock;
use std::time::Instant;

pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: RwLock<Option<String>>,
}

impl GeminiClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: normalize_model(&model.into()),
            api_key: RwLock::new(clean_key(api_key)),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.read().unwrap_or_else(|poisoned| poisoned.into_inner()).is_some()
    }

    /// Replaces the key after it is saved to or cleared from the keyring.
    pub fn set_api_key(&self, api_key: Option<String>) {
        *self.api_key.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = clean_key(api_key);
    }

    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
    }

    fn api_key(&self) -> AppResult<String> {
        let key = self.api_key.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone();
        key.ok_or_else(|| {
            AppError::Config(
                "Gemini API key not configured. Save one in settings or switch to the local model.".to_string(),
            )
        })
    }
}

fn clean_key(api_key: Option<String>) -> Option<String> {
    api_key
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
}

/// Accepts both `gemini-2.5-flash` and `models/gemini-2.5-flash`.
fn normalize_model(raw: &str) -> String {
    raw.trim().trim_start_matches("models/").to_string()
}

pub(crate) fn build_request_body(request: &GenerateRequest) -> Value {
    let mut parts = vec![json!({ "text": request.prompt })];
    if let Some(image) = &request.image {
        parts.push(json!({
            "inline_data": {
                "mime_type": image.mime_type,
                "data": image.base64(),
            }
        }));
    }

    let mut body = json!({
        "contents": [ { "role": "user", "parts": parts } ],
    });
    if let Some(system) = request.system.as_deref().filter(|system| !system.trim().is_empty()) {
        body["systemInstruction"] = json!({ "parts": [ { "text": system } ] });
    }
    if let Some(temperature) = request.temperature {
        body["generationConfig"] = json!({ "temperature": temperature });
    }
    body
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
    #[serde(default)]
    total_token_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

/// Text of the first candidate and the reported usage.
pub(crate) fn parse_response(raw: &str) -> AppResult<(String, TokenCounts)> {
    let response: GenerateResponse =
        serde_json::from_str(raw).map_err(|error| AppError::Ai(format!("Unexpected Gemini response: {}", error)))?;

    if let Some(reason) = response.prompt_feedback.and_then(|feedback| feedback.block_reason) {
        return Err(AppError::Ai(format!("Gemini blocked the prompt: {}", reason)));
    }

    let text = response
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .ok_or_else(|| AppError::Ai("Gemini returned no candidates".to_string()))?;

    let usage = response
        .usage_metadata
        .map(|usage| TokenCounts {
            prompt: usage.prompt_token_count,
            response: usage.candidates_token_count,
            total: if usage.total_token_count > 0 {
                usage.total_token_count
            } else {
                usage.prompt_token_count + usage.candidates_token_count
            },
        })
        .unwrap_or_default();

    Ok((text.trim().to_string(), usage))
}

/// Maps a non-success HTTP reply onto the crate error taxonomy.
pub(crate) fn classify_failure(status: u16, body: &str) -> AppError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            let error = value.get("error")?;
            let text = error.get("message").and_then(Value::as_str).unwrap_or_default();
            let code = error.get("status").and_then(Value::as_str).unwrap_or_default();
            Some(format!("{} {}", code, text).trim().to_string())
        })
        .unwrap_or_else(|| body.chars().take(300).collect());

    if looks_like_quota(Some(status), &message) {
        AppError::Quota(format!("HTTP {}: {}", status, message))
    } else {
        AppError::Ai(format!("Gemini request failed (HTTP {}): {}", status, message))
    }
}

#[async_trait]
impl TextBackend for GeminiClient {
    fn kind(&self) -> BackendKind {
        BackendKind::Hosted
    }

    async fn generate(&self, request: &GenerateRequest) -> AppResult<Generation> {
        let api_key = self.api_key()?;
        let started = Instant::now();
        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", api_key.as_str())
            .json(&build_request_body(request))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(classify_failure(status.as_u16(), &body));
        }

        let (text, usage) = parse_response(&body)?;
        Ok(Generation {
            text,
            usage,
            latency_ms: started.elapsed().as_millis() as u64,
            estimated: false,
        })
    }

    /// Hosted availability only depends on having a key.
    async fn is_available(&self) -> bool {
        self.has_api_key()
    }
}
