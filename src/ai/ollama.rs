use super::{BackendKind, GenerateRequest, Generation, TextBackend, TokenCounts};
use crate::errors::{AppError, AppResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Instant;

pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    text_model: String,
    vision_model: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OllamaModel {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub modified_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<OllamaModel>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

impl OllamaClient {
    pub fn new(
        base_url: impl Into<String>,
        text_model: impl Into<String>,
        vision_model: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            text_model: text_model.into(),
            vision_model: vision_model.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Image requests go to the vision model, everything else to the text model.
    pub fn model_for(&self, request: &GenerateRequest) -> &str {
        if request.image.is_some() {
            &self.vision_model
        } else {
            &self.text_model
        }
    }

    pub async fn list_models(&self) -> AppResult<Vec<OllamaModel>> {
        let response = self
            .http
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map_err(|error| self.connect_error(error))?;
        if !response.status().is_success() {
            return Err(AppError::Ai(format!(
                "Ollama model listing failed (HTTP {})",
                response.status().as_u16()
            )));
        }
        let tags: TagsResponse = response.json().await?;
        Ok(tags.models)
    }

    fn connect_error(&self, error: reqwest::Error) -> AppError {
        if error.is_connect() {
            AppError::Unavailable(format!(
                "Ollama is not reachable at {}. Start it with `ollama serve` or switch to Gemini.",
                self.base_url
            ))
        } else {
            AppError::from(error)
        }
    }
}

pub(crate) fn build_request_body(model: &str, request: &GenerateRequest) -> Value {
    let mut body = json!({
        "model": model,
        "prompt": request.prompt,
        "stream": false,
    });
    if let Some(system) = request.system.as_deref().filter(|system| !system.trim().is_empty()) {
        body["system"] = json!(system);
    }
    if let Some(image) = &request.image {
        body["images"] = json!([image.base64()]);
    }
    if let Some(temperature) = request.temperature {
        body["options"] = json!({ "temperature": temperature });
    }
    body
}

/// Parsed text, token counts and whether the counts are estimates.
pub(crate) fn parse_response(raw: &str, prompt_chars: usize) -> AppResult<(String, TokenCounts, bool)> {
    let response: GenerateResponse =
        serde_json::from_str(raw).map_err(|error| AppError::Ai(format!("Unexpected Ollama response: {}", error)))?;
    let text = response.response.trim().to_string();

    match (response.prompt_eval_count, response.eval_count) {
        (None, None) => {
            let usage = TokenCounts::estimate(prompt_chars, text.chars().count());
            Ok((text, usage, true))
        }
        (prompt, eval) => {
            let prompt = prompt.unwrap_or(0);
            let eval = eval.unwrap_or(0);
            Ok((
                text,
                TokenCounts {
                    prompt,
                    response: eval,
                    total: prompt + eval,
                },
                false,
            ))
        }
    }
}

#[async_trait]
impl TextBackend for OllamaClient {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn generate(&self, request: &GenerateRequest) -> AppResult<Generation> {
        let model = self.model_for(request).to_string();
        let started = Instant::now();
        let response = self
            .http
            .post(format!("{}/api/generate", self.base_url))
            .json(&build_request_body(&model, request))
            .send()
            .await
            .map_err(|error| self.connect_error(error))?;

        let status = response.status();
        let body = response.text().await?;
        if status.as_u16() == 404 {
            return Err(AppError::Ai(format!(
                "Model '{}' is not installed. Run `ollama pull {}`.",
                model, model
            )));
        }
        if !status.is_success() {
            return Err(AppError::Ai(format!(
                "Ollama request failed (HTTP {}): {}",
                status.as_u16(),
                body.chars().take(300).collect::<String>()
            )));
        }

        let (text, usage, estimated) = parse_response(&body, request.prompt_chars())?;
        Ok(Generation {
            text,
            usage,
            latency_ms: started.elapsed().as_millis() as u64,
            estimated,
        })
    }

    async fn is_available(&self) -> bool {
        match self.http.get(format!("{}/api/tags", self.base_url)).send().await {
            Ok(response) => response.status().is_success(),
            Err(error) => {
                tracing::debug!(error = %error.without_url(), "ollama probe failed");
                false
            }
        }
    }
}
