use super::gateway::AiGateway;
use super::prompts::{TASK_REWRITE_SYSTEM, TASK_SUMMARY_SYSTEM};
use super::structured::extract_json_block;
use super::GenerateRequest;
use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const NO_JSON_TITLE: &str = "[AI returned no JSON]";
pub const MALFORMED_JSON_TITLE: &str = "[AI returned malformed JSON]";
pub const EMPTY_TITLE: &str = "[AI returned empty title]";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiTaskInput {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiTaskOutput {
    pub title: String,
    pub content: String,
}

impl From<&AiTaskInput> for AiTaskOutput {
    fn from(input: &AiTaskInput) -> Self {
        Self {
            title: input.title.clone(),
            content: input.content.clone(),
        }
    }
}

/// Rewrites a task's title and body. Never fails: backend errors hand back the
/// input unchanged and unusable replies produce a marker title.
pub async fn rewrite_task(gateway: &AiGateway, input: &AiTaskInput) -> AiTaskOutput {
    let payload = serde_json::to_string_pretty(input).unwrap_or_default();
    let request = GenerateRequest::new("TASK_REWRITE", format!("INPUT (JSON):\n{}", payload))
        .with_system(TASK_REWRITE_SYSTEM);

    let raw = match gateway.generate(request).await {
        Ok(generation) => generation.text,
        Err(error) => {
            tracing::warn!(error = %error, "task rewrite failed, keeping original");
            return AiTaskOutput::from(input);
        }
    };

    let output = interpret_rewrite(&raw, input);
    gateway.log_prompt(&payload, &serde_json::to_string(&output).unwrap_or_default());
    output
}

pub(crate) fn interpret_rewrite(raw: &str, input: &AiTaskInput) -> AiTaskOutput {
    let Some(block) = extract_json_block(raw) else {
        tracing::warn!("task rewrite returned no JSON");
        return AiTaskOutput {
            title: NO_JSON_TITLE.to_string(),
            content: input.content.clone(),
        };
    };

    let parsed: Value = match serde_json::from_str(block) {
        Ok(parsed) => parsed,
        Err(error) => {
            tracing::warn!(error = %error, "task rewrite returned malformed JSON");
            return AiTaskOutput {
                title: MALFORMED_JSON_TITLE.to_string(),
                content: input.content.clone(),
            };
        }
    };

    let title = parsed
        .get("title")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .unwrap_or(EMPTY_TITLE)
        .to_string();
    let content = parsed
        .get("content")
        .and_then(Value::as_str)
        .map(|content| content.trim().to_string())
        .unwrap_or_default();

    AiTaskOutput { title, content }
}

pub async fn summarize_task(gateway: &AiGateway, text: &str) -> AppResult<String> {
    if text.trim().is_empty() {
        return Err(AppError::InvalidInput("Nothing to summarize.".to_string()));
    }
    let request = GenerateRequest::new("TASK_SUMMARY", text).with_system(TASK_SUMMARY_SYSTEM);
    let generation = gateway.generate(request).await?;
    Ok(generation.text.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::{interpret_rewrite, rewrite_task, summarize_task, AiTaskInput, AiTaskOutput, EMPTY_TITLE, MALFORMED_JSON_TITLE, NO_JSON_TITLE};
    use crate::ai::gateway::testing::{ok, scripted_gateway};
    use crate::errors::AppError;

    fn input() -> AiTaskInput {
        AiTaskInput {
            title: "call bob abt invoice".to_string(),
            content: "he owes us".to_string(),
        }
    }

    #[test]
    fn unusable_replies_get_marker_titles() {
        let no_json = interpret_rewrite("Sorry, I can't help", &input());
        assert_eq!(no_json.title, NO_JSON_TITLE);
        assert_eq!(no_json.content, "he owes us");

        let malformed = interpret_rewrite("{ title: nope }", &input());
        assert_eq!(malformed.title, MALFORMED_JSON_TITLE);

        let empty = interpret_rewrite(r#"{"title": "  ", "content": 4}"#, &input());
        assert_eq!(empty.title, EMPTY_TITLE);
        assert_eq!(empty.content, "");
    }

    #[tokio::test]
    async fn rewrite_trims_the_model_reply() {
        let (gateway, backend) = scripted_gateway(vec![ok(
            "```json\n{\"title\": \" Call Bob about the invoice \", \"content\": \"Outstanding balance. \"}\n```",
        )]);
        let output = rewrite_task(&gateway, &input()).await;
        assert_eq!(output.title, "Call Bob about the invoice");
        assert_eq!(output.content, "Outstanding balance.");
        assert!(backend.requests()[0].prompt.contains("call bob abt invoice"));
    }

    #[tokio::test]
    async fn backend_failure_returns_the_input() {
        let (gateway, _) = scripted_gateway(vec![Err(AppError::Quota("HTTP 429".to_string()))]);
        let output = rewrite_task(&gateway, &input()).await;
        assert_eq!(output, AiTaskOutput::from(&input()));
        assert!(gateway.tracker().history().is_empty());
    }

    #[tokio::test]
    async fn summarize_rejects_blank_text() {
        let (gateway, _) = scripted_gateway(vec![ok("  Short summary. ")]);
        assert!(matches!(
            summarize_task(&gateway, "   ").await,
            Err(AppError::InvalidInput(_))
        ));
        assert_eq!(summarize_task(&gateway, "long notes").await.expect("summary"), "Short summary.");
    }
}
