use super::selector::BackendSelector;
use super::tokens::{TokenTracker, UsageEntry};
use super::{BackendKind, GenerateRequest, Generation, TextBackend};
use crate::errors::AppResult;
use crate::models::{generate_id, AiLogEntry, PromptLog};
use crate::redaction::Redactor;
use crate::sync::{Change, SyncQueue};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

/// Single entry point for AI calls: routes to the preferred backend, meters
/// usage and mirrors a redacted log of each exchange.
pub struct AiGateway {
    selector: Arc<BackendSelector>,
    hosted: Arc<dyn TextBackend>,
    local: Arc<dyn TextBackend>,
    tracker: Arc<TokenTracker>,
    sync: Option<SyncQueue>,
    redactor: Redactor,
}

impl AiGateway {
    pub fn new(
        selector: Arc<BackendSelector>,
        hosted: Arc<dyn TextBackend>,
        local: Arc<dyn TextBackend>,
        tracker: Arc<TokenTracker>,
    ) -> Self {
        Self {
            selector,
            hosted,
            local,
            tracker,
            sync: None,
            redactor: Redactor::new(),
        }
    }

    pub fn with_sync(mut self, queue: SyncQueue) -> Self {
        self.sync = Some(queue);
        self
    }

    pub fn with_redactor(mut self, redactor: Redactor) -> Self {
        self.redactor = redactor;
        self
    }

    pub fn selector(&self) -> &BackendSelector {
        &self.selector
    }

    pub fn tracker(&self) -> &TokenTracker {
        &self.tracker
    }

    pub fn active_kind(&self) -> BackendKind {
        self.selector.preferred()
    }

    fn backend_for(&self, kind: BackendKind) -> &Arc<dyn TextBackend> {
        match kind {
            BackendKind::Hosted => &self.hosted,
            BackendKind::Local => &self.local,
        }
    }

    pub async fn is_available(&self) -> bool {
        self.backend_for(self.active_kind()).is_available().await
    }

    pub async fn generate(&self, request: GenerateRequest) -> AppResult<Generation> {
        self.generate_with_metadata(request, Value::Null).await
    }

    /// Like [`generate`](Self::generate); `metadata` object fields are merged
    /// into the mirrored log entry.
    pub async fn generate_with_metadata(&self, request: GenerateRequest, metadata: Value) -> AppResult<Generation> {
        let kind = self.active_kind();
        let backend = self.backend_for(kind);
        let generation = match backend.generate(&request).await {
            Ok(generation) => generation,
            Err(error) => {
                tracing::warn!(
                    label = %request.label,
                    backend = %kind,
                    error = %self.redactor.scrub(&error.to_string()),
                    "ai request failed"
                );
                return Err(error);
            }
        };

        self.tracker.record(UsageEntry {
            prompt: generation.usage.prompt,
            response: generation.usage.response,
            total: generation.usage.total,
            timestamp: Utc::now(),
            label: request.label.clone(),
            category: request.category(),
            backend: kind,
            latency_ms: Some(generation.latency_ms),
            prompt_length: request.prompt_chars(),
            response_length: generation.text.chars().count(),
            estimated: generation.estimated,
        });
        tracing::info!(
            label = %request.label,
            backend = %kind,
            tokens = generation.usage.total,
            latency_ms = generation.latency_ms,
            estimated = generation.estimated,
            "ai request completed"
        );

        let mut log_metadata = json!({
            "backend": kind.as_str(),
            "tokens": generation.usage.total,
            "latencyMs": generation.latency_ms,
        });
        if let (Some(target), Value::Object(extra)) = (log_metadata.as_object_mut(), metadata) {
            target.extend(extra);
        }
        self.log_interaction(&request.label, &request.prompt, &generation.text, Some(log_metadata));

        Ok(generation)
    }

    /// Mirrors a redacted exchange to the `ai_logs` table.
    pub fn log_interaction(
        &self,
        event_type: &str,
        user_message: &str,
        ai_message: &str,
        metadata: Option<Value>,
    ) -> AiLogEntry {
        let entry = AiLogEntry {
            id: generate_id(),
            created_at: Utc::now(),
            event_type: event_type.to_string(),
            user_message: self.redactor.scrub(user_message),
            ai_message: self.redactor.scrub(ai_message),
            metadata,
        };
        if let Some(queue) = &self.sync {
            queue.enqueue(Change::InsertAiLog(entry.clone()));
        }
        entry
    }

    /// Mirrors a redacted prompt/response pair to the `prompts` table.
    pub fn log_prompt(&self, user_input: &str, ai_output: &str) -> PromptLog {
        let entry = PromptLog {
            id: generate_id(),
            created_at: Utc::now(),
            user_input: self.redactor.scrub(user_input),
            ai_output: self.redactor.scrub(ai_output),
        };
        if let Some(queue) = &self.sync {
            queue.enqueue(Change::InsertPrompt(entry.clone()));
        }
        entry
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::AiGateway;
    use crate::ai::selector::BackendSelector;
    use crate::ai::tokens::TokenTracker;
    use crate::ai::{BackendKind, GenerateRequest, Generation, TextBackend, TokenCounts};
    use crate::errors::{AppError, AppResult};
    use crate::kv::MemoryKv;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Backend that answers from a fixed list of replies and records requests.
    pub struct ScriptedBackend {
        kind: BackendKind,
        replies: Mutex<VecDeque<AppResult<String>>>,
        pub requests: Mutex<Vec<GenerateRequest>>,
    }

    impl ScriptedBackend {
        pub fn new(kind: BackendKind, replies: Vec<AppResult<String>>) -> Self {
            Self {
                kind,
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn requests(&self) -> Vec<GenerateRequest> {
            self.requests.lock().expect("requests lock").clone()
        }
    }

    #[async_trait]
    impl TextBackend for ScriptedBackend {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        async fn generate(&self, request: &GenerateRequest) -> AppResult<Generation> {
            self.requests.lock().expect("requests lock").push(request.clone());
            let reply = self
                .replies
                .lock()
                .expect("replies lock")
                .pop_front()
                .unwrap_or_else(|| Err(AppError::Ai("no scripted reply".to_string())))?;
            Ok(Generation {
                usage: TokenCounts::estimate(request.prompt_chars(), reply.len()),
                text: reply,
                latency_ms: 5,
                estimated: true,
            })
        }

        async fn is_available(&self) -> bool {
            true
        }
    }

    /// Gateway on the hosted backend, answering with `replies` in order.
    pub fn scripted_gateway(replies: Vec<AppResult<String>>) -> (AiGateway, Arc<ScriptedBackend>) {
        let hosted = Arc::new(ScriptedBackend::new(BackendKind::Hosted, replies));
        let local = Arc::new(ScriptedBackend::new(BackendKind::Local, vec![]));
        let kv = Arc::new(MemoryKv::new());
        let selector = Arc::new(BackendSelector::new(kv.clone(), local.clone()));
        let tracker = Arc::new(TokenTracker::new(kv));
        (AiGateway::new(selector, hosted.clone(), local, tracker), hosted)
    }

    pub fn ok(text: &str) -> AppResult<String> {
        Ok(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{ok, scripted_gateway, ScriptedBackend};
    use super::AiGateway;
    use crate::ai::selector::BackendSelector;
    use crate::ai::tokens::TokenTracker;
    use crate::ai::{BackendKind, GenerateRequest};
    use crate::errors::{AppError, AppResult};
    use crate::kv::MemoryKv;
    use crate::redaction::Redactor;
    use crate::sync::{Change, RemoteStore, SyncQueue};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct CapturingRemote {
        changes: Mutex<Vec<Change>>,
    }

    #[async_trait]
    impl RemoteStore for CapturingRemote {
        async fn apply(&self, change: &Change) -> AppResult<()> {
            self.changes.lock().expect("changes lock").push(change.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn records_one_usage_entry_per_successful_call() {
        let (gateway, _) = scripted_gateway(vec![
            ok("first"),
            Err(AppError::Quota("HTTP 429".to_string())),
            ok("third"),
        ]);

        gateway.generate(GenerateRequest::new("TASK_REWRITE", "a")).await.expect("first");
        let err = gateway
            .generate(GenerateRequest::new("TASK_REWRITE", "b"))
            .await
            .expect_err("quota");
        assert!(err.is_quota());
        gateway.generate(GenerateRequest::new("SPACE_CHAT", "c")).await.expect("third");

        let history = gateway.tracker().history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].label, "TASK_REWRITE");
        assert_eq!(history[1].label, "SPACE_CHAT");
        assert_eq!(history[0].backend, BackendKind::Hosted);
    }

    #[tokio::test]
    async fn routes_to_the_selected_backend() {
        let hosted = Arc::new(ScriptedBackend::new(BackendKind::Hosted, vec![ok("cloud")]));
        let local = Arc::new(ScriptedBackend::new(BackendKind::Local, vec![ok("laptop")]));
        let kv = Arc::new(MemoryKv::new());
        let selector = Arc::new(BackendSelector::new(kv.clone(), local.clone()));
        let gateway = AiGateway::new(selector, hosted.clone(), local.clone(), Arc::new(TokenTracker::new(kv)));

        gateway.selector().set_preferred(BackendKind::Local).await.expect("switch");
        let generation = gateway.generate(GenerateRequest::new("TASK", "hi")).await.expect("generate");
        assert_eq!(generation.text, "laptop");
        assert!(hosted.requests().is_empty());
        assert_eq!(gateway.tracker().history()[0].backend, BackendKind::Local);
    }

    #[tokio::test]
    async fn mirrors_redacted_logs_through_the_queue() {
        let remote = Arc::new(CapturingRemote::default());
        let queue = SyncQueue::new(remote.clone());
        let (gateway, _) = scripted_gateway(vec![ok("done")]);
        let gateway = gateway
            .with_sync(queue.clone())
            .with_redactor(Redactor::with_known_secrets(vec!["AIzaSECRETSECRET".to_string()]));

        gateway
            .generate_with_metadata(
                GenerateRequest::new("SPACE_AGENT", "my key is AIzaSECRETSECRET"),
                serde_json::json!({ "spaceId": "s1" }),
            )
            .await
            .expect("generate");
        queue.wait_idle().await;

        let changes = remote.changes.lock().expect("changes lock").clone();
        assert_eq!(changes.len(), 1);
        let Change::InsertAiLog(entry) = &changes[0] else {
            panic!("expected an ai log, got {:?}", changes[0]);
        };
        assert_eq!(entry.event_type, "SPACE_AGENT");
        assert!(!entry.user_message.contains("AIzaSECRETSECRET"));
        let metadata = entry.metadata.as_ref().expect("metadata");
        assert_eq!(metadata["spaceId"], "s1");
        assert_eq!(metadata["backend"], "gemini");
    }
}
