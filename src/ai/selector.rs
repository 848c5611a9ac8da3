use super::{BackendKind, TextBackend};
use crate::errors::{AppError, AppResult};
use crate::kv::KvStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

pub const MODEL_PREFERENCE_KEY: &str = "ai_model_preference";

pub type SubscriptionId = u64;
type Listener = Arc<dyn Fn(BackendKind) + Send + Sync>;

/// Persisted choice between the hosted and the local backend.
pub struct BackendSelector {
    kv: Arc<dyn KvStore>,
    local: Arc<dyn TextBackend>,
    current: RwLock<BackendKind>,
    listeners: Mutex<Vec<(SubscriptionId, Listener)>>,
    next_id: AtomicU64,
}

impl BackendSelector {
    /// `local` is only used to probe reachability before it is selected.
    pub fn new(kv: Arc<dyn KvStore>, local: Arc<dyn TextBackend>) -> Self {
        let current = match kv.get(MODEL_PREFERENCE_KEY) {
            Ok(Some(raw)) => BackendKind::parse(&raw).unwrap_or_else(|| {
                tracing::warn!(value = %raw, "unknown model preference, using gemini");
                BackendKind::Hosted
            }),
            Ok(None) => BackendKind::Hosted,
            Err(error) => {
                tracing::warn!(error = %error, "failed to read model preference");
                BackendKind::Hosted
            }
        };
        Self {
            kv,
            local,
            current: RwLock::new(current),
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn preferred(&self) -> BackendKind {
        *self.current.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Switches backends. Choosing the local server probes it first; when it is
    /// unreachable the call fails and the previous choice stays active.
    pub async fn set_preferred(&self, choice: BackendKind) -> AppResult<BackendKind> {
        let previous = self.preferred();
        if previous == choice {
            return Ok(previous);
        }

        if choice == BackendKind::Local && !self.local.is_available().await {
            tracing::warn!(previous = %previous, "local model unreachable, keeping current backend");
            return Err(AppError::Unavailable(
                "Ollama is not running. Start it with `ollama serve` and try again.".to_string(),
            ));
        }

        self.kv.set(MODEL_PREFERENCE_KEY, choice.as_str())?;
        *self.current.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = choice;
        tracing::info!(from = %previous, to = %choice, "ai backend switched");
        self.notify(choice);
        Ok(choice)
    }

    pub fn subscribe(&self, listener: impl Fn(BackendKind) + Send + Sync + 'static) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    fn notify(&self, choice: BackendKind) {
        // Listeners run outside the lock so they may (un)subscribe.
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect::<Vec<_>>();
        for listener in listeners {
            listener(choice);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BackendSelector, MODEL_PREFERENCE_KEY};
    use crate::ai::{BackendKind, GenerateRequest, Generation, TextBackend};
    use crate::errors::{AppError, AppResult};
    use crate::kv::{KvStore, MemoryKv};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Probe(AtomicBool);

    #[async_trait]
    impl TextBackend for Probe {
        fn kind(&self) -> BackendKind {
            BackendKind::Local
        }

        async fn generate(&self, _request: &GenerateRequest) -> AppResult<Generation> {
            Err(AppError::Unavailable("probe only".to_string()))
        }

        async fn is_available(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn reads_and_persists_preference() {
        let kv = Arc::new(MemoryKv::new());
        kv.set(MODEL_PREFERENCE_KEY, "ollama").expect("seed");
        let selector = BackendSelector::new(kv.clone(), Arc::new(Probe(AtomicBool::new(true))));
        assert_eq!(selector.preferred(), BackendKind::Local);

        selector.set_preferred(BackendKind::Hosted).await.expect("switch");
        assert_eq!(kv.get(MODEL_PREFERENCE_KEY).expect("get").as_deref(), Some("gemini"));
    }

    #[tokio::test]
    async fn unreachable_local_is_rejected() {
        let kv = Arc::new(MemoryKv::new());
        let selector = BackendSelector::new(kv.clone(), Arc::new(Probe(AtomicBool::new(false))));
        let err = selector.set_preferred(BackendKind::Local).await.expect_err("rejected");
        assert!(matches!(err, AppError::Unavailable(_)));
        assert_eq!(selector.preferred(), BackendKind::Hosted);
        assert!(kv.get(MODEL_PREFERENCE_KEY).expect("get").is_none());
    }

    #[tokio::test]
    async fn listeners_hear_changes_until_unsubscribed() {
        let selector = BackendSelector::new(
            Arc::new(MemoryKv::new()),
            Arc::new(Probe(AtomicBool::new(true))),
        );
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let id = selector.subscribe(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        selector.set_preferred(BackendKind::Local).await.expect("local");
        selector.set_preferred(BackendKind::Local).await.expect("unchanged");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(selector.unsubscribe(id));
        selector.set_preferred(BackendKind::Hosted).await.expect("hosted");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn garbage_preference_defaults_to_hosted() {
        let kv = Arc::new(MemoryKv::new());
        kv.set(MODEL_PREFERENCE_KEY, "gpt").expect("seed");
        let selector = BackendSelector::new(kv, Arc::new(Probe(AtomicBool::new(true))));
        assert_eq!(selector.preferred(), BackendKind::Hosted);
    }
}
