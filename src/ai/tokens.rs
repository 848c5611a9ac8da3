use super::{BackendKind, UsageCategory};
use crate::kv::KvStore;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

pub const TOKEN_TRACKER_KEY: &str = "token_tracker_data";
/// Hosted free tier: 20 requests per rolling 24 hours.
pub const FREE_TIER_REQUESTS_24H: usize = 20;
const NEAR_LIMIT_RATIO: f64 = 0.8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEntry {
    pub prompt: u64,
    pub response: u64,
    pub total: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub label: String,
    #[serde(default)]
    pub category: UsageCategory,
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default)]
    pub prompt_length: usize,
    #[serde(default)]
    pub response_length: usize,
    #[serde(default)]
    pub estimated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryStats {
    pub tokens: u64,
    pub requests: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestLimit {
    pub current: usize,
    pub max: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    pub total: u64,
    pub last_hour: u64,
    pub count: usize,
    pub by_label: BTreeMap<String, u64>,
    pub by_category: BTreeMap<String, CategoryStats>,
    pub request_limit: RequestLimit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Stored {
    #[serde(default)]
    usage_history: Vec<UsageEntry>,
    #[serde(default)]
    total_tokens: u64,
    #[serde(default = "Utc::now")]
    last_reset: DateTime<Utc>,
}

impl Default for Stored {
    fn default() -> Self {
        Self {
            usage_history: Vec::new(),
            total_tokens: 0,
            last_reset: Utc::now(),
        }
    }
}

type Listener = Arc<dyn Fn() + Send + Sync>;

/// Rolling 24-hour record of AI requests, persisted in the preference store.
pub struct TokenTracker {
    kv: Arc<dyn KvStore>,
    data: Mutex<Stored>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
}

impl TokenTracker {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        let mut stored = match kv.get(TOKEN_TRACKER_KEY) {
            Ok(Some(raw)) => serde_json::from_str::<Stored>(&raw).unwrap_or_else(|error| {
                tracing::warn!(error = %error, "discarding unreadable token usage history");
                Stored::default()
            }),
            Ok(None) => Stored::default(),
            Err(error) => {
                tracing::warn!(error = %error, "failed to read token usage history");
                Stored::default()
            }
        };
        prune(&mut stored.usage_history, Utc::now());
        Self {
            kv,
            data: Mutex::new(stored),
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn record(&self, entry: UsageEntry) {
        {
            let mut data = self.data();
            data.total_tokens += entry.total;
            data.usage_history.push(entry);
            prune(&mut data.usage_history, Utc::now());
            self.persist(&data);
        }
        self.notify();
    }

    pub fn history(&self) -> Vec<UsageEntry> {
        let cutoff = Utc::now() - Duration::hours(24);
        self.data()
            .usage_history
            .iter()
            .filter(|entry| entry.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    /// Tokens used in the last 24 hours.
    pub fn total_tokens(&self) -> u64 {
        self.history().iter().map(|entry| entry.total).sum()
    }

    pub fn lifetime_tokens(&self) -> u64 {
        self.data().total_tokens
    }

    pub fn requests_last_24h(&self) -> usize {
        self.history().len()
    }

    pub fn is_near_limit(&self) -> bool {
        self.requests_last_24h() as f64 >= FREE_TIER_REQUESTS_24H as f64 * NEAR_LIMIT_RATIO
    }

    pub fn stats(&self) -> UsageStats {
        let now = Utc::now();
        let hour_ago = now - Duration::hours(1);
        let history = self.history();

        let mut by_label = BTreeMap::new();
        let mut by_category: BTreeMap<String, CategoryStats> = BTreeMap::new();
        for entry in &history {
            *by_label.entry(entry.label.clone()).or_insert(0) += entry.total;
            let category = match entry.category {
                UsageCategory::Vision => "vision",
                UsageCategory::Analysis => "analysis",
            };
            let stats = by_category.entry(category.to_string()).or_default();
            stats.tokens += entry.total;
            stats.requests += 1;
        }

        UsageStats {
            total: history.iter().map(|entry| entry.total).sum(),
            last_hour: history
                .iter()
                .filter(|entry| entry.timestamp >= hour_ago)
                .map(|entry| entry.total)
                .sum(),
            count: history.len(),
            by_label,
            by_category,
            request_limit: RequestLimit {
                current: history.len(),
                max: FREE_TIER_REQUESTS_24H,
                percentage: history.len() as f64 / FREE_TIER_REQUESTS_24H as f64 * 100.0,
            },
        }
    }

    pub fn reset(&self) {
        {
            let mut data = self.data();
            *data = Stored::default();
            self.persist(&data);
        }
        self.notify();
    }

    pub fn last_reset(&self) -> DateTime<Utc> {
        self.data().last_reset
    }

    pub fn subscribe(&self, listener: impl Fn() + Send + Sync + 'static) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    fn persist(&self, data: &Stored) {
        let result = serde_json::to_string(data)
            .map_err(crate::errors::AppError::from)
            .and_then(|raw| self.kv.set(TOKEN_TRACKER_KEY, &raw));
        if let Err(error) = result {
            tracing::warn!(error = %error, "failed to save token usage history");
        }
    }

    fn notify(&self) {
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect::<Vec<_>>();
        for listener in listeners {
            listener();
        }
    }

    fn data(&self) -> MutexGuard<'_, Stored> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn prune(history: &mut Vec<UsageEntry>, now: DateTime<Utc>) {
    let cutoff = now - Duration::hours(24);
    history.retain(|entry| entry.timestamp >= cutoff);
}

#[cfg(test)]
mod tests {
    use super::{TokenTracker, UsageEntry, FREE_TIER_REQUESTS_24H};
    use crate::ai::{BackendKind, UsageCategory};
    use crate::kv::MemoryKv;
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    fn entry(label: &str, total: u64, category: UsageCategory) -> UsageEntry {
        UsageEntry {
            prompt: total / 2,
            response: total - total / 2,
            total,
            timestamp: Utc::now(),
            label: label.to_string(),
            category,
            backend: BackendKind::Hosted,
            latency_ms: Some(120),
            prompt_length: 40,
            response_length: 20,
            estimated: false,
        }
    }

    #[test]
    fn stats_group_by_label_and_category() {
        let tracker = TokenTracker::new(Arc::new(MemoryKv::new()));
        tracker.record(entry("TASK_REWRITE", 100, UsageCategory::Analysis));
        tracker.record(entry("VISION", 300, UsageCategory::Vision));
        tracker.record(entry("TASK_REWRITE", 50, UsageCategory::Analysis));

        let stats = tracker.stats();
        assert_eq!(stats.total, 450);
        assert_eq!(stats.count, 3);
        assert_eq!(stats.by_label["TASK_REWRITE"], 150);
        assert_eq!(stats.by_category["vision"].requests, 1);
        assert_eq!(stats.request_limit.max, FREE_TIER_REQUESTS_24H);
        assert!((stats.request_limit.percentage - 15.0).abs() < f64::EPSILON);
    }

    #[test]
    fn old_entries_fall_out_of_the_window() {
        let tracker = TokenTracker::new(Arc::new(MemoryKv::new()));
        let mut stale = entry("OLD", 999, UsageCategory::Analysis);
        stale.timestamp = Utc::now() - Duration::hours(25);
        tracker.record(stale);
        tracker.record(entry("NEW", 10, UsageCategory::Analysis));
        assert_eq!(tracker.requests_last_24h(), 1);
        assert_eq!(tracker.total_tokens(), 10);
        assert_eq!(tracker.lifetime_tokens(), 1009);
    }

    #[test]
    fn near_limit_at_eighty_percent_and_persisted() {
        let kv = Arc::new(MemoryKv::new());
        let tracker = TokenTracker::new(kv.clone());
        for _ in 0..15 {
            tracker.record(entry("CHAT", 1, UsageCategory::Analysis));
        }
        assert!(!tracker.is_near_limit());
        tracker.record(entry("CHAT", 1, UsageCategory::Analysis));
        assert!(tracker.is_near_limit());

        let reloaded = TokenTracker::new(kv);
        assert_eq!(reloaded.requests_last_24h(), 16);
        reloaded.reset();
        assert_eq!(reloaded.requests_last_24h(), 0);
    }
}
