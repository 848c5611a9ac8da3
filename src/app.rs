use crate::ai::gateway::AiGateway;
use crate::ai::gemini::GeminiClient;
use crate::ai::ollama::OllamaClient;
use crate::ai::selector::BackendSelector;
use crate::ai::tokens::TokenTracker;
use crate::bridge::FsBridge;
use crate::config::AppConfig;
use crate::db::SqlMirror;
use crate::errors::{AppError, AppResult};
use crate::kv::{FileKv, KvStore};
use crate::redaction::Redactor;
use crate::secrets::{Credentials, KeyringSecrets, SecretStore, KEYRING_SERVICE};
use crate::storage::load_state;
use crate::store::Store;
use crate::sync::SyncQueue;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Everything a GUI shell needs, wired together for one data directory.
pub struct AppCore {
    config: AppConfig,
    data_dir: PathBuf,
    store: Arc<Store>,
    mirror: Option<Arc<SqlMirror>>,
    preferences: Arc<dyn KvStore>,
    secrets: Arc<dyn SecretStore>,
    gemini: Arc<GeminiClient>,
    ollama: Arc<OllamaClient>,
    gateway: Arc<AiGateway>,
}

impl AppCore {
    /// Loads config from `data_dir` and uses the OS keyring for secrets.
    pub async fn start(data_dir: PathBuf) -> AppResult<Arc<Self>> {
        std::fs::create_dir_all(&data_dir)?;
        let config = AppConfig::load(&data_dir)?;
        Self::start_with(data_dir, config, Arc::new(KeyringSecrets::new(KEYRING_SERVICE))).await
    }

    pub async fn start_with(
        data_dir: PathBuf,
        config: AppConfig,
        secrets: Arc<dyn SecretStore>,
    ) -> AppResult<Arc<Self>> {
        std::fs::create_dir_all(&data_dir)?;

        let mirror = match config.remote_db_path(&data_dir) {
            Some(path) => {
                let mirror = Arc::new(SqlMirror::new(&path)?);
                tracing::info!(path = %path.display(), "remote mirror enabled");
                Some(mirror)
            }
            None => None,
        };
        let sync = mirror.as_ref().map(|mirror| SyncQueue::new(mirror.clone()));

        let bridge = Arc::new(FsBridge::new(&data_dir)?);
        let mut store = Store::new(bridge.clone(), config.state_file.clone());
        if let Some(queue) = &sync {
            store = store.with_sync(queue.clone());
        }
        let store = Arc::new(store);
        let loaded = load_state(bridge.as_ref(), &config.state_file).await;
        if let Err(error) = store.hydrate(loaded).confirmed().await {
            tracing::warn!(error = %error, "failed to write hydrated state");
        }

        let preferences: Arc<dyn KvStore> = Arc::new(FileKv::open(data_dir.join(&config.preferences_file))?);

        let api_key = match config.gemini_api_key.clone() {
            Some(key) => Some(key),
            None => Credentials::new(secrets.as_ref()).gemini_key().unwrap_or_else(|error| {
                tracing::warn!(error = %error, "failed to read gemini key from keyring");
                None
            }),
        };
        let redactor = Redactor::with_known_secrets(api_key.clone());
        let gemini = Arc::new(GeminiClient::new(
            config.gemini_base_url.clone(),
            config.gemini_model.clone(),
            api_key,
        ));
        let ollama = Arc::new(OllamaClient::new(
            config.ollama_base_url.clone(),
            config.ollama_text_model.clone(),
            config.ollama_vision_model.clone(),
        ));

        let selector = Arc::new(BackendSelector::new(preferences.clone(), ollama.clone()));
        let tracker = Arc::new(TokenTracker::new(preferences.clone()));
        let mut gateway = AiGateway::new(selector, gemini.clone(), ollama.clone(), tracker).with_redactor(redactor);
        if let Some(queue) = &sync {
            gateway = gateway.with_sync(queue.clone());
        }

        tracing::info!(
            data_dir = %data_dir.display(),
            backend = %gateway.active_kind(),
            hosted_key = gemini.has_api_key(),
            "planner core started"
        );

        Ok(Arc::new(Self {
            config,
            data_dir,
            store,
            mirror,
            preferences,
            secrets,
            gemini,
            ollama,
            gateway: Arc::new(gateway),
        }))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn mirror(&self) -> Option<&Arc<SqlMirror>> {
        self.mirror.as_ref()
    }

    pub fn preferences(&self) -> &Arc<dyn KvStore> {
        &self.preferences
    }

    pub fn gateway(&self) -> &Arc<AiGateway> {
        &self.gateway
    }

    pub fn ollama(&self) -> &Arc<OllamaClient> {
        &self.ollama
    }

    pub fn credentials(&self) -> Credentials<'_> {
        Credentials::new(self.secrets.as_ref())
    }

    /// Stores the hosted API key and uses it for subsequent requests.
    pub fn save_gemini_key(&self, key: &str) -> AppResult<()> {
        if key.trim().is_empty() {
            return Err(AppError::InvalidInput("API key is empty.".to_string()));
        }
        self.credentials().save_gemini_key(key)?;
        self.gemini.set_api_key(Some(key.to_string()));
        tracing::info!("gemini api key saved");
        Ok(())
    }

    pub fn clear_gemini_key(&self) -> AppResult<()> {
        self.credentials().clear_gemini_key()?;
        self.gemini.set_api_key(self.config.gemini_api_key.clone());
        tracing::info!("gemini api key cleared");
        Ok(())
    }

    pub fn has_gemini_key(&self) -> bool {
        self.gemini.has_api_key()
    }

    /// Replaces the synced entities with what the remote mirror holds.
    pub async fn pull_remote(&self) -> AppResult<()> {
        let mirror = self
            .mirror
            .as_ref()
            .ok_or_else(|| AppError::Config("no remote database configured".to_string()))?;
        let snapshot = mirror.load_snapshot()?;
        tracing::info!(
            tasks = snapshot.tasks.len(),
            goals = snapshot.goals.len(),
            people = snapshot.people.len(),
            "applying remote snapshot"
        );
        self.store.apply_remote_snapshot(snapshot).confirmed().await
    }

    /// Pushes any backlog left by a failed mirror write.
    pub async fn flush_sync(&self) {
        if let Some(queue) = self.store.sync_queue() {
            queue.flush().await;
        }
    }
}
