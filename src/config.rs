use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    pub state_file: String,
    pub preferences_file: String,
    pub gemini_base_url: String,
    pub gemini_model: String,
    /// Usually left empty and read from the keyring instead.
    pub gemini_api_key: Option<String>,
    pub ollama_base_url: String,
    pub ollama_text_model: String,
    pub ollama_vision_model: String,
    /// Path of the SQLite-compatible mirror database; no mirroring when unset.
    pub remote_db: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            state_file: "state.json".to_string(),
            preferences_file: "preferences.json".to_string(),
            gemini_base_url: "https://generativelanguage.googleapis.com".to_string(),
            gemini_model: "gemini-2.5-flash".to_string(),
            gemini_api_key: None,
            ollama_base_url: "http://localhost:11434".to_string(),
            ollama_text_model: "gemma2".to_string(),
            ollama_vision_model: "llava".to_string(),
            remote_db: None,
        }
    }
}

const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("BALL_STATE_FILE", "stateFile"),
    ("BALL_GEMINI_MODEL", "geminiModel"),
    ("GEMINI_API_KEY", "geminiApiKey"),
    ("BALL_GEMINI_API_KEY", "geminiApiKey"),
    ("BALL_OLLAMA_URL", "ollamaBaseUrl"),
    ("BALL_OLLAMA_TEXT_MODEL", "ollamaTextModel"),
    ("BALL_OLLAMA_VISION_MODEL", "ollamaVisionModel"),
    ("BALL_REMOTE_DB", "remoteDb"),
];

impl AppConfig {
    /// `config.json` in the data dir, then environment variables on top.
    pub fn load(data_dir: &Path) -> AppResult<Self> {
        let env = ENV_OVERRIDES
            .iter()
            .filter_map(|(var, key)| std::env::var(var).ok().map(|value| (*key, value)))
            .collect::<Vec<_>>();
        Self::load_with(data_dir, &env)
    }

    pub fn load_with(data_dir: &Path, overrides: &[(&str, String)]) -> AppResult<Self> {
        let mut merged = serde_json::to_value(Self::default())?;

        let path = data_dir.join(CONFIG_FILE);
        if path.is_file() {
            let raw = std::fs::read_to_string(&path)?;
            let file_value: serde_json::Value = serde_json::from_str(&raw)
                .map_err(|error| AppError::Config(format!("{}: {}", path.display(), error)))?;
            merge_json(&mut merged, file_value);
        }

        let mut env_value = serde_json::Map::new();
        for (key, value) in overrides {
            if !value.trim().is_empty() {
                env_value.insert((*key).to_string(), serde_json::Value::String(value.clone()));
            }
        }
        merge_json(&mut merged, serde_json::Value::Object(env_value));

        let config: Self =
            serde_json::from_value(merged).map_err(|error| AppError::Config(error.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> AppResult<()> {
        for (name, value) in [("stateFile", &self.state_file), ("preferencesFile", &self.preferences_file)] {
            if value.trim().is_empty() || value.contains('/') || value.contains('\\') {
                return Err(AppError::Config(format!("{} must be a bare file name", name)));
            }
        }
        if !self.ollama_base_url.starts_with("http") {
            return Err(AppError::Config("ollamaBaseUrl must be an http(s) URL".to_string()));
        }
        Ok(())
    }

    pub fn remote_db_path(&self, data_dir: &Path) -> Option<PathBuf> {
        self.remote_db.as_ref().map(|raw| {
            let path = PathBuf::from(raw);
            if path.is_absolute() {
                path
            } else {
                data_dir.join(path)
            }
        })
    }
}

pub(crate) fn merge_json(target: &mut serde_json::Value, update: serde_json::Value) {
    match (target, update) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(target_map.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (target, update) => {
            *target = update;
        }
    }
}
