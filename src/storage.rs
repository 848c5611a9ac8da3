use crate::bridge::DataBridge;
use crate::errors::AppResult;
use crate::migrate::migrate;
use crate::models::{AppState, CURRENT_STATE_VERSION};

/// Reads and migrates the state file. `None` means "hydrate with defaults":
/// the file is missing, empty, unreadable or not JSON.
pub async fn load_state(bridge: &dyn DataBridge, file: &str) -> Option<AppState> {
    let raw = match bridge.read_data_file(file).await {
        Ok(Some(raw)) => raw,
        Ok(None) => {
            tracing::info!(file, "no saved state, starting from defaults");
            return None;
        }
        Err(error) => {
            tracing::warn!(error = %error, file, "failed to read saved state");
            return None;
        }
    };

    if raw.trim().is_empty() {
        tracing::warn!(file, "saved state is empty");
        return None;
    }

    match serde_json::from_str::<serde_json::Value>(&raw) {
        Ok(value) => Some(migrate(&value)),
        Err(error) => {
            tracing::warn!(error = %error, file, "saved state is not valid JSON");
            None
        }
    }
}

/// Full-document serialization; the version field is always the current one.
pub fn serialize_state(state: &AppState) -> AppResult<String> {
    let mut value = serde_json::to_value(state)?;
    if let Some(object) = value.as_object_mut() {
        object.insert("version".to_string(), CURRENT_STATE_VERSION.into());
    }
    Ok(serde_json::to_string_pretty(&value)?)
}
