use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};

use super::paths::AppPaths;
use super::settings::{AppConfig, IndexProvider};
use super::validation::validate_config;
use crate::core::errors::ChatError;

const REDACT_PLACEHOLDER: &str = "****";

const SENSITIVE_PATTERNS: [&str; 8] = [
    "api_key",
    "secret",
    "password",
    "_token",
    "credential",
    "private_key",
    "access_key",
    "bearer",
];

const SENSITIVE_WHITELIST: [&str; 2] = ["max_tokens", "credentials"];

#[derive(Clone)]
pub struct ConfigService {
    paths: Arc<AppPaths>,
}

impl ConfigService {
    pub fn new(paths: Arc<AppPaths>) -> Self {
        Self { paths }
    }

    pub fn config_path(&self) -> PathBuf {
        if let Ok(path) = env::var("ECOCHAT_CONFIG_PATH") {
            return PathBuf::from(path);
        }

        let user_config = self.paths.user_data_dir.join("config.yml");
        if user_config.exists() {
            return user_config;
        }

        self.paths.project_root.join("config.yml")
    }

    pub fn secrets_path(&self) -> PathBuf {
        self.paths.secrets_path.clone()
    }

    /// Merged `config.yml` + `secrets.yaml`, before env overrides.
    pub fn load_raw(&self) -> Value {
        let public_config = load_yaml_file(&self.config_path());
        let secrets_config = load_yaml_file(&self.secrets_path());
        deep_merge(&public_config, &secrets_config)
    }

    pub fn load_config(&self) -> Result<AppConfig, ChatError> {
        let raw = self.load_raw();
        let mut config = parse_config(&raw)?;
        apply_env_overrides(&mut config, |key| env::var(key).ok());
        Ok(config)
    }

    pub fn redacted(&self, config: &AppConfig) -> Result<Value, ChatError> {
        let value = serde_json::to_value(config).map_err(ChatError::internal)?;
        Ok(redact_sensitive_values(&value))
    }
}

pub fn parse_config(raw: &Value) -> Result<AppConfig, ChatError> {
    validate_config(raw)?;
    serde_json::from_value(raw.clone())
        .map_err(|e| ChatError::Config(format!("Invalid config: {}", e)))
}

/// Environment wins over both YAML files. Blank values count as unset.
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read = |key: &str| {
        lookup(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };

    if let Some(path) = read("GOOGLE_SERVICE_ACCOUNT_FILE") {
        config.credentials.service_account_file = Some(PathBuf::from(path));
    }
    if let Some(key) = read("PINECONE_API_KEY") {
        config.credentials.pinecone_api_key = Some(key);
    }
    if let Some(key) = read("GOOGLE_API_KEY") {
        config.credentials.google_api_key = Some(key);
    }
    if let Some(port) = read("PORT").and_then(|value| value.parse::<u16>().ok()) {
        config.server.port = port;
    }
    match read("ECOCHAT_INDEX_PROVIDER").as_deref() {
        Some("memory") => config.index.provider = IndexProvider::Memory,
        Some("pinecone") => config.index.provider = IndexProvider::Pinecone,
        Some(other) => tracing::warn!("Ignoring unknown ECOCHAT_INDEX_PROVIDER '{}'", other),
        None => {}
    }
}

fn load_yaml_file(path: &Path) -> Value {
    if !path.exists() {
        return Value::Object(Map::new());
    }

    match fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<Value>(&contents) {
            Ok(value) => match value {
                Value::Object(_) => value,
                _ => Value::Object(Map::new()),
            },
            Err(err) => {
                tracing::warn!("Ignoring unreadable YAML at {}: {}", path.display(), err);
                Value::Object(Map::new())
            }
        },
        Err(_) => Value::Object(Map::new()),
    }
}

fn deep_merge(base: &Value, override_value: &Value) -> Value {
    match (base, override_value) {
        (Value::Object(base_map), Value::Object(override_map)) => {
            let mut merged: Map<String, Value> = base_map.clone();
            for (key, value) in override_map {
                let merged_value = match merged.get(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), merged_value);
            }
            Value::Object(merged)
        }
        _ => override_value.clone(),
    }
}

fn redact_sensitive_values(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut redacted = Map::new();
            for (key, val) in map {
                if is_sensitive_key(key) && !val.is_null() {
                    redacted.insert(key.clone(), Value::String(REDACT_PLACEHOLDER.to_string()));
                } else {
                    redacted.insert(key.clone(), redact_sensitive_values(val));
                }
            }
            Value::Object(redacted)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_sensitive_values).collect()),
        _ => value.clone(),
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let key_lower = key.to_lowercase();
    if SENSITIVE_WHITELIST
        .iter()
        .any(|allowed| *allowed == key_lower)
    {
        return false;
    }
    SENSITIVE_PATTERNS
        .iter()
        .any(|pattern| key_lower.contains(pattern))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn deep_merge_lets_secrets_fill_credentials() {
        let public = json!({
            "index": { "name": "csv-chat", "provider": "memory" },
            "llm": { "temperature": 0.3 }
        });
        let secrets = json!({
            "credentials": { "google_api_key": "g-key" },
            "index": { "provider": "pinecone" }
        });

        let merged = deep_merge(&public, &secrets);

        assert_eq!(
            merged,
            json!({
                "index": { "name": "csv-chat", "provider": "pinecone" },
                "llm": { "temperature": 0.3 },
                "credentials": { "google_api_key": "g-key" }
            })
        );
    }

    #[test]
    fn parse_config_fills_defaults() {
        let config = parse_config(&json!({})).unwrap();
        assert_eq!(config.index.name, "csv-chat");
        assert_eq!(config.llm.top_k, 5);
        assert!((config.llm.temperature - 0.3).abs() < f64::EPSILON);
        assert_eq!(config.llm.model, "gemini-flash-latest");
        assert_eq!(config.embedding.dimension, 768);
        assert_eq!(config.drive.encoding, "utf-8");
    }

    #[test]
    fn parse_config_rejects_out_of_range_values() {
        let err = parse_config(&json!({ "llm": { "top_k": 0 } })).unwrap_err();
        assert!(matches!(err, ChatError::Config(_)));

        let err = parse_config(&json!({ "index": { "provider": "chroma" } })).unwrap_err();
        assert!(matches!(err, ChatError::Config(_)));
    }

    #[test]
    fn env_overrides_take_precedence_and_skip_blanks() {
        let mut config = parse_config(&json!({
            "credentials": { "pinecone_api_key": "from-yaml" }
        }))
        .unwrap();
        let env: HashMap<&str, &str> = HashMap::from([
            ("GOOGLE_API_KEY", "from-env"),
            ("PINECONE_API_KEY", "   "),
            ("GOOGLE_SERVICE_ACCOUNT_FILE", "/keys/sa.json"),
            ("ECOCHAT_INDEX_PROVIDER", "memory"),
            ("PORT", "9000"),
        ]);

        apply_env_overrides(&mut config, |key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.credentials.google_api_key.as_deref(), Some("from-env"));
        assert_eq!(config.credentials.pinecone_api_key.as_deref(), Some("from-yaml"));
        assert_eq!(
            config.credentials.service_account_file,
            Some(PathBuf::from("/keys/sa.json"))
        );
        assert_eq!(config.index.provider, IndexProvider::Memory);
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn redact_hides_keys_but_keeps_structure() {
        let input = json!({
            "credentials": {
                "pinecone_api_key": "secret",
                "google_api_key": null,
                "service_account_file": "/keys/sa.json"
            },
            "llm": { "max_tokens": 10 }
        });

        let redacted = redact_sensitive_values(&input);

        assert_eq!(
            redacted,
            json!({
                "credentials": {
                    "pinecone_api_key": "****",
                    "google_api_key": null,
                    "service_account_file": "/keys/sa.json"
                },
                "llm": { "max_tokens": 10 }
            })
        );
    }
}
