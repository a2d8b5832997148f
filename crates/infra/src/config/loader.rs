use std::path::Path;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{AppConfig, ConfigError};

pub const CONFIG_PATH_ENV: &str = "ROLEGATE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "./config/config.json";
pub const ENV_PREFIX: &str = "ROLEGATE__";

pub(super) fn load_from_env() -> Result<AppConfig, ConfigError> {
    let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    load_from(Some(Path::new(&path)), std::env::vars())
}

/// Merge defaults, an optional JSON file and `ROLEGATE__*` overrides.
///
/// A missing file is not an error. Overrides are coerced to the type of the
/// value they replace; list values are comma separated.
pub fn load_from<I>(path: Option<&Path>, vars: I) -> Result<AppConfig, ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut tree = serde_json::to_value(AppConfig::default()).map_err(|e| ConfigError::Parse(e.to_string()))?;

    if let Some(path) = path {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let file: Value = serde_json::from_str(&text).map_err(|e| ConfigError::Read {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;
                merge(&mut tree, file);
                debug!(path = %path.display(), "configuration file loaded");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "configuration file not found, using defaults and environment");
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    message: e.to_string(),
                });
            }
        }
    }

    let mut overrides: Vec<(String, String)> = vars
        .into_iter()
        .filter(|(k, _)| k.starts_with(ENV_PREFIX))
        .collect();
    overrides.sort();
    for (key, raw) in overrides {
        apply_override(&mut tree, &key, &raw)?;
    }

    serde_json::from_value(tree).map_err(|e| ConfigError::Parse(e.to_string()))
}

fn merge(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (k, v) in patch {
                match base.get_mut(&k) {
                    Some(slot) => merge(slot, v),
                    None => {
                        base.insert(k, v);
                    }
                }
            }
        }
        (slot, patch) => *slot = patch,
    }
}

fn apply_override(tree: &mut Value, key: &str, raw: &str) -> Result<(), ConfigError> {
    let env_err = |message: String| ConfigError::Env {
        key: key.to_string(),
        message,
    };

    let path: Vec<String> = key[ENV_PREFIX.len()..]
        .split("__")
        .map(|segment| segment.to_ascii_lowercase())
        .collect();
    if path.iter().any(String::is_empty) {
        return Err(env_err("empty path segment".into()));
    }

    let (leaf, parents) = path
        .split_last()
        .ok_or_else(|| env_err("empty key".into()))?;

    let mut node = tree;
    for segment in parents {
        let map = node
            .as_object_mut()
            .ok_or_else(|| env_err(format!("`{segment}` is not a section")))?;
        node = map
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    let map = node
        .as_object_mut()
        .ok_or_else(|| env_err("parent is not a section".into()))?;
    let value = coerce(map.get(leaf.as_str()), raw).map_err(env_err)?;
    map.insert(leaf.clone(), value);
    Ok(())
}

fn coerce(existing: Option<&Value>, raw: &str) -> Result<Value, String> {
    let raw = raw.trim();
    match existing {
        Some(Value::Bool(_)) => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Value::Bool(true)),
            "false" | "0" | "no" | "off" => Ok(Value::Bool(false)),
            other => Err(format!("expected a boolean, got `{other}`")),
        },
        Some(Value::Number(_)) => {
            if let Ok(n) = raw.parse::<i64>() {
                Ok(Value::from(n))
            } else if let Ok(n) = raw.parse::<u64>() {
                Ok(Value::from(n))
            } else {
                Err(format!("expected an integer, got `{raw}`"))
            }
        }
        Some(Value::Array(_)) => Ok(Value::Array(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| Value::String(s.to_string()))
                .collect(),
        )),
        Some(Value::Object(_)) => Err("cannot override a whole section".into()),
        _ => Ok(Value::String(raw.to_string())),
    }
}
