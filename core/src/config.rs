use std::{collections::BTreeMap, fs, path::Path};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::{naming, Error, Result};

/// A free-form configuration record with sorted keys.
pub type ConfigMap = serde_json::Map<String, Value>;

/// Load a JSON configuration from disk, creating it with the provided initializer if missing.
pub fn load_or_init<T, F>(path: &Path, initializer: F) -> Result<T>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> T,
{
    if path.exists() {
        let contents =
            fs::read_to_string(path).map_err(|e| Error::file("read config from", path, e))?;
        let value = serde_json::from_str(&contents)?;
        Ok(value)
    } else {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::file("create directory", parent, e))?;
        }
        let value = initializer();
        let serialized = serde_json::to_string_pretty(&value)?;
        fs::write(path, serialized).map_err(|e| Error::file("write config to", path, e))?;
        Ok(value)
    }
}

/// Parse a YAML file into a configuration record.
pub fn read_yaml_config(path: &Path) -> Result<Value> {
    let contents =
        fs::read_to_string(path).map_err(|e| Error::file("read config from", path, e))?;
    Ok(serde_yaml::from_str(&contents)?)
}

/// Parse a JSON file whose top level must be an object.
pub fn read_json_config(path: &Path) -> Result<ConfigMap> {
    let contents =
        fs::read_to_string(path).map_err(|e| Error::file("read config from", path, e))?;
    match serde_json::from_str(&contents)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::InvalidConfig(format!(
            "{} must contain a JSON object, found {}",
            path.display(),
            kind_label(&other)
        ))),
    }
}

/// Render the value stored under `key`, searching nested mappings depth first.
///
/// Returns `"None"` when the key appears nowhere in the record.
pub fn get_cfg_value(config: &ConfigMap, key: &str) -> String {
    find_cfg_value(config, key).unwrap_or_else(|| "None".to_string())
}

fn find_cfg_value(config: &ConfigMap, key: &str) -> Option<String> {
    if let Some(value) = config.get(key) {
        return Some(naming::to_string(value));
    }
    config.values().find_map(|value| match value {
        Value::Object(nested) => find_cfg_value(nested, key),
        _ => None,
    })
}

/// Number of entries and the length of the longest key.
pub fn mapping_dims(config: &ConfigMap) -> (usize, usize) {
    let longest = config.keys().map(|k| k.chars().count()).max().unwrap_or(0);
    (config.len(), longest)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FieldKind {
    Bool,
    Integer,
    Number,
    String,
    Sequence,
    Mapping,
    Any,
}

impl FieldKind {
    fn infer(value: &Value) -> Self {
        match value {
            Value::Bool(_) => Self::Bool,
            Value::Number(_) => Self::Number,
            Value::String(_) => Self::String,
            Value::Array(_) => Self::Sequence,
            Value::Object(_) => Self::Mapping,
            Value::Null => Self::Any,
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::Bool => value.is_boolean(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::String => value.is_string(),
            Self::Sequence => value.is_array(),
            Self::Mapping => value.is_object(),
            Self::Any => true,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::String => "string",
            Self::Sequence => "sequence",
            Self::Mapping => "mapping",
            Self::Any => "any",
        }
    }
}

fn kind_label(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Number(n) if n.is_f64() => "float",
        other => FieldKind::infer(other).label(),
    }
}

#[derive(Clone, Copy, Debug)]
struct FieldSpec {
    kind: FieldKind,
    required: bool,
}

/// Explicit schema a free-form record is checked against before use.
#[derive(Clone, Debug, Default)]
pub struct ConfigSchema {
    fields: BTreeMap<String, FieldSpec>,
    allow_unknown: bool,
}

impl ConfigSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every key of `defaults` becomes a required field of the kind its default value has.
    pub fn from_defaults(defaults: &ConfigMap) -> Self {
        let fields = defaults
            .iter()
            .map(|(key, value)| {
                let spec = FieldSpec {
                    kind: FieldKind::infer(value),
                    required: true,
                };
                (key.clone(), spec)
            })
            .collect();
        Self {
            fields,
            allow_unknown: false,
        }
    }

    pub fn required(mut self, key: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.insert(key.into(), FieldSpec { kind, required: true });
        self
    }

    pub fn optional(mut self, key: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.insert(key.into(), FieldSpec { kind, required: false });
        self
    }

    pub fn allow_unknown(mut self, allow: bool) -> Self {
        self.allow_unknown = allow;
        self
    }

    pub fn validate(&self, value: &Value) -> Result<ValidatedConfig> {
        let map = value.as_object().ok_or_else(|| {
            Error::InvalidConfig(format!("expected a mapping, found {}", kind_label(value)))
        })?;
        self.validate_map(map)
    }

    pub fn validate_map(&self, map: &ConfigMap) -> Result<ValidatedConfig> {
        let mut problems = Vec::new();

        for (key, spec) in &self.fields {
            match map.get(key) {
                None if spec.required => problems.push(format!("missing required key {key}")),
                None | Some(Value::Null) => {}
                Some(value) if !spec.kind.accepts(value) => problems.push(format!(
                    "{key} should be {}, found {}",
                    spec.kind.label(),
                    kind_label(value)
                )),
                Some(_) => {}
            }
        }

        if !self.allow_unknown {
            for key in map.keys().filter(|k| !self.fields.contains_key(*k)) {
                problems.push(format!("unknown key {key}"));
            }
        }

        if problems.is_empty() {
            Ok(ValidatedConfig { values: map.clone() })
        } else {
            Err(Error::InvalidConfig(problems.join("; ")))
        }
    }
}

/// A record that passed [`ConfigSchema::validate`].
#[derive(Clone, Debug, PartialEq)]
pub struct ValidatedConfig {
    values: ConfigMap,
}

impl ValidatedConfig {
    pub fn as_map(&self) -> &ConfigMap {
        &self.values
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn into_inner(self) -> ConfigMap {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    fn map(value: Value) -> ConfigMap {
        value.as_object().cloned().unwrap()
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct RunSettings {
        seed: u64,
    }

    #[test]
    fn load_or_init_writes_then_reads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/config.json");

        let first: RunSettings = load_or_init(&path, || RunSettings { seed: 7 }).unwrap();
        assert!(path.exists());
        let second: RunSettings = load_or_init(&path, || RunSettings { seed: 99 }).unwrap();

        assert_eq!(first, RunSettings { seed: 7 });
        assert_eq!(second, RunSettings { seed: 7 });
    }

    #[test]
    fn read_yaml_config_parses_nested_records() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "task: SafetyPointGoal\nlr: 0.001\nhidden_sizes: [64, 64]").unwrap();

        let config = read_yaml_config(file.path()).unwrap();
        assert_eq!(config["task"], json!("SafetyPointGoal"));
        assert_eq!(config["hidden_sizes"], json!([64, 64]));
    }

    #[test]
    fn read_json_config_rejects_non_objects() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[1, 2]").unwrap();

        let err = read_json_config(file.path()).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn get_cfg_value_searches_nested_mappings() {
        let config = map(json!({
            "algo": {"actor": {"hidden_sizes": [128, 128]}},
            "env": {"task": "Goal"},
            "seed": 10,
        }));

        assert_eq!(get_cfg_value(&config, "seed"), "10");
        assert_eq!(get_cfg_value(&config, "hidden_sizes"), "128128");
        assert_eq!(get_cfg_value(&config, "task"), "Goal");
        assert_eq!(get_cfg_value(&config, "missing"), "None");
    }

    #[test]
    fn mapping_dims_reports_entries_and_longest_key() {
        let config = map(json!({"a": 1, "cost_limit": 2}));
        assert_eq!(mapping_dims(&config), (2, 10));
        assert_eq!(mapping_dims(&ConfigMap::new()), (0, 0));
    }

    #[test]
    fn schema_from_defaults_accepts_matching_record() {
        let defaults = map(json!({"cost_limit": 10, "lr": 0.001, "task": "Goal"}));
        let schema = ConfigSchema::from_defaults(&defaults);

        let current = json!({"cost_limit": 5.5, "lr": 0.01, "task": "Button"});
        let validated = schema.validate(&current).unwrap();
        assert_eq!(validated.get("task"), Some(&json!("Button")));
    }

    #[test]
    fn schema_reports_every_problem() {
        let schema = ConfigSchema::new()
            .required("epoch", FieldKind::Integer)
            .required("task", FieldKind::String)
            .optional("render", FieldKind::Bool);

        let err = schema
            .validate(&json!({"epoch": 1.5, "render": "yes", "extra": 1}))
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("epoch should be integer, found float"));
        assert!(message.contains("missing required key task"));
        assert!(message.contains("render should be bool"));
        assert!(message.contains("unknown key extra"));
    }

    #[test]
    fn schema_allows_unknown_keys_when_asked() {
        let schema = ConfigSchema::new()
            .optional("render", FieldKind::Bool)
            .allow_unknown(true);
        assert!(schema.validate(&json!({"anything": [1]})).is_ok());
        assert!(schema.validate(&json!(3)).is_err());
    }
}
