//! Experiment names derived from the difference between a default and a current configuration.

use std::collections::{BTreeMap, BTreeSet};

use rand::Rng;
use serde_json::Value;

use crate::config::{ConfigMap, ValidatedConfig};

/// Keys that never contribute to a generated name.
pub const DEFAULT_SKIP_KEYS: &[&str] = &[
    "task",
    "reward_threshold",
    "logdir",
    "worker",
    "project",
    "group",
    "name",
    "prefix",
    "suffix",
    "save_interval",
    "render",
    "verbose",
    "save_ckpt",
    "training_num",
    "testing_num",
    "epoch",
    "device",
    "thread",
];

/// Short forms substituted for long keys.
pub const DEFAULT_KEY_ABBREVIATIONS: &[(&str, &str)] = &[
    ("cost_limit", "cost"),
    ("mstep_iter_num", "mnum"),
    ("estep_iter_num", "enum"),
    ("estep_kl", "ekl"),
    ("mstep_kl_mu", "kl_mu"),
    ("mstep_kl_std", "kl_std"),
    ("mstep_dual_lr", "mlr"),
    ("estep_dual_lr", "elr"),
    ("update_per_step", "update"),
];

const UNIQUE_SUFFIX_LEN: usize = 4;

/// Render a value into a deterministic string.
///
/// Sequences concatenate their items in order. Mappings concatenate their values in
/// sorted-key order and ignore the key names.
pub fn to_string(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(to_string).collect(),
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            keys.into_iter().map(|k| to_string(&map[k])).collect()
        }
    }
}

#[derive(Clone, Debug)]
pub struct NameOptions {
    pub prefix: String,
    pub suffix: String,
    pub skip_keys: BTreeSet<String>,
    pub key_abbreviations: BTreeMap<String, String>,
}

impl Default for NameOptions {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            suffix: String::new(),
            skip_keys: DEFAULT_SKIP_KEYS.iter().map(|k| k.to_string()).collect(),
            key_abbreviations: DEFAULT_KEY_ABBREVIATIONS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

impl NameOptions {
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    pub fn skip(mut self, key: impl Into<String>) -> Self {
        self.skip_keys.insert(key.into());
        self
    }

    pub fn abbreviate(mut self, key: impl Into<String>, short: impl Into<String>) -> Self {
        self.key_abbreviations.insert(key.into(), short.into());
        self
    }
}

/// Build a unique experiment name from the keys where `current` differs from `default`.
pub fn auto_name(default: &ConfigMap, current: &ConfigMap, options: &NameOptions) -> String {
    auto_name_with_rng(default, current, options, &mut rand::thread_rng())
}

/// [`auto_name`] over two records that passed the same schema.
pub fn auto_name_validated(
    default: &ValidatedConfig,
    current: &ValidatedConfig,
    options: &NameOptions,
) -> String {
    auto_name(default.as_map(), current.as_map(), options)
}

pub fn auto_name_with_rng<R: Rng + ?Sized>(
    default: &ConfigMap,
    current: &ConfigMap,
    options: &NameOptions,
    rng: &mut R,
) -> String {
    let stem = diff_name(default, current, options);
    format!("{stem}-{}", unique_suffix(rng))
}

/// The deterministic part of [`auto_name`], without the random suffix.
pub fn diff_name(default: &ConfigMap, current: &ConfigMap, options: &NameOptions) -> String {
    let mut name = options.prefix.clone();

    let mut keys: Vec<&String> = default.keys().collect();
    keys.sort();
    for key in keys {
        if options.skip_keys.contains(key) {
            continue;
        }
        // a key the current record lacks has nothing to render
        let Some(value) = current.get(key) else {
            continue;
        };
        if values_equal(&default[key], value) {
            continue;
        }
        let label = options.key_abbreviations.get(key).unwrap_or(key);
        if !name.is_empty() {
            name.push('_');
        }
        name.push_str(label);
        name.push_str(&to_string(value));
    }

    if !options.suffix.is_empty() {
        if !name.is_empty() {
            name.push('_');
        }
        name.push_str(&options.suffix);
    }

    if name.is_empty() {
        "default".to_string()
    } else {
        name
    }
}

/// Structural equality where numbers compare by value, so `1` equals `1.0`.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        // two integers compare exactly; a float on either side compares as f64
        (Value::Number(x), Value::Number(y)) if x.is_f64() || y.is_f64() => {
            x.as_f64() == y.as_f64()
        }
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).map_or(false, |y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

fn unique_suffix<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..UNIQUE_SUFFIX_LEN)
        .map(|_| {
            let nibble = rng.gen_range(0..16u32);
            char::from_digit(nibble, 16).unwrap_or('0')
        })
        .collect()
}
