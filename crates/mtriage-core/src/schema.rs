//! Argument schemas and config validation
//!
//! Every analyser declares the arguments it accepts in its metadata file. A
//! raw config (the mapping a user writes for one pipeline step) is checked
//! against that schema and turned into a [`ResolvedConfig`] holding exactly
//! the declared keys, each coerced to its declared kind.

use crate::error::SchemaError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

/// Primitive kinds an argument may take
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgKind {
    String,
    Number,
    List,
    Path,
    Boolean,
}

impl fmt::Display for ArgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArgKind::String => "string",
            ArgKind::Number => "number",
            ArgKind::List => "list",
            ArgKind::Path => "path",
            ArgKind::Boolean => "boolean",
        };
        f.write_str(name)
    }
}

/// One parameter descriptor, as declared under `args:` in `info.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgSpec {
    pub name: String,

    #[serde(default)]
    pub desc: String,

    #[serde(default)]
    pub required: bool,

    pub input: ArgKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// A resolved argument value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum ArgValue {
    String(String),
    Number(f64),
    List(Vec<String>),
    Path(PathBuf),
    Boolean(bool),
    /// Optional argument with no default that the config did not set
    Absent,
}

impl ArgValue {
    /// Coerce a raw config value to `kind`. No truthy-string or
    /// number-from-string conversions are performed.
    pub fn coerce(name: &str, kind: ArgKind, raw: &Value) -> Result<ArgValue, SchemaError> {
        let coerced = match (kind, raw) {
            (ArgKind::String, Value::String(s)) => Some(ArgValue::String(s.clone())),
            (ArgKind::Number, Value::Number(n)) => n.as_f64().map(ArgValue::Number),
            (ArgKind::Path, Value::String(s)) => Some(ArgValue::Path(PathBuf::from(s))),
            (ArgKind::Boolean, Value::Bool(b)) => Some(ArgValue::Boolean(*b)),
            (ArgKind::List, Value::Array(items)) => items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .map(ArgValue::List),
            _ => None,
        };

        coerced.ok_or_else(|| SchemaError::InvalidArgType {
            name: name.to_string(),
            expected: kind,
            got: describe(raw),
        })
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, ArgValue::Absent)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ArgValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            ArgValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            ArgValue::Path(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ArgValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    fn hash_into(&self, hasher: &mut blake3::Hasher) {
        match self {
            ArgValue::String(s) => {
                hasher.update(b"s");
                hash_str(hasher, s);
            }
            ArgValue::Number(n) => {
                hasher.update(b"n");
                hasher.update(&n.to_bits().to_le_bytes());
            }
            ArgValue::List(items) => {
                hasher.update(b"l");
                hasher.update(&(items.len() as u64).to_le_bytes());
                for item in items {
                    hash_str(hasher, item);
                }
            }
            ArgValue::Path(p) => {
                hasher.update(b"p");
                hash_str(hasher, &p.to_string_lossy());
            }
            ArgValue::Boolean(b) => {
                hasher.update(if *b { b"t" } else { b"f" });
            }
            ArgValue::Absent => {
                hasher.update(b"a");
            }
        }
    }
}

fn hash_str(hasher: &mut blake3::Hasher, s: &str) {
    hasher.update(&(s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

fn describe(value: &Value) -> String {
    let kind = match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "mapping",
    };
    match value {
        Value::String(s) => format!("{kind} \"{s}\""),
        Value::Bool(_) | Value::Number(_) => format!("{kind} {value}"),
        _ => kind.to_string(),
    }
}

/// Ordered, immutable set of argument specs with unique names
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ArgSchema {
    specs: Vec<ArgSpec>,
}

impl ArgSchema {
    /// Build a schema, enforcing unique names and the default rules:
    /// required specs carry no default, declared defaults match their kind.
    pub fn from_specs(specs: Vec<ArgSpec>) -> Result<Self, SchemaError> {
        let mut seen = HashSet::with_capacity(specs.len());
        for spec in &specs {
            if !seen.insert(spec.name.as_str()) {
                return Err(SchemaError::DuplicateArg(spec.name.clone()));
            }
            match (&spec.default, spec.required) {
                (Some(_), true) => {
                    return Err(SchemaError::RequiredWithDefault(spec.name.clone()));
                }
                (Some(default), false) => {
                    ArgValue::coerce(&spec.name, spec.input, default).map_err(|e| {
                        SchemaError::InvalidDefault {
                            name: spec.name.clone(),
                            reason: e.to_string(),
                        }
                    })?;
                }
                (None, _) => {}
            }
        }
        Ok(Self { specs })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn specs(&self) -> &[ArgSpec] {
        &self.specs
    }

    pub fn get(&self, name: &str) -> Option<&ArgSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Validate a raw config and resolve defaults.
    ///
    /// Unknown keys are rejected before required keys are checked. A `null`
    /// value counts as not set.
    pub fn validate(&self, raw: &Map<String, Value>) -> Result<ResolvedConfig, SchemaError> {
        if let Some(unknown) = raw.keys().find(|key| !self.contains(key)) {
            return Err(SchemaError::UnknownArg(unknown.clone()));
        }

        let mut values = BTreeMap::new();
        for spec in &self.specs {
            let value = match raw.get(&spec.name).filter(|v| !v.is_null()) {
                Some(raw_value) => ArgValue::coerce(&spec.name, spec.input, raw_value)?,
                None if spec.required => {
                    return Err(SchemaError::MissingRequiredArg(spec.name.clone()));
                }
                None => match &spec.default {
                    Some(default) => ArgValue::coerce(&spec.name, spec.input, default)?,
                    None => ArgValue::Absent,
                },
            };
            values.insert(spec.name.clone(), value);
        }

        Ok(ResolvedConfig { values })
    }
}

/// Validated config for one pipeline step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedConfig {
    values: BTreeMap<String, ArgValue>,
}

impl ResolvedConfig {
    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.values.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(ArgValue::as_str)
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(ArgValue::as_f64)
    }

    pub fn get_list(&self, name: &str) -> Option<&[String]> {
        self.get(name).and_then(ArgValue::as_list)
    }

    pub fn get_path(&self, name: &str) -> Option<&Path> {
        self.get(name).and_then(ArgValue::as_path)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(ArgValue::as_bool)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArgValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Copy of this config with relative `path` arguments joined onto `base`
    pub fn resolve_paths(&self, base: &Path) -> ResolvedConfig {
        let values = self
            .values
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    ArgValue::Path(p) if p.is_relative() => ArgValue::Path(base.join(p)),
                    other => other.clone(),
                };
                (name.clone(), value)
            })
            .collect();
        ResolvedConfig { values }
    }

    /// Feed a canonical encoding (sorted keys, tagged values) into `hasher`
    pub fn hash_into(&self, hasher: &mut blake3::Hasher) {
        hasher.update(&(self.values.len() as u64).to_le_bytes());
        for (name, value) in &self.values {
            hash_str(hasher, name);
            value.hash_into(hasher);
        }
    }
}
