//! Extension configuration access.
//!
//! Persistence belongs to an external collaborator that stores opaque
//! key/value data; the runtime only sees it through [`ConfigStore`]. Each
//! extension gets a [`ConfigSection`] that prefixes its keys with the
//! extension name.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use talon_core::error::AppError;
use talon_core::result::AppResult;

use super::log::ExtensionLogger;

/// Opaque key/value storage behind extension configuration.
pub trait ConfigStore {
    /// Returns the value stored under `key`.
    fn get(&self, key: &str) -> Option<Value>;

    /// Stores `value` under `key`.
    fn set(&self, key: &str, value: Value) -> AppResult<()>;

    /// Removes `key`, returning its previous value.
    fn remove(&self, key: &str) -> Option<Value>;

    /// Returns every key starting with `prefix`, sorted.
    fn keys(&self, prefix: &str) -> Vec<String>;
}

/// In-process [`ConfigStore`].
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    values: RefCell<BTreeMap<String, Value>>,
}

impl MemoryConfigStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-filled from the top level of a JSON object.
    ///
    /// Nested objects are flattened into dotted keys, so
    /// `{"scaler": {"factor": 0.5}}` becomes `scaler.factor`.
    pub fn from_json(root: Value) -> AppResult<Self> {
        let Value::Object(map) = root else {
            return Err(AppError::configuration("Extension configuration must be a JSON object"));
        };
        let mut values = BTreeMap::new();
        flatten("", Value::Object(map), &mut values);
        Ok(Self {
            values: RefCell::new(values),
        })
    }
}

fn flatten(prefix: &str, value: Value, out: &mut BTreeMap<String, Value>) {
    match value {
        Value::Object(map) => {
            for (key, value) in map {
                let key = if prefix.is_empty() {
                    key
                } else {
                    format!("{prefix}.{key}")
                };
                flatten(&key, value, out);
            }
        }
        other => {
            out.insert(prefix.to_string(), other);
        }
    }
}

impl ConfigStore for MemoryConfigStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.borrow().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> AppResult<()> {
        self.values.borrow_mut().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Option<Value> {
        self.values.borrow_mut().remove(key)
    }

    fn keys(&self, prefix: &str) -> Vec<String> {
        self.values
            .borrow()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }
}

/// One extension's view of the configuration store.
#[derive(Clone)]
pub struct ConfigSection {
    scope: String,
    store: Rc<dyn ConfigStore>,
    log: ExtensionLogger,
}

impl ConfigSection {
    /// Scopes `store` to keys under `<scope>.`.
    pub fn new(scope: impl Into<String>, store: Rc<dyn ConfigStore>) -> Self {
        let scope = scope.into();
        Self {
            log: ExtensionLogger::new(&scope),
            scope,
            store,
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}.{key}", self.scope)
    }

    /// Returns the value under `key`, decoded as `T`.
    ///
    /// A missing key is `Ok(None)`; a value of the wrong shape is a
    /// `Configuration` error.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        let full = self.full_key(key);
        match self.store.get(&full) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
                AppError::configuration(format!("Config key '{full}' has the wrong type: {e}"))
            }),
        }
    }

    /// Returns the value under `key`, or `default` when missing or malformed.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        match self.get(key) {
            Ok(Some(value)) => value,
            Ok(None) => default,
            Err(e) => {
                self.log.warn(&format!("Using default for config key '{key}': {e}"));
                default
            }
        }
    }

    /// Stores `value` under `key`.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> AppResult<()> {
        let value = serde_json::to_value(value)?;
        self.store.set(&self.full_key(key), value)
    }

    /// Removes `key`, returning whether it existed.
    pub fn remove(&self, key: &str) -> bool {
        self.store.remove(&self.full_key(key)).is_some()
    }

    /// Keys in this section, without the scope prefix.
    pub fn keys(&self) -> Vec<String> {
        let prefix = format!("{}.", self.scope);
        self.store
            .keys(&prefix)
            .into_iter()
            .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    /// Section scope (the extension name).
    pub fn scope(&self) -> &str {
        &self.scope
    }
}

impl fmt::Debug for ConfigSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigSection")
            .field("scope", &self.scope)
            .finish()
    }
}
