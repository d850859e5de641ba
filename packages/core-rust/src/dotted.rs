//! Nested key/value store addressed by dotted paths (`"logging.level"`).

use std::collections::BTreeMap;

use tracing::debug;

use crate::types::Value;

/// Configuration tree addressed by dotted paths.
///
/// `load_data` installs a whole tree at most once and only while the store is
/// untouched; `set` marks the store modified. Services keep one of these
/// behind a lock and fill it from the `get_config` reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DottedStorage {
    store: BTreeMap<String, Value>,
    loaded: bool,
    modified: bool,
}

impl DottedStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing tree. The result counts as loaded.
    #[must_use]
    pub fn from_map(store: BTreeMap<String, Value>) -> Self {
        Self {
            store,
            loaded: true,
            modified: false,
        }
    }

    /// Returns the value at `path`, or `None` if any segment is missing or
    /// traverses a non-map value.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.store.get(first)?;
        for segment in segments {
            current = current.as_map()?.get(segment)?;
        }
        Some(current)
    }

    /// Like [`get`](Self::get), falling back to `default`.
    #[must_use]
    pub fn get_or<'a>(&'a self, path: &str, default: &'a Value) -> &'a Value {
        self.get(path).unwrap_or(default)
    }

    /// Sets `path` to `value`, creating intermediate maps as needed.
    ///
    /// A non-map value sitting on an intermediate segment is replaced by an
    /// empty map.
    pub fn set(&mut self, path: &str, value: Value) {
        let mut segments: Vec<&str> = path.split('.').collect();
        let Some(last) = segments.pop() else {
            return;
        };

        let mut current = &mut self.store;
        for segment in segments {
            let entry = current
                .entry(segment.to_owned())
                .or_insert_with(|| Value::Map(BTreeMap::new()));
            if !matches!(entry, Value::Map(_)) {
                *entry = Value::Map(BTreeMap::new());
            }
            let Value::Map(next) = entry else {
                return;
            };
            current = next;
        }
        current.insert(last.to_owned(), value);
        self.modified = true;
    }

    /// Installs `data` unless the store was already loaded or modified.
    ///
    /// Returns `true` if the data was applied.
    pub fn load_data(&mut self, data: BTreeMap<String, Value>) -> bool {
        if self.loaded || self.modified {
            debug!(
                loaded = self.loaded,
                modified = self.modified,
                "ignoring configuration load"
            );
            return false;
        }
        self.store = data;
        self.loaded = true;
        true
    }

    #[must_use]
    pub fn loaded(&self) -> bool {
        self.loaded
    }

    #[must_use]
    pub fn modified(&self) -> bool {
        self.modified
    }

    pub fn reset_modified(&mut self) {
        self.modified = false;
    }

    #[must_use]
    pub fn data(&self) -> &BTreeMap<String, Value> {
        &self.store
    }
}
