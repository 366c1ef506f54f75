use crate::layout::CacheLayout;
use crate::lock::IndexLock;
use crate::{fsync_dir, CacheError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use stratus_schema::{CacheKey, LocationKind};
use tempfile::NamedTempFile;
use tracing::debug;

/// Known locations of one cached artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheEntry {
    locations: BTreeMap<LocationKind, String>,
}

impl CacheEntry {
    pub fn get(&self, kind: LocationKind) -> Option<&str> {
        self.locations.get(&kind).map(String::as_str)
    }

    pub fn contains(&self, kind: LocationKind) -> bool {
        self.locations.contains_key(&kind)
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (LocationKind, &str)> {
        self.locations.iter().map(|(k, v)| (*k, v.as_str()))
    }

    /// Interpret a raw index value.
    ///
    /// A flat string is a bare local path. In a mapping, fields that are not a
    /// location kind with a string value are ignored.
    pub(crate) fn from_value(value: &Value) -> Self {
        let mut locations = BTreeMap::new();
        match value {
            Value::String(path) => {
                locations.insert(LocationKind::Local, path.clone());
            }
            Value::Object(map) => {
                for (field, v) in map {
                    if let (Ok(kind), Some(s)) = (field.parse::<LocationKind>(), v.as_str()) {
                        locations.insert(kind, s.to_owned());
                    }
                }
            }
            _ => {}
        }
        Self { locations }
    }
}

/// The persisted index document: bucket → object → value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheIndex {
    buckets: BTreeMap<String, BTreeMap<String, Value>>,
}

impl CacheIndex {
    pub fn buckets(&self) -> impl Iterator<Item = (&str, &BTreeMap<String, Value>)> {
        self.buckets.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn bucket(&self, bucket: &str) -> Option<&BTreeMap<String, Value>> {
        self.buckets.get(bucket)
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// Exclusive, mutable view of the cache index.
///
/// Holding a transaction means holding the index lock. The only ways to end
/// one are [`write_index_and_unlock`](Self::write_index_and_unlock) and
/// [`unlock_index`](Self::unlock_index); dropping it is an unlock without
/// writing.
pub struct IndexTransaction {
    index: CacheIndex,
    path: PathBuf,
    dir: PathBuf,
    _lock: IndexLock,
}

impl IndexTransaction {
    /// Block on the index lock, then load the document (empty if absent).
    pub(crate) fn begin(layout: &CacheLayout) -> Result<Self, CacheError> {
        let lock = IndexLock::acquire(&layout.lock_file())?;
        let path = layout.index_file();
        let index = if path.exists() {
            let content = fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                CacheIndex::default()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            CacheIndex::default()
        };
        debug!("index locked ({} buckets)", index.buckets.len());
        Ok(Self {
            index,
            path,
            dir: layout.root().to_path_buf(),
            _lock: lock,
        })
    }

    pub fn index(&self) -> &CacheIndex {
        &self.index
    }

    /// Read one value. `field = None` returns the whole object value.
    pub fn get_index_value(&self, bucket: &str, object: &str, field: Option<&str>) -> Option<&Value> {
        let value = self.index.buckets.get(bucket)?.get(object)?;
        match field {
            None => Some(value),
            Some(f) => value.as_object()?.get(f),
        }
    }

    /// Write one value.
    ///
    /// With a field, `value` becomes a flat `field → value` pair inside the
    /// object's mapping (a previous flat string is replaced by a mapping).
    /// Without a field, `value` replaces the object entry and must be a mapping.
    pub fn set_index_value(
        &mut self,
        bucket: &str,
        object: &str,
        field: Option<&str>,
        value: Value,
    ) -> Result<(), CacheError> {
        match field {
            None => {
                if !value.is_object() {
                    return Err(CacheError::InvalidIndexValue {
                        bucket: bucket.to_owned(),
                        object: object.to_owned(),
                        reason: format!("expected a mapping, got {value}"),
                    });
                }
                self.index
                    .buckets
                    .entry(bucket.to_owned())
                    .or_default()
                    .insert(object.to_owned(), value);
            }
            Some(f) => self.set_field(bucket, object, f, value),
        }
        Ok(())
    }

    /// Write `field → value` inside the object's mapping, coercing a flat
    /// string or any other non-mapping slot into a mapping first.
    fn set_field(&mut self, bucket: &str, object: &str, field: &str, value: Value) {
        let slot = self
            .index
            .buckets
            .entry(bucket.to_owned())
            .or_default()
            .entry(object.to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            let mut map = Map::new();
            if let Value::String(path) = slot.take() {
                map.insert(LocationKind::Local.as_str().to_owned(), Value::String(path));
            }
            *slot = Value::Object(map);
        }
        if let Some(map) = slot.as_object_mut() {
            map.insert(field.to_owned(), value);
        }
    }

    /// Remove an object entry entirely, dropping the bucket when it empties.
    pub fn remove_object(&mut self, bucket: &str, object: &str) -> Option<Value> {
        let objects = self.index.buckets.get_mut(bucket)?;
        let removed = objects.remove(object);
        if objects.is_empty() {
            self.index.buckets.remove(bucket);
        }
        removed
    }

    /// Remove a whole bucket.
    pub fn remove_bucket(&mut self, bucket: &str) -> Option<BTreeMap<String, Value>> {
        self.index.buckets.remove(bucket)
    }

    pub fn entry(&self, key: &CacheKey) -> CacheEntry {
        self.get_index_value(&key.bucket(), &key.object, None)
            .map(CacheEntry::from_value)
            .unwrap_or_default()
    }

    pub fn set_location(&mut self, key: &CacheKey, kind: LocationKind, location: &str) {
        self.set_field(
            &key.bucket(),
            &key.object,
            kind.as_str(),
            Value::String(location.to_owned()),
        );
    }

    pub fn remove_location(&mut self, key: &CacheKey, kind: LocationKind) -> Option<String> {
        let bucket = key.bucket();
        let value = self.index.buckets.get_mut(&bucket)?.get_mut(&key.object)?;
        let (removed, now_empty) = match value {
            Value::String(path) if kind == LocationKind::Local => (Some(path.clone()), true),
            Value::Object(map) => {
                let removed = map
                    .remove(kind.as_str())
                    .and_then(|v| v.as_str().map(str::to_owned));
                (removed, map.is_empty())
            }
            _ => (None, false),
        };
        if now_empty {
            self.remove_object(&bucket, &key.object);
        }
        removed
    }

    /// Persist the index atomically, then release the lock.
    pub fn write_index_and_unlock(self) -> Result<(), CacheError> {
        let content = serde_json::to_string_pretty(&self.index)?;
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| CacheError::Io(e.error))?;
        fsync_dir(&self.dir)?;
        debug!("index written and unlocked");
        Ok(())
    }

    /// Release the lock, discarding any in-memory changes.
    pub fn unlock_index(self) {
        debug!("index unlocked without writing");
    }
}
