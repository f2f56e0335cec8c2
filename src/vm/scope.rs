// questscript Variable Scope Maps
// Sparse storage for one scope: values keyed by (name, index), plus a
// sorted per-variable membership list giving arrays their "highest
// populated index + 1" size semantics.

use crate::vm::value::Value;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Highest permitted array index
pub const MAX_ARRAY_INDEX: u32 = 65535;

#[derive(Debug, Default)]
pub struct ScopeMap {
    values: FxHashMap<(Arc<str>, u32), Value>,
    /// Sorted populated indices per variable name
    arrays: FxHashMap<Arc<str>, Vec<u32>>,
}

impl ScopeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn get(&self, name: &Arc<str>, index: u32) -> Option<Value> {
        self.values.get(&(name.clone(), index)).cloned()
    }

    /// Store a value. Writing zero / the empty string deletes the slot
    /// and its membership entry instead of storing it.
    pub fn set(&mut self, name: &Arc<str>, index: u32, value: Value) {
        if value.is_zero_like() {
            self.values.remove(&(name.clone(), index));
            if let Some(members) = self.arrays.get_mut(name) {
                if let Ok(at) = members.binary_search(&index) {
                    members.remove(at);
                }
                if members.is_empty() {
                    self.arrays.remove(name);
                }
            }
            return;
        }

        self.values.insert((name.clone(), index), value);
        let members = self.arrays.entry(name.clone()).or_default();
        if let Err(at) = members.binary_search(&index) {
            members.insert(at, index);
        }
    }

    /// Populated indices of a variable, ascending
    pub fn members(&self, name: &Arc<str>) -> &[u32] {
        self.arrays.get(name).map_or(&[], |v| v.as_slice())
    }

    /// Externally visible array length: highest populated index + 1
    pub fn array_size(&self, name: &Arc<str>) -> u32 {
        self.arrays
            .get(name)
            .and_then(|v| v.last())
            .map_or(0, |&last| last + 1)
    }

    pub fn clear_variable(&mut self, name: &Arc<str>) {
        if let Some(members) = self.arrays.remove(name) {
            for index in members {
                self.values.remove(&(name.clone(), index));
            }
        }
    }

    /// Stable name-keyed snapshot of the persistent contents. Names
    /// with the transient `$@` prefix are skipped.
    pub fn snapshot(&self) -> Vec<VarSnapshot> {
        let mut out: Vec<VarSnapshot> = self
            .values
            .iter()
            .filter(|((name, _), _)| !name.starts_with("$@"))
            .map(|((name, index), value)| VarSnapshot {
                name: name.to_string(),
                index: *index,
                value: match value {
                    Value::Int(v) => SnapValue::Int(*v),
                    Value::Str(s) => SnapValue::Str(s.to_string()),
                },
            })
            .collect();
        out.sort_by(|a, b| (&a.name, a.index).cmp(&(&b.name, b.index)));
        out
    }

    pub fn restore(&mut self, snapshots: Vec<VarSnapshot>) {
        for snap in snapshots {
            let name: Arc<str> = Arc::from(snap.name.as_str());
            let value = match snap.value {
                SnapValue::Int(v) => Value::Int(v),
                SnapValue::Str(s) => Value::from(s),
            };
            self.set(&name, snap.index, value);
        }
    }

    pub fn to_json(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string_pretty(&self.snapshot())?)
    }

    pub fn from_json(&mut self, json: &str) -> Result<(), SnapshotError> {
        let snapshots: Vec<VarSnapshot> = serde_json::from_str(json)?;
        self.restore(snapshots);
        Ok(())
    }
}

/// One persisted variable slot, keyed by name rather than symbol id so
/// snapshots survive recompilation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarSnapshot {
    pub name: String,
    pub index: u32,
    pub value: SnapValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SnapValue {
    Int(i32),
    Str(String),
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("variable snapshot serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Arc<str> {
        Arc::from(s)
    }

    #[test]
    fn sparse_membership_and_size() {
        let mut map = ScopeMap::new();
        let arr = name("$arr");

        map.set(&arr, 5, Value::Int(7));
        map.set(&arr, 2, Value::Int(9));
        assert_eq!(map.members(&arr), &[2, 5]);
        assert_eq!(map.array_size(&arr), 6);

        // writing zero deletes the slot
        map.set(&arr, 2, Value::Int(0));
        assert_eq!(map.members(&arr), &[5]);
        assert_eq!(map.array_size(&arr), 6);
        assert_eq!(map.get(&arr, 2), None);

        map.set(&arr, 5, Value::Int(0));
        assert_eq!(map.array_size(&arr), 0);
        assert!(map.is_empty());
    }

    #[test]
    fn empty_string_deletes_slot() {
        let mut map = ScopeMap::new();
        let var = name("#greeting$");
        map.set(&var, 0, Value::from("hi"));
        assert_eq!(map.get(&var, 0), Some(Value::from("hi")));
        map.set(&var, 0, Value::from(""));
        assert_eq!(map.get(&var, 0), None);
        assert!(map.is_empty());
    }

    #[test]
    fn snapshot_round_trip_skips_transient_globals() {
        let mut map = ScopeMap::new();
        map.set(&name("$score"), 0, Value::Int(41));
        map.set(&name("$names$"), 3, Value::from("alice"));
        map.set(&name("$@scratch"), 0, Value::Int(9));

        let json = map.to_json().unwrap();
        let mut restored = ScopeMap::new();
        restored.from_json(&json).unwrap();

        assert_eq!(restored.get(&name("$score"), 0), Some(Value::Int(41)));
        assert_eq!(restored.get(&name("$names$"), 3), Some(Value::from("alice")));
        assert_eq!(restored.get(&name("$@scratch"), 0), None);
    }
}
