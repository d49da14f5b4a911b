//! Store partition
//!
//! Ordered map of encoded primary keys plus per-object high-water marks.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use super::ObjectVersion;

/// One hash partition of the primary store
///
/// Not synchronized itself; `PrimaryStore` wraps each partition in a RwLock.
#[derive(Default)]
pub(super) struct Partition {
    /// Encoded primary key → record
    records: BTreeMap<Vec<u8>, ObjectVersion>,

    /// Highest version ever committed per object-key
    high_water: HashMap<String, u64>,
}

impl Partition {
    pub fn get(&self, key: &[u8]) -> Option<&ObjectVersion> {
        self.records.get(key)
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.records.contains_key(key)
    }

    pub fn high_water(&self, object_key: &str) -> Option<u64> {
        self.high_water.get(object_key).copied()
    }

    /// Highest live version with an encoded key in `[start, end]`
    pub fn last_live(&self, start: &[u8], end: &[u8]) -> Option<u64> {
        self.records
            .range::<[u8], _>((Bound::Included(start), Bound::Included(end)))
            .next_back()
            .map(|(_, record)| record.version_node)
    }

    /// Insert a record, raising the object's high-water mark
    pub fn insert(&mut self, key: Vec<u8>, record: ObjectVersion) {
        self.raise_high_water(&record.object_key, record.version_node);
        self.records.insert(key, record);
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<ObjectVersion> {
        self.records.remove(key)
    }

    pub fn raise_high_water(&mut self, object_key: &str, version_node: u64) {
        let mark = self.high_water.entry(object_key.to_string()).or_insert(version_node);
        if *mark < version_node {
            *mark = version_node;
        }
    }

    /// Records in `[start, end]`, at most `limit`
    pub fn range(&self, start: &[u8], end: &[u8], limit: usize) -> Vec<ObjectVersion> {
        if start > end {
            return Vec::new();
        }
        self.records
            .range::<[u8], _>((Bound::Included(start), Bound::Included(end)))
            .take(limit)
            .map(|(_, record)| record.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn records(&self) -> impl Iterator<Item = &ObjectVersion> {
        self.records.values()
    }

    /// Object-keys whose high-water mark is above their highest live version
    pub fn purged_marks(&self) -> Vec<(String, u64)> {
        let mut live_max: HashMap<&str, u64> = HashMap::new();
        for record in self.records.values() {
            let max = live_max.entry(record.object_key.as_str()).or_insert(0);
            *max = (*max).max(record.version_node);
        }

        self.high_water
            .iter()
            .filter(|(key, mark)| live_max.get(key.as_str()).map_or(true, |max| max < *mark))
            .map(|(key, mark)| (key.clone(), *mark))
            .collect()
    }
}
