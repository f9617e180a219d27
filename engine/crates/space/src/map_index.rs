use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;

use crate::model::MapCoord;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IndexError {
    #[error("entity {entity} is in bucket {bucket} but recorded on {recorded}")]
    Mismatch {
        entity: String,
        bucket: MapCoord,
        recorded: MapCoord,
    },

    #[error("entity {entity} is in bucket {bucket} but has no record")]
    Orphaned { entity: String, bucket: MapCoord },

    #[error("entity {entity} is recorded on {recorded} but missing from that bucket")]
    Unindexed { entity: String, recorded: MapCoord },

    #[error("bucket {0} is empty")]
    EmptyBucket(MapCoord),
}

/// Map coordinate → entity set index.
///
/// Each key lives in exactly one bucket. Moving a key between maps removes
/// it from the old bucket and inserts it into the new one in a single call;
/// empty buckets are pruned. BTree containers keep iteration deterministic.
#[derive(Debug, Clone)]
pub struct MapIndex<K: Ord + Clone> {
    /// Entity → map mapping.
    entity_to_map: BTreeMap<K, MapCoord>,
    /// Reverse index: map → entities on that map.
    map_members: BTreeMap<MapCoord, BTreeSet<K>>,
}

impl<K: Ord + Clone> Default for MapIndex<K> {
    fn default() -> Self {
        Self {
            entity_to_map: BTreeMap::new(),
            map_members: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Clone + Debug> MapIndex<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place (or move) an entity on a map. Returns the map it was on before.
    pub fn place(&mut self, key: K, map: MapCoord) -> Option<MapCoord> {
        let previous = self.entity_to_map.insert(key.clone(), map);
        if let Some(old) = previous {
            if old == map {
                return previous;
            }
            self.detach(&key, old);
        }
        self.map_members.entry(map).or_default().insert(key);
        previous
    }

    /// Remove an entity from the index. Returns the map it was on.
    pub fn remove(&mut self, key: &K) -> Option<MapCoord> {
        let map = self.entity_to_map.remove(key)?;
        self.detach(key, map);
        Some(map)
    }

    fn detach(&mut self, key: &K, map: MapCoord) {
        if let Some(set) = self.map_members.get_mut(&map) {
            set.remove(key);
            if set.is_empty() {
                self.map_members.remove(&map);
            }
        }
    }

    pub fn map_of(&self, key: &K) -> Option<MapCoord> {
        self.entity_to_map.get(key).copied()
    }

    /// Entities on a map, sorted.
    pub fn members(&self, map: MapCoord) -> impl Iterator<Item = &K> + '_ {
        self.map_members.get(&map).into_iter().flatten()
    }

    pub fn member_count(&self, map: MapCoord) -> usize {
        self.map_members.get(&map).map_or(0, BTreeSet::len)
    }

    /// Maps with at least one entity.
    pub fn occupied_maps(&self) -> impl Iterator<Item = MapCoord> + '_ {
        self.map_members.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entity_to_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entity_to_map.is_empty()
    }

    /// Check that the forward map and the buckets agree in both directions.
    pub fn verify(&self) -> Result<(), IndexError> {
        for (map, members) in &self.map_members {
            if members.is_empty() {
                return Err(IndexError::EmptyBucket(*map));
            }
            for key in members {
                match self.entity_to_map.get(key) {
                    None => {
                        return Err(IndexError::Orphaned {
                            entity: format!("{:?}", key),
                            bucket: *map,
                        })
                    }
                    Some(recorded) if recorded != map => {
                        return Err(IndexError::Mismatch {
                            entity: format!("{:?}", key),
                            bucket: *map,
                            recorded: *recorded,
                        })
                    }
                    Some(_) => {}
                }
            }
        }
        for (key, map) in &self.entity_to_map {
            let indexed = self
                .map_members
                .get(map)
                .is_some_and(|set| set.contains(key));
            if !indexed {
                return Err(IndexError::Unindexed {
                    entity: format!("{:?}", key),
                    recorded: *map,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(x: i32, y: i32) -> MapCoord {
        MapCoord::new(x, y)
    }

    #[test]
    fn place_and_query() {
        let mut index = MapIndex::new();
        assert_eq!(index.place("a", map(0, 0)), None);
        assert_eq!(index.place("b", map(0, 0)), None);
        assert_eq!(index.map_of(&"a"), Some(map(0, 0)));
        assert_eq!(index.members(map(0, 0)).copied().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(index.len(), 2);
        index.verify().unwrap();
    }

    #[test]
    fn move_between_maps_leaves_single_membership() {
        let mut index = MapIndex::new();
        index.place("a", map(0, 0));
        assert_eq!(index.place("a", map(1, 0)), Some(map(0, 0)));
        assert_eq!(index.member_count(map(0, 0)), 0);
        assert_eq!(index.member_count(map(1, 0)), 1);
        assert_eq!(index.occupied_maps().collect::<Vec<_>>(), vec![map(1, 0)]);
        index.verify().unwrap();
    }

    #[test]
    fn place_on_same_map_is_noop() {
        let mut index = MapIndex::new();
        index.place("a", map(2, -1));
        assert_eq!(index.place("a", map(2, -1)), Some(map(2, -1)));
        assert_eq!(index.member_count(map(2, -1)), 1);
        index.verify().unwrap();
    }

    #[test]
    fn remove_prunes_bucket() {
        let mut index = MapIndex::new();
        index.place(1u64, map(2, -1));
        assert_eq!(index.remove(&1), Some(map(2, -1)));
        assert_eq!(index.remove(&1), None);
        assert!(index.is_empty());
        assert_eq!(index.occupied_maps().count(), 0);
        index.verify().unwrap();
    }

    #[test]
    fn members_of_unknown_map_is_empty() {
        let index: MapIndex<u64> = MapIndex::new();
        assert_eq!(index.members(map(9, 9)).count(), 0);
    }

    #[test]
    fn random_walk_keeps_index_consistent() {
        let mut index = MapIndex::new();
        let maps = [map(0, 0), map(1, 0), map(0, 1), map(-1, -1)];
        for step in 0..200u32 {
            let key = step % 7;
            let target = maps[(step as usize * 3 + key as usize) % maps.len()];
            if step % 11 == 0 {
                index.remove(&key);
            } else {
                index.place(key, target);
            }
            index.verify().unwrap();
            if let Some(m) = index.map_of(&key) {
                assert!(index.members(m).any(|k| *k == key));
                let buckets = index
                    .occupied_maps()
                    .filter(|m| index.members(*m).any(|k| *k == key))
                    .count();
                assert_eq!(buckets, 1);
            }
        }
    }
}
