use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::ops::Bound;

use lru::LruCache;
use serde::{Deserialize, Serialize};

/// Replacement policy for the node slot cache.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// When full, evict the cached slot with the smallest offset strictly
    /// greater than the one being written, or the largest offset if none is.
    /// Reads never reorder entries.
    #[default]
    OffsetSuccessor,
    /// Least-recently-used replacement; reads promote entries.
    Lru,
}

enum Slots {
    Disabled,
    Ordered(BTreeMap<u64, Box<[u8]>>),
    Lru(LruCache<u64, Box<[u8]>>),
}

/// Bounded map from node offset to the last bytes written at that offset.
///
/// Entries are only inserted by [`SlotCache::update`], which the tree calls
/// after every successful node write-back. A miss always falls back to disk,
/// so the policy affects performance only.
pub struct SlotCache {
    slot_size: usize,
    capacity: usize,
    slots: Slots,
}

impl SlotCache {
    /// Creates a cache holding at most `max_bytes` of `slot_size`-byte images.
    pub fn new(slot_size: usize, max_bytes: usize, policy: CachePolicy) -> Self {
        let capacity = if slot_size == 0 { 0 } else { max_bytes / slot_size };
        let slots = match (NonZeroUsize::new(capacity), policy) {
            (None, _) => Slots::Disabled,
            (Some(_), CachePolicy::OffsetSuccessor) => Slots::Ordered(BTreeMap::new()),
            (Some(cap), CachePolicy::Lru) => Slots::Lru(LruCache::new(cap)),
        };
        Self {
            slot_size,
            capacity,
            slots,
        }
    }

    /// Maximum number of slot images held at once.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slot images currently held.
    pub fn len(&self) -> usize {
        match &self.slots {
            Slots::Disabled => 0,
            Slots::Ordered(map) => map.len(),
            Slots::Lru(lru) => lru.len(),
        }
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the cached image at `offset`, if any.
    pub fn get(&mut self, offset: u64) -> Option<&[u8]> {
        match &mut self.slots {
            Slots::Disabled => None,
            Slots::Ordered(map) => map.get(&offset).map(|b| &b[..]),
            Slots::Lru(lru) => lru.get(&offset).map(|b| &b[..]),
        }
    }

    /// Returns true if `offset` is cached, without touching recency.
    pub fn contains(&self, offset: u64) -> bool {
        match &self.slots {
            Slots::Disabled => false,
            Slots::Ordered(map) => map.contains_key(&offset),
            Slots::Lru(lru) => lru.contains(&offset),
        }
    }

    /// Inserts or overwrites the image written at `offset`.
    pub fn update(&mut self, offset: u64, bytes: &[u8]) {
        debug_assert_eq!(bytes.len(), self.slot_size);
        let image: Box<[u8]> = bytes.into();
        match &mut self.slots {
            Slots::Disabled => {}
            Slots::Ordered(map) => {
                if !map.contains_key(&offset) && map.len() >= self.capacity {
                    let victim = map
                        .range((Bound::Excluded(offset), Bound::Unbounded))
                        .next()
                        .map(|(&k, _)| k)
                        .or_else(|| map.keys().next_back().copied());
                    if let Some(victim) = victim {
                        map.remove(&victim);
                    }
                }
                map.insert(offset, image);
            }
            Slots::Lru(lru) => {
                lru.put(offset, image);
            }
        }
    }
}
