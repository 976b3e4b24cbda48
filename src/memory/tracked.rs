//! Tracked state for currently loaded models.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::registry::{ModelDescriptor, ModelTier, PriorityLevel};

/// A loaded model's tracked metadata.
///
/// Descriptor fields are snapshotted at admission time; a stale snapshot is
/// acceptable since size and tier do not change while loaded.
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub name: String,
    pub size_bytes: u64,
    pub tier: ModelTier,
    pub priority: u8,
    pub protected: bool,
    pub last_used: Instant,
    pub use_count: u64,
}

impl LoadedModel {
    pub fn from_descriptor(desc: &ModelDescriptor, now: Instant) -> Self {
        Self {
            name: desc.name.clone(),
            size_bytes: desc.size_bytes,
            tier: desc.tier,
            priority: desc.priority,
            protected: desc.protected,
            last_used: now,
            use_count: 1,
        }
    }

    pub fn priority_level(&self) -> PriorityLevel {
        PriorityLevel::from_score(self.priority)
    }

    /// Time since last use, saturating at zero if clocks race.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used)
    }

    fn touch(&mut self, now: Instant) {
        self.last_used = now;
        self.use_count += 1;
    }
}

/// The set of currently loaded models.
///
/// Owned exclusively by the memory manager; all access goes through the
/// manager's lock. Entries are created only by successful admission and
/// destroyed only by eviction.
#[derive(Debug, Default)]
pub struct LoadedSet {
    entries: HashMap<String, LoadedModel>,
}

impl LoadedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&LoadedModel> {
        self.entries.get(name)
    }

    pub fn insert(&mut self, entry: LoadedModel) {
        self.entries.insert(entry.name.clone(), entry);
    }

    pub fn remove(&mut self, name: &str) -> Option<LoadedModel> {
        self.entries.remove(name)
    }

    /// Refresh recency and bump use count. Returns false if not loaded.
    pub fn touch(&mut self, name: &str, now: Instant) -> bool {
        match self.entries.get_mut(name) {
            Some(entry) => {
                entry.touch(now);
                true
            }
            None => false,
        }
    }

    /// Sum of size estimates across loaded models. A policy signal, not a
    /// measurement of real external memory.
    pub fn usage_bytes(&self) -> u64 {
        self.entries.values().map(|e| e.size_bytes).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn protected_count(&self) -> usize {
        self.entries.values().filter(|e| e.protected).count()
    }

    /// Clone of all entries, in no particular order.
    pub fn snapshot(&self) -> Vec<LoadedModel> {
        self.entries.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str, size_bytes: u64) -> ModelDescriptor {
        ModelDescriptor {
            name: name.to_string(),
            size_bytes,
            tier: ModelTier::General,
            priority: 50,
            protected: false,
        }
    }

    #[test]
    fn test_usage_sums_sizes() {
        let now = Instant::now();
        let mut set = LoadedSet::new();
        set.insert(LoadedModel::from_descriptor(&descriptor("a", 100), now));
        set.insert(LoadedModel::from_descriptor(&descriptor("b", 250), now));
        assert_eq!(set.usage_bytes(), 350);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_touch_updates_recency_and_count() {
        let now = Instant::now();
        let later = now + Duration::from_secs(30);
        let mut set = LoadedSet::new();
        set.insert(LoadedModel::from_descriptor(&descriptor("a", 100), now));

        assert!(set.touch("a", later));
        let entry = set.get("a").unwrap();
        assert_eq!(entry.use_count, 2);
        assert_eq!(entry.last_used, later);

        assert!(!set.touch("missing", later));
    }

    #[test]
    fn test_remove_returns_entry() {
        let now = Instant::now();
        let mut set = LoadedSet::new();
        set.insert(LoadedModel::from_descriptor(&descriptor("a", 100), now));
        let removed = set.remove("a").unwrap();
        assert_eq!(removed.size_bytes, 100);
        assert!(set.is_empty());
        assert!(set.remove("a").is_none());
    }
}
