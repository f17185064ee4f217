// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tag snapshot container.
//!
//! Two structures live side by side:
//!
//! - the persistent set: every tag seen, deduplicated by [`TagKey`], in
//!   insertion order, evicted by count and lifetime ([`Tags::clear`]);
//! - the window: keys added since the last [`Tags::rotate`].
//!
//! Cloning a `Tags` is shallow. Clones share the persistent set, the
//! counter, the disposed flag and the *current* window. `rotate` swaps in a
//! fresh window on the rotating handle only, so a clone taken just before
//! rotating keeps the finished window while the live handle starts a new
//! one.
//!
//! A `None` value marks a tag that was seen but whose operations have not
//! resolved; [`Tags::put`] resolves it.

use crate::config::TagsConfig;
use crate::counter::Counter;
use crate::tag::{Tag, TagKey};
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Entry {
    value: Option<Tag>,
    seen: Instant,
}

#[derive(Default)]
struct Window {
    order: Vec<TagKey>,
    members: HashSet<TagKey>,
}

impl Window {
    fn push(&mut self, key: &TagKey) {
        if self.members.insert(key.clone()) {
            self.order.push(key.clone());
        }
    }

    fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }
}

struct Shared {
    tags: Mutex<LruCache<TagKey, Entry>>,
    counter: Counter,
    disposed: AtomicBool,
}

/// Deduplicating tag container with a rotating window.
#[derive(Clone)]
pub struct Tags {
    shared: Arc<Shared>,
    window: Arc<Mutex<Window>>,
    max_count: Option<usize>,
    lifetime: Option<Duration>,
}

impl Tags {
    /// Create an empty container with the given eviction policy.
    pub fn new(policy: &TagsConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                tags: Mutex::new(LruCache::unbounded()),
                counter: Counter::new(),
                disposed: AtomicBool::new(false),
            }),
            window: Arc::new(Mutex::new(Window::default())),
            max_count: policy.max_count,
            lifetime: policy.lifetime(),
        }
    }

    /// Insert a resolved tag into the persistent set only.
    ///
    /// Unlike [`Tags::add`] the tag does not join the current window.
    pub fn add_tag(&self, tag: Tag) {
        let key = tag.key().clone();
        {
            let mut tags = self.shared.tags.lock();
            match tags.peek_mut(&key) {
                Some(entry) => entry.value = Some(tag),
                None => {
                    tags.put(
                        key,
                        Entry {
                            value: Some(tag),
                            seen: Instant::now(),
                        },
                    );
                }
            }
        }
        self.shared.counter.pulse();
    }

    /// Insert into the persistent set and the current window.
    ///
    /// A `None` value marks the tag as pending. An existing entry keeps its
    /// position and first-seen time; a `Some` value replaces its value.
    /// Returns `true` when the key was not in the persistent set.
    pub fn add(&self, key: TagKey, value: Option<Tag>) -> bool {
        let inserted = {
            let mut tags = self.shared.tags.lock();
            let inserted = match tags.peek_mut(&key) {
                Some(entry) => {
                    if value.is_some() {
                        entry.value = value;
                    }
                    false
                }
                None => {
                    tags.put(
                        key.clone(),
                        Entry {
                            value,
                            seen: Instant::now(),
                        },
                    );
                    true
                }
            };
            self.window.lock().push(&key);
            inserted
        };
        self.shared.counter.pulse();
        inserted
    }

    /// Resolve an entry, inserting it into the persistent set if missing.
    pub fn put(&self, key: TagKey, tag: Tag) {
        {
            let mut tags = self.shared.tags.lock();
            match tags.peek_mut(&key) {
                Some(entry) => entry.value = Some(tag),
                None => {
                    tags.put(
                        key,
                        Entry {
                            value: Some(tag),
                            seen: Instant::now(),
                        },
                    );
                }
            }
        }
        self.shared.counter.pulse();
    }

    /// Modify a resolved entry in place. Returns `false` when the key is
    /// absent or still pending.
    pub fn update<F>(&self, key: &TagKey, f: F) -> bool
    where
        F: FnOnce(&mut Tag),
    {
        let updated = {
            let mut tags = self.shared.tags.lock();
            match tags.peek_mut(key).and_then(|e| e.value.as_mut()) {
                Some(tag) => {
                    f(tag);
                    true
                }
                None => false,
            }
        };
        if updated {
            self.shared.counter.pulse();
        }
        updated
    }

    /// Current value of an entry: `None` if absent, `Some(None)` if pending.
    pub fn get(&self, key: &TagKey) -> Option<Option<Tag>> {
        self.shared
            .tags
            .lock()
            .peek(key)
            .map(|entry| entry.value.clone())
    }

    pub fn contains(&self, key: &TagKey) -> bool {
        self.shared.tags.lock().contains(key)
    }

    /// Number of tags in the persistent set.
    pub fn len(&self) -> usize {
        self.shared.tags.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of tags in the current window.
    pub fn window_len(&self) -> usize {
        self.window.lock().order.len()
    }

    /// Tags of the current window in insertion order.
    ///
    /// Pending entries come back as `None`; evicted entries are skipped.
    pub fn snapshot(&self) -> Vec<(TagKey, Option<Tag>)> {
        let tags = self.shared.tags.lock();
        let window = self.window.lock();
        window
            .order
            .iter()
            .filter_map(|key| {
                tags.peek(key)
                    .map(|entry| (key.clone(), entry.value.clone()))
            })
            .collect()
    }

    /// Evict entries older than the lifetime and the oldest entries beyond
    /// the maximum count.
    pub fn clear(&self) {
        let evicted = {
            let mut tags = self.shared.tags.lock();
            let mut evicted = self.evict_expired(&mut tags, Instant::now());
            if let Some(max) = self.max_count {
                while tags.len() > max {
                    tags.pop_lru();
                    evicted += 1;
                }
            }
            evicted
        };
        if evicted > 0 {
            tracing::trace!(evicted, "Evicted tags");
            self.shared.counter.pulse();
        }
    }

    /// Evict lifetime-exceeded entries, then report whether `key` was seen
    /// and is still within its lifetime.
    pub fn remove_lifetime_exceeded_and_check_whether_seen(&self, key: &TagKey) -> bool {
        let mut tags = self.shared.tags.lock();
        self.evict_expired(&mut tags, Instant::now());
        tags.contains(key)
    }

    fn evict_expired(&self, tags: &mut LruCache<TagKey, Entry>, now: Instant) -> usize {
        let Some(lifetime) = self.lifetime else {
            return 0;
        };
        let mut evicted = 0;
        while tags
            .peek_lru()
            .is_some_and(|(_, entry)| now.duration_since(entry.seen) >= lifetime)
        {
            tags.pop_lru();
            evicted += 1;
        }
        evicted
    }

    /// Block until no pending entry remains, then empty the persistent set
    /// and the current window.
    ///
    /// Returns early if the container is disposed while waiting.
    pub fn reset(&self) {
        loop {
            let generation = self.shared.counter.value();
            if self.is_disposed() || !self.has_pending() {
                break;
            }
            if self.wait(Some(generation)).is_none() {
                return;
            }
        }
        {
            let mut tags = self.shared.tags.lock();
            tags.clear();
            self.window.lock().clear();
        }
        self.shared.counter.pulse();
    }

    /// Whether any entry is pending.
    pub fn has_pending(&self) -> bool {
        self.shared
            .tags
            .lock()
            .iter()
            .any(|(_, entry)| entry.value.is_none())
    }

    /// Start a new window on this handle. Clones keep the previous one.
    pub fn rotate(&mut self) {
        self.window = Arc::new(Mutex::new(Window::default()));
    }

    /// Current change generation.
    pub fn generation(&self) -> u64 {
        self.shared.counter.value()
    }

    /// Block until the container changes after generation `last`.
    ///
    /// Returns `None` once the container is disposed, telling the caller to
    /// stop waiting.
    pub fn wait(&self, last: Option<u64>) -> Option<u64> {
        if self.is_disposed() {
            return None;
        }
        let value = self.shared.counter.wait(last);
        if self.is_disposed() {
            None
        } else {
            Some(value)
        }
    }

    /// Wake every waiter without changing the contents.
    pub fn wake(&self) {
        self.shared.counter.pulse();
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// Empty both structures and wake every waiter. Idempotent.
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let mut tags = self.shared.tags.lock();
            tags.clear();
            self.window.lock().clear();
        }
        self.shared.counter.pulse();
    }
}

impl std::fmt::Debug for Tags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tags")
            .field("len", &self.len())
            .field("window", &self.window_len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn key(n: u8) -> TagKey {
        TagKey::new(vec![0x30, n])
    }

    fn tag(n: u8) -> Tag {
        Tag::new(key(n))
    }

    #[test]
    fn test_add_deduplicates() {
        let tags = Tags::new(&TagsConfig::default());
        assert!(tags.add(key(1), Some(tag(1))));
        assert!(!tags.add(key(1), Some(tag(1))));
        assert_eq!(tags.len(), 1);
        assert_eq!(tags.window_len(), 1);
    }

    #[test]
    fn test_add_tag_skips_window() {
        let tags = Tags::new(&TagsConfig::default());
        tags.add_tag(tag(1));
        assert_eq!(tags.len(), 1);
        assert_eq!(tags.window_len(), 0);
        assert!(tags.snapshot().is_empty());
    }

    #[test]
    fn test_put_resolves_pending() {
        let tags = Tags::new(&TagsConfig::default());
        tags.add(key(1), None);
        assert!(tags.has_pending());
        assert!(matches!(tags.get(&key(1)), Some(None)));
        tags.put(key(1), tag(1));
        assert!(!tags.has_pending());
        assert!(matches!(tags.get(&key(1)), Some(Some(_))));
    }

    #[test]
    fn test_rotate_keeps_clone_window() {
        let mut live = Tags::new(&TagsConfig::default());
        live.add(key(1), Some(tag(1)));
        let snapshot = live.clone();
        live.rotate();
        live.add(key(2), Some(tag(2)));

        let old: Vec<_> = snapshot.snapshot().into_iter().map(|(k, _)| k).collect();
        let new: Vec<_> = live.snapshot().into_iter().map(|(k, _)| k).collect();
        assert_eq!(old, vec![key(1)]);
        assert_eq!(new, vec![key(2)]);
        // persistent set is shared
        assert_eq!(snapshot.len(), 2);
    }

    #[test]
    fn test_clear_evicts_oldest_beyond_count() {
        let tags = Tags::new(&TagsConfig {
            max_count: Some(2),
            lifetime_ms: None,
        });
        for n in 1..=4 {
            tags.add(key(n), Some(tag(n)));
        }
        tags.clear();
        assert_eq!(tags.len(), 2);
        assert!(!tags.contains(&key(1)));
        assert!(!tags.contains(&key(2)));
        assert!(tags.contains(&key(4)));
    }

    #[test]
    fn test_clear_evicts_by_lifetime() {
        let tags = Tags::new(&TagsConfig {
            max_count: None,
            lifetime_ms: Some(20),
        });
        tags.add(key(1), Some(tag(1)));
        thread::sleep(Duration::from_millis(30));
        tags.add(key(2), Some(tag(2)));
        tags.clear();
        assert!(!tags.contains(&key(1)));
        assert!(tags.contains(&key(2)));
    }

    #[test]
    fn test_remove_lifetime_exceeded_and_check_whether_seen() {
        let tags = Tags::new(&TagsConfig {
            max_count: None,
            lifetime_ms: Some(20),
        });
        assert!(!tags.remove_lifetime_exceeded_and_check_whether_seen(&key(1)));
        tags.add(key(1), Some(tag(1)));
        assert!(tags.remove_lifetime_exceeded_and_check_whether_seen(&key(1)));
        thread::sleep(Duration::from_millis(30));
        assert!(!tags.remove_lifetime_exceeded_and_check_whether_seen(&key(1)));
        assert!(tags.is_empty());
    }

    #[test]
    fn test_reset_waits_for_pending() {
        let tags = Tags::new(&TagsConfig::default());
        tags.add(key(1), None);
        let producer = tags.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            producer.put(key(1), tag(1));
        });

        let start = Instant::now();
        tags.reset();
        assert!(start.elapsed() >= Duration::from_millis(25));
        assert!(tags.is_empty());
        assert_eq!(tags.window_len(), 0);
        handle.join().unwrap();
    }

    #[test]
    fn test_dispose_releases_waiters() {
        let tags = Tags::new(&TagsConfig::default());
        let waiter = tags.clone();
        let generation = tags.generation();

        let handle = thread::spawn(move || waiter.wait(Some(generation)));
        thread::sleep(Duration::from_millis(20));
        tags.dispose();
        tags.dispose();

        assert_eq!(handle.join().unwrap(), None);
        assert!(tags.is_disposed());
        assert_eq!(tags.wait(None), None);
    }
}
