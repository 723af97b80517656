//! 一覧表示の短期キャッシュ
//!
//! ユーザーごとに見えるプロセスが異なるため、キーは閲覧ユーザー単位。
//! ライフサイクル操作のたびに全体を無効化する。

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

pub struct StatusCache<V> {
    ttl: Duration,
    entries: Mutex<LruCache<String, (Instant, V)>>,
}

impl<V: Clone> StatusCache<V> {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            ttl,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, key: &str, now: Instant) -> Option<V> {
        let mut entries = self.entries.lock();
        let found = entries
            .get(key)
            .map(|(stored, value)| (now.saturating_duration_since(*stored) < self.ttl, value.clone()));
        match found {
            Some((true, value)) => Some(value),
            Some((false, _)) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: impl Into<String>, value: V, now: Instant) {
        if self.ttl.is_zero() {
            return;
        }
        self.entries.lock().put(key.into(), (now, value));
    }

    pub fn invalidate_all(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
