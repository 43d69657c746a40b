//! 翻译结果缓存
//!
//! 以小写单词为键、带 TTL 的内存缓存。缓存内容随进度一起持久化，
//! 所以条目的时间戳使用墙上时钟（毫秒）。

use crate::types::{normalize_key, TranslationResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// 缓存条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// 写入时间（Unix 毫秒）
    pub timestamp: i64,
    pub result: TranslationResult,
}

impl CacheEntry {
    pub fn is_expired(&self, now_ms: i64, ttl_ms: i64) -> bool {
        now_ms - self.timestamp > ttl_ms
    }
}

/// 缓存统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
    pub sets: u64,
}

/// 持久化的缓存存储：单词 -> 条目
pub type CacheStore = HashMap<String, CacheEntry>;

pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// TTL 结果缓存
#[derive(Debug, Clone)]
pub struct ResultCache {
    entries: CacheStore,
    ttl_ms: i64,
    stats: CacheStats,
}

impl ResultCache {
    pub fn new(ttl_hours: u64) -> Self {
        Self::with_store(CacheStore::new(), ttl_hours)
    }

    pub fn with_store(entries: CacheStore, ttl_hours: u64) -> Self {
        Self {
            entries,
            ttl_ms: (ttl_hours as i64).saturating_mul(3_600_000),
            stats: CacheStats::default(),
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn store(&self) -> &CacheStore {
        &self.entries
    }

    pub fn get(&mut self, word: &str) -> Option<TranslationResult> {
        self.get_at(word, now_ms())
    }

    /// 按给定时间查询；过期条目会被顺带删除，全空哨兵视为未命中
    pub fn get_at(&mut self, word: &str, now_ms: i64) -> Option<TranslationResult> {
        let key = normalize_key(word);
        let Some(entry) = self.entries.get(&key) else {
            self.stats.misses += 1;
            return None;
        };

        if entry.is_expired(now_ms, self.ttl_ms) {
            self.entries.remove(&key);
            self.stats.expired += 1;
            self.stats.misses += 1;
            return None;
        }
        if entry.result.is_empty() {
            self.stats.misses += 1;
            return None;
        }

        self.stats.hits += 1;
        Some(entry.result.clone())
    }

    pub fn set(&mut self, word: &str, result: TranslationResult) {
        self.set_at(word, result, now_ms());
    }

    pub fn set_at(&mut self, word: &str, result: TranslationResult, timestamp: i64) {
        self.entries
            .insert(normalize_key(word), CacheEntry { timestamp, result });
        self.stats.sets += 1;
    }

    /// 删除所有过期条目，返回删除数量
    pub fn sweep_expired(&mut self) -> usize {
        self.sweep_expired_at(now_ms())
    }

    pub fn sweep_expired_at(&mut self, now_ms: i64) -> usize {
        let ttl_ms = self.ttl_ms;
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now_ms, ttl_ms));
        let removed = before - self.entries.len();
        if removed > 0 {
            self.stats.expired += removed as u64;
            debug!("清理了 {} 个过期缓存条目", removed);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: i64 = 3_600_000;

    fn result(word: &str) -> TranslationResult {
        TranslationResult {
            translation: format!("{word}-zh"),
            definition: "a definition long enough".into(),
            example_source: "an example".into(),
            example_target: "一个例子".into(),
        }
    }

    #[test]
    fn keys_are_case_insensitive() {
        let mut cache = ResultCache::new(24);
        cache.set("Hello", result("hello"));
        assert!(cache.get("HELLO").is_some());
        assert!(cache.get("hello").is_some());
        assert_eq!(cache.stats().hits, 2);
    }

    #[test]
    fn entries_older_than_ttl_are_absent_and_evicted() {
        let mut cache = ResultCache::new(24);
        cache.set_at("word", result("word"), 0);

        assert!(cache.get_at("word", 24 * HOUR).is_some());
        assert!(cache.get_at("word", 24 * HOUR + 1).is_none());
        assert!(cache.is_empty());
        assert_eq!(cache.stats().expired, 1);
    }

    #[test]
    fn empty_sentinel_is_a_miss_but_kept() {
        let mut cache = ResultCache::new(24);
        cache.set("ghost", TranslationResult::default());
        assert!(cache.get("ghost").is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn sweep_removes_only_expired() {
        let mut cache = ResultCache::new(1);
        cache.set_at("old", result("old"), 0);
        cache.set_at("new", result("new"), 2 * HOUR);

        assert_eq!(cache.sweep_expired_at(2 * HOUR + 10), 1);
        assert!(cache.store().contains_key("new"));
        assert!(!cache.store().contains_key("old"));
    }

    #[test]
    fn store_round_trips_through_json() {
        let mut cache = ResultCache::new(24);
        cache.set_at("Word", result("word"), 42);
        let json = serde_json::to_string(cache.store()).unwrap();
        let restored: CacheStore = serde_json::from_str(&json).unwrap();
        let mut cache = ResultCache::with_store(restored, 24);
        assert_eq!(cache.get_at("word", 43), Some(result("word")));
    }
}
