//! 批次规划
//!
//! 自适应批次大小控制器，以及未命中缓存单词的优先级排序。

use crate::types::{is_non_ascii, MAX_BATCH_SIZE, MIN_BATCH_SIZE};
use tracing::debug;

/// 根据最近的成功/失败窗口调整批次大小
///
/// 连续成功 `window_size` 次后批次加 1（上限 20）；连续失败 2 次后缩小到 70%（下限 1）。
#[derive(Debug, Clone)]
pub struct AdaptiveBatchController {
    current_batch_size: usize,
    recent_successes: u32,
    recent_failures: u32,
    window_size: u32,
}

impl AdaptiveBatchController {
    const FAILURES_BEFORE_SHRINK: u32 = 2;
    const SHRINK_FACTOR: f64 = 0.7;

    pub fn new(baseline: usize) -> Self {
        Self {
            current_batch_size: baseline.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE),
            recent_successes: 0,
            recent_failures: 0,
            window_size: 5,
        }
    }

    pub fn current_batch_size(&self) -> usize {
        self.current_batch_size
    }

    pub fn on_success(&mut self) {
        self.recent_successes += 1;
        self.recent_failures = 0;
        if self.recent_successes >= self.window_size {
            if self.current_batch_size < MAX_BATCH_SIZE {
                self.current_batch_size += 1;
                debug!("批次大小增加到 {}", self.current_batch_size);
            }
            self.recent_successes = 0;
        }
    }

    pub fn on_failure(&mut self) {
        self.recent_failures += 1;
        self.recent_successes = 0;
        if self.recent_failures >= Self::FAILURES_BEFORE_SHRINK {
            let shrunk = (self.current_batch_size as f64 * Self::SHRINK_FACTOR).floor() as usize;
            self.current_batch_size = shrunk.max(MIN_BATCH_SIZE);
            self.recent_failures = 0;
            debug!("批次大小缩小到 {}", self.current_batch_size);
        }
    }
}

/// 单词的处理优先级
///
/// 含非 ASCII 字符的单词最容易校验失败，排在前面，趁本次运行的错误预算还没用掉。
pub fn priority_score(word: &str) -> usize {
    let script_bonus = if is_non_ascii(word) { 1000 } else { 0 };
    script_bonus + word.chars().count().min(100)
}

/// 按优先级降序排列，同分保持原顺序
pub fn prioritize(words: Vec<String>) -> Vec<String> {
    let mut words = words;
    words.sort_by_key(|w| std::cmp::Reverse(priority_score(w)));
    words
}

/// 剩余单词按当前批次大小还需要多少个批次
pub fn estimate_batches(remaining: usize, batch_size: usize) -> usize {
    let batch_size = batch_size.max(1);
    remaining.div_ceil(batch_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_successes_grow_by_one() {
        let mut controller = AdaptiveBatchController::new(10);
        for _ in 0..4 {
            controller.on_success();
        }
        assert_eq!(controller.current_batch_size(), 10);
        controller.on_success();
        assert_eq!(controller.current_batch_size(), 11);
    }

    #[test]
    fn growth_caps_at_twenty() {
        let mut controller = AdaptiveBatchController::new(20);
        for _ in 0..10 {
            controller.on_success();
        }
        assert_eq!(controller.current_batch_size(), 20);
    }

    #[test]
    fn two_failures_shrink_to_seventy_percent() {
        let mut controller = AdaptiveBatchController::new(10);
        controller.on_failure();
        assert_eq!(controller.current_batch_size(), 10);
        controller.on_failure();
        assert_eq!(controller.current_batch_size(), 7);
        controller.on_failure();
        controller.on_failure();
        assert_eq!(controller.current_batch_size(), 4);
    }

    #[test]
    fn shrink_floors_at_one() {
        let mut controller = AdaptiveBatchController::new(1);
        controller.on_failure();
        controller.on_failure();
        assert_eq!(controller.current_batch_size(), 1);
    }

    #[test]
    fn success_breaks_a_failure_streak() {
        let mut controller = AdaptiveBatchController::new(10);
        controller.on_failure();
        controller.on_success();
        controller.on_failure();
        assert_eq!(controller.current_batch_size(), 10);
    }

    #[test]
    fn baseline_is_clamped() {
        assert_eq!(AdaptiveBatchController::new(0).current_batch_size(), 1);
        assert_eq!(AdaptiveBatchController::new(50).current_batch_size(), 20);
    }

    #[test]
    fn non_ascii_words_come_first() {
        let ordered = prioritize(vec!["a".into(), "日本語".into(), "bb".into()]);
        assert_eq!(ordered, vec!["日本語", "bb", "a"]);
    }

    #[test]
    fn longer_words_first_with_length_capped() {
        let long = "x".repeat(150);
        let longer = "y".repeat(300);
        let ordered = prioritize(vec![long.clone(), "abc".into(), longer.clone()]);
        assert_eq!(ordered, vec![long, longer, "abc".to_string()]);
    }

    #[test]
    fn batch_estimate_rounds_up() {
        assert_eq!(estimate_batches(0, 5), 0);
        assert_eq!(estimate_batches(11, 5), 3);
        assert_eq!(estimate_batches(3, 0), 3);
    }
}
