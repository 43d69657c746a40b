//! 进度、日志事件与取消标志
//!
//! 编排器通过 `EventSink` 向外发出进度和日志事件，自身不依赖任何 UI。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// 进度快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub done_batches: usize,
    pub total_batches: usize,
    pub done_words: usize,
    pub total_words: usize,
}

/// 事件接收方
///
/// 实现不能 panic，也无法把错误抛回编排器。
pub trait EventSink: Send + Sync {
    fn on_progress(&self, progress: ProgressUpdate);

    fn on_log_event(&self, message: &str, level: LogLevel);
}

/// 默认实现：转发到 tracing
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn on_progress(&self, progress: ProgressUpdate) {
        tracing::info!(
            "进度: 批次 {}/{}，单词 {}/{}",
            progress.done_batches,
            progress.total_batches,
            progress.done_words,
            progress.total_words
        );
    }

    fn on_log_event(&self, message: &str, level: LogLevel) {
        match level {
            LogLevel::Info | LogLevel::Success => tracing::info!("{}", message),
            LogLevel::Warning => tracing::warn!("{}", message),
            LogLevel::Error => tracing::error!("{}", message),
        }
    }
}

/// 协作式取消标志
///
/// 克隆后共享同一个标志；编排器在每个批次开始前和发出请求前检查它。
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    requested: Arc<AtomicBool>,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub fn request_cancel(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn reset_cancel(&self) {
        self.requested.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let flag = CancellationFlag::new();
        let handle = flag.clone();
        assert!(!flag.is_cancel_requested());
        handle.request_cancel();
        assert!(flag.is_cancel_requested());
        flag.reset_cancel();
        assert!(!handle.is_cancel_requested());
    }
}
