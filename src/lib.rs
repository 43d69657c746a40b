//! # Vocab Translator
//!
//! 面向词汇表的批量翻译库：把一组单词分批发送给远程翻译服务，
//! 在不稳定的网络和有速率限制的上游面前尽量完成整张列表。
//!
//! ## 主要特性
//!
//! - **缓存优先**: 有效期内的翻译结果直接复用，只请求未命中的单词
//! - **多端点故障转移**: 主端点失败时依次尝试备用端点，成功的备用端点可被提升为主端点
//! - **错误分类**: 按错误类别决定重试、跳过批次或中止运行
//! - **速率限制**: 滑动窗口限流，收到 429 后自动降低每分钟请求数
//! - **断路器与退避**: 连续失败后暂停请求，网络错误按指数退避重试
//! - **自适应批次**: 根据成功率调整批次大小
//! - **进度持久化**: 每个批次后保存缓存和统计，中止或取消时不丢失已完成的结果
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vocab_translator::{BatchOrchestrator, JsonFileStore, TranslationLibConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TranslationLibConfig::from_file("translation-config.toml")?;
//!     let store = Arc::new(JsonFileStore::new("translation-progress.json"));
//!     let mut orchestrator = BatchOrchestrator::from_config(&config, store).await?;
//!
//!     let words = vec!["hello".to_string(), "world".to_string()];
//!     let report = orchestrator.process_words(&words).await;
//!     for (word, result) in &report.results {
//!         println!("{} => {}", word, result.translation);
//!     }
//!     println!("status: {:?}", report.status());
//!
//!     Ok(())
//! }
//! ```
//!
//! ## 配置文件支持
//!
//! ```toml
//! [translation]
//! source_lang = "en"
//! target_lang = "zh"
//! model = "llama-3.1-8b-instant"
//! requests_per_minute = 30
//! batch_size = 10
//! smart_batching = true
//! cache_ttl_hours = 24
//!
//! [endpoints]
//! primary = "https://translate.example.com/api/translate"
//! backups = ["https://backup.example.com/api/translate"]
//!
//! [endpoints.model_rpm_caps]
//! "llama-3.1-8b-instant" = 30
//! ```

pub mod batching;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod rate_limiter;
pub mod resilience;
pub mod store;
pub mod translator;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{CacheEntry, CacheStats, ResultCache};
pub use classifier::{categorize, error_policy, suggestion, ErrorCategory, ErrorPolicy};
pub use config::TranslationLibConfig;
pub use endpoints::EndpointList;
pub use error::{RemoteError, RemoteErrorKind, Result, TranslationError};
pub use events::{CancellationFlag, EventSink, LogLevel, ProgressUpdate, TracingEventSink};
pub use orchestrator::BatchOrchestrator;
pub use rate_limiter::{RpmSetting, SlidingWindowRateLimiter};
pub use resilience::{CircuitBreaker, CircuitState, ExponentialBackoff};
pub use store::{JsonFileStore, MemoryStore, PersistedState, ProgressStore, UsageStats};
pub use translator::{EndpointFailoverClient, FailoverSession};
pub use transport::{HttpTransport, Transport};
pub use types::{
    BatchResult, EndpointConfig, OperationSummary, RunReport, RunStatus, TranslateRequest,
    TranslationConfig, TranslationResult,
};
