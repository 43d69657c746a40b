//! 批量翻译编排器
//!
//! 顶层驱动：拆分缓存命中与未命中、排序、分批，逐批通过限流器和断路器调用
//! 故障转移客户端，按失败分级策略决定重试、跳过还是中止，并在每个批次后持久化进度。
//!
//! 同一时间只有一个批次在处理，结果表、缓存和汇总都由编排器独占，不需要加锁。

use crate::batching::{estimate_batches, prioritize, AdaptiveBatchController};
use crate::cache::ResultCache;
use crate::classifier::{error_policy, suggestion, ErrorCategory, ErrorPolicy};
use crate::config::TranslationLibConfig;
use crate::endpoints::EndpointList;
use crate::error::{Result, TranslationError};
use crate::events::{CancellationFlag, EventSink, LogLevel, ProgressUpdate, TracingEventSink};
use crate::rate_limiter::{RpmSetting, SlidingWindowRateLimiter};
use crate::resilience::{CircuitBreaker, ExponentialBackoff};
use crate::store::{PersistedState, ProgressStore, UsageStats};
use crate::transport::{HttpTransport, Transport};
use crate::translator::{EndpointFailoverClient, FailoverSession};
use crate::types::{
    normalize_key, BatchResult, EndpointConfig, OperationSummary, RunReport, RunStatus,
    TranslateRequest, TranslationConfig,
};
use chrono::Utc;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};

/// 断路器保护的服务名
pub const TRANSLATION_SERVICE: &str = "remote-translation";

const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);
const RETRY_BASE_DELAY_MS: f64 = 1000.0;
const RETRY_MAX_DELAY_MS: f64 = 30_000.0;

/// 同一批次第 `attempt` 次重试前的等待时间
fn retry_delay(policy: ErrorPolicy, attempt: u32) -> Duration {
    let millis = RETRY_BASE_DELAY_MS * policy.backoff_multiplier.powi(attempt as i32);
    Duration::from_millis(millis.min(RETRY_MAX_DELAY_MS) as u64)
}

/// 失败分级的处理结论
enum FailureAction {
    /// 原地重试同一批次
    Retry,
    /// 跳过当前批次，继续下一个
    Skip,
    /// 中止整次运行
    Abort(String),
}

/// 单次运行的可变状态，每次运行开始时重新创建
struct RunState {
    session: FailoverSession,
    backoff: ExponentialBackoff,
    consecutive_failures: u32,
    backoff_until: Option<Instant>,
    adaptive: Option<AdaptiveBatchController>,
    failed_for_run: HashSet<String>,
    results: BatchResult,
    summary: OperationSummary,
    done_batches: usize,
}

impl RunState {
    fn new(config: &TranslationConfig) -> Self {
        Self {
            session: FailoverSession::default(),
            backoff: ExponentialBackoff::default(),
            consecutive_failures: 0,
            backoff_until: None,
            adaptive: config
                .smart_batching
                .then(|| AdaptiveBatchController::new(config.clamped_batch_size())),
            failed_for_run: HashSet::new(),
            results: BatchResult::new(),
            summary: OperationSummary::start(0),
            done_batches: 0,
        }
    }

    fn batch_size(&self, config: &TranslationConfig) -> usize {
        self.adaptive
            .as_ref()
            .map(AdaptiveBatchController::current_batch_size)
            .unwrap_or_else(|| config.clamped_batch_size())
    }

    fn next_batch(&self, queue: &mut VecDeque<String>, size: usize) -> Option<Vec<String>> {
        let mut batch = Vec::with_capacity(size);
        while batch.len() < size {
            let Some(word) = queue.pop_front() else { break };
            if self.failed_for_run.contains(&normalize_key(&word)) {
                continue;
            }
            batch.push(word);
        }
        (!batch.is_empty()).then_some(batch)
    }

    /// 把一个批次记为已处理但失败
    fn give_up_batch(&mut self, batch: &[String]) {
        self.summary.failure_count += batch.len();
        self.summary.processed_words += batch.len();
        self.done_batches += 1;
    }
}

/// 批量翻译编排器
pub struct BatchOrchestrator<T: Transport> {
    config: TranslationConfig,
    client: EndpointFailoverClient<T>,
    breaker: CircuitBreaker,
    limiter: SlidingWindowRateLimiter,
    rpm: RpmSetting,
    cache: ResultCache,
    usage: UsageStats,
    persisted_endpoints: Option<EndpointList>,
    store: Arc<dyn ProgressStore>,
    events: Arc<dyn EventSink>,
    cancel: CancellationFlag,
    last_sweep: Instant,
}

impl BatchOrchestrator<HttpTransport> {
    /// 使用 reqwest 传输层，从完整配置创建编排器
    pub async fn from_config(
        config: &TranslationLibConfig,
        store: Arc<dyn ProgressStore>,
    ) -> Result<Self> {
        config.validate()?;
        let transport =
            HttpTransport::new(Duration::from_secs(config.translation.request_timeout_secs));
        Self::new(
            config.translation.clone(),
            &config.endpoints,
            transport,
            store,
        )
        .await
    }
}

impl<T: Transport> BatchOrchestrator<T> {
    /// 创建编排器并从存储中恢复缓存、用量统计、端点顺序和请求速率
    ///
    /// 读取存储失败只会记录警告，使用空状态继续。
    pub async fn new(
        config: TranslationConfig,
        endpoints: &EndpointConfig,
        transport: T,
        store: Arc<dyn ProgressStore>,
    ) -> Result<Self> {
        let persisted = match store.load().await {
            Ok(state) => state,
            Err(e) => {
                warn!("读取持久化进度失败: {}，使用空状态", e);
                PersistedState::default()
            }
        };

        let endpoint_list = match &persisted.endpoints {
            Some(saved) => EndpointList::new(&saved.primary, &saved.backups)
                .or_else(|_| EndpointList::new(&endpoints.primary, &endpoints.backups))?,
            None => EndpointList::new(&endpoints.primary, &endpoints.backups)?,
        };

        let rpm = RpmSetting::new(
            persisted
                .requests_per_minute
                .unwrap_or(config.requests_per_minute),
        );
        let model_cap = endpoints.model_cap(&config.model);
        let limiter = SlidingWindowRateLimiter::for_model(rpm.clone(), model_cap);
        info!(
            "编排器就绪：{} 个端点，每分钟最多 {} 个请求，缓存 {} 条",
            endpoint_list.len(),
            limiter.max_requests(),
            persisted.cache_store.len()
        );

        let client = EndpointFailoverClient::new(
            transport,
            endpoint_list,
            rpm.clone(),
            config.auto_endpoint_switch,
        );
        let cache = ResultCache::with_store(persisted.cache_store, config.cache_ttl_hours);

        Ok(Self {
            client,
            breaker: CircuitBreaker::new(TRANSLATION_SERVICE),
            limiter,
            rpm,
            cache,
            usage: persisted.usage_stats,
            persisted_endpoints: persisted.endpoints,
            store,
            events: Arc::new(TracingEventSink),
            cancel: CancellationFlag::new(),
            last_sweep: Instant::now(),
            config,
        })
    }

    /// 替换进度和日志事件的接收方
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// 使用外部持有的取消标志
    ///
    /// 每次运行开始时标志会被清除，取消只对正在进行的运行生效。
    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// 共享的取消标志
    pub fn cancellation(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    /// 当前缓存及其命中统计
    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// 累计用量统计，包含从存储恢复的历史数据
    pub fn usage(&self) -> &UsageStats {
        &self.usage
    }

    /// 当前的端点顺序
    pub fn endpoints(&self) -> &EndpointList {
        self.client.endpoints()
    }

    /// 当前每分钟请求数，收到 429 后会被下调
    pub fn requests_per_minute(&self) -> u32 {
        self.rpm.get()
    }

    /// 使用配置中的语言翻译
    pub async fn process_words(&mut self, words: &[String]) -> RunReport {
        let source = self.config.source_lang.clone();
        let target = self.config.target_lang.clone();
        self.process_words_in_batches(words, &source, &target).await
    }

    /// 分批翻译一组单词
    ///
    /// 无论正常完成、部分失败还是被取消，已经得到的结果都会先持久化再返回。
    pub async fn process_words_in_batches(
        &mut self,
        words: &[String],
        source_lang: &str,
        target_lang: &str,
    ) -> RunReport {
        self.cancel.reset_cancel();
        let mut run = RunState::new(&self.config);

        let mut seen = HashSet::new();
        let mut misses = Vec::new();
        for word in words {
            let key = normalize_key(word);
            if key.is_empty() || !seen.insert(key.clone()) {
                continue;
            }
            match self.cache.get(&key) {
                Some(result) if result.is_valid() => {
                    run.results.insert(key, result);
                    run.summary.cache_hits += 1;
                }
                _ => misses.push(word.trim().to_string()),
            }
        }

        run.summary.total_words = seen.len();
        run.summary.processed_words = run.summary.cache_hits;
        self.usage.cache_hits += run.summary.cache_hits as u64;
        self.usage.last_run_at = Some(Utc::now());

        self.emit(
            &format!(
                "开始翻译 {} 个单词：缓存命中 {} 个，需要请求 {} 个",
                run.summary.total_words,
                run.summary.cache_hits,
                misses.len()
            ),
            LogLevel::Info,
        );

        let mut queue: VecDeque<String> = prioritize(misses).into();
        let final_status = self
            .run_batches(&mut run, &mut queue, source_lang, target_lang)
            .await;

        match final_status {
            RunStatus::Completed => {
                run.summary.finalize(RunStatus::Completed, None);
                self.emit(
                    &format!(
                        "翻译完成：成功 {}，失败 {}，耗时 {} ms",
                        run.summary.success_count,
                        run.summary.failure_count,
                        run.summary.duration_ms().unwrap_or_default()
                    ),
                    LogLevel::Success,
                );
            }
            RunStatus::Cancelled => {
                run.summary
                    .finalize(RunStatus::Cancelled, Some("cancelled by user".to_string()));
                self.emit("翻译已取消，已保存当前结果", LogLevel::Warning);
            }
            _ => {}
        }

        run.summary.failed_for_run = run.failed_for_run.iter().cloned().collect();
        run.summary.failed_for_run.sort();
        self.persist().await;

        RunReport {
            results: run.results,
            summary: run.summary,
        }
    }

    /// 逐批处理，返回运行的结束状态；中止时已经在汇总里记录了原因
    async fn run_batches(
        &mut self,
        run: &mut RunState,
        queue: &mut VecDeque<String>,
        source_lang: &str,
        target_lang: &str,
    ) -> RunStatus {
        let batch_delay = Duration::from_millis(self.config.batch_delay_ms());

        'batches: loop {
            let size = run.batch_size(&self.config);
            let Some(batch) = run.next_batch(queue, size) else {
                break 'batches;
            };
            let mut retries: HashMap<ErrorCategory, u32> = HashMap::new();

            loop {
                if let Some(deadline) = run.backoff_until.take() {
                    debug!("等待全局退避结束");
                    sleep_until(deadline).await;
                }
                if self.cancel.is_cancel_requested() {
                    return RunStatus::Cancelled;
                }
                self.maybe_sweep_cache().await;

                if self.config.enable_rate_limit {
                    self.limiter.acquire_slot().await;
                }
                if self.cancel.is_cancel_requested() {
                    return RunStatus::Cancelled;
                }

                let request = TranslateRequest::new(
                    batch.clone(),
                    source_lang,
                    target_lang,
                    &self.config,
                );
                self.usage.total_requests += 1;

                let client = &mut self.client;
                let session = &mut run.session;
                let outcome = self
                    .breaker
                    .execute(async move { client.translate(&request, session).await })
                    .await
                    .and_then(|results| split_results(&batch, results));

                match outcome {
                    Ok((valid, invalid)) => {
                        self.on_batch_success(run, &batch, valid, invalid).await;
                        let remaining = queue.len();
                        self.report_progress(run, remaining);
                        if remaining > 0 && !batch_delay.is_zero() {
                            sleep(batch_delay).await;
                        }
                        break;
                    }
                    Err(error) => match self.on_batch_failure(run, &batch, &error, &mut retries).await
                    {
                        FailureAction::Retry => continue,
                        FailureAction::Skip => {
                            self.report_progress(run, queue.len());
                            break;
                        }
                        FailureAction::Abort(reason) => {
                            let category = error.category();
                            run.summary.add_suggestion(suggestion(category, &self.config.model));
                            run.summary.finalize(RunStatus::Failed, Some(reason.clone()));
                            self.emit(&format!("翻译中止: {}", reason), LogLevel::Error);
                            return RunStatus::Failed;
                        }
                    },
                }
            }
        }

        RunStatus::Completed
    }

    async fn on_batch_success(
        &mut self,
        run: &mut RunState,
        batch: &[String],
        valid: BatchResult,
        invalid: Vec<String>,
    ) {
        run.consecutive_failures = 0;
        run.backoff.reset();
        if let Some(adaptive) = run.adaptive.as_mut() {
            adaptive.on_success();
        }

        let translated = valid.len();
        for (key, result) in valid {
            self.cache.set(&key, result.clone());
            run.results.insert(key, result);
        }

        run.summary.success_count += translated;
        run.summary.failure_count += invalid.len();
        run.summary.processed_words += batch.len();
        run.done_batches += 1;
        self.usage.successful_requests += 1;
        self.usage.words_translated += translated as u64;

        if !invalid.is_empty() {
            run.summary.record_error(ErrorCategory::Validation);
            self.emit(
                &format!("{} 个单词的翻译未通过校验: {}", invalid.len(), invalid.join(", ")),
                LogLevel::Warning,
            );
            run.summary.skipped_words.extend(invalid);
        }
        if let Some(promoted) = self.client.take_promotion() {
            self.emit(
                &format!("已切换主端点到 {}", promoted.primary),
                LogLevel::Info,
            );
            self.persisted_endpoints = Some(promoted);
        }

        self.emit(
            &format!("批次 {} 完成：{} 个单词", run.done_batches, translated),
            LogLevel::Success,
        );
        self.persist().await;
    }

    /// 失败分级：第一条命中的规则生效
    async fn on_batch_failure(
        &mut self,
        run: &mut RunState,
        batch: &[String],
        error: &TranslationError,
        retries: &mut HashMap<ErrorCategory, u32>,
    ) -> FailureAction {
        let category = error.category();
        run.summary.record_error(category);
        self.usage.failed_requests += 1;
        warn!("批次失败 [{}]: {}", category, error);

        // 1. 混合文字校验失败：本次运行不再处理这些单词，不计入连续失败
        if error.is_mixed_script() {
            for word in batch {
                run.failed_for_run.insert(normalize_key(word));
            }
            run.give_up_batch(batch);
            self.emit(
                &format!("{} 个单词混合文字校验失败，本次运行跳过", batch.len()),
                LogLevel::Warning,
            );
            return FailureAction::Skip;
        }

        // 2. 模型不可用
        if category == ErrorCategory::Model {
            return FailureAction::Abort(format!("[{}] {}", category, error));
        }

        // 3. 会话阈值
        if error.is_threshold() {
            return FailureAction::Abort(error.to_string());
        }

        // 4. 整体性故障
        if category == ErrorCategory::Server
            || matches!(
                error,
                TranslationError::CircuitOpen { .. } | TranslationError::AllEndpointsFailed(_)
            )
        {
            return FailureAction::Abort(format!("[{}] {}", category, error));
        }

        // 5. 按类别策略原地重试；整次运行的退避次数用完后不再重试
        let policy = error_policy(category);
        let used = retries.entry(category).or_insert(0);
        if policy.retryable && *used < policy.max_retries {
            match run.backoff.advance() {
                Ok(step) => {
                    *used += 1;
                    let attempt = *used;
                    let delay = retry_delay(policy, attempt).max(step);
                    run.backoff_until = Some(Instant::now() + delay);
                    self.emit(
                        &format!("{} 错误，{:?} 后第 {} 次重试当前批次", category, delay, attempt),
                        LogLevel::Warning,
                    );
                    return FailureAction::Retry;
                }
                Err(e) => warn!("{}", e),
            }
        }

        // 6. 计入连续失败上限，跳过当前批次
        run.consecutive_failures += 1;
        if let Some(adaptive) = run.adaptive.as_mut() {
            adaptive.on_failure();
        }
        run.give_up_batch(batch);
        run.summary.skipped_words.extend(batch.iter().cloned());
        run.summary
            .add_suggestion(suggestion(category, &self.config.model));

        let cap = self.config.max_consecutive_failures.max(1);
        if run.consecutive_failures >= cap {
            return FailureAction::Abort(format!(
                "[{}] {} consecutive failed batches, last error: {}",
                category, run.consecutive_failures, error
            ));
        }
        self.emit(
            &format!(
                "跳过 {} 个单词（连续失败 {}/{}）: {}",
                batch.len(),
                run.consecutive_failures,
                cap,
                error
            ),
            LogLevel::Warning,
        );
        FailureAction::Skip
    }

    fn report_progress(&self, run: &RunState, remaining: usize) {
        let size = run.batch_size(&self.config);
        self.events.on_progress(ProgressUpdate {
            done_batches: run.done_batches,
            total_batches: run.done_batches + estimate_batches(remaining, size),
            done_words: run.summary.processed_words,
            total_words: run.summary.total_words,
        });
    }

    fn emit(&self, message: &str, level: LogLevel) {
        self.events.on_log_event(message, level);
    }

    async fn maybe_sweep_cache(&mut self) {
        if self.last_sweep.elapsed() >= CACHE_SWEEP_INTERVAL {
            self.sweep_cache().await;
        }
    }

    /// 清理过期缓存并持久化，返回清理数量
    pub async fn sweep_cache(&mut self) -> usize {
        self.last_sweep = Instant::now();
        let removed = self.cache.sweep_expired();
        if removed > 0 {
            info!("定期清理移除了 {} 个过期缓存条目", removed);
        }
        self.persist().await;
        removed
    }

    fn snapshot(&self) -> PersistedState {
        let rpm = self.rpm.get();
        PersistedState {
            cache_store: self.cache.store().clone(),
            usage_stats: self.usage.clone(),
            endpoints: self.persisted_endpoints.clone(),
            requests_per_minute: (rpm != self.config.requests_per_minute).then_some(rpm),
        }
    }

    /// 写入存储，失败只记录日志
    async fn persist(&self) {
        if let Err(e) = self.store.save(&self.snapshot()).await {
            warn!("保存进度失败: {}", e);
            self.emit(&format!("保存进度失败: {}", e), LogLevel::Warning);
        }
    }
}

/// 按请求中的单词拆分有效和无效结果；一个有效结果都没有时视为校验失败
fn split_results(batch: &[String], results: BatchResult) -> Result<(BatchResult, Vec<String>)> {
    let by_key: HashMap<String, _> = results
        .into_iter()
        .map(|(word, result)| (normalize_key(&word), result))
        .collect();

    let mut valid = BatchResult::new();
    let mut invalid = Vec::new();
    for word in batch {
        let key = normalize_key(word);
        match by_key.get(&key) {
            Some(result) if result.is_valid() => {
                valid.insert(key, result.clone());
            }
            _ => invalid.push(word.clone()),
        }
    }

    if valid.is_empty() {
        return Err(TranslationError::Validation(format!(
            "no valid translations in response for {} words",
            batch.len()
        )));
    }
    Ok((valid, invalid))
}
