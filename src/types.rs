//! 类型定义模块
//!
//! 定义翻译库中使用的所有数据结构和配置类型。

use crate::classifier::ErrorCategory;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;
use tracing::warn;

/// 批次大小的上下界
pub const MIN_BATCH_SIZE: usize = 1;
pub const MAX_BATCH_SIZE: usize = 20;

/// 翻译配置
///
/// 包含翻译服务的所有配置选项，如语言设置、速率、批次和缓存参数等。
///
/// # 字段说明
///
/// * `source_lang` / `target_lang` - 源语言和目标语言代码
/// * `model` - 上游使用的模型名称
/// * `requests_per_minute` - 每分钟最大请求数（还会被模型上限截断）
/// * `batch_size` - 固定批次大小，智能批次模式下作为初始值
/// * `smart_batching` - 是否根据成功率自适应调整批次大小
/// * `cache_ttl_hours` - 缓存有效期（小时）
/// * `auto_endpoint_switch` - 备用端点成功后是否将其提升为主端点
/// * `max_consecutive_failures` - 连续失败上限，达到后中止运行
/// * `low_resource_mode` - 资源受限环境，批次间隔延长到 3 秒
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationConfig {
    pub source_lang: String,
    pub target_lang: String,
    pub model: String,
    pub requests_per_minute: u32,
    pub enable_rate_limit: bool,
    pub batch_size: usize,
    pub smart_batching: bool,
    pub cache_ttl_hours: u64,
    pub auto_endpoint_switch: bool,
    pub max_consecutive_failures: u32,
    pub low_resource_mode: bool,
    /// 覆盖默认的批次间隔（毫秒）
    pub inter_batch_delay_ms: Option<u64>,
    /// 是否要求上游以 JSON 模式输出
    pub json_format: bool,
    pub request_timeout_secs: u64,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            source_lang: "en".to_string(),
            target_lang: "zh".to_string(),
            model: "llama-3.1-8b-instant".to_string(),
            requests_per_minute: 30,
            enable_rate_limit: true,
            batch_size: 10,
            smart_batching: true,
            cache_ttl_hours: 24,
            auto_endpoint_switch: true,
            max_consecutive_failures: 3,
            low_resource_mode: false,
            inter_batch_delay_ms: None,
            json_format: true,
            request_timeout_secs: 30,
        }
    }
}

impl TranslationConfig {
    /// 批次大小，限制在 [1, 20] 之间
    pub fn clamped_batch_size(&self) -> usize {
        self.batch_size.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE)
    }

    /// 批次之间的固定间隔
    pub fn batch_delay_ms(&self) -> u64 {
        match self.inter_batch_delay_ms {
            Some(ms) => ms,
            None if self.low_resource_mode => 3000,
            None => 2000,
        }
    }
}

/// 端点配置
///
/// 远程配置文档解析后的结果：主端点、备用端点以及各模型的每分钟请求上限。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub primary: String,
    pub backups: Vec<String>,
    pub model_rpm_caps: HashMap<String, u32>,
    pub default_model_rpm_cap: u32,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            primary: String::new(),
            backups: Vec::new(),
            model_rpm_caps: HashMap::new(),
            default_model_rpm_cap: 60,
        }
    }
}

impl EndpointConfig {
    /// 某个模型的每分钟请求上限
    pub fn model_cap(&self, model: &str) -> u32 {
        self.model_rpm_caps
            .get(model)
            .copied()
            .unwrap_or(self.default_model_rpm_cap)
    }
}

/// 缓存和结果表使用的单词键：大小写无关
pub fn normalize_key(word: &str) -> String {
    word.trim().to_lowercase()
}

/// 单词是否包含非 ASCII 字符
pub fn is_non_ascii(word: &str) -> bool {
    !word.is_ascii()
}

/// 单个单词的翻译结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TranslationResult {
    pub translation: String,
    pub definition: String,
    pub example_source: String,
    pub example_target: String,
}

fn corrupted_definition_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"[.。,，;；:：!！?？…\-_~·]{4,}|\?{2,}|\x{FFFD}").ok())
        .as_ref()
}

impl TranslationResult {
    /// 所有字段都为空的哨兵结果
    pub fn is_empty(&self) -> bool {
        self.translation.trim().is_empty()
            && self.definition.trim().is_empty()
            && self.example_source.trim().is_empty()
            && self.example_target.trim().is_empty()
    }

    /// 释义是否可用：至少 10 个字符，去掉符号后至少 5 个字符，且不是已知的乱码标点
    pub fn has_valid_definition(&self) -> bool {
        let definition = self.definition.trim();
        if definition.chars().count() < 10 {
            return false;
        }
        if definition.chars().filter(|c| c.is_alphanumeric()).count() < 5 {
            return false;
        }
        !corrupted_definition_pattern().is_some_and(|p| p.is_match(definition))
    }

    pub fn is_valid(&self) -> bool {
        if self.is_empty() {
            return false;
        }
        !self.translation.trim().is_empty()
            && self.has_valid_definition()
            && self.example_source.trim().chars().count() >= 3
            && self.example_target.trim().chars().count() >= 3
    }
}

/// 一个批次的结果：单词 -> 翻译结果
pub type BatchResult = HashMap<String, TranslationResult>;

/// 请求附带的设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSettings {
    pub json_format: bool,
}

/// 发往远程端点的请求体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslateRequest {
    pub words: Vec<String>,
    pub source_lang: String,
    pub target_lang: String,
    pub model: String,
    pub settings: RequestSettings,
}

impl TranslateRequest {
    pub fn new(
        words: Vec<String>,
        source_lang: &str,
        target_lang: &str,
        config: &TranslationConfig,
    ) -> Self {
        Self {
            words,
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
            model: config.model.clone(),
            settings: RequestSettings {
                json_format: config.json_format,
            },
        }
    }
}

/// 成功响应
#[derive(Debug, Deserialize)]
pub struct SuccessEnvelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub translations: HashMap<String, TranslationResult>,
    #[serde(default)]
    pub error: Option<String>,
}

/// 失败响应
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureEnvelope {
    pub error: String,
    #[serde(default)]
    pub error_category: Option<String>,
}

/// 运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Cancelled | RunStatus::Failed
        )
    }
}

/// 单次运行的汇总
///
/// 运行开始时创建，每个批次后更新，结束时只能 `finalize` 一次。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSummary {
    pub total_words: usize,
    pub processed_words: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub cache_hits: usize,
    pub error_categories: BTreeMap<ErrorCategory, u32>,
    pub suggestions: Vec<String>,
    pub final_status: RunStatus,
    pub abort_reason: Option<String>,
    pub skipped_words: Vec<String>,
    pub failed_for_run: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Default for OperationSummary {
    fn default() -> Self {
        Self {
            total_words: 0,
            processed_words: 0,
            success_count: 0,
            failure_count: 0,
            cache_hits: 0,
            error_categories: BTreeMap::new(),
            suggestions: Vec::new(),
            final_status: RunStatus::Idle,
            abort_reason: None,
            skipped_words: Vec::new(),
            failed_for_run: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

impl OperationSummary {
    pub fn start(total_words: usize) -> Self {
        Self {
            total_words,
            final_status: RunStatus::Running,
            ..Self::default()
        }
    }

    pub fn record_error(&mut self, category: ErrorCategory) {
        *self.error_categories.entry(category).or_insert(0) += 1;
    }

    pub fn add_suggestion(&mut self, suggestion: String) {
        if !self.suggestions.contains(&suggestion) {
            self.suggestions.push(suggestion);
        }
    }

    /// 记录最终状态，只有第一次调用生效
    pub fn finalize(&mut self, status: RunStatus, reason: Option<String>) -> bool {
        if self.final_status.is_terminal() {
            warn!(
                "运行已结束为 {:?}，忽略重复的结束状态 {:?}",
                self.final_status, status
            );
            return false;
        }
        self.final_status = status;
        self.abort_reason = reason;
        self.finished_at = Some(Utc::now());
        true
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}

/// 一次运行的最终产出
#[derive(Debug, Clone)]
pub struct RunReport {
    pub results: BatchResult,
    pub summary: OperationSummary,
}

impl RunReport {
    pub fn status(&self) -> RunStatus {
        self.summary.final_status
    }

    pub fn is_completed(&self) -> bool {
        self.summary.final_status == RunStatus::Completed
    }
}
