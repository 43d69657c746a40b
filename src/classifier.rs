//! 错误分类模块
//!
//! 把原始失败映射到固定的错误类别，并给出每个类别的重试策略和处理建议。
//! 上游错误文本不是有版本约束的契约，所以分类是按顺序匹配的启发式规则，
//! 第一条命中的规则生效。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Model,
    Json,
    RateLimit,
    Network,
    Server,
    Parse,
    Validation,
    Capacity,
    ModelCapacity,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 9] = [
        ErrorCategory::Model,
        ErrorCategory::Json,
        ErrorCategory::RateLimit,
        ErrorCategory::Network,
        ErrorCategory::Server,
        ErrorCategory::Parse,
        ErrorCategory::Validation,
        ErrorCategory::Capacity,
        ErrorCategory::ModelCapacity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Model => "MODEL",
            ErrorCategory::Json => "JSON",
            ErrorCategory::RateLimit => "RATE_LIMIT",
            ErrorCategory::Network => "NETWORK",
            ErrorCategory::Server => "SERVER",
            ErrorCategory::Parse => "PARSE",
            ErrorCategory::Validation => "VALIDATION",
            ErrorCategory::Capacity => "CAPACITY",
            ErrorCategory::ModelCapacity => "MODEL_CAPACITY",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 重试策略
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorPolicy {
    pub retryable: bool,
    pub max_retries: u32,
    pub backoff_multiplier: f64,
}

const CAPACITY_PHRASES: &[&str] = &["over capacity", "overcapacity", "overloaded with requests"];

const MODEL_UNAVAILABLE_PHRASES: &[&str] = &[
    "model not found",
    "model_not_found",
    "does not exist",
    "model is not available",
    "model unavailable",
    "model_decommissioned",
    "decommissioned",
    "invalid model",
    "unknown model",
    "no such model",
];

const RATE_LIMIT_PHRASES: &[&str] = &[
    "rate limit",
    "rate_limit",
    "ratelimit",
    "too many requests",
    "quota",
];

const JSON_PHRASES: &[&str] = &["json", "failed to parse", "parse error"];

const NETWORK_PHRASES: &[&str] = &[
    "network",
    "timeout",
    "timed out",
    "connection",
    "econnreset",
    "econnrefused",
    "abort",
    "fetch failed",
    "dns",
];

const PARSE_PHRASES: &[&str] = &["unexpected token", "invalid response", "unexpected response"];

const VALIDATION_PHRASES: &[&str] = &["invalid", "validation"];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

/// 对消息文本和状态码按顺序应用启发式规则
pub fn categorize(message: &str, status: Option<u16>) -> ErrorCategory {
    let msg = message.to_lowercase();

    if contains_any(&msg, CAPACITY_PHRASES) {
        return ErrorCategory::Capacity;
    }
    if (msg.contains("model") || msg.contains("llama")) && msg.contains("capacity") {
        return ErrorCategory::ModelCapacity;
    }
    if contains_any(&msg, MODEL_UNAVAILABLE_PHRASES) {
        return ErrorCategory::Model;
    }
    if status == Some(429) || contains_any(&msg, RATE_LIMIT_PHRASES) {
        return ErrorCategory::RateLimit;
    }
    if contains_any(&msg, JSON_PHRASES) {
        return ErrorCategory::Json;
    }
    if contains_any(&msg, NETWORK_PHRASES) {
        return ErrorCategory::Network;
    }
    if matches!(status, Some(500..=599)) {
        return ErrorCategory::Server;
    }
    if contains_any(&msg, PARSE_PHRASES) {
        return ErrorCategory::Parse;
    }
    if contains_any(&msg, VALIDATION_PHRASES) {
        return ErrorCategory::Validation;
    }
    ErrorCategory::Server
}

/// 每个类别固定的一行重试策略
pub fn error_policy(category: ErrorCategory) -> ErrorPolicy {
    let (retryable, max_retries, backoff_multiplier) = match category {
        ErrorCategory::Model => (false, 0, 1.0),
        ErrorCategory::RateLimit => (true, 2, 2.0),
        ErrorCategory::Json => (true, 1, 1.0),
        ErrorCategory::Network => (true, 3, 2.0),
        ErrorCategory::Server => (true, 2, 1.5),
        ErrorCategory::Parse => (true, 1, 1.0),
        ErrorCategory::Validation => (false, 0, 1.0),
        ErrorCategory::Capacity => (true, 2, 3.0),
        ErrorCategory::ModelCapacity => (true, 1, 5.0),
    };
    ErrorPolicy {
        retryable,
        max_retries,
        backoff_multiplier,
    }
}

/// 面向用户的处理建议
pub fn suggestion(category: ErrorCategory, model: &str) -> String {
    match category {
        ErrorCategory::Model => format!(
            "模型 {} 不可用或已下线，请在设置中选择其他模型",
            model
        ),
        ErrorCategory::Json => {
            "服务返回的 JSON 格式无效，请减小批次大小或关闭 JSON 模式后重试".to_string()
        }
        ErrorCategory::RateLimit => {
            "已达到请求速率限制，请降低每分钟请求数或稍后再试".to_string()
        }
        ErrorCategory::Network => "网络连接不稳定，请检查网络或代理设置后重试".to_string(),
        ErrorCategory::Server => "翻译服务暂时不可用，请稍后重试或切换备用端点".to_string(),
        ErrorCategory::Parse => "无法解析服务响应，请检查端点地址是否正确".to_string(),
        ErrorCategory::Validation => {
            "部分单词的翻译未通过校验，请检查输入单词或更换语言设置".to_string()
        }
        ErrorCategory::Capacity => "上游服务当前容量已满，请稍后再试".to_string(),
        ErrorCategory::ModelCapacity => format!(
            "模型 {} 当前负载过高，请稍后再试或切换到其他模型",
            model
        ),
    }
}
