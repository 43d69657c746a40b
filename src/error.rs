//! 错误处理模块
//!
//! 定义翻译库中使用的错误类型，以及 HTTP 边界上产生的结构化远程错误。

use crate::classifier::{categorize, ErrorCategory};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// 远程错误的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// 服务端返回了非 2xx 状态码
    Http,
    /// 连接失败、连接被重置等传输层错误
    Network,
    /// 请求超时
    Timeout,
    /// 2xx 响应但响应体无法解析
    InvalidResponse,
}

/// HTTP 边界上产生的结构化错误
///
/// `category_hint` 来自失败响应体中的 `errorCategory` 字段（如果存在）。
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    /// 错误来源
    pub kind: RemoteErrorKind,
    /// HTTP 状态码（如果有）
    pub status: Option<u16>,
    /// 错误消息
    pub message: String,
    /// 上游给出的错误类别提示
    pub category_hint: Option<String>,
}

impl RemoteError {
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::Http,
            status: Some(status),
            message: message.into(),
            category_hint: None,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::Network,
            status: None,
            message: message.into(),
            category_hint: None,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::Timeout,
            status: None,
            message: message.into(),
            category_hint: None,
        }
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::InvalidResponse,
            status: None,
            message: message.into(),
            category_hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.category_hint = Some(hint.into());
        self
    }

    /// 归类远程错误
    ///
    /// 优先使用结构化信息：传输层失败一定是 NETWORK，无法解析的成功响应一定是
    /// PARSE。容量类错误的文本比上游提示更具体，所以先于提示检查。
    /// 其余情况退回到基于消息文本和状态码的启发式规则。
    pub fn category(&self) -> ErrorCategory {
        match self.kind {
            RemoteErrorKind::Network | RemoteErrorKind::Timeout => return ErrorCategory::Network,
            RemoteErrorKind::InvalidResponse => return ErrorCategory::Parse,
            RemoteErrorKind::Http => {}
        }

        let heuristic = categorize(&self.message, self.status);
        if matches!(
            heuristic,
            ErrorCategory::Capacity | ErrorCategory::ModelCapacity
        ) {
            return heuristic;
        }

        match self.category_hint.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("model") => ErrorCategory::Model,
            Some("json") => ErrorCategory::Json,
            _ => heuristic,
        }
    }

    /// 上游是否报告了混合文字（mixed script）校验失败
    pub fn is_mixed_script(&self) -> bool {
        is_mixed_script_message(&self.message)
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "HTTP {}: {}", status, self.message),
            None => write!(f, "{:?}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for RemoteError {}

pub(crate) fn is_mixed_script_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["mixed script", "mixed-script", "mixed_script"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// 单个端点的失败记录
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointFailure {
    pub endpoint: String,
    pub category: ErrorCategory,
    pub error: RemoteError,
}

impl fmt::Display for EndpointFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.endpoint, self.category, self.error)
    }
}

fn join_failures(failures: &[EndpointFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// 翻译错误类型
///
/// # 变体说明
///
/// * `Remote` - 来自远程翻译端点的结构化错误
/// * `AllEndpointsFailed` - 所有端点都失败，附带每个端点的失败原因
/// * `JsonThreshold` / `RateLimitThreshold` - 会话级阈值触发，整次运行必须中止
/// * `CircuitOpen` - 断路器处于打开状态，调用被快速拒绝
/// * `BackoffExhausted` - 指数退避次数用尽
#[derive(Debug, Error)]
pub enum TranslationError {
    /// 远程端点错误
    #[error("{0}")]
    Remote(RemoteError),

    /// 所有端点均失败
    #[error("All endpoints failed: {}", join_failures(.0))]
    AllEndpointsFailed(Vec<EndpointFailure>),

    /// JSON 错误次数达到阈值
    #[error("JSON_THRESHOLD: {count} JSON format errors in this session")]
    JsonThreshold { count: u32 },

    /// 速率限制次数达到阈值
    #[error("RATE_LIMIT_THRESHOLD: {count} rate limit responses in this session")]
    RateLimitThreshold { count: u32 },

    /// 断路器打开
    #[error("Circuit breaker for {service} is open, retry in {retry_in:?}")]
    CircuitOpen { service: String, retry_in: Duration },

    /// 退避次数用尽
    #[error("Exceeded max backoff attempts ({attempts})")]
    BackoffExhausted { attempts: u32 },

    /// 响应中的翻译结果未通过校验
    #[error("Validation error: {0}")]
    Validation(String),

    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// 端点地址无效
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// 持久化错误
    #[error("Storage error: {0}")]
    Storage(String),

    /// HTTP请求错误
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// 序列化错误
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML解析错误
    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// TOML序列化错误
    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

impl TranslationError {
    /// 错误所属类别，决定本地恢复策略
    pub fn category(&self) -> ErrorCategory {
        match self {
            TranslationError::Remote(e) => e.category(),
            TranslationError::AllEndpointsFailed(failures) => failures
                .last()
                .map(|f| f.category)
                .unwrap_or(ErrorCategory::Server),
            TranslationError::JsonThreshold { .. } => ErrorCategory::Json,
            TranslationError::RateLimitThreshold { .. } => ErrorCategory::RateLimit,
            TranslationError::CircuitOpen { .. } => ErrorCategory::Server,
            TranslationError::BackoffExhausted { .. } => ErrorCategory::Network,
            TranslationError::Validation(_) => ErrorCategory::Validation,
            TranslationError::Http(e) if e.is_timeout() || e.is_connect() => {
                ErrorCategory::Network
            }
            TranslationError::Serialization(_) => ErrorCategory::Parse,
            other => categorize(&other.to_string(), None),
        }
    }

    /// 是否为会话级阈值哨兵
    pub fn is_threshold(&self) -> bool {
        matches!(
            self,
            TranslationError::JsonThreshold { .. } | TranslationError::RateLimitThreshold { .. }
        )
    }

    /// 失败是否完全由混合文字校验引起
    pub fn is_mixed_script(&self) -> bool {
        match self {
            TranslationError::Remote(e) => e.is_mixed_script(),
            TranslationError::AllEndpointsFailed(failures) => {
                !failures.is_empty() && failures.iter().all(|f| f.error.is_mixed_script())
            }
            TranslationError::Validation(msg) => is_mixed_script_message(msg),
            _ => false,
        }
    }
}

impl From<RemoteError> for TranslationError {
    fn from(error: RemoteError) -> Self {
        TranslationError::Remote(error)
    }
}

/// 翻译结果类型别名
///
/// # 示例
///
/// ```rust
/// use vocab_translator::{Result, TranslationError};
///
/// fn example_function() -> Result<String> {
///     Ok("Success".to_string())
/// }
/// ```
pub type Result<T> = std::result::Result<T, TranslationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_failures_are_network_regardless_of_text() {
        let err = RemoteError::network("error sending request: invalid json");
        assert_eq!(err.category(), ErrorCategory::Network);

        let err = RemoteError::timeout("operation timed out");
        assert_eq!(err.category(), ErrorCategory::Network);
    }

    #[test]
    fn undecodable_success_body_is_parse() {
        let err = RemoteError::invalid_response("expected value at line 1");
        assert_eq!(err.category(), ErrorCategory::Parse);
    }

    #[test]
    fn upstream_hint_wins_over_generic_heuristics() {
        let err = RemoteError::http(400, "Bad request").with_hint("json");
        assert_eq!(err.category(), ErrorCategory::Json);

        let err = RemoteError::http(404, "not here").with_hint("model");
        assert_eq!(err.category(), ErrorCategory::Model);
    }

    #[test]
    fn capacity_text_beats_model_hint() {
        let err = RemoteError::http(503, "llama-3 model is at capacity").with_hint("model");
        assert_eq!(err.category(), ErrorCategory::ModelCapacity);
    }

    #[test]
    fn all_endpoints_failed_lists_every_endpoint() {
        let err = TranslationError::AllEndpointsFailed(vec![
            EndpointFailure {
                endpoint: "https://a.example".into(),
                category: ErrorCategory::Network,
                error: RemoteError::network("connection refused"),
            },
            EndpointFailure {
                endpoint: "https://b.example".into(),
                category: ErrorCategory::Server,
                error: RemoteError::http(502, "bad gateway"),
            },
        ]);
        let text = err.to_string();
        assert!(text.contains("https://a.example [NETWORK]"));
        assert!(text.contains("https://b.example [SERVER]"));
        assert_eq!(err.category(), ErrorCategory::Server);
    }

    #[test]
    fn mixed_script_requires_every_endpoint_to_agree() {
        let mixed = EndpointFailure {
            endpoint: "https://a.example".into(),
            category: ErrorCategory::Validation,
            error: RemoteError::http(422, "Mixed-script output rejected"),
        };
        let other = EndpointFailure {
            endpoint: "https://b.example".into(),
            category: ErrorCategory::Network,
            error: RemoteError::network("reset"),
        };
        assert!(TranslationError::AllEndpointsFailed(vec![mixed.clone()]).is_mixed_script());
        assert!(!TranslationError::AllEndpointsFailed(vec![mixed, other]).is_mixed_script());
    }
}
