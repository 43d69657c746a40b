//! 多端点故障转移客户端
//!
//! 按顺序尝试端点列表。针对不同错误类别先做就地补救（关闭 JSON 模式重试、
//! 等待后重试 429），再决定是否换下一个端点。备用端点成功后可以被提升为主端点。

use crate::classifier::ErrorCategory;
use crate::endpoints::EndpointList;
use crate::error::{EndpointFailure, Result, TranslationError};
use crate::rate_limiter::RpmSetting;
use crate::transport::Transport;
use crate::types::{BatchResult, TranslateRequest};
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// 一次运行内 JSON 400 错误达到该次数时中止
pub const JSON_ERROR_THRESHOLD: u32 = 2;
/// 一次运行内已经收到过该次数的 429 后，再来一次就中止
pub const RATE_LIMIT_THRESHOLD: u32 = 1;

const DEFAULT_RATE_LIMIT_WAIT_MS: u64 = 2000;
const MIN_RATE_LIMIT_WAIT_MS: u64 = 500;
const MAX_RATE_LIMIT_WAIT_MS: u64 = 10_000;

/// 会话级（单次运行）计数器，由编排器持有并在运行开始时清零
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailoverSession {
    pub json_errors: u32,
    pub rate_limit_hits: u32,
}

fn retry_hint_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)try again in\s+(\d+(?:\.\d+)?)\s*(ms|s)?").ok())
        .as_ref()
}

/// 从 "try again in Ns" 之类的文本推算等待时间，默认 2 秒，限制在 [0.5, 10] 秒
pub fn rate_limit_wait(message: &str) -> Duration {
    let parsed = retry_hint_pattern()
        .and_then(|pattern| pattern.captures(message))
        .and_then(|caps| {
            let value: f64 = caps.get(1)?.as_str().parse().ok()?;
            let millis = match caps.get(2).map(|m| m.as_str().to_ascii_lowercase()) {
                Some(unit) if unit == "ms" => value,
                _ => value * 1000.0,
            };
            Some(millis.ceil() as u64)
        });

    let millis = parsed
        .unwrap_or(DEFAULT_RATE_LIMIT_WAIT_MS)
        .clamp(MIN_RATE_LIMIT_WAIT_MS, MAX_RATE_LIMIT_WAIT_MS);
    Duration::from_millis(millis)
}

/// 多端点故障转移客户端
pub struct EndpointFailoverClient<T: Transport> {
    transport: T,
    endpoints: EndpointList,
    auto_switch: bool,
    rpm: RpmSetting,
    promoted: bool,
}

impl<T: Transport> EndpointFailoverClient<T> {
    pub fn new(transport: T, endpoints: EndpointList, rpm: RpmSetting, auto_switch: bool) -> Self {
        Self {
            transport,
            endpoints,
            auto_switch,
            rpm,
            promoted: false,
        }
    }

    pub fn endpoints(&self) -> &EndpointList {
        &self.endpoints
    }

    /// 自上次调用以来端点列表是否被重排；是则返回需要持久化的新列表
    pub fn take_promotion(&mut self) -> Option<EndpointList> {
        if std::mem::take(&mut self.promoted) {
            Some(self.endpoints.clone())
        } else {
            None
        }
    }

    /// 翻译一批单词
    ///
    /// MODEL / CAPACITY / MODEL_CAPACITY 错误与端点无关，立即返回，不再尝试其他端点。
    /// 端点全部失败时返回 `AllEndpointsFailed`，只有一个端点时也一样。
    pub async fn translate(
        &mut self,
        request: &TranslateRequest,
        session: &mut FailoverSession,
    ) -> Result<BatchResult> {
        let ordered = self.endpoints.ordered();
        let mut failures: Vec<EndpointFailure> = Vec::new();

        for (index, endpoint) in ordered.iter().enumerate() {
            let mut attempt = request.clone();
            let mut json_retried = false;
            let mut rate_limit_retried = false;

            let failure = loop {
                let error = match self.transport.post(endpoint, &attempt).await {
                    Ok(results) => {
                        self.on_success(index, endpoint);
                        return Ok(results);
                    }
                    Err(error) => error,
                };

                let category = error.category();
                warn!(
                    "端点 {}/{} {} 失败 [{}]: {}",
                    index + 1,
                    ordered.len(),
                    endpoint,
                    category,
                    error
                );

                match category {
                    ErrorCategory::Model | ErrorCategory::Capacity | ErrorCategory::ModelCapacity => {
                        return Err(TranslationError::Remote(error));
                    }
                    ErrorCategory::Json if error.status == Some(400) => {
                        session.json_errors += 1;
                        if session.json_errors >= JSON_ERROR_THRESHOLD {
                            return Err(TranslationError::JsonThreshold {
                                count: session.json_errors,
                            });
                        }
                        if !json_retried && attempt.settings.json_format {
                            json_retried = true;
                            attempt.settings.json_format = false;
                            info!("关闭 JSON 模式后重试 {}", endpoint);
                            continue;
                        }
                    }
                    ErrorCategory::RateLimit if error.status == Some(429) => {
                        if session.rate_limit_hits >= RATE_LIMIT_THRESHOLD {
                            session.rate_limit_hits += 1;
                            return Err(TranslationError::RateLimitThreshold {
                                count: session.rate_limit_hits,
                            });
                        }
                        session.rate_limit_hits += 1;
                        if !rate_limit_retried {
                            rate_limit_retried = true;
                            let wait = rate_limit_wait(&error.message);
                            self.rpm.reduce();
                            info!("收到 429，{:?} 后重试 {}", wait, endpoint);
                            sleep(wait).await;
                            continue;
                        }
                    }
                    _ => {}
                }

                break EndpointFailure {
                    endpoint: endpoint.clone(),
                    category,
                    error,
                };
            };
            failures.push(failure);
        }

        Err(TranslationError::AllEndpointsFailed(failures))
    }

    fn on_success(&mut self, index: usize, endpoint: &str) {
        if index == 0 {
            return;
        }
        if !self.auto_switch {
            info!("备用端点 {} 成功（未启用自动切换）", endpoint);
            return;
        }
        if self.endpoints.promote(index) {
            self.promoted = true;
        }
    }
}
