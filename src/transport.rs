//! HTTP 传输层
//!
//! 只负责把请求发到某个端点并把响应变成结果或结构化的 `RemoteError`，
//! 不包含任何重试或故障转移逻辑。

use crate::error::RemoteError;
use crate::types::{BatchResult, FailureEnvelope, SuccessEnvelope, TranslateRequest};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// 远程翻译调用
#[async_trait]
pub trait Transport: Send + Sync {
    /// 向 `endpoint` 发送一批单词，返回每个单词的翻译结果
    async fn post(
        &self,
        endpoint: &str,
        request: &TranslateRequest,
    ) -> Result<BatchResult, RemoteError>;
}

/// 基于 reqwest 的传输实现
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(5)
            .tcp_keepalive(Duration::from_secs(60))
            .user_agent(concat!("vocab-translator/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("创建 HTTP 客户端失败: {}，使用默认客户端", e);
                Client::new()
            });
        Self { client }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

fn send_error(error: reqwest::Error) -> RemoteError {
    if error.is_timeout() {
        RemoteError::timeout(format!("request timed out: {}", error))
    } else {
        RemoteError::network(format!("network request failed: {}", error))
    }
}

/// 解析非 2xx 响应体，尽量取出结构化的错误信息
pub(crate) fn failure_from_body(status: u16, body: &str) -> RemoteError {
    match serde_json::from_str::<FailureEnvelope>(body) {
        Ok(envelope) => {
            let error = RemoteError::http(status, envelope.error);
            match envelope.error_category {
                Some(hint) => error.with_hint(hint),
                None => error,
            }
        }
        Err(_) if body.trim().is_empty() => RemoteError::http(status, format!("HTTP {}", status)),
        Err(_) => RemoteError::http(status, body.trim().to_string()),
    }
}

/// 解析 2xx 响应体
pub(crate) fn success_from_body(body: &str) -> Result<BatchResult, RemoteError> {
    let envelope: SuccessEnvelope = serde_json::from_str(body).map_err(|e| {
        RemoteError::invalid_response(format!("invalid response body: {}", e))
    })?;
    if !envelope.success {
        let message = envelope
            .error
            .unwrap_or_else(|| "invalid response: success flag not set".to_string());
        return Err(RemoteError::invalid_response(message));
    }
    Ok(envelope.translations)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(
        &self,
        endpoint: &str,
        request: &TranslateRequest,
    ) -> Result<BatchResult, RemoteError> {
        debug!("发送 {} 个单词到 {}", request.words.len(), endpoint);

        let response = self
            .client
            .post(endpoint)
            .header("Accept", "application/json")
            .json(request)
            .send()
            .await
            .map_err(send_error)?;

        let status = response.status();
        let body = response.text().await.map_err(send_error)?;
        debug!("{} 响应状态: {}", endpoint, status);

        if status.is_success() {
            success_from_body(&body)
        } else {
            Err(failure_from_body(status.as_u16(), &body))
        }
    }
}
