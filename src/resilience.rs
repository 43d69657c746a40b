//! 容错组件
//!
//! 断路器和指数退避计数器。两者都由编排器独占持有，按顺序使用，不需要加锁。

use crate::error::{Result, TranslationError};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// 断路器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// 断路器
///
/// 连续失败达到阈值后打开，打开期间直接拒绝调用；冷却时间过后进入半开状态，
/// 放行下一次调用，成功则关闭。
#[derive(Debug)]
pub struct CircuitBreaker {
    service: String,
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    failure_threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
    pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_millis(30_000);

    pub fn new(service: impl Into<String>) -> Self {
        Self::with_settings(
            service,
            Self::DEFAULT_FAILURE_THRESHOLD,
            Self::DEFAULT_RESET_TIMEOUT,
        )
    }

    pub fn with_settings(
        service: impl Into<String>,
        failure_threshold: u32,
        reset_timeout: Duration,
    ) -> Self {
        Self {
            service: service.into(),
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// 通过断路器执行一次操作
    ///
    /// 断路器打开且冷却未结束时，`operation` 不会被 poll，直接返回 `CircuitOpen`。
    pub async fn execute<T, Fut>(&mut self, operation: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        if self.state == CircuitState::Open {
            let elapsed = self
                .last_failure
                .map(|at| at.elapsed())
                .unwrap_or(self.reset_timeout);
            if elapsed < self.reset_timeout {
                let retry_in = self.reset_timeout - elapsed;
                debug!("断路器 {} 打开中，{:?} 后可重试", self.service, retry_in);
                return Err(TranslationError::CircuitOpen {
                    service: self.service.clone(),
                    retry_in,
                });
            }
            info!("断路器 {} 进入半开状态，尝试恢复", self.service);
            self.state = CircuitState::HalfOpen;
        }

        match operation.await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                self.on_failure();
                Err(e)
            }
        }
    }

    fn on_success(&mut self) {
        if self.state != CircuitState::Closed {
            info!("断路器 {} 已恢复", self.service);
        }
        self.failure_count = 0;
        self.state = CircuitState::Closed;
    }

    fn on_failure(&mut self) {
        self.failure_count += 1;
        self.last_failure = Some(Instant::now());
        if self.failure_count >= self.failure_threshold {
            if self.state != CircuitState::Open {
                warn!(
                    "断路器 {} 在连续 {} 次失败后打开",
                    self.service, self.failure_count
                );
            }
            self.state = CircuitState::Open;
        }
    }
}

/// 有上限的指数退避计数器
///
/// 第 n 次等待 `min(base * 2^n, max)`，超过最大次数后返回错误。
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000), Duration::from_millis(30_000), 5)
    }
}

impl ExponentialBackoff {
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
            attempt: 0,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// 下一次等待的时长
    pub fn next_delay(&self) -> Duration {
        let factor = 2u32.saturating_pow(self.attempt);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// 记录一次退避并返回应等待的时长，不挂起；次数用完时返回错误
    pub fn advance(&mut self) -> Result<Duration> {
        if self.attempt >= self.max_attempts {
            return Err(TranslationError::BackoffExhausted {
                attempts: self.attempt,
            });
        }
        let delay = self.next_delay();
        self.attempt += 1;
        Ok(delay)
    }

    pub async fn wait(&mut self) -> Result<()> {
        let delay = self.advance()?;
        debug!("退避等待 {:?}（第 {} 次）", delay, self.attempt);
        sleep(delay).await;
        Ok(())
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
