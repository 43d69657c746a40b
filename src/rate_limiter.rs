//! 速率限制模块
//!
//! 基于 60 秒滑动窗口的准入控制，以及可在运行中下调的每分钟请求数设置。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

/// 共享的每分钟请求数设置
///
/// 限流器读取它计算上限，故障转移客户端在收到 429 后把它永久下调 20%。
#[derive(Debug, Clone)]
pub struct RpmSetting {
    value: Arc<AtomicU32>,
}

impl RpmSetting {
    pub fn new(requests_per_minute: u32) -> Self {
        Self {
            value: Arc::new(AtomicU32::new(requests_per_minute.max(1))),
        }
    }

    pub fn get(&self) -> u32 {
        self.value.load(Ordering::SeqCst)
    }

    pub fn set(&self, requests_per_minute: u32) {
        self.value.store(requests_per_minute.max(1), Ordering::SeqCst);
    }

    /// 下调 20%（向下取整，至少为 1），返回新值
    pub fn reduce(&self) -> u32 {
        let current = self.get();
        let reduced = ((current as f64) * 0.8).floor().max(1.0) as u32;
        self.set(reduced);
        info!("每分钟请求数从 {} 下调到 {}", current, reduced);
        reduced
    }
}

type MaxRequestsFn = Box<dyn Fn() -> usize + Send + Sync>;

/// 滑动窗口速率限制器
///
/// 记录最近一个窗口内的请求时间戳；已满时等待最旧的时间戳滑出窗口后再重试。
pub struct SlidingWindowRateLimiter {
    window: Duration,
    safety_margin: Duration,
    timestamps: VecDeque<Instant>,
    max_requests: MaxRequestsFn,
}

impl SlidingWindowRateLimiter {
    pub const WINDOW: Duration = Duration::from_millis(60_000);
    pub const SAFETY_MARGIN: Duration = Duration::from_millis(100);

    /// 使用调用方提供的上限函数创建限流器
    pub fn new<F>(max_requests: F) -> Self
    where
        F: Fn() -> usize + Send + Sync + 'static,
    {
        Self {
            window: Self::WINDOW,
            safety_margin: Self::SAFETY_MARGIN,
            timestamps: VecDeque::new(),
            max_requests: Box::new(max_requests),
        }
    }

    /// 上限为 `min(配置的每分钟请求数, 模型上限)`
    pub fn for_model(rpm: RpmSetting, model_cap: u32) -> Self {
        Self::new(move || rpm.get().min(model_cap).max(1) as usize)
    }

    pub fn max_requests(&self) -> usize {
        (self.max_requests)().max(1)
    }

    fn purge(&mut self, now: Instant) {
        while let Some(&oldest) = self.timestamps.front() {
            if now.duration_since(oldest) > self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// 当前窗口内已记录的请求数
    pub fn recorded_in_window(&mut self) -> usize {
        self.purge(Instant::now());
        self.timestamps.len()
    }

    /// 获取一个请求名额，窗口已满时挂起等待
    pub async fn acquire_slot(&mut self) {
        loop {
            let now = Instant::now();
            self.purge(now);

            let max = self.max_requests();
            if self.timestamps.len() < max {
                self.timestamps.push_back(now);
                return;
            }

            let oldest = self.timestamps.front().copied().unwrap_or(now);
            let wait = self
                .window
                .saturating_sub(now.duration_since(oldest))
                + self.safety_margin;
            debug!(
                "速率限制：窗口内已有 {} 个请求（上限 {}），等待 {:?}",
                self.timestamps.len(),
                max,
                wait
            );
            sleep(wait).await;
        }
    }
}

impl std::fmt::Debug for SlidingWindowRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingWindowRateLimiter")
            .field("window", &self.window)
            .field("recorded", &self.timestamps.len())
            .finish()
    }
}
