//! 速率限制模块
//!
//! 按 `(resource_key, client_id)` 维度做滑动窗口限流，超限后进入封禁期。
//!
//! ## 功能特性
//!
//! - **滑动窗口日志**: 保存窗口内每次请求的时间戳，计数精确
//! - **封禁**: 超限后在 `block_seconds` 内无条件拒绝，到期后从新窗口开始
//! - **显式启用**: 未注册限流策略的 key 不做任何限制
//! - **可插拔存储**: 单个 `(key, client)` 条目的检查与记录是原子的
//!
//! ## 示例
//!
//! ```rust
//! use aasguard::security::rate_limit::{RateLimit, RateLimiter};
//!
//! let limiter = RateLimiter::new();
//! limiter.add_limit("api", RateLimit::new(3, 60, 300).unwrap()).unwrap();
//!
//! for _ in 0..3 {
//!     assert!(limiter.check_rate_limit("api", "client-1").is_ok());
//! }
//! assert!(limiter.check_rate_limit("api", "client-1").is_err());
//!
//! // 未注册的 key 不限流
//! assert!(limiter.check_rate_limit("public", "client-1").is_ok());
//! ```

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::clock::{SharedClock, system_clock};
use crate::error::{Error, Result, ValidationError};

fn default_block_seconds() -> u64 {
    300
}

/// 窗口与封禁时长的上限（100 年）
pub const MAX_LIMIT_SECONDS: u64 = 100 * 365 * 24 * 60 * 60;

/// 限流策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    /// 窗口内允许的最大请求数
    pub max_requests: u32,
    /// 窗口长度（秒）
    pub window_seconds: u64,
    /// 超限后的封禁时长（秒），0 表示只拒绝不封禁
    #[serde(default = "default_block_seconds")]
    pub block_seconds: u64,
}

impl RateLimit {
    /// 创建并校验限流策略
    pub fn new(max_requests: u32, window_seconds: u64, block_seconds: u64) -> Result<Self> {
        let limit = Self {
            max_requests,
            window_seconds,
            block_seconds,
        };
        limit.validate()?;
        Ok(limit)
    }

    /// 校验策略
    pub fn validate(&self) -> Result<()> {
        if self.max_requests == 0 {
            return Err(
                ValidationError::InvalidRateLimit("max_requests must be at least 1".into()).into(),
            );
        }
        if self.window_seconds == 0 {
            return Err(
                ValidationError::InvalidRateLimit("window_seconds must be at least 1".into())
                    .into(),
            );
        }
        if self.window_seconds > MAX_LIMIT_SECONDS {
            return Err(ValidationError::InvalidRateLimit(format!(
                "window_seconds must not exceed {}",
                MAX_LIMIT_SECONDS
            ))
            .into());
        }
        if self.block_seconds > MAX_LIMIT_SECONDS {
            return Err(ValidationError::InvalidRateLimit(format!(
                "block_seconds must not exceed {}",
                MAX_LIMIT_SECONDS
            ))
            .into());
        }
        Ok(())
    }

    /// 窗口时长
    pub fn window(&self) -> Duration {
        seconds(self.window_seconds)
    }

    /// 封禁时长
    pub fn block(&self) -> Duration {
        seconds(self.block_seconds)
    }

    /// API 场景：每分钟 100 次，超限封禁 5 分钟
    pub fn for_api() -> Self {
        Self {
            max_requests: 100,
            window_seconds: 60,
            block_seconds: 300,
        }
    }

    /// 管理接口：每分钟 10 次，超限封禁 15 分钟
    pub fn for_admin() -> Self {
        Self {
            max_requests: 10,
            window_seconds: 60,
            block_seconds: 900,
        }
    }

    /// 登录场景：每分钟 5 次，超限封禁 15 分钟
    pub fn for_login() -> Self {
        Self {
            max_requests: 5,
            window_seconds: 60,
            block_seconds: 900,
        }
    }
}

/// 速率限制信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// 剩余请求次数
    pub remaining: u32,
    /// 总限制次数
    pub limit: u32,
    /// 距离窗口释放一个名额的时间
    pub reset_after: std::time::Duration,
    /// 是否处于封禁期
    pub is_blocked: bool,
    /// 封禁剩余时间
    pub block_remaining: Option<std::time::Duration>,
}

impl RateLimitInfo {
    fn allowed(remaining: u32, limit: u32, reset_after: std::time::Duration) -> Self {
        Self {
            remaining,
            limit,
            reset_after,
            is_blocked: false,
            block_remaining: None,
        }
    }

    fn blocked(limit: u32, block_remaining: std::time::Duration) -> Self {
        Self {
            remaining: 0,
            limit,
            reset_after: block_remaining,
            is_blocked: true,
            block_remaining: Some(block_remaining),
        }
    }
}

fn to_std(duration: Duration) -> std::time::Duration {
    duration.to_std().unwrap_or_default()
}

fn seconds(secs: u64) -> Duration {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

fn saturating_add(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    at.checked_add_signed(by).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn saturating_sub(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    at.checked_sub_signed(by).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// 单个 `(key, client)` 的窗口状态
#[derive(Debug, Clone, Default)]
struct RateWindowState {
    /// 窗口内的请求时间戳（按时间递增）
    timestamps: VecDeque<DateTime<Utc>>,
    /// 封禁结束时间
    blocked_until: Option<DateTime<Utc>>,
}

impl RateWindowState {
    /// 移除 `<= now - window` 的时间戳
    fn evict(&mut self, now: DateTime<Utc>, window: Duration) {
        let cutoff = saturating_sub(now, window);
        while let Some(&oldest) = self.timestamps.front() {
            if oldest > cutoff {
                break;
            }
            self.timestamps.pop_front();
        }
    }

    fn active_block(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.blocked_until.filter(|&until| now < until)
    }

    fn reset_after(&self, now: DateTime<Utc>, window: Duration) -> std::time::Duration {
        self.timestamps
            .front()
            .map(|&oldest| to_std(saturating_add(oldest, window) - now))
            .unwrap_or_else(|| to_std(window))
    }

    fn last_activity(&self) -> Option<DateTime<Utc>> {
        match (self.timestamps.back(), self.blocked_until) {
            (Some(&ts), Some(until)) => Some(ts.max(until)),
            (Some(&ts), None) => Some(ts),
            (None, until) => until,
        }
    }
}

/// 速率限制存储 trait
///
/// `check_and_record` 对同一 `(key, client)` 必须是原子的：
/// 并发请求不会同时占用最后一个名额。
pub trait RateLimitStore: Send + Sync {
    /// 检查并记录请求
    ///
    /// 返回 `Ok(RateLimitInfo)` 如果请求被允许，
    /// 返回 [`Error::RateLimitExceeded`] 如果请求被限制
    fn check_and_record(
        &self,
        key: &str,
        client_id: &str,
        limit: &RateLimit,
        now: DateTime<Utc>,
    ) -> Result<RateLimitInfo>;

    /// 获取当前状态（不记录请求）
    fn status(
        &self,
        key: &str,
        client_id: &str,
        limit: &RateLimit,
        now: DateTime<Utc>,
    ) -> RateLimitInfo;

    /// 重置某个 `(key, client)` 的状态
    fn reset(&self, key: &str, client_id: &str);

    /// 删除某个 key 下的所有状态，返回删除数量
    fn remove_key(&self, key: &str) -> usize;

    /// 清理空闲状态
    ///
    /// `idle_after` 返回某个 key 的空闲阈值；返回 `None` 表示该 key 已无策略，
    /// 其状态可以直接删除。
    fn sweep_idle(
        &self,
        now: DateTime<Utc>,
        idle_after: &dyn Fn(&str) -> Option<Duration>,
    ) -> usize;

    /// 当前跟踪的 `(key, client)` 数量
    fn len(&self) -> usize;

    /// 是否为空
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 内存速率限制存储（滑动窗口日志）
///
/// 基于 `DashMap`，每个 `(key, client)` 条目有独立的锁。
#[derive(Debug, Default)]
pub struct InMemorySlidingWindowStore {
    windows: DashMap<(String, String), RateWindowState>,
}

impl InMemorySlidingWindowStore {
    /// 创建新的内存存储
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimitStore for InMemorySlidingWindowStore {
    fn check_and_record(
        &self,
        key: &str,
        client_id: &str,
        limit: &RateLimit,
        now: DateTime<Utc>,
    ) -> Result<RateLimitInfo> {
        let mut state = self
            .windows
            .entry((key.to_string(), client_id.to_string()))
            .or_default();

        // 封禁期内无条件拒绝
        if let Some(until) = state.blocked_until {
            if now < until {
                return Err(Error::rate_limited(to_std(until - now)));
            }
            // 封禁到期，从新窗口开始
            state.blocked_until = None;
            state.timestamps.clear();
        }

        let window = limit.window();
        state.evict(now, window);

        let current = state.timestamps.len() as u32;
        if current >= limit.max_requests {
            if limit.block_seconds == 0 {
                return Err(Error::rate_limited(state.reset_after(now, window)));
            }
            state.blocked_until = Some(saturating_add(now, limit.block()));
            warn!(
                resource_key = %key,
                %client_id,
                block_seconds = limit.block_seconds,
                "rate limit exceeded, client blocked"
            );
            return Err(Error::rate_limited(to_std(limit.block())));
        }

        state.timestamps.push_back(now);
        Ok(RateLimitInfo::allowed(
            limit.max_requests - current - 1,
            limit.max_requests,
            state.reset_after(now, window),
        ))
    }

    fn status(
        &self,
        key: &str,
        client_id: &str,
        limit: &RateLimit,
        now: DateTime<Utc>,
    ) -> RateLimitInfo {
        let window = limit.window();
        let fresh = RateLimitInfo::allowed(limit.max_requests, limit.max_requests, to_std(window));

        let Some(state) = self
            .windows
            .get(&(key.to_string(), client_id.to_string()))
        else {
            return fresh;
        };

        if let Some(until) = state.active_block(now) {
            return RateLimitInfo::blocked(limit.max_requests, to_std(until - now));
        }
        if state.blocked_until.is_some() {
            // 封禁已到期，下一次请求会从新窗口开始
            return fresh;
        }

        let cutoff = saturating_sub(now, window);
        let in_window: Vec<DateTime<Utc>> = state
            .timestamps
            .iter()
            .copied()
            .filter(|&ts| ts > cutoff)
            .collect();
        let reset_after = in_window
            .first()
            .map(|&oldest| to_std(saturating_add(oldest, window) - now))
            .unwrap_or_else(|| to_std(window));

        RateLimitInfo::allowed(
            limit.max_requests.saturating_sub(in_window.len() as u32),
            limit.max_requests,
            reset_after,
        )
    }

    fn reset(&self, key: &str, client_id: &str) {
        self.windows
            .remove(&(key.to_string(), client_id.to_string()));
    }

    fn remove_key(&self, key: &str) -> usize {
        let before = self.windows.len();
        self.windows.retain(|(k, _), _| k != key);
        before.saturating_sub(self.windows.len())
    }

    fn sweep_idle(
        &self,
        now: DateTime<Utc>,
        idle_after: &dyn Fn(&str) -> Option<Duration>,
    ) -> usize {
        let before = self.windows.len();
        self.windows.retain(|(key, _), state| {
            let Some(threshold) = idle_after(key) else {
                return false;
            };
            match state.last_activity() {
                Some(last) => now - last < threshold,
                None => false,
            }
        });
        before.saturating_sub(self.windows.len())
    }

    fn len(&self) -> usize {
        self.windows.len()
    }
}

/// 速率限制器
///
/// 策略按 resource key 注册；运行时状态按 `(resource key, client)` 保存在存储中。
/// 所有时间判断使用注入的时钟。
///
/// ## 示例
///
/// ```rust
/// use aasguard::security::rate_limit::{RateLimit, RateLimiter};
///
/// let limiter = RateLimiter::new();
/// limiter.add_limit("admin_api", RateLimit::for_admin()).unwrap();
///
/// assert_eq!(limiter.get_remaining_requests("admin_api", "c1"), Some(10));
/// limiter.check_rate_limit("admin_api", "c1").unwrap();
/// assert_eq!(limiter.get_remaining_requests("admin_api", "c1"), Some(9));
///
/// assert_eq!(limiter.get_remaining_requests("unlimited", "c1"), None);
/// ```
pub struct RateLimiter {
    limits: RwLock<HashMap<String, RateLimit>>,
    store: Arc<dyn RateLimitStore>,
    clock: SharedClock,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    /// 使用内存存储和系统时钟创建
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    /// 使用内存存储和指定时钟创建
    pub fn with_clock(clock: SharedClock) -> Self {
        Self::with_store(Arc::new(InMemorySlidingWindowStore::new()), clock)
    }

    /// 使用自定义存储创建
    pub fn with_store(store: Arc<dyn RateLimitStore>, clock: SharedClock) -> Self {
        Self {
            limits: RwLock::new(HashMap::new()),
            store,
            clock,
        }
    }

    /// 注册或覆盖某个 key 的限流策略
    pub fn add_limit(&self, resource_key: impl Into<String>, limit: RateLimit) -> Result<()> {
        limit.validate()?;
        let resource_key = resource_key.into();
        debug!(
            %resource_key,
            max_requests = limit.max_requests,
            window_seconds = limit.window_seconds,
            block_seconds = limit.block_seconds,
            "rate limit registered"
        );
        self.limits.write().insert(resource_key, limit);
        Ok(())
    }

    /// 移除某个 key 的策略及其运行时状态
    pub fn remove_limit(&self, resource_key: &str) -> Option<RateLimit> {
        let removed = self.limits.write().remove(resource_key);
        if removed.is_some() {
            self.store.remove_key(resource_key);
        }
        removed
    }

    /// 查询某个 key 的策略
    pub fn limit(&self, resource_key: &str) -> Option<RateLimit> {
        self.limits.read().get(resource_key).copied()
    }

    /// 已注册的 key
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.limits.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// 检查并记录请求，返回限流信息
    ///
    /// key 未注册策略时返回 `Ok(None)`。
    pub fn check(&self, resource_key: &str, client_id: &str) -> Result<Option<RateLimitInfo>> {
        let Some(limit) = self.limit(resource_key) else {
            return Ok(None);
        };
        self.store
            .check_and_record(resource_key, client_id, &limit, self.clock.now())
            .map(Some)
    }

    /// 检查并记录请求
    ///
    /// 被封禁或本次请求会超出窗口上限时返回 [`Error::RateLimitExceeded`]。
    pub fn check_rate_limit(&self, resource_key: &str, client_id: &str) -> Result<()> {
        self.check(resource_key, client_id).map(|_| ())
    }

    /// 剩余请求次数
    ///
    /// 未注册策略时为 `None`，封禁期内为 `Some(0)`。
    pub fn get_remaining_requests(&self, resource_key: &str, client_id: &str) -> Option<u32> {
        self.status(resource_key, client_id).map(|info| info.remaining)
    }

    /// 获取当前状态（不记录请求）
    pub fn status(&self, resource_key: &str, client_id: &str) -> Option<RateLimitInfo> {
        let limit = self.limit(resource_key)?;
        Some(
            self.store
                .status(resource_key, client_id, &limit, self.clock.now()),
        )
    }

    /// 清除某个 `(key, client)` 的窗口与封禁
    pub fn reset(&self, resource_key: &str, client_id: &str) {
        self.store.reset(resource_key, client_id);
    }

    /// 清理空闲超过 `window + block` 的状态
    pub fn sweep_idle(&self) -> usize {
        let limits = self.limits.read().clone();
        let idle_after = |key: &str| {
            limits
                .get(key)
                .map(|l| l.window().checked_add(&l.block()).unwrap_or(Duration::MAX))
        };

        let removed = self.store.sweep_idle(self.clock.now(), &idle_after);
        if removed > 0 {
            debug!(removed, "idle rate limit entries swept");
        }
        removed
    }

    /// 当前跟踪的 `(key, client)` 数量
    pub fn tracked(&self) -> usize {
        self.store.len()
    }
}
