//! 时间源模块
//!
//! 所有过期与窗口计算都通过 [`Clock`] 获取当前时间，便于在测试中注入可控时钟。
//!
//! ## 示例
//!
//! ```rust
//! use aasguard::clock::{Clock, ManualClock};
//! use chrono::Duration;
//!
//! let clock = ManualClock::default();
//! let start = clock.now();
//! clock.advance(Duration::seconds(30));
//! assert_eq!(clock.now() - start, Duration::seconds(30));
//! ```

use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::RwLock;
use std::sync::Arc;

/// 时间源 trait
pub trait Clock: Send + Sync {
    /// 当前时间
    fn now(&self) -> DateTime<Utc>;
}

/// 系统时钟
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 手动推进的时钟
///
/// 克隆后共享同一时间状态。
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<RwLock<DateTime<Utc>>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        // 固定起点，保证测试输出稳定
        let epoch = Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Self::new(epoch)
    }
}

impl ManualClock {
    /// 以指定时间创建
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(RwLock::new(start)),
        }
    }

    /// 向前推进
    pub fn advance(&self, by: Duration) {
        let mut current = self.current.write();
        *current += by;
    }

    /// 以秒为单位推进
    pub fn advance_secs(&self, secs: i64) {
        self.advance(Duration::seconds(secs));
    }

    /// 直接设置当前时间
    pub fn set(&self, at: DateTime<Utc>) {
        *self.current.write() = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.read()
    }
}

/// 共享时钟句柄
pub type SharedClock = Arc<dyn Clock>;

/// 默认的系统时钟句柄
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::default();
        let start = clock.now();

        clock.advance_secs(61);
        assert_eq!(clock.now() - start, Duration::seconds(61));
    }

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let clock = ManualClock::default();
        let other = clock.clone();

        clock.advance(Duration::minutes(5));
        assert_eq!(clock.now(), other.now());
    }

    #[test]
    fn test_system_clock_moves_forward() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
