//! 安全防护模块
//!
//! ## 子模块
//!
//! - **rate_limit**: 按 `(resource_key, client_id)` 的滑动窗口限流与封禁
//!
//! ## 速率限制示例
//!
//! ```rust
//! use aasguard::security::{RateLimit, RateLimiter};
//!
//! let limiter = RateLimiter::new();
//! limiter.add_limit("api", RateLimit::for_api()).unwrap();
//!
//! match limiter.check("api", "10.0.0.7") {
//!     Ok(Some(info)) => println!("允许请求，剩余: {}", info.remaining),
//!     Ok(None) => println!("未配置限流"),
//!     Err(e) => println!("请求被限制: {}", e),
//! }
//! ```

pub mod rate_limit;

pub use rate_limit::{
    InMemorySlidingWindowStore, RateLimit, RateLimitInfo, RateLimitStore, RateLimiter,
};
