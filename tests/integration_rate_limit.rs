//! 集成测试：速率限制
//!
//! 测试滑动窗口计数、封禁、按客户端隔离以及并发下的精确计数。

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use aasguard::security::rate_limit::MAX_LIMIT_SECONDS;
use aasguard::{Error, ManualClock, RateLimit, RateLimiter};

fn limiter() -> (RateLimiter, ManualClock) {
    let clock = ManualClock::default();
    (RateLimiter::with_clock(Arc::new(clock.clone())), clock)
}

/// 测试 3 次/60 秒、封禁 300 秒的完整流程
#[test]
fn test_three_per_minute_with_block() {
    let (limiter, clock) = limiter();
    limiter
        .add_limit("login", RateLimit::new(3, 60, 300).unwrap())
        .unwrap();

    for _ in 0..3 {
        limiter.check_rate_limit("login", "10.0.0.1").unwrap();
        clock.advance_secs(10);
    }

    let err = limiter.check_rate_limit("login", "10.0.0.1").unwrap_err();
    match err {
        Error::RateLimitExceeded { retry_after } => {
            assert_eq!(retry_after, Duration::from_secs(300));
        }
        other => panic!("unexpected error: {other}"),
    }

    // 封禁期内，即使窗口已滑过也被拒绝
    clock.advance_secs(200);
    assert!(limiter.check_rate_limit("login", "10.0.0.1").is_err());
    assert_eq!(limiter.get_remaining_requests("login", "10.0.0.1"), Some(0));

    // 封禁结束后从新窗口开始
    clock.advance_secs(101);
    assert_eq!(limiter.get_remaining_requests("login", "10.0.0.1"), Some(3));
    limiter.check_rate_limit("login", "10.0.0.1").unwrap();
    assert_eq!(limiter.get_remaining_requests("login", "10.0.0.1"), Some(2));
}

/// 测试窗口滑动后名额逐个释放
#[test]
fn test_sliding_window_releases_slots() {
    let (limiter, clock) = limiter();
    limiter.add_limit("api", RateLimit::new(2, 60, 0).unwrap()).unwrap();

    limiter.check_rate_limit("api", "c").unwrap();
    clock.advance_secs(30);
    limiter.check_rate_limit("api", "c").unwrap();

    // block_seconds = 0：只拒绝不封禁，重试时间是最旧请求离开窗口的时间
    match limiter.check_rate_limit("api", "c") {
        Err(Error::RateLimitExceeded { retry_after }) => {
            assert_eq!(retry_after, Duration::from_secs(30));
        }
        other => panic!("unexpected: {other:?}"),
    }

    clock.advance_secs(30);
    limiter.check_rate_limit("api", "c").unwrap();
    assert!(limiter.check_rate_limit("api", "c").is_err());
}

/// 测试未注册的 key 不限流
#[test]
fn test_unregistered_key_unlimited() {
    let (limiter, _) = limiter();
    for _ in 0..1000 {
        limiter.check_rate_limit("free", "c").unwrap();
    }
    assert_eq!(limiter.get_remaining_requests("free", "c"), None);
    assert_eq!(limiter.tracked(), 0);
}

/// 测试不同客户端、不同 key 的状态互相独立
#[test]
fn test_isolation_per_pair() {
    let (limiter, _) = limiter();
    limiter.add_limit("api", RateLimit::new(1, 60, 60).unwrap()).unwrap();
    limiter.add_limit("admin", RateLimit::new(1, 60, 60).unwrap()).unwrap();

    limiter.check_rate_limit("api", "a").unwrap();
    assert!(limiter.check_rate_limit("api", "a").is_err());

    limiter.check_rate_limit("api", "b").unwrap();
    limiter.check_rate_limit("admin", "a").unwrap();
    assert_eq!(limiter.tracked(), 3);
}

/// 测试状态查询不消耗名额
#[test]
fn test_status_is_read_only() {
    let (limiter, _) = limiter();
    limiter.add_limit("api", RateLimit::new(5, 60, 0).unwrap()).unwrap();
    limiter.check_rate_limit("api", "c").unwrap();

    for _ in 0..10 {
        let info = limiter.status("api", "c").unwrap();
        assert_eq!(info.remaining, 4);
        assert_eq!(info.limit, 5);
        assert!(!info.is_blocked);
    }
}

/// 测试管理操作：重置、移除策略、空闲清理
#[test]
fn test_admin_operations() {
    let (limiter, clock) = limiter();
    limiter.add_limit("api", RateLimit::new(1, 60, 600).unwrap()).unwrap();

    limiter.check_rate_limit("api", "c").unwrap();
    assert!(limiter.check_rate_limit("api", "c").is_err());

    limiter.reset("api", "c");
    limiter.check_rate_limit("api", "c").unwrap();

    // window + block 之后才算空闲
    limiter.check_rate_limit("api", "d").unwrap();
    clock.advance_secs(659);
    assert_eq!(limiter.sweep_idle(), 0);
    clock.advance_secs(2);
    assert_eq!(limiter.sweep_idle(), 2);

    limiter.check_rate_limit("api", "c").unwrap();
    assert!(limiter.remove_limit("api").is_some());
    assert_eq!(limiter.tracked(), 0);
    assert!(limiter.check_rate_limit("api", "c").is_ok());
}

/// 测试策略校验
#[test]
fn test_invalid_limits_rejected() {
    assert!(RateLimit::new(0, 60, 0).is_err());
    assert!(RateLimit::new(5, 0, 0).is_err());

    let (limiter, _) = limiter();
    let bad = RateLimit {
        max_requests: 0,
        window_seconds: 60,
        block_seconds: 0,
    };
    assert!(limiter.add_limit("api", bad).is_err());
    assert!(limiter.limit("api").is_none());

    let login = RateLimit::for_login();
    assert_eq!(login.max_requests, 5);
    assert_eq!(login.block_seconds, 900);
}

/// 测试超长窗口和封禁时长在注册时被拒绝，上限内的时长不会溢出
#[test]
fn test_huge_durations_fail_at_registration() {
    let (limiter, _) = limiter();
    let huge_window = RateLimit {
        max_requests: 3,
        window_seconds: 10_000_000_000_000,
        block_seconds: 300,
    };
    let huge_block = RateLimit {
        max_requests: 1,
        window_seconds: 60,
        block_seconds: 10_000_000_000_000,
    };
    assert!(matches!(
        limiter.add_limit("api", huge_window),
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        limiter.add_limit("api", huge_block),
        Err(Error::Validation(_))
    ));

    let century = RateLimit::new(1, MAX_LIMIT_SECONDS, MAX_LIMIT_SECONDS).unwrap();
    limiter.add_limit("api", century).unwrap();
    limiter.check_rate_limit("api", "c").unwrap();
    assert!(limiter.check_rate_limit("api", "c").is_err());
    assert_eq!(limiter.sweep_idle(), 0);
}

/// 测试并发请求下恰好放行 min(N, K) 个
#[test]
fn test_concurrent_exactness() {
    for (threads, max) in [(64usize, 10u32), (8, 20)] {
        let (limiter, _) = limiter();
        limiter
            .add_limit("hot", RateLimit::new(max, 60, 300).unwrap())
            .unwrap();

        let admitted = AtomicUsize::new(0);
        let rejected = AtomicUsize::new(0);
        std::thread::scope(|s| {
            for _ in 0..threads {
                s.spawn(|| match limiter.check_rate_limit("hot", "client") {
                    Ok(()) => admitted.fetch_add(1, Ordering::Relaxed),
                    Err(_) => rejected.fetch_add(1, Ordering::Relaxed),
                });
            }
        });

        let expected = threads.min(max as usize);
        assert_eq!(admitted.load(Ordering::Relaxed), expected);
        assert_eq!(rejected.load(Ordering::Relaxed), threads - expected);
    }
}

/// 测试多客户端并发时各自独立计数
#[test]
fn test_concurrent_many_clients() {
    let (limiter, _) = limiter();
    limiter.add_limit("api", RateLimit::new(3, 60, 0).unwrap()).unwrap();

    let admitted = AtomicUsize::new(0);
    std::thread::scope(|s| {
        for client in 0..8 {
            let limiter = &limiter;
            let admitted = &admitted;
            s.spawn(move || {
                let id = format!("client-{client}");
                for _ in 0..10 {
                    if limiter.check_rate_limit("api", &id).is_ok() {
                        admitted.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }
    });

    assert_eq!(admitted.load(Ordering::Relaxed), 8 * 3);
}
