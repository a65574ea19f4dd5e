//! 集成测试：JSON 配置
//!
//! 测试从配置文档构建引擎、维护线程，以及错误配置的拒绝。

use std::sync::Arc;

use aasguard::audit::InMemoryAuditSink;
use aasguard::config::{AuditSinkKind, SecurityConfig};
use aasguard::{
    Action, DecisionReason, Error, ManualClock, RateLimitKey, SecurityContext, SecurityLevel,
};

const DOCUMENT: &str = r#"{
    "session": {"timeout_secs": 120, "sliding_expiration": false, "max_sessions_per_user": 1, "id_length": 24},
    "rate_limits": {
        "api": {"max_requests": 3, "window_seconds": 60, "block_seconds": 300},
        "admin_api": {"max_requests": 1, "window_seconds": 60}
    },
    "rate_limit_key": {"scheme": "bucket", "key": "api"},
    "rate_limit_routes": {"Config": "admin_api"},
    "policy": {
        "levels": {"Shell": "LOW", "Config": "HIGH"},
        "grants": [
            {"role": "viewer", "resource": "Shell", "right": "READ"},
            {"role": "admin", "resource": "Shell", "right": "FULL"},
            {"role": "admin", "resource": "Config", "right": "FULL"}
        ],
        "inherits": {"Status": "Shell"}
    },
    "audit": {"sink": "memory", "buffer_capacity": 0, "retain": 100},
    "maintenance": {"interval_secs": 30}
}"#;

/// 测试配置文档驱动的完整决策流程
#[test]
fn test_engine_from_document() {
    let config = SecurityConfig::from_json(DOCUMENT).unwrap();
    assert_eq!(config.rate_limit_key, RateLimitKey::Bucket("api".into()));
    assert_eq!(config.audit.sink, AuditSinkKind::Memory);

    let clock = ManualClock::default();
    let sink = InMemoryAuditSink::new();
    let engine = config
        .build_engine_with(Arc::new(clock.clone()), Arc::new(sink.clone()))
        .unwrap();

    let viewer = SecurityContext::new("v", ["viewer"], SecurityLevel::Low).unwrap();
    let admin = SecurityContext::new("a", ["admin"], SecurityLevel::High).unwrap();

    // 继承的策略
    assert!(engine.authorize(&viewer, "Status", Action::Read, "c1").is_allowed());
    assert_eq!(
        engine.authorize(&viewer, "Status", Action::Write, "c1").reason(),
        DecisionReason::InsufficientPermission
    );

    // 显式路由到 admin_api：每分钟一次
    assert!(engine.authorize(&admin, "Config", Action::Manage, "c2").is_allowed());
    assert_eq!(
        engine.authorize(&admin, "Config", Action::Manage, "c2").reason(),
        DecisionReason::RateLimited
    );

    // 其余资源共享 api 桶（c1 已用掉 2 次）
    assert!(engine.authorize(&admin, "Shell", Action::Read, "c1").is_allowed());
    assert_eq!(
        engine.authorize(&admin, "Shell", Action::Read, "c1").reason(),
        DecisionReason::RateLimited
    );

    assert_eq!(sink.len(), 6);
}

/// 测试 Session 配置生效
#[test]
fn test_session_section_applied() {
    let config = SecurityConfig::from_json(DOCUMENT).unwrap();
    let clock = ManualClock::default();
    let engine = config
        .build_engine_with(Arc::new(clock.clone()), Arc::new(InMemoryAuditSink::new()))
        .unwrap();

    let first = engine.create_session("u", ["viewer"], None).unwrap();
    let second = engine.create_session("u", ["viewer"], None).unwrap();
    assert!(engine.get_session(&first.id).is_none());
    assert!(engine.get_session(&second.id).is_some());

    clock.advance_secs(120);
    assert!(engine.get_session(&second.id).is_none());
}

/// 测试从文件加载
#[test]
fn test_from_file() {
    let path = std::env::temp_dir().join(format!("aasguard-config-{}.json", std::process::id()));
    std::fs::write(&path, DOCUMENT).unwrap();

    let config = SecurityConfig::from_file(&path).unwrap();
    assert_eq!(config.session.timeout_secs, 120);
    std::fs::remove_file(&path).unwrap();

    let missing = SecurityConfig::from_file(path.with_extension("missing"));
    assert!(matches!(missing, Err(Error::Config(_))));
}

/// 测试按配置启动维护线程
#[test]
fn test_spawn_maintenance() {
    let config = SecurityConfig::from_json(DOCUMENT).unwrap();
    let clock = ManualClock::default();
    let engine = config
        .build_engine_with(Arc::new(clock.clone()), Arc::new(InMemoryAuditSink::new()))
        .unwrap();

    engine.create_session("u", ["viewer"], None).unwrap();
    clock.advance_secs(121);

    let handle = config.spawn_maintenance(&engine).unwrap().unwrap();
    assert_eq!(handle.interval().as_secs(), 30);
    let report = handle.sweep_now().unwrap();
    assert_eq!(report.sessions_removed, 1);
    handle.shutdown();
}

/// 测试缓冲审计配置
#[test]
fn test_buffered_audit_section() {
    let mut config = SecurityConfig::from_json(DOCUMENT).unwrap();
    config.audit.buffer_capacity = 16;

    let sink = InMemoryAuditSink::new();
    let engine = config
        .build_engine_with(Arc::new(ManualClock::default()), Arc::new(sink.clone()))
        .unwrap();

    let viewer = SecurityContext::new("v", ["viewer"], SecurityLevel::Low).unwrap();
    engine.authorize(&viewer, "Shell", Action::Read, "c");
    engine.auditor().flush().unwrap();
    assert_eq!(sink.len(), 1);
}

/// 测试错误配置被拒绝
#[test]
fn test_invalid_documents() {
    let unknown_level = DOCUMENT.replace(r#""Config": "HIGH""#, r#""Config": "TOP_SECRET""#);
    assert!(SecurityConfig::from_json(&unknown_level).is_err());

    let unknown_right = DOCUMENT.replace(r#""right": "READ""#, r#""right": "VIEW""#);
    assert!(SecurityConfig::from_json(&unknown_right).is_err());

    let negative = DOCUMENT.replace(r#""timeout_secs": 120"#, r#""timeout_secs": -5"#);
    assert!(SecurityConfig::from_json(&negative).is_err());

    let huge_timeout = DOCUMENT.replace(
        r#""timeout_secs": 120"#,
        r#""timeout_secs": 9223372036854775807"#,
    );
    assert!(matches!(
        SecurityConfig::from_json(&huge_timeout),
        Err(Error::Config(_))
    ));

    let huge_window = DOCUMENT.replace(
        r#""window_seconds": 60, "block_seconds": 300"#,
        r#""window_seconds": 10000000000000, "block_seconds": 300"#,
    );
    assert!(SecurityConfig::from_json(&huge_window).is_err());

    let zero_window = DOCUMENT.replace(
        r#""window_seconds": 60, "block_seconds": 300"#,
        r#""window_seconds": 0, "block_seconds": 300"#,
    );
    assert!(SecurityConfig::from_json(&zero_window).is_err());

    assert!(matches!(
        SecurityConfig::from_json("{not json"),
        Err(Error::Config(_))
    ));
}
