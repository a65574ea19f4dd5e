//! 集成测试：访问决策引擎
//!
//! 测试 Session、限流、安全级别、角色权限组合后的完整判定流程。

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use aasguard::audit::InMemoryAuditSink;
use aasguard::{
    AccessDecisionEngine, AccessRight, Action, DecisionReason, Effect, Error, ManualClock,
    RateLimit, RateLimitKey, SecurityContext, SecurityLevel, SessionConfig,
};

fn setup() -> (AccessDecisionEngine, InMemoryAuditSink, ManualClock) {
    let clock = ManualClock::default();
    let sink = InMemoryAuditSink::new();
    let engine = AccessDecisionEngine::builder()
        .clock(Arc::new(clock.clone()))
        .audit_sink(Arc::new(sink.clone()))
        .build();
    (engine, sink, clock)
}

fn context(user: &str, role: &str, level: SecurityLevel) -> SecurityContext {
    SecurityContext::new(user, [role], level).unwrap()
}

/// 测试 admin 可写、viewer 因权限不足被拒绝
#[test]
fn test_admin_allowed_viewer_denied() {
    let (engine, _, _) = setup();
    engine.set_role_permissions("admin", "r1", AccessRight::Full);
    engine.set_role_permissions("viewer", "r1", AccessRight::Read);

    let admin = context("alice", "admin", SecurityLevel::Public);
    let decision = engine.authorize(&admin, "r1", Action::Write, "c1");
    assert_eq!(decision.effect(), Effect::Allow);
    assert_eq!(decision.reason(), DecisionReason::Granted);

    let viewer = context("bob", "viewer", SecurityLevel::Public);
    let decision = engine.authorize(&viewer, "r1", Action::Write, "c1");
    assert_eq!(decision.effect(), Effect::Deny);
    assert_eq!(decision.reason(), DecisionReason::InsufficientPermission);
    assert_eq!(decision.reason_code(), "INSUFFICIENT_PERMISSION");

    // viewer 可以读
    assert!(engine.authorize(&viewer, "r1", Action::Read, "c1").is_allowed());
}

/// 测试安全级别不足时即使拥有 FULL 权限也被拒绝
#[test]
fn test_level_overrides_full_right() {
    let (engine, _, _) = setup();
    engine.set_security_policy("vault", SecurityLevel::High);
    engine.set_role_permissions("admin", "vault", AccessRight::Full);

    let medium = context("alice", "admin", SecurityLevel::Medium);
    let decision = engine.authorize(&medium, "vault", Action::Read, "c1");
    assert_eq!(decision.reason(), DecisionReason::InsufficientLevel);

    let err = decision.into_result().unwrap_err();
    assert!(matches!(
        err,
        Error::InsufficientSecurityLevel {
            required: SecurityLevel::High,
            presented: SecurityLevel::Medium
        }
    ));

    let high = context("alice", "admin", SecurityLevel::High);
    assert!(engine.authorize(&high, "vault", Action::Manage, "c1").is_allowed());
}

/// 测试默认值的不对称：未分级资源公开，未授权角色无权限
#[test]
fn test_default_asymmetry() {
    let (engine, _, _) = setup();
    let nobody = context("eve", "ghost", SecurityLevel::Public);

    assert_eq!(engine.policy().get_security_level("anything"), SecurityLevel::Public);
    assert_eq!(engine.policy().get_role_right("ghost", "anything"), AccessRight::None);

    // 级别通过，但权限为 NONE
    let decision = engine.authorize(&nobody, "anything", Action::Read, "c1");
    assert_eq!(decision.reason(), DecisionReason::InsufficientPermission);
}

/// 测试 Session 撤销后决策为 SESSION_INVALID
#[test]
fn test_invalidated_session_denied() {
    let (engine, _, _) = setup();
    engine.set_role_permissions("op", "r", AccessRight::Full);

    let session = engine.create_session("u1", ["op"], None).unwrap();
    let ctx = SecurityContext::builder("u1")
        .role("op")
        .session(session.id.clone())
        .build()
        .unwrap();

    assert!(engine.authorize(&ctx, "r", Action::Read, "c").is_allowed());

    engine.invalidate_session(&session.id).unwrap();
    assert!(engine.get_session(&session.id).is_none());

    let decision = engine.authorize(&ctx, "r", Action::Read, "c");
    assert_eq!(decision.reason(), DecisionReason::SessionInvalid);
    assert!(matches!(decision.into_result(), Err(Error::SessionInvalid)));
}

/// 测试 Session 过期后决策为 SESSION_INVALID
#[test]
fn test_expired_session_denied() {
    let clock = ManualClock::default();
    let engine = AccessDecisionEngine::builder()
        .clock(Arc::new(clock.clone()))
        .session_config(SessionConfig::short_lived())
        .build();
    engine.set_role_permissions("op", "r", AccessRight::Full);

    let session = engine.create_session("u1", ["op"], None).unwrap();
    let ctx = SecurityContext::builder("u1")
        .role("op")
        .session(session.id)
        .build()
        .unwrap();

    clock.advance_secs(299);
    assert!(engine.authorize(&ctx, "r", Action::Read, "c").is_allowed());

    clock.advance_secs(1);
    assert_eq!(
        engine.authorize(&ctx, "r", Action::Read, "c").reason(),
        DecisionReason::SessionInvalid
    );
}

/// 测试冒用他人 Session ID 被拒绝，且不会为原用户续期
#[test]
fn test_foreign_session_id_does_not_extend_owner() {
    let clock = ManualClock::default();
    let engine = AccessDecisionEngine::builder()
        .clock(Arc::new(clock.clone()))
        .session_config(SessionConfig::short_lived().with_sliding_expiration(true))
        .build();
    engine.set_role_permissions("op", "r", AccessRight::Full);

    let session = engine.create_session("alice", ["op"], None).unwrap();
    let intruder = SecurityContext::builder("mallory")
        .role("op")
        .session(session.id.clone())
        .build()
        .unwrap();

    clock.advance_secs(200);
    assert_eq!(
        engine.authorize(&intruder, "r", Action::Read, "c").reason(),
        DecisionReason::SessionInvalid
    );

    clock.advance_secs(100);
    assert!(engine.get_session(&session.id).is_none());
}

/// 测试 Session 校验先于限流，失效 Session 不消耗限流名额
#[test]
fn test_session_checked_before_rate_limit() {
    let (engine, _, _) = setup();
    engine.set_role_permissions("op", "r", AccessRight::Full);
    engine.add_limit("r", RateLimit::new(1, 60, 0).unwrap()).unwrap();

    let stale = SecurityContext::builder("u1")
        .role("op")
        .session("does-not-exist")
        .build()
        .unwrap();
    for _ in 0..5 {
        assert_eq!(
            engine.authorize(&stale, "r", Action::Read, "c").reason(),
            DecisionReason::SessionInvalid
        );
    }

    assert_eq!(engine.limiter().get_remaining_requests("r", "c"), Some(1));
}

/// 测试限流先于策略判断，不泄露策略信息
#[test]
fn test_rate_limit_before_policy() {
    let (engine, _, clock) = setup();
    engine.set_security_policy("secret", SecurityLevel::Critical);
    engine.add_limit("secret", RateLimit::new(2, 60, 120).unwrap()).unwrap();

    let probe = context("mallory", "guest", SecurityLevel::Public);
    for _ in 0..2 {
        assert_eq!(
            engine.authorize(&probe, "secret", Action::Read, "x").reason(),
            DecisionReason::InsufficientLevel
        );
    }

    let decision = engine.authorize(&probe, "secret", Action::Read, "x");
    assert_eq!(decision.reason(), DecisionReason::RateLimited);
    assert_eq!(decision.retry_after(), Some(std::time::Duration::from_secs(120)));

    clock.advance_secs(121);
    assert_eq!(
        engine.authorize(&probe, "secret", Action::Read, "x").reason(),
        DecisionReason::InsufficientLevel
    );
}

/// 测试粗粒度限流 key：多个资源共享同一名额
#[test]
fn test_bucket_rate_limit_key() {
    let clock = ManualClock::default();
    let engine = AccessDecisionEngine::builder()
        .clock(Arc::new(clock.clone()))
        .rate_limit_key(RateLimitKey::Bucket("api".into()))
        .build();
    engine.add_limit("api", RateLimit::new(3, 60, 0).unwrap()).unwrap();
    for r in ["a", "b", "c", "d"] {
        engine.set_role_permissions("op", r, AccessRight::Read);
    }

    let ctx = context("u", "op", SecurityLevel::Public);
    assert!(engine.authorize(&ctx, "a", Action::Read, "c1").is_allowed());
    assert!(engine.authorize(&ctx, "b", Action::Read, "c1").is_allowed());
    assert!(engine.authorize(&ctx, "c", Action::Read, "c1").is_allowed());
    assert_eq!(
        engine.authorize(&ctx, "d", Action::Read, "c1").reason(),
        DecisionReason::RateLimited
    );

    // 显式路由优先于方案
    engine.route_rate_limit("d", "d-only");
    assert_eq!(engine.rate_limit_key_for("d"), "d-only");
    assert!(engine.authorize(&ctx, "d", Action::Read, "c1").is_allowed());
}

/// 测试每次决策恰好产生一条审计记录
#[test]
fn test_every_decision_audited_once() {
    let (engine, sink, _) = setup();
    engine.set_security_policy("lvl", SecurityLevel::High);
    engine.set_role_permissions("op", "ok", AccessRight::Read);
    engine.add_limit("limited", RateLimit::new(1, 60, 60).unwrap()).unwrap();
    engine.set_role_permissions("op", "limited", AccessRight::Read);

    let ctx = context("u", "op", SecurityLevel::Low);
    let bad_session = SecurityContext::builder("u").role("op").session("nope").build().unwrap();

    let calls: Vec<(&SecurityContext, &str, Action)> = vec![
        (&ctx, "ok", Action::Read),
        (&ctx, "ok", Action::Write),
        (&ctx, "lvl", Action::Read),
        (&ctx, "limited", Action::Read),
        (&ctx, "limited", Action::Read),
        (&bad_session, "ok", Action::Read),
    ];

    let mut decisions = Vec::new();
    for (c, resource, action) in &calls {
        decisions.push(engine.authorize(c, resource, *action, "client"));
    }

    let records = sink.records();
    assert_eq!(records.len(), calls.len());
    for ((record, decision), (_, resource, action)) in records.iter().zip(&decisions).zip(&calls) {
        assert_eq!(record.resource_id, *resource);
        assert_eq!(record.action, *action);
        assert_eq!(record.decision, decision.effect());
        assert_eq!(record.reason, decision.reason());
        assert_eq!(record.client_id.as_deref(), Some("client"));
    }

    let reasons: Vec<_> = records.iter().map(|r| r.reason).collect();
    assert_eq!(
        reasons,
        vec![
            DecisionReason::Granted,
            DecisionReason::InsufficientPermission,
            DecisionReason::InsufficientLevel,
            DecisionReason::Granted,
            DecisionReason::RateLimited,
            DecisionReason::SessionInvalid,
        ]
    );
    assert_eq!(engine.auditor().logged(), calls.len() as u64);
}

/// 测试 authorize_or_err 对外折叠为统一消息
#[test]
fn test_uniform_external_error() {
    let (engine, _, _) = setup();
    engine.set_security_policy("r", SecurityLevel::High);

    let ctx = context("u", "op", SecurityLevel::Low);
    let err = engine
        .authorize_or_err(&ctx, "r", Action::Read, "c")
        .unwrap_err();
    assert_eq!(err.denial_reason(), Some(DecisionReason::InsufficientLevel));

    let external = err.into_access_denied();
    assert_eq!(external.to_string(), "access denied");
    assert_eq!(external.denial_reason(), Some(DecisionReason::InsufficientLevel));
}

/// 测试并发决策下限流名额不会被超额放行
#[test]
fn test_concurrent_authorize_respects_limit() {
    let (engine, sink, _) = setup();
    engine.set_role_permissions("op", "hot", AccessRight::Read);
    engine.add_limit("hot", RateLimit::new(10, 60, 300).unwrap()).unwrap();

    let ctx = context("u", "op", SecurityLevel::Public);
    let allowed = AtomicUsize::new(0);

    std::thread::scope(|s| {
        for _ in 0..50 {
            s.spawn(|| {
                if engine.authorize(&ctx, "hot", Action::Read, "same-client").is_allowed() {
                    allowed.fetch_add(1, Ordering::Relaxed);
                }
            });
        }
    });

    assert_eq!(allowed.load(Ordering::Relaxed), 10);
    assert_eq!(sink.len(), 50);
    assert_eq!(sink.stats().denied, 40);
}

/// 测试策略修改与决策并发进行
#[test]
fn test_policy_updates_during_authorize() {
    let (engine, _, _) = setup();
    engine.set_role_permissions("op", "r", AccessRight::Read);

    let ctx = context("u", "op", SecurityLevel::Low);
    std::thread::scope(|s| {
        s.spawn(|| {
            for i in 0..200 {
                let level = if i % 2 == 0 { SecurityLevel::Low } else { SecurityLevel::Public };
                engine.set_security_policy("r", level);
            }
        });
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..200 {
                    // Low 和 Public 都不会让 Low 级别上下文被拒绝
                    assert!(engine.authorize(&ctx, "r", Action::Read, "c").is_allowed());
                }
            });
        }
    });
}

/// 测试多个引擎实例互相独立
#[test]
fn test_engines_are_independent() {
    let (a, _, _) = setup();
    let (b, _, _) = setup();
    a.set_role_permissions("op", "r", AccessRight::Full);

    let ctx = context("u", "op", SecurityLevel::Public);
    assert!(a.authorize(&ctx, "r", Action::Write, "c").is_allowed());
    assert!(b.authorize(&ctx, "r", Action::Write, "c").is_denied());
}
