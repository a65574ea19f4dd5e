//! 受保护 Shell 示例
//!
//! 展示如何用 aasguard 保护一棵 Shell → Submodel → Element 资源树：
//! 配置策略、签发 Session、限流、审计查询以及后台清理。
//!
//! 运行: RUST_LOG=aasguard=debug cargo run --example secure_shell

use std::sync::Arc;

use aasguard::audit::{AuditFilter, InMemoryAuditSink};
use aasguard::clock::system_clock;
use aasguard::{
    AccessRight, AccessScope, DecisionReason, Effect, InMemoryResourceTree, MaintenanceHandle,
    SecureResourceWrapper, SecurityConfig, SecurityContext, SecurityLevel,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

const CONFIG: &str = r#"{
    "session": {"timeout_secs": 900, "sliding_expiration": true, "max_sessions_per_user": 2},
    "rate_limits": {"telemetry": {"max_requests": 5, "window_seconds": 60, "block_seconds": 120}},
    "rate_limit_routes": {"Temperature": "telemetry", "Pressure": "telemetry"},
    "policy": {
        "levels": {"Pump": "LOW", "Setpoints": "HIGH"},
        "grants": [
            {"role": "operator", "resource": "Pump", "right": "READ"},
            {"role": "operator", "resource": "Telemetry", "right": "READ"},
            {"role": "engineer", "resource": "Pump", "right": "WRITE"},
            {"role": "engineer", "resource": "Setpoints", "right": "WRITE"}
        ],
        "inherits": {
            "Temperature": "Telemetry",
            "Pressure": "Telemetry",
            "Speed": "Setpoints"
        }
    },
    "maintenance": {"interval_secs": 60}
}"#;

fn bool_emoji(b: bool) -> &'static str {
    if b { "✅" } else { "❌" }
}

fn build_tree() -> InMemoryResourceTree {
    let tree = InMemoryResourceTree::new();
    let nodes = [
        ("Pump", json!({"model": "P-100"})),
        ("Pump/Telemetry/Temperature", json!(61.4)),
        ("Pump/Telemetry/Pressure", json!(2.7)),
        ("Pump/Setpoints/Speed", json!(1450)),
    ];
    for (path, value) in nodes {
        if let Err(e) = tree.insert_path(path, value) {
            println!("   无法创建节点 {}: {}", path, e);
        }
    }
    tree
}

/// 演示基于配置构建引擎与读写控制
fn demo_read_write(shell: &SecureResourceWrapper<InMemoryResourceTree>) -> aasguard::Result<()> {
    println!("🔐 读写控制演示\n");

    let engine = shell.engine();
    let session = engine.create_session("olga", ["operator"], None)?;
    let operator = SecurityContext::builder("olga")
        .role("operator")
        .claimed_level(SecurityLevel::Medium)
        .session(session.id.clone())
        .build()?;

    let temp = shell.get_element(&operator, "Pump/Telemetry/Temperature", "hmi-1");
    println!("   operator 读取温度: {} {:?}", bool_emoji(temp.is_ok()), temp.ok());

    let write = shell.set_value(&operator, "Pump/Telemetry/Temperature", json!(0), "hmi-1");
    println!("   operator 写入温度: {}", bool_emoji(write.is_ok()));

    let speed = shell.get_element(&operator, "Pump/Setpoints/Speed", "hmi-1");
    println!(
        "   operator 读取转速: {} ({:?})",
        bool_emoji(speed.is_ok()),
        speed.err().and_then(|e| e.denial_reason())
    );

    // engineer 需要 HIGH 级别才能访问 Setpoints
    let engineer = SecurityContext::new("erik", ["engineer"], SecurityLevel::Medium)?;
    let denied = shell.set_value(&engineer, "Pump/Setpoints/Speed", json!(1500), "eng-1");
    println!(
        "   engineer(MEDIUM) 修改转速: {} ({:?})",
        bool_emoji(denied.is_ok()),
        denied.err().and_then(|e| e.denial_reason())
    );

    let engineer = SecurityContext::new("erik", ["engineer"], SecurityLevel::High)?;
    let allowed = shell.set_value(&engineer, "Pump/Setpoints/Speed", json!(1500), "eng-1");
    println!("   engineer(HIGH) 修改转速: {}", bool_emoji(allowed.is_ok()));

    engine.invalidate_session(&session.id)?;
    let revoked = shell.get_element(&operator, "Pump/Telemetry/Pressure", "hmi-1");
    println!(
        "   Session 撤销后读取压力: {} ({:?})",
        bool_emoji(revoked.is_ok()),
        revoked.err().and_then(|e| e.denial_reason())
    );
    println!();
    Ok(())
}

/// 演示限流
fn demo_rate_limit(shell: &SecureResourceWrapper<InMemoryResourceTree>) -> aasguard::Result<()> {
    println!("⏱️  限流演示 (telemetry: 5 次/60 秒)\n");

    let operator = SecurityContext::new("otto", ["operator"], SecurityLevel::Low)?;
    for i in 1..=7 {
        let result = shell.get_element(&operator, "Pump/Telemetry/Pressure", "scada-7");
        let reason = result.as_ref().err().and_then(|e| e.denial_reason());
        println!("   请求 {}: {} {:?}", i, bool_emoji(result.is_ok()), reason);
    }

    let limiter = shell.engine().limiter();
    if let Some(info) = limiter.status("telemetry", "scada-7") {
        println!(
            "   封禁中: {}，剩余封禁: {:?}",
            info.is_blocked, info.block_remaining
        );
    }
    println!(
        "   其他客户端不受影响: {}",
        bool_emoji(
            shell
                .get_element(&operator, "Pump/Telemetry/Pressure", "scada-8")
                .is_ok()
        )
    );
    println!();
    Ok(())
}

/// 演示审计查询
fn demo_audit(sink: &InMemoryAuditSink) {
    println!("📜 审计日志演示\n");

    let stats = sink.stats();
    println!(
        "   共 {} 条记录，允许 {}，拒绝 {}",
        stats.total, stats.allowed, stats.denied
    );
    for (reason, count) in &stats.by_reason {
        println!("      - {}: {}", reason, count);
    }

    let rate_limited = sink.query(&AuditFilter::new().with_reason(DecisionReason::RateLimited));
    println!("   被限流的请求: {}", rate_limited.len());

    let denied_for_erik = sink.query(
        &AuditFilter::new()
            .with_user("erik")
            .with_decision(Effect::Deny),
    );
    for record in denied_for_erik {
        println!(
            "   erik 被拒绝: {} {} ({})",
            record.action, record.resource_id, record.reason
        );
    }
    println!();
}

fn main() -> aasguard::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== aasguard 受保护 Shell 示例 ===\n");

    let config = SecurityConfig::from_json(CONFIG)?;
    let sink = InMemoryAuditSink::new();
    let engine = Arc::new(config.build_engine_with(system_clock(), Arc::new(sink.clone()))?);
    let maintenance: Option<MaintenanceHandle> = config.spawn_maintenance(&engine)?;

    // 运行时补充的授权
    engine.set_role_permissions("engineer", "Telemetry", AccessRight::Read);
    engine.set_role_permissions("engineer", "Speed", AccessRight::Write);

    let shell = SecureResourceWrapper::new(build_tree(), engine.clone())
        .with_scope(AccessScope::FullPath);

    demo_read_write(&shell)?;
    demo_rate_limit(&shell)?;
    demo_audit(&sink);

    // 单用户最多 2 个 Session，最旧的被淘汰
    let registry = engine.sessions();
    println!("🧹 Session 上限演示 (每用户 {} 个)\n", registry.config().max_sessions_per_user);
    for _ in 0..3 {
        engine.create_session("petra", ["operator"], None)?;
    }
    println!("   petra 当前 Session 数: {}", registry.user_sessions("petra")?.len());

    if let Some(handle) = maintenance {
        let report = handle.sweep_now()?;
        println!(
            "   手动清理: 过期 Session {}，空闲限流条目 {}",
            report.sessions_removed, report.rate_entries_removed
        );
        handle.shutdown();
    }
    Ok(())
}
