//! # aasguard
//!
//! 面向 Asset Administration Shell 资源树的授权与 Session 策略引擎。
//!
//! ## 功能特性
//!
//! - **安全级别与角色权限**: 资源敏感度分级 + 基于角色的访问控制
//! - **Session 管理**: 创建、校验、过期、撤销，支持滑动过期和并发上限
//! - **速率限制**: 按 `(resource, client)` 的滑动窗口计数与封禁
//! - **审计日志**: 每次访问决策恰好记录一次，支持查询、统计和异步缓冲
//! - **受保护资源树**: 所有读写都经过决策引擎，不存在绕过路径
//! - **JSON 配置**: 从单个配置文档构建完整引擎
//!
//! ## 决策示例
//!
//! ```rust
//! use aasguard::{AccessDecisionEngine, AccessRight, Action, DecisionReason, RateLimit};
//! use aasguard::{SecurityContext, SecurityLevel};
//!
//! let engine = AccessDecisionEngine::builder().build();
//! engine.set_security_policy("Shell", SecurityLevel::Medium);
//! engine.set_role_permissions("operator", "Shell", AccessRight::Read);
//! engine.add_limit("Shell", RateLimit::new(2, 60, 300).unwrap()).unwrap();
//!
//! // 绑定 Session 的上下文
//! let session = engine.create_session("op1", ["operator"], None).unwrap();
//! let ctx = SecurityContext::builder("op1")
//!     .role("operator")
//!     .claimed_level(SecurityLevel::High)
//!     .session(session.id.clone())
//!     .build()
//!     .unwrap();
//!
//! assert!(engine.authorize(&ctx, "Shell", Action::Read, "hmi-1").is_allowed());
//! assert_eq!(
//!     engine.authorize(&ctx, "Shell", Action::Write, "hmi-1").reason(),
//!     DecisionReason::InsufficientPermission
//! );
//! assert_eq!(
//!     engine.authorize(&ctx, "Shell", Action::Read, "hmi-1").reason(),
//!     DecisionReason::RateLimited
//! );
//!
//! // 撤销后立即失效
//! engine.invalidate_session(&session.id).unwrap();
//! assert_eq!(
//!     engine.authorize(&ctx, "Shell", Action::Read, "hmi-2").reason(),
//!     DecisionReason::SessionInvalid
//! );
//! ```
//!
//! ## 受保护资源树
//!
//! ```rust
//! use aasguard::{AccessDecisionEngine, AccessRight, InMemoryResourceTree};
//! use aasguard::{SecureResourceWrapper, SecurityContext, SecurityLevel};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let tree = InMemoryResourceTree::new();
//! tree.insert_path("Pump/Status/Running", json!(true)).unwrap();
//!
//! let engine = Arc::new(AccessDecisionEngine::builder().build());
//! for id in ["Pump", "Status", "Running"] {
//!     engine.set_role_permissions("viewer", id, AccessRight::Read);
//! }
//!
//! let pump = SecureResourceWrapper::new(tree, engine);
//! let viewer = SecurityContext::new("v1", ["viewer"], SecurityLevel::Low).unwrap();
//! assert_eq!(pump.get_element(&viewer, "Pump/Status/Running", "c1").unwrap(), json!(true));
//!
//! let err = pump.set_value(&viewer, "Pump/Status/Running", json!(false), "c1").unwrap_err();
//! assert_eq!(err.to_string(), "access denied");
//! ```

pub mod audit;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod maintenance;
pub mod random;
pub mod rbac;
pub mod resource;
pub mod security;
pub mod session;

pub use error::{Error, Result};

// ============================================================================
// 决策引擎导出
// ============================================================================

pub use engine::{
    AccessDecisionEngine, Decision, DecisionReason, Effect, EngineBuilder, EngineConfig,
    RateLimitKey,
};

// ============================================================================
// RBAC 相关导出
// ============================================================================

pub use rbac::{
    AccessRight, Action, PolicyConfig, PolicyStore, ResourcePolicy, RoleGrant, SecurityContext,
    SecurityContextBuilder, SecurityLevel,
};

// ============================================================================
// Session 相关导出
// ============================================================================

pub use session::{InMemorySessionStore, Session, SessionConfig, SessionRegistry, SessionStore};

// ============================================================================
// 速率限制相关导出
// ============================================================================

pub use security::rate_limit::{
    InMemorySlidingWindowStore, RateLimit, RateLimitInfo, RateLimitStore, RateLimiter,
};

// ============================================================================
// 审计相关导出
// ============================================================================

pub use audit::{
    AuditFilter, AuditRecord, AuditSink, AuditStats, Auditor, BufferedAuditSink,
    InMemoryAuditSink, NoOpAuditSink, TracingAuditSink,
};

// ============================================================================
// 资源树、配置与维护导出
// ============================================================================

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::SecurityConfig;
pub use maintenance::{MaintenanceHandle, SweepReport};
pub use resource::{
    AccessScope, InMemoryResourceTree, ResourcePath, ResourceTree, SecureResourceWrapper,
};

// ============================================================================
// 随机数生成函数导出
// ============================================================================

pub use random::{
    generate_random_base64_url, generate_random_bytes, generate_random_hex, generate_session_id,
};
