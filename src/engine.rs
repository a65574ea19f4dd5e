//! 访问决策引擎
//!
//! 将 [`PolicyStore`]、[`SessionRegistry`]、[`RateLimiter`] 与 [`Auditor`]
//! 组合为单一入口 [`AccessDecisionEngine::authorize`]。
//!
//! 判定顺序固定，遇到第一个失败即返回：
//!
//! 1. Session 校验（仅当上下文绑定了 Session）→ `SESSION_INVALID`
//! 2. 速率限制 → `RATE_LIMITED`
//! 3. 安全级别 → `INSUFFICIENT_LEVEL`
//! 4. 角色权限 → `INSUFFICIENT_PERMISSION`
//! 5. 允许 → `GRANTED`
//!
//! 每次调用恰好写入一条审计记录。
//!
//! ## 示例
//!
//! ```rust
//! use aasguard::engine::{AccessDecisionEngine, DecisionReason};
//! use aasguard::rbac::{AccessRight, Action, SecurityContext, SecurityLevel};
//!
//! let engine = AccessDecisionEngine::builder().build();
//! engine.set_security_policy("r1", SecurityLevel::Medium);
//! engine.set_role_permissions("admin", "r1", AccessRight::Full);
//! engine.set_role_permissions("viewer", "r1", AccessRight::Read);
//!
//! let admin = SecurityContext::new("alice", ["admin"], SecurityLevel::High).unwrap();
//! assert!(engine.authorize(&admin, "r1", Action::Write, "10.0.0.1").is_allowed());
//!
//! let viewer = SecurityContext::new("bob", ["viewer"], SecurityLevel::High).unwrap();
//! let decision = engine.authorize(&viewer, "r1", Action::Write, "10.0.0.2");
//! assert_eq!(decision.reason(), DecisionReason::InsufficientPermission);
//! ```

use chrono::Duration;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::audit::{AuditSink, Auditor, TracingAuditSink};
use crate::clock::{SharedClock, system_clock};
use crate::error::{Error, Result};
use crate::rbac::{AccessRight, Action, PolicyStore, SecurityContext, SecurityLevel};
use crate::security::rate_limit::{RateLimit, RateLimiter};
use crate::session::{Session, SessionConfig, SessionRegistry, SessionStore};

/// 决策结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Effect {
    /// 允许
    Allow,
    /// 拒绝
    Deny,
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Allow => write!(f, "ALLOW"),
            Effect::Deny => write!(f, "DENY"),
        }
    }
}

/// 决策原因码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionReason {
    /// 所有检查通过
    Granted,
    /// Session 不存在、已过期或不属于该用户
    SessionInvalid,
    /// 被限流或处于封禁期
    RateLimited,
    /// 声明的安全级别低于资源要求
    InsufficientLevel,
    /// 角色权限不足
    InsufficientPermission,
}

impl DecisionReason {
    /// 原因码字符串
    pub fn code(self) -> &'static str {
        match self {
            DecisionReason::Granted => "GRANTED",
            DecisionReason::SessionInvalid => "SESSION_INVALID",
            DecisionReason::RateLimited => "RATE_LIMITED",
            DecisionReason::InsufficientLevel => "INSUFFICIENT_LEVEL",
            DecisionReason::InsufficientPermission => "INSUFFICIENT_PERMISSION",
        }
    }
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Detail {
    None,
    RetryAfter(std::time::Duration),
    Level {
        required: SecurityLevel,
        presented: SecurityLevel,
    },
    Right {
        required: AccessRight,
        granted: AccessRight,
    },
}

/// 单次访问决策
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    effect: Effect,
    reason: DecisionReason,
    detail: Detail,
}

impl Decision {
    fn allow() -> Self {
        Self {
            effect: Effect::Allow,
            reason: DecisionReason::Granted,
            detail: Detail::None,
        }
    }

    fn deny(reason: DecisionReason, detail: Detail) -> Self {
        Self {
            effect: Effect::Deny,
            reason,
            detail,
        }
    }

    /// 决策结果
    pub fn effect(&self) -> Effect {
        self.effect
    }

    /// 原因
    pub fn reason(&self) -> DecisionReason {
        self.reason
    }

    /// 原因码字符串
    pub fn reason_code(&self) -> &'static str {
        self.reason.code()
    }

    /// 是否允许
    pub fn is_allowed(&self) -> bool {
        self.effect == Effect::Allow
    }

    /// 是否拒绝
    pub fn is_denied(&self) -> bool {
        self.effect == Effect::Deny
    }

    /// 限流拒绝时的重试等待时间
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self.detail {
            Detail::RetryAfter(d) => Some(d),
            _ => None,
        }
    }

    /// 转换为带具体原因的错误
    pub fn into_result(self) -> Result<()> {
        match (self.effect, self.detail) {
            (Effect::Allow, _) => Ok(()),
            (Effect::Deny, Detail::RetryAfter(retry_after)) => {
                Err(Error::RateLimitExceeded { retry_after })
            }
            (Effect::Deny, Detail::Level { required, presented }) => {
                Err(Error::InsufficientSecurityLevel {
                    required,
                    presented,
                })
            }
            (Effect::Deny, Detail::Right { required, granted }) => {
                Err(Error::InsufficientPermission { required, granted })
            }
            (Effect::Deny, Detail::None) => match self.reason {
                DecisionReason::SessionInvalid => Err(Error::SessionInvalid),
                reason => Err(Error::AccessDenied(reason)),
            },
        }
    }
}

/// 限流 key 的选取方式
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scheme", content = "key", rename_all = "snake_case")]
pub enum RateLimitKey {
    /// 使用资源标识作为限流 key
    #[default]
    Resource,
    /// 所有资源共享同一个粗粒度 key
    Bucket(String),
}

/// 引擎配置
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineConfig {
    /// 限流 key 方案
    pub rate_limit_key: RateLimitKey,
    /// 显式路由：资源标识 → 限流 key，优先于方案
    pub rate_limit_routes: HashMap<String, String>,
}

impl EngineConfig {
    /// 创建默认配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置限流 key 方案
    pub fn with_rate_limit_key(mut self, key: RateLimitKey) -> Self {
        self.rate_limit_key = key;
        self
    }

    /// 为某个资源指定限流 key
    pub fn with_route(mut self, resource_id: impl Into<String>, key: impl Into<String>) -> Self {
        self.rate_limit_routes.insert(resource_id.into(), key.into());
        self
    }
}

/// 访问决策引擎
///
/// 各组件通过构造函数注入，可同时存在多个相互独立的引擎实例。
pub struct AccessDecisionEngine {
    policy: Arc<PolicyStore>,
    sessions: Arc<SessionRegistry>,
    limiter: Arc<RateLimiter>,
    auditor: Arc<Auditor>,
    rate_limit_key: RateLimitKey,
    routes: RwLock<HashMap<String, String>>,
}

impl AccessDecisionEngine {
    /// 由已有组件创建
    pub fn new(
        policy: Arc<PolicyStore>,
        sessions: Arc<SessionRegistry>,
        limiter: Arc<RateLimiter>,
        auditor: Arc<Auditor>,
        config: EngineConfig,
    ) -> Self {
        Self {
            policy,
            sessions,
            limiter,
            auditor,
            rate_limit_key: config.rate_limit_key,
            routes: RwLock::new(config.rate_limit_routes),
        }
    }

    /// 创建构建器
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    // ========================================================================
    // 决策
    // ========================================================================

    /// 对一次访问请求做出决策
    ///
    /// 拒绝不是错误：所有结果都以 [`Decision`] 返回，并且恰好审计一次。
    pub fn authorize(
        &self,
        context: &SecurityContext,
        resource_id: &str,
        action: Action,
        client_id: &str,
    ) -> Decision {
        let decision = self
            .admit(context, resource_id, client_id)
            .unwrap_or_else(|| self.judge(context, resource_id, action));
        self.record(context, resource_id, action, client_id, decision)
    }

    /// 对资源树中一个节点的访问做出决策
    ///
    /// `ancestors` 为从根到父节点的资源标识，每个都需要 READ，目标节点需要
    /// `action` 对应的权限。Session 和限流只按目标节点检查一次，整个路径
    /// 只写入一条审计记录：拒绝时记录导致拒绝的节点，允许时记录目标节点。
    ///
    /// ## 示例
    ///
    /// ```rust
    /// use aasguard::engine::{AccessDecisionEngine, DecisionReason};
    /// use aasguard::rbac::{AccessRight, Action, SecurityContext, SecurityLevel};
    ///
    /// let engine = AccessDecisionEngine::builder().build();
    /// engine.set_role_permissions("op", "Sensors", AccessRight::Write);
    ///
    /// let ctx = SecurityContext::new("op1", ["op"], SecurityLevel::Low).unwrap();
    /// let decision = engine.authorize_path(&ctx, &["Machine"], "Sensors", Action::Write, "hmi");
    /// assert_eq!(decision.reason(), DecisionReason::InsufficientPermission);
    /// ```
    pub fn authorize_path(
        &self,
        context: &SecurityContext,
        ancestors: &[&str],
        resource_id: &str,
        action: Action,
        client_id: &str,
    ) -> Decision {
        if let Some(denied) = self.admit(context, resource_id, client_id) {
            return self.record(context, resource_id, action, client_id, denied);
        }

        for &ancestor in ancestors {
            let decision = self.judge(context, ancestor, Action::Read);
            if decision.is_denied() {
                return self.record(context, ancestor, Action::Read, client_id, decision);
            }
        }

        let decision = self.judge(context, resource_id, action);
        self.record(context, resource_id, action, client_id, decision)
    }

    /// 同 [`authorize`](Self::authorize)，拒绝时返回带具体原因的错误
    pub fn authorize_or_err(
        &self,
        context: &SecurityContext,
        resource_id: &str,
        action: Action,
        client_id: &str,
    ) -> Result<()> {
        self.authorize(context, resource_id, action, client_id)
            .into_result()
    }

    fn record(
        &self,
        context: &SecurityContext,
        resource_id: &str,
        action: Action,
        client_id: &str,
        decision: Decision,
    ) -> Decision {
        self.auditor.log_access_attempt(
            context,
            resource_id,
            action,
            decision.effect(),
            decision.reason(),
            Some(client_id),
        );

        if decision.is_denied() {
            debug!(
                user_id = %context.user_id(),
                resource = %resource_id,
                %action,
                reason = decision.reason_code(),
                "access denied"
            );
        }
        decision
    }

    /// Session 与限流；通过时返回 `None`
    fn admit(
        &self,
        context: &SecurityContext,
        resource_id: &str,
        client_id: &str,
    ) -> Option<Decision> {
        // 1. Session
        if let Some(session_id) = context.session_id() {
            if self
                .sessions
                .get_session_for(session_id, context.user_id())
                .is_none()
            {
                return Some(Decision::deny(DecisionReason::SessionInvalid, Detail::None));
            }
        }

        // 2. 限流
        let key = self.rate_limit_key_for(resource_id);
        match self.limiter.check_rate_limit(&key, client_id) {
            Ok(()) => None,
            Err(Error::RateLimitExceeded { retry_after }) => Some(Decision::deny(
                DecisionReason::RateLimited,
                Detail::RetryAfter(retry_after),
            )),
            Err(e) => {
                warn!(error = %e, rate_limit_key = %key, "rate limiter failed, denying");
                Some(Decision::deny(DecisionReason::RateLimited, Detail::None))
            }
        }
    }

    /// 安全级别与角色权限
    fn judge(&self, context: &SecurityContext, resource_id: &str, action: Action) -> Decision {
        // 3 & 4. 在同一份策略快照上判断级别和权限
        let policy = self.policy.resolve(context.roles(), resource_id);

        if !context.claimed_level().meets(policy.required_level) {
            return Decision::deny(
                DecisionReason::InsufficientLevel,
                Detail::Level {
                    required: policy.required_level,
                    presented: context.claimed_level(),
                },
            );
        }

        let required_right = action.required_right();
        if !policy.effective_right.satisfies(required_right) {
            return Decision::deny(
                DecisionReason::InsufficientPermission,
                Detail::Right {
                    required: required_right,
                    granted: policy.effective_right,
                },
            );
        }

        Decision::allow()
    }

    // ========================================================================
    // 限流 key
    // ========================================================================

    /// 资源对应的限流 key
    pub fn rate_limit_key_for(&self, resource_id: &str) -> String {
        if let Some(key) = self.routes.read().get(resource_id) {
            return key.clone();
        }
        match &self.rate_limit_key {
            RateLimitKey::Resource => resource_id.to_string(),
            RateLimitKey::Bucket(key) => key.clone(),
        }
    }

    /// 为某个资源指定限流 key
    pub fn route_rate_limit(&self, resource_id: impl Into<String>, key: impl Into<String>) {
        self.routes.write().insert(resource_id.into(), key.into());
    }

    /// 取消资源的限流路由
    pub fn unroute_rate_limit(&self, resource_id: &str) -> Option<String> {
        self.routes.write().remove(resource_id)
    }

    // ========================================================================
    // 配置与 Session API
    // ========================================================================

    /// 设置资源安全级别
    pub fn set_security_policy(&self, resource_id: impl Into<String>, level: SecurityLevel) {
        self.policy.set_security_policy(resource_id, level);
    }

    /// 设置角色权限
    pub fn set_role_permissions(
        &self,
        role: impl Into<String>,
        resource_id: impl Into<String>,
        right: AccessRight,
    ) {
        self.policy.set_role_permissions(role, resource_id, right);
    }

    /// 注册限流策略
    pub fn add_limit(&self, resource_key: impl Into<String>, limit: RateLimit) -> Result<()> {
        self.limiter.add_limit(resource_key, limit)
    }

    /// 创建 Session
    pub fn create_session<I, S>(
        &self,
        user_id: impl Into<String>,
        roles: I,
        duration: Option<Duration>,
    ) -> Result<Session>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sessions.create_session(user_id, roles, duration)
    }

    /// 获取有效 Session
    pub fn get_session(&self, session_id: &str) -> Option<Session> {
        self.sessions.get_session(session_id)
    }

    /// 撤销 Session
    pub fn invalidate_session(&self, session_id: &str) -> Result<bool> {
        self.sessions.invalidate_session(session_id)
    }

    /// 策略存储
    pub fn policy(&self) -> &Arc<PolicyStore> {
        &self.policy
    }

    /// Session 注册表
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// 速率限制器
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// 审计器
    pub fn auditor(&self) -> &Arc<Auditor> {
        &self.auditor
    }
}

/// 引擎构建器
///
/// 所有组件共享同一个时钟。
pub struct EngineBuilder {
    clock: SharedClock,
    session_config: SessionConfig,
    session_store: Option<Arc<dyn SessionStore>>,
    audit_sink: Option<Arc<dyn AuditSink>>,
    policy: Option<Arc<PolicyStore>>,
    config: EngineConfig,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    /// 创建构建器（系统时钟、默认 Session 配置、tracing 审计）
    pub fn new() -> Self {
        Self {
            clock: system_clock(),
            session_config: SessionConfig::default(),
            session_store: None,
            audit_sink: None,
            policy: None,
            config: EngineConfig::default(),
        }
    }

    /// 设置时钟
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// 设置 Session 配置
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// 设置 Session 存储
    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = Some(store);
        self
    }

    /// 设置审计写入端
    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    /// 使用已有的策略存储
    pub fn policy(mut self, policy: Arc<PolicyStore>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// 设置引擎配置
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// 设置限流 key 方案
    pub fn rate_limit_key(mut self, key: RateLimitKey) -> Self {
        self.config.rate_limit_key = key;
        self
    }

    /// 构建引擎
    pub fn build(self) -> AccessDecisionEngine {
        let sessions = match self.session_store {
            Some(store) => SessionRegistry::with_store(self.session_config, store, self.clock.clone()),
            None => SessionRegistry::with_clock(self.session_config, self.clock.clone()),
        };
        let sink = self
            .audit_sink
            .unwrap_or_else(|| Arc::new(TracingAuditSink));

        AccessDecisionEngine::new(
            self.policy.unwrap_or_default(),
            Arc::new(sessions),
            Arc::new(RateLimiter::with_clock(self.clock.clone())),
            Arc::new(Auditor::with_clock(sink, self.clock)),
            self.config,
        )
    }
}
