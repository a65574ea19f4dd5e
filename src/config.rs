//! 安全配置
//!
//! [`SecurityConfig`] 汇总 Session、限流、策略、审计和维护线程的配置，
//! 可从 JSON 反序列化，并据此构建一个完整的 [`AccessDecisionEngine`]。
//!
//! ## 示例
//!
//! ```rust
//! use aasguard::config::SecurityConfig;
//! use aasguard::rbac::{Action, SecurityContext, SecurityLevel};
//!
//! let config = SecurityConfig::from_json(r#"{
//!     "session": {"timeout_secs": 600},
//!     "rate_limits": {"api": {"max_requests": 100, "window_seconds": 60}},
//!     "rate_limit_key": {"scheme": "bucket", "key": "api"},
//!     "policy": {
//!         "levels": {"Shell": "MEDIUM"},
//!         "grants": [{"role": "engineer", "resource": "Shell", "right": "WRITE"}]
//!     }
//! }"#).unwrap();
//!
//! let engine = config.build_engine().unwrap();
//! let ctx = SecurityContext::new("eve", ["engineer"], SecurityLevel::High).unwrap();
//! assert!(engine.authorize(&ctx, "Shell", Action::Write, "10.0.0.9").is_allowed());
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::audit::{AuditSink, BufferedAuditSink, InMemoryAuditSink, NoOpAuditSink, TracingAuditSink};
use crate::clock::{SharedClock, system_clock};
use crate::engine::{AccessDecisionEngine, EngineConfig, RateLimitKey};
use crate::error::{ConfigError, Error, Result};
use crate::maintenance::MaintenanceHandle;
use crate::random::MIN_SESSION_ID_BYTES;
use crate::rbac::{PolicyConfig, PolicyStore};
use crate::security::RateLimit;
use crate::session::SessionConfig;

/// Session 配置段
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// 默认有效期（秒）
    pub timeout_secs: i64,
    /// 滑动过期
    pub sliding_expiration: bool,
    /// 单用户最大 Session 数（0 不限制）
    pub max_sessions_per_user: usize,
    /// Session ID 熵（字节）
    pub id_length: usize,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for SessionSection {
    fn from(config: &SessionConfig) -> Self {
        Self {
            timeout_secs: config.timeout.num_seconds(),
            sliding_expiration: config.sliding_expiration,
            max_sessions_per_user: config.max_sessions_per_user,
            id_length: config.id_length,
        }
    }
}

impl SessionSection {
    /// 转换为 [`SessionConfig`]
    ///
    /// `timeout_secs` 超出可表示范围时返回配置错误。
    pub fn to_session_config(&self) -> Result<SessionConfig> {
        let timeout = chrono::Duration::try_seconds(self.timeout_secs).ok_or_else(|| {
            invalid(
                "session.timeout_secs",
                format!("out of range, got {}", self.timeout_secs),
            )
        })?;
        Ok(SessionConfig::new()
            .with_timeout(timeout)
            .with_sliding_expiration(self.sliding_expiration)
            .with_max_sessions_per_user(self.max_sessions_per_user)
            .with_id_length(self.id_length))
    }
}

/// 审计写入端类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSinkKind {
    /// 输出为 tracing 事件
    #[default]
    Tracing,
    /// 保存在内存中
    Memory,
    /// 丢弃
    None,
}

/// 审计配置段
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSection {
    /// 写入端类型
    pub sink: AuditSinkKind,
    /// 缓冲队列容量（0 表示同步写入）
    pub buffer_capacity: usize,
    /// 内存写入端保留的最大记录数（0 不限制）
    pub retain: usize,
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            sink: AuditSinkKind::default(),
            buffer_capacity: 0,
            retain: 10_000,
        }
    }
}

/// 维护线程配置段
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceSection {
    /// 清理间隔（秒，0 表示不启动）
    pub interval_secs: u64,
}

impl Default for MaintenanceSection {
    fn default() -> Self {
        Self { interval_secs: 300 }
    }
}

/// 完整的安全配置
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Session
    pub session: SessionSection,
    /// 限流策略：resource key → 限制
    pub rate_limits: HashMap<String, RateLimit>,
    /// 限流 key 方案
    pub rate_limit_key: RateLimitKey,
    /// 资源 → 限流 key 的显式路由
    pub rate_limit_routes: HashMap<String, String>,
    /// 访问策略
    pub policy: PolicyConfig,
    /// 审计
    pub audit: AuditSection,
    /// 后台维护
    pub maintenance: MaintenanceSection,
}

fn invalid(key: impl Into<String>, message: impl Into<String>) -> Error {
    Error::Config(ConfigError::InvalidValue {
        key: key.into(),
        message: message.into(),
    })
}

impl SecurityConfig {
    /// 从 JSON 字符串解析并校验
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// 从 JSON 文件加载并校验
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(ConfigError::Parse(format!("{}: {}", path.display(), e)))
        })?;
        Self::from_json(&json)
    }

    /// 序列化为 JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        let session = self.session.to_session_config()?;
        session.validate()?;
        if session.id_length < MIN_SESSION_ID_BYTES {
            return Err(invalid(
                "session.id_length",
                format!("must be at least {} bytes", MIN_SESSION_ID_BYTES),
            ));
        }

        for (key, limit) in &self.rate_limits {
            if key.trim().is_empty() {
                return Err(invalid("rate_limits", "resource key must not be empty"));
            }
            limit.validate()?;
        }

        if let RateLimitKey::Bucket(bucket) = &self.rate_limit_key
            && !self.rate_limits.contains_key(bucket)
        {
            return Err(invalid(
                "rate_limit_key",
                format!("bucket '{}' has no rate limit", bucket),
            ));
        }

        for (resource, key) in &self.rate_limit_routes {
            if resource.trim().is_empty() {
                return Err(invalid("rate_limit_routes", "resource id must not be empty"));
            }
            if !self.rate_limits.contains_key(key) {
                return Err(invalid(
                    "rate_limit_routes",
                    format!("'{}' routes to unknown key '{}'", resource, key),
                ));
            }
        }

        PolicyStore::from_config(&self.policy)?;
        Ok(())
    }

    /// 按配置创建审计写入端（不含缓冲）
    pub fn audit_sink(&self) -> Arc<dyn AuditSink> {
        match self.audit.sink {
            AuditSinkKind::Tracing => Arc::new(TracingAuditSink),
            AuditSinkKind::Memory if self.audit.retain == 0 => Arc::new(InMemoryAuditSink::new()),
            AuditSinkKind::Memory => Arc::new(InMemoryAuditSink::with_retention(self.audit.retain)),
            AuditSinkKind::None => Arc::new(NoOpAuditSink),
        }
    }

    /// 引擎配置
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            rate_limit_key: self.rate_limit_key.clone(),
            rate_limit_routes: self.rate_limit_routes.clone(),
        }
    }

    /// 使用系统时钟和配置的审计写入端构建引擎
    pub fn build_engine(&self) -> Result<AccessDecisionEngine> {
        self.build_engine_with(system_clock(), self.audit_sink())
    }

    /// 使用指定时钟和审计写入端构建引擎
    ///
    /// `audit.buffer_capacity > 0` 时写入端会被包装为 [`BufferedAuditSink`]。
    pub fn build_engine_with(
        &self,
        clock: SharedClock,
        sink: Arc<dyn AuditSink>,
    ) -> Result<AccessDecisionEngine> {
        self.validate()?;

        let sink: Arc<dyn AuditSink> = if self.audit.buffer_capacity > 0 {
            Arc::new(BufferedAuditSink::new(sink, self.audit.buffer_capacity)?)
        } else {
            sink
        };

        let engine = AccessDecisionEngine::builder()
            .clock(clock)
            .session_config(self.session.to_session_config()?)
            .policy(Arc::new(PolicyStore::from_config(&self.policy)?))
            .audit_sink(sink)
            .config(self.engine_config())
            .build();

        for (key, limit) in &self.rate_limits {
            engine.add_limit(key.clone(), *limit)?;
        }
        Ok(engine)
    }

    /// 为引擎启动维护线程（`interval_secs == 0` 时不启动）
    pub fn spawn_maintenance(&self, engine: &AccessDecisionEngine) -> Result<Option<MaintenanceHandle>> {
        if self.maintenance.interval_secs == 0 {
            return Ok(None);
        }
        MaintenanceHandle::spawn(
            engine.sessions().clone(),
            engine.limiter().clone(),
            Duration::from_secs(self.maintenance.interval_secs),
        )
        .map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::SecurityLevel;

    #[test]
    fn test_defaults() {
        let config = SecurityConfig::from_json("{}").unwrap();
        assert_eq!(config.session.timeout_secs, 1800);
        assert_eq!(config.rate_limit_key, RateLimitKey::Resource);
        assert_eq!(config.audit.sink, AuditSinkKind::Tracing);
        assert_eq!(config.maintenance.interval_secs, 300);
        assert_eq!(
            config.session.to_session_config().unwrap(),
            SessionConfig::default()
        );
    }

    #[test]
    fn test_full_document() {
        let json = r#"{
            "session": {"timeout_secs": 1800, "sliding_expiration": true, "max_sessions_per_user": 2, "id_length": 32},
            "rate_limits": {"api": {"max_requests": 100, "window_seconds": 60, "block_seconds": 300}},
            "rate_limit_key": {"scheme": "resource"},
            "rate_limit_routes": {"Sensor1": "api"},
            "policy": {"levels": {"r1": "HIGH"}, "grants": [{"role": "admin", "resource": "r1", "right": "FULL"}], "inherits": {"child": "r1"}},
            "audit": {"sink": "memory", "buffer_capacity": 0, "retain": 50},
            "maintenance": {"interval_secs": 0}
        }"#;
        let config = SecurityConfig::from_json(json).unwrap();
        assert!(config.session.sliding_expiration);
        assert_eq!(config.rate_limits["api"].block_seconds, 300);

        let engine = config.build_engine().unwrap();
        assert_eq!(engine.rate_limit_key_for("Sensor1"), "api");
        assert_eq!(engine.policy().get_security_level("child"), SecurityLevel::High);
        assert!(engine.limiter().limit("api").is_some());
        assert!(config.spawn_maintenance(&engine).unwrap().is_none());
    }

    #[test]
    fn test_rejects_invalid_values() {
        let cases = [
            r#"{"session": {"timeout_secs": 0}}"#,
            r#"{"session": {"timeout_secs": 9223372036854775807}}"#,
            r#"{"session": {"timeout_secs": 1000000000000}}"#,
            r#"{"session": {"id_length": 8}}"#,
            r#"{"rate_limits": {"api": {"max_requests": 0, "window_seconds": 60}}}"#,
            r#"{"rate_limits": {"api": {"max_requests": 5, "window_seconds": 0}}}"#,
            r#"{"rate_limit_key": {"scheme": "bucket", "key": "missing"}}"#,
            r#"{"rate_limit_routes": {"Sensor1": "missing"}}"#,
            r#"{"policy": {"inherits": {"a": "b", "b": "a"}}}"#,
            r#"{"policy": {"levels": {"r": "ULTRA"}}}"#,
            r#"{"audit": {"sink": "syslog"}}"#,
        ];
        for json in cases {
            assert!(SecurityConfig::from_json(json).is_err(), "accepted: {}", json);
        }
    }

    #[test]
    fn test_json_roundtrip_preserves_config() {
        let mut config = SecurityConfig::default();
        config
            .rate_limits
            .insert("login".into(), RateLimit::for_login());
        config.rate_limit_key = RateLimitKey::Bucket("login".into());

        let parsed = SecurityConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }
}
