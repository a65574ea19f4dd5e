//! 统一错误类型模块
//!
//! 提供 aasguard 库中所有操作的错误类型定义。
//!
//! 拒绝类错误保持可区分（会话失效、限流、安全级别不足、权限不足），
//! 面向最终用户的 [`Error::AccessDenied`] 只输出统一的消息，具体原因通过
//! [`Error::denial_reason`] 供内部使用。

use std::time::Duration;

use thiserror::Error;

use crate::engine::DecisionReason;
use crate::rbac::{AccessRight, SecurityLevel};

/// aasguard 库的统一结果类型
pub type Result<T> = std::result::Result<T, Error>;

/// aasguard 库的错误类型
#[derive(Debug, Error)]
pub enum Error {
    /// Session 不存在或已过期
    #[error("session is invalid or has expired")]
    SessionInvalid,

    /// 速率限制超出
    #[error("rate limit exceeded, retry after {retry_after:?}")]
    RateLimitExceeded {
        /// 重试等待时间
        retry_after: Duration,
    },

    /// 安全级别不足
    #[error("insufficient security level: required {required}, presented {presented}")]
    InsufficientSecurityLevel {
        /// 资源要求的最低级别
        required: SecurityLevel,
        /// 调用方声明的级别
        presented: SecurityLevel,
    },

    /// 访问权限不足
    #[error("insufficient permission: required {required}, granted {granted}")]
    InsufficientPermission {
        /// 操作所需权限
        required: AccessRight,
        /// 角色授予的最高权限
        granted: AccessRight,
    },

    /// 对外统一的拒绝错误，内部保留具体原因
    #[error("access denied")]
    AccessDenied(DecisionReason),

    /// 资源不存在
    #[error("not found: {0}")]
    NotFound(String),

    /// 验证错误
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// 配置错误
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// 加密错误
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// 审计错误
    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),

    /// 内部错误
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// 创建一个内部错误
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// 创建一个验证错误
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(ValidationError::Custom(msg.into()))
    }

    /// 创建一个速率限制错误
    pub fn rate_limited(retry_after: Duration) -> Self {
        Error::RateLimitExceeded { retry_after }
    }

    /// 如果是访问拒绝类错误，返回对应的决策原因
    pub fn denial_reason(&self) -> Option<DecisionReason> {
        match self {
            Error::SessionInvalid => Some(DecisionReason::SessionInvalid),
            Error::RateLimitExceeded { .. } => Some(DecisionReason::RateLimited),
            Error::InsufficientSecurityLevel { .. } => Some(DecisionReason::InsufficientLevel),
            Error::InsufficientPermission { .. } => Some(DecisionReason::InsufficientPermission),
            Error::AccessDenied(reason) => Some(*reason),
            _ => None,
        }
    }

    /// 是否为访问拒绝
    pub fn is_denied(&self) -> bool {
        self.denial_reason().is_some()
    }

    /// 折叠为对外统一的 [`Error::AccessDenied`]
    ///
    /// 非拒绝类错误原样返回。
    pub fn into_access_denied(self) -> Self {
        match self.denial_reason() {
            Some(reason) => Error::AccessDenied(reason),
            None => self,
        }
    }
}

/// 验证相关错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// 字段为空
    #[error("field '{0}' cannot be empty")]
    EmptyField(String),

    /// 无效的时长
    #[error("invalid duration for '{field}': {message}")]
    InvalidDuration { field: String, message: String },

    /// 无效的速率限制
    #[error("invalid rate limit: {0}")]
    InvalidRateLimit(String),

    /// 未知的枚举取值
    #[error("unknown {kind} '{value}'")]
    UnknownVariant { kind: &'static str, value: String },

    /// 无效的资源路径
    #[error("invalid resource path: {0}")]
    InvalidPath(String),

    /// 自定义验证错误
    #[error("{0}")]
    Custom(String),
}

/// 配置相关错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// 缺少必需的配置
    #[error("missing required configuration: {0}")]
    MissingRequired(String),

    /// 无效的配置值
    #[error("invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// 解析失败
    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

/// 加密相关错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// 随机数生成失败
    #[error("random number generation failed: {0}")]
    RngFailed(String),
}

/// 审计相关错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuditError {
    /// 缓冲区已满
    #[error("audit buffer is full")]
    BufferFull,

    /// 后台写入线程已退出
    #[error("audit sink is disconnected")]
    Disconnected,

    /// 下游写入失败
    #[error("audit sink failed: {0}")]
    SinkFailed(String),
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(err.into())
    }
}
