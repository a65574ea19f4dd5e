//! 安全上下文
//!
//! 由外部认证层为每个请求构造一次，构造后不可修改。
//! `claimed_level` 是调用方出示的级别；其真实性由认证层负责，本库只做比较。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::level::SecurityLevel;
use crate::error::{Error, Result, ValidationError};

/// 安全上下文
///
/// 反序列化同样经过 [`SecurityContextBuilder::build`] 的校验。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ContextFields")]
pub struct SecurityContext {
    user_id: String,
    roles: HashSet<String>,
    claimed_level: SecurityLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
    issued_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct ContextFields {
    user_id: String,
    #[serde(default)]
    roles: HashSet<String>,
    #[serde(default)]
    claimed_level: SecurityLevel,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    issued_at: Option<DateTime<Utc>>,
}

impl TryFrom<ContextFields> for SecurityContext {
    type Error = Error;

    fn try_from(fields: ContextFields) -> Result<Self> {
        let mut builder = SecurityContextBuilder::new(fields.user_id)
            .roles(fields.roles)
            .claimed_level(fields.claimed_level);
        if let Some(session_id) = fields.session_id {
            builder = builder.session(session_id);
        }
        if let Some(at) = fields.issued_at {
            builder = builder.issued_at(at);
        }
        builder.build()
    }
}

impl SecurityContext {
    /// 创建上下文构建器
    pub fn builder(user_id: impl Into<String>) -> SecurityContextBuilder {
        SecurityContextBuilder::new(user_id)
    }

    /// 直接创建上下文（签发时间为当前时间）
    ///
    /// # 示例
    ///
    /// ```rust
    /// use aasguard::rbac::{SecurityContext, SecurityLevel};
    ///
    /// let ctx = SecurityContext::new("operator1", ["operator"], SecurityLevel::High).unwrap();
    /// assert!(ctx.has_role("operator"));
    /// assert!(ctx.session_id().is_none());
    /// ```
    pub fn new<I, S>(user_id: impl Into<String>, roles: I, claimed_level: SecurityLevel) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SecurityContextBuilder::new(user_id)
            .roles(roles)
            .claimed_level(claimed_level)
            .build()
    }

    /// 用户 ID
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// 角色集合
    pub fn roles(&self) -> &HashSet<String> {
        &self.roles
    }

    /// 是否拥有某个角色
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// 调用方声明的安全级别
    pub fn claimed_level(&self) -> SecurityLevel {
        self.claimed_level
    }

    /// 绑定的 Session ID
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// 签发时间
    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }
}

/// 安全上下文构建器
#[derive(Debug, Clone)]
pub struct SecurityContextBuilder {
    user_id: String,
    roles: HashSet<String>,
    claimed_level: SecurityLevel,
    session_id: Option<String>,
    issued_at: Option<DateTime<Utc>>,
}

impl SecurityContextBuilder {
    /// 创建新的构建器
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            roles: HashSet::new(),
            claimed_level: SecurityLevel::Public,
            session_id: None,
            issued_at: None,
        }
    }

    /// 添加角色
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    /// 添加多个角色
    pub fn roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles.extend(roles.into_iter().map(Into::into));
        self
    }

    /// 设置声明的安全级别
    pub fn claimed_level(mut self, level: SecurityLevel) -> Self {
        self.claimed_level = level;
        self
    }

    /// 绑定 Session
    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// 设置签发时间
    pub fn issued_at(mut self, at: DateTime<Utc>) -> Self {
        self.issued_at = Some(at);
        self
    }

    /// 构建上下文
    pub fn build(self) -> Result<SecurityContext> {
        if self.user_id.trim().is_empty() {
            return Err(ValidationError::EmptyField("user_id".into()).into());
        }
        if let Some(session_id) = &self.session_id
            && session_id.is_empty()
        {
            return Err(ValidationError::EmptyField("session_id".into()).into());
        }

        Ok(SecurityContext {
            user_id: self.user_id,
            roles: self.roles,
            claimed_level: self.claimed_level,
            session_id: self.session_id,
            issued_at: self.issued_at.unwrap_or_else(Utc::now),
        })
    }
}
