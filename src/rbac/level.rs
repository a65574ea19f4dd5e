//! 安全级别、访问权限与操作定义

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// 安全级别
///
/// 有序：`Public < Low < Medium < High < Critical`。资源上设置的级别是调用方
/// 必须出示的最低级别。
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityLevel {
    /// 公开（未分级资源的默认值）
    #[default]
    Public,
    /// 低
    Low,
    /// 中
    Medium,
    /// 高
    High,
    /// 关键
    Critical,
}

impl SecurityLevel {
    /// 所有级别，从低到高
    pub const ALL: [SecurityLevel; 5] = [
        SecurityLevel::Public,
        SecurityLevel::Low,
        SecurityLevel::Medium,
        SecurityLevel::High,
        SecurityLevel::Critical,
    ];

    /// 是否满足要求的最低级别
    pub fn meets(self, required: SecurityLevel) -> bool {
        self >= required
    }

    fn as_str(self) -> &'static str {
        match self {
            SecurityLevel::Public => "PUBLIC",
            SecurityLevel::Low => "LOW",
            SecurityLevel::Medium => "MEDIUM",
            SecurityLevel::High => "HIGH",
            SecurityLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityLevel {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SecurityLevel::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ValidationError::UnknownVariant {
                kind: "security level",
                value: s.to_string(),
            })
    }
}

/// 访问权限
///
/// 有序：`None < Read < Write < Execute < Full`，`Full` 包含所有其他权限。
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessRight {
    /// 无权限（未授权角色的默认值）
    #[default]
    None,
    /// 读
    Read,
    /// 写
    Write,
    /// 执行
    Execute,
    /// 完全控制
    Full,
}

impl AccessRight {
    /// 所有权限，从低到高
    pub const ALL: [AccessRight; 5] = [
        AccessRight::None,
        AccessRight::Read,
        AccessRight::Write,
        AccessRight::Execute,
        AccessRight::Full,
    ];

    /// 是否满足所需权限
    pub fn satisfies(self, required: AccessRight) -> bool {
        self == AccessRight::Full || self >= required
    }

    fn as_str(self) -> &'static str {
        match self {
            AccessRight::None => "NONE",
            AccessRight::Read => "READ",
            AccessRight::Write => "WRITE",
            AccessRight::Execute => "EXECUTE",
            AccessRight::Full => "FULL",
        }
    }
}

impl fmt::Display for AccessRight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessRight {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AccessRight::ALL
            .into_iter()
            .find(|right| right.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ValidationError::UnknownVariant {
                kind: "access right",
                value: s.to_string(),
            })
    }
}

/// 对资源的操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    /// 读取
    Read,
    /// 写入
    Write,
    /// 执行操作
    Execute,
    /// 管理（需要 Full）
    Manage,
}

impl Action {
    /// 执行此操作所需的最低权限
    pub fn required_right(self) -> AccessRight {
        match self {
            Action::Read => AccessRight::Read,
            Action::Write => AccessRight::Write,
            Action::Execute => AccessRight::Execute,
            Action::Manage => AccessRight::Full,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Action::Read => "READ",
            Action::Write => "WRITE",
            Action::Execute => "EXECUTE",
            Action::Manage => "MANAGE",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Action::Read, Action::Write, Action::Execute, Action::Manage]
            .into_iter()
            .find(|action| action.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ValidationError::UnknownVariant {
                kind: "action",
                value: s.to_string(),
            })
    }
}
