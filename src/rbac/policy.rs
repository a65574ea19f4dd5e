//! 策略存储模块
//!
//! 保存 `resource → 安全级别` 与 `(role, resource) → 访问权限` 两张映射表。
//!
//! 默认值刻意不对称：未分级的资源为 [`SecurityLevel::Public`]（开放），
//! 未授权的角色为 [`AccessRight::None`]（无权限）。
//!
//! 资源标识按精确字符串匹配，不做前缀或层级推断；只有通过
//! [`PolicyStore::set_inherited_default`] 显式登记的资源才会回退到父资源的策略。

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

use super::context::SecurityContext;
use super::level::{AccessRight, SecurityLevel};
use crate::error::{ConfigError, Error, Result, ValidationError};

/// 继承链的最大深度
pub const MAX_INHERITANCE_DEPTH: usize = 32;

/// 角色授权条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGrant {
    /// 角色名
    pub role: String,
    /// 资源标识
    pub resource: String,
    /// 授予的权限
    pub right: AccessRight,
}

impl RoleGrant {
    /// 创建授权条目
    pub fn new(role: impl Into<String>, resource: impl Into<String>, right: AccessRight) -> Self {
        Self {
            role: role.into(),
            resource: resource.into(),
            right,
        }
    }
}

/// 可序列化的策略配置
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// 资源安全级别
    #[serde(default)]
    pub levels: HashMap<String, SecurityLevel>,
    /// 角色授权
    #[serde(default)]
    pub grants: Vec<RoleGrant>,
    /// 显式继承：子资源 → 父资源
    #[serde(default)]
    pub inherits: HashMap<String, String>,
}

/// 单次决策使用的策略快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourcePolicy {
    /// 资源要求的最低安全级别
    pub required_level: SecurityLevel,
    /// 角色集合在该资源上的最高权限
    pub effective_right: AccessRight,
}

#[derive(Debug, Default)]
struct PolicyTables {
    levels: HashMap<String, SecurityLevel>,
    // role -> resource -> right
    grants: HashMap<String, HashMap<String, AccessRight>>,
    inherits: HashMap<String, String>,
}

impl PolicyTables {
    /// 沿显式继承链查找第一个命中的值
    fn lookup<T: Copy>(
        &self,
        resource_id: &str,
        mut find: impl FnMut(&str) -> Option<T>,
    ) -> Option<T> {
        let mut current = resource_id;
        for _ in 0..=MAX_INHERITANCE_DEPTH {
            if let Some(value) = find(current) {
                return Some(value);
            }
            match self.inherits.get(current) {
                Some(parent) => current = parent.as_str(),
                None => return None,
            }
        }
        None
    }

    fn level(&self, resource_id: &str) -> SecurityLevel {
        self.lookup(resource_id, |id| self.levels.get(id).copied())
            .unwrap_or_default()
    }

    fn role_right(&self, role: &str, resource_id: &str) -> AccessRight {
        let Some(table) = self.grants.get(role) else {
            return AccessRight::None;
        };
        self.lookup(resource_id, |id| table.get(id).copied())
            .unwrap_or_default()
    }

    fn effective_right<'r>(
        &self,
        roles: impl IntoIterator<Item = &'r String>,
        resource_id: &str,
    ) -> AccessRight {
        roles
            .into_iter()
            .map(|role| self.role_right(role, resource_id))
            .max()
            .unwrap_or_default()
    }

    fn would_cycle(&self, resource_id: &str, parent_id: &str) -> bool {
        let mut current = parent_id;
        for _ in 0..=MAX_INHERITANCE_DEPTH {
            if current == resource_id {
                return true;
            }
            match self.inherits.get(current) {
                Some(next) => current = next.as_str(),
                None => return false,
            }
        }
        true
    }
}

/// 策略存储
///
/// 读多写少：所有表放在同一把读写锁下，每次修改都是原子的，
/// 并发读取永远不会观察到写了一半的映射。
///
/// ## 示例
///
/// ```rust
/// use aasguard::rbac::{AccessRight, PolicyStore, SecurityLevel};
/// use std::collections::HashSet;
///
/// let store = PolicyStore::new();
/// store.set_security_policy("r1", SecurityLevel::High);
/// store.set_role_permissions("viewer", "r1", AccessRight::Read);
/// store.set_role_permissions("editor", "r1", AccessRight::Write);
///
/// let roles: HashSet<String> = ["viewer".to_string(), "editor".to_string()].into();
/// assert_eq!(store.get_effective_right(&roles, "r1"), AccessRight::Write);
/// assert_eq!(store.get_security_level("unknown"), SecurityLevel::Public);
/// ```
#[derive(Debug, Default)]
pub struct PolicyStore {
    tables: RwLock<PolicyTables>,
}

impl PolicyStore {
    /// 创建空的策略存储
    pub fn new() -> Self {
        Self::default()
    }

    /// 从配置创建
    pub fn from_config(config: &PolicyConfig) -> Result<Self> {
        let store = Self::new();
        store.apply(config)?;
        Ok(store)
    }

    // ========================================================================
    // 修改
    // ========================================================================

    /// 设置资源要求的安全级别（覆盖）
    pub fn set_security_policy(&self, resource_id: impl Into<String>, level: SecurityLevel) {
        let resource_id = resource_id.into();
        debug!(resource = %resource_id, %level, "security policy set");
        self.tables.write().levels.insert(resource_id, level);
    }

    /// 移除资源的安全级别，返回原值
    pub fn remove_security_policy(&self, resource_id: &str) -> Option<SecurityLevel> {
        self.tables.write().levels.remove(resource_id)
    }

    /// 设置角色在资源上的权限（覆盖）
    pub fn set_role_permissions(
        &self,
        role: impl Into<String>,
        resource_id: impl Into<String>,
        right: AccessRight,
    ) {
        let role = role.into();
        let resource_id = resource_id.into();
        debug!(%role, resource = %resource_id, %right, "role permission set");
        self.tables
            .write()
            .grants
            .entry(role)
            .or_default()
            .insert(resource_id, right);
    }

    /// 移除角色在资源上的权限，返回原值
    pub fn remove_role_permissions(&self, role: &str, resource_id: &str) -> Option<AccessRight> {
        let mut tables = self.tables.write();
        let table = tables.grants.get_mut(role)?;
        let removed = table.remove(resource_id);
        if table.is_empty() {
            tables.grants.remove(role);
        }
        removed
    }

    /// 登记显式继承：`resource_id` 没有自己的条目时回退到 `parent_id`
    pub fn set_inherited_default(
        &self,
        resource_id: impl Into<String>,
        parent_id: impl Into<String>,
    ) -> Result<()> {
        let resource_id = resource_id.into();
        let parent_id = parent_id.into();

        let mut tables = self.tables.write();
        if tables.would_cycle(&resource_id, &parent_id) {
            return Err(ValidationError::Custom(format!(
                "inheriting '{}' from '{}' would create a cycle",
                resource_id, parent_id
            ))
            .into());
        }
        debug!(resource = %resource_id, parent = %parent_id, "inherited default registered");
        tables.inherits.insert(resource_id, parent_id);
        Ok(())
    }

    /// 取消继承登记
    pub fn clear_inherited_default(&self, resource_id: &str) -> Option<String> {
        self.tables.write().inherits.remove(resource_id)
    }

    /// 原子地加载整份配置
    ///
    /// 先在副本上校验，失败时存储保持不变。
    pub fn apply(&self, config: &PolicyConfig) -> Result<()> {
        let mut tables = self.tables.write();

        let mut staged = PolicyTables {
            levels: tables.levels.clone(),
            grants: tables.grants.clone(),
            inherits: tables.inherits.clone(),
        };

        staged
            .levels
            .extend(config.levels.iter().map(|(k, v)| (k.clone(), *v)));
        for grant in &config.grants {
            if grant.role.is_empty() || grant.resource.is_empty() {
                return Err(Error::Config(ConfigError::InvalidValue {
                    key: "policy.grants".into(),
                    message: "role and resource must not be empty".into(),
                }));
            }
            staged
                .grants
                .entry(grant.role.clone())
                .or_default()
                .insert(grant.resource.clone(), grant.right);
        }
        for (child, parent) in &config.inherits {
            if staged.would_cycle(child, parent) {
                return Err(Error::Config(ConfigError::InvalidValue {
                    key: format!("policy.inherits.{}", child),
                    message: format!("inheriting from '{}' would create a cycle", parent),
                }));
            }
            staged.inherits.insert(child.clone(), parent.clone());
        }

        *tables = staged;
        debug!(
            levels = tables.levels.len(),
            roles = tables.grants.len(),
            "policy configuration applied"
        );
        Ok(())
    }

    // ========================================================================
    // 查询
    // ========================================================================

    /// 资源要求的安全级别，未设置时为 `Public`
    pub fn get_security_level(&self, resource_id: &str) -> SecurityLevel {
        self.tables.read().level(resource_id)
    }

    /// 单个角色在资源上的权限，未授权时为 `None`
    pub fn get_role_right(&self, role: &str, resource_id: &str) -> AccessRight {
        self.tables.read().role_right(role, resource_id)
    }

    /// 多个角色的有效权限：取所有角色中的最高权限
    pub fn get_effective_right(&self, roles: &HashSet<String>, resource_id: &str) -> AccessRight {
        self.tables.read().effective_right(roles, resource_id)
    }

    /// 在同一读锁下取出级别和有效权限
    pub fn resolve(&self, roles: &HashSet<String>, resource_id: &str) -> ResourcePolicy {
        let tables = self.tables.read();
        ResourcePolicy {
            required_level: tables.level(resource_id),
            effective_right: tables.effective_right(roles, resource_id),
        }
    }

    /// 只做策略判断（级别 → 权限），不涉及 Session、限流和审计
    pub fn check_access(
        &self,
        context: &SecurityContext,
        resource_id: &str,
        required_right: AccessRight,
    ) -> Result<()> {
        let policy = self.resolve(context.roles(), resource_id);

        if !context.claimed_level().meets(policy.required_level) {
            return Err(Error::InsufficientSecurityLevel {
                required: policy.required_level,
                presented: context.claimed_level(),
            });
        }
        if !policy.effective_right.satisfies(required_right) {
            return Err(Error::InsufficientPermission {
                required: required_right,
                granted: policy.effective_right,
            });
        }
        Ok(())
    }

    /// 已登记授权的角色
    pub fn roles(&self) -> Vec<String> {
        let mut roles: Vec<String> = self.tables.read().grants.keys().cloned().collect();
        roles.sort();
        roles
    }

    /// 导出当前策略
    pub fn export(&self) -> PolicyConfig {
        let tables = self.tables.read();
        let mut grants: Vec<RoleGrant> = tables
            .grants
            .iter()
            .flat_map(|(role, table)| {
                table
                    .iter()
                    .map(move |(resource, right)| RoleGrant::new(role.clone(), resource.clone(), *right))
            })
            .collect();
        grants.sort_by(|a, b| (&a.role, &a.resource).cmp(&(&b.role, &b.resource)));

        PolicyConfig {
            levels: tables.levels.clone(),
            grants,
            inherits: tables.inherits.clone(),
        }
    }
}
