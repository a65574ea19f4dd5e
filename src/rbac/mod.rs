//! # RBAC (Role-Based Access Control) 模块
//!
//! 提供基于角色和安全级别的访问控制，包括：
//!
//! - **安全级别**: 资源的敏感度分级，调用方必须出示不低于该级别的上下文
//! - **访问权限**: 角色在资源上被授予的操作强度
//! - **安全上下文**: 每次请求由认证层构造的不可变身份
//! - **策略存储**: 资源级别表与角色授权表
//!
//! ## 基本概念
//!
//! - **SecurityLevel（安全级别）**: `PUBLIC < LOW < MEDIUM < HIGH < CRITICAL`
//! - **AccessRight（访问权限）**: `NONE < READ < WRITE < EXECUTE < FULL`
//! - **Action（操作）**: 每个操作对应一个最低权限
//!
//! ## 使用示例
//!
//! ### 基本权限检查
//!
//! ```rust
//! use aasguard::rbac::{AccessRight, PolicyStore, SecurityContext, SecurityLevel};
//!
//! let store = PolicyStore::new();
//! store.set_security_policy("resource1", SecurityLevel::Medium);
//! store.set_role_permissions("admin", "resource1", AccessRight::Full);
//!
//! let admin = SecurityContext::new("admin1", ["admin"], SecurityLevel::High).unwrap();
//! assert!(store.check_access(&admin, "resource1", AccessRight::Write).is_ok());
//!
//! let user = SecurityContext::new("user1", ["user"], SecurityLevel::Low).unwrap();
//! assert!(store.check_access(&user, "resource1", AccessRight::Read).is_err());
//! ```
//!
//! ### 显式继承
//!
//! ```rust
//! use aasguard::rbac::{AccessRight, PolicyStore, SecurityLevel};
//!
//! let store = PolicyStore::new();
//! store.set_security_policy("Shell", SecurityLevel::High);
//! store.set_role_permissions("operator", "Shell", AccessRight::Write);
//!
//! // 未登记时精确匹配
//! assert_eq!(store.get_security_level("Temperature"), SecurityLevel::Public);
//!
//! store.set_inherited_default("Temperature", "Shell").unwrap();
//! assert_eq!(store.get_security_level("Temperature"), SecurityLevel::High);
//! assert_eq!(store.get_role_right("operator", "Temperature"), AccessRight::Write);
//! ```

mod context;
mod level;
mod policy;

pub use context::{SecurityContext, SecurityContextBuilder};
pub use level::{AccessRight, Action, SecurityLevel};
pub use policy::{MAX_INHERITANCE_DEPTH, PolicyConfig, PolicyStore, ResourcePolicy, RoleGrant};
