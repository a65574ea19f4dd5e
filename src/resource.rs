//! 受保护的资源树
//!
//! 外部数据模型（Shell → Submodel → Element）被抽象为一棵可读写的命名节点树，
//! 节点值为 `serde_json::Value`。[`SecureResourceWrapper`] 独占底层树，
//! 每一次读写都先经过一次 [`AccessDecisionEngine::authorize_path`]：
//! 限流只计一次，审计只写一条。
//!
//! 节点的资源标识是它自己的路径段（例如 `Temperature`），与策略存储中的
//! 资源标识一一对应。
//!
//! ## 示例
//!
//! ```rust
//! use aasguard::engine::AccessDecisionEngine;
//! use aasguard::rbac::{AccessRight, SecurityContext, SecurityLevel};
//! use aasguard::resource::{InMemoryResourceTree, SecureResourceWrapper};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let tree = InMemoryResourceTree::new();
//! tree.insert_path("Machine/Sensors/Temperature", json!(21.5)).unwrap();
//!
//! let engine = Arc::new(AccessDecisionEngine::builder().build());
//! for id in ["Machine", "Sensors", "Temperature"] {
//!     engine.set_role_permissions("operator", id, AccessRight::Read);
//! }
//!
//! let shell = SecureResourceWrapper::new(tree, engine);
//! let ctx = SecurityContext::new("op1", ["operator"], SecurityLevel::Low).unwrap();
//!
//! let value = shell.get_element(&ctx, "Machine/Sensors/Temperature", "hmi-1").unwrap();
//! assert_eq!(value, json!(21.5));
//! assert!(shell.set_value(&ctx, "Machine/Sensors/Temperature", json!(0), "hmi-1").is_err());
//! ```

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::engine::AccessDecisionEngine;
use crate::error::{Error, Result, ValidationError};
use crate::rbac::{Action, SecurityContext};

/// 资源路径分隔符
pub const PATH_SEPARATOR: char = '/';

/// 资源路径，例如 `Shell/Submodel/Element`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourcePath {
    segments: Vec<String>,
}

impl ResourcePath {
    /// 解析路径，拒绝空路径和空段
    pub fn parse(path: &str) -> Result<Self> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::InvalidPath("path is empty".into()).into());
        }

        let segments: Vec<String> = trimmed
            .split(PATH_SEPARATOR)
            .map(|s| s.trim().to_string())
            .collect();
        if segments.iter().any(String::is_empty) {
            return Err(ValidationError::InvalidPath(format!("empty segment in '{}'", path)).into());
        }
        Ok(Self { segments })
    }

    /// 由单个标识构造根级路径
    pub fn root(id: impl Into<String>) -> Result<Self> {
        Self::parse(&id.into())
    }

    /// 路径段
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// 深度（段数）
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// 目标节点的资源标识（最后一段）
    pub fn id(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    /// 父路径，根级节点返回 `None`
    pub fn parent(&self) -> Option<ResourcePath> {
        if self.segments.len() <= 1 {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// 子路径
    pub fn child(&self, id: &str) -> Result<ResourcePath> {
        let id = id.trim();
        if id.is_empty() || id.contains(PATH_SEPARATOR) {
            return Err(ValidationError::InvalidPath(format!("invalid child id '{}'", id)).into());
        }
        let mut segments = self.segments.clone();
        segments.push(id.to_string());
        Ok(Self { segments })
    }

    /// 祖先节点的资源标识，从根开始，不含目标自身
    pub fn ancestor_ids(&self) -> impl Iterator<Item = &str> {
        self.segments[..self.segments.len().saturating_sub(1)]
            .iter()
            .map(String::as_str)
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

impl FromStr for ResourcePath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// 资源树 trait
///
/// 只描述读写能力；访问控制由 [`SecureResourceWrapper`] 负责。
pub trait ResourceTree: Send + Sync {
    /// 读取节点值
    fn get(&self, path: &ResourcePath) -> Option<Value>;

    /// 写入已存在节点的值
    fn set(&self, path: &ResourcePath, value: Value) -> Result<()>;

    /// 在 `parent` 下新增子节点，`parent` 为 `None` 时新增根级节点
    fn insert(&self, parent: Option<&ResourcePath>, id: &str, value: Value) -> Result<ResourcePath>;

    /// 子节点标识（有序）
    fn children(&self, path: &ResourcePath) -> Result<Vec<String>>;

    /// 节点是否存在
    fn contains(&self, path: &ResourcePath) -> bool {
        self.get(path).is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Node {
    #[serde(default)]
    value: Value,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    children: BTreeMap<String, Node>,
}

impl Node {
    fn find(&self, path: &ResourcePath) -> Option<&Node> {
        path.segments()
            .iter()
            .try_fold(self, |node, seg| node.children.get(seg))
    }

    fn find_mut(&mut self, path: &ResourcePath) -> Option<&mut Node> {
        path.segments()
            .iter()
            .try_fold(self, |node, seg| node.children.get_mut(seg))
    }
}

/// 内存资源树
///
/// 根节点是虚拟的，第一层为 Shell。
#[derive(Debug, Default)]
pub struct InMemoryResourceTree {
    root: RwLock<Node>,
}

impl InMemoryResourceTree {
    /// 创建空树
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 JSON 文档构建
    ///
    /// 文档格式为 `{"Shell": {"value": ..., "children": {...}}}`。
    pub fn from_json(json: &str) -> Result<Self> {
        let children: BTreeMap<String, Node> = serde_json::from_str(json)?;
        Ok(Self {
            root: RwLock::new(Node {
                value: Value::Null,
                children,
            }),
        })
    }

    /// 按路径写入节点，缺失的中间节点以 `null` 创建
    pub fn insert_path(&self, path: &str, value: Value) -> Result<ResourcePath> {
        let path = ResourcePath::parse(path)?;
        let mut root = self.root.write();
        let node = path
            .segments()
            .iter()
            .fold(&mut *root, |node, seg| node.children.entry(seg.clone()).or_default());
        node.value = value;
        Ok(path)
    }

    /// 节点总数（不含虚拟根）
    pub fn len(&self) -> usize {
        fn count(node: &Node) -> usize {
            node.children.values().map(|c| 1 + count(c)).sum()
        }
        count(&self.root.read())
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.root.read().children.is_empty()
    }
}

impl ResourceTree for InMemoryResourceTree {
    fn get(&self, path: &ResourcePath) -> Option<Value> {
        self.root.read().find(path).map(|n| n.value.clone())
    }

    fn set(&self, path: &ResourcePath, value: Value) -> Result<()> {
        let mut root = self.root.write();
        let node = root
            .find_mut(path)
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        node.value = value;
        Ok(())
    }

    fn insert(&self, parent: Option<&ResourcePath>, id: &str, value: Value) -> Result<ResourcePath> {
        let path = match parent {
            Some(parent) => parent.child(id)?,
            None => ResourcePath::root(id)?,
        };

        let mut root = self.root.write();
        let parent_node = match parent {
            Some(parent) => root
                .find_mut(parent)
                .ok_or_else(|| Error::NotFound(parent.to_string()))?,
            None => &mut *root,
        };
        if parent_node.children.contains_key(path.id()) {
            return Err(ValidationError::Custom(format!("'{}' already exists", path)).into());
        }
        parent_node.children.insert(
            path.id().to_string(),
            Node {
                value,
                children: BTreeMap::new(),
            },
        );
        Ok(path)
    }

    fn children(&self, path: &ResourcePath) -> Result<Vec<String>> {
        let root = self.root.read();
        let node = root
            .find(path)
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        Ok(node.children.keys().cloned().collect())
    }
}

/// 路径授权范围
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessScope {
    /// 每个祖先节点需要 READ，目标节点需要操作对应的权限
    ///
    /// 限流 key 由目标节点决定，每次操作只消耗一个名额。
    #[default]
    FullPath,
    /// 只检查目标节点
    TargetOnly,
}

/// 受保护的资源树
///
/// 独占底层树，不提供绕过访问控制的访问途径。被拒绝时返回
/// [`Error::AccessDenied`]，对外消息统一，具体原因可通过
/// [`Error::denial_reason`] 获取。
pub struct SecureResourceWrapper<T: ResourceTree> {
    tree: T,
    engine: Arc<AccessDecisionEngine>,
    scope: AccessScope,
}

impl<T: ResourceTree> SecureResourceWrapper<T> {
    /// 包装资源树（默认 [`AccessScope::FullPath`]）
    pub fn new(tree: T, engine: Arc<AccessDecisionEngine>) -> Self {
        Self {
            tree,
            engine,
            scope: AccessScope::default(),
        }
    }

    /// 设置授权范围
    pub fn with_scope(mut self, scope: AccessScope) -> Self {
        self.scope = scope;
        self
    }

    /// 当前授权范围
    pub fn scope(&self) -> AccessScope {
        self.scope
    }

    /// 决策引擎
    pub fn engine(&self) -> &Arc<AccessDecisionEngine> {
        &self.engine
    }

    /// 读取节点值（READ）
    pub fn get_element(&self, context: &SecurityContext, path: &str, client_id: &str) -> Result<Value> {
        let path = ResourcePath::parse(path)?;
        self.gate(context, &path, Action::Read, client_id)?;
        self.tree
            .get(&path)
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }

    /// 写入节点值（WRITE）
    pub fn set_value(
        &self,
        context: &SecurityContext,
        path: &str,
        value: Value,
        client_id: &str,
    ) -> Result<()> {
        let path = ResourcePath::parse(path)?;
        self.gate(context, &path, Action::Write, client_id)?;
        self.tree.set(&path, value)?;
        debug!(user_id = %context.user_id(), %path, "resource value updated");
        Ok(())
    }

    /// 在父节点下新增子节点（父节点需要 WRITE）
    pub fn add_element(
        &self,
        context: &SecurityContext,
        parent: &str,
        id: &str,
        value: Value,
        client_id: &str,
    ) -> Result<ResourcePath> {
        let parent = ResourcePath::parse(parent)?;
        self.gate(context, &parent, Action::Write, client_id)?;
        let path = self.tree.insert(Some(&parent), id, value)?;
        debug!(user_id = %context.user_id(), %path, "resource element added");
        Ok(path)
    }

    /// 列出子节点（READ）
    pub fn list_children(
        &self,
        context: &SecurityContext,
        path: &str,
        client_id: &str,
    ) -> Result<Vec<String>> {
        let path = ResourcePath::parse(path)?;
        self.gate(context, &path, Action::Read, client_id)?;
        self.tree.children(&path)
    }

    fn gate(
        &self,
        context: &SecurityContext,
        path: &ResourcePath,
        action: Action,
        client_id: &str,
    ) -> Result<()> {
        let ancestors: Vec<&str> = match self.scope {
            AccessScope::FullPath => path.ancestor_ids().collect(),
            AccessScope::TargetOnly => Vec::new(),
        };
        let decision = self
            .engine
            .authorize_path(context, &ancestors, path.id(), action, client_id);
        if decision.is_denied() {
            return Err(Error::AccessDenied(decision.reason()));
        }
        Ok(())
    }
}
