//! Session 管理模块
//!
//! 提供已认证 Session 的创建、查询、过期和撤销。
//!
//! ## 特性
//!
//! - 密码学安全的 Session ID
//! - 可插拔的存储后端，每个操作都是原子的
//! - 默认固定过期（从创建时刻起算），可选滑动过期
//! - 单用户并发 Session 上限
//! - 所有时间判断都基于注入的 [`Clock`](crate::clock::Clock)
//!
//! ## 示例
//!
//! ```rust
//! use aasguard::session::{SessionConfig, SessionRegistry};
//!
//! let registry = SessionRegistry::new(SessionConfig::default());
//!
//! let session = registry.create_session("user123", ["operator"], None).unwrap();
//! assert!(registry.get_session(&session.id).is_some());
//!
//! registry.invalidate_session(&session.id).unwrap();
//! assert!(registry.get_session(&session.id).is_none());
//! ```

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::{SharedClock, system_clock};
use crate::error::{Error, Result, ValidationError};
use crate::random::generate_session_id;

/// Session 默认有效期的上限（天）
pub const MAX_TIMEOUT_DAYS: i64 = 100 * 365;

/// Session 数据结构
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Session ID（唯一标识符）
    pub id: String,

    /// 关联的用户 ID
    pub user_id: String,

    /// 创建时持有的角色
    pub roles: HashSet<String>,

    /// 创建时间
    pub created_at: DateTime<Utc>,

    /// 最后访问时间
    pub last_accessed_at: DateTime<Utc>,

    /// 过期时间
    pub expires_at: DateTime<Utc>,
}

impl Session {
    fn new(
        id: String,
        user_id: String,
        roles: HashSet<String>,
        now: DateTime<Utc>,
        expires_in: Duration,
    ) -> Result<Self> {
        let expires_at = now.checked_add_signed(expires_in).ok_or_else(|| {
            ValidationError::InvalidDuration {
                field: "duration".into(),
                message: format!("expiry out of range, got {}s", expires_in.num_seconds()),
            }
        })?;
        Ok(Self {
            id,
            user_id,
            roles,
            created_at: now,
            last_accessed_at: now,
            expires_at,
        })
    }

    /// 在给定时刻是否已过期
    ///
    /// 边界是排他的：恰好在 `expires_at` 时 Session 已失效。
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// 给定时刻的剩余有效时间（秒）
    pub fn time_to_live(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }
}

/// Session 配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// 默认有效期
    pub timeout: Duration,

    /// 是否在每次成功访问时将过期时间推迟到 `now + timeout`
    pub sliding_expiration: bool,

    /// 单用户最大并发 Session 数（0 表示不限制）
    pub max_sessions_per_user: usize,

    /// Session ID 熵（字节数）
    pub id_length: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::minutes(30),
            sliding_expiration: false,
            max_sessions_per_user: 0,
            id_length: 32,
        }
    }
}

impl SessionConfig {
    /// 创建新的配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置默认有效期
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 设置是否启用滑动过期
    pub fn with_sliding_expiration(mut self, enabled: bool) -> Self {
        self.sliding_expiration = enabled;
        self
    }

    /// 设置单用户最大 Session 数
    pub fn with_max_sessions_per_user(mut self, max: usize) -> Self {
        self.max_sessions_per_user = max;
        self
    }

    /// 设置 Session ID 熵
    pub fn with_id_length(mut self, bytes: usize) -> Self {
        self.id_length = bytes;
        self
    }

    /// 短期 Session（5 分钟，固定过期）
    pub fn short_lived() -> Self {
        Self {
            timeout: Duration::minutes(5),
            ..Default::default()
        }
    }

    /// 长期 Session（8 小时，滑动过期，最多 3 个并发）
    pub fn long_lived() -> Self {
        Self {
            timeout: Duration::hours(8),
            sliding_expiration: true,
            max_sessions_per_user: 3,
            ..Default::default()
        }
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.timeout <= Duration::zero() {
            return Err(ValidationError::InvalidDuration {
                field: "session.timeout".into(),
                message: "must be positive".into(),
            }
            .into());
        }
        if self.timeout > Duration::days(MAX_TIMEOUT_DAYS) {
            return Err(ValidationError::InvalidDuration {
                field: "session.timeout".into(),
                message: format!("must not exceed {} days", MAX_TIMEOUT_DAYS),
            }
            .into());
        }
        Ok(())
    }
}

/// Session 存储 trait
///
/// 实现此 trait 可以自定义 Session 的存储后端。每个方法对单个 Session
/// 必须是原子的：[`access`](SessionStore::access) 在一步内完成
/// 查找、过期判断和更新访问时间。
pub trait SessionStore: Send + Sync {
    /// 保存新 Session，ID 冲突时返回错误
    fn insert(&self, session: Session) -> Result<()>;

    /// 查找有效 Session 并更新 `last_accessed_at`
    ///
    /// 已过期的 Session 会被移除并返回 `None`。`extend_by` 为 `Some` 时同时将
    /// `expires_at` 推迟到 `now + extend_by`。
    fn access(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
        extend_by: Option<Duration>,
    ) -> Result<Option<Session>>;

    /// 只读查找，不更新任何字段
    fn peek(&self, session_id: &str) -> Result<Option<Session>>;

    /// 删除 Session
    fn remove(&self, session_id: &str) -> Result<Option<Session>>;

    /// 保存新 Session，并保证该用户在 `now` 时刻有效的 Session 不超过 `max_per_user`
    ///
    /// 超出时按创建时间从旧到新淘汰，返回淘汰数量。默认实现先淘汰再插入，
    /// 两步之间不加锁；需要严格上限的存储应覆盖此方法。
    fn insert_limited(
        &self,
        session: Session,
        max_per_user: usize,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let mut active: Vec<Session> = self
            .get_by_user(&session.user_id)?
            .into_iter()
            .filter(|s| !s.is_expired_at(now))
            .collect();
        active.sort_by_key(|s| s.created_at);

        let excess = (active.len() + 1).saturating_sub(max_per_user);
        let mut evicted = 0;
        for oldest in active.iter().take(excess) {
            if self.remove(&oldest.id)?.is_some() {
                evicted += 1;
            }
        }
        self.insert(session)?;
        Ok(evicted)
    }

    /// 获取用户的所有 Session
    fn get_by_user(&self, user_id: &str) -> Result<Vec<Session>>;

    /// 删除用户的所有 Session
    fn remove_by_user(&self, user_id: &str) -> Result<usize>;

    /// 删除在 `now` 时刻已过期的 Session
    fn remove_expired(&self, now: DateTime<Utc>) -> Result<usize>;

    /// 获取 Session 总数
    fn count(&self) -> Result<usize>;
}

/// 内存 Session 存储
///
/// 基于分片的 `DashMap`：每个 Session 条目有独立的锁，并维护
/// `user_id → session_id` 索引。需要同时持有两张表的锁时，
/// 总是先锁 `by_user` 再锁 `sessions`。
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, Session>,
    by_user: DashMap<String, HashSet<String>>,
}

impl InMemorySessionStore {
    /// 创建新的内存存储
    pub fn new() -> Self {
        Self::default()
    }

    fn unindex(&self, session: &Session) {
        self.by_user
            .remove_if_mut(&session.user_id, |_, ids| {
                ids.remove(&session.id);
                ids.is_empty()
            });
    }
}

impl SessionStore for InMemorySessionStore {
    fn insert(&self, session: Session) -> Result<()> {
        let user_id = session.user_id.clone();
        let session_id = session.id.clone();

        match self.sessions.entry(session_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(Error::internal("session id collision"));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(session);
            }
        }
        self.by_user.entry(user_id).or_default().insert(session_id);
        Ok(())
    }

    fn access(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
        extend_by: Option<Duration>,
    ) -> Result<Option<Session>> {
        match self.sessions.get_mut(session_id) {
            None => return Ok(None),
            Some(mut entry) => {
                if !entry.is_expired_at(now) {
                    entry.last_accessed_at = now;
                    if let Some(by) = extend_by {
                        entry.expires_at = now
                            .checked_add_signed(by)
                            .unwrap_or(DateTime::<Utc>::MAX_UTC);
                    }
                    return Ok(Some(entry.value().clone()));
                }
            }
        }

        // 条目锁已释放；只有仍然过期时才删除，避免误删并发续期的 Session
        if let Some((_, expired)) = self
            .sessions
            .remove_if(session_id, |_, s| s.is_expired_at(now))
        {
            self.unindex(&expired);
        }
        Ok(None)
    }

    fn peek(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.get(session_id).map(|s| s.value().clone()))
    }

    fn insert_limited(
        &self,
        session: Session,
        max_per_user: usize,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        // 持有该用户的索引条目直到插入完成，同一用户的创建请求串行执行
        let mut ids = self.by_user.entry(session.user_id.clone()).or_default();
        if self.sessions.contains_key(&session.id) {
            return Err(Error::internal("session id collision"));
        }

        let mut active: Vec<(DateTime<Utc>, String)> = ids
            .iter()
            .filter_map(|id| {
                self.sessions
                    .get(id)
                    .filter(|s| !s.is_expired_at(now))
                    .map(|s| (s.created_at, id.clone()))
            })
            .collect();
        active.sort();

        let excess = (active.len() + 1).saturating_sub(max_per_user);
        let mut evicted = 0;
        for (_, id) in active.iter().take(excess) {
            if self.sessions.remove(id).is_some() {
                evicted += 1;
            }
            ids.remove(id);
        }

        let session_id = session.id.clone();
        match self.sessions.entry(session_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(Error::internal("session id collision"));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(session);
            }
        }
        ids.insert(session_id);
        Ok(evicted)
    }

    fn remove(&self, session_id: &str) -> Result<Option<Session>> {
        let removed = self.sessions.remove(session_id).map(|(_, s)| s);
        if let Some(session) = &removed {
            self.unindex(session);
        }
        Ok(removed)
    }

    fn get_by_user(&self, user_id: &str) -> Result<Vec<Session>> {
        let ids: Vec<String> = match self.by_user.get(user_id) {
            Some(ids) => ids.iter().cloned().collect(),
            None => return Ok(Vec::new()),
        };
        Ok(ids
            .iter()
            .filter_map(|id| self.sessions.get(id).map(|s| s.value().clone()))
            .collect())
    }

    fn remove_by_user(&self, user_id: &str) -> Result<usize> {
        let Some((_, ids)) = self.by_user.remove(user_id) else {
            return Ok(0);
        };
        Ok(ids
            .iter()
            .filter(|id| self.sessions.remove(*id).is_some())
            .count())
    }

    fn remove_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut expired = Vec::new();
        self.sessions.retain(|_, session| {
            if session.is_expired_at(now) {
                expired.push(session.clone());
                false
            } else {
                true
            }
        });
        for session in &expired {
            self.unindex(session);
        }
        Ok(expired.len())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.sessions.len())
    }
}

/// Session 注册表
///
/// 提供 Session 的完整生命周期管理。查询失败一律按“不存在”处理（fail closed）。
pub struct SessionRegistry {
    store: Arc<dyn SessionStore>,
    config: SessionConfig,
    clock: SharedClock,
}

impl SessionRegistry {
    /// 使用内存存储和系统时钟创建
    pub fn new(config: SessionConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    /// 使用内存存储和指定时钟创建
    pub fn with_clock(config: SessionConfig, clock: SharedClock) -> Self {
        Self::with_store(config, Arc::new(InMemorySessionStore::new()), clock)
    }

    /// 使用自定义存储创建
    pub fn with_store(config: SessionConfig, store: Arc<dyn SessionStore>, clock: SharedClock) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    /// 当前配置
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// 创建新的 Session
    ///
    /// # 参数
    ///
    /// * `user_id` - 关联的用户 ID
    /// * `roles` - Session 持有的角色
    /// * `duration` - 有效期，`None` 时使用配置的默认值；负值会被拒绝
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
        let user_id = user_id.into();
        if user_id.trim().is_empty() {
            return Err(ValidationError::EmptyField("user_id".into()).into());
        }

        let duration = duration.unwrap_or(self.config.timeout);
        if duration < Duration::zero() {
            return Err(ValidationError::InvalidDuration {
                field: "duration".into(),
                message: format!("must not be negative, got {}s", duration.num_seconds()),
            }
            .into());
        }

        let now = self.clock.now();
        let session = Session::new(
            generate_session_id(self.config.id_length)?,
            user_id,
            roles.into_iter().map(Into::into).collect(),
            now,
            duration,
        )?;

        let max = self.config.max_sessions_per_user;
        if max > 0 {
            let evicted = self.store.insert_limited(session.clone(), max, now)?;
            if evicted > 0 {
                debug!(user_id = %session.user_id, evicted, "oldest sessions evicted");
            }
        } else {
            self.store.insert(session.clone())?;
        }

        info!(user_id = %session.user_id, expires_at = %session.expires_at, "session created");
        Ok(session)
    }

    /// 获取有效 Session
    ///
    /// 未知或已过期时返回 `None`；成功时更新 `last_accessed_at`，
    /// 只有启用滑动过期时才会推迟 `expires_at`。
    pub fn get_session(&self, session_id: &str) -> Option<Session> {
        let extend_by = self
            .config
            .sliding_expiration
            .then_some(self.config.timeout);

        match self.store.access(session_id, self.clock.now(), extend_by) {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "session lookup failed");
                None
            }
        }
    }

    /// 获取属于指定用户的有效 Session
    ///
    /// Session 属于其他用户时返回 `None`，且不更新该 Session 的任何字段。
    pub fn get_session_for(&self, session_id: &str, user_id: &str) -> Option<Session> {
        // Session ID 唯一且所属用户不可变，先只读确认归属再访问
        match self.store.peek(session_id) {
            Ok(Some(session)) if session.user_id == user_id => self.get_session(session_id),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "session lookup failed");
                None
            }
        }
    }

    /// 撤销 Session（幂等），返回是否确有删除
    pub fn invalidate_session(&self, session_id: &str) -> Result<bool> {
        let removed = self.store.remove(session_id)?;
        if let Some(session) = &removed {
            info!(user_id = %session.user_id, "session invalidated");
        }
        Ok(removed.is_some())
    }

    /// 撤销用户的所有 Session
    pub fn invalidate_user_sessions(&self, user_id: &str) -> Result<usize> {
        let removed = self.store.remove_by_user(user_id)?;
        if removed > 0 {
            info!(%user_id, removed, "user sessions invalidated");
        }
        Ok(removed)
    }

    /// 用户当前有效的 Session（不更新访问时间）
    pub fn user_sessions(&self, user_id: &str) -> Result<Vec<Session>> {
        let now = self.clock.now();
        let mut sessions: Vec<Session> = self
            .store
            .get_by_user(user_id)?
            .into_iter()
            .filter(|s| !s.is_expired_at(now))
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }

    /// 清理过期 Session
    pub fn sweep_expired(&self) -> Result<usize> {
        let removed = self.store.remove_expired(self.clock.now())?;
        if removed > 0 {
            debug!(removed, "expired sessions swept");
        }
        Ok(removed)
    }

    /// Session 总数（含尚未清理的过期 Session）
    pub fn count(&self) -> Result<usize> {
        self.store.count()
    }
}
