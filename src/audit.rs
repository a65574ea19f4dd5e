//! 审计日志模块
//!
//! 为每一次访问决策记录一条结构化的 [`AuditRecord`]，包括：
//!
//! - **审计记录**: 时间、用户、资源、操作、决策与原因码
//! - **AuditSink Trait**: 可插拔的写入端
//! - **内存实现**: 支持保留上限、过滤查询和统计
//! - **缓冲实现**: 有界队列 + 后台线程，满时丢弃并计数，调用方永不阻塞
//! - **tracing 实现**: 以结构化事件输出到 `aasguard::audit` target
//!
//! 审计失败不会影响访问决策本身。
//!
//! ## 使用示例
//!
//! ```rust
//! use aasguard::audit::{AuditFilter, Auditor, InMemoryAuditSink};
//! use aasguard::engine::{DecisionReason, Effect};
//! use aasguard::rbac::{Action, SecurityContext, SecurityLevel};
//! use std::sync::Arc;
//!
//! let sink = InMemoryAuditSink::new();
//! let auditor = Auditor::new(Arc::new(sink.clone()));
//!
//! let ctx = SecurityContext::new("user1", ["viewer"], SecurityLevel::Low).unwrap();
//! auditor.log_access_attempt(&ctx, "r1", Action::Read, Effect::Allow, DecisionReason::Granted, None);
//! auditor.log_access_attempt(&ctx, "r1", Action::Write, Effect::Deny, DecisionReason::InsufficientPermission, None);
//!
//! assert_eq!(sink.len(), 2);
//! let denied = sink.query(&AuditFilter::new().with_decision(Effect::Deny));
//! assert_eq!(denied.len(), 1);
//! ```

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use tracing::{info, warn};

use crate::clock::{SharedClock, system_clock};
use crate::engine::{DecisionReason, Effect};
use crate::error::{AuditError, Error, Result};
use crate::rbac::{Action, SecurityContext};

/// 审计记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// 记录 ID
    pub id: String,
    /// 决策时间
    pub timestamp: DateTime<Utc>,
    /// 用户 ID
    pub user_id: String,
    /// 资源标识
    pub resource_id: String,
    /// 请求的操作
    pub action: Action,
    /// 决策结果
    pub decision: Effect,
    /// 原因码
    pub reason: DecisionReason,
    /// 客户端标识
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// 绑定的 Session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl AuditRecord {
    /// 创建新的审计记录
    pub fn new(
        timestamp: DateTime<Utc>,
        user_id: impl Into<String>,
        resource_id: impl Into<String>,
        action: Action,
        decision: Effect,
        reason: DecisionReason,
    ) -> Self {
        Self {
            id: generate_record_id(),
            timestamp,
            user_id: user_id.into(),
            resource_id: resource_id.into(),
            action,
            decision,
            reason,
            client_id: None,
            session_id: None,
        }
    }

    /// 设置客户端标识
    pub fn with_client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// 设置 Session
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// 是否为拒绝
    pub fn is_denied(&self) -> bool {
        self.decision == Effect::Deny
    }
}

/// 生成记录 ID
fn generate_record_id() -> String {
    use crate::random::generate_random_hex;
    format!(
        "aud_{}",
        generate_random_hex(12).unwrap_or_else(|_| "unknown".to_string())
    )
}

// ============================================================================
// AuditSink Trait
// ============================================================================

/// 审计写入端 trait
///
/// `write` 不应阻塞调用方；无法写入时返回错误，由 [`Auditor`] 计数后忽略。
pub trait AuditSink: Send + Sync {
    /// 写入一条记录
    fn write(&self, record: AuditRecord) -> Result<()>;

    /// 将已接收的记录全部落地
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// 查询
// ============================================================================

/// 审计查询条件，未设置的字段不参与过滤
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditFilter {
    /// 用户 ID
    pub user_id: Option<String>,
    /// 资源标识
    pub resource_id: Option<String>,
    /// 决策结果
    pub decision: Option<Effect>,
    /// 原因码
    pub reason: Option<DecisionReason>,
    /// 起始时间（含）
    pub start: Option<DateTime<Utc>>,
    /// 结束时间（含）
    pub end: Option<DateTime<Utc>>,
}

impl AuditFilter {
    /// 创建空条件（匹配所有记录）
    pub fn new() -> Self {
        Self::default()
    }

    /// 按用户过滤
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// 按资源过滤
    pub fn with_resource(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    /// 按决策过滤
    pub fn with_decision(mut self, decision: Effect) -> Self {
        self.decision = Some(decision);
        self
    }

    /// 按原因码过滤
    pub fn with_reason(mut self, reason: DecisionReason) -> Self {
        self.reason = Some(reason);
        self
    }

    /// 按时间范围过滤
    pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    /// 记录是否满足条件
    pub fn matches(&self, record: &AuditRecord) -> bool {
        self.user_id.as_deref().is_none_or(|u| record.user_id == u)
            && self
                .resource_id
                .as_deref()
                .is_none_or(|r| record.resource_id == r)
            && self.decision.is_none_or(|d| record.decision == d)
            && self.reason.is_none_or(|r| record.reason == r)
            && self.start.is_none_or(|s| record.timestamp >= s)
            && self.end.is_none_or(|e| record.timestamp <= e)
    }
}

/// 审计统计信息
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AuditStats {
    /// 总记录数
    pub total: usize,
    /// 允许数
    pub allowed: usize,
    /// 拒绝数
    pub denied: usize,
    /// 按原因码统计
    pub by_reason: HashMap<DecisionReason, usize>,
}

// ============================================================================
// InMemoryAuditSink
// ============================================================================

/// 内存审计存储
///
/// 按决策时间顺序追加；设置保留上限后丢弃最旧的记录。克隆后共享同一份数据。
#[derive(Debug, Clone, Default)]
pub struct InMemoryAuditSink {
    records: Arc<RwLock<VecDeque<AuditRecord>>>,
    retain: Option<usize>,
}

impl InMemoryAuditSink {
    /// 创建不限容量的内存存储
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建带保留上限的内存存储
    pub fn with_retention(max: usize) -> Self {
        Self {
            records: Arc::new(RwLock::new(VecDeque::new())),
            retain: Some(max),
        }
    }

    /// 所有记录
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.read().iter().cloned().collect()
    }

    /// 记录数量
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// 按条件查询
    pub fn query(&self, filter: &AuditFilter) -> Vec<AuditRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect()
    }

    /// 最近 N 条记录（最新的在前）
    pub fn recent(&self, count: usize) -> Vec<AuditRecord> {
        self.records.read().iter().rev().take(count).cloned().collect()
    }

    /// 统计信息
    pub fn stats(&self) -> AuditStats {
        let records = self.records.read();
        let mut stats = AuditStats {
            total: records.len(),
            ..Default::default()
        };
        for record in records.iter() {
            match record.decision {
                Effect::Allow => stats.allowed += 1,
                Effect::Deny => stats.denied += 1,
            }
            *stats.by_reason.entry(record.reason).or_insert(0) += 1;
        }
        stats
    }

    /// 清空所有记录
    pub fn clear(&self) {
        self.records.write().clear();
    }
}

impl AuditSink for InMemoryAuditSink {
    fn write(&self, record: AuditRecord) -> Result<()> {
        let mut records = self.records.write();
        if let Some(max) = self.retain {
            while records.len() >= max.max(1) {
                records.pop_front();
            }
        }
        records.push_back(record);
        Ok(())
    }
}

// ============================================================================
// TracingAuditSink / NoOpAuditSink
// ============================================================================

/// 以 tracing 事件输出审计记录
///
/// 所有事件使用 `aasguard::audit` target，便于订阅端单独路由。
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn write(&self, record: AuditRecord) -> Result<()> {
        info!(
            target: "aasguard::audit",
            id = %record.id,
            timestamp = %record.timestamp,
            user_id = %record.user_id,
            resource_id = %record.resource_id,
            action = %record.action,
            decision = %record.decision,
            reason = record.reason.code(),
            client_id = record.client_id.as_deref().unwrap_or("-"),
            "access decision"
        );
        Ok(())
    }
}

/// 空操作写入端
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpAuditSink;

impl AuditSink for NoOpAuditSink {
    fn write(&self, _record: AuditRecord) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// BufferedAuditSink
// ============================================================================

enum BufferMessage {
    Record(AuditRecord),
    Flush(flume::Sender<()>),
}

/// 缓冲写入端
///
/// 记录先进入有界 `flume` 队列，由后台线程转发给内层写入端。
/// 队列满时记录被丢弃并计数，`write` 从不阻塞。
pub struct BufferedAuditSink {
    sender: Option<flume::Sender<BufferMessage>>,
    worker: Option<JoinHandle<()>>,
    dropped: Arc<AtomicU64>,
}

impl BufferedAuditSink {
    /// 创建缓冲写入端并启动后台线程
    pub fn new(inner: Arc<dyn AuditSink>, capacity: usize) -> Result<Self> {
        let (sender, receiver) = flume::bounded::<BufferMessage>(capacity.max(1));

        let worker = std::thread::Builder::new()
            .name("aasguard-audit".into())
            .spawn(move || {
                for message in receiver.iter() {
                    match message {
                        BufferMessage::Record(record) => {
                            if let Err(e) = inner.write(record) {
                                warn!(error = %e, "audit sink write failed");
                            }
                        }
                        BufferMessage::Flush(ack) => {
                            if let Err(e) = inner.flush() {
                                warn!(error = %e, "audit sink flush failed");
                            }
                            let _ = ack.send(());
                        }
                    }
                }
            })
            .map_err(|e| Error::Audit(AuditError::SinkFailed(e.to_string())))?;

        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
            dropped: Arc::new(AtomicU64::new(0)),
        })
    }

    /// 因队列满而丢弃的记录数
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// 当前排队的消息数
    pub fn pending(&self) -> usize {
        self.sender.as_ref().map_or(0, |s| s.len())
    }
}

impl AuditSink for BufferedAuditSink {
    fn write(&self, record: AuditRecord) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or(Error::Audit(AuditError::Disconnected))?;

        match sender.try_send(BufferMessage::Record(record)) {
            Ok(()) => Ok(()),
            Err(flume::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(AuditError::BufferFull.into())
            }
            Err(flume::TrySendError::Disconnected(_)) => Err(AuditError::Disconnected.into()),
        }
    }

    /// 等待队列中已有的记录全部写入内层
    fn flush(&self) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or(Error::Audit(AuditError::Disconnected))?;

        let (ack_tx, ack_rx) = flume::bounded(1);
        sender
            .send(BufferMessage::Flush(ack_tx))
            .map_err(|_| Error::Audit(AuditError::Disconnected))?;
        ack_rx
            .recv()
            .map_err(|_| Error::Audit(AuditError::Disconnected))
    }
}

impl Drop for BufferedAuditSink {
    fn drop(&mut self) {
        // 关闭队列后等待后台线程写完剩余记录
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

// ============================================================================
// Auditor
// ============================================================================

/// 审计器
///
/// 包装一个写入端并统计写入/丢弃数量。写入失败只记录日志，从不向调用方传播。
pub struct Auditor {
    sink: Arc<dyn AuditSink>,
    clock: SharedClock,
    logged: AtomicU64,
    dropped: AtomicU64,
}

impl Auditor {
    /// 使用系统时钟创建
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self::with_clock(sink, system_clock())
    }

    /// 使用指定时钟创建
    pub fn with_clock(sink: Arc<dyn AuditSink>, clock: SharedClock) -> Self {
        Self {
            sink,
            clock,
            logged: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// 记录一次访问尝试
    pub fn log_access_attempt(
        &self,
        context: &SecurityContext,
        resource_id: &str,
        action: Action,
        decision: Effect,
        reason: DecisionReason,
        client_id: Option<&str>,
    ) {
        let mut record = AuditRecord::new(
            self.clock.now(),
            context.user_id(),
            resource_id,
            action,
            decision,
            reason,
        );
        if let Some(client_id) = client_id {
            record = record.with_client(client_id);
        }
        if let Some(session_id) = context.session_id() {
            record = record.with_session(session_id);
        }
        self.log(record);
    }

    /// 写入一条已构造的记录
    pub fn log(&self, record: AuditRecord) {
        match self.sink.write(record) {
            Ok(()) => {
                self.logged.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "audit record dropped");
            }
        }
    }

    /// 刷新写入端
    pub fn flush(&self) -> Result<()> {
        self.sink.flush()
    }

    /// 成功写入的记录数
    pub fn logged(&self) -> u64 {
        self.logged.load(Ordering::Relaxed)
    }

    /// 写入失败的记录数
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// ============================================================================
// 测试
// ============================================================================
