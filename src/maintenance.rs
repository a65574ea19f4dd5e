//! 后台维护
//!
//! [`MaintenanceHandle`] 在独立线程中周期性地清理过期 Session 和空闲的限流状态。
//! 停止信号通过 `flume` 通道传递，`shutdown()` 或 drop 时线程退出并被 join。
//!
//! ## 示例
//!
//! ```rust
//! use aasguard::maintenance::MaintenanceHandle;
//! use aasguard::security::RateLimiter;
//! use aasguard::session::{SessionConfig, SessionRegistry};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let sessions = Arc::new(SessionRegistry::new(SessionConfig::default()));
//! let limiter = Arc::new(RateLimiter::new());
//!
//! let handle = MaintenanceHandle::spawn(sessions, limiter, Duration::from_secs(300)).unwrap();
//! let report = handle.sweep_now().unwrap();
//! assert_eq!(report.sessions_removed, 0);
//! handle.shutdown();
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::security::RateLimiter;
use crate::session::SessionRegistry;

/// 单次清理的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// 移除的过期 Session 数
    pub sessions_removed: usize,
    /// 移除的空闲限流条目数
    pub rate_entries_removed: usize,
}

/// 执行一次清理
pub fn sweep(sessions: &SessionRegistry, limiter: &RateLimiter) -> SweepReport {
    let sessions_removed = sessions.sweep_expired().unwrap_or_else(|e| {
        warn!(error = %e, "session sweep failed");
        0
    });
    let rate_entries_removed = limiter.sweep_idle();

    SweepReport {
        sessions_removed,
        rate_entries_removed,
    }
}

enum Command {
    SweepNow(flume::Sender<SweepReport>),
    Stop,
}

/// 后台维护线程的句柄
pub struct MaintenanceHandle {
    control: flume::Sender<Command>,
    worker: Option<JoinHandle<()>>,
    runs: Arc<AtomicU64>,
    interval: Duration,
}

impl MaintenanceHandle {
    /// 启动维护线程，每隔 `interval` 清理一次
    pub fn spawn(
        sessions: Arc<SessionRegistry>,
        limiter: Arc<RateLimiter>,
        interval: Duration,
    ) -> Result<Self> {
        if interval.is_zero() {
            return Err(Error::validation("maintenance interval must be positive"));
        }

        let (control, commands) = flume::unbounded::<Command>();
        let runs = Arc::new(AtomicU64::new(0));
        let worker_runs = runs.clone();

        let worker = std::thread::Builder::new()
            .name("aasguard-maintenance".into())
            .spawn(move || {
                loop {
                    let ack = match commands.recv_timeout(interval) {
                        Ok(Command::SweepNow(ack)) => Some(ack),
                        Err(flume::RecvTimeoutError::Timeout) => None,
                        Ok(Command::Stop) | Err(flume::RecvTimeoutError::Disconnected) => break,
                    };

                    let report = sweep(&sessions, &limiter);
                    worker_runs.fetch_add(1, Ordering::Relaxed);
                    if report != SweepReport::default() {
                        info!(
                            sessions = report.sessions_removed,
                            rate_entries = report.rate_entries_removed,
                            "maintenance sweep"
                        );
                    }
                    if let Some(ack) = ack {
                        let _ = ack.send(report);
                    }
                }
                debug!("maintenance thread stopped");
            })
            .map_err(|e| Error::internal(format!("failed to spawn maintenance thread: {}", e)))?;

        debug!(interval_ms = interval.as_millis() as u64, "maintenance thread started");
        Ok(Self {
            control,
            worker: Some(worker),
            runs,
            interval,
        })
    }

    /// 立即执行一次清理并等待结果
    pub fn sweep_now(&self) -> Result<SweepReport> {
        let (ack_tx, ack_rx) = flume::bounded(1);
        self.control
            .send(Command::SweepNow(ack_tx))
            .map_err(|_| Error::internal("maintenance thread has stopped"))?;
        ack_rx
            .recv()
            .map_err(|_| Error::internal("maintenance thread has stopped"))
    }

    /// 已执行的清理次数
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    /// 清理间隔
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// 停止线程并等待其退出
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.control.send(Command::Stop);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
