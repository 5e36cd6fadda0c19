//! GPU 同步机制模块
//!
//! 提供 CPU-GPU 与 GPU-GPU 同步原语 [`Fence`]。
//! 借鉴 DistEngine 的 Fence 同步机制设计。
//!
//! # 设计原则
//!
//! - **单调递增**：已完成值永不减小
//! - **唯一阻塞点**：`Fence::wait` 是整个子系统中唯一会阻塞 CPU 线程的操作
//! - **GPU 侧等待**：队列上的等待只暂停该队列的 GPU 时间线
//!
//! # 使用场景
//!
//! 1. **帧同步**：确保 GPU 完成前一帧才复用该帧的命令分配器
//! 2. **资源更新**：确保资源在回读前已写入完成
//! 3. **多队列协作**：复制队列与图形队列之间的同步

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{trace, warn};

use crate::core::error::Result;

struct FenceShared {
    /// 已完成的值（GPU 侧写入）
    completed: Mutex<u64>,
    condvar: Condvar,
    /// 最近一次请求的 signal 值（CPU 侧）
    signal_value: AtomicU64,
    name: Option<String>,
}

/// Fence
///
/// 单调递增的计数器。克隆得到的是同一个 Fence 的另一个句柄。
///
/// # 示例
///
/// ```
/// use dist_hal::renderer::sync::Fence;
///
/// let fence = Fence::new(0, Some("Frame Fence"));
/// let value = fence.next_value();
/// fence.signal(value);
/// fence.wait(value).unwrap();
/// assert!(fence.is_completed(value));
/// ```
#[derive(Clone)]
pub struct Fence {
    shared: Arc<FenceShared>,
}

impl Fence {
    /// 创建新的 Fence
    ///
    /// # 参数
    ///
    /// * `initial_value` - 初始的已完成值
    /// * `name` - 调试名称
    pub fn new(initial_value: u64, name: Option<&str>) -> Self {
        Self {
            shared: Arc::new(FenceShared {
                completed: Mutex::new(initial_value),
                condvar: Condvar::new(),
                signal_value: AtomicU64::new(initial_value),
                name: name.map(str::to_string),
            }),
        }
    }

    pub fn name(&self) -> &str {
        self.shared.name.as_deref().unwrap_or("<unnamed fence>")
    }

    /// 获取已完成的值
    pub fn completed_value(&self) -> u64 {
        *self.shared.completed.lock()
    }

    /// 获取最近请求的 signal 值
    pub fn signal_value(&self) -> u64 {
        self.shared.signal_value.load(Ordering::Acquire)
    }

    /// 预留下一个 signal 值并返回
    pub fn next_value(&self) -> u64 {
        self.shared.signal_value.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// 记录一次待执行的 signal 请求
    pub(crate) fn record_request(&self, value: u64) {
        self.shared.signal_value.fetch_max(value, Ordering::AcqRel);
    }

    /// 检查特定值是否已完成
    pub fn is_completed(&self, value: u64) -> bool {
        self.completed_value() >= value
    }

    /// 将已完成值设为 `value` 并唤醒所有等待者
    ///
    /// 由 GPU 时间线调用，也可以由 CPU 直接调用。小于当前已完成值的
    /// signal 会被忽略，已完成值永不减小。
    pub fn signal(&self, value: u64) {
        let mut completed = self.shared.completed.lock();
        if value < *completed {
            warn!(
                fence = self.name(),
                completed = *completed,
                value,
                "Ignoring fence signal lower than completed value"
            );
            return;
        }
        *completed = value;
        self.record_request(value);
        trace!(fence = self.name(), value, "Fence signaled");
        self.shared.condvar.notify_all();
    }

    /// 等待特定值完成
    ///
    /// 已完成值 >= `value` 时立即返回，否则阻塞当前线程直到某次 signal 达到该值。
    pub fn wait(&self, value: u64) -> Result<()> {
        let mut completed = self.shared.completed.lock();
        while *completed < value {
            self.shared.condvar.wait(&mut completed);
        }
        Ok(())
    }

    /// 带超时的等待，返回是否在超时前完成
    pub fn wait_timeout(&self, value: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut completed = self.shared.completed.lock();
        while *completed < value {
            if self
                .shared
                .condvar
                .wait_until(&mut completed, deadline)
                .timed_out()
            {
                return *completed >= value;
            }
        }
        true
    }

    /// 是否为同一个 Fence
    pub fn same_fence(&self, other: &Fence) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl std::fmt::Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fence")
            .field("name", &self.name())
            .field("completed", &self.completed_value())
            .field("signal_value", &self.signal_value())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_next_value_is_monotonic() {
        let fence = Fence::new(0, None);
        assert_eq!(fence.next_value(), 1);
        assert_eq!(fence.next_value(), 2);
        assert_eq!(fence.signal_value(), 2);
        assert_eq!(fence.completed_value(), 0);
    }

    #[test]
    fn test_wait_returns_immediately_when_completed() {
        let fence = Fence::new(5, None);
        fence.wait(3).unwrap();
        fence.wait(5).unwrap();
        assert!(fence.is_completed(5));
        assert!(!fence.is_completed(6));
    }

    #[test]
    fn test_completed_value_never_decreases() {
        let fence = Fence::new(0, Some("Test"));
        fence.signal(10);
        fence.signal(4);
        assert_eq!(fence.completed_value(), 10);
        assert_eq!(fence.signal_value(), 10);
    }

    #[test]
    fn test_wait_blocks_until_signal() {
        let fence = Fence::new(0, None);
        let signaler = fence.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            signaler.signal(1);
            thread::sleep(Duration::from_millis(20));
            signaler.signal(3);
        });

        fence.wait(2).unwrap();
        assert!(fence.completed_value() >= 2);
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_timeout() {
        let fence = Fence::new(0, None);
        assert!(!fence.wait_timeout(1, Duration::from_millis(10)));
        fence.signal(1);
        assert!(fence.wait_timeout(1, Duration::from_millis(10)));
    }
}
