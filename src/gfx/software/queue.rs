//! 软件命令队列
//!
//! 每个队列一个工作线程，充当该队列的 GPU 时间线。提交、signal 与 wait
//! 通过通道按调用顺序送达，工作线程按顺序执行，CPU 侧立即返回。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::core::error::{GraphicsError, Result};
use crate::engine_warn;
use crate::gfx::backend::QueueBackend;
use crate::renderer::command::CommandListType;
use crate::renderer::stream::CommandStream;
use crate::renderer::sync::Fence;
use super::execute::{ExecutionStats, Executor};
use super::memory::GpuMemory;
use super::validation::ValidationLog;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(5);

enum QueueOp {
    Execute(Vec<Arc<CommandStream>>),
    Signal(Fence, u64),
    Wait(Fence, u64),
}

/// 队列线程共享的 GPU 上下文
#[derive(Clone)]
pub(crate) struct QueueContext {
    pub memory: Arc<Mutex<GpuMemory>>,
    pub stats: Arc<Mutex<ExecutionStats>>,
    pub log: ValidationLog,
    pub validate: bool,
    /// 每次提交的模拟执行耗时
    pub latency: Duration,
}

pub(crate) struct SoftwareQueue {
    name: String,
    sender: Mutex<Option<mpsc::Sender<QueueOp>>>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SoftwareQueue {
    pub fn spawn(list_type: CommandListType, name: &str, context: QueueContext) -> Result<Self> {
        let (sender, receiver) = mpsc::channel();
        let shutdown = Arc::new(AtomicBool::new(false));
        let worker_shutdown = Arc::clone(&shutdown);
        let worker_name = name.to_string();

        let worker = thread::Builder::new()
            .name(format!("dist-hal-{}-queue", list_type.name().to_lowercase()))
            .spawn(move || run_worker(worker_name, receiver, context, worker_shutdown))?;

        debug!(queue = name, "Software queue worker started");
        Ok(Self {
            name: name.to_string(),
            sender: Mutex::new(Some(sender)),
            shutdown,
            worker: Some(worker),
        })
    }

    fn send(&self, op: QueueOp) -> Result<()> {
        let sender = self.sender.lock();
        let sent = sender.as_ref().map(|s| s.send(op).is_ok()).unwrap_or(false);
        if sent {
            Ok(())
        } else {
            Err(GraphicsError::CommandExecution(format!("Queue '{}' worker is not running", self.name)).into())
        }
    }
}

impl QueueBackend for SoftwareQueue {
    fn submit(&self, streams: Vec<Arc<CommandStream>>) -> Result<()> {
        self.send(QueueOp::Execute(streams))
    }

    fn signal(&self, fence: &Fence, value: u64) -> Result<()> {
        self.send(QueueOp::Signal(fence.clone(), value))
    }

    fn wait(&self, fence: &Fence, value: u64) -> Result<()> {
        self.send(QueueOp::Wait(fence.clone(), value))
    }
}

impl Drop for SoftwareQueue {
    fn drop(&mut self) {
        // 关闭通道后工作线程执行完剩余操作再退出
        self.sender.lock().take();
        self.shutdown.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                engine_warn!(queue = %self.name, "Software queue worker panicked");
            }
        }
    }
}

fn run_worker(name: String, receiver: mpsc::Receiver<QueueOp>, context: QueueContext, shutdown: Arc<AtomicBool>) {
    while let Ok(op) = receiver.recv() {
        match op {
            QueueOp::Execute(streams) => {
                if !context.latency.is_zero() {
                    thread::sleep(context.latency);
                }
                for stream in streams {
                    let _completion = stream.completion_guard();
                    let mut memory = context.memory.lock();
                    let mut stats = context.stats.lock();
                    Executor::new(&mut memory, &mut stats, &context.log, context.validate, &stream).run(&stream);
                }
            }
            QueueOp::Signal(fence, value) => {
                trace!(queue = %name, fence = fence.name(), value, "GPU signal");
                fence.signal(value);
            }
            QueueOp::Wait(fence, value) => {
                while !fence.wait_timeout(value, WAIT_POLL_INTERVAL) {
                    if shutdown.load(Ordering::Acquire) {
                        engine_warn!(queue = %name, fence = fence.name(), value, "Queue shut down while waiting on fence");
                        break;
                    }
                }
            }
        }
    }
    debug!(queue = %name, "Software queue worker stopped");
}
