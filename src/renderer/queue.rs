//! 命令队列
//!
//! 把封存的命令缓冲区提交给 GPU，并通过 Fence 进行 CPU↔GPU 与 GPU↔GPU 同步。
//! 提交本身在调用线程上同步完成，GPU 执行对 CPU 而言是异步的。

use std::sync::Arc;

use tracing::{debug, trace};

use crate::core::error::{contract, Result};
use crate::gfx::backend::QueueBackend;
use super::command::{CommandBuffer, CommandListType};
use super::stream::CommandStream;
use super::sync::Fence;

/// 命令队列
pub struct CommandQueue {
    list_type: CommandListType,
    name: Option<String>,
    backend: Box<dyn QueueBackend>,
}

impl CommandQueue {
    pub(crate) fn new(list_type: CommandListType, name: Option<&str>, backend: Box<dyn QueueBackend>) -> Self {
        Self {
            list_type,
            name: name.map(str::to_string),
            backend,
        }
    }

    pub fn list_type(&self) -> CommandListType {
        self.list_type
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed queue>")
    }

    /// 按数组顺序提交一批命令缓冲区
    ///
    /// 空批次为空操作。每个缓冲区都必须已关闭，并且类型与队列一致。
    pub fn execute(&self, buffers: &[&CommandBuffer]) -> Result<()> {
        if buffers.is_empty() {
            trace!(queue = self.name(), "Empty submission ignored");
            return Ok(());
        }

        let mut streams: Vec<Arc<CommandStream>> = Vec::with_capacity(buffers.len());
        for buffer in buffers {
            if buffer.is_open() {
                return Err(contract(format!(
                    "Command buffer '{}' must be closed before submission",
                    buffer.name()
                )));
            }
            if buffer.list_type() != self.list_type {
                return Err(contract(format!(
                    "{} command buffer '{}' submitted to {} queue '{}'",
                    buffer.list_type().name(),
                    buffer.name(),
                    self.list_type.name(),
                    self.name()
                )));
            }
            let stream = buffer.sealed_stream().ok_or_else(|| {
                contract(format!("Command buffer '{}' has nothing recorded", buffer.name()))
            })?;
            streams.push(Arc::clone(stream));
        }

        for stream in &streams {
            stream.mark_submitted();
        }
        let submitted = streams.clone();
        debug!(queue = self.name(), buffers = streams.len(), "Submitting command buffers");
        if let Err(e) = self.backend.submit(streams) {
            for stream in &submitted {
                drop(stream.completion_guard());
            }
            return Err(e);
        }
        Ok(())
    }

    /// 之前提交的工作完成后在 GPU 上将 Fence 置为 `value`
    pub fn signal(&self, fence: &Fence, value: u64) -> Result<()> {
        fence.record_request(value);
        trace!(queue = self.name(), fence = fence.name(), value, "Queue signal");
        self.backend.signal(fence, value)
    }

    /// GPU 侧等待，不阻塞 CPU
    pub fn wait(&self, fence: &Fence, value: u64) -> Result<()> {
        trace!(queue = self.name(), fence = fence.name(), value, "Queue wait");
        self.backend.wait(fence, value)
    }

    /// 刷新队列：signal 下一个值并在 CPU 上等待
    ///
    /// 类似于 DistEngine 的 FlushCommandQueue
    pub fn flush(&self, fence: &Fence) -> Result<u64> {
        let value = fence.next_value();
        self.signal(fence, value)?;
        fence.wait(value)?;
        Ok(value)
    }
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("name", &self.name())
            .field("list_type", &self.list_type)
            .finish()
    }
}
