//! 帧资源
//!
//! 借鉴 DistEngine 的三缓冲设计，每个在途帧都有独立的命令分配器与命令缓冲区。
//!
//! # 设计说明
//!
//! 以三个帧资源为例循环使用：
//! - 帧 N: CPU 正在记录
//! - 帧 N-1: GPU 正在处理
//! - 帧 N-2: 完成，可以复用
//!
//! 复用一个帧资源之前总是先在 CPU 上等待它上次的 Fence 值，
//! 因此重置分配器时 GPU 一定已经执行完它记录的命令。

use tracing::trace;

use crate::core::config::MAX_FRAMES_IN_FLIGHT;
use crate::core::error::{contract, Result};
use super::command::{CommandAllocator, CommandBuffer};
use super::queue::CommandQueue;
use super::sync::Fence;

/// 帧资源
pub struct FrameResource {
    /// 帧索引
    pub frame_index: usize,
    /// 上次提交后 signal 的 Fence 值（0 表示从未提交）
    pub fence_value: u64,
    pub allocator: CommandAllocator,
    pub command_buffer: CommandBuffer,
}

/// 帧资源池
///
/// 管理多个帧资源的循环使用。
pub struct FrameResourcePool {
    /// 帧资源列表
    resources: Vec<FrameResource>,
    /// 当前帧索引
    current_index: usize,
    /// 已提交的帧数
    frame_count: u64,
}

impl FrameResourcePool {
    /// 由已创建的分配器与命令缓冲区组装资源池
    ///
    /// 帧数必须在 2 到 8 之间。每个命令缓冲区必须由与之配对的分配器创建，
    /// 且各帧的分配器互不相同。
    pub fn new(pairs: Vec<(CommandAllocator, CommandBuffer)>) -> Result<Self> {
        if !(2..=MAX_FRAMES_IN_FLIGHT as usize).contains(&pairs.len()) {
            return Err(contract(format!(
                "Frame resource pool needs 2..={} frames, got {}",
                MAX_FRAMES_IN_FLIGHT,
                pairs.len()
            )));
        }
        for (i, (allocator, command_buffer)) in pairs.iter().enumerate() {
            if !command_buffer.allocator().same_allocator(allocator) {
                return Err(contract(format!(
                    "Frame {} command buffer '{}' was not created from allocator '{}'",
                    i,
                    command_buffer.name(),
                    allocator.name()
                )));
            }
            if pairs[..i].iter().any(|(other, _)| other.same_allocator(allocator)) {
                return Err(contract(format!(
                    "Frame {} shares allocator '{}' with an earlier frame",
                    i,
                    allocator.name()
                )));
            }
        }

        let resources = pairs
            .into_iter()
            .enumerate()
            .map(|(frame_index, (allocator, command_buffer))| FrameResource {
                frame_index,
                fence_value: 0,
                allocator,
                command_buffer,
            })
            .collect();

        Ok(Self {
            resources,
            current_index: 0,
            frame_count: 0,
        })
    }

    /// 帧资源数量
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// 获取当前帧资源
    pub fn current(&self) -> &FrameResource {
        &self.resources[self.current_index]
    }

    /// 获取当前帧资源的可变引用
    pub fn current_mut(&mut self) -> &mut FrameResource {
        &mut self.resources[self.current_index]
    }

    /// 根据索引获取帧资源
    pub fn get(&self, index: usize) -> Option<&FrameResource> {
        self.resources.get(index)
    }

    /// 获取当前帧索引
    pub fn current_index(&self) -> usize {
        self.current_index
    }

    /// 已提交的帧数
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// 开始一帧
    ///
    /// 等待当前帧资源上次的 Fence 值，然后重置分配器开始记录。
    /// 返回可以记录命令的命令缓冲区。
    pub fn begin_frame(&mut self, fence: &Fence) -> Result<&mut CommandBuffer> {
        let frame = &mut self.resources[self.current_index];
        if frame.fence_value > 0 && !fence.is_completed(frame.fence_value) {
            trace!(frame = frame.frame_index, fence_value = frame.fence_value, "Waiting for frame resource");
        }
        fence.wait(frame.fence_value)?;
        frame.command_buffer.begin_recording(false)?;
        Ok(&mut frame.command_buffer)
    }

    /// 结束一帧
    ///
    /// 结束记录、提交、signal 下一个 Fence 值，并移动到下一帧。
    /// 返回该帧的 Fence 值。
    pub fn end_frame(&mut self, queue: &CommandQueue, fence: &Fence) -> Result<u64> {
        let frame = &mut self.resources[self.current_index];
        frame.command_buffer.end_recording()?;
        queue.execute(&[&frame.command_buffer])?;

        let value = fence.next_value();
        queue.signal(fence, value)?;
        frame.fence_value = value;

        self.frame_count += 1;
        self.advance();
        Ok(value)
    }

    /// 移动到下一帧
    pub fn advance(&mut self) -> &FrameResource {
        self.current_index = (self.current_index + 1) % self.resources.len();
        self.current()
    }

    /// 下一个帧资源需要等待的 Fence 值（已经可用时为 None）
    pub fn next_available_fence_value(&self, fence: &Fence) -> Option<u64> {
        let next = &self.resources[(self.current_index + 1) % self.resources.len()];
        if fence.is_completed(next.fence_value) {
            None
        } else {
            Some(next.fence_value)
        }
    }
}
