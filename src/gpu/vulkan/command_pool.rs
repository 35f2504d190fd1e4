use ash::{vk, Device};
use std::{cell::UnsafeCell, marker::PhantomData, thread::ThreadId};

use crate::Result;

/// Thin wrapper around a Vulkan command pool.
///
/// Hands out primary command buffers and takes them back after their
/// submission completes. The pool may be moved to another thread after
/// creation but must not be shared across threads.
pub struct CommandPool {
    device: Device,
    raw: vk::CommandPool,
    free: Vec<vk::CommandBuffer>,
    owner: ThreadId,
    // make !Sync
    _not_sync: PhantomData<UnsafeCell<()>>,
}

unsafe impl Send for CommandPool {}

impl CommandPool {
    pub(super) fn new(device: Device, family: u32) -> Result<Self> {
        let ci = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .build();
        let raw = unsafe { device.create_command_pool(&ci, None)? };
        Ok(Self {
            device,
            raw,
            free: Vec::new(),
            owner: std::thread::current().id(),
            _not_sync: PhantomData,
        })
    }

    fn assert_owner(&self) {
        debug_assert_eq!(
            self.owner,
            std::thread::current().id(),
            "CommandPool used from wrong thread"
        );
    }

    /// Moves ownership to the calling thread.
    pub fn adopt(&mut self) {
        self.owner = std::thread::current().id();
    }

    /// Returns a command buffer in the recording state.
    pub fn begin(&mut self) -> Result<vk::CommandBuffer> {
        self.assert_owner();
        let cmd = match self.free.pop() {
            Some(buf) => {
                unsafe {
                    self.device
                        .reset_command_buffer(buf, vk::CommandBufferResetFlags::empty())?;
                }
                buf
            }
            None => unsafe {
                self.device.allocate_command_buffers(
                    &vk::CommandBufferAllocateInfo::builder()
                        .command_pool(self.raw)
                        .level(vk::CommandBufferLevel::PRIMARY)
                        .command_buffer_count(1)
                        .build(),
                )?[0]
            },
        };

        unsafe {
            self.device.begin_command_buffer(
                cmd,
                &vk::CommandBufferBeginInfo::builder()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
                    .build(),
            )?
        };
        Ok(cmd)
    }

    /// Takes back a command buffer whose work has completed.
    pub fn recycle(&mut self, cmd: vk::CommandBuffer) {
        self.assert_owner();
        self.free.push(cmd);
    }

    /// Destroy the underlying Vulkan command pool. Command buffers allocated
    /// from this pool become invalid after this call.
    pub fn destroy(&mut self) {
        self.assert_owner();
        unsafe {
            self.device.destroy_command_pool(self.raw, None);
        }
        self.raw = vk::CommandPool::null();
        self.free.clear();
    }
}
