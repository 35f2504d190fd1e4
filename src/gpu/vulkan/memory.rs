use ash::vk;
use vk_mem;

use crate::BufferUsage;

#[derive(Debug)]
pub struct Buffer {
    pub(crate) buf: vk::Buffer,
    pub(crate) alloc: vk_mem::Allocation,
    pub(crate) size: u64,
    pub(crate) usage: BufferUsage,
}

impl Buffer {
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }
}

pub(super) fn buffer_usage_flags(usage: BufferUsage) -> vk::BufferUsageFlags {
    let base = vk::BufferUsageFlags::TRANSFER_DST;
    match usage {
        BufferUsage::Vertex => base | vk::BufferUsageFlags::VERTEX_BUFFER,
        BufferUsage::Index => base | vk::BufferUsageFlags::INDEX_BUFFER,
        BufferUsage::Uniform => base | vk::BufferUsageFlags::UNIFORM_BUFFER,
    }
}

/// Uniforms are rewritten in place by the host, geometry goes through a
/// staging copy into device-local memory.
pub(super) fn allocation_info(mappable: bool) -> vk_mem::AllocationCreateInfo {
    vk_mem::AllocationCreateInfo {
        usage: if mappable {
            vk_mem::MemoryUsage::AutoPreferHost
        } else {
            vk_mem::MemoryUsage::Auto
        },
        flags: if mappable {
            vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM
        } else {
            vk_mem::AllocationCreateFlags::empty()
        },
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_usage_accepts_uploads() {
        for usage in [BufferUsage::Vertex, BufferUsage::Index, BufferUsage::Uniform] {
            assert!(buffer_usage_flags(usage).contains(vk::BufferUsageFlags::TRANSFER_DST));
        }
        assert!(buffer_usage_flags(BufferUsage::Index).contains(vk::BufferUsageFlags::INDEX_BUFFER));
    }
}
