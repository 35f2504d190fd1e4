use ash::vk;

use crate::Result;

/// Sets allocated per pool before another pool is opened.
const SETS_PER_POOL: u32 = 1024;

/// Descriptor sets that live for one submission.
///
/// Grows by whole pools when the current one runs dry. [`DescriptorArena::reset`]
/// recycles every set at once and must only be called after the queue has
/// finished with them.
#[derive(Debug, Default)]
pub(super) struct DescriptorArena {
    pools: Vec<vk::DescriptorPool>,
    current: usize,
}

impl DescriptorArena {
    fn make_pool(device: &ash::Device) -> Result<vk::DescriptorPool> {
        let sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: SETS_PER_POOL,
        }];
        Ok(unsafe {
            device.create_descriptor_pool(
                &vk::DescriptorPoolCreateInfo::builder()
                    .max_sets(SETS_PER_POOL)
                    .pool_sizes(&sizes)
                    .build(),
                None,
            )?
        })
    }

    pub fn allocate(
        &mut self,
        device: &ash::Device,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet> {
        let layouts = [layout];
        loop {
            if self.current == self.pools.len() {
                self.pools.push(Self::make_pool(device)?);
            }
            let res = unsafe {
                device.allocate_descriptor_sets(
                    &vk::DescriptorSetAllocateInfo::builder()
                        .descriptor_pool(self.pools[self.current])
                        .set_layouts(&layouts)
                        .build(),
                )
            };
            match res {
                Ok(sets) => return Ok(sets[0]),
                Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY)
                | Err(vk::Result::ERROR_FRAGMENTED_POOL) => self.current += 1,
                Err(err) => return Err(err.into()),
            }
        }
    }

    pub fn reset(&mut self, device: &ash::Device) -> Result<()> {
        for &pool in &self.pools[..self.pools.len().min(self.current + 1)] {
            unsafe { device.reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty())? };
        }
        self.current = 0;
        Ok(())
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        for pool in self.pools.drain(..) {
            unsafe { device.destroy_descriptor_pool(pool, None) };
        }
        self.current = 0;
    }
}
