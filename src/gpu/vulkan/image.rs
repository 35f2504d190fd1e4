use ash::vk;
use vk_mem;

use crate::{Extent, Format, TargetFormats};

use super::conversions::aspect_of;

#[derive(Debug)]
pub struct Image {
    pub(crate) img: vk::Image,
    pub(crate) alloc: vk_mem::Allocation,
    pub(crate) view: vk::ImageView,
    pub(crate) extent: vk::Extent2D,
    pub(crate) format: Format,
    pub(crate) levels: u32,
    pub(crate) layers: u32,
    pub(crate) layout: vk::ImageLayout,
}

impl Image {
    pub fn format(&self) -> Format {
        self.format
    }

    pub fn extent(&self) -> Extent {
        Extent {
            width: self.extent.width,
            height: self.extent.height,
        }
    }

    pub(super) fn range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange::builder()
            .aspect_mask(aspect_of(&self.format))
            .base_mip_level(0)
            .level_count(self.levels)
            .base_array_layer(0)
            .layer_count(self.layers)
            .build()
    }
}

/// Attachments drawn to between a begin and end of rendering.
#[derive(Debug)]
pub(super) struct RenderTarget {
    pub color: Image,
    /// Single-sampled copy of `color` when multisampling.
    pub resolve: Option<Image>,
    pub depth: Option<Image>,
    pub formats: TargetFormats,
}

impl RenderTarget {
    pub fn extent(&self) -> vk::Extent2D {
        self.color.extent
    }

    /// The image holding the final color, sampled or presented.
    pub fn output(&mut self) -> &mut Image {
        self.resolve.as_mut().unwrap_or(&mut self.color)
    }

    pub fn into_images(self) -> impl Iterator<Item = Image> {
        std::iter::once(self.color)
            .chain(self.resolve)
            .chain(self.depth)
    }
}

/// Given an image's old & new layouts, picks the src/dst pipeline stages and
/// access masks.
fn barrier_masks_for_transition(
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> (
    vk::PipelineStageFlags,
    vk::AccessFlags,
    vk::PipelineStageFlags,
    vk::AccessFlags,
) {
    use vk::{AccessFlags as AF, ImageLayout as L, PipelineStageFlags as PS};

    match (old_layout, new_layout) {
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => (
            PS::TOP_OF_PIPE,
            AF::empty(),
            PS::TRANSFER,
            AF::TRANSFER_WRITE,
        ),
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => (
            PS::TRANSFER,
            AF::TRANSFER_WRITE,
            PS::FRAGMENT_SHADER,
            AF::SHADER_READ,
        ),
        (L::UNDEFINED, L::COLOR_ATTACHMENT_OPTIMAL) => (
            PS::TOP_OF_PIPE,
            AF::empty(),
            PS::COLOR_ATTACHMENT_OUTPUT,
            AF::COLOR_ATTACHMENT_WRITE,
        ),
        (L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => (
            PS::TOP_OF_PIPE,
            AF::empty(),
            PS::EARLY_FRAGMENT_TESTS,
            AF::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        (L::COLOR_ATTACHMENT_OPTIMAL, L::TRANSFER_SRC_OPTIMAL) => (
            PS::COLOR_ATTACHMENT_OUTPUT,
            AF::COLOR_ATTACHMENT_WRITE,
            PS::TRANSFER,
            AF::TRANSFER_READ,
        ),
        (L::TRANSFER_SRC_OPTIMAL, L::COLOR_ATTACHMENT_OPTIMAL) => (
            PS::TRANSFER,
            AF::TRANSFER_READ,
            PS::COLOR_ATTACHMENT_OUTPUT,
            AF::COLOR_ATTACHMENT_WRITE,
        ),
        (L::TRANSFER_DST_OPTIMAL, L::PRESENT_SRC_KHR) => (
            PS::TRANSFER,
            AF::TRANSFER_WRITE,
            PS::BOTTOM_OF_PIPE,
            AF::empty(),
        ),
        _ => (PS::ALL_COMMANDS, AF::MEMORY_WRITE, PS::ALL_COMMANDS, AF::MEMORY_READ),
    }
}

/// Records a layout change for every subresource of `img`.
pub(super) fn transition_image(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    img: &mut Image,
    layout: vk::ImageLayout,
) {
    if img.layout == layout {
        return;
    }
    transition_raw(device, cmd, img.img, img.range(), img.layout, layout);
    img.layout = layout;
}

pub(super) fn transition_raw(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    img: vk::Image,
    range: vk::ImageSubresourceRange,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) {
    let (src, src_access, dst, dst_access) = barrier_masks_for_transition(old_layout, new_layout);
    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            src,
            dst,
            vk::DependencyFlags::default(),
            &[],
            &[],
            &[vk::ImageMemoryBarrier::builder()
                .new_layout(new_layout)
                .old_layout(old_layout)
                .image(img)
                .src_access_mask(src_access)
                .dst_access_mask(dst_access)
                .subresource_range(range)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .build()],
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uploads_wait_on_transfers() {
        let (src, _, dst, dst_access) = barrier_masks_for_transition(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        assert_eq!(src, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(dst, vk::PipelineStageFlags::FRAGMENT_SHADER);
        assert_eq!(dst_access, vk::AccessFlags::SHADER_READ);
    }

    #[test]
    fn unknown_transitions_fall_back_to_full_barrier() {
        let (src, _, dst, _) = barrier_masks_for_transition(
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );
        assert_eq!(src, vk::PipelineStageFlags::ALL_COMMANDS);
        assert_eq!(dst, vk::PipelineStageFlags::ALL_COMMANDS);
    }
}
