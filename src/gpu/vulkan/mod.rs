//! Vulkan 1.3 implementation of [`Backend`].
//!
//! Everything is recorded into one primary command buffer per scope and
//! submitted synchronously, so descriptor sets and retired objects can be
//! recycled as soon as a submit returns. Draws render with dynamic rendering
//! into an offscreen primary target that [`Backend::present`] blits onto the
//! swap surface.

use std::ffi::{c_char, c_void, CStr, CString};
use std::mem::ManuallyDrop;

use ash::extensions::{ext, khr};
use ash::{vk, Entry};
use raw_window_handle::HasRawWindowHandle;
use vk_mem::Alloc;

use crate::{
    Backend, BufferUsage, ClearRequest, ContextInfo, DeviceLimits, DrawCall, Extent, Format,
    GPUError, PipelineRecord, RenderTargetInfo, Result, SampleCount, SamplerInfo, ShaderStage,
    TargetFormats, TextureInfo,
};

mod command_pool;
pub use command_pool::CommandPool;
mod conversions;
use conversions::*;
mod descriptor_sets;
use descriptor_sets::DescriptorArena;
mod device_selector;
use device_selector::{select_adapter, Adapter};
mod display;
use display::SwapSurface;
pub mod image;
pub use image::Image;
use image::{transition_image, transition_raw, RenderTarget};
pub mod memory;
pub use memory::Buffer;

/// Names of debugging layers that should be enabled when validation is requested.
/// Only includes the standard Vulkan validation layer to avoid enabling any extra layers.
pub const DEBUG_LAYER_NAMES: [*const c_char; 1] =
    [b"VK_LAYER_KHRONOS_validation\0".as_ptr() as *const c_char];

/// Push constant bytes reserved by the pipeline layout: world-to-NDC then
/// local-to-world, column major.
pub const PUSH_CONSTANT_SIZE: u32 = 128;

const ENGINE_NAME: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"gfxdev\0") };
const ENTRY_POINT: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    let message = unsafe { CStr::from_ptr((*p_callback_data).p_message) };
    if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!("[{:?}] {}", message_type, message.to_string_lossy());
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::warn!("[{:?}] {}", message_type, message.to_string_lossy());
    } else {
        log::debug!("[{:?}] {}", message_type, message.to_string_lossy());
    }
    vk::FALSE
}

struct InstanceParts {
    instance: ash::Instance,
    debug: Option<(ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,
    surface_capable: bool,
}

impl InstanceParts {
    fn new(entry: &Entry, info: &ContextInfo) -> Result<Self> {
        let app_name = CString::new(info.application_name.as_str()).unwrap_or_default();
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .engine_name(ENGINE_NAME)
            .api_version(vk::make_api_version(0, 1, 3, 0))
            .build();

        let available = entry.enumerate_instance_extension_properties(None)?;
        let has_ext = |name: &CStr| {
            available
                .iter()
                .any(|prop| unsafe { CStr::from_ptr(prop.extension_name.as_ptr()) == name })
        };

        // Surfaces are created after init, so every platform surface the
        // loader offers is enabled up front.
        let mut inst_exts = Vec::new();
        let mut surface_capable = false;
        if has_ext(khr::Surface::name()) {
            for name in [
                khr::XlibSurface::name(),
                khr::XcbSurface::name(),
                khr::WaylandSurface::name(),
                khr::Win32Surface::name(),
                khr::AndroidSurface::name(),
                ext::MetalSurface::name(),
            ] {
                if has_ext(name) {
                    inst_exts.push(name.as_ptr());
                    surface_capable = true;
                }
            }
            if surface_capable {
                inst_exts.push(khr::Surface::name().as_ptr());
            }
        }

        let debug_utils = info.enable_validation && has_ext(ext::DebugUtils::name());
        if debug_utils {
            inst_exts.push(ext::DebugUtils::name().as_ptr());
        }

        let mut inst_layers = Vec::new();
        if info.enable_validation {
            let available_layers = entry.enumerate_instance_layer_properties()?;
            for &layer in &DEBUG_LAYER_NAMES {
                let name = unsafe { CStr::from_ptr(layer) };
                if available_layers
                    .iter()
                    .any(|prop| unsafe { CStr::from_ptr(prop.layer_name.as_ptr()) == name })
                {
                    inst_layers.push(layer);
                } else {
                    log::warn!("Validation requested but {:?} is not installed", name);
                }
            }
        }

        let instance = unsafe {
            entry.create_instance(
                &vk::InstanceCreateInfo::builder()
                    .application_info(&app_info)
                    .enabled_extension_names(&inst_exts)
                    .enabled_layer_names(&inst_layers)
                    .build(),
                None,
            )
        }?;

        let debug = if debug_utils {
            let loader = ext::DebugUtils::new(entry, &instance);
            let messenger_ci = vk::DebugUtilsMessengerCreateInfoEXT::builder()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(vulkan_debug_callback));
            match unsafe { loader.create_debug_utils_messenger(&messenger_ci, None) } {
                Ok(messenger) => Some((loader, messenger)),
                Err(err) => {
                    log::warn!("Failed to create debug messenger: {}", err);
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            instance,
            debug,
            surface_capable,
        })
    }

    fn destroy(self) {
        unsafe {
            if let Some((loader, messenger)) = self.debug {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

fn create_device(instance: &ash::Instance, adapter: &Adapter) -> Result<ash::Device> {
    let priorities = [1.0];
    let queue_infos = [vk::DeviceQueueCreateInfo::builder()
        .queue_family_index(adapter.gfx_family)
        .queue_priorities(&priorities)
        .build()];

    let supported = &adapter.features;
    let features = vk::PhysicalDeviceFeatures::builder()
        .sampler_anisotropy(true)
        .fill_mode_non_solid(supported.fill_mode_non_solid == vk::TRUE)
        .depth_clamp(supported.depth_clamp == vk::TRUE)
        .depth_bounds(supported.depth_bounds == vk::TRUE)
        .wide_lines(supported.wide_lines == vk::TRUE)
        .build();
    let mut features13 = vk::PhysicalDeviceVulkan13Features::builder()
        .dynamic_rendering(true)
        .build();

    let mut extensions = Vec::new();
    if adapter.display_capable {
        extensions.push(khr::Swapchain::name().as_ptr());
    }

    let device_ci = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_infos)
        .enabled_extension_names(&extensions)
        .enabled_features(&features)
        .push_next(&mut features13)
        .build();

    Ok(unsafe { instance.create_device(adapter.pdevice, &device_ci, None)? })
}

/// Everything created by a successful init.
struct Context {
    entry: Entry,
    inst: InstanceParts,
    adapter: Adapter,
    device: ash::Device,
    queue: vk::Queue,
    allocator: ManuallyDrop<vk_mem::Allocator>,
    pool: CommandPool,
    fence: vk::Fence,
    set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    descriptors: DescriptorArena,
    default_sampler: vk::Sampler,
    white: Option<Image>,
    primary: Option<RenderTarget>,
    primary_formats: TargetFormats,
    offscreen: Option<RenderTarget>,
    on_offscreen: bool,
    swap: Option<SwapSurface>,
    recording: Option<vk::CommandBuffer>,
    rendering: bool,
    // Freed after the open command buffer completes.
    retired_buffers: Vec<Buffer>,
    retired_images: Vec<Image>,
}

impl Context {
    fn new(info: &ContextInfo) -> Result<Self> {
        let entry = unsafe { Entry::load() }?;
        let inst = InstanceParts::new(&entry, info)?;

        let adapter = match select_adapter(&inst.instance, info.adapter) {
            Ok(adapter) => adapter,
            Err(err) => {
                inst.destroy();
                return Err(err);
            }
        };

        let device = match create_device(&inst.instance, &adapter) {
            Ok(device) => device,
            Err(err) => {
                inst.destroy();
                return Err(err);
            }
        };

        let (allocator, pool) = match Self::make_allocator_and_pool(&inst.instance, &device, &adapter)
        {
            Ok(parts) => parts,
            Err(err) => {
                unsafe { device.destroy_device(None) };
                inst.destroy();
                return Err(err);
            }
        };

        let queue = unsafe { device.get_device_queue(adapter.gfx_family, 0) };
        let mut ctx = Self {
            entry,
            inst,
            adapter,
            device,
            queue,
            allocator: ManuallyDrop::new(allocator),
            pool,
            fence: vk::Fence::null(),
            set_layout: vk::DescriptorSetLayout::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            descriptors: DescriptorArena::default(),
            default_sampler: vk::Sampler::null(),
            white: None,
            primary: None,
            primary_formats: info.target_formats(),
            offscreen: None,
            on_offscreen: false,
            swap: None,
            recording: None,
            rendering: false,
            retired_buffers: Vec::new(),
            retired_images: Vec::new(),
        };

        match ctx.make_objects(info) {
            Ok(()) => Ok(ctx),
            Err(err) => {
                ctx.destroy();
                Err(err)
            }
        }
    }

    fn make_allocator_and_pool(
        instance: &ash::Instance,
        device: &ash::Device,
        adapter: &Adapter,
    ) -> Result<(vk_mem::Allocator, CommandPool)> {
        let allocator = vk_mem::Allocator::new(vk_mem::AllocatorCreateInfo::new(
            instance,
            device,
            adapter.pdevice,
        ))?;
        let pool = CommandPool::new(device.clone(), adapter.gfx_family)?;
        Ok((allocator, pool))
    }

    fn make_objects(&mut self, info: &ContextInfo) -> Result<()> {
        self.fence = unsafe {
            self.device
                .create_fence(&vk::FenceCreateInfo::builder().build(), None)?
        };

        let bindings = [vk::DescriptorSetLayoutBinding::builder()
            .binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)
            .build()];
        self.set_layout = unsafe {
            self.device.create_descriptor_set_layout(
                &vk::DescriptorSetLayoutCreateInfo::builder()
                    .bindings(&bindings)
                    .build(),
                None,
            )?
        };

        let set_layouts = [self.set_layout];
        let push_ranges = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            offset: 0,
            size: PUSH_CONSTANT_SIZE,
        }];
        self.pipeline_layout = unsafe {
            self.device.create_pipeline_layout(
                &vk::PipelineLayoutCreateInfo::builder()
                    .set_layouts(&set_layouts)
                    .push_constant_ranges(&push_ranges)
                    .build(),
                None,
            )?
        };

        self.default_sampler = self.make_sampler(&SamplerInfo {
            anisotropy_enable: false,
            ..Default::default()
        })?;

        let white = TextureInfo {
            width: 1,
            height: 1,
            format: Format::RGBA8Unorm,
            levels: 1,
            layers: 1,
        };
        self.white = Some(self.make_texture(&white, &[&[0xFF; 4]])?);

        self.primary = Some(self.make_target(
            vk::Extent2D {
                width: info.extent.width.max(1),
                height: info.extent.height.max(1),
            },
            self.primary_formats,
        )?);
        Ok(())
    }

    /// Tears down everything, including objects `make_objects` never got to.
    fn destroy(mut self) {
        unsafe {
            if let Err(err) = self.device.device_wait_idle() {
                log::warn!("Waiting for idle before teardown failed: {}", err);
            }
        }

        if let Some(swap) = self.swap.take() {
            swap.destroy(&self.device);
        }
        let targets = [self.primary.take(), self.offscreen.take()];
        for target in targets.into_iter().flatten() {
            self.retired_images.extend(target.into_images());
        }
        if let Some(white) = self.white.take() {
            self.retired_images.push(white);
        }
        self.free_retired();

        unsafe {
            self.device.destroy_sampler(self.default_sampler, None);
            self.descriptors.destroy(&self.device);
            self.device
                .destroy_pipeline_layout(self.pipeline_layout, None);
            self.device
                .destroy_descriptor_set_layout(self.set_layout, None);
            self.device.destroy_fence(self.fence, None);
        }
        self.pool.destroy();

        unsafe {
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
        self.inst.destroy();
    }

    fn free_retired(&mut self) {
        for mut buf in self.retired_buffers.drain(..) {
            unsafe { self.allocator.destroy_buffer(buf.buf, &mut buf.alloc) };
        }
        for mut img in self.retired_images.drain(..) {
            unsafe {
                self.device.destroy_image_view(img.view, None);
                self.allocator.destroy_image(img.img, &mut img.alloc);
            }
        }
    }

    /* Submission ********************************************************/

    /// Records with `record` into a fresh command buffer, submits it and
    /// waits for it to finish.
    fn oneshot(&mut self, record: impl FnOnce(&ash::Device, vk::CommandBuffer)) -> Result<()> {
        self.pool.adopt();
        let cmd = self.pool.begin()?;
        record(&self.device, cmd);
        let res = self.submit_and_wait(cmd);
        self.pool.recycle(cmd);
        res
    }

    fn submit_and_wait(&mut self, cmd: vk::CommandBuffer) -> Result<()> {
        let cmds = [cmd];
        unsafe {
            self.device.end_command_buffer(cmd)?;
            self.device.queue_submit(
                self.queue,
                &[vk::SubmitInfo::builder().command_buffers(&cmds).build()],
                self.fence,
            )?;
            self.device
                .wait_for_fences(&[self.fence], true, u64::MAX)?;
            self.device.reset_fences(&[self.fence])?;
        }
        Ok(())
    }

    /* Memory ************************************************************/

    fn write_mapped(&mut self, alloc: &mut vk_mem::Allocation, data: &[u8]) -> Result<()> {
        unsafe {
            let mapped = self.allocator.map_memory(alloc)?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped, data.len());
            self.allocator.unmap_memory(alloc);
        }
        Ok(())
    }

    fn make_raw_buffer(
        &mut self,
        size: u64,
        usage: vk::BufferUsageFlags,
        mappable: bool,
    ) -> Result<(vk::Buffer, vk_mem::Allocation)> {
        Ok(unsafe {
            self.allocator.create_buffer(
                &vk::BufferCreateInfo::builder()
                    .size(size.max(1))
                    .usage(usage)
                    .sharing_mode(vk::SharingMode::EXCLUSIVE)
                    .build(),
                &memory::allocation_info(mappable),
            )?
        })
    }

    /// Host-visible transfer source holding `data`.
    fn make_staging(&mut self, data: &[u8]) -> Result<Buffer> {
        let (buf, mut alloc) =
            self.make_raw_buffer(data.len() as u64, vk::BufferUsageFlags::TRANSFER_SRC, true)?;
        if let Err(err) = self.write_mapped(&mut alloc, data) {
            unsafe { self.allocator.destroy_buffer(buf, &mut alloc) };
            return Err(err);
        }
        Ok(Buffer {
            buf,
            alloc,
            size: data.len() as u64,
            usage: BufferUsage::Uniform,
        })
    }

    fn free_buffer(&mut self, mut buffer: Buffer) {
        unsafe { self.allocator.destroy_buffer(buffer.buf, &mut buffer.alloc) };
    }

    fn make_buffer(&mut self, usage: BufferUsage, data: &[u8]) -> Result<Buffer> {
        let size = data.len() as u64;
        let mappable = usage == BufferUsage::Uniform;
        let (buf, mut alloc) =
            self.make_raw_buffer(size, memory::buffer_usage_flags(usage), mappable)?;
        let mut buffer = Buffer {
            buf,
            alloc,
            size,
            usage,
        };
        if data.is_empty() {
            return Ok(buffer);
        }

        let res = if mappable {
            self.write_mapped(&mut buffer.alloc, data)
        } else {
            self.make_staging(data).and_then(|staging| {
                let region = [vk::BufferCopy {
                    src_offset: 0,
                    dst_offset: 0,
                    size,
                }];
                let (src, dst) = (staging.buf, buffer.buf);
                let res = self.oneshot(|device, cmd| unsafe {
                    device.cmd_copy_buffer(cmd, src, dst, &region)
                });
                self.free_buffer(staging);
                res
            })
        };

        match res {
            Ok(()) => Ok(buffer),
            Err(err) => {
                self.free_buffer(buffer);
                Err(err)
            }
        }
    }

    fn release_buffer(&mut self, buffer: Buffer) {
        if self.recording.is_some() {
            self.retired_buffers.push(buffer);
        } else {
            self.free_buffer(buffer);
        }
    }

    /* Images ************************************************************/

    fn make_image(
        &mut self,
        extent: vk::Extent2D,
        format: Format,
        levels: u32,
        layers: u32,
        samples: SampleCount,
        usage: vk::ImageUsageFlags,
    ) -> Result<Image> {
        let cube = layers == 6;
        let vk_format = lib_to_vk_image_format(&format);
        let (img, mut alloc) = unsafe {
            self.allocator.create_image(
                &vk::ImageCreateInfo::builder()
                    .extent(vk::Extent3D {
                        width: extent.width,
                        height: extent.height,
                        depth: 1,
                    })
                    .array_layers(layers)
                    .format(vk_format)
                    .mip_levels(levels)
                    .initial_layout(vk::ImageLayout::UNDEFINED)
                    .usage(usage)
                    .image_type(vk::ImageType::TYPE_2D)
                    .samples(samples.into())
                    .tiling(vk::ImageTiling::OPTIMAL)
                    .flags(if cube {
                        vk::ImageCreateFlags::CUBE_COMPATIBLE
                    } else {
                        vk::ImageCreateFlags::empty()
                    })
                    .sharing_mode(vk::SharingMode::EXCLUSIVE)
                    .build(),
                &vk_mem::AllocationCreateInfo {
                    usage: vk_mem::MemoryUsage::Auto,
                    ..Default::default()
                },
            )
        }?;

        let range = vk::ImageSubresourceRange::builder()
            .aspect_mask(aspect_of(&format))
            .base_mip_level(0)
            .level_count(levels)
            .base_array_layer(0)
            .layer_count(layers)
            .build();
        let view = unsafe {
            self.device.create_image_view(
                &vk::ImageViewCreateInfo::builder()
                    .image(img)
                    .format(vk_format)
                    .subresource_range(range)
                    .view_type(if cube {
                        vk::ImageViewType::CUBE
                    } else {
                        vk::ImageViewType::TYPE_2D
                    })
                    .build(),
                None,
            )
        };
        let view = match view {
            Ok(view) => view,
            Err(err) => {
                unsafe { self.allocator.destroy_image(img, &mut alloc) };
                return Err(err.into());
            }
        };

        Ok(Image {
            img,
            alloc,
            view,
            extent,
            format,
            levels,
            layers,
            layout: vk::ImageLayout::UNDEFINED,
        })
    }

    fn make_texture(&mut self, info: &TextureInfo, data: &[&[u8]]) -> Result<Image> {
        if data.len() != (info.levels * info.layers) as usize {
            return Err(GPUError::InvalidSource("level count mismatch"));
        }

        let mut staged = Vec::new();
        let mut regions = Vec::with_capacity(data.len());
        for layer in 0..info.layers {
            for level in 0..info.levels {
                let (w, h) = (
                    mip_dimension(info.width, level),
                    mip_dimension(info.height, level),
                );
                let size = info.format.level_size(w, h);
                let src = data[(layer * info.levels + level) as usize];
                if src.len() < size {
                    return Err(GPUError::InvalidSource("texture level too small"));
                }
                regions.push(
                    vk::BufferImageCopy::builder()
                        .buffer_offset(staged.len() as u64)
                        .image_subresource(vk::ImageSubresourceLayers {
                            aspect_mask: vk::ImageAspectFlags::COLOR,
                            mip_level: level,
                            base_array_layer: layer,
                            layer_count: 1,
                        })
                        .image_extent(vk::Extent3D {
                            width: w,
                            height: h,
                            depth: 1,
                        })
                        .build(),
                );
                staged.extend_from_slice(&src[..size]);
            }
        }

        let mut image = self.make_image(
            vk::Extent2D {
                width: info.width,
                height: info.height,
            },
            info.format,
            info.levels,
            info.layers,
            SampleCount::S1,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
        )?;

        let res = self.make_staging(&staged).and_then(|staging| {
            let src = staging.buf;
            let res = self.oneshot(|device, cmd| {
                transition_image(device, cmd, &mut image, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
                unsafe {
                    device.cmd_copy_buffer_to_image(
                        cmd,
                        src,
                        image.img,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &regions,
                    )
                };
                transition_image(
                    device,
                    cmd,
                    &mut image,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                );
            });
            self.free_buffer(staging);
            res
        });

        match res {
            Ok(()) => Ok(image),
            Err(err) => {
                self.release_image(image);
                Err(err)
            }
        }
    }

    fn release_image(&mut self, image: Image) {
        self.retired_images.push(image);
        if self.recording.is_none() {
            self.free_retired();
        }
    }

    fn make_target(&mut self, extent: vk::Extent2D, formats: TargetFormats) -> Result<RenderTarget> {
        let attachment = vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC;
        let color = self.make_image(extent, formats.color, 1, 1, formats.samples, attachment)?;
        let mut target = RenderTarget {
            color,
            resolve: None,
            depth: None,
            formats,
        };

        let mut res = Ok(());
        if formats.samples != SampleCount::S1 {
            res = self
                .make_image(extent, formats.color, 1, 1, SampleCount::S1, attachment)
                .map(|img| target.resolve = Some(img));
        }
        if let (true, Some(depth)) = (res.is_ok(), formats.depth) {
            res = self
                .make_image(
                    extent,
                    depth,
                    1,
                    1,
                    formats.samples,
                    vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                )
                .map(|img| target.depth = Some(img));
        }
        if res.is_ok() {
            res = self.oneshot(|device, cmd| {
                transition_image(
                    device,
                    cmd,
                    &mut target.color,
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                );
                if let Some(resolve) = target.resolve.as_mut() {
                    transition_image(
                        device,
                        cmd,
                        resolve,
                        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                    );
                }
                if let Some(depth) = target.depth.as_mut() {
                    transition_image(
                        device,
                        cmd,
                        depth,
                        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                    );
                }
            });
        }

        match res {
            Ok(()) => Ok(target),
            Err(err) => {
                self.retire_target(target);
                Err(err)
            }
        }
    }

    fn retire_target(&mut self, target: RenderTarget) {
        self.retired_images.extend(target.into_images());
        if self.recording.is_none() {
            self.free_retired();
        }
    }

    /* Objects ***********************************************************/

    fn make_sampler(&mut self, info: &SamplerInfo) -> Result<vk::Sampler> {
        let mut ci: vk::SamplerCreateInfo = (*info).into();
        ci.max_anisotropy = ci
            .max_anisotropy
            .min(self.adapter.properties.limits.max_sampler_anisotropy);
        Ok(unsafe { self.device.create_sampler(&ci, None)? })
    }

    fn make_shader(&mut self, stage: ShaderStage, spirv: &[u32]) -> Result<vk::ShaderModule> {
        if spirv.is_empty() {
            return Err(GPUError::InvalidSource("empty SPIR-V module"));
        }
        let module = unsafe {
            self.device.create_shader_module(
                &vk::ShaderModuleCreateInfo::builder().code(spirv).build(),
                None,
            )?
        };
        log::trace!("Created {:?} shader module ({} words)", stage, spirv.len());
        Ok(module)
    }

    fn make_pipeline(
        &mut self,
        record: &PipelineRecord,
        vertex: vk::ShaderModule,
        fragment: vk::ShaderModule,
    ) -> Result<vk::Pipeline> {
        let state = &record.state;
        let supported = &self.adapter.features;

        let stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(ShaderStage::Vertex.into())
                .module(vertex)
                .name(ENTRY_POINT)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(ShaderStage::Fragment.into())
                .module(fragment)
                .name(ENTRY_POINT)
                .build(),
        ];

        let bindings = [vk::VertexInputBindingDescription {
            binding: 0,
            stride: state.vertex_format.stride(),
            input_rate: vk::VertexInputRate::VERTEX,
        }];
        let attributes: Vec<vk::VertexInputAttributeDescription> = state
            .vertex_format
            .entries()
            .iter()
            .map(|entry| vk::VertexInputAttributeDescription {
                location: entry.location,
                binding: 0,
                format: entry.format.into(),
                offset: entry.offset,
            })
            .collect();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes)
            .build();

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .build();

        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1)
            .build();

        let raster = &state.raster;
        let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
            .polygon_mode(if supported.fill_mode_non_solid == vk::TRUE {
                raster.polygon_mode.into()
            } else {
                vk::PolygonMode::FILL
            })
            .cull_mode(raster.culling.into())
            .front_face(raster.front_face.into())
            .depth_bias_enable(raster.depth_bias_enable)
            .depth_bias_constant_factor(raster.depth_bias_constant)
            .depth_bias_slope_factor(raster.depth_bias_slope)
            .depth_clamp_enable(raster.depth_clamp_enable && supported.depth_clamp == vk::TRUE)
            .line_width(if supported.wide_lines == vk::TRUE {
                raster.line_width
            } else {
                1.0
            })
            .build();

        let multisample = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(record.target.samples.into())
            .build();

        let mut depth_stencil: vk::PipelineDepthStencilStateCreateInfo =
            state.depth_stencil.into();
        if supported.depth_bounds != vk::TRUE {
            depth_stencil.depth_bounds_test_enable = vk::FALSE;
        }

        let blend_attachments: [vk::PipelineColorBlendAttachmentState; 1] = [state.blend.into()];
        let color_blend = vk::PipelineColorBlendStateCreateInfo::builder()
            .attachments(&blend_attachments)
            .build();

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic = vk::PipelineDynamicStateCreateInfo::builder()
            .dynamic_states(&dynamic_states)
            .build();

        let color_formats = [lib_to_vk_image_format(&record.target.color)];
        let depth_format = record
            .target
            .depth
            .map(|f| lib_to_vk_image_format(&f))
            .unwrap_or(vk::Format::UNDEFINED);
        let stencil_format = if record.target.depth == Some(Format::D24S8) {
            depth_format
        } else {
            vk::Format::UNDEFINED
        };
        let mut rendering = vk::PipelineRenderingCreateInfo::builder()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(depth_format)
            .stencil_attachment_format(stencil_format)
            .build();

        let pipeline_ci = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic)
            .layout(self.pipeline_layout)
            .push_next(&mut rendering)
            .build();

        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_ci], None)
        }
        .map_err(|(_, err)| err)?;
        Ok(pipelines[0])
    }

    /* Recording *********************************************************/

    fn active_target(&self) -> Result<&RenderTarget> {
        if self.on_offscreen {
            self.offscreen.as_ref()
        } else {
            self.primary.as_ref()
        }
        .ok_or(GPUError::ContextCreation("render target"))
    }

    fn begin_rendering(&mut self, cmd: vk::CommandBuffer, clear: &ClearRequest) -> Result<()> {
        let target = self.active_target()?;
        let extent = target.extent();

        let mut color = vk::RenderingAttachmentInfo::builder()
            .image_view(target.color.view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(if clear.color.is_some() {
                vk::AttachmentLoadOp::CLEAR
            } else {
                vk::AttachmentLoadOp::LOAD
            })
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: clear.color.unwrap_or_default(),
                },
            });
        if let Some(resolve) = &target.resolve {
            color = color
                .resolve_mode(vk::ResolveModeFlags::AVERAGE)
                .resolve_image_view(resolve.view)
                .resolve_image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        }
        let color = [color.build()];

        let depth = target.depth.as_ref().map(|depth| {
            vk::RenderingAttachmentInfo::builder()
                .image_view(depth.view)
                .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .load_op(if clear.depth.is_some() {
                    vk::AttachmentLoadOp::CLEAR
                } else {
                    vk::AttachmentLoadOp::LOAD
                })
                .store_op(vk::AttachmentStoreOp::STORE)
                .clear_value(vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: clear.depth.unwrap_or(1.0),
                        stencil: 0,
                    },
                })
                .build()
        });
        let has_stencil = target.formats.depth == Some(Format::D24S8);

        let mut info = vk::RenderingInfo::builder()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .layer_count(1)
            .color_attachments(&color);
        if let Some(depth) = depth.as_ref() {
            info = info.depth_attachment(depth);
            if has_stencil {
                info = info.stencil_attachment(depth);
            }
        }

        unsafe { self.device.cmd_begin_rendering(cmd, &info) };
        self.rendering = true;
        Ok(())
    }

    fn end_rendering(&mut self) {
        if let (Some(cmd), true) = (self.recording, self.rendering) {
            unsafe { self.device.cmd_end_rendering(cmd) };
        }
        self.rendering = false;
    }

    fn record_clear(&mut self, cmd: vk::CommandBuffer, clear: &ClearRequest) -> Result<()> {
        if clear.is_empty() {
            return Ok(());
        }
        if !self.rendering {
            return self.begin_rendering(cmd, clear);
        }

        let target = self.active_target()?;
        let mut attachments = Vec::with_capacity(2);
        if let Some(color) = clear.color {
            attachments.push(vk::ClearAttachment {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                color_attachment: 0,
                clear_value: vk::ClearValue {
                    color: vk::ClearColorValue { float32: color },
                },
            });
        }
        if let (Some(depth), Some(format)) = (clear.depth, target.formats.depth) {
            attachments.push(vk::ClearAttachment {
                aspect_mask: aspect_of(&format),
                color_attachment: 0,
                clear_value: vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue { depth, stencil: 0 },
                },
            });
        }
        let rects = [vk::ClearRect {
            rect: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: target.extent(),
            },
            base_array_layer: 0,
            layer_count: 1,
        }];
        unsafe {
            self.device
                .cmd_clear_attachments(cmd, &attachments, &rects)
        };
        Ok(())
    }

    fn record_draw(&mut self, cmd: vk::CommandBuffer, draw: &DrawCall<'_, VulkanBackend>) -> Result<()> {
        if !self.rendering {
            self.begin_rendering(cmd, &ClearRequest::default())?;
        }

        let (view, sampler) = match draw.texture {
            Some((texture, sampler)) => (texture.view, sampler),
            None => (
                self.white
                    .as_ref()
                    .ok_or(GPUError::ContextCreation("default texture"))?
                    .view,
                self.default_sampler,
            ),
        };
        let set = self.descriptors.allocate(&self.device, self.set_layout)?;
        let image_info = [vk::DescriptorImageInfo {
            sampler,
            image_view: view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }];
        let writes = [vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&image_info)
            .build()];

        let extent = self.active_target()?.extent();
        let matrices = [
            draw.transforms.world_to_ndc.to_cols_array(),
            draw.transforms.local_to_world.to_cols_array(),
        ];

        unsafe {
            self.device.update_descriptor_sets(&writes, &[]);
            self.device
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, draw.pipeline);
            self.device
                .cmd_set_viewport(cmd, 0, &[draw.viewport.into()]);
            self.device.cmd_set_scissor(
                cmd,
                0,
                &[vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                }],
            );
            self.device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline_layout,
                0,
                &[set],
                &[],
            );
            self.device.cmd_push_constants(
                cmd,
                self.pipeline_layout,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                0,
                bytemuck::cast_slice(&matrices),
            );
            self.device
                .cmd_bind_vertex_buffers(cmd, 0, &[draw.vertex_buffer.buf], &[0]);
            self.device.cmd_bind_index_buffer(
                cmd,
                draw.index_buffer.buf,
                0,
                vk::IndexType::UINT16,
            );
            self.device.cmd_draw_indexed(
                cmd,
                draw.index_count,
                1,
                draw.first_index,
                draw.base_vertex,
                0,
            );
        }
        Ok(())
    }

    fn submit_commands(&mut self, cmd: vk::CommandBuffer) -> Result<()> {
        self.end_rendering();
        let res = self.submit_and_wait(cmd);
        self.recording = None;
        self.pool.recycle(cmd);
        self.free_retired();
        self.descriptors.reset(&self.device)?;
        res
    }

    /* Targets and presentation ******************************************/

    fn set_render_target(&mut self, target: Option<&RenderTargetInfo>) -> Result<()> {
        self.end_rendering();
        let Some(info) = target else {
            self.on_offscreen = false;
            return Ok(());
        };

        let extent = vk::Extent2D {
            width: info.extent.width.max(1),
            height: info.extent.height.max(1),
        };
        let reusable = self
            .offscreen
            .as_ref()
            .is_some_and(|t| t.formats == info.formats && t.extent() == extent);
        if !reusable {
            let target = self.make_target(extent, info.formats)?;
            if let Some(old) = self.offscreen.replace(target) {
                self.retire_target(old);
            }
        }
        self.on_offscreen = true;
        Ok(())
    }

    fn configure_primary(&mut self, extent: Extent, color: Format) -> Result<()> {
        self.end_rendering();
        let formats = TargetFormats {
            color,
            ..self.primary_formats
        };
        let extent = vk::Extent2D {
            width: extent.width.max(1),
            height: extent.height.max(1),
        };
        let target = self.make_target(extent, formats)?;
        if let Some(old) = self.primary.replace(target) {
            self.retire_target(old);
        }
        self.primary_formats = formats;

        if let Some(mut swap) = self.swap.take() {
            let res = unsafe { self.device.device_wait_idle() }
                .map_err(GPUError::from)
                .and_then(|_| swap.rebuild(self.adapter.pdevice, extent));
            self.swap = Some(swap);
            res?;
        }
        Ok(())
    }

    fn create_swap_surface(&mut self, window: &dyn HasRawWindowHandle, vsync: bool) -> Result<()> {
        if !self.inst.surface_capable || !self.adapter.display_capable {
            return Err(GPUError::HeadlessDisplayNotSupported);
        }
        self.destroy_swap_surface();

        let extent = self
            .primary
            .as_ref()
            .map(|t| t.extent())
            .ok_or(GPUError::ContextCreation("render target"))?;
        let swap = SwapSurface::new(
            &self.entry,
            &self.inst.instance,
            &self.device,
            self.adapter.pdevice,
            self.adapter.gfx_family,
            window,
            extent,
            vsync,
        )?;
        self.swap = Some(swap);
        Ok(())
    }

    fn destroy_swap_surface(&mut self) {
        if let Some(swap) = self.swap.take() {
            unsafe { self.device.device_wait_idle().ok() };
            swap.destroy(&self.device);
        }
    }

    fn present(&mut self) -> Result<()> {
        let Some(mut swap) = self.swap.take() else {
            return Ok(());
        };
        let res = self.present_to(&mut swap);
        self.swap = Some(swap);
        res
    }

    fn present_to(&mut self, swap: &mut SwapSurface) -> Result<()> {
        let wanted = swap.extent;
        let Some(idx) = swap.acquire(&self.device)? else {
            unsafe { self.device.device_wait_idle()? };
            return swap.rebuild(self.adapter.pdevice, wanted);
        };

        let mut primary = self
            .primary
            .take()
            .ok_or(GPUError::ContextCreation("render target"))?;
        let dst = swap.images[idx as usize];
        let dst_extent = swap.extent;
        let src_extent = primary.extent();
        let color_range = vk::ImageSubresourceRange::builder()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .level_count(1)
            .layer_count(1)
            .build();
        let layers = vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        };
        let blit = vk::ImageBlit {
            src_subresource: layers,
            src_offsets: [
                vk::Offset3D::default(),
                vk::Offset3D {
                    x: src_extent.width as i32,
                    y: src_extent.height as i32,
                    z: 1,
                },
            ],
            dst_subresource: layers,
            dst_offsets: [
                vk::Offset3D::default(),
                vk::Offset3D {
                    x: dst_extent.width as i32,
                    y: dst_extent.height as i32,
                    z: 1,
                },
            ],
        };

        let res = self.oneshot(|device, cmd| {
            let src = primary.output();
            transition_image(device, cmd, src, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
            transition_raw(
                device,
                cmd,
                dst,
                color_range,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            );
            unsafe {
                device.cmd_blit_image(
                    cmd,
                    src.img,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    dst,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[blit],
                    vk::Filter::LINEAR,
                )
            };
            transition_raw(
                device,
                cmd,
                dst,
                color_range,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::PRESENT_SRC_KHR,
            );
            transition_image(device, cmd, src, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        });
        self.primary = Some(primary);
        res?;

        if !swap.present(self.queue, idx)? {
            unsafe { self.device.device_wait_idle()? };
            swap.rebuild(self.adapter.pdevice, wanted)?;
        }
        Ok(())
    }
}

/// [`Backend`] over a Vulkan 1.3 adapter.
#[derive(Default)]
pub struct VulkanBackend {
    ctx: Option<Context>,
}

impl VulkanBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.ctx.is_some()
    }

    fn ctx(&mut self) -> &mut Context {
        self.ctx
            .as_mut()
            .expect("Vulkan backend used while not initialized")
    }
}

impl std::fmt::Debug for VulkanBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBackend")
            .field(
                "adapter",
                &self.ctx.as_ref().map(|ctx| ctx.adapter.name()),
            )
            .finish()
    }
}

impl Backend for VulkanBackend {
    type Buffer = Buffer;
    type Texture = Image;
    type Sampler = vk::Sampler;
    type Shader = vk::ShaderModule;
    type Pipeline = vk::Pipeline;
    type CommandBuffer = vk::CommandBuffer;

    fn init(&mut self, info: &ContextInfo) -> Result<DeviceLimits> {
        if let Some(old) = self.ctx.take() {
            old.destroy();
        }
        let ctx = Context::new(info)?;
        let limits = ctx.adapter.limits();
        log::info!(
            "Vulkan context on {} ({}x{}, {:?})",
            limits.adapter_name,
            info.extent.width,
            info.extent.height,
            info.framebuffer_format
        );
        self.ctx = Some(ctx);
        Ok(limits)
    }

    fn wait_idle(&mut self) -> Result<()> {
        if let Some(ctx) = self.ctx.as_ref() {
            unsafe { ctx.device.device_wait_idle()? };
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            ctx.destroy();
        }
    }

    fn make_sampler(&mut self, info: &SamplerInfo) -> Result<vk::Sampler> {
        self.ctx().make_sampler(info)
    }

    fn destroy_sampler(&mut self, sampler: vk::Sampler) {
        let ctx = self.ctx();
        unsafe { ctx.device.destroy_sampler(sampler, None) };
    }

    fn make_buffer(&mut self, usage: BufferUsage, data: &[u8]) -> Result<Buffer> {
        self.ctx().make_buffer(usage, data)
    }

    fn destroy_buffer(&mut self, buffer: Buffer) {
        self.ctx().release_buffer(buffer);
    }

    fn make_texture(&mut self, info: &TextureInfo, data: &[&[u8]]) -> Result<Image> {
        self.ctx().make_texture(info, data)
    }

    fn destroy_texture(&mut self, texture: Image) {
        self.ctx().release_image(texture);
    }

    fn make_shader(&mut self, stage: ShaderStage, spirv: &[u32]) -> Result<vk::ShaderModule> {
        self.ctx().make_shader(stage, spirv)
    }

    fn destroy_shader(&mut self, shader: vk::ShaderModule) {
        let ctx = self.ctx();
        unsafe { ctx.device.destroy_shader_module(shader, None) };
    }

    fn make_pipeline(
        &mut self,
        record: &PipelineRecord,
        vertex: vk::ShaderModule,
        fragment: vk::ShaderModule,
    ) -> Result<vk::Pipeline> {
        self.ctx().make_pipeline(record, vertex, fragment)
    }

    fn destroy_pipeline(&mut self, pipeline: vk::Pipeline) {
        let ctx = self.ctx();
        unsafe { ctx.device.destroy_pipeline(pipeline, None) };
    }

    fn set_render_target(&mut self, target: Option<&RenderTargetInfo>) -> Result<()> {
        self.ctx().set_render_target(target)
    }

    fn configure_primary(&mut self, extent: Extent, color: Format) -> Result<()> {
        self.ctx().configure_primary(extent, color)
    }

    fn begin_commands(&mut self) -> Result<vk::CommandBuffer> {
        let ctx = self.ctx();
        // Frames may move between threads; the device hands them over.
        ctx.pool.adopt();
        let cmd = ctx.pool.begin()?;
        ctx.recording = Some(cmd);
        ctx.rendering = false;
        Ok(cmd)
    }

    fn record_clear(&mut self, cmd: vk::CommandBuffer, clear: &ClearRequest) -> Result<()> {
        self.ctx().record_clear(cmd, clear)
    }

    fn record_draw(&mut self, cmd: vk::CommandBuffer, draw: &DrawCall<'_, Self>) -> Result<()> {
        self.ctx().record_draw(cmd, draw)
    }

    fn submit_commands(&mut self, cmd: vk::CommandBuffer) -> Result<()> {
        self.ctx().submit_commands(cmd)
    }

    fn create_swap_surface(&mut self, window: &dyn HasRawWindowHandle, vsync: bool) -> Result<()> {
        self.ctx().create_swap_surface(window, vsync)
    }

    fn destroy_swap_surface(&mut self) {
        self.ctx().destroy_swap_surface();
    }

    fn present(&mut self) -> Result<()> {
        self.ctx().present()
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        if self.ctx.is_some() {
            log::warn!("VulkanBackend dropped without shutdown");
            self.shutdown();
        }
    }
}
