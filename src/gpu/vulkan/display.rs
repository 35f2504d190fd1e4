use ash::extensions::khr;
use ash::vk;
use raw_window_handle::HasRawWindowHandle;

use crate::{GPUError, Result};

/// Window surface and the swapchain presenting to it.
pub(super) struct SwapSurface {
    pub loader: khr::Surface,
    pub sc_loader: khr::Swapchain,
    pub surface: vk::SurfaceKHR,
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub extent: vk::Extent2D,
    pub vsync: bool,
    pub acquire_fence: vk::Fence,
}

impl SwapSurface {
    /// Creates the surface for `window`. Fails when the adapter cannot
    /// present to it.
    pub fn new(
        entry: &ash::Entry,
        instance: &ash::Instance,
        device: &ash::Device,
        pdevice: vk::PhysicalDevice,
        family: u32,
        window: &dyn HasRawWindowHandle,
        extent: vk::Extent2D,
        vsync: bool,
    ) -> Result<Self> {
        let loader = khr::Surface::new(entry, instance);
        let surface = unsafe { ash_window::create_surface(entry, instance, window, None)? };

        let supported = unsafe {
            loader.get_physical_device_surface_support(pdevice, family, surface)
        };
        if !matches!(supported, Ok(true)) {
            unsafe { loader.destroy_surface(surface, None) };
            return Err(GPUError::ContextCreation("swap surface"));
        }

        let acquire_fence = match unsafe {
            device.create_fence(&vk::FenceCreateInfo::builder().build(), None)
        } {
            Ok(f) => f,
            Err(err) => {
                unsafe { loader.destroy_surface(surface, None) };
                return Err(err.into());
            }
        };

        let mut swap = Self {
            loader,
            sc_loader: khr::Swapchain::new(instance, device),
            surface,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            extent,
            vsync,
            acquire_fence,
        };
        if let Err(err) = swap.rebuild(pdevice, extent) {
            swap.destroy(device);
            return Err(err);
        }
        Ok(swap)
    }

    /// Creates a new swapchain for the surface's current size, retiring the
    /// old one.
    pub fn rebuild(&mut self, pdevice: vk::PhysicalDevice, wanted: vk::Extent2D) -> Result<()> {
        let capabilities = unsafe {
            self.loader
                .get_physical_device_surface_capabilities(pdevice, self.surface)?
        };
        let formats = unsafe {
            self.loader
                .get_physical_device_surface_formats(pdevice, self.surface)?
        };
        let present_modes = unsafe {
            self.loader
                .get_physical_device_surface_present_modes(pdevice, self.surface)?
        };

        let mut chosen_extent = wanted;
        if capabilities.current_extent.width != u32::MAX {
            chosen_extent = capabilities.current_extent;
        } else {
            chosen_extent.width = chosen_extent.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            );
            chosen_extent.height = chosen_extent.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            );
        }

        let present_mode = if self.vsync {
            vk::PresentModeKHR::FIFO
        } else {
            [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
                .into_iter()
                .find(|m| present_modes.contains(m))
                .unwrap_or(vk::PresentModeKHR::FIFO)
        };

        let wanted_format = formats
            .iter()
            .find(|f| f.format == vk::Format::B8G8R8A8_UNORM)
            .or_else(|| formats.first())
            .copied()
            .ok_or(GPUError::ContextCreation("swapchain format"))?;

        let mut min_images = capabilities.min_image_count.max(2);
        if capabilities.max_image_count != 0 {
            min_images = min_images.min(capabilities.max_image_count);
        }

        let old = self.swapchain;
        let swapchain = unsafe {
            self.sc_loader.create_swapchain(
                &vk::SwapchainCreateInfoKHR::builder()
                    .surface(self.surface)
                    .present_mode(present_mode)
                    .image_format(wanted_format.format)
                    .image_array_layers(1)
                    .image_color_space(wanted_format.color_space)
                    .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
                    .image_extent(chosen_extent)
                    .image_usage(vk::ImageUsageFlags::TRANSFER_DST)
                    .min_image_count(min_images)
                    .pre_transform(capabilities.current_transform)
                    .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
                    .old_swapchain(old)
                    .build(),
                None,
            )?
        };
        if old != vk::SwapchainKHR::null() {
            unsafe { self.sc_loader.destroy_swapchain(old, None) };
        }

        self.swapchain = swapchain;
        self.images = unsafe { self.sc_loader.get_swapchain_images(swapchain)? };
        self.extent = chosen_extent;
        log::debug!(
            "Swapchain {}x{} with {} images ({:?})",
            chosen_extent.width,
            chosen_extent.height,
            self.images.len(),
            present_mode
        );
        Ok(())
    }

    /// Acquires the next image and waits until it can be written.
    /// `None` means the swapchain is out of date.
    pub fn acquire(&mut self, device: &ash::Device) -> Result<Option<u32>> {
        let res = unsafe {
            self.sc_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                vk::Semaphore::null(),
                self.acquire_fence,
            )
        };
        match res {
            Ok((idx, _suboptimal)) => {
                unsafe {
                    device.wait_for_fences(&[self.acquire_fence], true, u64::MAX)?;
                    device.reset_fences(&[self.acquire_fence])?;
                }
                Ok(Some(idx))
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Returns false when the swapchain needs rebuilding.
    pub fn present(&self, queue: vk::Queue, idx: u32) -> Result<bool> {
        let res = unsafe {
            self.sc_loader.queue_present(
                queue,
                &vk::PresentInfoKHR::builder()
                    .image_indices(&[idx])
                    .swapchains(&[self.swapchain])
                    .build(),
            )
        };
        match res {
            Ok(suboptimal) => Ok(!suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// The device must be idle.
    pub fn destroy(self, device: &ash::Device) {
        unsafe {
            device.destroy_fence(self.acquire_fence, None);
            if self.swapchain != vk::SwapchainKHR::null() {
                self.sc_loader.destroy_swapchain(self.swapchain, None);
            }
            self.loader.destroy_surface(self.surface, None);
        }
    }
}
