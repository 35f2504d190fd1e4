use std::ffi::CStr;

use ash::vk;

use crate::{DeviceLimits, GPUError, Result, SampleCount};

/// A physical device that can drive the pipeline.
pub(super) struct Adapter {
    pub pdevice: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub gfx_family: u32,
    pub display_capable: bool,
}

impl Adapter {
    pub fn name(&self) -> String {
        unsafe {
            CStr::from_ptr(self.properties.device_name.as_ptr())
                .to_str()
                .unwrap_or("UNKNOWN")
                .to_string()
        }
    }

    pub fn limits(&self) -> DeviceLimits {
        let limits = &self.properties.limits;
        let counts = limits.framebuffer_color_sample_counts
            & limits.framebuffer_depth_sample_counts;
        let max_samples = [
            (vk::SampleCountFlags::TYPE_16, SampleCount::S16),
            (vk::SampleCountFlags::TYPE_8, SampleCount::S8),
            (vk::SampleCountFlags::TYPE_4, SampleCount::S4),
            (vk::SampleCountFlags::TYPE_2, SampleCount::S2),
        ]
        .into_iter()
        .find(|(flag, _)| counts.contains(*flag))
        .map(|(_, s)| s)
        .unwrap_or(SampleCount::S1);

        DeviceLimits {
            adapter_name: self.name(),
            max_texture_dimension: limits.max_image_dimension2_d,
            max_anisotropy: limits.max_sampler_anisotropy,
            max_samples,
            supports_tile_memory: false,
        }
    }
}

/// Checks every physical device and returns the requested one, or the first
/// that qualifies.
pub(super) fn select_adapter(
    instance: &ash::Instance,
    requested: Option<usize>,
) -> Result<Adapter> {
    let pdevices = unsafe { instance.enumerate_physical_devices()? };
    if pdevices.is_empty() {
        return Err(GPUError::NoAdapter);
    }

    let mut found = None;
    for (idx, pdevice) in pdevices.into_iter().enumerate() {
        if requested.is_some_and(|r| r != idx) {
            continue;
        }
        match qualify(instance, pdevice)? {
            Some(adapter) => {
                log::info!("Adapter {} qualifies: {}", idx, adapter.name());
                found = Some(adapter);
                break;
            }
            None => log::debug!("Adapter {} does not qualify", idx),
        }
    }

    found.ok_or(GPUError::NoSuitableAdapter)
}

fn qualify(instance: &ash::Instance, pdevice: vk::PhysicalDevice) -> Result<Option<Adapter>> {
    let properties = unsafe { instance.get_physical_device_properties(pdevice) };

    let supports_vulkan13 = vk::api_version_major(properties.api_version) > 1
        || (vk::api_version_major(properties.api_version) == 1
            && vk::api_version_minor(properties.api_version) >= 3);
    if !supports_vulkan13 {
        return Ok(None);
    }

    let queue_prop = unsafe { instance.get_physical_device_queue_family_properties(pdevice) };
    let Some(gfx_family) = queue_prop
        .iter()
        .position(|prop| prop.queue_flags.contains(vk::QueueFlags::GRAPHICS))
    else {
        return Ok(None);
    };

    let mut features13 = vk::PhysicalDeviceVulkan13Features::default();
    let mut features2 = vk::PhysicalDeviceFeatures2::builder()
        .push_next(&mut features13)
        .build();
    unsafe { instance.get_physical_device_features2(pdevice, &mut features2) };
    if features13.dynamic_rendering != vk::TRUE
        || features2.features.sampler_anisotropy != vk::TRUE
    {
        return Ok(None);
    }

    let extensions = unsafe { instance.enumerate_device_extension_properties(pdevice) }?;

    Ok(Some(Adapter {
        pdevice,
        properties,
        features: features2.features,
        gfx_family: gfx_family as u32,
        display_capable: has_swapchain_extension(&extensions),
    }))
}

pub(super) fn has_swapchain_extension(enabled: &[vk::ExtensionProperties]) -> bool {
    enabled.iter().any(|ext| unsafe {
        CStr::from_ptr(ext.extension_name.as_ptr()) == ash::extensions::khr::Swapchain::name()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::{CStr, CString};
    use std::os::raw::c_char;

    fn make_ext(name: &CStr) -> vk::ExtensionProperties {
        let mut ext_name = [0 as c_char; vk::MAX_EXTENSION_NAME_SIZE];
        let bytes = name.to_bytes_with_nul();
        for (i, b) in bytes.iter().enumerate() {
            ext_name[i] = *b as c_char;
        }
        vk::ExtensionProperties {
            extension_name: ext_name,
            spec_version: 0,
        }
    }

    #[test]
    fn detects_swapchain_extension() {
        let swap_ext = make_ext(ash::extensions::khr::Swapchain::name());
        let other_name = CString::new("VK_OTHER_ext").unwrap();
        let other_ext = make_ext(&other_name);

        let list = [other_ext, swap_ext];
        assert!(has_swapchain_extension(&list));

        let list = [other_ext];
        assert!(!has_swapchain_extension(&list));
    }
}
