//! Runs against whatever Vulkan driver the machine has. Machines without one
//! only check that init fails cleanly.
#![cfg(feature = "gfxdev-vulkan")]

mod common;

use common::*;
use gfxdev::gpu::vulkan::VulkanBackend;
use gfxdev::*;
use serial_test::serial;

fn headless() -> Option<Device<VulkanBackend>> {
    init_logging();
    let mut device = Device::new(VulkanBackend::new());
    match device.init_device(ContextInfo::default()) {
        Ok(()) => Some(device),
        Err(err) => {
            log::warn!("No usable Vulkan device, skipping: {}", err);
            assert_eq!(device.state(), DeviceState::Uninitialized);
            assert!(!device.error_string().is_empty());
            assert!(!device.backend().is_initialized());
            None
        }
    }
}

#[test]
#[serial]
fn init_and_shutdown() {
    let Some(mut device) = headless() else {
        return;
    };
    assert!(device.backend().is_initialized());
    assert!(!device.limits().adapter_name.is_empty());

    device.shutdown();
    assert!(!device.backend().is_initialized());
    device.shutdown();
}

#[test]
#[serial]
fn buffers_upload_and_rebuild() {
    let Some(mut device) = headless() else {
        return;
    };
    let group = quad_group(1);
    let v = device.setup_vertex_buffer_ref(&group, 0);
    let i = device.setup_index_buffer_ref(&group, 0);

    assert!(device.check_vertex_buffer(v, &group).unwrap());
    assert!(device.check_index_buffer(i, &group).unwrap());
    assert!(device.vertex_ref(v).buffer().is_some());
    assert!(device.index_ref(i).buffer().is_some());

    device.vertex_ref_mut(v).set_dirty(true);
    assert!(device.check_vertex_buffer(v, &group).unwrap());

    device.destroy_vertex_ref(v);
    device.destroy_index_ref(i);
    device.shutdown();
}

#[test]
#[serial]
fn texture_uploads_its_chain() {
    let Some(mut device) = headless() else {
        return;
    };
    let image = Mipmap::new(TextureKey(1), 64, 32, Format::RGBA8).with_full_chain();
    let t = device.setup_texture_ref(image.key);
    assert!(device.check_texture_ref(t, &image).unwrap());
    assert!(!device.check_texture_ref(t, &image).unwrap());

    device.destroy_texture_ref(t);
    device.shutdown();
}

#[test]
#[serial]
fn clear_and_submit() {
    let Some(mut device) = headless() else {
        return;
    };
    assert!(device.begin_render());
    device.create_command_buffer().unwrap();
    device.clear_render_target(Some([0.0, 0.0, 0.0, 1.0]), Some(1.0));
    device.submit_command_buffer().unwrap();
    assert!(device.current_command_buffer().is_none());
    assert!(device.pending_clear().is_empty());

    // Switching the primary format rebuilds the offscreen target.
    device.set_framebuffer_format(Format::RGBA8).unwrap();
    device.resize(Extent {
        width: 320,
        height: 240,
    })
    .unwrap();
    device.shutdown();
}

#[test]
#[serial]
fn pipeline_facade_reports_init_errors() {
    init_logging();
    let mut pipe = Pipeline::new(VulkanBackend::new());
    let ok = pipe.init(ContextInfo::default());
    assert_eq!(ok, pipe.error_string().is_empty());
    pipe.shutdown();
}
