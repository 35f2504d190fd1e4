mod common;

use common::*;
use gfxdev::gpu::null::NullBackend;
use gfxdev::*;

#[test]
fn zero_adapters_leave_device_uninitialized() {
    init_logging();
    let mut device = Device::new(NullBackend::new().with_adapters(0));
    assert!(device.init_device(ContextInfo::default()).is_err());
    assert_eq!(device.state(), DeviceState::Uninitialized);
    assert_eq!(
        device.error_string(),
        "Failed to find GPUs with Vulkan support"
    );
    assert!(!device.backend().is_initialized());
}

#[test]
fn out_of_range_adapter_is_rejected() {
    init_logging();
    let mut device = Device::new(NullBackend::new().with_adapters(2));
    let info = ContextInfo {
        adapter: Some(5),
        ..Default::default()
    };
    assert!(matches!(
        device.init_device(info),
        Err(GPUError::NoSuitableAdapter)
    ));
    assert!(!device.error_string().is_empty());

    device.init_device(ContextInfo::default()).unwrap();
    assert!(device.is_initialized());
    assert!(device.error_string().is_empty());
}

#[test]
fn init_builds_the_sampler_bank() {
    let device = null_device();
    assert_eq!(device.backend().live.samplers, SAMPLER_COUNT as u32);
    assert_eq!(device.limits().adapter_name, "null");

    let wrap = device.sampler_state_for_clamp_flags(ClampFlags::empty());
    let clamp = device.sampler_state_for_clamp_flags(ClampFlags::CLAMP_U | ClampFlags::CLAMP_V);
    assert_ne!(wrap, clamp);
    assert_eq!(
        clamp,
        device.sampler_state_for_clamp_flags(ClampFlags::CLAMP_U | ClampFlags::CLAMP_V)
    );
}

#[test]
fn shutdown_releases_everything_and_is_idempotent() {
    let mut device = null_device();
    let state = default_state(&mut device);
    let group = quad_group(1);
    let v = device.setup_vertex_buffer_ref(&group, 0);
    let i = device.setup_index_buffer_ref(&group, 0);
    device.fill_vertex_buffer_ref(v, &group).unwrap();
    device.fill_index_buffer_ref(i, &group).unwrap();
    device
        .draw(&DrawRequest {
            vertex: v,
            index: i,
            texture: None,
            state,
            first_index: 0,
            index_count: 6,
            base_vertex: 0,
        })
        .unwrap();
    assert!(device.current_command_buffer().is_some());

    device.shutdown();
    assert_eq!(device.state(), DeviceState::Uninitialized);
    assert_eq!(device.backend().live.total(), 0);
    assert_eq!(device.backend().stats.submits, 1);
    assert!(!device.backend().is_initialized());

    device.shutdown();
    assert_eq!(device.state(), DeviceState::Uninitialized);
}

#[test]
fn device_can_be_reinitialized_after_shutdown() {
    let mut device = null_device();
    device.shutdown();
    device.init_device(ContextInfo::default()).unwrap();
    assert!(device.is_initialized());
    assert_eq!(device.backend().live.samplers, SAMPLER_COUNT as u32);
}

#[test]
#[should_panic(expected = "init_device called while Initialized")]
fn double_init_panics() {
    let mut device = null_device();
    let _ = device.init_device(ContextInfo::default());
}

#[test]
fn dirty_refs_rebuild_once() {
    let mut device = null_device();
    let group = quad_group(2);
    let v = device.setup_vertex_buffer_ref(&group, 0);
    assert!(device.vertex_ref(v).is_dirty());
    assert_eq!(device.vertex_ref(v).count, 100);

    assert!(device.check_vertex_buffer(v, &group).unwrap());
    assert!(!device.check_vertex_buffer(v, &group).unwrap());
    assert_eq!(device.vertex_ref(v).state.rebuilds(), 1);
    assert_eq!(device.backend().live.buffers, 1);

    device.vertex_ref_mut(v).set_dirty(true);
    device.check_static_vertex_buffer(v, &group).unwrap();
    assert_eq!(device.vertex_ref(v).state.rebuilds(), 2);
    assert_eq!(device.backend().live.buffers, 1);
}

#[test]
fn volatile_refs_rebuild_every_frame() {
    let mut device = null_device();
    let mut group = quad_group(3);
    group.volatile = true;
    let v = device.setup_vertex_buffer_ref(&group, 0);
    assert!(device.vertex_ref(v).volatile());

    assert!(device.check_vertex_buffer(v, &group).unwrap());
    assert!(!device.check_vertex_buffer(v, &group).unwrap());

    device.next_frame();
    assert!(device.check_vertex_buffer(v, &group).unwrap());
    assert_eq!(device.vertex_ref(v).state.rebuilds(), 2);
    assert_eq!(device.vertex_ref(v).state.ref_time(), device.frame());

    // Static checks leave volatile refs to the per-frame path.
    device.next_frame();
    device.check_static_vertex_buffer(v, &group).unwrap();
    assert_eq!(device.vertex_ref(v).state.rebuilds(), 2);
}

#[test]
fn failed_fill_leaves_ref_dirty_and_empty() {
    let mut device = null_device();
    let group = quad_group(4);
    let v = device.setup_vertex_buffer_ref(&group, 0);
    device.fill_vertex_buffer_ref(v, &group).unwrap();

    device.vertex_ref_mut(v).set_dirty(true);
    device.backend_mut().fail_buffer_allocations(1);
    assert!(matches!(
        device.fill_vertex_buffer_ref(v, &group),
        Err(GPUError::OutOfMemory(_))
    ));
    assert!(device.vertex_ref(v).is_dirty());
    assert!(device.vertex_ref(v).buffer().is_none());
    assert_eq!(device.backend().live.buffers, 0);

    assert!(device.check_vertex_buffer(v, &group).unwrap());
    assert!(device.vertex_ref(v).buffer().is_some());
}

#[test]
fn failed_rebuild_of_a_clean_ref_is_retried() {
    let mut device = null_device();
    let group = quad_group(12);
    let v = device.setup_vertex_buffer_ref(&group, 0);
    let i = device.setup_index_buffer_ref(&group, 0);
    assert!(device.check_vertex_buffer(v, &group).unwrap());
    assert!(device.check_index_buffer(i, &group).unwrap());
    assert!(!device.vertex_ref(v).is_dirty());

    device.backend_mut().fail_buffer_allocations(2);
    assert!(device.fill_vertex_buffer_ref(v, &group).is_err());
    assert!(device.fill_index_buffer_ref(i, &group).is_err());
    assert!(device.vertex_ref(v).is_dirty());
    assert!(device.index_ref(i).is_dirty());

    assert!(device.check_vertex_buffer(v, &group).unwrap());
    assert!(device.check_index_buffer(i, &group).unwrap());
    assert!(device.vertex_ref(v).buffer().is_some());
    assert!(device.index_ref(i).buffer().is_some());
}

#[test]
fn failed_texture_rebuild_is_retried() {
    let mut device = null_device();
    let image = Mipmap::new(TextureKey(5), 8, 8, Format::RGBA8).with_full_chain();
    let t = device.setup_texture_ref(image.key);
    assert!(device.check_texture_ref(t, &image).unwrap());

    let mut broken = image.clone();
    broken.levels[0].truncate(1);
    assert!(device.make_texture_ref(t, &broken).is_err());
    assert!(device.texture_ref(t).is_dirty());
    assert!(device.texture_ref(t).texture().is_none());

    assert!(device.check_texture_ref(t, &image).unwrap());
    assert!(device.texture_ref(t).texture().is_some());
    assert_eq!(device.backend().live.textures, 1);
}

#[test]
fn missing_streams_are_invalid_sources() {
    let mut device = null_device();
    let group = quad_group(5);
    let v = device.setup_vertex_buffer_ref(&group, 3);
    assert!(matches!(
        device.fill_vertex_buffer_ref(v, &group),
        Err(GPUError::InvalidSource(_))
    ));
}

#[test]
#[should_panic(expected = "already linked")]
fn linking_a_linked_ref_panics() {
    let mut device = null_device();
    let group = quad_group(6);
    let v = device.setup_vertex_buffer_ref(&group, 0);
    device.link_vertex_ref(v);
}

#[test]
fn invalidate_all_only_touches_linked_refs() {
    let mut device = null_device();
    let group = quad_group(7);
    let a = device.setup_vertex_buffer_ref(&group, 0);
    let b = device.setup_index_buffer_ref(&group, 0);
    device.fill_vertex_buffer_ref(a, &group).unwrap();
    device.fill_index_buffer_ref(b, &group).unwrap();

    device.unlink_index_ref(b);
    assert_eq!(device.linked_ref_counts(), (1, 0, 0, 0));
    device.invalidate_all();
    assert!(device.vertex_ref(a).is_dirty());
    assert!(!device.index_ref(b).is_dirty());

    device.link_index_ref(b);
    assert!(device.is_vertex_ref_linked(a));
    assert_eq!(device.linked_ref_counts(), (1, 1, 0, 0));
}

#[test]
fn destroying_a_group_frees_its_buffers() {
    let mut device = null_device();
    let group = quad_group(8);
    let other = quad_group(9);
    for g in [&group, &other] {
        let v = device.setup_vertex_buffer_ref(g, 0);
        device.fill_vertex_buffer_ref(v, g).unwrap();
    }
    assert_eq!(device.backend().live.buffers, 2);

    device.destroy_group_refs(group.key());
    assert_eq!(device.backend().live.buffers, 1);
    assert_eq!(device.linked_ref_counts().0, 1);
}

#[test]
fn textures_skip_levels_over_the_device_limit() {
    init_logging();
    let limits = DeviceLimits {
        max_texture_dimension: 64,
        ..Default::default()
    };
    let mut device = Device::new(NullBackend::new().with_limits(limits));
    device.init_device(ContextInfo::default()).unwrap();

    let image = Mipmap::new(TextureKey(1), 256, 256, Format::RGBA8).with_full_chain();
    let t = device.setup_texture_ref(image.key);
    device.make_texture_ref(t, &image).unwrap();

    let tref = device.texture_ref(t);
    assert_eq!(tref.first_level, 2);
    assert_eq!((tref.width, tref.height), (64, 64));
    assert_eq!(tref.levels, 7);
    assert!(!tref.is_dirty());
}

#[test]
fn compressed_textures_drop_sub_block_levels() {
    let mut device = null_device();
    let image = Mipmap::new(TextureKey(2), 32, 32, Format::BC1).with_full_chain();
    let t = device.setup_texture_ref(image.key);
    // 32, 16, 8, 4 stay; 2 and 1 are smaller than a block.
    assert_eq!(device.configure_allowed_levels(t, &image), 4);
    assert!(device.texture_ref(t).compressed);
}

#[test]
fn truncated_levels_are_rejected() {
    let mut device = null_device();
    let mut image = Mipmap::new(TextureKey(3), 8, 8, Format::RGBA8).with_full_chain();
    image.levels[1].truncate(3);
    let t = device.setup_texture_ref(image.key);
    assert!(matches!(
        device.make_texture_ref(t, &image),
        Err(GPUError::InvalidSource(_))
    ));
    assert_eq!(device.backend().live.textures, 0);
}

#[test]
fn cubemaps_upload_six_layers() {
    let mut device = null_device();
    let face = Mipmap::new(TextureKey(4), 16, 16, Format::RGBA8).with_full_chain();
    let cube = CubicEnvironmap {
        key: TextureKey(4),
        faces: std::array::from_fn(|_| face.clone()),
    };
    let t = device.setup_cubic_texture_ref(cube.key);
    device.make_cubic_texture_ref(t, &cube).unwrap();
    assert_eq!(device.backend().stats.textures_created, 1);

    let mut odd = cube.clone();
    odd.faces[3] = Mipmap::new(TextureKey(4), 8, 8, Format::RGBA8).with_full_chain();
    assert!(device.make_cubic_texture_ref(t, &odd).is_err());
}

#[test]
fn uniform_refs_follow_their_source_flag() {
    let mut device = null_device();
    let flag = DirtyFlag::new(false);
    let u = device.setup_uniform_ref(flag.clone());

    assert!(device.check_uniform_ref(u, || vec![0u8; 16]).unwrap());
    assert!(!device
        .check_uniform_ref(u, || panic!("clean refs don't read their data"))
        .unwrap());

    flag.set();
    assert!(device.check_uniform_ref(u, || vec![1u8; 32]).unwrap());
    assert_eq!(device.uniform_ref(u).size, 32);
    assert_eq!(device.backend().live.buffers, 1);

    device.destroy_uniform_ref(u);
    assert_eq!(device.backend().live.buffers, 0);
}

#[test]
fn submit_clears_the_current_command_buffer() {
    let mut device = null_device();
    let cmd = device.create_command_buffer().unwrap();
    assert_eq!(device.create_command_buffer().unwrap(), cmd);
    assert_eq!(device.current_command_buffer(), Some(cmd));

    device.clear_render_target(Some([0.0, 0.0, 0.0, 1.0]), Some(1.0));
    device.submit_command_buffer().unwrap();
    assert_eq!(device.current_command_buffer(), None);
    assert!(device.pending_clear().is_empty());

    let stats = &device.backend().stats;
    assert_eq!(stats.submits, 1);
    assert_eq!(stats.clears.len(), 1);
    assert_eq!(stats.clears[0].depth, Some(1.0));
}

#[test]
fn failed_clear_still_closes_the_scope() {
    let mut device = null_device();
    device.create_command_buffer().unwrap();
    device.clear_render_target(Some([0.0; 4]), None);
    device.backend_mut().fail_clears(1);

    assert!(device.submit_command_buffer().is_err());
    assert_eq!(device.current_command_buffer(), None);
    assert!(device.pending_clear().is_empty());
    assert_eq!(device.backend().live.command_buffers, 0);
    assert_eq!(device.backend().stats.submits, 1);
}

#[test]
fn clear_without_scope_is_dropped_at_submit() {
    let mut device = null_device();
    device.clear_render_target(Some([1.0; 4]), None);
    device.submit_command_buffer().unwrap();
    assert!(device.pending_clear().is_empty());
    assert_eq!(device.backend().stats.submits, 0);
}

#[test]
fn draws_carry_the_current_matrices() {
    let mut device = null_device();
    let state = default_state(&mut device);
    let group = quad_group(10);
    let v = device.setup_vertex_buffer_ref(&group, 0);
    let i = device.setup_index_buffer_ref(&group, 0);
    device.fill_vertex_buffer_ref(v, &group).unwrap();
    device.fill_index_buffer_ref(i, &group).unwrap();

    let proj = glam::Mat4::perspective_rh(1.0, 1.0, 0.1, 100.0);
    let view = glam::Mat4::from_translation(glam::Vec3::new(0.0, 0.0, -5.0));
    let model = glam::Mat4::from_scale(glam::Vec3::splat(2.0));
    device.set_projection_matrix(proj);
    device.set_world_to_camera_matrix(view);
    device.set_local_to_world_matrix(model);

    let req = DrawRequest {
        vertex: v,
        index: i,
        texture: None,
        state,
        first_index: 0,
        index_count: 6,
        base_vertex: 0,
    };
    device.draw(&req).unwrap();

    let draw = &device.backend().stats.draws[0];
    assert_eq!(draw.transforms.world_to_ndc, proj * view);
    assert_eq!(draw.transforms.local_to_world, model);
    assert_eq!(draw.index_count, 6);
    assert!(!device.vertex_ref(v).state.rebuilt_since_used());
}

#[test]
fn drawing_an_unbuilt_ref_fails() {
    let mut device = null_device();
    let state = default_state(&mut device);
    let group = quad_group(11);
    let v = device.setup_vertex_buffer_ref(&group, 0);
    let i = device.setup_index_buffer_ref(&group, 0);
    device.fill_index_buffer_ref(i, &group).unwrap();

    let req = DrawRequest {
        vertex: v,
        index: i,
        texture: None,
        state,
        first_index: 0,
        index_count: 6,
        base_vertex: 0,
    };
    assert!(matches!(
        device.draw(&req),
        Err(GPUError::RefNotBuilt("vertex"))
    ));
}

#[test]
fn render_target_switch_updates_formats_and_viewport() {
    let mut device = null_device();
    let primary = device.target_formats();
    let offscreen = RenderTargetInfo {
        extent: Extent {
            width: 256,
            height: 128,
        },
        formats: TargetFormats {
            color: Format::RGBA8,
            depth: None,
            samples: SampleCount::S1,
        },
    };

    device.set_render_target(Some(offscreen)).unwrap();
    assert_eq!(device.target_formats(), offscreen.formats);
    assert_eq!(device.viewport().width, 256.0);

    device.set_render_target(None).unwrap();
    assert_eq!(device.target_formats(), primary);
    assert_eq!(device.viewport().width, 1280.0);

    device
        .resize(Extent {
            width: 640,
            height: 480,
        })
        .unwrap();
    assert_eq!(device.viewport().height, 480.0);
    device.set_framebuffer_format(Format::RGBA8).unwrap();
    assert_eq!(device.target_formats().color, Format::RGBA8);
}

#[test]
fn headless_devices_reject_swap_surfaces() {
    struct NoWindow;
    unsafe impl raw_window_handle::HasRawWindowHandle for NoWindow {
        fn raw_window_handle(&self) -> raw_window_handle::RawWindowHandle {
            raw_window_handle::RawWindowHandle::Xlib(raw_window_handle::XlibHandle::empty())
        }
    }

    let mut device = null_device();
    assert!(matches!(
        device.create_swap_surface(&NoWindow),
        Err(GPUError::HeadlessDisplayNotSupported)
    ));
    assert!(!device.has_swap_surface());
    device.present().unwrap();
    assert_eq!(device.backend().stats.presents, 0);
}

#[test]
fn only_one_thread_drives_the_device() {
    let mut device = null_device();
    assert!(device.begin_render());
    let me = std::thread::current().id();
    assert_eq!(device.active_thread(), Some(me));

    let device = std::thread::scope(|s| {
        s.spawn(move || {
            let mut device = device;
            assert!(!device.begin_render());
            device
        })
        .join()
        .unwrap()
    });

    let mut device = device;
    device.release_context();
    assert_eq!(device.active_thread(), None);

    let device = std::thread::scope(|s| {
        s.spawn(move || {
            let mut device = device;
            assert!(device.begin_render());
            let cmd = device.create_command_buffer().unwrap();
            assert_eq!(device.current_command_buffer(), Some(cmd));
            device.submit_command_buffer().unwrap();
            device.release_context();
            device
        })
        .join()
        .unwrap()
    });

    let mut device = device;
    assert!(device.begin_render());
    device.shutdown();
}

#[test]
#[should_panic(expected = "owns it")]
fn destroying_a_group_without_owning_the_device_panics() {
    let mut device = null_device();
    device.release_context();
    device.destroy_group_refs(GroupKey(1));
}

#[test]
#[should_panic(expected = "while Uninitialized")]
fn operations_before_init_panic() {
    let mut device = Device::new(NullBackend::new());
    device.create_command_buffer().unwrap();
}
