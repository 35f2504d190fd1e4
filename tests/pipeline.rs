mod common;

use common::*;
use gfxdev::gpu::null::NullBackend;
use gfxdev::*;
use glam::Mat4;

fn pipeline() -> Pipeline<NullBackend> {
    init_logging();
    let mut pipe = Pipeline::new(NullBackend::new());
    assert!(pipe.init(ContextInfo::default()), "{}", pipe.error_string());
    pipe
}

fn shaders(pipe: &mut Pipeline<NullBackend>) -> PipelineStateDescriptor {
    let vs = pipe
        .register_shader(ShaderStage::Vertex, &FAKE_SPIRV)
        .unwrap();
    let fs = pipe
        .register_shader(ShaderStage::Fragment, &FAKE_SPIRV)
        .unwrap();
    PipelineStateDescriptor::new(vs, fs)
}

fn span<'a>(group: &'a MemoryBufferGroup, state: PipelineStateDescriptor) -> DrawSpan<'a> {
    DrawSpan {
        group,
        vertex_buffer: 0,
        index_buffer: 0,
        first_index: 0,
        index_count: 6,
        base_vertex: 0,
        state,
        local_to_world: Mat4::IDENTITY,
        texture: None,
    }
}

#[test]
fn same_buffer_drawn_twice_builds_once() {
    let mut pipe = pipeline();
    let state = shaders(&mut pipe);
    let group = quad_group(1);

    assert!(pipe.begin_render());
    assert!(pipe.render(&span(&group, state)));
    assert!(pipe.render(&span(&group, state)));
    assert!(pipe.end_render());

    let stats = &pipe.device().backend().stats;
    // One vertex and one index buffer.
    assert_eq!(stats.buffers_created, 2);
    assert_eq!(stats.draws.len(), 2);
    assert_eq!(stats.pipelines_created, 1);
    assert_eq!(stats.submits, 1);
    assert_eq!(stats.draws[0].vertex_buffer, stats.draws[1].vertex_buffer);
    assert!(pipe.device().current_command_buffer().is_none());
}

#[test]
fn cull_mode_change_builds_a_second_pipeline() {
    let mut pipe = pipeline();
    let state = shaders(&mut pipe);
    let mut raster = state.raster;
    raster.culling = CullMode::Front;
    let group = quad_group(2);

    assert!(pipe.begin_render());
    pipe.render(&span(&group, state));
    pipe.render(&span(&group, state.with_raster(raster)));
    pipe.end_render();

    let stats = &pipe.device().backend().stats;
    assert_eq!(stats.pipelines_created, 2);
    assert_ne!(stats.draws[0].pipeline, stats.draws[1].pipeline);
}

#[test]
fn invalidated_groups_rebuild_on_next_draw() {
    let mut pipe = pipeline();
    let state = shaders(&mut pipe);
    let group = quad_group(3);

    pipe.begin_render();
    pipe.render(&span(&group, state));
    pipe.end_render();

    pipe.invalidate_group(group.key());
    pipe.begin_render();
    pipe.render(&span(&group, state));
    pipe.end_render();

    assert_eq!(pipe.device().backend().stats.buffers_created, 4);
    assert_eq!(pipe.device().backend().live.buffers, 2);

    pipe.destroy_group(group.key());
    assert_eq!(pipe.device().backend().live.buffers, 0);
}

#[test]
fn destroying_a_group_frees_unlinked_refs_too() {
    let mut pipe = pipeline();
    let group = quad_group(11);
    let v = pipe.check_vertex_buffer_ref(&group, 0).unwrap();
    let i = pipe.check_index_buffer_ref(&group, 0).unwrap();
    pipe.device_mut().unlink_vertex_ref(v);
    pipe.device_mut().unlink_index_ref(i);
    assert_eq!(pipe.device().backend().live.buffers, 2);

    pipe.destroy_group(group.key());
    assert_eq!(pipe.device().backend().live.buffers, 0);

    // The next draw of the group starts from fresh refs.
    let state = shaders(&mut pipe);
    pipe.begin_render();
    assert!(pipe.render(&span(&group, state)));
    pipe.end_render();
    assert_eq!(pipe.device().backend().live.buffers, 2);
}

#[test]
fn volatile_groups_refill_every_frame() {
    let mut pipe = pipeline();
    let state = shaders(&mut pipe);
    let mut group = quad_group(4);
    group.volatile = true;

    for _ in 0..3 {
        assert!(pipe.begin_render());
        pipe.render(&span(&group, state));
        pipe.render(&span(&group, state));
        pipe.end_render();
    }
    // Vertex and index buffers once per frame.
    assert_eq!(pipe.device().backend().stats.buffers_created, 6);
    assert_eq!(pipe.device().backend().stats.draws.len(), 6);
}

#[test]
fn failed_uploads_skip_the_draw_only() {
    let mut pipe = pipeline();
    let state = shaders(&mut pipe);
    let bad = quad_group(5);
    let good = quad_group(6);

    pipe.begin_render();
    pipe.device_mut().backend_mut().fail_buffer_allocations(1);
    assert!(!pipe.render(&span(&bad, state)));
    assert!(pipe.render(&span(&good, state)));
    assert!(pipe.end_render());
    assert_eq!(pipe.device().backend().stats.draws.len(), 1);

    // The failed ref stays dirty and is retried.
    pipe.begin_render();
    assert!(pipe.render(&span(&bad, state)));
    pipe.end_render();
}

#[test]
fn textured_spans_bind_a_bank_sampler() {
    let mut pipe = pipeline();
    let state = shaders(&mut pipe);
    let group = quad_group(7);
    let image = Mipmap::new(TextureKey(1), 16, 16, Format::RGBA8).with_full_chain();

    let mut textured = span(&group, state);
    textured.texture = Some((&image, ClampFlags::CLAMP_U));
    pipe.begin_render();
    assert!(pipe.render(&textured));
    assert!(pipe.render(&textured));
    pipe.end_render();

    let expected = pipe
        .device()
        .sampler_state_for_clamp_flags(ClampFlags::CLAMP_U);
    let stats = &pipe.device().backend().stats;
    assert_eq!(stats.textures_created, 1);
    assert_eq!(stats.draws[0].texture.map(|(_, s)| s), Some(expected));

    pipe.invalidate_texture(image.key);
    pipe.begin_render();
    pipe.render(&textured);
    pipe.end_render();
    assert_eq!(pipe.device().backend().stats.textures_created, 2);
    assert_eq!(pipe.device().backend().live.textures, 1);

    pipe.destroy_texture(image.key);
    assert_eq!(pipe.device().backend().live.textures, 0);
}

#[test]
fn zbias_scale_reaches_the_pipeline_key() {
    let mut pipe = pipeline();
    let state = shaders(&mut pipe);
    let mut raster = state.raster;
    raster.depth_bias_enable = true;
    raster.depth_bias_constant = 1.0;
    let biased = state.with_raster(raster);
    let group = quad_group(8);

    pipe.begin_render();
    pipe.render(&span(&group, biased));
    pipe.set_zbias_scale(4.0);
    pipe.render(&span(&group, biased));
    // Unbiased states ignore the scale.
    pipe.render(&span(&group, state));
    pipe.render(&span(&group, state));
    pipe.end_render();

    assert_eq!(pipe.zbias_scale(), 4.0);
    assert_eq!(pipe.device().backend().stats.pipelines_created, 3);
}

#[test]
fn clears_are_recorded_before_the_first_draw() {
    let mut pipe = pipeline();
    let state = shaders(&mut pipe);
    let group = quad_group(9);

    pipe.begin_render();
    pipe.clear_render_target(Some([0.1, 0.2, 0.3, 1.0]), Some(1.0));
    pipe.render(&span(&group, state));
    pipe.render(&span(&group, state));
    pipe.end_render();

    let stats = &pipe.device().backend().stats;
    assert_eq!(stats.clears.len(), 1);
    assert_eq!(stats.clears[0].color, Some([0.1, 0.2, 0.3, 1.0]));
}

#[test]
fn capabilities_are_fixed() {
    let pipe = pipeline();
    assert_eq!(pipe.max_anisotropic_samples(), 16);
    assert_eq!(pipe.max_anti_alias(), 8);
    assert_eq!(pipe.supported_color_depths(), &[32]);
    assert_eq!(pipe.color_depth(), 32);
    assert!(!pipe.supports_tile_memory());
}

#[test]
fn failed_init_reports_why() {
    init_logging();
    let mut pipe = Pipeline::new(NullBackend::new().with_adapters(0));
    assert!(!pipe.init(ContextInfo::default()));
    assert_eq!(pipe.error_string(), "Failed to find GPUs with Vulkan support");
    assert_eq!(pipe.device().state(), DeviceState::Uninitialized);
}

#[test]
fn shutdown_forgets_every_ref() {
    let mut pipe = pipeline();
    let state = shaders(&mut pipe);
    let group = quad_group(10);
    pipe.begin_render();
    pipe.render(&span(&group, state));
    pipe.end_render();

    pipe.shutdown();
    assert_eq!(pipe.device().backend().live.total(), 0);
    pipe.shutdown();

    assert!(pipe.init(ContextInfo::default()));
    let state = shaders(&mut pipe);
    pipe.begin_render();
    assert!(pipe.render(&span(&group, state)));
    pipe.end_render();
}
