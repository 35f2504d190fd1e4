mod common;

use common::*;
use gfxdev::*;

#[test]
fn equal_descriptors_share_one_pipeline() {
    let mut device = null_device();
    let a = default_state(&mut device);
    let b = PipelineStateDescriptor::new(a.vertex_shader, a.fragment_shader);
    let target = device.target_formats();

    let first = device.create_pipeline(&a, target).unwrap();
    let second = device.create_pipeline(&b, target).unwrap();
    assert_eq!(first, second);
    assert_eq!(device.pipeline_count(), 1);
    assert_eq!(device.backend().stats.pipelines_created, 1);
}

#[test]
fn cull_mode_alone_splits_the_cache() {
    let mut device = null_device();
    let back = default_state(&mut device);
    let mut raster = back.raster;
    raster.culling = CullMode::None;
    let none = back.with_raster(raster);
    let target = device.target_formats();

    let p0 = device.create_pipeline(&back, target).unwrap();
    let p1 = device.create_pipeline(&none, target).unwrap();
    assert_ne!(p0, p1);
    assert_eq!(device.pipeline_count(), 2);

    assert_eq!(device.create_pipeline(&back, target).unwrap(), p0);
    assert_eq!(device.pipeline_count(), 2);
}

#[test]
fn target_formats_are_part_of_the_key() {
    let mut device = null_device();
    let state = default_state(&mut device);
    let primary = device.target_formats();
    let offscreen = TargetFormats {
        color: Format::RGBA8,
        depth: None,
        samples: SampleCount::S1,
    };

    let p0 = device.create_pipeline(&state, primary).unwrap();
    let p1 = device.create_pipeline(&state, offscreen).unwrap();
    assert_ne!(p0, p1);
    assert_eq!(device.pipeline_count(), 2);
}

type Mutation = fn(&mut PipelineStateDescriptor);

/// Every field of the descriptor, each changed away from its default alone.
const SINGLE_FIELD_CHANGES: &[(&str, Mutation)] = &[
    ("vertex_format", |d| d.vertex_format = VertexFormat::Skinned),
    ("culling", |d| d.raster.culling = CullMode::None),
    ("front_face", |d| d.raster.front_face = VertexOrdering::CounterClockwise),
    ("depth_bias_enable", |d| d.raster.depth_bias_enable = true),
    ("depth_bias_constant", |d| d.raster.depth_bias_constant = 1.0),
    ("depth_bias_slope", |d| d.raster.depth_bias_slope = 1.0),
    ("depth_clamp_enable", |d| d.raster.depth_clamp_enable = true),
    ("polygon_mode", |d| d.raster.polygon_mode = PolygonMode::Line),
    ("line_width", |d| d.raster.line_width = 2.0),
    ("blend.enable", |d| d.blend.enable = true),
    ("src_blend", |d| d.blend.src_blend = BlendFactor::SrcAlpha),
    ("dst_blend", |d| d.blend.dst_blend = BlendFactor::InvSrcAlpha),
    ("blend_op", |d| d.blend.blend_op = BlendOp::Subtract),
    ("src_alpha_blend", |d| d.blend.src_alpha_blend = BlendFactor::SrcAlpha),
    ("dst_alpha_blend", |d| d.blend.dst_alpha_blend = BlendFactor::One),
    ("alpha_blend_op", |d| d.blend.alpha_blend_op = BlendOp::Max),
    ("write_mask.r", |d| d.blend.write_mask.r = false),
    ("write_mask.a", |d| d.blend.write_mask.a = false),
    ("should_test", |d| d.depth_stencil.should_test = false),
    ("should_write", |d| d.depth_stencil.should_write = false),
    ("depth compare_op", |d| d.depth_stencil.compare_op = CompareOp::LessOrEqual),
    ("bounds_test_enable", |d| d.depth_stencil.bounds_test_enable = true),
    ("min_depth_bounds", |d| d.depth_stencil.min_depth_bounds = 0.25),
    ("max_depth_bounds", |d| d.depth_stencil.max_depth_bounds = 0.75),
    ("stencil_test_enable", |d| d.depth_stencil.stencil_test_enable = true),
    ("front.fail_op", |d| d.depth_stencil.front.fail_op = StencilOp::Zero),
    ("front.pass_op", |d| d.depth_stencil.front.pass_op = StencilOp::Replace),
    ("front.depth_fail_op", |d| d.depth_stencil.front.depth_fail_op = StencilOp::Invert),
    ("front.compare_op", |d| d.depth_stencil.front.compare_op = CompareOp::Always),
    ("front.compare_mask", |d| d.depth_stencil.front.compare_mask = 0xF),
    ("front.write_mask", |d| d.depth_stencil.front.write_mask = 0xF),
    ("front.reference", |d| d.depth_stencil.front.reference = 3),
    ("back.fail_op", |d| d.depth_stencil.back.fail_op = StencilOp::Zero),
    ("back.pass_op", |d| d.depth_stencil.back.pass_op = StencilOp::Replace),
    ("back.depth_fail_op", |d| d.depth_stencil.back.depth_fail_op = StencilOp::Invert),
    ("back.compare_op", |d| d.depth_stencil.back.compare_op = CompareOp::Always),
    ("back.compare_mask", |d| d.depth_stencil.back.compare_mask = 0xF),
    ("back.write_mask", |d| d.depth_stencil.back.write_mask = 0xF),
    ("back.reference", |d| d.depth_stencil.back.reference = 3),
];

#[test]
fn any_single_field_change_misses() {
    let mut device = null_device();
    let base = default_state(&mut device);
    let target = device.target_formats();
    let base_pipeline = device.create_pipeline(&base, target).unwrap();

    let mut built = Vec::new();
    for (field, mutate) in SINGLE_FIELD_CHANGES {
        let mut state = base;
        mutate(&mut state);
        assert_ne!(state, base, "{} did not change the descriptor", field);

        let before = device.pipeline_count();
        let pipeline = device.create_pipeline(&state, target).unwrap();
        assert_eq!(device.pipeline_count(), before + 1, "{} hit the cache", field);
        assert_ne!(pipeline, base_pipeline, "{}", field);
        built.push((state, pipeline));
    }

    // Asking again for any of them is a hit.
    let count = device.pipeline_count();
    for (state, pipeline) in &built {
        assert_eq!(device.create_pipeline(state, target).unwrap(), *pipeline);
    }
    assert_eq!(device.create_pipeline(&base, target).unwrap(), base_pipeline);
    assert_eq!(device.pipeline_count(), count);
    assert_eq!(
        device.backend().stats.pipelines_created as usize,
        SINGLE_FIELD_CHANGES.len() + 1
    );
}

#[test]
fn failed_builds_are_not_cached() {
    let mut device = null_device();
    let state = default_state(&mut device);
    let target = device.target_formats();

    device.backend_mut().fail_pipeline_builds(1);
    assert!(device.create_pipeline(&state, target).is_err());
    assert_eq!(device.pipeline_count(), 0);

    device.create_pipeline(&state, target).unwrap();
    assert_eq!(device.pipeline_count(), 1);
}

#[test]
fn unknown_or_mismatched_shaders_are_rejected() {
    let mut device = null_device();
    let state = default_state(&mut device);
    let target = device.target_formats();

    let swapped = PipelineStateDescriptor::new(state.fragment_shader, state.vertex_shader);
    assert!(matches!(
        device.create_pipeline(&swapped, target),
        Err(GPUError::UnknownShader(_))
    ));

    let missing = PipelineStateDescriptor::new(state.vertex_shader, ShaderId(40));
    assert!(matches!(
        device.create_pipeline(&missing, target),
        Err(GPUError::UnknownShader(ShaderId(40)))
    ));
    assert_eq!(device.pipeline_count(), 0);
}

#[test]
fn shutdown_destroys_cached_pipelines() {
    let mut device = null_device();
    let state = default_state(&mut device);
    let target = device.target_formats();
    device.create_pipeline(&state, target).unwrap();
    assert_eq!(device.backend().live.pipelines, 1);

    device.shutdown();
    assert_eq!(device.backend().live.pipelines, 0);
    assert_eq!(device.pipeline_count(), 0);
}
