#![allow(dead_code)]

use gfxdev::gpu::null::NullBackend;
use gfxdev::*;

/// Routes `log` output through the test harness.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Smallest word stream the null backend accepts as a module.
pub const FAKE_SPIRV: [u32; 5] = [0x0723_0203, 0x0001_0000, 0, 1, 0];

/// 100 standard vertices and two triangles over them.
pub fn quad_group(key: u32) -> MemoryBufferGroup {
    let mut group = MemoryBufferGroup::new(GroupKey(key), VertexFormat::Standard);
    group.add_vertices(vec![0u8; VertexFormat::Standard.stride() as usize * 100]);
    group.add_indices(vec![0, 1, 2, 2, 1, 3]);
    group
}

pub fn null_device() -> Device<NullBackend> {
    init_logging();
    let mut device = Device::new(NullBackend::new());
    device
        .init_device(ContextInfo::default())
        .expect("null backend always initializes");
    device
}

/// Registers a vertex and fragment shader and returns a default state
/// drawing with them.
pub fn default_state(device: &mut Device<NullBackend>) -> PipelineStateDescriptor {
    let vs = device
        .register_shader(ShaderStage::Vertex, &FAKE_SPIRV)
        .unwrap();
    let fs = device
        .register_shader(ShaderStage::Fragment, &FAKE_SPIRV)
        .unwrap();
    PipelineStateDescriptor::new(vs, fs)
}
