//! Device layer: the [`Backend`] contract, the backend-neutral [`Device`] and
//! the resource refs it manages.

use std::fmt::Debug;

use glam::Mat4;
use raw_window_handle::HasRawWindowHandle;

pub mod cache;
pub mod device;
pub mod error;
pub mod null;
pub mod refs;
pub mod source;
pub mod state;
pub mod structs;
#[cfg(feature = "gfxdev-vulkan")]
pub mod vulkan;

pub use cache::{PipelineCache, PipelineRecord};
pub use device::{Device, DeviceState, DrawRequest};
pub use error::{GPUError, Result};
pub use refs::{
    DeviceRef, DirtyFlag, IndexBufferRef, RefFlags, RefState, TextureRef, UniformBufferRef,
    VertexBufferRef,
};
pub use source::*;
pub use state::*;
pub use structs::*;

/// Matrices pushed with every draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawTransforms {
    pub world_to_ndc: Mat4,
    pub local_to_world: Mat4,
}

impl Default for DrawTransforms {
    fn default() -> Self {
        Self {
            world_to_ndc: Mat4::IDENTITY,
            local_to_world: Mat4::IDENTITY,
        }
    }
}

/// One indexed draw, fully resolved to backend objects.
pub struct DrawCall<'a, B: Backend + ?Sized> {
    pub pipeline: B::Pipeline,
    pub vertex_buffer: &'a B::Buffer,
    pub index_buffer: &'a B::Buffer,
    pub texture: Option<(&'a B::Texture, B::Sampler)>,
    pub first_index: u32,
    pub index_count: u32,
    pub base_vertex: i32,
    pub transforms: DrawTransforms,
    pub viewport: Viewport,
}

/// Native API a [`Device`] drives.
///
/// Implementations own every native object they hand out; the device only
/// holds the associated handle types and gives each one back exactly once
/// through the matching `destroy_*` call. Except for `init` and `shutdown`,
/// the device only calls into a backend while it is initialized.
pub trait Backend {
    type Buffer: Debug;
    type Texture: Debug;
    type Sampler: Copy + Debug;
    type Shader: Copy + Debug;
    type Pipeline: Copy + PartialEq + Debug;
    type CommandBuffer: Copy + PartialEq + Debug;

    /// Picks an adapter and creates the context and command channel. On error
    /// nothing created so far may outlive the call.
    fn init(&mut self, info: &ContextInfo) -> Result<DeviceLimits>;
    fn wait_idle(&mut self) -> Result<()>;
    /// Tears down everything `init` created. Called once per successful init,
    /// after every handle has been given back.
    fn shutdown(&mut self);

    fn make_sampler(&mut self, info: &SamplerInfo) -> Result<Self::Sampler>;
    fn destroy_sampler(&mut self, sampler: Self::Sampler);

    fn make_buffer(&mut self, usage: BufferUsage, data: &[u8]) -> Result<Self::Buffer>;
    fn destroy_buffer(&mut self, buffer: Self::Buffer);

    /// `data` holds `info.layers * info.levels` slices, layer-major.
    fn make_texture(&mut self, info: &TextureInfo, data: &[&[u8]]) -> Result<Self::Texture>;
    fn destroy_texture(&mut self, texture: Self::Texture);

    fn make_shader(&mut self, stage: ShaderStage, spirv: &[u32]) -> Result<Self::Shader>;
    fn destroy_shader(&mut self, shader: Self::Shader);

    fn make_pipeline(
        &mut self,
        record: &PipelineRecord,
        vertex: Self::Shader,
        fragment: Self::Shader,
    ) -> Result<Self::Pipeline>;
    fn destroy_pipeline(&mut self, pipeline: Self::Pipeline);

    /// `None` selects the primary target.
    fn set_render_target(&mut self, target: Option<&RenderTargetInfo>) -> Result<()>;
    /// Recreates the primary target with a new size or color format.
    fn configure_primary(&mut self, extent: Extent, color: Format) -> Result<()>;

    fn begin_commands(&mut self) -> Result<Self::CommandBuffer>;
    fn record_clear(&mut self, cmd: Self::CommandBuffer, clear: &ClearRequest) -> Result<()>;
    fn record_draw(&mut self, cmd: Self::CommandBuffer, draw: &DrawCall<'_, Self>) -> Result<()>;
    /// Submits `cmd`, blocks until the queue drains and frees `cmd`.
    fn submit_commands(&mut self, cmd: Self::CommandBuffer) -> Result<()>;

    fn create_swap_surface(&mut self, window: &dyn HasRawWindowHandle, vsync: bool) -> Result<()>;
    fn destroy_swap_surface(&mut self);
    /// Shows the primary target on the swap surface, if there is one.
    fn present(&mut self) -> Result<()>;
}
