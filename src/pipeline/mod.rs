//! Per-frame drawing front end.
//!
//! [`Pipeline`] owns a [`Device`] and the refs it made for scene data, keyed
//! by the scene's own identifiers. A frame looks like:
//!
//! ```ignore
//! if pipe.begin_render() {
//!     pipe.set_world_to_camera(view);
//!     pipe.clear_render_target(Some([0.0, 0.0, 0.0, 1.0]), Some(1.0));
//!     for span in spans {
//!         pipe.render(&span);
//!     }
//!     pipe.end_render();
//! }
//! ```
//!
//! Failures while building resources never abort the frame: the draw that
//! needed them is skipped and the reason is logged.

use glam::Mat4;
use raw_window_handle::HasRawWindowHandle;
use rustc_hash::FxHashMap;

use crate::gpu::{
    Backend, BufferGroup, ClampFlags, ContextInfo, Device, DrawRequest, Extent, Format,
    GroupKey, IndexBufferRef, Mipmap, PipelineStateDescriptor, RenderTargetInfo, Result,
    ShaderId, ShaderStage, TextureKey, TextureRef, UniformBufferRef, VertexBufferRef, Viewport,
};
use crate::light::{LightInfo, LightKey, LightList};
use crate::utils::Handle;

pub const MAX_ANISOTROPIC_SAMPLES: u32 = 16;
pub const MAX_ANTI_ALIAS: u32 = 8;
pub const COLOR_DEPTH: u32 = 32;
const SUPPORTED_COLOR_DEPTHS: [u32; 1] = [COLOR_DEPTH];

/// One indexed draw as the scene describes it.
pub struct DrawSpan<'a> {
    pub group: &'a dyn BufferGroup,
    pub vertex_buffer: u32,
    pub index_buffer: u32,
    pub first_index: u32,
    pub index_count: u32,
    pub base_vertex: i32,
    pub state: PipelineStateDescriptor,
    pub local_to_world: Mat4,
    pub texture: Option<(&'a Mipmap, ClampFlags)>,
}

pub struct Pipeline<B: Backend> {
    device: Device<B>,
    vertex_refs: FxHashMap<(GroupKey, u32), Handle<VertexBufferRef<B>>>,
    index_refs: FxHashMap<(GroupKey, u32), Handle<IndexBufferRef<B>>>,
    texture_refs: FxHashMap<TextureKey, Handle<TextureRef<B>>>,
    light_refs: FxHashMap<LightKey, Handle<UniformBufferRef<B>>>,
    lights: LightList,
    zbias_scale: f32,
    in_frame: bool,
}

impl<B: Backend> Pipeline<B> {
    pub fn new(backend: B) -> Self {
        Self {
            device: Device::new(backend),
            vertex_refs: Default::default(),
            index_refs: Default::default(),
            texture_refs: Default::default(),
            light_refs: Default::default(),
            lights: Default::default(),
            zbias_scale: 1.0,
            in_frame: false,
        }
    }

    pub fn device(&self) -> &Device<B> {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut Device<B> {
        &mut self.device
    }

    /// Brings the device up. On failure [`Pipeline::error_string`] says why.
    pub fn init(&mut self, info: ContextInfo) -> bool {
        self.device.init_device(info).is_ok()
    }

    pub fn error_string(&self) -> &str {
        self.device.error_string()
    }

    /// Forgets every ref and shuts the device down.
    pub fn shutdown(&mut self) {
        self.vertex_refs.clear();
        self.index_refs.clear();
        self.texture_refs.clear();
        self.light_refs.clear();
        self.lights = Default::default();
        self.in_frame = false;
        self.device.shutdown();
    }

    /* Frame *************************************************************/

    /// Starts a frame on the calling thread. False when another thread owns
    /// the device.
    pub fn begin_render(&mut self) -> bool {
        if !self.device.begin_render() {
            return false;
        }
        if !self.in_frame {
            self.device.next_frame();
            self.in_frame = true;
        }
        true
    }

    /// Submits everything recorded this frame and shows it.
    pub fn end_render(&mut self) -> bool {
        self.in_frame = false;
        if let Err(err) = self.device.submit_command_buffer() {
            log::warn!("Frame {} submit failed: {}", self.device.frame(), err);
            return false;
        }
        if let Err(err) = self.device.present() {
            log::warn!("Frame {} present failed: {}", self.device.frame(), err);
            return false;
        }
        true
    }

    /// Hands the device to whichever thread calls [`Pipeline::begin_render`]
    /// next.
    pub fn release_context(&mut self) {
        self.device.release_context();
    }

    pub fn set_projection(&mut self, m: Mat4) {
        self.device.set_projection_matrix(m);
    }

    pub fn set_world_to_camera(&mut self, m: Mat4) {
        self.device.set_world_to_camera_matrix(m);
    }

    pub fn set_local_to_world(&mut self, m: Mat4) {
        self.device.set_local_to_world_matrix(m);
    }

    /* Refs **************************************************************/

    /// Ref for vertex buffer `idx` of `group`, created on first use and
    /// rebuilt when stale. `None` when the rebuild failed.
    pub fn check_vertex_buffer_ref(
        &mut self,
        group: &dyn BufferGroup,
        idx: u32,
    ) -> Option<Handle<VertexBufferRef<B>>> {
        let device = &mut self.device;
        let h = *self
            .vertex_refs
            .entry((group.key(), idx))
            .or_insert_with(|| device.setup_vertex_buffer_ref(group, idx));

        match self.device.check_vertex_buffer(h, group) {
            Ok(_) => Some(h),
            Err(err) => {
                log::warn!(
                    "Failed to build vertex buffer {:?}[{}]: {}",
                    group.key(),
                    idx,
                    err
                );
                None
            }
        }
    }

    pub fn check_index_buffer_ref(
        &mut self,
        group: &dyn BufferGroup,
        idx: u32,
    ) -> Option<Handle<IndexBufferRef<B>>> {
        let device = &mut self.device;
        let h = *self
            .index_refs
            .entry((group.key(), idx))
            .or_insert_with(|| device.setup_index_buffer_ref(group, idx));

        match self.device.check_index_buffer(h, group) {
            Ok(_) => Some(h),
            Err(err) => {
                log::warn!(
                    "Failed to build index buffer {:?}[{}]: {}",
                    group.key(),
                    idx,
                    err
                );
                None
            }
        }
    }

    pub fn check_texture_ref(&mut self, image: &Mipmap) -> Option<Handle<TextureRef<B>>> {
        let device = &mut self.device;
        let h = *self
            .texture_refs
            .entry(image.key)
            .or_insert_with(|| device.setup_texture_ref(image.key));

        match self.device.check_texture_ref(h, image) {
            Ok(_) => Some(h),
            Err(err) => {
                log::warn!("Failed to build texture {:?}: {}", image.key, err);
                None
            }
        }
    }

    /// Marks the texture made from `key` stale.
    pub fn invalidate_texture(&mut self, key: TextureKey) {
        if let Some(h) = self.texture_refs.get(&key) {
            self.device.texture_ref_mut(*h).state.set_dirty(true);
        }
    }

    /// Marks both refs of a group buffer stale.
    pub fn invalidate_group(&mut self, group: GroupKey) {
        for (&(key, _), &h) in &self.vertex_refs {
            if key == group {
                self.device.vertex_ref_mut(h).state.set_dirty(true);
            }
        }
        for (&(key, _), &h) in &self.index_refs {
            if key == group {
                self.device.index_ref_mut(h).state.set_dirty(true);
            }
        }
    }

    /// Releases every ref made for `group`.
    pub fn destroy_group(&mut self, group: GroupKey) {
        let device = &mut self.device;
        self.vertex_refs.retain(|&(key, _), &mut h| {
            if key == group {
                device.destroy_vertex_ref(h);
            }
            key != group
        });
        self.index_refs.retain(|&(key, _), &mut h| {
            if key == group {
                device.destroy_index_ref(h);
            }
            key != group
        });
        // Refs made directly on the device for this group.
        self.device.destroy_group_refs(group);
    }

    pub fn destroy_texture(&mut self, key: TextureKey) {
        if let Some(h) = self.texture_refs.remove(&key) {
            self.device.destroy_texture_ref(h);
        }
    }

    /* Drawing ***********************************************************/

    pub fn register_shader(&mut self, stage: ShaderStage, spirv: &[u32]) -> Result<ShaderId> {
        self.device.register_shader(stage, spirv)
    }

    /// Brings the span's refs up to date and records its draw. False when
    /// the draw was skipped.
    pub fn render(&mut self, span: &DrawSpan<'_>) -> bool {
        let Some(vertex) = self.check_vertex_buffer_ref(span.group, span.vertex_buffer) else {
            return false;
        };
        let Some(index) = self.check_index_buffer_ref(span.group, span.index_buffer) else {
            return false;
        };
        let texture = match span.texture {
            Some((image, flags)) => match self.check_texture_ref(image) {
                Some(h) => Some((h, flags)),
                None => return false,
            },
            None => None,
        };

        self.device.set_local_to_world_matrix(span.local_to_world);
        let req = DrawRequest {
            vertex,
            index,
            texture,
            state: span.state.with_zbias_scale(self.zbias_scale),
            first_index: span.first_index,
            index_count: span.index_count,
            base_vertex: span.base_vertex,
        };
        match self.device.draw(&req) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("Skipping draw of {:?}: {}", span.group.key(), err);
                false
            }
        }
    }

    /* Render target *****************************************************/

    /// `None` goes back to the primary target.
    pub fn set_render_target(&mut self, target: Option<RenderTargetInfo>) -> bool {
        match self.device.set_render_target(target) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("Failed to bind render target: {}", err);
                false
            }
        }
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.device.set_viewport(viewport);
    }

    pub fn resize(&mut self, extent: Extent) -> bool {
        match self.device.resize(extent) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("Resize to {}x{} failed: {}", extent.width, extent.height, err);
                false
            }
        }
    }

    pub fn clear_render_target(&mut self, color: Option<[f32; 4]>, depth: Option<f32>) {
        self.device.clear_render_target(color, depth);
    }

    pub fn set_framebuffer_format(&mut self, format: Format) -> bool {
        match self.device.set_framebuffer_format(format) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("Failed to switch framebuffer to {:?}: {}", format, err);
                false
            }
        }
    }

    pub fn create_swap_surface(&mut self, window: &dyn HasRawWindowHandle) -> Result<()> {
        self.device.create_swap_surface(window)
    }

    pub fn destroy_swap_surface(&mut self) {
        self.device.destroy_swap_surface();
    }

    /* Capabilities ******************************************************/

    pub fn supports_tile_memory(&self) -> bool {
        self.device.supports_tile_memory()
    }

    pub fn max_anisotropic_samples(&self) -> u32 {
        MAX_ANISOTROPIC_SAMPLES
    }

    pub fn max_anti_alias(&self) -> u32 {
        MAX_ANTI_ALIAS
    }

    pub fn supported_color_depths(&self) -> &'static [u32] {
        &SUPPORTED_COLOR_DEPTHS
    }

    pub fn color_depth(&self) -> u32 {
        COLOR_DEPTH
    }

    /// Multiplier applied to the depth-bias constant of every drawn state.
    pub fn set_zbias_scale(&mut self, scale: f32) {
        self.zbias_scale = scale;
    }

    pub fn zbias_scale(&self) -> f32 {
        self.zbias_scale
    }

    /* Lights ************************************************************/

    /// Links `light` and gives it a uniform ref tied to its dirty flag.
    ///
    /// # Panics
    /// When the light is already registered.
    pub fn register_light(&mut self, light: &LightInfo) {
        self.lights.link(light.key());
        let h = self.device.setup_uniform_ref(light.device_flag());
        self.light_refs.insert(light.key(), h);
    }

    pub fn unregister_light(&mut self, key: LightKey) {
        self.lights.unlink(key);
        if let Some(h) = self.light_refs.remove(&key) {
            self.device.destroy_uniform_ref(h);
        }
    }

    pub fn lights(&self) -> &LightList {
        &self.lights
    }

    /// Refreshes `light` and rebuilds its uniform buffer if it changed.
    /// Returns the ref, or `None` if the light is not registered or the
    /// rebuild failed.
    pub fn check_light_ref(&mut self, light: &mut LightInfo) -> Option<Handle<UniformBufferRef<B>>> {
        let h = *self.light_refs.get(&light.key())?;
        light.refresh();
        let res = self
            .device
            .check_uniform_ref(h, || bytemuck::bytes_of(&light.uniform()).to_vec());
        match res {
            Ok(_) => Some(h),
            Err(err) => {
                log::warn!("Failed to build light {:?}: {}", light.key(), err);
                None
            }
        }
    }
}
