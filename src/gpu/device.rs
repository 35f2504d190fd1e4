use std::thread::ThreadId;

use glam::Mat4;
use raw_window_handle::HasRawWindowHandle;

use super::cache::{PipelineCache, PipelineRecord};
use super::refs::{
    DeviceRef, DirtyFlag, IndexBufferRef, TextureRef, UniformBufferRef, VertexBufferRef,
};
use super::source::{BufferGroup, CubicEnvironmap, GroupKey, Mipmap, TextureKey};
use super::state::{PipelineStateDescriptor, ShaderId};
use super::structs::*;
use super::{Backend, DrawCall, DrawTransforms, GPUError, Result};
use crate::utils::{Handle, ResourceList};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Uninitialized,
    Initialized,
    ShuttingDown,
}

/// Refs and state for one indexed draw.
pub struct DrawRequest<B: Backend> {
    pub vertex: Handle<VertexBufferRef<B>>,
    pub index: Handle<IndexBufferRef<B>>,
    pub texture: Option<(Handle<TextureRef<B>>, ClampFlags)>,
    pub state: PipelineStateDescriptor,
    pub first_index: u32,
    pub index_count: u32,
    pub base_vertex: i32,
}

/// Owner of one backend context and everything built on it.
///
/// Only the thread that initialized the device, or that later claimed it
/// through [`Device::begin_render`], may drive it. Every operation except
/// [`Device::init_device`], [`Device::shutdown`] and the plain getters panics
/// when the device is not initialized.
pub struct Device<B: Backend> {
    backend: B,
    state: DeviceState,
    info: ContextInfo,
    limits: DeviceLimits,
    error: String,
    active_thread: Option<ThreadId>,

    samplers: Vec<B::Sampler>,
    shaders: Vec<(ShaderStage, B::Shader)>,
    pipelines: PipelineCache<B::Pipeline>,

    vertex_refs: ResourceList<VertexBufferRef<B>>,
    index_refs: ResourceList<IndexBufferRef<B>>,
    texture_refs: ResourceList<TextureRef<B>>,
    uniform_refs: ResourceList<UniformBufferRef<B>>,

    current_cmd: Option<B::CommandBuffer>,
    clear: ClearRequest,
    target: TargetFormats,
    on_primary: bool,
    viewport: Viewport,
    projection: Mat4,
    world_to_camera: Mat4,
    local_to_world: Mat4,
    frame: u32,
    swap_surface: bool,
}

impl<B: Backend> Device<B> {
    pub fn new(backend: B) -> Self {
        let info = ContextInfo::default();
        Self {
            backend,
            state: DeviceState::Uninitialized,
            target: info.target_formats(),
            viewport: Viewport::from_extent(info.extent),
            info,
            limits: Default::default(),
            error: String::new(),
            active_thread: None,
            samplers: Vec::with_capacity(SAMPLER_COUNT),
            shaders: Vec::new(),
            pipelines: Default::default(),
            vertex_refs: Default::default(),
            index_refs: Default::default(),
            texture_refs: Default::default(),
            uniform_refs: Default::default(),
            current_cmd: None,
            clear: Default::default(),
            on_primary: true,
            projection: Mat4::IDENTITY,
            world_to_camera: Mat4::IDENTITY,
            local_to_world: Mat4::IDENTITY,
            frame: 0,
            swap_surface: false,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.state == DeviceState::Initialized
    }

    /// Message of the last initialization failure, empty when there was none.
    pub fn error_string(&self) -> &str {
        &self.error
    }

    pub fn context_info(&self) -> &ContextInfo {
        &self.info
    }

    pub fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    pub fn supports_tile_memory(&self) -> bool {
        self.limits.supports_tile_memory
    }

    fn assert_initialized(&self) {
        assert!(
            self.state == DeviceState::Initialized,
            "Device used while {:?}",
            self.state
        );
    }

    /// # Panics
    /// When the device is not initialized or the caller is not the active
    /// thread.
    pub fn assert_active(&self) {
        self.assert_initialized();
        let me = std::thread::current().id();
        assert!(
            self.active_thread == Some(me),
            "Device driven from {:?} while {:?} owns it",
            me,
            self.active_thread
        );
    }

    /// Brings the backend up and builds the sampler bank.
    ///
    /// On failure the device stays uninitialized and the message is kept for
    /// [`Device::error_string`].
    ///
    /// # Panics
    /// When the device is already initialized.
    pub fn init_device(&mut self, info: ContextInfo) -> Result<()> {
        assert!(
            self.state == DeviceState::Uninitialized,
            "init_device called while {:?}",
            self.state
        );

        match self.try_init(&info) {
            Ok(limits) => {
                log::info!(
                    "Initialized device on '{}' (max texture {})",
                    limits.adapter_name,
                    limits.max_texture_dimension
                );
                self.error.clear();
                self.limits = limits;
                self.target = info.target_formats();
                self.on_primary = true;
                self.viewport = Viewport::from_extent(info.extent);
                self.info = info;
                self.active_thread = Some(std::thread::current().id());
                self.state = DeviceState::Initialized;
                Ok(())
            }
            Err(err) => {
                self.error = err.to_string();
                log::error!("Device initialization failed: {}", self.error);
                Err(err)
            }
        }
    }

    fn try_init(&mut self, info: &ContextInfo) -> Result<DeviceLimits> {
        let limits = self.backend.init(info)?;

        let anisotropy = info.max_anisotropy.min(limits.max_anisotropy);
        for bits in 0..SAMPLER_COUNT as u32 {
            let flags = ClampFlags::from_bits_truncate(bits);
            match self
                .backend
                .make_sampler(&SamplerInfo::for_clamp_flags(flags, anisotropy))
            {
                Ok(s) => self.samplers.push(s),
                Err(err) => {
                    for s in self.samplers.drain(..) {
                        self.backend.destroy_sampler(s);
                    }
                    self.backend.shutdown();
                    return Err(err);
                }
            }
        }

        Ok(limits)
    }

    /// Waits for the GPU, then releases everything the device created in
    /// reverse dependency order. A no-op unless initialized.
    pub fn shutdown(&mut self) {
        if self.state != DeviceState::Initialized {
            return;
        }
        self.state = DeviceState::ShuttingDown;

        if let Some(cmd) = self.current_cmd.take() {
            if let Err(err) = self.backend.submit_commands(cmd) {
                log::warn!("Failed to flush pending commands at shutdown: {}", err);
            }
        }
        if let Err(err) = self.backend.wait_idle() {
            log::warn!("wait_idle failed during shutdown: {}", err);
        }

        let backend = &mut self.backend;
        self.vertex_refs.drain(|mut r| {
            if let Some(b) = r.buffer.take() {
                backend.destroy_buffer(b);
            }
        });
        self.index_refs.drain(|mut r| {
            if let Some(b) = r.buffer.take() {
                backend.destroy_buffer(b);
            }
        });
        self.texture_refs.drain(|mut r| {
            if let Some(t) = r.texture.take() {
                backend.destroy_texture(t);
            }
        });
        self.uniform_refs.drain(|mut r| {
            if let Some(b) = r.buffer.take() {
                backend.destroy_buffer(b);
            }
        });

        self.pipelines.drain(|p| backend.destroy_pipeline(p));
        for (_, s) in self.shaders.drain(..) {
            backend.destroy_shader(s);
        }

        if self.swap_surface {
            backend.destroy_swap_surface();
            self.swap_surface = false;
        }
        for s in self.samplers.drain(..) {
            backend.destroy_sampler(s);
        }
        backend.shutdown();

        self.clear = Default::default();
        self.active_thread = None;
        self.state = DeviceState::Uninitialized;
        log::info!("Device shut down");
    }

    /// Affirms that the calling thread drives the device this frame.
    ///
    /// Reentrant for the current owner. A thread may claim an unowned device;
    /// it can not take the device from another thread until that thread calls
    /// [`Device::release_context`].
    pub fn begin_render(&mut self) -> bool {
        self.assert_initialized();
        let me = std::thread::current().id();
        match self.active_thread {
            Some(owner) if owner == me => true,
            None => {
                log::debug!("Device claimed by {:?}", me);
                self.active_thread = Some(me);
                true
            }
            Some(owner) => {
                log::warn!(
                    "begin_render from {:?} rejected, device owned by {:?}",
                    me,
                    owner
                );
                false
            }
        }
    }

    /// Gives up ownership so another thread can claim the device.
    pub fn release_context(&mut self) {
        self.assert_active();
        debug_assert!(
            self.current_cmd.is_none(),
            "Releasing the device with commands still recording"
        );
        self.active_thread = None;
    }

    pub fn active_thread(&self) -> Option<ThreadId> {
        self.active_thread
    }

    /// Frame counter volatile refs are stamped with.
    pub fn frame(&self) -> u32 {
        self.frame
    }

    pub fn next_frame(&mut self) -> u32 {
        self.assert_active();
        self.frame = self.frame.wrapping_add(1);
        self.frame
    }

    /* Vertex buffers ****************************************************/

    /// Creates a dirty, linked vertex ref for vertex buffer `idx` of `group`.
    pub fn setup_vertex_buffer_ref(
        &mut self,
        group: &dyn BufferGroup,
        idx: u32,
    ) -> Handle<VertexBufferRef<B>> {
        self.assert_active();
        let mut vref = VertexBufferRef::new(group.key(), idx);
        if let Some(stream) = group.vertex_stream(idx) {
            vref.count = stream.count;
            vref.vertex_size = stream.stride();
            vref.format = stream.format;
        }
        vref.state.set_volatile(group.is_volatile());
        vref.state.set_skinned(group.is_skinned());
        self.vertex_refs.push(vref)
    }

    pub fn vertex_ref(&self, h: Handle<VertexBufferRef<B>>) -> &VertexBufferRef<B> {
        self.vertex_refs.get_ref(h)
    }

    pub fn vertex_ref_mut(&mut self, h: Handle<VertexBufferRef<B>>) -> &mut VertexBufferRef<B> {
        self.vertex_refs.get_ref_mut(h)
    }

    /// Rebuilds a non-volatile ref if it is dirty.
    pub fn check_static_vertex_buffer(
        &mut self,
        h: Handle<VertexBufferRef<B>>,
        group: &dyn BufferGroup,
    ) -> Result<()> {
        let vref = self.vertex_refs.get_ref(h);
        if !vref.volatile() && vref.is_dirty() {
            self.fill_vertex_buffer_ref(h, group)?;
        }
        Ok(())
    }

    /// Rebuilds the ref if it is stale, returning whether it was rebuilt.
    /// Volatile refs go stale every frame, others only when dirty.
    pub fn check_vertex_buffer(
        &mut self,
        h: Handle<VertexBufferRef<B>>,
        group: &dyn BufferGroup,
    ) -> Result<bool> {
        let vref = self.vertex_refs.get_ref(h);
        if vref.volatile() {
            if vref.state.expired(self.frame) {
                self.fill_volatile_vertex_buffer_ref(h, group)?;
                return Ok(true);
            }
        } else if vref.is_dirty() {
            self.fill_vertex_buffer_ref(h, group)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Replaces the ref's GPU buffer with a fresh copy of its source.
    ///
    /// On failure the ref is left dirty without a buffer.
    pub fn fill_vertex_buffer_ref(
        &mut self,
        h: Handle<VertexBufferRef<B>>,
        group: &dyn BufferGroup,
    ) -> Result<()> {
        self.assert_active();
        let vref = self.vertex_refs.get_ref_mut(h);
        if let Some(old) = vref.buffer.take() {
            self.backend.destroy_buffer(old);
        }
        vref.state.set_dirty(true);

        let stream = group
            .vertex_stream(vref.index)
            .ok_or(GPUError::InvalidSource("vertex stream"))?;
        if stream.data.is_empty() {
            return Err(GPUError::InvalidSource("empty vertex stream"));
        }

        let buffer = self.backend.make_buffer(BufferUsage::Vertex, stream.data)?;
        vref.buffer = Some(buffer);
        vref.count = stream.count;
        vref.vertex_size = stream.stride();
        vref.format = stream.format;
        vref.state.mark_rebuilt();
        log::trace!(
            "Rebuilt vertex ref {:?}[{}] ({} verts)",
            vref.owner,
            vref.index,
            vref.count
        );
        Ok(())
    }

    /// [`Device::fill_vertex_buffer_ref`] for data rewritten every frame.
    pub fn fill_volatile_vertex_buffer_ref(
        &mut self,
        h: Handle<VertexBufferRef<B>>,
        group: &dyn BufferGroup,
    ) -> Result<()> {
        self.fill_vertex_buffer_ref(h, group)?;
        let frame = self.frame;
        self.vertex_refs.get_ref_mut(h).state.set_ref_time(frame);
        Ok(())
    }

    /* Index buffers *****************************************************/

    pub fn setup_index_buffer_ref(
        &mut self,
        group: &dyn BufferGroup,
        idx: u32,
    ) -> Handle<IndexBufferRef<B>> {
        self.assert_active();
        let mut iref = IndexBufferRef::new(group.key(), idx);
        if let Some(stream) = group.index_stream(idx) {
            iref.count = stream.count();
        }
        iref.state.set_volatile(group.is_volatile());
        self.index_refs.push(iref)
    }

    pub fn index_ref(&self, h: Handle<IndexBufferRef<B>>) -> &IndexBufferRef<B> {
        self.index_refs.get_ref(h)
    }

    pub fn index_ref_mut(&mut self, h: Handle<IndexBufferRef<B>>) -> &mut IndexBufferRef<B> {
        self.index_refs.get_ref_mut(h)
    }

    pub fn check_static_index_buffer(
        &mut self,
        h: Handle<IndexBufferRef<B>>,
        group: &dyn BufferGroup,
    ) -> Result<()> {
        let iref = self.index_refs.get_ref(h);
        if !iref.volatile() && iref.is_dirty() {
            self.fill_index_buffer_ref(h, group)?;
        }
        Ok(())
    }

    pub fn check_index_buffer(
        &mut self,
        h: Handle<IndexBufferRef<B>>,
        group: &dyn BufferGroup,
    ) -> Result<bool> {
        let iref = self.index_refs.get_ref(h);
        if iref.is_dirty() || iref.state.expired(self.frame) {
            self.fill_index_buffer_ref(h, group)?;
            let frame = self.frame;
            self.index_refs.get_ref_mut(h).state.set_ref_time(frame);
            return Ok(true);
        }
        Ok(false)
    }

    pub fn fill_index_buffer_ref(
        &mut self,
        h: Handle<IndexBufferRef<B>>,
        group: &dyn BufferGroup,
    ) -> Result<()> {
        self.assert_active();
        let iref = self.index_refs.get_ref_mut(h);
        if let Some(old) = iref.buffer.take() {
            self.backend.destroy_buffer(old);
        }
        iref.state.set_dirty(true);

        let stream = group
            .index_stream(iref.index)
            .ok_or(GPUError::InvalidSource("index stream"))?;
        if stream.data.is_empty() {
            return Err(GPUError::InvalidSource("empty index stream"));
        }

        let bytes: &[u8] = bytemuck::cast_slice(stream.data);
        let buffer = self.backend.make_buffer(BufferUsage::Index, bytes)?;
        iref.buffer = Some(buffer);
        iref.count = stream.count();
        iref.state.mark_rebuilt();
        log::trace!(
            "Rebuilt index ref {:?}[{}] ({} indices)",
            iref.owner,
            iref.index,
            iref.count
        );
        Ok(())
    }

    /* Textures **********************************************************/

    pub fn setup_texture_ref(&mut self, key: TextureKey) -> Handle<TextureRef<B>> {
        self.assert_active();
        self.texture_refs.push(TextureRef::new(key, false))
    }

    pub fn setup_cubic_texture_ref(&mut self, key: TextureKey) -> Handle<TextureRef<B>> {
        self.assert_active();
        self.texture_refs.push(TextureRef::new(key, true))
    }

    pub fn texture_ref(&self, h: Handle<TextureRef<B>>) -> &TextureRef<B> {
        self.texture_refs.get_ref(h)
    }

    pub fn texture_ref_mut(&mut self, h: Handle<TextureRef<B>>) -> &mut TextureRef<B> {
        self.texture_refs.get_ref_mut(h)
    }

    /// Picks the levels of `image` that get uploaded and records them on the
    /// ref. Leading levels larger than the device allows are skipped, and for
    /// block-compressed images trailing levels smaller than a block are
    /// dropped. Returns the number of levels kept.
    pub fn configure_allowed_levels(&mut self, h: Handle<TextureRef<B>>, image: &Mipmap) -> u32 {
        self.assert_active();
        let max_dim = self.limits.max_texture_dimension.max(1);
        let total = image.level_count();

        let mut first = 0;
        while first + 1 < total {
            let (w, ht) = image.level_extent(first);
            if w.max(ht) <= max_dim {
                break;
            }
            first += 1;
        }

        let mut count = total - first;
        if image.is_compressed() {
            while count > 1 {
                let (w, ht) = image.level_extent(first + count - 1);
                if w >= 4 && ht >= 4 {
                    break;
                }
                count -= 1;
            }
        }

        let (width, height) = image.level_extent(first);
        let tref = self.texture_refs.get_ref_mut(h);
        tref.first_level = first;
        tref.levels = count;
        tref.width = width;
        tref.height = height;
        tref.format = image.format;
        tref.compressed = image.is_compressed();
        tref.compression = image.compression;
        count
    }

    /// Appends the allowed levels of one slice of the ref's texture to
    /// `out`, checking each one against its expected size.
    pub fn populate_texture<'a>(
        &self,
        h: Handle<TextureRef<B>>,
        image: &'a Mipmap,
        out: &mut Vec<&'a [u8]>,
    ) -> Result<()> {
        self.assert_active();
        let tref = self.texture_refs.get_ref(h);
        for level in tref.first_level..tref.first_level + tref.levels {
            let data = image
                .levels
                .get(level as usize)
                .ok_or(GPUError::InvalidSource("missing mip level"))?;
            let (w, ht) = image.level_extent(level);
            if data.len() < image.format.level_size(w, ht) {
                return Err(GPUError::InvalidSource("mip level too small"));
            }
            out.push(data.as_slice());
        }
        Ok(())
    }

    /// (Re)builds a 2D texture from `image`.
    pub fn make_texture_ref(&mut self, h: Handle<TextureRef<B>>, image: &Mipmap) -> Result<()> {
        self.assert_active();
        self.release_texture(h);
        if self.configure_allowed_levels(h, image) == 0 {
            return Err(GPUError::InvalidSource("image without levels"));
        }

        let mut data = Vec::new();
        self.populate_texture(h, image, &mut data)?;
        self.upload_texture(h, 1, &data)
    }

    /// (Re)builds a cubemap from six equally sized faces.
    pub fn make_cubic_texture_ref(
        &mut self,
        h: Handle<TextureRef<B>>,
        image: &CubicEnvironmap,
    ) -> Result<()> {
        self.assert_active();
        self.release_texture(h);
        let first = image.face(0);
        if image.faces.iter().any(|f| {
            f.width != first.width || f.height != first.height || f.format != first.format
        }) {
            return Err(GPUError::InvalidSource("cubemap faces differ"));
        }
        if self.configure_allowed_levels(h, first) == 0 {
            return Err(GPUError::InvalidSource("image without levels"));
        }

        let mut data = Vec::new();
        for face in &image.faces {
            self.populate_texture(h, face, &mut data)?;
        }
        self.upload_texture(h, 6, &data)
    }

    /// Rebuilds the texture if it is dirty.
    pub fn check_texture_ref(&mut self, h: Handle<TextureRef<B>>, image: &Mipmap) -> Result<bool> {
        if self.texture_refs.get_ref(h).is_dirty() {
            self.make_texture_ref(h, image)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Drops the texture ahead of a rebuild. The ref stays dirty until the
    /// rebuild succeeds.
    fn release_texture(&mut self, h: Handle<TextureRef<B>>) {
        let tref = self.texture_refs.get_ref_mut(h);
        if let Some(old) = tref.texture.take() {
            self.backend.destroy_texture(old);
        }
        tref.state.set_dirty(true);
    }

    fn upload_texture(&mut self, h: Handle<TextureRef<B>>, layers: u32, data: &[&[u8]]) -> Result<()> {
        let tref = self.texture_refs.get_ref_mut(h);
        let info = TextureInfo {
            width: tref.width,
            height: tref.height,
            format: tref.format,
            levels: tref.levels,
            layers,
        };
        tref.texture = Some(self.backend.make_texture(&info, data)?);
        tref.state.mark_rebuilt();
        log::trace!(
            "Rebuilt texture ref {:?} ({}x{}, {} levels)",
            tref.owner,
            tref.width,
            tref.height,
            tref.levels
        );
        Ok(())
    }

    /* Uniform buffers ***************************************************/

    /// Creates a dirty uniform ref that also goes stale whenever `source` is
    /// set by its owner.
    pub fn setup_uniform_ref(&mut self, source: DirtyFlag) -> Handle<UniformBufferRef<B>> {
        self.assert_active();
        self.uniform_refs.push(UniformBufferRef::new(source))
    }

    pub fn uniform_ref(&self, h: Handle<UniformBufferRef<B>>) -> &UniformBufferRef<B> {
        self.uniform_refs.get_ref(h)
    }

    /// Rebuilds the buffer from `data` if the ref or its source is dirty,
    /// returning whether it was rebuilt. `data` is only called on a rebuild.
    pub fn check_uniform_ref(
        &mut self,
        h: Handle<UniformBufferRef<B>>,
        data: impl FnOnce() -> Vec<u8>,
    ) -> Result<bool> {
        self.assert_active();
        let uref = self.uniform_refs.get_ref_mut(h);
        if !uref.absorb_source() {
            return Ok(false);
        }
        if let Some(old) = uref.buffer.take() {
            self.backend.destroy_buffer(old);
        }

        let bytes = data();
        uref.buffer = Some(self.backend.make_buffer(BufferUsage::Uniform, &bytes)?);
        uref.size = bytes.len();
        uref.state.mark_rebuilt();
        Ok(true)
    }

    pub fn destroy_uniform_ref(&mut self, h: Handle<UniformBufferRef<B>>) {
        self.assert_active();
        let mut uref = self.uniform_refs.release(h);
        if let Some(b) = uref.buffer.take() {
            self.backend.destroy_buffer(b);
        }
    }

    /* Ref lifetime ******************************************************/

    /// Releases the ref's GPU buffer and frees the ref.
    ///
    /// # Panics
    /// When `h` was already destroyed.
    pub fn destroy_vertex_ref(&mut self, h: Handle<VertexBufferRef<B>>) {
        self.assert_active();
        let mut vref = self.vertex_refs.release(h);
        if let Some(b) = vref.buffer.take() {
            self.backend.destroy_buffer(b);
        }
    }

    pub fn destroy_index_ref(&mut self, h: Handle<IndexBufferRef<B>>) {
        self.assert_active();
        let mut iref = self.index_refs.release(h);
        if let Some(b) = iref.buffer.take() {
            self.backend.destroy_buffer(b);
        }
    }

    pub fn destroy_texture_ref(&mut self, h: Handle<TextureRef<B>>) {
        self.assert_active();
        let mut tref = self.texture_refs.release(h);
        if let Some(t) = tref.texture.take() {
            self.backend.destroy_texture(t);
        }
    }

    /// Destroys every linked ref created for `group`.
    pub fn destroy_group_refs(&mut self, group: GroupKey) {
        self.assert_active();
        let mut vertex = Vec::new();
        self.vertex_refs.for_each_handle(|h| vertex.push(h));
        for h in vertex {
            if self.vertex_refs.get_ref(h).owner == group {
                self.destroy_vertex_ref(h);
            }
        }

        let mut index = Vec::new();
        self.index_refs.for_each_handle(|h| index.push(h));
        for h in index {
            if self.index_refs.get_ref(h).owner == group {
                self.destroy_index_ref(h);
            }
        }
    }

    pub fn link_vertex_ref(&mut self, h: Handle<VertexBufferRef<B>>) {
        self.vertex_refs.link(h);
    }

    pub fn unlink_vertex_ref(&mut self, h: Handle<VertexBufferRef<B>>) {
        self.vertex_refs.unlink(h);
    }

    pub fn is_vertex_ref_linked(&self, h: Handle<VertexBufferRef<B>>) -> bool {
        self.vertex_refs.is_linked(h)
    }

    pub fn link_index_ref(&mut self, h: Handle<IndexBufferRef<B>>) {
        self.index_refs.link(h);
    }

    pub fn unlink_index_ref(&mut self, h: Handle<IndexBufferRef<B>>) {
        self.index_refs.unlink(h);
    }

    pub fn link_texture_ref(&mut self, h: Handle<TextureRef<B>>) {
        self.texture_refs.link(h);
    }

    pub fn unlink_texture_ref(&mut self, h: Handle<TextureRef<B>>) {
        self.texture_refs.unlink(h);
    }

    /// Number of refs of each kind currently linked: (vertex, index,
    /// texture, uniform).
    pub fn linked_ref_counts(&self) -> (usize, usize, usize, usize) {
        (
            self.vertex_refs.len(),
            self.index_refs.len(),
            self.texture_refs.len(),
            self.uniform_refs.len(),
        )
    }

    /// Marks every linked ref dirty so it is rebuilt on next use.
    pub fn invalidate_all(&mut self) {
        self.assert_active();
        self.vertex_refs.for_each_linked_mut(|r| r.set_dirty(true));
        self.index_refs.for_each_linked_mut(|r| r.set_dirty(true));
        self.texture_refs.for_each_linked_mut(|r| r.set_dirty(true));
        self.uniform_refs.for_each_linked_mut(|r| r.set_dirty(true));
        log::debug!("Invalidated all device refs");
    }

    /* Samplers, shaders and pipelines ***********************************/

    /// Bank sampler for `flags`. Only the low four bits select a slot.
    pub fn sampler_state_for_clamp_flags(&self, flags: ClampFlags) -> B::Sampler {
        self.assert_initialized();
        debug_assert!(
            (flags.bits() as usize) < SAMPLER_COUNT,
            "Clamp flags {:?} outside the sampler bank",
            flags
        );
        self.samplers[(flags.bits() & 0xF) as usize]
    }

    pub fn register_shader(&mut self, stage: ShaderStage, spirv: &[u32]) -> Result<ShaderId> {
        self.assert_active();
        let shader = self.backend.make_shader(stage, spirv)?;
        self.shaders.push((stage, shader));
        Ok(ShaderId(self.shaders.len() as u32 - 1))
    }

    fn shader(&self, id: ShaderId, stage: ShaderStage) -> Result<B::Shader> {
        match self.shaders.get(id.0 as usize) {
            Some((s, shader)) if *s == stage => Ok(*shader),
            _ => Err(GPUError::UnknownShader(id)),
        }
    }

    /// Cached pipeline for `state` on `target`, built on first request.
    pub fn create_pipeline(
        &mut self,
        state: &PipelineStateDescriptor,
        target: TargetFormats,
    ) -> Result<B::Pipeline> {
        self.assert_active();
        let record = PipelineRecord {
            state: *state,
            target,
        };
        if let Some(p) = self.pipelines.get(&record) {
            return Ok(p);
        }

        let vs = self.shader(state.vertex_shader, ShaderStage::Vertex)?;
        let fs = self.shader(state.fragment_shader, ShaderStage::Fragment)?;
        let backend = &mut self.backend;
        let pipeline = self
            .pipelines
            .get_or_try_insert(record, |r| backend.make_pipeline(r, vs, fs))?;
        log::debug!(
            "Built pipeline {:?} ({} cached)",
            pipeline,
            self.pipelines.len()
        );
        Ok(pipeline)
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    /// Formats of the target currently drawn to.
    pub fn target_formats(&self) -> TargetFormats {
        self.target
    }

    /* Render target and matrices ****************************************/

    /// `None` selects the primary target.
    pub fn set_render_target(&mut self, target: Option<RenderTargetInfo>) -> Result<()> {
        self.assert_active();
        self.backend.set_render_target(target.as_ref())?;
        match target {
            Some(t) => {
                self.target = t.formats;
                self.viewport = Viewport::from_extent(t.extent);
                self.on_primary = false;
            }
            None => {
                self.target = self.info.target_formats();
                self.viewport = Viewport::from_extent(self.info.extent);
                self.on_primary = true;
            }
        }
        Ok(())
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.assert_active();
        self.viewport = viewport;
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn resize(&mut self, extent: Extent) -> Result<()> {
        self.assert_active();
        self.backend
            .configure_primary(extent, self.info.framebuffer_format)?;
        self.info.extent = extent;
        if self.on_primary {
            self.viewport = Viewport::from_extent(extent);
        }
        Ok(())
    }

    pub fn set_framebuffer_format(&mut self, format: Format) -> Result<()> {
        self.assert_active();
        if format == self.info.framebuffer_format {
            return Ok(());
        }
        self.backend.configure_primary(self.info.extent, format)?;
        self.info.framebuffer_format = format;
        if self.on_primary {
            self.target.color = format;
        }
        Ok(())
    }

    /// Requests clears for the next recording scope. They are applied before
    /// its first draw, or at submit if nothing is drawn.
    pub fn clear_render_target(&mut self, color: Option<[f32; 4]>, depth: Option<f32>) {
        self.assert_active();
        if color.is_some() {
            self.clear.color = color;
        }
        if depth.is_some() {
            self.clear.depth = depth;
        }
    }

    pub fn pending_clear(&self) -> ClearRequest {
        self.clear
    }

    pub fn set_projection_matrix(&mut self, m: Mat4) {
        self.projection = m;
    }

    pub fn set_world_to_camera_matrix(&mut self, m: Mat4) {
        self.world_to_camera = m;
    }

    pub fn set_local_to_world_matrix(&mut self, m: Mat4) {
        self.local_to_world = m;
    }

    pub fn transforms(&self) -> DrawTransforms {
        DrawTransforms {
            world_to_ndc: self.projection * self.world_to_camera,
            local_to_world: self.local_to_world,
        }
    }

    /* Commands **********************************************************/

    /// Opens the recording scope, or returns the one already open.
    pub fn create_command_buffer(&mut self) -> Result<B::CommandBuffer> {
        self.assert_active();
        if let Some(cmd) = self.current_cmd {
            return Ok(cmd);
        }
        let cmd = self.backend.begin_commands()?;
        self.current_cmd = Some(cmd);
        Ok(cmd)
    }

    pub fn current_command_buffer(&self) -> Option<B::CommandBuffer> {
        self.current_cmd
    }

    fn flush_clear(&mut self, cmd: B::CommandBuffer) -> Result<()> {
        if !self.clear.is_empty() {
            let clear = std::mem::take(&mut self.clear);
            self.backend.record_clear(cmd, &clear)?;
        }
        Ok(())
    }

    /// Submits the open scope and blocks until the GPU is done with it. Any
    /// clear still pending is recorded first. Afterwards there is no current
    /// command buffer and no pending clear.
    pub fn submit_command_buffer(&mut self) -> Result<()> {
        self.assert_active();
        let Some(cmd) = self.current_cmd.take() else {
            self.clear = Default::default();
            return Ok(());
        };

        // The scope is handed back to the backend even if the clear failed.
        let cleared = self.flush_clear(cmd);
        let submitted = self.backend.submit_commands(cmd);
        self.clear = Default::default();
        cleared.and(submitted)
    }

    /// Records one draw from already built refs.
    pub fn draw(&mut self, req: &DrawRequest<B>) -> Result<()> {
        self.assert_active();
        let pipeline = self.create_pipeline(&req.state, self.target)?;
        let cmd = self.create_command_buffer()?;
        self.flush_clear(cmd)?;

        let texture = match req.texture {
            Some((h, flags)) => {
                let tex = self
                    .texture_refs
                    .get_ref(h)
                    .texture
                    .as_ref()
                    .ok_or(GPUError::RefNotBuilt("texture"))?;
                Some((tex, self.sampler_state_for_clamp_flags(flags)))
            }
            None => None,
        };
        let vertex_buffer = self
            .vertex_refs
            .get_ref(req.vertex)
            .buffer
            .as_ref()
            .ok_or(GPUError::RefNotBuilt("vertex"))?;
        let index_buffer = self
            .index_refs
            .get_ref(req.index)
            .buffer
            .as_ref()
            .ok_or(GPUError::RefNotBuilt("index"))?;

        let call = DrawCall {
            pipeline,
            vertex_buffer,
            index_buffer,
            texture,
            first_index: req.first_index,
            index_count: req.index_count,
            base_vertex: req.base_vertex,
            transforms: DrawTransforms {
                world_to_ndc: self.projection * self.world_to_camera,
                local_to_world: self.local_to_world,
            },
            viewport: self.viewport,
        };
        self.backend.record_draw(cmd, &call)?;

        self.vertex_refs
            .get_ref_mut(req.vertex)
            .state
            .set_rebuilt_since_used(false);
        self.index_refs
            .get_ref_mut(req.index)
            .state
            .set_rebuilt_since_used(false);
        Ok(())
    }

    /* Swap surface ******************************************************/

    pub fn create_swap_surface(&mut self, window: &dyn HasRawWindowHandle) -> Result<()> {
        self.assert_active();
        if self.swap_surface {
            self.backend.destroy_swap_surface();
            self.swap_surface = false;
        }
        self.backend.create_swap_surface(window, self.info.vsync)?;
        self.swap_surface = true;
        Ok(())
    }

    pub fn destroy_swap_surface(&mut self) {
        self.assert_active();
        if self.swap_surface {
            self.backend.wait_idle().ok();
            self.backend.destroy_swap_surface();
            self.swap_surface = false;
        }
    }

    pub fn has_swap_surface(&self) -> bool {
        self.swap_surface
    }

    pub fn present(&mut self) -> Result<()> {
        self.assert_active();
        if self.swap_surface && self.on_primary {
            self.backend.present()?;
        }
        Ok(())
    }
}

impl<B: Backend> Drop for Device<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
