//! Headless backend that records what it is asked to do instead of talking
//! to a GPU.

use raw_window_handle::HasRawWindowHandle;

use super::cache::PipelineRecord;
use super::structs::*;
use super::{Backend, DrawCall, DrawTransforms, GPUError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NullHandle(pub u32);

#[derive(Debug)]
pub struct NullBuffer {
    pub id: NullHandle,
    pub usage: BufferUsage,
    pub size: usize,
}

#[derive(Debug)]
pub struct NullTexture {
    pub id: NullHandle,
    pub info: TextureInfo,
}

/// A draw as the backend saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedDraw {
    pub cmd: NullHandle,
    pub pipeline: NullHandle,
    pub vertex_buffer: NullHandle,
    pub index_buffer: NullHandle,
    pub texture: Option<(NullHandle, NullHandle)>,
    pub index_count: u32,
    pub transforms: DrawTransforms,
    pub viewport: Viewport,
}

/// Running totals since the backend was created.
#[derive(Debug, Clone, Default)]
pub struct NullStats {
    pub buffers_created: u32,
    pub textures_created: u32,
    pub pipelines_created: u32,
    pub samplers_created: u32,
    pub submits: u32,
    pub clears: Vec<ClearRequest>,
    pub draws: Vec<RecordedDraw>,
    pub presents: u32,
}

/// Objects handed out and not yet given back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NullLive {
    pub buffers: u32,
    pub textures: u32,
    pub samplers: u32,
    pub shaders: u32,
    pub pipelines: u32,
    pub command_buffers: u32,
}

impl NullLive {
    pub fn total(&self) -> u32 {
        self.buffers
            + self.textures
            + self.samplers
            + self.shaders
            + self.pipelines
            + self.command_buffers
    }
}

#[derive(Debug)]
pub struct NullBackend {
    adapters: usize,
    limits: DeviceLimits,
    fail_buffers: u32,
    fail_pipelines: u32,
    fail_clears: u32,
    next_id: u32,
    initialized: bool,
    open: Vec<NullHandle>,
    pub stats: NullStats,
    pub live: NullLive,
}

impl Default for NullBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl NullBackend {
    pub fn new() -> Self {
        Self {
            adapters: 1,
            limits: DeviceLimits {
                adapter_name: "null".to_string(),
                ..Default::default()
            },
            fail_buffers: 0,
            fail_pipelines: 0,
            fail_clears: 0,
            next_id: 1,
            initialized: false,
            open: Vec::new(),
            stats: Default::default(),
            live: Default::default(),
        }
    }

    /// Number of qualifying adapters `init` pretends to find.
    pub fn with_adapters(mut self, adapters: usize) -> Self {
        self.adapters = adapters;
        self
    }

    pub fn with_limits(mut self, limits: DeviceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Makes the next `count` buffer allocations fail.
    pub fn fail_buffer_allocations(&mut self, count: u32) {
        self.fail_buffers = count;
    }

    /// Makes the next `count` pipeline builds fail.
    pub fn fail_pipeline_builds(&mut self, count: u32) {
        self.fail_pipelines = count;
    }

    /// Makes the next `count` recorded clears fail.
    pub fn fail_clears(&mut self, count: u32) {
        self.fail_clears = count;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn next(&mut self) -> NullHandle {
        let id = NullHandle(self.next_id);
        self.next_id += 1;
        id
    }

    fn assert_open(&self, cmd: NullHandle) {
        assert!(self.open.contains(&cmd), "{:?} is not recording", cmd);
    }
}

impl Backend for NullBackend {
    type Buffer = NullBuffer;
    type Texture = NullTexture;
    type Sampler = NullHandle;
    type Shader = NullHandle;
    type Pipeline = NullHandle;
    type CommandBuffer = NullHandle;

    fn init(&mut self, info: &ContextInfo) -> Result<DeviceLimits> {
        if self.adapters == 0 {
            return Err(GPUError::NoAdapter);
        }
        if let Some(idx) = info.adapter {
            if idx >= self.adapters {
                return Err(GPUError::NoSuitableAdapter);
            }
        }
        self.initialized = true;
        Ok(self.limits.clone())
    }

    fn wait_idle(&mut self) -> Result<()> {
        Ok(())
    }

    fn shutdown(&mut self) {
        if self.live.total() != 0 {
            log::warn!("Null backend shut down with live objects: {:?}", self.live);
        }
        self.initialized = false;
    }

    fn make_sampler(&mut self, _info: &SamplerInfo) -> Result<NullHandle> {
        self.stats.samplers_created += 1;
        self.live.samplers += 1;
        Ok(self.next())
    }

    fn destroy_sampler(&mut self, _sampler: NullHandle) {
        self.live.samplers -= 1;
    }

    fn make_buffer(&mut self, usage: BufferUsage, data: &[u8]) -> Result<NullBuffer> {
        if self.fail_buffers > 0 {
            self.fail_buffers -= 1;
            return Err(GPUError::OutOfMemory(data.len()));
        }
        self.stats.buffers_created += 1;
        self.live.buffers += 1;
        Ok(NullBuffer {
            id: self.next(),
            usage,
            size: data.len(),
        })
    }

    fn destroy_buffer(&mut self, _buffer: NullBuffer) {
        self.live.buffers -= 1;
    }

    fn make_texture(&mut self, info: &TextureInfo, data: &[&[u8]]) -> Result<NullTexture> {
        if data.len() != (info.levels * info.layers) as usize {
            return Err(GPUError::InvalidSource("level count mismatch"));
        }
        self.stats.textures_created += 1;
        self.live.textures += 1;
        Ok(NullTexture {
            id: self.next(),
            info: *info,
        })
    }

    fn destroy_texture(&mut self, _texture: NullTexture) {
        self.live.textures -= 1;
    }

    fn make_shader(&mut self, _stage: ShaderStage, _spirv: &[u32]) -> Result<NullHandle> {
        self.live.shaders += 1;
        Ok(self.next())
    }

    fn destroy_shader(&mut self, _shader: NullHandle) {
        self.live.shaders -= 1;
    }

    fn make_pipeline(
        &mut self,
        _record: &PipelineRecord,
        _vertex: NullHandle,
        _fragment: NullHandle,
    ) -> Result<NullHandle> {
        if self.fail_pipelines > 0 {
            self.fail_pipelines -= 1;
            return Err(GPUError::Unimplemented("pipeline build failure"));
        }
        self.stats.pipelines_created += 1;
        self.live.pipelines += 1;
        Ok(self.next())
    }

    fn destroy_pipeline(&mut self, _pipeline: NullHandle) {
        self.live.pipelines -= 1;
    }

    fn set_render_target(&mut self, _target: Option<&RenderTargetInfo>) -> Result<()> {
        Ok(())
    }

    fn configure_primary(&mut self, _extent: Extent, _color: Format) -> Result<()> {
        Ok(())
    }

    fn begin_commands(&mut self) -> Result<NullHandle> {
        let cmd = self.next();
        self.open.push(cmd);
        self.live.command_buffers += 1;
        Ok(cmd)
    }

    fn record_clear(&mut self, cmd: NullHandle, clear: &ClearRequest) -> Result<()> {
        self.assert_open(cmd);
        if self.fail_clears > 0 {
            self.fail_clears -= 1;
            return Err(GPUError::Unimplemented("clear failure"));
        }
        self.stats.clears.push(*clear);
        Ok(())
    }

    fn record_draw(&mut self, cmd: NullHandle, draw: &DrawCall<'_, Self>) -> Result<()> {
        self.assert_open(cmd);
        self.stats.draws.push(RecordedDraw {
            cmd,
            pipeline: draw.pipeline,
            vertex_buffer: draw.vertex_buffer.id,
            index_buffer: draw.index_buffer.id,
            texture: draw.texture.map(|(t, s)| (t.id, s)),
            index_count: draw.index_count,
            transforms: draw.transforms,
            viewport: draw.viewport,
        });
        Ok(())
    }

    fn submit_commands(&mut self, cmd: NullHandle) -> Result<()> {
        self.assert_open(cmd);
        self.open.retain(|c| *c != cmd);
        self.live.command_buffers -= 1;
        self.stats.submits += 1;
        Ok(())
    }

    fn create_swap_surface(
        &mut self,
        _window: &dyn HasRawWindowHandle,
        _vsync: bool,
    ) -> Result<()> {
        Err(GPUError::HeadlessDisplayNotSupported)
    }

    fn destroy_swap_surface(&mut self) {}

    fn present(&mut self) -> Result<()> {
        self.stats.presents += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_adapters_fail_init() {
        let mut backend = NullBackend::new().with_adapters(0);
        let err = backend.init(&ContextInfo::default()).unwrap_err();
        assert!(matches!(err, GPUError::NoAdapter));
        assert!(!backend.is_initialized());
    }

    #[test]
    fn injected_failures_are_consumed() {
        let mut backend = NullBackend::new();
        backend.fail_buffer_allocations(1);
        assert!(backend.make_buffer(BufferUsage::Vertex, &[0; 4]).is_err());
        let buffer = backend.make_buffer(BufferUsage::Vertex, &[0; 4]).unwrap();
        assert_eq!(buffer.size, 4);
        assert_eq!(backend.live.buffers, 1);
        backend.destroy_buffer(buffer);
        assert_eq!(backend.live.total(), 0);
    }

    #[test]
    fn submit_closes_the_command_buffer() {
        let mut backend = NullBackend::new();
        let cmd = backend.begin_commands().unwrap();
        backend.submit_commands(cmd).unwrap();
        assert_eq!(backend.stats.submits, 1);
        assert_eq!(backend.live.command_buffers, 0);
    }
}
