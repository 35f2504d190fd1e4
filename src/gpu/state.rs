//! Fixed-function state that, together with the bound shaders, identifies one
//! compiled pipeline object.
//!
//! Every type here compares field by field. Floating point fields compare and
//! hash by bit pattern so that `Hash` always agrees with `Eq`.

use std::hash::{Hash, Hasher};

#[cfg(feature = "gfxdev-serde")]
use serde::{Deserialize, Serialize};

#[repr(C)]
#[derive(Hash, Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "gfxdev-serde", derive(Serialize, Deserialize))]
pub enum BlendFactor {
    One,
    Zero,
    SrcColor,
    InvSrcColor,
    SrcAlpha,
    InvSrcAlpha,
    DstAlpha,
    InvDstAlpha,
    DstColor,
    InvDstColor,
    BlendFactor,
}

#[repr(C)]
#[derive(Hash, Debug, Copy, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "gfxdev-serde", derive(Serialize, Deserialize))]
pub enum BlendOp {
    #[default]
    Add,
    Subtract,
    InvSubtract,
    Min,
    Max,
}

#[repr(C)]
#[derive(Hash, Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "gfxdev-serde", derive(Serialize, Deserialize))]
pub struct WriteMask {
    pub r: bool,
    pub g: bool,
    pub b: bool,
    pub a: bool,
}

impl Default for WriteMask {
    fn default() -> Self {
        Self {
            r: true,
            g: true,
            b: true,
            a: true,
        }
    }
}

#[derive(Hash, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "gfxdev-serde", derive(Serialize, Deserialize))]
pub struct BlendState {
    pub enable: bool,
    pub src_blend: BlendFactor,
    pub dst_blend: BlendFactor,
    pub blend_op: BlendOp,
    pub src_alpha_blend: BlendFactor,
    pub dst_alpha_blend: BlendFactor,
    pub alpha_blend_op: BlendOp,
    pub write_mask: WriteMask,
}

impl Default for BlendState {
    fn default() -> Self {
        Self {
            enable: false,
            src_blend: BlendFactor::One,
            dst_blend: BlendFactor::Zero,
            blend_op: BlendOp::Add,
            src_alpha_blend: BlendFactor::One,
            dst_alpha_blend: BlendFactor::Zero,
            alpha_blend_op: BlendOp::Add,
            write_mask: Default::default(),
        }
    }
}

#[derive(Hash, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "gfxdev-serde", derive(Serialize, Deserialize))]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

#[derive(Hash, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "gfxdev-serde", derive(Serialize, Deserialize))]
pub enum VertexOrdering {
    CounterClockwise,
    #[default]
    Clockwise,
}

#[derive(Hash, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "gfxdev-serde", derive(Serialize, Deserialize))]
pub enum PolygonMode {
    #[default]
    Fill,
    Line,
    Point,
}

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "gfxdev-serde", derive(Serialize, Deserialize))]
pub struct RasterState {
    pub culling: CullMode,
    pub front_face: VertexOrdering,
    pub depth_bias_enable: bool,
    pub depth_bias_constant: f32,
    pub depth_bias_slope: f32,
    pub depth_clamp_enable: bool,
    pub polygon_mode: PolygonMode,
    pub line_width: f32,
}

impl Default for RasterState {
    fn default() -> Self {
        Self {
            culling: CullMode::Back,
            front_face: VertexOrdering::Clockwise,
            depth_bias_enable: false,
            depth_bias_constant: 0.0,
            depth_bias_slope: 0.0,
            depth_clamp_enable: false,
            polygon_mode: PolygonMode::Fill,
            line_width: 1.0,
        }
    }
}

impl PartialEq for RasterState {
    fn eq(&self, other: &Self) -> bool {
        self.culling == other.culling
            && self.front_face == other.front_face
            && self.depth_bias_enable == other.depth_bias_enable
            && self.depth_bias_constant.to_bits() == other.depth_bias_constant.to_bits()
            && self.depth_bias_slope.to_bits() == other.depth_bias_slope.to_bits()
            && self.depth_clamp_enable == other.depth_clamp_enable
            && self.polygon_mode == other.polygon_mode
            && self.line_width.to_bits() == other.line_width.to_bits()
    }
}

impl Eq for RasterState {}

impl Hash for RasterState {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.culling.hash(state);
        self.front_face.hash(state);
        self.depth_bias_enable.hash(state);
        self.depth_bias_constant.to_bits().hash(state);
        self.depth_bias_slope.to_bits().hash(state);
        self.depth_clamp_enable.hash(state);
        self.polygon_mode.hash(state);
        self.line_width.to_bits().hash(state);
    }
}

#[repr(C)]
#[derive(Hash, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "gfxdev-serde", derive(Serialize, Deserialize))]
pub enum CompareOp {
    #[default]
    Never,
    Less,
    Equal,
    LessOrEqual,
    Greater,
    NotEqual,
    GreaterOrEqual,
    Always,
}

#[repr(C)]
#[derive(Hash, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "gfxdev-serde", derive(Serialize, Deserialize))]
pub enum StencilOp {
    #[default]
    Keep,
    Zero,
    Replace,
    IncrementAndClamp,
    DecrementAndClamp,
    Invert,
    IncrementAndWrap,
    DecrementAndWrap,
}

/// Zeroed by default, matching an all-zero native stencil state.
#[derive(Hash, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "gfxdev-serde", derive(Serialize, Deserialize))]
pub struct StencilOpState {
    pub fail_op: StencilOp,
    pub pass_op: StencilOp,
    pub depth_fail_op: StencilOp,
    pub compare_op: CompareOp,
    pub compare_mask: u32,
    pub write_mask: u32,
    pub reference: u32,
}

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "gfxdev-serde", derive(Serialize, Deserialize))]
pub struct DepthStencilState {
    pub should_test: bool,
    pub should_write: bool,
    pub compare_op: CompareOp,
    pub bounds_test_enable: bool,
    pub min_depth_bounds: f32,
    pub max_depth_bounds: f32,
    pub stencil_test_enable: bool,
    pub front: StencilOpState,
    pub back: StencilOpState,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self {
            should_test: true,
            should_write: true,
            compare_op: CompareOp::Less,
            bounds_test_enable: false,
            min_depth_bounds: 0.0,
            max_depth_bounds: 1.0,
            stencil_test_enable: false,
            front: Default::default(),
            back: Default::default(),
        }
    }
}

impl PartialEq for DepthStencilState {
    fn eq(&self, other: &Self) -> bool {
        self.should_test == other.should_test
            && self.should_write == other.should_write
            && self.compare_op == other.compare_op
            && self.bounds_test_enable == other.bounds_test_enable
            && self.min_depth_bounds.to_bits() == other.min_depth_bounds.to_bits()
            && self.max_depth_bounds.to_bits() == other.max_depth_bounds.to_bits()
            && self.stencil_test_enable == other.stencil_test_enable
            && self.front == other.front
            && self.back == other.back
    }
}

impl Eq for DepthStencilState {}

impl Hash for DepthStencilState {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.should_test.hash(state);
        self.should_write.hash(state);
        self.compare_op.hash(state);
        self.bounds_test_enable.hash(state);
        self.min_depth_bounds.to_bits().hash(state);
        self.max_depth_bounds.to_bits().hash(state);
        self.stencil_test_enable.hash(state);
        self.front.hash(state);
        self.back.hash(state);
    }
}

/// Interleaved vertex layouts understood by the pipeline.
#[repr(C)]
#[derive(Hash, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "gfxdev-serde", derive(Serialize, Deserialize))]
pub enum VertexFormat {
    /// vec2 position, vec2 uv, vec4 color.
    Simple,
    /// vec3 position, vec3 normal, vec2 uv, vec4 color.
    #[default]
    Standard,
    /// Standard followed by vec4 weights and vec4 bone indices.
    Skinned,
}

#[derive(Hash, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "gfxdev-serde", derive(Serialize, Deserialize))]
pub enum ShaderPrimitiveType {
    Vec2,
    Vec3,
    Vec4,
}

#[derive(Hash, Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexEntryInfo {
    pub format: ShaderPrimitiveType,
    pub location: u32,
    pub offset: u32,
}

const fn entry(format: ShaderPrimitiveType, location: u32, offset: u32) -> VertexEntryInfo {
    VertexEntryInfo {
        format,
        location,
        offset,
    }
}

const SIMPLE_ENTRIES: [VertexEntryInfo; 3] = [
    entry(ShaderPrimitiveType::Vec2, 0, 0),
    entry(ShaderPrimitiveType::Vec2, 1, 8),
    entry(ShaderPrimitiveType::Vec4, 2, 16),
];

const STANDARD_ENTRIES: [VertexEntryInfo; 4] = [
    entry(ShaderPrimitiveType::Vec3, 0, 0),
    entry(ShaderPrimitiveType::Vec3, 1, 12),
    entry(ShaderPrimitiveType::Vec2, 2, 24),
    entry(ShaderPrimitiveType::Vec4, 3, 32),
];

const SKINNED_ENTRIES: [VertexEntryInfo; 6] = [
    entry(ShaderPrimitiveType::Vec3, 0, 0),
    entry(ShaderPrimitiveType::Vec3, 1, 12),
    entry(ShaderPrimitiveType::Vec2, 2, 24),
    entry(ShaderPrimitiveType::Vec4, 3, 32),
    entry(ShaderPrimitiveType::Vec4, 4, 48),
    entry(ShaderPrimitiveType::Vec4, 5, 64),
];

impl VertexFormat {
    pub fn stride(self) -> u32 {
        match self {
            VertexFormat::Simple => 32,
            VertexFormat::Standard => 48,
            VertexFormat::Skinned => 80,
        }
    }

    pub fn entries(self) -> &'static [VertexEntryInfo] {
        match self {
            VertexFormat::Simple => &SIMPLE_ENTRIES,
            VertexFormat::Standard => &STANDARD_ENTRIES,
            VertexFormat::Skinned => &SKINNED_ENTRIES,
        }
    }
}

/// Id of a shader module registered with a device.
#[derive(Hash, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "gfxdev-serde", derive(Serialize, Deserialize))]
pub struct ShaderId(pub u32);

/// Everything about a draw's pipeline that is not the render target format.
///
/// Built once per distinct material/layer combination and never mutated
/// afterwards; the `with_*` helpers return modified copies.
#[derive(Hash, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "gfxdev-serde", derive(Serialize, Deserialize))]
pub struct PipelineStateDescriptor {
    pub blend: BlendState,
    pub raster: RasterState,
    pub depth_stencil: DepthStencilState,
    pub vertex_format: VertexFormat,
    pub vertex_shader: ShaderId,
    pub fragment_shader: ShaderId,
}

impl PipelineStateDescriptor {
    pub fn new(vertex_shader: ShaderId, fragment_shader: ShaderId) -> Self {
        Self {
            blend: Default::default(),
            raster: Default::default(),
            depth_stencil: Default::default(),
            vertex_format: Default::default(),
            vertex_shader,
            fragment_shader,
        }
    }

    pub fn with_blend(mut self, blend: BlendState) -> Self {
        self.blend = blend;
        self
    }

    pub fn with_raster(mut self, raster: RasterState) -> Self {
        self.raster = raster;
        self
    }

    pub fn with_depth_stencil(mut self, depth_stencil: DepthStencilState) -> Self {
        self.depth_stencil = depth_stencil;
        self
    }

    pub fn with_vertex_format(mut self, vertex_format: VertexFormat) -> Self {
        self.vertex_format = vertex_format;
        self
    }

    /// Copy with the depth bias constant multiplied by `scale`. A bias of zero
    /// stays zero, so unbiased states keep hitting the same cache entry.
    pub fn with_zbias_scale(mut self, scale: f32) -> Self {
        if self.raster.depth_bias_enable && scale != 1.0 {
            self.raster.depth_bias_constant *= scale;
        }
        self
    }
}
