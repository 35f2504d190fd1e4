use bitflags::bitflags;
#[cfg(feature = "gfxdev-serde")]
use serde::{Deserialize, Serialize};

/// Environment variable that turns on backend validation layers.
pub const VALIDATION_ENV: &str = "GFXDEV_VALIDATION";

/// Number of entries in a device sampler bank, one per [`ClampFlags`] value.
pub const SAMPLER_COUNT: usize = 16;

#[repr(C)]
#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "gfxdev-serde", derive(Serialize, Deserialize))]
pub enum Format {
    R8Unorm,
    RGBA8,
    RGBA8Unorm,
    BGRA8,
    #[default]
    BGRA8Unorm,
    RGBA32F,
    /// 4x4 blocks, 8 bytes each.
    BC1,
    /// 4x4 blocks, 16 bytes each.
    BC3,
    D24S8,
    D32F,
}

impl Format {
    pub fn is_compressed(self) -> bool {
        matches!(self, Format::BC1 | Format::BC3)
    }

    pub fn is_depth(self) -> bool {
        matches!(self, Format::D24S8 | Format::D32F)
    }

    /// Bytes needed for one mip level of `width` x `height` texels.
    pub fn level_size(self, width: u32, height: u32) -> usize {
        let (w, h) = (width.max(1) as usize, height.max(1) as usize);
        match self {
            Format::R8Unorm => w * h,
            Format::RGBA8
            | Format::RGBA8Unorm
            | Format::BGRA8
            | Format::BGRA8Unorm
            | Format::D24S8
            | Format::D32F => w * h * 4,
            Format::RGBA32F => w * h * 16,
            Format::BC1 => ((w + 3) / 4) * ((h + 3) / 4) * 8,
            Format::BC3 => ((w + 3) / 4) * ((h + 3) / 4) * 16,
        }
    }
}

#[repr(C)]
#[derive(Hash, Debug, Copy, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "gfxdev-serde", derive(Serialize, Deserialize))]
pub enum SampleCount {
    #[default]
    S1,
    S2,
    S4,
    S8,
    S16,
}

impl SampleCount {
    /// Rounds `samples` to the closest supported power of two.
    pub fn from_samples(samples: u32) -> Self {
        let clamped = samples.clamp(1, 16);

        let next_pow2 = clamped.next_power_of_two();
        let prev_pow2 = next_pow2 >> 1;

        let closest_pow2 = if next_pow2 - clamped < clamped - prev_pow2 {
            next_pow2
        } else {
            prev_pow2.max(1)
        };

        match closest_pow2 {
            1 => Self::S1,
            2 => Self::S2,
            4 => Self::S4,
            8 => Self::S8,
            _ => Self::S16,
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            Self::S1 => 1,
            Self::S2 => 2,
            Self::S4 => 4,
            Self::S8 => 8,
            Self::S16 => 16,
        }
    }
}

#[repr(C)]
#[derive(Hash, Default, Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "gfxdev-serde", derive(Serialize, Deserialize))]
pub enum Filter {
    Nearest,
    #[default]
    Linear,
}

#[repr(C)]
#[derive(Hash, Default, Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "gfxdev-serde", derive(Serialize, Deserialize))]
pub enum SamplerAddressMode {
    #[default]
    Repeat,
    MirroredRepeat,
    ClampToEdge,
    ClampToBorder,
}

#[repr(C)]
#[derive(Hash, Default, Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "gfxdev-serde", derive(Serialize, Deserialize))]
pub enum SamplerMipmapMode {
    Nearest,
    #[default]
    Linear,
}

#[repr(C)]
#[derive(Hash, Default, Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "gfxdev-serde", derive(Serialize, Deserialize))]
pub enum BorderColor {
    #[default]
    OpaqueBlack,
    OpaqueWhite,
    TransparentBlack,
}

bitflags! {
    /// Per-layer sampling flags. Every combination names one slot of the
    /// device sampler bank.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "gfxdev-serde", derive(Serialize, Deserialize))]
    pub struct ClampFlags: u32 {
        const CLAMP_U = 0x1;
        const CLAMP_V = 0x2;
        const NEAREST = 0x4;
        const NO_MIPMAP = 0x8;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "gfxdev-serde", derive(Serialize, Deserialize))]
pub struct SamplerInfo {
    pub mag_filter: Filter,
    pub min_filter: Filter,
    pub mipmap_mode: SamplerMipmapMode,
    pub address_mode_u: SamplerAddressMode,
    pub address_mode_v: SamplerAddressMode,
    pub address_mode_w: SamplerAddressMode,
    pub anisotropy_enable: bool,
    pub max_anisotropy: f32,
    pub border_color: BorderColor,
    /// `None` leaves the LOD range unclamped.
    pub max_lod: Option<f32>,
}

impl Default for SamplerInfo {
    fn default() -> Self {
        SamplerInfo {
            mag_filter: Filter::Linear,
            min_filter: Filter::Linear,
            mipmap_mode: SamplerMipmapMode::Linear,
            address_mode_u: SamplerAddressMode::Repeat,
            address_mode_v: SamplerAddressMode::Repeat,
            address_mode_w: SamplerAddressMode::Repeat,
            anisotropy_enable: true,
            max_anisotropy: 16.0,
            border_color: BorderColor::OpaqueBlack,
            max_lod: None,
        }
    }
}

impl SamplerInfo {
    /// Sampler configuration stored in bank slot `flags`.
    pub fn for_clamp_flags(flags: ClampFlags, max_anisotropy: f32) -> Self {
        let address = |clamp: bool| {
            if clamp {
                SamplerAddressMode::ClampToEdge
            } else {
                SamplerAddressMode::Repeat
            }
        };
        let nearest = flags.contains(ClampFlags::NEAREST);
        let filter = if nearest { Filter::Nearest } else { Filter::Linear };

        SamplerInfo {
            mag_filter: filter,
            min_filter: filter,
            mipmap_mode: if nearest {
                SamplerMipmapMode::Nearest
            } else {
                SamplerMipmapMode::Linear
            },
            address_mode_u: address(flags.contains(ClampFlags::CLAMP_U)),
            address_mode_v: address(flags.contains(ClampFlags::CLAMP_V)),
            anisotropy_enable: !nearest && max_anisotropy > 1.0,
            max_anisotropy,
            max_lod: flags.contains(ClampFlags::NO_MIPMAP).then_some(0.0),
            ..Default::default()
        }
    }
}

#[repr(C)]
#[derive(Debug, Hash, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "gfxdev-serde", derive(Serialize, Deserialize))]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "gfxdev-serde", derive(Serialize, Deserialize))]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    pub fn from_extent(extent: Extent) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::from_extent(Extent {
            width: 1280,
            height: 1024,
        })
    }
}

/// Clears requested for the next recording scope. Consumed by the first draw
/// and reset on submit.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClearRequest {
    pub color: Option<[f32; 4]>,
    pub depth: Option<f32>,
}

impl ClearRequest {
    pub fn is_empty(&self) -> bool {
        self.color.is_none() && self.depth.is_none()
    }
}

/// Attachment formats a pipeline object is compiled against.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "gfxdev-serde", derive(Serialize, Deserialize))]
pub struct TargetFormats {
    pub color: Format,
    pub depth: Option<Format>,
    pub samples: SampleCount,
}

/// Offscreen render target description. `None` at the façade means the
/// primary (swap surface or default offscreen) target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTargetInfo {
    pub extent: Extent,
    pub formats: TargetFormats,
}

#[repr(C)]
#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "gfxdev-serde", derive(Serialize, Deserialize))]
pub enum BufferUsage {
    Vertex,
    Index,
    Uniform,
}

#[repr(C)]
#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "gfxdev-serde", derive(Serialize, Deserialize))]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

/// Texture creation parameters handed to a backend. Level data is passed
/// separately, layer-major.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureInfo {
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub levels: u32,
    /// 1 for 2D textures, 6 for cubemaps.
    pub layers: u32,
}

/// What the selected adapter can do, reported by the backend at init.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceLimits {
    pub adapter_name: String,
    pub max_texture_dimension: u32,
    pub max_anisotropy: f32,
    pub max_samples: SampleCount,
    pub supports_tile_memory: bool,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            adapter_name: String::new(),
            max_texture_dimension: 4096,
            max_anisotropy: 16.0,
            max_samples: SampleCount::S8,
            supports_tile_memory: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "gfxdev-serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "gfxdev-serde", serde(default))]
pub struct ContextInfo {
    pub application_name: String,
    /// Index into the enumerated adapters. `None` takes the first one that
    /// qualifies.
    pub adapter: Option<usize>,
    pub enable_validation: bool,
    pub framebuffer_format: Format,
    pub depth_format: Format,
    pub sample_count: SampleCount,
    pub max_anisotropy: f32,
    pub extent: Extent,
    pub vsync: bool,
}

impl Default for ContextInfo {
    fn default() -> Self {
        Self {
            application_name: "gfxdev".to_string(),
            adapter: None,
            enable_validation: std::env::var(VALIDATION_ENV)
                .map(|v| v == "1")
                .unwrap_or(false),
            framebuffer_format: Format::BGRA8Unorm,
            depth_format: Format::D24S8,
            sample_count: SampleCount::S1,
            max_anisotropy: 16.0,
            extent: Extent {
                width: 1280,
                height: 1024,
            },
            vsync: true,
        }
    }
}

impl ContextInfo {
    pub fn target_formats(&self) -> TargetFormats {
        TargetFormats {
            color: self.framebuffer_format,
            depth: Some(self.depth_format),
            samples: self.sample_count,
        }
    }
}
