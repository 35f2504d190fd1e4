use ash::vk;

use crate::{
    BlendFactor, BlendOp, BlendState, BorderColor, CompareOp, CullMode, DepthStencilState,
    Filter, Format, PolygonMode, SampleCount, SamplerAddressMode, SamplerInfo, SamplerMipmapMode,
    ShaderPrimitiveType, ShaderStage, StencilOp, StencilOpState, VertexOrdering, Viewport,
    WriteMask,
};

impl From<Filter> for vk::Filter {
    fn from(filter: Filter) -> Self {
        match filter {
            Filter::Nearest => vk::Filter::NEAREST,
            Filter::Linear => vk::Filter::LINEAR,
        }
    }
}

impl From<BlendFactor> for vk::BlendFactor {
    fn from(op: BlendFactor) -> Self {
        match op {
            BlendFactor::One => vk::BlendFactor::ONE,
            BlendFactor::Zero => vk::BlendFactor::ZERO,
            BlendFactor::SrcColor => vk::BlendFactor::SRC_COLOR,
            BlendFactor::InvSrcColor => vk::BlendFactor::ONE_MINUS_SRC_COLOR,
            BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
            BlendFactor::InvSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            BlendFactor::DstAlpha => vk::BlendFactor::DST_ALPHA,
            BlendFactor::InvDstAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
            BlendFactor::DstColor => vk::BlendFactor::DST_COLOR,
            BlendFactor::InvDstColor => vk::BlendFactor::ONE_MINUS_DST_COLOR,
            BlendFactor::BlendFactor => vk::BlendFactor::CONSTANT_ALPHA,
        }
    }
}

impl From<BlendOp> for vk::BlendOp {
    fn from(op: BlendOp) -> Self {
        match op {
            BlendOp::Add => vk::BlendOp::ADD,
            BlendOp::Subtract => vk::BlendOp::SUBTRACT,
            BlendOp::InvSubtract => vk::BlendOp::REVERSE_SUBTRACT,
            BlendOp::Min => vk::BlendOp::MIN,
            BlendOp::Max => vk::BlendOp::MAX,
        }
    }
}

impl From<WriteMask> for vk::ColorComponentFlags {
    fn from(op: WriteMask) -> Self {
        let mut flags = vk::ColorComponentFlags::empty();
        if op.r {
            flags |= vk::ColorComponentFlags::R;
        }
        if op.g {
            flags |= vk::ColorComponentFlags::G;
        }
        if op.b {
            flags |= vk::ColorComponentFlags::B;
        }
        if op.a {
            flags |= vk::ColorComponentFlags::A;
        }
        flags
    }
}

impl From<BlendState> for vk::PipelineColorBlendAttachmentState {
    fn from(state: BlendState) -> Self {
        vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(state.write_mask.into())
            .src_color_blend_factor(state.src_blend.into())
            .dst_color_blend_factor(state.dst_blend.into())
            .src_alpha_blend_factor(state.src_alpha_blend.into())
            .dst_alpha_blend_factor(state.dst_alpha_blend.into())
            .color_blend_op(state.blend_op.into())
            .alpha_blend_op(state.alpha_blend_op.into())
            .blend_enable(state.enable)
            .build()
    }
}

impl From<CullMode> for vk::CullModeFlags {
    fn from(mode: CullMode) -> Self {
        match mode {
            CullMode::None => vk::CullModeFlags::NONE,
            CullMode::Front => vk::CullModeFlags::FRONT,
            CullMode::Back => vk::CullModeFlags::BACK,
        }
    }
}

impl From<VertexOrdering> for vk::FrontFace {
    fn from(ordering: VertexOrdering) -> Self {
        match ordering {
            VertexOrdering::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
            VertexOrdering::Clockwise => vk::FrontFace::CLOCKWISE,
        }
    }
}

impl From<PolygonMode> for vk::PolygonMode {
    fn from(mode: PolygonMode) -> Self {
        match mode {
            PolygonMode::Fill => vk::PolygonMode::FILL,
            PolygonMode::Line => vk::PolygonMode::LINE,
            PolygonMode::Point => vk::PolygonMode::POINT,
        }
    }
}

impl From<CompareOp> for vk::CompareOp {
    fn from(op: CompareOp) -> Self {
        match op {
            CompareOp::Never => vk::CompareOp::NEVER,
            CompareOp::Less => vk::CompareOp::LESS,
            CompareOp::Equal => vk::CompareOp::EQUAL,
            CompareOp::LessOrEqual => vk::CompareOp::LESS_OR_EQUAL,
            CompareOp::Greater => vk::CompareOp::GREATER,
            CompareOp::NotEqual => vk::CompareOp::NOT_EQUAL,
            CompareOp::GreaterOrEqual => vk::CompareOp::GREATER_OR_EQUAL,
            CompareOp::Always => vk::CompareOp::ALWAYS,
        }
    }
}

impl From<StencilOp> for vk::StencilOp {
    fn from(op: StencilOp) -> Self {
        match op {
            StencilOp::Keep => vk::StencilOp::KEEP,
            StencilOp::Zero => vk::StencilOp::ZERO,
            StencilOp::Replace => vk::StencilOp::REPLACE,
            StencilOp::IncrementAndClamp => vk::StencilOp::INCREMENT_AND_CLAMP,
            StencilOp::DecrementAndClamp => vk::StencilOp::DECREMENT_AND_CLAMP,
            StencilOp::Invert => vk::StencilOp::INVERT,
            StencilOp::IncrementAndWrap => vk::StencilOp::INCREMENT_AND_WRAP,
            StencilOp::DecrementAndWrap => vk::StencilOp::DECREMENT_AND_WRAP,
        }
    }
}

impl From<StencilOpState> for vk::StencilOpState {
    fn from(state: StencilOpState) -> Self {
        vk::StencilOpState {
            fail_op: state.fail_op.into(),
            pass_op: state.pass_op.into(),
            depth_fail_op: state.depth_fail_op.into(),
            compare_op: state.compare_op.into(),
            compare_mask: state.compare_mask,
            write_mask: state.write_mask,
            reference: state.reference,
        }
    }
}

impl From<DepthStencilState> for vk::PipelineDepthStencilStateCreateInfo {
    fn from(state: DepthStencilState) -> Self {
        vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(state.should_test)
            .depth_write_enable(state.should_write)
            .depth_compare_op(state.compare_op.into())
            .depth_bounds_test_enable(state.bounds_test_enable)
            .min_depth_bounds(state.min_depth_bounds)
            .max_depth_bounds(state.max_depth_bounds)
            .stencil_test_enable(state.stencil_test_enable)
            .front(state.front.into())
            .back(state.back.into())
            .build()
    }
}

impl From<SamplerAddressMode> for vk::SamplerAddressMode {
    fn from(address_mode: SamplerAddressMode) -> Self {
        match address_mode {
            SamplerAddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
            SamplerAddressMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
            SamplerAddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
            SamplerAddressMode::ClampToBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
        }
    }
}

impl From<SamplerMipmapMode> for vk::SamplerMipmapMode {
    fn from(mipmap_mode: SamplerMipmapMode) -> Self {
        match mipmap_mode {
            SamplerMipmapMode::Nearest => vk::SamplerMipmapMode::NEAREST,
            SamplerMipmapMode::Linear => vk::SamplerMipmapMode::LINEAR,
        }
    }
}

impl From<BorderColor> for vk::BorderColor {
    fn from(border_color: BorderColor) -> Self {
        match border_color {
            BorderColor::OpaqueBlack => vk::BorderColor::INT_OPAQUE_BLACK,
            BorderColor::OpaqueWhite => vk::BorderColor::INT_OPAQUE_WHITE,
            BorderColor::TransparentBlack => vk::BorderColor::FLOAT_TRANSPARENT_BLACK,
        }
    }
}

impl From<SamplerInfo> for vk::SamplerCreateInfo {
    fn from(info: SamplerInfo) -> Self {
        vk::SamplerCreateInfo {
            mag_filter: info.mag_filter.into(),
            min_filter: info.min_filter.into(),
            address_mode_u: info.address_mode_u.into(),
            address_mode_v: info.address_mode_v.into(),
            address_mode_w: info.address_mode_w.into(),
            anisotropy_enable: if info.anisotropy_enable { vk::TRUE } else { vk::FALSE },
            max_anisotropy: info.max_anisotropy,
            border_color: info.border_color.into(),
            mipmap_mode: info.mipmap_mode.into(),
            max_lod: info.max_lod.unwrap_or(vk::LOD_CLAMP_NONE),
            ..Default::default()
        }
    }
}

impl From<SampleCount> for vk::SampleCountFlags {
    fn from(sample_count: SampleCount) -> Self {
        match sample_count {
            SampleCount::S1 => vk::SampleCountFlags::TYPE_1,
            SampleCount::S2 => vk::SampleCountFlags::TYPE_2,
            SampleCount::S4 => vk::SampleCountFlags::TYPE_4,
            SampleCount::S8 => vk::SampleCountFlags::TYPE_8,
            SampleCount::S16 => vk::SampleCountFlags::TYPE_16,
        }
    }
}

impl From<ShaderStage> for vk::ShaderStageFlags {
    fn from(stage: ShaderStage) -> Self {
        match stage {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }
}

impl From<ShaderPrimitiveType> for vk::Format {
    fn from(ty: ShaderPrimitiveType) -> Self {
        match ty {
            ShaderPrimitiveType::Vec2 => vk::Format::R32G32_SFLOAT,
            ShaderPrimitiveType::Vec3 => vk::Format::R32G32B32_SFLOAT,
            ShaderPrimitiveType::Vec4 => vk::Format::R32G32B32A32_SFLOAT,
        }
    }
}

impl From<Viewport> for vk::Viewport {
    fn from(vp: Viewport) -> Self {
        vk::Viewport {
            x: vp.x,
            y: vp.y,
            width: vp.width,
            height: vp.height,
            min_depth: vp.min_depth,
            max_depth: vp.max_depth,
        }
    }
}

pub(super) fn lib_to_vk_image_format(fmt: &Format) -> vk::Format {
    match fmt {
        Format::R8Unorm => vk::Format::R8_UNORM,
        Format::RGBA8 => vk::Format::R8G8B8A8_SRGB,
        Format::RGBA8Unorm => vk::Format::R8G8B8A8_UNORM,
        Format::BGRA8 => vk::Format::B8G8R8A8_SRGB,
        Format::BGRA8Unorm => vk::Format::B8G8R8A8_UNORM,
        Format::RGBA32F => vk::Format::R32G32B32A32_SFLOAT,
        Format::BC1 => vk::Format::BC1_RGBA_UNORM_BLOCK,
        Format::BC3 => vk::Format::BC3_UNORM_BLOCK,
        Format::D24S8 => vk::Format::D24_UNORM_S8_UINT,
        Format::D32F => vk::Format::D32_SFLOAT,
    }
}

pub(super) fn aspect_of(fmt: &Format) -> vk::ImageAspectFlags {
    match fmt {
        Format::D24S8 => vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
        Format::D32F => vk::ImageAspectFlags::DEPTH,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// Mip dimension along one axis.
pub(super) fn mip_dimension(dim: u32, level: u32) -> u32 {
    std::cmp::max(1, dim >> level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_formats_carry_depth_aspect() {
        assert!(aspect_of(&Format::D24S8).contains(vk::ImageAspectFlags::STENCIL));
        assert_eq!(aspect_of(&Format::D32F), vk::ImageAspectFlags::DEPTH);
        assert_eq!(aspect_of(&Format::BGRA8), vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn unclamped_samplers_use_lod_clamp_none() {
        let ci: vk::SamplerCreateInfo = SamplerInfo::default().into();
        assert_eq!(ci.max_lod, vk::LOD_CLAMP_NONE);

        let ci: vk::SamplerCreateInfo = SamplerInfo {
            max_lod: Some(0.0),
            ..Default::default()
        }
        .into();
        assert_eq!(ci.max_lod, 0.0);
    }

    #[test]
    fn mips_never_reach_zero() {
        assert_eq!(mip_dimension(256, 3), 32);
        assert_eq!(mip_dimension(4, 5), 1);
    }
}
