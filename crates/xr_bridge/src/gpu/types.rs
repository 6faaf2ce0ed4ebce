//! Resource descriptions shared by all backends

use bitflags::bitflags;

use super::{GraphicsApi, RootSignatureHandle};

/// Pixel formats offered for proxy swapchains and presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// 8-bit RGBA, linear
    Rgba8Unorm,
    /// 8-bit RGBA, sRGB encoded
    Rgba8UnormSrgb,
    /// 8-bit BGRA, linear
    Bgra8Unorm,
    /// 8-bit BGRA, sRGB encoded
    Bgra8UnormSrgb,
}

impl Format {
    const ALL: [Self; 4] = [Self::Rgba8Unorm, Self::Rgba8UnormSrgb, Self::Bgra8Unorm, Self::Bgra8UnormSrgb];

    /// Native format code as reported to applications of `api`
    ///
    /// The software backend uses DXGI numbering; Vulkan uses `VkFormat`.
    pub const fn native_code(self, api: GraphicsApi) -> i64 {
        match api {
            GraphicsApi::Software => match self {
                Self::Rgba8Unorm => 28,
                Self::Rgba8UnormSrgb => 29,
                Self::Bgra8Unorm => 87,
                Self::Bgra8UnormSrgb => 91,
            },
            GraphicsApi::Vulkan => match self {
                Self::Rgba8Unorm => 37,
                Self::Rgba8UnormSrgb => 43,
                Self::Bgra8Unorm => 44,
                Self::Bgra8UnormSrgb => 50,
            },
        }
    }

    /// Inverse of [`Format::native_code`]
    pub fn from_native_code(api: GraphicsApi, code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.native_code(api) == code)
    }

    /// Bytes per pixel
    pub const fn bytes_per_pixel(self) -> u64 {
        4
    }

    /// Whether texel values are sRGB encoded
    pub const fn is_srgb(self) -> bool {
        matches!(self, Self::Rgba8UnormSrgb | Self::Bgra8UnormSrgb)
    }
}

bitflags! {
    /// Swapchain usage bits, numbered as in `XrSwapchainUsageFlags`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SwapchainUsageFlags: u64 {
        /// Rendered to as a color attachment
        const COLOR_ATTACHMENT = 0x0000_0001;
        /// Rendered to as a depth/stencil attachment
        const DEPTH_STENCIL_ATTACHMENT = 0x0000_0002;
        /// Written through unordered access
        const UNORDERED_ACCESS = 0x0000_0004;
        /// Copy source
        const TRANSFER_SRC = 0x0000_0008;
        /// Copy destination
        const TRANSFER_DST = 0x0000_0010;
        /// Sampled in shaders
        const SAMPLED = 0x0000_0020;
        /// Viewed with a different format
        const MUTABLE_FORMAT = 0x0000_0040;
        /// Read as an input attachment (`XR_MND_swapchain_usage_input_attachment_bit`)
        const INPUT_ATTACHMENT_MND = 0x0000_0080;
    }
}

bitflags! {
    /// Resource states, numbered as in `D3D12_RESOURCE_STATES`
    ///
    /// The empty set is the common state, which is also the present state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceState: u32 {
        /// Bound as a render target
        const RENDER_TARGET = 0x4;
        /// Written through unordered access
        const UNORDERED_ACCESS = 0x8;
        /// Bound as a writable depth buffer
        const DEPTH_WRITE = 0x10;
        /// Sampled by pixel shaders
        const PIXEL_SHADER_RESOURCE = 0x80;
        /// Copy destination
        const COPY_DEST = 0x400;
        /// Copy source
        const COPY_SOURCE = 0x800;
    }
}

impl ResourceState {
    /// Common/present state
    pub const PRESENT: Self = Self::empty();
}

bitflags! {
    /// Allocation flags for images
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceFlags: u32 {
        /// May be bound as a render target
        const ALLOW_RENDER_TARGET = 0x1;
        /// May be bound as a depth/stencil target
        const ALLOW_DEPTH_STENCIL = 0x2;
        /// May be written through unordered access
        const ALLOW_UNORDERED_ACCESS = 0x4;
    }
}

/// Image allocation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDesc {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel format
    pub format: Format,
    /// Allocation flags
    pub flags: ResourceFlags,
    /// State the image starts in
    pub initial_state: ResourceState,
}

impl ImageDesc {
    /// Allocation size in bytes
    pub const fn size_in_bytes(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.format.bytes_per_pixel()
    }
}

/// Kind of descriptor a heap stores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    /// Render target views
    RenderTarget,
    /// Shader resource views
    ShaderResource,
    /// Samplers
    Sampler,
}

/// Texture filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    /// Nearest texel
    Point,
    /// Bilinear
    Linear,
}

/// Sampler parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerDesc {
    /// Minification and magnification filter
    pub filter: Filter,
    /// Clamp coordinates to the edge instead of wrapping
    pub clamp_to_edge: bool,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self { filter: Filter::Point, clamp_to_edge: true }
    }
}

/// One root signature slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootParameter {
    /// Descriptor table of shader resource views
    ShaderResourceTable,
    /// Descriptor table of samplers
    SamplerTable,
    /// Inline 32-bit constants
    Constants {
        /// Number of 32-bit values
        count: u32,
    },
}

/// Root signature layout
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RootSignatureDesc {
    /// Slots in binding order
    pub parameters: Vec<RootParameter>,
}

/// Programs the software backend implements natively
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinShader {
    /// Full-screen triangle emitting layer UVs
    LayeringVertex,
    /// Layer sampling with alpha handling
    LayeringPixel,
}

/// Shader code handed to pipeline creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShaderBytecode {
    /// A program built into the backend
    Builtin(BuiltinShader),
    /// SPIR-V words
    SpirV(Vec<u32>),
}

/// Graphics pipeline parameters
///
/// There is no input layout: vertices are generated from the vertex index.
/// Culling is disabled and blending overwrites the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineDesc {
    /// Layout the pipeline is bound with
    pub root_signature: RootSignatureHandle,
    /// Vertex program
    pub vertex_shader: ShaderBytecode,
    /// Pixel program
    pub pixel_shader: ShaderBytecode,
    /// Format of the single render target
    pub render_target_format: Format,
}

/// Presentation swap chain parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapChainDesc {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Back buffer format
    pub format: Format,
    /// Number of back buffers
    pub buffer_count: u32,
    /// Window title where a window is created
    pub title: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_codes() {
        assert_eq!(Format::Rgba8Unorm.native_code(GraphicsApi::Software), 28);
        assert_eq!(Format::Rgba8UnormSrgb.native_code(GraphicsApi::Software), 29);
        assert_eq!(Format::Bgra8UnormSrgb.native_code(GraphicsApi::Vulkan), 50);
        assert_eq!(Format::from_native_code(GraphicsApi::Vulkan, 37), Some(Format::Rgba8Unorm));
        assert_eq!(Format::from_native_code(GraphicsApi::Software, 37), None);
    }

    #[test]
    fn test_present_is_common_state() {
        assert!(ResourceState::PRESENT.is_empty());
        assert_eq!(ResourceState::PIXEL_SHADER_RESOURCE.bits(), 0x80);
    }

    #[test]
    fn test_image_size() {
        let desc = ImageDesc {
            width: 4,
            height: 2,
            format: Format::Rgba8Unorm,
            flags: ResourceFlags::ALLOW_RENDER_TARGET,
            initial_state: ResourceState::PRESENT,
        };
        assert_eq!(desc.size_in_bytes(), 32);
    }
}
