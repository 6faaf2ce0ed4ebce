//! Per-image lifecycle state and usage-derived resource state

use crate::gpu::{ResourceFlags, ResourceState, SwapchainUsageFlags};

/// Lifecycle state of one ring slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageState {
    /// Owned by the runtime; may be acquired
    Released,
    /// Handed to the application; must be waited on before rendering
    Acquired,
    /// Waited on; the application may render into it
    RenderTarget,
}

/// Native resource state and allocation flags for a usage bitset
///
/// States of several usages accumulate, as do allocation flags. The mutable
/// format bit has no effect.
pub fn resource_usage(usage: SwapchainUsageFlags) -> (ResourceState, ResourceFlags) {
    let mut state = ResourceState::PRESENT;
    let mut flags = ResourceFlags::empty();

    if usage.contains(SwapchainUsageFlags::COLOR_ATTACHMENT) {
        flags |= ResourceFlags::ALLOW_RENDER_TARGET;
    }
    if usage.contains(SwapchainUsageFlags::DEPTH_STENCIL_ATTACHMENT) {
        state |= ResourceState::DEPTH_WRITE;
        flags |= ResourceFlags::ALLOW_DEPTH_STENCIL;
    }
    if usage.contains(SwapchainUsageFlags::UNORDERED_ACCESS) {
        state |= ResourceState::UNORDERED_ACCESS;
        flags |= ResourceFlags::ALLOW_UNORDERED_ACCESS;
    }
    if usage.contains(SwapchainUsageFlags::TRANSFER_SRC) {
        state |= ResourceState::COPY_SOURCE;
    }
    if usage.contains(SwapchainUsageFlags::TRANSFER_DST) {
        state |= ResourceState::COPY_DEST;
    }
    if usage.intersects(SwapchainUsageFlags::SAMPLED | SwapchainUsageFlags::INPUT_ATTACHMENT_MND) {
        state |= ResourceState::PIXEL_SHADER_RESOURCE;
    }

    (state, flags)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_sampled() {
        let (state, flags) = resource_usage(SwapchainUsageFlags::COLOR_ATTACHMENT | SwapchainUsageFlags::SAMPLED);
        assert_eq!(state, ResourceState::PIXEL_SHADER_RESOURCE);
        assert_eq!(flags, ResourceFlags::ALLOW_RENDER_TARGET);
    }

    #[test]
    fn test_color_only_stays_common() {
        let (state, flags) = resource_usage(SwapchainUsageFlags::COLOR_ATTACHMENT);
        assert_eq!(state, ResourceState::PRESENT);
        assert_eq!(flags, ResourceFlags::ALLOW_RENDER_TARGET);
    }

    #[test]
    fn test_depth_and_uav() {
        let (state, flags) = resource_usage(SwapchainUsageFlags::DEPTH_STENCIL_ATTACHMENT);
        assert_eq!(state, ResourceState::DEPTH_WRITE);
        assert_eq!(flags, ResourceFlags::ALLOW_DEPTH_STENCIL);

        let (state, flags) = resource_usage(SwapchainUsageFlags::UNORDERED_ACCESS);
        assert_eq!(state, ResourceState::UNORDERED_ACCESS);
        assert_eq!(flags, ResourceFlags::ALLOW_UNORDERED_ACCESS);
    }

    #[test]
    fn test_transfer_bits_accumulate() {
        let (state, flags) = resource_usage(SwapchainUsageFlags::TRANSFER_SRC | SwapchainUsageFlags::TRANSFER_DST);
        assert_eq!(state, ResourceState::COPY_SOURCE | ResourceState::COPY_DEST);
        assert!(flags.is_empty());
    }

    #[test]
    fn test_input_attachment_is_shader_readable() {
        let (state, _) = resource_usage(SwapchainUsageFlags::INPUT_ATTACHMENT_MND);
        assert_eq!(state, ResourceState::PIXEL_SHADER_RESOURCE);
    }

    #[test]
    fn test_mutable_format_is_ignored() {
        assert_eq!(
            resource_usage(SwapchainUsageFlags::MUTABLE_FORMAT),
            (ResourceState::PRESENT, ResourceFlags::empty())
        );
    }
}
