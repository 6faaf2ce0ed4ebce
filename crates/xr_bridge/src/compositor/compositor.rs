//! Layer composition into the presentation target

use std::sync::Arc;

use crate::core::config::CompositorSettings;
use crate::core::error::{XrError, XrResult};
use crate::foundation::handles::SwapchainHandle;
use crate::foundation::math::Rect2Di;
use crate::gpu::{
    CommandList, CommandQueue, DescriptorHeapHandle, Format, GpuCommand, GpuFence, GpuImageHandle, GraphicsDevice,
    ResourceState, Timeout,
};
use crate::swapchain::ProxySwapchain;

use super::layers::{layer_constants, CompositionLayer};
use super::pipeline::CompositionPipeline;

/// Lookup of proxy swapchains referenced by layers
pub trait SwapchainResolver {
    /// The swapchain behind `handle`
    fn resolve(&self, handle: SwapchainHandle) -> XrResult<&ProxySwapchain>;
}

/// Presentation image the compositor draws into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositionTarget {
    /// Back buffer image
    pub image: GpuImageHandle,
    /// Heap holding its render target view
    pub rtv_heap: DescriptorHeapHandle,
    /// Slot of the view in `rtv_heap`
    pub rtv_slot: u32,
}

/// Record a transition of `image`, skipping it when the states match
///
/// Returns whether a barrier was recorded.
pub fn transition_image(cmd: &mut CommandList, image: GpuImageHandle, before: ResourceState, after: ResourceState) -> bool {
    if before == after {
        return false;
    }
    cmd.resource_barrier(image, before, after);
    true
}

/// Composites submitted layers and signals their swapchains
///
/// Holds one command list per presentation back buffer. A list is reset only
/// after the frame fence shows the GPU finished the submission that last used
/// it.
pub struct Compositor {
    queue: Arc<dyn CommandQueue>,
    pipeline: CompositionPipeline,
    command_lists: Vec<CommandList>,
    frame_fence: Arc<dyn GpuFence>,
    frame_fence_values: Vec<u64>,
    next_frame_fence_value: u64,
    clear_color: [f32; 4],
}

impl Compositor {
    /// Create the pipeline and `frame_count` command lists
    pub fn new(
        device: Arc<dyn GraphicsDevice>,
        settings: &CompositorSettings,
        frame_count: usize,
        target_format: Format,
    ) -> XrResult<Self> {
        if frame_count == 0 {
            return Err(XrError::ValidationFailure("Compositor needs at least one frame".to_string()));
        }
        let queue = device.queue();
        let frame_fence = device.create_fence(0)?;
        let pipeline = CompositionPipeline::new(device, &settings.shaders, target_format)?;
        let command_lists = (0..frame_count).map(|i| CommandList::new(format!("Compositor Frame {i}"))).collect();

        log::info!("Compositor created with {frame_count} frame command lists");
        Ok(Self {
            queue,
            pipeline,
            command_lists,
            frame_fence,
            frame_fence_values: vec![0; frame_count],
            next_frame_fence_value: 1,
            clear_color: settings.clear_color,
        })
    }

    /// Record the composition of `layers` into `target`
    ///
    /// The target is cleared first, so zero layers produce a frame of the
    /// clear color. Each view is drawn into its image rectangle shifted right
    /// by one rectangle width per view index, sampling the swapchain's most
    /// recently released image. Quad layers are not drawn.
    pub fn compose_image(
        &self,
        layers: &[CompositionLayer],
        swapchains: &dyn SwapchainResolver,
        target: &CompositionTarget,
        cmd: &mut CommandList,
    ) -> XrResult<()> {
        transition_image(cmd, target.image, ResourceState::PRESENT, ResourceState::RENDER_TARGET);
        cmd.set_render_target(target.rtv_heap, target.rtv_slot);
        cmd.clear_render_target(target.rtv_heap, target.rtv_slot, self.clear_color);

        for layer in layers {
            let CompositionLayer::Projection(projection) = layer else {
                log::debug!("Skipping quad layer");
                continue;
            };

            for (view_index, view) in (0i32..).zip(projection.views.iter()) {
                let sub_image = view.sub_image;
                let swapchain = swapchains.resolve(sub_image.swapchain)?;
                let slot = swapchain.last_released_index().ok_or_else(|| {
                    XrError::LayerInvalid(format!("{} has no released image", swapchain.label()))
                })?;
                let source = swapchain.images()[slot];
                #[allow(clippy::cast_possible_truncation)]
                let srv_slot = slot as u32;
                let rect = sub_image.image_rect;

                cmd.set_viewport_and_scissor(Rect2Di::new(
                    rect.offset.x + view_index * rect.extent.width,
                    rect.offset.y,
                    rect.extent.width,
                    rect.extent.height,
                ));

                let resting = swapchain.resource_state();
                transition_image(cmd, source, resting, ResourceState::PIXEL_SHADER_RESOURCE);

                cmd.record(GpuCommand::SetDescriptorHeaps {
                    shader_resources: swapchain.srv_heap(),
                    samplers: self.pipeline.sampler_heap(),
                });
                cmd.record(GpuCommand::SetGraphicsRootSignature(self.pipeline.root_signature()));
                cmd.record(GpuCommand::SetPipelineState(self.pipeline.pipeline()));
                cmd.record(GpuCommand::SetShaderResource { slot: srv_slot });
                cmd.record(GpuCommand::SetSampler { slot: 0 });
                cmd.record(GpuCommand::SetRootConstants(layer_constants(
                    projection.layer_flags,
                    rect,
                    swapchain.desc(),
                )));
                cmd.draw_instanced(3, 1);

                transition_image(cmd, source, ResourceState::PIXEL_SHADER_RESOURCE, resting);
            }
        }

        transition_image(cmd, target.image, ResourceState::RENDER_TARGET, ResourceState::PRESENT);
        Ok(())
    }

    /// Submit `cmd`, then signal every referenced swapchain and the frame fence
    ///
    /// Each referenced swapchain fence is signalled once with the fence value
    /// of its released slot, queued behind the composition work. Swapchains
    /// shared by several views, or with no release since the last frame, are
    /// not signalled again.
    pub fn execute_command_lists(
        &mut self,
        frame_index: usize,
        cmd: &CommandList,
        layers: &[CompositionLayer],
        swapchains: &dyn SwapchainResolver,
    ) -> XrResult<()> {
        self.queue.execute(cmd)?;

        for layer in layers {
            let CompositionLayer::Projection(projection) = layer else { continue };
            for view in &projection.views {
                let swapchain = swapchains.resolve(view.sub_image.swapchain)?;
                if let Some(value) = swapchain.claim_signal_value() {
                    self.queue.signal(swapchain.fence(), value)?;
                }
            }
        }

        let value = self.next_frame_fence_value;
        self.next_frame_fence_value += 1;
        self.frame_fence_values[frame_index] = value;
        self.queue.signal(&self.frame_fence, value)?;
        log::trace!("Frame {frame_index} submitted (frame fence {value})");
        Ok(())
    }

    /// Compose, submit and signal one frame using the list for `frame_index`
    pub fn compose_frame(
        &mut self,
        frame_index: usize,
        target: &CompositionTarget,
        layers: &[CompositionLayer],
        swapchains: &dyn SwapchainResolver,
    ) -> XrResult<()> {
        let frame_index = frame_index % self.command_lists.len();
        self.frame_fence.wait(self.frame_fence_values[frame_index], Timeout::Infinite)?;

        let mut cmd = std::mem::take(&mut self.command_lists[frame_index]);
        let result = Self::record(self, &mut cmd, layers, swapchains, target)
            .and_then(|()| self.execute_command_lists(frame_index, &cmd, layers, swapchains));
        self.command_lists[frame_index] = cmd;
        result
    }

    fn record(
        &self,
        cmd: &mut CommandList,
        layers: &[CompositionLayer],
        swapchains: &dyn SwapchainResolver,
        target: &CompositionTarget,
    ) -> XrResult<()> {
        cmd.reset()?;
        let composed = self.compose_image(layers, swapchains, target, cmd);
        cmd.close()?;
        composed
    }

    /// Block until every submitted frame has been executed
    pub fn wait_idle(&self) -> XrResult<()> {
        let last = self.next_frame_fence_value - 1;
        self.frame_fence.wait(last, Timeout::Infinite)?;
        Ok(())
    }

    /// Number of frame command lists
    pub fn frame_count(&self) -> usize {
        self.command_lists.len()
    }
}

impl Drop for Compositor {
    fn drop(&mut self) {
        if let Err(err) = self.wait_idle() {
            log::warn!("Compositor dropped with work in flight: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::{
        CompositionLayerFlags, CompositionLayerProjection, CompositionLayerQuad, EyeVisibility, ProjectionView,
        SwapchainSubImage,
    };
    use crate::core::config::CompositorSettings;
    use crate::foundation::handles::{Registry, SpaceHandle};
    use crate::foundation::math::{identity_pose, Fov};
    use crate::gpu::backends::headless::{HeadlessDevice, HeadlessFence};
    use crate::gpu::{DescriptorKind, PresentationSwapChain, SwapChainDesc, SwapchainUsageFlags};
    use crate::swapchain::ProxySwapchainDesc;

    const EYE_W: u32 = 4;
    const EYE_H: u32 = 2;
    const RED: [f32; 4] = [1.0, 0.0, 0.0, 1.0];
    const BLUE: [f32; 4] = [0.0, 0.0, 1.0, 1.0];

    impl SwapchainResolver for Registry<SwapchainHandle, ProxySwapchain> {
        fn resolve(&self, handle: SwapchainHandle) -> XrResult<&ProxySwapchain> {
            self.get(handle)
        }
    }

    struct Fixture {
        device: Arc<HeadlessDevice>,
        swap_chain: Box<dyn PresentationSwapChain>,
        rtv_heap: DescriptorHeapHandle,
        compositor: Compositor,
        swapchains: Registry<SwapchainHandle, ProxySwapchain>,
    }

    impl Fixture {
        fn new() -> Self {
            let device = Arc::new(HeadlessDevice::new().unwrap());
            let swap_chain = device
                .create_swap_chain(&SwapChainDesc {
                    width: EYE_W * 2,
                    height: EYE_H,
                    format: Format::Rgba8Unorm,
                    buffer_count: 2,
                    title: "Test".to_string(),
                })
                .unwrap();
            let rtv_heap = device.create_descriptor_heap(DescriptorKind::RenderTarget, 2, false).unwrap();
            for (slot, image) in (0u32..).zip(swap_chain.back_buffers()) {
                device.create_render_target_view(rtv_heap, slot, *image).unwrap();
            }
            let compositor = Compositor::new(device.clone(), &CompositorSettings::default(), 2, Format::Rgba8Unorm).unwrap();
            Self { device, swap_chain, rtv_heap, compositor, swapchains: Registry::new("swapchain") }
        }

        fn target(&self) -> CompositionTarget {
            let index = self.swap_chain.current_back_buffer_index();
            #[allow(clippy::cast_possible_truncation)]
            let rtv_slot = index as u32;
            CompositionTarget { image: self.swap_chain.back_buffers()[index], rtv_heap: self.rtv_heap, rtv_slot }
        }

        /// A swapchain whose released image is filled with `color`
        fn rendered_swapchain(&mut self, usage: SwapchainUsageFlags, color: [f32; 4]) -> SwapchainHandle {
            let desc = ProxySwapchainDesc { width: EYE_W, height: EYE_H, format: Format::Rgba8Unorm, usage };
            let mut proxy = ProxySwapchain::create(self.device.clone(), self.swapchains.len() as u64, desc, 2).unwrap();
            let index = proxy.acquire().unwrap();
            proxy.wait(Timeout::Infinite).unwrap();
            self.device.fill(proxy.images()[index], color).unwrap();
            proxy.release().unwrap();
            self.swapchains.insert(proxy)
        }

        fn present(&mut self, layers: &[CompositionLayer]) {
            let target = self.target();
            let index = self.swap_chain.current_back_buffer_index();
            self.compositor.compose_frame(index, &target, layers, &self.swapchains).unwrap();
            self.swap_chain.present(1).unwrap();
            self.device.queue().wait_idle().unwrap();
        }
    }

    fn stereo_layer(left: SwapchainHandle, right: SwapchainHandle, flags: CompositionLayerFlags) -> CompositionLayer {
        let view = |swapchain| ProjectionView {
            pose: identity_pose(),
            fov: Fov::symmetric(0.5),
            sub_image: SwapchainSubImage {
                swapchain,
                image_rect: Rect2Di::new(0, 0, EYE_W as i32, EYE_H as i32),
                image_array_index: 0,
            },
        };
        CompositionLayer::Projection(CompositionLayerProjection {
            layer_flags: flags,
            space: SpaceHandle::default(),
            views: vec![view(left), view(right)],
        })
    }

    #[test]
    fn test_transition_skips_identical_states() {
        let mut cmd = CommandList::new("t");
        cmd.reset().unwrap();
        let image = GpuImageHandle(7);
        assert!(!transition_image(&mut cmd, image, ResourceState::PIXEL_SHADER_RESOURCE, ResourceState::PIXEL_SHADER_RESOURCE));
        assert!(transition_image(&mut cmd, image, ResourceState::PRESENT, ResourceState::RENDER_TARGET));
        assert_eq!(cmd.barriers().count(), 1);
    }

    #[test]
    fn test_zero_layers_clears_without_drawing() {
        let mut fixture = Fixture::new();
        let target = fixture.target();
        let mut cmd = CommandList::new("zero");
        cmd.reset().unwrap();
        fixture.compositor.compose_image(&[], &fixture.swapchains, &target, &mut cmd).unwrap();
        cmd.close().unwrap();

        assert_eq!(cmd.draw_count(), 0);
        assert!(cmd.commands().iter().any(|c| matches!(c, GpuCommand::ClearRenderTarget { color, .. } if *color == [0.0, 0.0, 0.0, 1.0])));
        let barriers: Vec<_> = cmd.barriers().collect();
        assert_eq!(
            barriers,
            vec![
                (target.image, ResourceState::PRESENT, ResourceState::RENDER_TARGET),
                (target.image, ResourceState::RENDER_TARGET, ResourceState::PRESENT),
            ]
        );

        fixture.device.fill(target.image, RED).unwrap();
        fixture.present(&[]);
        let frame = fixture.device.last_presented().unwrap();
        assert!(frame.texels.iter().all(|t| *t == [0.0, 0.0, 0.0, 1.0]));
        assert!(fixture.device.validation_errors().is_empty());
    }

    #[test]
    fn test_sampled_sources_need_no_barriers() {
        let mut fixture = Fixture::new();
        let usage = SwapchainUsageFlags::COLOR_ATTACHMENT | SwapchainUsageFlags::SAMPLED;
        let left = fixture.rendered_swapchain(usage, RED);
        let right = fixture.rendered_swapchain(usage, BLUE);
        let layer = stereo_layer(left, right, CompositionLayerFlags::empty());

        let mut cmd = CommandList::new("sampled");
        cmd.reset().unwrap();
        fixture.compositor.compose_image(&[layer], &fixture.swapchains, &fixture.target(), &mut cmd).unwrap();
        assert_eq!(cmd.draw_count(), 2);
        // Only the presentation target transitions
        assert_eq!(cmd.barriers().count(), 2);
    }

    #[test]
    fn test_source_barriers_are_paired_inverses() {
        let mut fixture = Fixture::new();
        let left = fixture.rendered_swapchain(SwapchainUsageFlags::COLOR_ATTACHMENT, RED);
        let right = fixture.rendered_swapchain(SwapchainUsageFlags::COLOR_ATTACHMENT, BLUE);
        let layer = stereo_layer(left, right, CompositionLayerFlags::empty());
        let target = fixture.target();

        let mut cmd = CommandList::new("paired");
        cmd.reset().unwrap();
        fixture.compositor.compose_image(&[layer], &fixture.swapchains, &target, &mut cmd).unwrap();

        let source: Vec<_> = cmd.barriers().filter(|(image, _, _)| *image != target.image).collect();
        assert_eq!(source.len(), 4);
        for pair in source.chunks(2) {
            let (image, before, after) = pair[0];
            assert_eq!(pair[1], (image, after, before));
            assert_eq!(before, ResourceState::PRESENT);
            assert_eq!(after, ResourceState::PIXEL_SHADER_RESOURCE);
        }
    }

    #[test]
    fn test_views_are_drawn_side_by_side() {
        let mut fixture = Fixture::new();
        let usage = SwapchainUsageFlags::COLOR_ATTACHMENT | SwapchainUsageFlags::SAMPLED;
        let left = fixture.rendered_swapchain(usage, RED);
        let right = fixture.rendered_swapchain(usage, BLUE);
        fixture.present(&[stereo_layer(left, right, CompositionLayerFlags::empty())]);

        let frame = fixture.device.last_presented().unwrap();
        assert_eq!((frame.width, frame.height), (EYE_W * 2, EYE_H));
        for y in 0..EYE_H {
            for x in 0..EYE_W {
                assert_eq!(frame.texel(x, y), RED);
                assert_eq!(frame.texel(x + EYE_W, y), BLUE);
            }
        }
        assert!(fixture.device.validation_errors().is_empty());
    }

    #[test]
    fn test_alpha_flags_reach_the_output() {
        let mut fixture = Fixture::new();
        let usage = SwapchainUsageFlags::SAMPLED;
        let translucent = [1.0, 0.5, 0.0, 0.5];
        let left = fixture.rendered_swapchain(usage, translucent);
        let right = fixture.rendered_swapchain(usage, translucent);

        fixture.present(&[stereo_layer(left, right, CompositionLayerFlags::empty())]);
        assert_eq!(fixture.device.last_presented().unwrap().texel(0, 0), [1.0, 0.5, 0.0, 1.0]);

        let flags = CompositionLayerFlags::BLEND_TEXTURE_SOURCE_ALPHA | CompositionLayerFlags::UNPREMULTIPLIED_ALPHA;
        fixture.present(&[stereo_layer(left, right, flags)]);
        assert_eq!(fixture.device.last_presented().unwrap().texel(0, 0), [0.5, 0.25, 0.0, 0.5]);
    }

    #[test]
    fn test_execution_signals_swapchain_fences() {
        let mut fixture = Fixture::new();
        let usage = SwapchainUsageFlags::SAMPLED;
        let left = fixture.rendered_swapchain(usage, RED);
        let right = fixture.rendered_swapchain(usage, BLUE);
        fixture.present(&[stereo_layer(left, right, CompositionLayerFlags::empty())]);

        for handle in [left, right] {
            let proxy = fixture.swapchains.get(handle).unwrap();
            let slot = proxy.last_released_index().unwrap();
            assert_eq!(proxy.fence().completed_value(), proxy.fence_value(slot).unwrap());
        }
    }

    fn signal_count(proxy: &ProxySwapchain) -> u64 {
        proxy.fence().as_any().downcast_ref::<HeadlessFence>().unwrap().signal_count()
    }

    #[test]
    fn test_shared_swapchain_is_signalled_once_per_frame() {
        let mut fixture = Fixture::new();
        let shared = fixture.rendered_swapchain(SwapchainUsageFlags::SAMPLED, RED);
        let layer = stereo_layer(shared, shared, CompositionLayerFlags::empty());
        fixture.present(std::slice::from_ref(&layer));
        assert_eq!(signal_count(fixture.swapchains.get(shared).unwrap()), 1);

        // No new release: the fence is not signalled again
        fixture.present(std::slice::from_ref(&layer));
        assert_eq!(signal_count(fixture.swapchains.get(shared).unwrap()), 1);

        let proxy = fixture.swapchains.get_mut(shared).unwrap();
        proxy.acquire().unwrap();
        proxy.wait(Timeout::Infinite).unwrap();
        proxy.release().unwrap();
        fixture.present(&[layer]);
        let proxy = fixture.swapchains.get(shared).unwrap();
        assert_eq!(signal_count(proxy), 2);
        assert_eq!(proxy.fence().completed_value(), 2);
        assert!(fixture.device.validation_errors().is_empty());
    }

    #[test]
    fn test_unreleased_swapchain_is_invalid_layer() {
        let mut fixture = Fixture::new();
        let desc = ProxySwapchainDesc {
            width: EYE_W,
            height: EYE_H,
            format: Format::Rgba8Unorm,
            usage: SwapchainUsageFlags::SAMPLED,
        };
        let fresh = ProxySwapchain::create(fixture.device.clone(), 9, desc, 2).unwrap();
        let fresh = fixture.swapchains.insert(fresh);
        let target = fixture.target();
        let index = fixture.swap_chain.current_back_buffer_index();
        let result = fixture.compositor.compose_frame(
            index,
            &target,
            &[stereo_layer(fresh, fresh, CompositionLayerFlags::empty())],
            &fixture.swapchains,
        );
        assert!(matches!(result, Err(XrError::LayerInvalid(_))));
    }

    #[test]
    fn test_quad_layers_are_skipped() {
        let mut fixture = Fixture::new();
        let quad_source = fixture.rendered_swapchain(SwapchainUsageFlags::SAMPLED, RED);
        let quad = CompositionLayer::Quad(CompositionLayerQuad {
            layer_flags: CompositionLayerFlags::empty(),
            space: SpaceHandle::default(),
            eye_visibility: EyeVisibility::Both,
            sub_image: SwapchainSubImage {
                swapchain: quad_source,
                image_rect: Rect2Di::new(0, 0, EYE_W as i32, EYE_H as i32),
                image_array_index: 0,
            },
            pose: identity_pose(),
            size: (1.0, 1.0),
        });
        let mut cmd = CommandList::new("quad");
        cmd.reset().unwrap();
        fixture.compositor.compose_image(&[quad], &fixture.swapchains, &fixture.target(), &mut cmd).unwrap();
        assert_eq!(cmd.draw_count(), 0);
    }
}
