//! Frame loop scenarios on the software backend

use std::sync::Arc;

use super::*;
use crate::compositor::{CompositionLayer, CompositionLayerFlags, CompositionLayerProjection, ProjectionView, SwapchainSubImage};
use crate::foundation::math::{identity_pose, Fov, Rect2Di};
use crate::gpu::backends::headless::{HeadlessDevice, Texel};
use crate::gpu::{CommandQueue, Format, GpuImageHandle, GraphicsApi, SwapchainUsageFlags, Timeout};

const DISPLAY_W: u32 = 64;
const DISPLAY_H: u32 = 32;
const EYE_W: u32 = DISPLAY_W / 2;

const RED: Texel = [1.0, 0.0, 0.0, 1.0];
const BLUE: Texel = [0.0, 0.0, 1.0, 1.0];
const BLACK: Texel = [0.0, 0.0, 0.0, 1.0];

struct Scene {
    runtime: Runtime,
    device: Arc<HeadlessDevice>,
    session: SessionHandle,
    space: SpaceHandle,
}

impl Scene {
    fn new() -> Self {
        let settings = RuntimeSettings::default().with_display_size(DISPLAY_W, DISPLAY_H);
        let mut runtime = Runtime::new(settings).unwrap();
        let instance = runtime.create_instance(&InstanceCreateInfo::new("scenario").with_extension(MND_HEADLESS)).unwrap();
        let system = runtime.get_system(instance, FormFactor::HeadMountedDisplay).unwrap();
        runtime.get_software_graphics_requirements(instance, system).unwrap();

        let device = Arc::new(HeadlessDevice::new().unwrap());
        let session = runtime.create_session(instance, &SessionCreateInfo { system, device: device.clone() }).unwrap();
        runtime.begin_session(session, ViewConfigurationType::PrimaryStereo).unwrap();
        let space = runtime
            .create_reference_space(session, &ReferenceSpaceCreateInfo {
                reference_space_type: ReferenceSpaceType::Local,
                pose_in_reference_space: identity_pose(),
            })
            .unwrap();
        Self { runtime, device, session, space }
    }

    fn swapchain(&mut self, usage: SwapchainUsageFlags) -> SwapchainHandle {
        let format = Format::Rgba8Unorm.native_code(GraphicsApi::Software);
        self.runtime.create_swapchain(self.session, &SwapchainCreateInfo::new(format, EYE_W, DISPLAY_H, usage)).unwrap()
    }

    fn images(&self, swapchain: SwapchainHandle) -> Vec<GpuImageHandle> {
        let count = self.runtime.enumerate_swapchain_images(swapchain, &mut []).unwrap();
        let mut images = vec![GpuImageHandle(0); count];
        self.runtime.enumerate_swapchain_images(swapchain, &mut images).unwrap();
        images
    }

    /// Acquire, wait, fill and release one image
    fn render(&mut self, swapchain: SwapchainHandle, color: Texel) {
        let index = self.runtime.acquire_swapchain_image(swapchain).unwrap();
        self.runtime.wait_swapchain_image(swapchain, Timeout::Infinite).unwrap();
        self.device.fill(self.images(swapchain)[index], color).unwrap();
        self.runtime.release_swapchain_image(swapchain).unwrap();
    }

    fn projection(&self, left: SwapchainHandle, right: SwapchainHandle) -> CompositionLayer {
        let view = |swapchain| ProjectionView {
            pose: identity_pose(),
            fov: Fov::symmetric(0.7),
            sub_image: SwapchainSubImage {
                swapchain,
                image_rect: Rect2Di::new(0, 0, EYE_W as i32, DISPLAY_H as i32),
                image_array_index: 0,
            },
        };
        CompositionLayer::Projection(CompositionLayerProjection {
            layer_flags: CompositionLayerFlags::empty(),
            space: self.space,
            views: vec![view(left), view(right)],
        })
    }

    fn submit(&mut self, layers: Vec<CompositionLayer>) -> XrResult<()> {
        let state = self.runtime.wait_frame(self.session)?;
        assert!(state.should_render);
        self.runtime.begin_frame(self.session)?;
        self.runtime.end_frame(self.session, &FrameEndInfo {
            display_time: state.predicted_display_time,
            environment_blend_mode: EnvironmentBlendMode::Opaque,
            layers,
        })
    }

    fn flush(&self) {
        self.device.headless_queue().wait_idle().unwrap();
    }
}

#[test]
fn test_stereo_frame_is_side_by_side() {
    let mut scene = Scene::new();
    let usage = SwapchainUsageFlags::COLOR_ATTACHMENT | SwapchainUsageFlags::SAMPLED;
    let left = scene.swapchain(usage);
    let right = scene.swapchain(usage);

    for _ in 0..3 {
        scene.render(left, RED);
        scene.render(right, BLUE);
        let layer = scene.projection(left, right);
        scene.submit(vec![layer]).unwrap();
    }
    scene.flush();

    let frame = scene.device.last_presented().unwrap();
    assert_eq!((frame.width, frame.height), (DISPLAY_W, DISPLAY_H));
    for y in 0..DISPLAY_H {
        assert_eq!(frame.texel(0, y), RED);
        assert_eq!(frame.texel(EYE_W - 1, y), RED);
        assert_eq!(frame.texel(EYE_W, y), BLUE);
        assert_eq!(frame.texel(DISPLAY_W - 1, y), BLUE);
    }
    assert_eq!(scene.device.present_count(), 3);
    assert!(scene.device.validation_errors().is_empty());
}

#[test]
fn test_empty_frame_is_cleared() {
    let mut scene = Scene::new();
    scene.submit(Vec::new()).unwrap();
    scene.flush();

    let frame = scene.device.last_presented().unwrap();
    assert!(frame.texels.iter().all(|t| *t == BLACK));
}

#[test]
fn test_swapchain_creation() {
    let mut scene = Scene::new();
    let swapchain = scene.swapchain(SwapchainUsageFlags::COLOR_ATTACHMENT | SwapchainUsageFlags::SAMPLED);
    assert_eq!(scene.images(swapchain).len(), 2);

    let mut formats = [0i64; 4];
    let count = scene.runtime.enumerate_swapchain_formats(scene.session, &mut formats).unwrap();
    assert!(formats[..count].contains(&Format::Rgba8Unorm.native_code(GraphicsApi::Software)));

    let usage = SwapchainUsageFlags::SAMPLED;
    let unknown = SwapchainCreateInfo::new(12345, EYE_W, DISPLAY_H, usage);
    assert!(matches!(
        scene.runtime.create_swapchain(scene.session, &unknown),
        Err(XrError::SwapchainFormatUnsupported)
    ));

    let format = Format::Rgba8Unorm.native_code(GraphicsApi::Software);
    let too_wide = SwapchainCreateInfo::new(format, DISPLAY_W + 1, DISPLAY_H, usage);
    assert!(matches!(
        scene.runtime.create_swapchain(scene.session, &too_wide),
        Err(XrError::ValidationFailure(_))
    ));

    let multisampled = SwapchainCreateInfo { sample_count: 4, ..SwapchainCreateInfo::new(format, EYE_W, DISPLAY_H, usage) };
    assert!(matches!(
        scene.runtime.create_swapchain(scene.session, &multisampled),
        Err(XrError::ValidationFailure(_))
    ));

    scene.runtime.destroy_swapchain(swapchain).unwrap();
    assert!(matches!(scene.runtime.acquire_swapchain_image(swapchain), Err(XrError::HandleInvalid)));
}

#[test]
fn test_image_cycle_order() {
    let mut scene = Scene::new();
    let swapchain = scene.swapchain(SwapchainUsageFlags::COLOR_ATTACHMENT);

    assert!(matches!(scene.runtime.release_swapchain_image(swapchain), Err(XrError::CallOrderInvalid)));
    assert_eq!(scene.runtime.acquire_swapchain_image(swapchain).unwrap(), 0);
    assert!(matches!(scene.runtime.acquire_swapchain_image(swapchain), Err(XrError::CallOrderInvalid)));

    scene.runtime.wait_swapchain_image(swapchain, Timeout::Infinite).unwrap();
    assert!(matches!(scene.runtime.acquire_swapchain_image(swapchain), Err(XrError::CallOrderInvalid)));
    scene.runtime.release_swapchain_image(swapchain).unwrap();
    assert!(matches!(scene.runtime.release_swapchain_image(swapchain), Err(XrError::CallOrderInvalid)));

    // The rejected acquires leave the ring cycling normally
    assert_eq!(scene.runtime.acquire_swapchain_image(swapchain).unwrap(), 1);
    scene.runtime.wait_swapchain_image(swapchain, Timeout::Infinite).unwrap();
    scene.runtime.release_swapchain_image(swapchain).unwrap();
}

#[test]
fn test_wait_times_out_while_composition_is_pending() {
    let mut scene = Scene::new();
    let swapchain = scene.swapchain(SwapchainUsageFlags::SAMPLED);
    let queue = scene.device.headless_queue();
    queue.pause();

    for color in [RED, BLUE] {
        scene.render(swapchain, color);
        let layer = scene.projection(swapchain, swapchain);
        scene.submit(vec![layer]).unwrap();
    }

    // Slot 0 comes around again while its first composition is still queued
    assert_eq!(scene.runtime.acquire_swapchain_image(swapchain).unwrap(), 0);
    assert!(matches!(
        scene.runtime.wait_swapchain_image(swapchain, Timeout::from_nanos(10_000_000)),
        Err(XrError::TimeoutExpired)
    ));

    queue.resume();
    scene.runtime.wait_swapchain_image(swapchain, Timeout::Infinite).unwrap();
    scene.runtime.release_swapchain_image(swapchain).unwrap();
}

#[test]
fn test_frame_call_order() {
    let mut scene = Scene::new();
    let session = scene.session;

    assert!(matches!(scene.runtime.begin_frame(session), Err(XrError::CallOrderInvalid)));
    let info = FrameEndInfo { display_time: 1, environment_blend_mode: EnvironmentBlendMode::Opaque, layers: Vec::new() };
    assert!(matches!(scene.runtime.end_frame(session, &info), Err(XrError::CallOrderInvalid)));

    let first = scene.runtime.wait_frame(session).unwrap();
    assert_eq!(scene.runtime.begin_frame(session).unwrap(), FrameBeginStatus::Success);
    let second = scene.runtime.wait_frame(session).unwrap();
    assert!(second.predicted_display_time > first.predicted_display_time);
    assert_eq!(scene.runtime.begin_frame(session).unwrap(), FrameBeginStatus::Discarded);

    let zero_time = FrameEndInfo { display_time: 0, ..info.clone() };
    assert!(matches!(scene.runtime.end_frame(session, &zero_time), Err(XrError::ValidationFailure(_))));
    let additive = FrameEndInfo { environment_blend_mode: EnvironmentBlendMode::Additive, ..info.clone() };
    assert!(matches!(
        scene.runtime.end_frame(session, &additive),
        Err(XrError::EnvironmentBlendModeUnsupported)
    ));
    scene.runtime.end_frame(session, &info).unwrap();
    assert!(matches!(scene.runtime.end_frame(session, &info), Err(XrError::CallOrderInvalid)));
}

#[test]
fn test_layer_validation() {
    let mut scene = Scene::new();
    let swapchain = scene.swapchain(SwapchainUsageFlags::SAMPLED);

    let unreleased = scene.projection(swapchain, swapchain);
    assert!(matches!(scene.submit(vec![unreleased]), Err(XrError::LayerInvalid(_))));

    scene.render(swapchain, RED);
    let mut layer = scene.projection(swapchain, swapchain);
    if let CompositionLayer::Projection(projection) = &mut layer {
        projection.views[1].sub_image.image_rect = Rect2Di::new(1, 0, EYE_W as i32, DISPLAY_H as i32);
    }
    assert!(matches!(scene.submit(vec![layer]), Err(XrError::SwapchainRectInvalid)));

    let mut mono = scene.projection(swapchain, swapchain);
    if let CompositionLayer::Projection(projection) = &mut mono {
        projection.views.pop();
    }
    assert!(matches!(scene.submit(vec![mono]), Err(XrError::ValidationFailure(_))));

    let layers = vec![scene.projection(swapchain, swapchain); MAX_LAYER_COUNT as usize + 1];
    assert!(matches!(scene.submit(layers), Err(XrError::LayerLimitExceeded)));
}

#[test]
fn test_locate_stereo_views() {
    let scene = Scene::new();
    let info = ViewLocateInfo {
        view_configuration_type: ViewConfigurationType::PrimaryStereo,
        display_time: 1,
        space: scene.space,
    };
    let (_, count) = scene.runtime.locate_views(scene.session, &info, &mut []).unwrap();
    assert_eq!(count, 2);

    let mut views = [View::default(); 2];
    let (state, _) = scene.runtime.locate_views(scene.session, &info, &mut views).unwrap();
    assert!(state.view_state_flags.contains(ViewStateFlags::POSITION_VALID));
    let half_ipd = scene.runtime.settings().display.ipd_meters / 2.0;
    approx::assert_relative_eq!(views[0].pose.translation.vector.x, -half_ipd);
    approx::assert_relative_eq!(views[1].pose.translation.vector.x, half_ipd);
    assert!(views[0].fov.angle_left < 0.0 && views[0].fov.angle_right > 0.0);
}

#[test]
fn test_destroying_a_session_releases_its_objects() {
    let mut scene = Scene::new();
    let swapchain = scene.swapchain(SwapchainUsageFlags::SAMPLED);
    scene.render(swapchain, RED);
    let layer = scene.projection(swapchain, swapchain);
    scene.submit(vec![layer]).unwrap();

    scene.runtime.destroy_session(scene.session).unwrap();
    assert!(matches!(scene.runtime.acquire_swapchain_image(swapchain), Err(XrError::HandleInvalid)));
    assert!(matches!(scene.runtime.destroy_space(scene.space), Err(XrError::HandleInvalid)));
    assert_eq!(scene.device.image_count(), 0);
}
