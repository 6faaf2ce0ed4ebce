//! XR Bridge demo application
//!
//! Runs an OpenXR-style frame loop against the software backend: two eye
//! swapchains are filled with animated colors, submitted as a projection
//! layer and composited side by side. The last presented frame can be
//! written to a PNG file.
//!
//! Usage: `bridge_demo [frame_count] [output.png]`

use std::sync::Arc;

use thiserror::Error;
use xr_bridge::foundation::handles::{InstanceHandle, SessionHandle, SpaceHandle, SwapchainHandle};
use xr_bridge::foundation::logging;
use xr_bridge::foundation::math::{identity_pose, Rect2Di};
use xr_bridge::gpu::backends::headless::{PresentedFrame, Texel};
use xr_bridge::gpu::{CommandQueue, GpuError, GpuImageHandle};
use xr_bridge::prelude::*;
use xr_bridge::runtime::{SystemId, View, ViewConfigurationView, ViewLocateInfo};

const DEFAULT_FRAME_COUNT: u32 = 90;

#[derive(Error, Debug)]
enum DemoError {
    #[error("Runtime error: {0}")]
    Xr(#[from] XrError),

    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to write image: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid frame count '{0}'")]
    FrameCount(String),

    #[error("No frame was presented")]
    NothingPresented,
}

/// One eye's swapchain and its images
struct EyeTarget {
    swapchain: SwapchainHandle,
    images: Vec<GpuImageHandle>,
    width: u32,
    height: u32,
}

struct DemoApp {
    runtime: Runtime,
    device: Arc<HeadlessDevice>,
    instance: InstanceHandle,
    session: SessionHandle,
    space: SpaceHandle,
    eyes: Vec<EyeTarget>,
    frames_submitted: u32,
}

impl DemoApp {
    fn new(settings: RuntimeSettings) -> Result<Self, DemoError> {
        let mut runtime = Runtime::new(settings)?;
        let instance = runtime.create_instance(&InstanceCreateInfo::new("bridge_demo").with_extension(MND_HEADLESS))?;
        let system = runtime.get_system(instance, FormFactor::HeadMountedDisplay)?;
        let requirements = runtime.get_software_graphics_requirements(instance, system)?;
        log::info!("Rendering on adapter {}", requirements.adapter.name);

        let device = Arc::new(HeadlessDevice::new()?);
        let session = runtime.create_session(instance, &SessionCreateInfo { system, device: device.clone() })?;
        let space = runtime.create_reference_space(session, &ReferenceSpaceCreateInfo {
            reference_space_type: ReferenceSpaceType::Local,
            pose_in_reference_space: identity_pose(),
        })?;

        let mut app = Self { runtime, device, instance, session, space, eyes: Vec::new(), frames_submitted: 0 };
        app.drain_events()?;
        app.runtime.begin_session(session, ViewConfigurationType::PrimaryStereo)?;
        app.drain_events()?;
        app.create_eye_targets(system)?;
        Ok(app)
    }

    fn create_eye_targets(&mut self, system: SystemId) -> Result<(), DemoError> {
        let config = ViewConfigurationType::PrimaryStereo;
        let count = self.runtime.enumerate_view_configuration_views(self.instance, system, config, &mut [])?;
        let mut views = vec![ViewConfigurationView::default(); count];
        self.runtime.enumerate_view_configuration_views(self.instance, system, config, &mut views)?;

        let format = Format::Rgba8Unorm.native_code(GraphicsApi::Software);
        let usage = SwapchainUsageFlags::COLOR_ATTACHMENT | SwapchainUsageFlags::SAMPLED;
        for view in views {
            let (width, height) = (view.recommended_image_rect_width, view.recommended_image_rect_height);
            let swapchain = self
                .runtime
                .create_swapchain(self.session, &SwapchainCreateInfo::new(format, width, height, usage))?;
            let image_count = self.runtime.enumerate_swapchain_images(swapchain, &mut [])?;
            let mut images = vec![GpuImageHandle(0); image_count];
            self.runtime.enumerate_swapchain_images(swapchain, &mut images)?;
            self.eyes.push(EyeTarget { swapchain, images, width, height });
        }
        log::info!("Created {} eye swapchains", self.eyes.len());
        Ok(())
    }

    fn drain_events(&mut self) -> Result<(), DemoError> {
        while let Some(event) = self.runtime.poll_event(self.instance)? {
            log::info!("Session state -> {:?} at {}ns", event.state, event.time);
        }
        Ok(())
    }

    /// Run one wait/begin/render/end cycle
    fn frame(&mut self) -> Result<(), DemoError> {
        let state = self.runtime.wait_frame(self.session)?;
        let status = self.runtime.begin_frame(self.session)?;
        if status != FrameBeginStatus::Success {
            log::debug!("begin_frame returned {status:?}");
        }

        let mut layers = Vec::new();
        if state.should_render {
            let mut views = [View::default(); 2];
            let (_, located) = self.runtime.locate_views(
                self.session,
                &ViewLocateInfo {
                    view_configuration_type: ViewConfigurationType::PrimaryStereo,
                    display_time: state.predicted_display_time,
                    space: self.space,
                },
                &mut views,
            )?;

            let mut projection_views = Vec::with_capacity(located);
            for (eye_index, view) in views.iter().take(located).enumerate() {
                let Some(eye) = self.eyes.get(eye_index) else { break };
                let index = self.runtime.acquire_swapchain_image(eye.swapchain)?;
                self.runtime.wait_swapchain_image(eye.swapchain, Timeout::Infinite)?;
                self.device.fill(eye.images[index], eye_color(eye_index, self.frames_submitted))?;
                self.runtime.release_swapchain_image(eye.swapchain)?;

                projection_views.push(ProjectionView {
                    pose: view.pose,
                    fov: view.fov,
                    sub_image: SwapchainSubImage {
                        swapchain: eye.swapchain,
                        image_rect: Rect2Di::new(0, 0, to_i32(eye.width), to_i32(eye.height)),
                        image_array_index: 0,
                    },
                });
            }
            layers.push(CompositionLayer::Projection(CompositionLayerProjection {
                layer_flags: CompositionLayerFlags::empty(),
                space: self.space,
                views: projection_views,
            }));
        }

        self.runtime.end_frame(self.session, &FrameEndInfo {
            display_time: state.predicted_display_time,
            environment_blend_mode: EnvironmentBlendMode::Opaque,
            layers,
        })?;
        self.frames_submitted += 1;
        log::trace!("Frame {} submitted", self.frames_submitted);
        Ok(())
    }

    fn run(&mut self, frame_count: u32) -> Result<(), DemoError> {
        log::info!("Running {frame_count} frames");
        for _ in 0..frame_count {
            self.frame()?;
            self.drain_events()?;
        }
        self.device.headless_queue().wait_idle()?;
        log::info!("Presented {} frames", self.device.present_count());

        let errors = self.device.validation_errors();
        if !errors.is_empty() {
            log::warn!("{} resource state mismatches reported", errors.len());
            for error in &errors {
                log::warn!("  {error}");
            }
        }
        Ok(())
    }

    fn shutdown(mut self) -> Result<(), DemoError> {
        self.runtime.request_exit_session(self.session)?;
        self.drain_events()?;
        self.runtime.end_session(self.session)?;
        self.drain_events()?;
        for eye in self.eyes.drain(..) {
            self.runtime.destroy_swapchain(eye.swapchain)?;
        }
        self.runtime.destroy_session(self.session)?;
        self.runtime.destroy_instance(self.instance)?;
        log::info!("Shutdown complete");
        Ok(())
    }
}

/// Slowly cycling color, warm for the left eye and cool for the right
#[allow(clippy::cast_precision_loss)]
fn eye_color(eye_index: usize, frame: u32) -> Texel {
    let phase = (frame % 120) as f32 / 120.0;
    let pulse = 0.5 + 0.5 * (phase * std::f32::consts::TAU).sin();
    if eye_index == 0 {
        [0.9, 0.3 * pulse, 0.1, 1.0]
    } else {
        [0.1, 0.3 * pulse, 0.9, 1.0]
    }
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn to_byte(channel: f32) -> u8 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let byte = (channel.clamp(0.0, 1.0) * 255.0).round() as u8;
    byte
}

fn write_png(frame: &PresentedFrame, path: &str) -> Result<(), DemoError> {
    let bytes: Vec<u8> = frame.texels.iter().flat_map(|texel| texel.map(to_byte)).collect();
    image::save_buffer(path, &bytes, frame.width, frame.height, image::ColorType::Rgba8)?;
    log::info!("Wrote {}x{} frame to {path}", frame.width, frame.height);
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = RuntimeSettings::load_or_default()?;
    logging::init_with_level(logging::parse_level(&settings.logging.level));
    settings.log_summary();

    let mut args = std::env::args().skip(1);
    let frame_count = match args.next() {
        Some(arg) => arg.parse().map_err(|_| DemoError::FrameCount(arg))?,
        None => DEFAULT_FRAME_COUNT,
    };
    let output = args.next();

    let mut app = DemoApp::new(settings)?;
    app.run(frame_count)?;
    if let Some(path) = output {
        let frame = app.device.last_presented().ok_or(DemoError::NothingPresented)?;
        write_png(&frame, &path)?;
    }
    app.shutdown()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eye_colors_differ() {
        let left = eye_color(0, 0);
        let right = eye_color(1, 0);
        assert!(left[0] > left[2]);
        assert!(right[2] > right[0]);
        assert_eq!(left[3], 1.0);
    }

    #[test]
    fn test_to_byte_clamps() {
        assert_eq!(to_byte(-1.0), 0);
        assert_eq!(to_byte(0.5), 128);
        assert_eq!(to_byte(2.0), 255);
    }

    #[test]
    fn test_demo_runs_frames() {
        let settings = RuntimeSettings::default().with_display_size(64, 32);
        let mut app = DemoApp::new(settings).unwrap();
        app.run(3).unwrap();

        let frame = app.device.last_presented().unwrap();
        assert_eq!((frame.width, frame.height), (64, 32));
        let left = frame.texel(0, 0);
        let right = frame.texel(63, 0);
        assert!(left[0] > left[2]);
        assert!(right[2] > right[0]);
        app.shutdown().unwrap();
    }
}
