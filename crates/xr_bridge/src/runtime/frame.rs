//! The wait/begin/end frame cycle

use crate::compositor::CompositionLayer;
use crate::core::error::{XrError, XrResult};
use crate::foundation::handles::SessionHandle;

use super::system::{blend_mode_supported, EnvironmentBlendMode, MAX_LAYER_COUNT};
use super::{Duration, Runtime, Time};

/// Timing returned by [`Runtime::wait_frame`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameState {
    /// When the next frame is expected on the display
    pub predicted_display_time: Time,
    /// Time between display refreshes
    pub predicted_display_period: Duration,
    /// Whether rendered content would be visible
    pub should_render: bool,
}

/// Outcome of [`Runtime::begin_frame`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameBeginStatus {
    /// A new frame was begun
    Success,
    /// The previously begun frame was never ended and is discarded
    Discarded,
}

/// Content submitted by [`Runtime::end_frame`]
#[derive(Debug, Clone, PartialEq)]
pub struct FrameEndInfo {
    /// Display time the frame was rendered for
    pub display_time: Time,
    /// How the frame combines with the environment
    pub environment_blend_mode: EnvironmentBlendMode,
    /// Layers, back to front
    pub layers: Vec<CompositionLayer>,
}

#[derive(Debug, Default)]
pub(crate) struct FrameTiming {
    pub(crate) waited: bool,
    pub(crate) frame_begun: bool,
    pub(crate) last_predicted: Time,
    pub(crate) frame_count: u64,
}

/// Next refresh strictly after `now`, on a grid of `period` from time zero
fn next_vsync(now: Time, period: Duration, last_predicted: Time) -> Time {
    let next = (now / period + 1) * period;
    if next <= last_predicted {
        last_predicted + period
    } else {
        next
    }
}

impl Runtime {
    fn display_period(&self) -> Duration {
        #[allow(clippy::cast_possible_truncation)]
        let period = (1.0e9 / f64::from(self.settings.display.refresh_rate_hz)).round() as i64;
        period.max(1)
    }

    /// Predict the display time of the next frame
    ///
    /// Composition is throttled by the compositor's frame fence, not here.
    pub fn wait_frame(&mut self, session: SessionHandle) -> XrResult<FrameState> {
        let period = self.display_period();
        let now = self.now();
        let record = self.sessions.get_mut(session)?;
        if !record.running {
            return Err(XrError::SessionNotRunning);
        }

        let predicted = next_vsync(now, period, record.timing.last_predicted);
        record.timing.last_predicted = predicted;
        record.timing.waited = true;
        log::trace!("Frame predicted at {predicted} ns");
        Ok(FrameState {
            predicted_display_time: predicted,
            predicted_display_period: period,
            should_render: record.state.is_visible(),
        })
    }

    /// Mark the start of rendering for the waited frame
    pub fn begin_frame(&mut self, session: SessionHandle) -> XrResult<FrameBeginStatus> {
        let record = self.sessions.get_mut(session)?;
        if !record.running {
            return Err(XrError::SessionNotRunning);
        }
        if !record.timing.waited {
            return Err(XrError::CallOrderInvalid);
        }
        record.timing.waited = false;
        if record.timing.frame_begun {
            log::debug!("Previous frame discarded");
            return Ok(FrameBeginStatus::Discarded);
        }
        record.timing.frame_begun = true;
        Ok(FrameBeginStatus::Success)
    }

    /// Validate, compose and present the begun frame
    pub fn end_frame(&mut self, session: SessionHandle, info: &FrameEndInfo) -> XrResult<()> {
        let record = self.sessions.get(session)?;
        if !record.running {
            return Err(XrError::SessionNotRunning);
        }
        if !record.timing.frame_begun {
            return Err(XrError::CallOrderInvalid);
        }
        if info.display_time <= 0 {
            return Err(XrError::ValidationFailure(format!("Display time {} is not positive", info.display_time)));
        }
        if !blend_mode_supported(info.environment_blend_mode) {
            return Err(XrError::EnvironmentBlendModeUnsupported);
        }
        if info.layers.len() > MAX_LAYER_COUNT as usize {
            return Err(XrError::LayerLimitExceeded);
        }
        let view_count = record.view_configuration.ok_or(XrError::SessionNotRunning)?.view_count();
        for layer in &info.layers {
            self.validate_layer(session, layer, view_count)?;
        }

        let Self { sessions, swapchains, .. } = self;
        let record = sessions.get_mut(session)?;
        record.timing.frame_begun = false;

        let index = record.surface.acquire_next_image();
        let target = record.surface.target(index)?;
        record.compositor.compose_frame(index, &target, &info.layers, &*swapchains)?;
        record.surface.present_frame()?;
        record.timing.frame_count += 1;
        log::trace!("Frame {} presented with {} layers", record.timing.frame_count, info.layers.len());
        Ok(())
    }

    fn validate_layer(&self, session: SessionHandle, layer: &CompositionLayer, view_count: usize) -> XrResult<()> {
        let space = self.spaces.get(layer.space())?;
        if space.session != session {
            return Err(XrError::HandleInvalid);
        }
        if let CompositionLayer::Projection(projection) = layer {
            if projection.views.len() != view_count {
                return Err(XrError::ValidationFailure(format!(
                    "Projection layer has {} views, the view configuration has {view_count}",
                    projection.views.len()
                )));
            }
        }

        for sub_image in layer.sub_images() {
            let record = self.swapchains.get(sub_image.swapchain)?;
            if record.session != session {
                return Err(XrError::HandleInvalid);
            }
            let desc = record.proxy.desc();
            let rect = sub_image.image_rect;
            if rect.is_empty() || !rect.fits_within(desc.width, desc.height) {
                log::warn!("Image rect {rect:?} invalid for a {}x{} swapchain", desc.width, desc.height);
                return Err(XrError::SwapchainRectInvalid);
            }
            if sub_image.image_array_index != 0 {
                return Err(XrError::ValidationFailure(format!(
                    "Image array index {} on a single-layer swapchain",
                    sub_image.image_array_index
                )));
            }
            if record.proxy.last_released_index().is_none() {
                return Err(XrError::LayerInvalid(format!("{} has no released image", record.proxy.label())));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_vsync_is_on_grid() {
        assert_eq!(next_vsync(0, 100, 0), 100);
        assert_eq!(next_vsync(150, 100, 0), 200);
        assert_eq!(next_vsync(200, 100, 0), 300);
    }

    #[test]
    fn test_next_vsync_is_monotonic() {
        assert_eq!(next_vsync(150, 100, 200), 300);
        assert_eq!(next_vsync(150, 100, 500), 600);
    }
}
