//! Swapchain creation, enumeration and the image cycle

use std::sync::Arc;

use crate::compositor::SwapchainResolver;
use crate::core::error::{XrError, XrResult};
use crate::foundation::enumerate::enumerate_two_call;
use crate::foundation::handles::{Registry, SessionHandle, SwapchainHandle};
use crate::gpu::{Format, GpuImageHandle, SwapchainUsageFlags, Timeout};
use crate::swapchain::{ProxySwapchain, ProxySwapchainDesc};

use super::Runtime;

/// Parameters for [`Runtime::create_swapchain`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainCreateInfo {
    /// Creation flags; none are supported
    pub create_flags: u64,
    /// How the application uses the images
    pub usage_flags: SwapchainUsageFlags,
    /// Backend-native format code from [`Runtime::enumerate_swapchain_formats`]
    pub format: i64,
    /// Samples per pixel
    pub sample_count: u32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Cube faces
    pub face_count: u32,
    /// Array layers
    pub array_size: u32,
    /// Mip levels
    pub mip_count: u32,
}

impl SwapchainCreateInfo {
    /// Single-sample, single-layer swapchain
    pub const fn new(format: i64, width: u32, height: u32, usage_flags: SwapchainUsageFlags) -> Self {
        Self {
            create_flags: 0,
            usage_flags,
            format,
            sample_count: 1,
            width,
            height,
            face_count: 1,
            array_size: 1,
            mip_count: 1,
        }
    }
}

pub(crate) struct SwapchainRecord {
    pub(crate) session: SessionHandle,
    pub(crate) proxy: ProxySwapchain,
}

impl SwapchainResolver for Registry<SwapchainHandle, SwapchainRecord> {
    fn resolve(&self, handle: SwapchainHandle) -> XrResult<&ProxySwapchain> {
        self.get(handle).map(|record| &record.proxy)
    }
}

impl Runtime {
    /// Two-call enumeration of the session device's swapchain formats
    pub fn enumerate_swapchain_formats(&self, session: SessionHandle, output: &mut [i64]) -> XrResult<usize> {
        let device = &self.sessions.get(session)?.device;
        let api = device.api();
        let codes: Vec<i64> = device.supported_swapchain_formats().into_iter().map(|f| f.native_code(api)).collect();
        enumerate_two_call(&codes, output)
    }

    /// Create a proxy swapchain for a session
    pub fn create_swapchain(&mut self, session: SessionHandle, info: &SwapchainCreateInfo) -> XrResult<SwapchainHandle> {
        let record = self.sessions.get(session)?;
        let device = Arc::clone(&record.device);

        let format = Format::from_native_code(device.api(), info.format)
            .filter(|format| device.supported_swapchain_formats().contains(format))
            .ok_or_else(|| {
                log::warn!("Swapchain format {} is not supported", info.format);
                XrError::SwapchainFormatUnsupported
            })?;

        let display = &self.settings.display;
        if info.width == 0 || info.height == 0 || info.width > display.width || info.height > display.height {
            return Err(XrError::ValidationFailure(format!(
                "Swapchain size {}x{} outside 1x1..{}x{}",
                info.width, info.height, display.width, display.height
            )));
        }
        if info.face_count != 1 || info.array_size != 1 || info.mip_count != 1 {
            return Err(XrError::ValidationFailure(format!(
                "Unsupported swapchain layout: {} faces, {} layers, {} mips",
                info.face_count, info.array_size, info.mip_count
            )));
        }
        if info.create_flags != 0 {
            return Err(XrError::ValidationFailure(format!("Unsupported create flags {:#x}", info.create_flags)));
        }
        if info.sample_count != 1 {
            return Err(XrError::ValidationFailure(format!("Sample count {} is not supported", info.sample_count)));
        }

        let desc = ProxySwapchainDesc { width: info.width, height: info.height, format, usage: info.usage_flags };
        let serial = self.swapchain_serial;
        let proxy = ProxySwapchain::create(device, serial, desc, self.settings.runtime.swapchain_image_count)?;
        self.swapchain_serial += 1;
        Ok(self.swapchains.insert(SwapchainRecord { session, proxy }))
    }

    /// Destroy a swapchain once the GPU no longer reads it
    pub fn destroy_swapchain(&mut self, swapchain: SwapchainHandle) -> XrResult<()> {
        let session = self.swapchains.get(swapchain)?.session;
        if let Ok(record) = self.sessions.get(session) {
            record.compositor.wait_idle()?;
        }
        let record = self.swapchains.remove(swapchain)?;
        log::info!("{} destroyed", record.proxy.label());
        Ok(())
    }

    /// Two-call enumeration of a swapchain's images
    pub fn enumerate_swapchain_images(
        &self,
        swapchain: SwapchainHandle,
        output: &mut [GpuImageHandle],
    ) -> XrResult<usize> {
        enumerate_two_call(self.swapchains.get(swapchain)?.proxy.images(), output)
    }

    /// Acquire the next image of a swapchain
    pub fn acquire_swapchain_image(&mut self, swapchain: SwapchainHandle) -> XrResult<usize> {
        self.swapchains.get_mut(swapchain)?.proxy.acquire()
    }

    /// Wait until the compositor is done reading the acquired image
    ///
    /// [`XrError::TimeoutExpired`] leaves the image acquired; call again.
    pub fn wait_swapchain_image(&mut self, swapchain: SwapchainHandle, timeout: Timeout) -> XrResult<()> {
        self.swapchains.get_mut(swapchain)?.proxy.wait(timeout)
    }

    /// Hand the rendered image back to the runtime
    pub fn release_swapchain_image(&mut self, swapchain: SwapchainHandle) -> XrResult<()> {
        self.swapchains.get_mut(swapchain)?.proxy.release()
    }
}
