//! # Runtime Configuration
//!
//! Settings that the runtime reads once at startup: which graphics APIs it
//! offers, the swapchain ring length, the virtual display it reports to
//! applications, compositor shaders and logging.
//!
//! Files are TOML or RON, chosen by extension. Every section has defaults, so
//! a file only needs the keys it overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable naming a settings file
pub const CONFIG_ENV_VAR: &str = "XR_BRIDGE_CONFIG";

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

        if path.ends_with(".toml") {
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else if path.ends_with(".ron") {
            ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Err(ConfigError::UnsupportedFormat(path.to_string()))
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = if path.ends_with(".toml") {
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else if path.ends_with(".ron") {
            ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.to_string()));
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A value is out of range
    #[error("Invalid setting {key}: {reason}")]
    Invalid {
        /// Dotted setting name
        key: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

/// Compositor shader locations
///
/// Only backends that consume bytecode read these files; the software
/// backend runs its built-in composition program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderConfig {
    /// Path to the compiled vertex shader
    pub vertex_shader_path: String,
    /// Path to the compiled pixel shader
    pub pixel_shader_path: String,
}

impl ShaderConfig {
    /// Create a new shader configuration
    pub fn new(vertex_path: impl Into<String>, pixel_path: impl Into<String>) -> Self {
        Self {
            vertex_shader_path: vertex_path.into(),
            pixel_shader_path: pixel_path.into(),
        }
    }

    /// Create shader config with automatic path resolution
    ///
    /// Tries the common locations for compiled shaders, so the runtime works
    /// from the workspace root as well as from a crate directory.
    pub fn with_path_resolution(base_vertex: &str, base_pixel: &str) -> Self {
        let shader_dirs = [
            "target/shaders/",
            "../../target/shaders/",
            "shaders/",
            "../shaders/",
            "./",
        ];

        let find = |name: &str| {
            shader_dirs
                .iter()
                .map(|dir| format!("{dir}{name}"))
                .find(|candidate| Path::new(candidate).exists())
                .unwrap_or_else(|| format!("target/shaders/{name}"))
        };

        Self {
            vertex_shader_path: find(base_vertex),
            pixel_shader_path: find(base_pixel),
        }
    }

    /// Validate that shader files exist
    pub fn validate(&self) -> Result<(), String> {
        if !Path::new(&self.vertex_shader_path).exists() {
            return Err(format!("Vertex shader not found: {}", self.vertex_shader_path));
        }
        if !Path::new(&self.pixel_shader_path).exists() {
            return Err(format!("Pixel shader not found: {}", self.pixel_shader_path));
        }
        Ok(())
    }
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self::with_path_resolution("layering_vertex.spv", "layering_pixel.spv")
    }
}

/// Which graphics APIs the runtime offers, and the proxy swapchain ring length
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    /// Offer the software backend (`XR_MND_headless`)
    pub support_software: bool,
    /// Offer the Vulkan backend (`XR_KHR_vulkan_enable2`)
    pub support_vulkan: bool,
    /// Images per proxy swapchain
    pub swapchain_image_count: u32,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            support_software: true,
            support_vulkan: cfg!(feature = "vulkan"),
            swapchain_image_count: 2,
        }
    }
}

/// The virtual display reported to applications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    /// Output width in pixels; each eye gets half in stereo
    pub width: u32,
    /// Output height in pixels
    pub height: u32,
    /// Refresh rate used for frame timing
    pub refresh_rate_hz: f32,
    /// Distance between the eyes in meters
    pub ipd_meters: f32,
    /// Whether a display is connected
    pub available: bool,
    /// Name reported in the system properties
    pub system_name: String,
    /// Vendor id reported in the system properties
    pub vendor_id: u32,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            refresh_rate_hz: 60.0,
            ipd_meters: 0.063,
            available: true,
            system_name: "SR Monitor".to_string(),
            vendor_id: 0x354B,
        }
    }
}

/// Compositor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositorSettings {
    /// Color the presentation target is cleared to every frame
    pub clear_color: [f32; 4],
    /// Compiled shader locations
    pub shaders: ShaderConfig,
}

impl Default for CompositorSettings {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 1.0],
            shaders: ShaderConfig::default(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default level; `RUST_LOG` takes precedence
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

/// All runtime settings
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Backend selection
    pub runtime: BackendSettings,
    /// Virtual display
    pub display: DisplaySettings,
    /// Compositor
    pub compositor: CompositorSettings,
    /// Logging
    pub logging: LoggingSettings,
}

impl Config for RuntimeSettings {}

impl RuntimeSettings {
    /// Load from `$XR_BRIDGE_CONFIG` when set, otherwise defaults
    pub fn load_or_default() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) => {
                log::info!("Loading runtime settings from {path}");
                let settings = Self::load_from_file(&path)?;
                settings.validate()?;
                Ok(settings)
            }
            Err(_) => Ok(Self::default()),
        }
    }

    /// Set the swapchain ring length
    pub fn with_swapchain_image_count(mut self, count: u32) -> Self {
        self.runtime.swapchain_image_count = count;
        self
    }

    /// Set the display size
    pub fn with_display_size(mut self, width: u32, height: u32) -> Self {
        self.display.width = width;
        self.display.height = height;
        self
    }

    /// Set the clear color
    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.compositor.clear_color = color;
        self
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runtime.swapchain_image_count < 2 {
            return Err(ConfigError::Invalid {
                key: "runtime.swapchain_image_count",
                reason: format!("must be at least 2, got {}", self.runtime.swapchain_image_count),
            });
        }
        if self.display.width == 0 || self.display.height == 0 {
            return Err(ConfigError::Invalid {
                key: "display",
                reason: format!("size {}x{} is empty", self.display.width, self.display.height),
            });
        }
        if self.display.refresh_rate_hz <= 0.0 || !self.display.refresh_rate_hz.is_finite() {
            return Err(ConfigError::Invalid {
                key: "display.refresh_rate_hz",
                reason: format!("must be positive, got {}", self.display.refresh_rate_hz),
            });
        }
        if !self.runtime.support_software && !self.runtime.support_vulkan {
            return Err(ConfigError::Invalid {
                key: "runtime",
                reason: "no graphics API enabled".to_string(),
            });
        }
        Ok(())
    }

    /// Log which graphics APIs are offered
    pub fn log_summary(&self) {
        log::info!("Software backend support: {}", self.runtime.support_software);
        log::info!("Vulkan backend support: {}", self.runtime.support_vulkan);
        log::info!(
            "Display {}x{} @ {} Hz, {} swapchain images",
            self.display.width,
            self.display.height,
            self.display.refresh_rate_hz,
            self.runtime.swapchain_image_count
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> String {
        std::env::temp_dir()
            .join(format!("xr_bridge_{}_{name}", std::process::id()))
            .to_string_lossy()
            .into_owned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let settings = RuntimeSettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.runtime.swapchain_image_count, 2);
        assert_eq!(settings.compositor.clear_color, [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_rejects_short_ring() {
        let settings = RuntimeSettings::default().with_swapchain_image_count(1);
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let settings: RuntimeSettings = toml::from_str(
            "[display]\nwidth = 640\nheight = 480\n\n[runtime]\nswapchain_image_count = 3\n",
        )
        .unwrap();
        assert_eq!(settings.display.width, 640);
        assert_eq!(settings.display.vendor_id, 0x354B);
        assert_eq!(settings.runtime.swapchain_image_count, 3);
        assert!(settings.runtime.support_software);
    }

    #[test]
    fn test_toml_file_round_trip() {
        let path = temp_path("settings.toml");
        let settings = RuntimeSettings::default().with_display_size(800, 600);
        settings.save_to_file(&path).unwrap();
        let loaded = RuntimeSettings::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_ron_file_round_trip() {
        let path = temp_path("settings.ron");
        let settings = RuntimeSettings::default().with_clear_color([0.1, 0.2, 0.3, 1.0]);
        settings.save_to_file(&path).unwrap();
        let loaded = RuntimeSettings::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded.compositor.clear_color, [0.1, 0.2, 0.3, 1.0]);
    }

    #[test]
    fn test_unknown_extension() {
        let settings = RuntimeSettings::default();
        assert!(matches!(
            settings.save_to_file("settings.json"),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }
}
