//! Composition pipeline state
//!
//! One root signature (a shader resource table, a sampler table and the
//! inline constant block), one pipeline without vertex input, and a sampler
//! heap shared by every layer.

use std::path::Path;
use std::sync::Arc;

use crate::core::config::ShaderConfig;
use crate::core::error::{XrError, XrResult};
use crate::gpu::types::{BuiltinShader, Filter};
use crate::gpu::{
    CompositionConstants, DescriptorHeapHandle, DescriptorKind, Format, GraphicsDevice, PipelineDesc, PipelineHandle,
    RootParameter, RootSignatureDesc, RootSignatureHandle, SamplerDesc, ShaderBytecode, ShaderLanguage,
};

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Load a SPIR-V module from disk
pub fn load_spirv<P: AsRef<Path>>(path: P) -> XrResult<Vec<u32>> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)
        .map_err(|e| XrError::RuntimeFailure(format!("Failed to read shader {}: {e}", path.display())))?;
    if bytes.len() % 4 != 0 || bytes.is_empty() {
        return Err(XrError::RuntimeFailure(format!(
            "Shader {} is not SPIR-V ({} bytes)",
            path.display(),
            bytes.len()
        )));
    }
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    if words[0] != SPIRV_MAGIC {
        return Err(XrError::RuntimeFailure(format!("Shader {} has a bad SPIR-V magic", path.display())));
    }
    log::debug!("[SHADER] Loaded {} ({} words)", path.display(), words.len());
    Ok(words)
}

/// Root signature, pipeline and sampler heap used by every draw
pub struct CompositionPipeline {
    device: Arc<dyn GraphicsDevice>,
    root_signature: RootSignatureHandle,
    pipeline: PipelineHandle,
    sampler_heap: DescriptorHeapHandle,
}

impl CompositionPipeline {
    /// Create the pipeline for targets of `target_format`
    pub fn new(device: Arc<dyn GraphicsDevice>, shaders: &ShaderConfig, target_format: Format) -> XrResult<Self> {
        let (vertex_shader, pixel_shader) = match device.shader_language() {
            ShaderLanguage::Builtin => (
                ShaderBytecode::Builtin(BuiltinShader::LayeringVertex),
                ShaderBytecode::Builtin(BuiltinShader::LayeringPixel),
            ),
            ShaderLanguage::SpirV => (
                ShaderBytecode::SpirV(load_spirv(&shaders.vertex_shader_path)?),
                ShaderBytecode::SpirV(load_spirv(&shaders.pixel_shader_path)?),
            ),
        };

        let root_signature = device.create_root_signature(&RootSignatureDesc {
            parameters: vec![
                RootParameter::ShaderResourceTable,
                RootParameter::SamplerTable,
                RootParameter::Constants { count: CompositionConstants::COUNT },
            ],
        })?;

        let pipeline = match device.create_pipeline(&PipelineDesc {
            root_signature,
            vertex_shader,
            pixel_shader,
            render_target_format: target_format,
        }) {
            Ok(pipeline) => pipeline,
            Err(err) => {
                device.destroy_root_signature(root_signature);
                return Err(err.into());
            }
        };

        let sampler_heap = match Self::create_sampler_heap(device.as_ref()) {
            Ok(heap) => heap,
            Err(err) => {
                device.destroy_pipeline(pipeline);
                device.destroy_root_signature(root_signature);
                return Err(err);
            }
        };

        log::info!("Composition pipeline created for {target_format:?} targets");
        Ok(Self { device, root_signature, pipeline, sampler_heap })
    }

    fn create_sampler_heap(device: &dyn GraphicsDevice) -> XrResult<DescriptorHeapHandle> {
        let heap = device.create_descriptor_heap(DescriptorKind::Sampler, 1, true)?;
        let sampler = SamplerDesc { filter: Filter::Linear, clamp_to_edge: true };
        if let Err(err) = device.create_sampler(heap, 0, &sampler) {
            device.destroy_descriptor_heap(heap);
            return Err(err.into());
        }
        Ok(heap)
    }

    /// Root signature handle
    pub const fn root_signature(&self) -> RootSignatureHandle {
        self.root_signature
    }

    /// Pipeline handle
    pub const fn pipeline(&self) -> PipelineHandle {
        self.pipeline
    }

    /// Shader-visible heap holding the layer sampler in slot 0
    pub const fn sampler_heap(&self) -> DescriptorHeapHandle {
        self.sampler_heap
    }
}

impl Drop for CompositionPipeline {
    fn drop(&mut self) {
        self.device.destroy_descriptor_heap(self.sampler_heap);
        self.device.destroy_pipeline(self.pipeline);
        self.device.destroy_root_signature(self.root_signature);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::backends::headless::HeadlessDevice;

    #[test]
    fn test_builtin_pipeline_on_software_device() {
        let device = Arc::new(HeadlessDevice::new().unwrap());
        let pipeline = CompositionPipeline::new(device.clone(), &ShaderConfig::new("missing.spv", "missing.spv"), Format::Rgba8Unorm)
            .unwrap();
        assert_eq!(device.descriptor_heap_count(), 1);
        drop(pipeline);
        assert_eq!(device.descriptor_heap_count(), 0);
    }

    #[test]
    fn test_load_spirv_checks_magic() {
        let dir = std::env::temp_dir();
        let good = dir.join(format!("xr_bridge_{}_good.spv", std::process::id()));
        let bad = dir.join(format!("xr_bridge_{}_bad.spv", std::process::id()));
        std::fs::write(&good, [0x03, 0x02, 0x23, 0x07, 0, 0, 1, 0]).unwrap();
        std::fs::write(&bad, [1, 2, 3]).unwrap();

        assert_eq!(load_spirv(&good).unwrap(), vec![SPIRV_MAGIC, 0x0001_0000]);
        assert!(load_spirv(&bad).is_err());
        assert!(load_spirv(dir.join("xr_bridge_does_not_exist.spv")).is_err());

        std::fs::remove_file(good).ok();
        std::fs::remove_file(bad).ok();
    }
}
