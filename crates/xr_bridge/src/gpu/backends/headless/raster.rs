//! Command list interpretation on the queue thread
//!
//! Draws are full-screen triangles clipped to the viewport and scissor, so
//! every covered pixel maps linearly to the constants' UV region of the bound
//! shader resource. Resource states are tracked per image and every mismatch
//! is recorded as a validation error instead of failing the submission.

use crate::foundation::math::Rect2Di;
use crate::gpu::types::{BuiltinShader, Filter, ShaderBytecode};
use crate::gpu::{
    CompositionConstants, DescriptorHeapHandle, GpuCommand, GpuImageHandle, PipelineHandle, ResourceState,
    RootSignatureHandle, SamplerDesc, Viewport,
};

use super::state::{pipeline_key, root_signature_key, Descriptor, DeviceState, Texel};

#[derive(Default)]
struct Bindings {
    render_target: Option<GpuImageHandle>,
    viewport: Option<Viewport>,
    scissor: Option<Rect2Di>,
    shader_resources: Option<DescriptorHeapHandle>,
    samplers: Option<DescriptorHeapHandle>,
    shader_resource_slot: Option<u32>,
    sampler_slot: Option<u32>,
    root_signature: Option<RootSignatureHandle>,
    pipeline: Option<PipelineHandle>,
    constants: CompositionConstants,
}

/// Execute one command list against the device state
pub(crate) fn execute(state: &mut DeviceState, commands: &[GpuCommand]) {
    let mut bindings = Bindings::default();
    for command in commands {
        match command {
            GpuCommand::ResourceBarrier { image, before, after } => barrier(state, *image, *before, *after),
            GpuCommand::SetRenderTarget { heap, slot } => {
                bindings.render_target = render_target(state, *heap, *slot);
            }
            GpuCommand::ClearRenderTarget { heap, slot, color } => {
                if let Some(target) = render_target(state, *heap, *slot) {
                    clear(state, target, *color);
                }
            }
            GpuCommand::SetViewport(viewport) => bindings.viewport = Some(*viewport),
            GpuCommand::SetScissor(rect) => bindings.scissor = Some(*rect),
            GpuCommand::SetDescriptorHeaps { shader_resources, samplers } => {
                for heap in [*shader_resources, *samplers] {
                    if !state.heap(heap).is_ok_and(|h| h.shader_visible) {
                        state.record_validation_error(format!("Heap {:#x} bound but not shader visible", heap.0));
                    }
                }
                bindings.shader_resources = Some(*shader_resources);
                bindings.samplers = Some(*samplers);
            }
            GpuCommand::SetGraphicsRootSignature(root_signature) => bindings.root_signature = Some(*root_signature),
            GpuCommand::SetPipelineState(pipeline) => bindings.pipeline = Some(*pipeline),
            GpuCommand::SetShaderResource { slot } => bindings.shader_resource_slot = Some(*slot),
            GpuCommand::SetSampler { slot } => bindings.sampler_slot = Some(*slot),
            GpuCommand::SetRootConstants(constants) => bindings.constants = *constants,
            GpuCommand::DrawInstanced { vertex_count, instance_count } => {
                if *vertex_count >= 3 && *instance_count >= 1 {
                    draw(state, &bindings);
                }
            }
        }
    }
}

fn barrier(state: &mut DeviceState, image: GpuImageHandle, before: ResourceState, after: ResourceState) {
    let current = match state.image_mut(image) {
        Ok(img) => {
            let current = img.state;
            img.state = after;
            current
        }
        Err(err) => {
            state.record_validation_error(format!("Barrier on unknown image: {err}"));
            return;
        }
    };
    if current != before {
        state.record_validation_error(format!(
            "Barrier on image {:#x} expects {before:?} but image is in {current:?}",
            image.0
        ));
    }
}

fn render_target(state: &mut DeviceState, heap: DescriptorHeapHandle, slot: u32) -> Option<GpuImageHandle> {
    match state.view_image(heap, slot) {
        Ok(image) => Some(image),
        Err(err) => {
            state.record_validation_error(format!("Render target binding failed: {err}"));
            None
        }
    }
}

fn clear(state: &mut DeviceState, target: GpuImageHandle, color: Texel) {
    let Ok(image) = state.image_mut(target) else { return };
    let current = image.state;
    image.texels.fill(color);
    if current != ResourceState::RENDER_TARGET {
        state.record_validation_error(format!("Clear of image {:#x} in state {current:?}", target.0));
    }
}

fn draw(state: &mut DeviceState, bindings: &Bindings) {
    let (Some(target), Some(viewport)) = (bindings.render_target, bindings.viewport) else {
        state.record_validation_error("Draw without render target or viewport".to_string());
        return;
    };
    if !pipeline_is_layering(state, bindings) {
        return;
    }
    let (Some(srv_heap), Some(srv_slot)) = (bindings.shader_resources, bindings.shader_resource_slot) else {
        state.record_validation_error("Draw without a bound shader resource".to_string());
        return;
    };
    let sampler = bound_sampler(state, bindings);

    let source = match state.view_image(srv_heap, srv_slot).and_then(|handle| state.image(handle).map(|img| (handle, img))) {
        Ok((_, img)) if img.state.contains(ResourceState::PIXEL_SHADER_RESOURCE) => {
            Ok(SourceTexture { width: img.desc.width, height: img.desc.height, texels: img.texels.clone() })
        }
        Ok((handle, img)) => Err(format!("Sampling image {:#x} ({}) in state {:?}", handle.0, img.label, img.state)),
        Err(err) => Err(format!("Draw with invalid shader resource: {err}")),
    };
    let source = match source {
        Ok(source) => source,
        Err(message) => {
            state.record_validation_error(message);
            return;
        }
    };

    let Ok(target_image) = state.image_mut(target) else {
        state.record_validation_error(format!("Draw into unknown image {:#x}", target.0));
        return;
    };
    if target_image.state != ResourceState::RENDER_TARGET {
        let message = format!("Draw into image {:#x} in state {:?}", target.0, target_image.state);
        state.record_validation_error(message);
        return;
    }

    let width = target_image.desc.width;
    let height = target_image.desc.height;
    let Some(area) = covered_area(viewport, bindings.scissor, width, height) else { return };
    let constants = bindings.constants;

    for y in area.y0..area.y1 {
        for x in area.x0..area.x1 {
            #[allow(clippy::cast_precision_loss)]
            let (px, py) = (x as f32 + 0.5, y as f32 + 0.5);
            let u = (px - viewport.x) / viewport.width;
            let v = (py - viewport.y) / viewport.height;
            let su = constants.uv_scale[0].mul_add(u, constants.uv_offset[0]);
            let sv = constants.uv_scale[1].mul_add(v, constants.uv_offset[1]);

            let mut color = source.sample(su, sv, sampler);
            if constants.multiply_alpha != 0 {
                color[0] *= color[3];
                color[1] *= color[3];
                color[2] *= color[3];
            }
            if constants.is_opaque != 0 {
                color[3] = 1.0;
            }
            target_image.texels[(y * width + x) as usize] = color;
        }
    }
}

fn pipeline_is_layering(state: &mut DeviceState, bindings: &Bindings) -> bool {
    let (Some(pipeline), Some(root_signature)) = (bindings.pipeline, bindings.root_signature) else {
        state.record_validation_error("Draw without pipeline state or root signature".to_string());
        return false;
    };
    if !state.root_signatures.contains_key(root_signature_key(root_signature)) {
        state.record_validation_error(format!("Draw with unknown root signature {:#x}", root_signature.0));
        return false;
    }
    let Some(desc) = state.pipelines.get(pipeline_key(pipeline)) else {
        state.record_validation_error(format!("Draw with unknown pipeline {:#x}", pipeline.0));
        return false;
    };
    if desc.root_signature != root_signature {
        state.record_validation_error("Pipeline bound with a different root signature".to_string());
        return false;
    }
    let layering = desc.vertex_shader == ShaderBytecode::Builtin(BuiltinShader::LayeringVertex)
        && desc.pixel_shader == ShaderBytecode::Builtin(BuiltinShader::LayeringPixel);
    if !layering {
        state.record_validation_error("Software backend only runs the builtin layering program".to_string());
    }
    layering
}

fn bound_sampler(state: &DeviceState, bindings: &Bindings) -> SamplerDesc {
    let (Some(heap), Some(slot)) = (bindings.samplers, bindings.sampler_slot) else {
        return SamplerDesc::default();
    };
    match state.descriptor(heap, slot) {
        Ok(Descriptor::Sampler(desc)) => desc,
        _ => SamplerDesc::default(),
    }
}

struct Area {
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn covered_area(viewport: Viewport, scissor: Option<Rect2Di>, width: u32, height: u32) -> Option<Area> {
    let mut x0 = viewport.x.max(0.0).floor();
    let mut y0 = viewport.y.max(0.0).floor();
    let mut x1 = (viewport.x + viewport.width).min(width as f32).ceil();
    let mut y1 = (viewport.y + viewport.height).min(height as f32).ceil();
    if let Some(rect) = scissor {
        x0 = x0.max(rect.offset.x as f32);
        y0 = y0.max(rect.offset.y as f32);
        x1 = x1.min((rect.offset.x + rect.extent.width) as f32);
        y1 = y1.min((rect.offset.y + rect.extent.height) as f32);
    }
    if x1 <= x0 || y1 <= y0 || viewport.width <= 0.0 || viewport.height <= 0.0 {
        return None;
    }
    Some(Area { x0: x0 as u32, y0: y0 as u32, x1: x1 as u32, y1: y1 as u32 })
}

struct SourceTexture {
    width: u32,
    height: u32,
    texels: Vec<Texel>,
}

impl SourceTexture {
    fn texel(&self, x: i64, y: i64, clamp: bool) -> Texel {
        let (w, h) = (i64::from(self.width), i64::from(self.height));
        let (x, y) = if clamp { (x.clamp(0, w - 1), y.clamp(0, h - 1)) } else { (x.rem_euclid(w), y.rem_euclid(h)) };
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let index = (y * w + x) as usize;
        self.texels[index]
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn sample(&self, u: f32, v: f32, sampler: SamplerDesc) -> Texel {
        if self.width == 0 || self.height == 0 {
            return [0.0; 4];
        }
        let fx = u * self.width as f32;
        let fy = v * self.height as f32;
        match sampler.filter {
            Filter::Point => self.texel(fx.floor() as i64, fy.floor() as i64, sampler.clamp_to_edge),
            Filter::Linear => {
                let (gx, gy) = (fx - 0.5, fy - 0.5);
                let (x0, y0) = (gx.floor(), gy.floor());
                let (tx, ty) = (gx - x0, gy - y0);
                let (x0, y0) = (x0 as i64, y0 as i64);
                let c00 = self.texel(x0, y0, sampler.clamp_to_edge);
                let c10 = self.texel(x0 + 1, y0, sampler.clamp_to_edge);
                let c01 = self.texel(x0, y0 + 1, sampler.clamp_to_edge);
                let c11 = self.texel(x0 + 1, y0 + 1, sampler.clamp_to_edge);
                let mut out = [0.0; 4];
                for i in 0..4 {
                    let top = (c10[i] - c00[i]).mul_add(tx, c00[i]);
                    let bottom = (c11[i] - c01[i]).mul_add(tx, c01[i]);
                    out[i] = (bottom - top).mul_add(ty, top);
                }
                out
            }
        }
    }
}
