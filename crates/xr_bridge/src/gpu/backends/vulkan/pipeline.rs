//! Pipeline layouts and graphics pipelines

use std::ffi::CStr;

use ash::vk;

use crate::gpu::{GpuError, GpuResult, PipelineDesc, RootParameter, RootSignatureDesc, ShaderBytecode};

use super::context::api_error;
use super::resources::{vk_format, Shared};

const ENTRY_POINT: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

/// Build a pipeline layout: descriptor tables become sets in parameter
/// order, constants become one push constant range
pub(crate) fn create_layout(shared: &Shared, desc: &RootSignatureDesc) -> GpuResult<vk::PipelineLayout> {
    let mut set_layouts = Vec::new();
    let mut push_constants = Vec::new();
    for parameter in &desc.parameters {
        match parameter {
            RootParameter::ShaderResourceTable => set_layouts.push(shared.srv_layout),
            RootParameter::SamplerTable => set_layouts.push(shared.sampler_layout),
            RootParameter::Constants { count } => {
                if !push_constants.is_empty() {
                    return Err(GpuError::Unsupported("More than one constant block".to_string()));
                }
                push_constants.push(
                    vk::PushConstantRange::builder()
                        .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
                        .offset(0)
                        .size(count * 4)
                        .build(),
                );
            }
        }
    }
    let info = vk::PipelineLayoutCreateInfo::builder()
        .set_layouts(&set_layouts)
        .push_constant_ranges(&push_constants);
    unsafe { shared.device().create_pipeline_layout(&info, None) }.map_err(api_error("vkCreatePipelineLayout"))
}

fn create_module(device: &ash::Device, bytecode: &ShaderBytecode) -> GpuResult<vk::ShaderModule> {
    let ShaderBytecode::SpirV(words) = bytecode else {
        return Err(GpuError::Unsupported(format!("{bytecode:?} on Vulkan")));
    };
    let info = vk::ShaderModuleCreateInfo::builder().code(words);
    unsafe { device.create_shader_module(&info, None) }.map_err(api_error("vkCreateShaderModule"))
}

/// Build the composition pipeline
///
/// Vertices come from the vertex index, culling is off and the single color
/// target is overwritten. Viewport and scissor are dynamic.
pub(crate) fn create_pipeline(shared: &Shared, desc: &PipelineDesc, layout: vk::PipelineLayout) -> GpuResult<vk::Pipeline> {
    let device = shared.device();
    let vertex = create_module(device, &desc.vertex_shader)?;
    let fragment = match create_module(device, &desc.pixel_shader) {
        Ok(module) => module,
        Err(err) => {
            unsafe { device.destroy_shader_module(vertex, None) };
            return Err(err);
        }
    };

    let stages = [
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vertex)
            .name(ENTRY_POINT)
            .build(),
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(fragment)
            .name(ENTRY_POINT)
            .build(),
    ];
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder();
    let input_assembly =
        vk::PipelineInputAssemblyStateCreateInfo::builder().topology(vk::PrimitiveTopology::TRIANGLE_LIST);
    let viewport = vk::PipelineViewportStateCreateInfo::builder().viewport_count(1).scissor_count(1);
    let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
        .polygon_mode(vk::PolygonMode::FILL)
        .cull_mode(vk::CullModeFlags::NONE)
        .front_face(vk::FrontFace::CLOCKWISE)
        .line_width(1.0);
    let multisample =
        vk::PipelineMultisampleStateCreateInfo::builder().rasterization_samples(vk::SampleCountFlags::TYPE_1);
    let attachments = [vk::PipelineColorBlendAttachmentState::builder()
        .blend_enable(false)
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .build()];
    let blend = vk::PipelineColorBlendStateCreateInfo::builder().attachments(&attachments);
    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);
    let formats = [vk_format(desc.render_target_format)];
    let mut rendering = vk::PipelineRenderingCreateInfo::builder().color_attachment_formats(&formats);

    let info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport)
        .rasterization_state(&rasterization)
        .multisample_state(&multisample)
        .color_blend_state(&blend)
        .dynamic_state(&dynamic)
        .layout(layout)
        .push_next(&mut rendering)
        .build();
    let created = unsafe { device.create_graphics_pipelines(vk::PipelineCache::null(), &[info], None) };
    unsafe {
        device.destroy_shader_module(vertex, None);
        device.destroy_shader_module(fragment, None);
    }
    let pipelines = created.map_err(|(_, err)| api_error("vkCreateGraphicsPipelines")(err))?;
    pipelines.into_iter().next().ok_or_else(|| GpuError::Api("No pipeline returned".to_string()))
}
