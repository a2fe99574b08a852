// Overlay pipeline objects
//
// The overlay draws one textured quad. Its geometry is baked into the vertex
// shader, so there is no vertex input; the only resource is a combined image
// sampler at binding 1 of set 0.
//
// Device-lifetime objects (shaders, sampler, descriptor objects, pipeline
// layout) are built once per device. The pipeline itself depends on the render
// pass and is rebuilt with it.

use anyhow::{Context, Result};
use ash::vk;
use std::ffi::CStr;
use std::sync::Arc;

use super::scope::Rollback;
use super::{shader, DeviceContext, Texture};
use crate::error::VkResultExt;

/// Binding of the overlay texture in set 0
pub const TEXTURE_BINDING: u32 = 1;

/// Two triangles
pub const QUAD_VERTEX_COUNT: u32 = 6;

const ENTRY_POINT: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

/// Vertex and fragment modules of the overlay
pub struct OverlayShaders {
    ctx: Arc<DeviceContext>,
    vertex: vk::ShaderModule,
    fragment: vk::ShaderModule,
}

impl OverlayShaders {
    pub fn new(ctx: &Arc<DeviceContext>, vertex_spv: &[u32], fragment_spv: &[u32]) -> Result<Self> {
        let device = ctx.device();
        let mut scope = Rollback::new(device);

        let vertex = scope.guard(
            shader::create_shader_module(device, vertex_spv).context("Vertex shader")?,
        );
        let fragment =
            shader::create_shader_module(device, fragment_spv).context("Fragment shader")?;

        scope.commit();
        Ok(Self {
            ctx: ctx.clone(),
            vertex,
            fragment,
        })
    }
}

impl Drop for OverlayShaders {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device().destroy_shader_module(self.vertex, None);
            self.ctx.device().destroy_shader_module(self.fragment, None);
        }
    }
}

/// Sampler, descriptor objects and pipeline layout
pub struct OverlayBindings {
    ctx: Arc<DeviceContext>,
    sampler: vk::Sampler,
    set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    pool: vk::DescriptorPool,
    set: vk::DescriptorSet,
}

impl OverlayBindings {
    pub fn new(ctx: &Arc<DeviceContext>) -> Result<Self> {
        let device = ctx.device();
        let mut scope = Rollback::new(device);

        let binding = vk::DescriptorSetLayoutBinding::builder()
            .binding(TEXTURE_BINDING)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)
            .build();
        let bindings = &[binding];
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(bindings);

        let set_layout = scope.guard(
            unsafe { device.create_descriptor_set_layout(&layout_info, None) }
                .resource("vkCreateDescriptorSetLayout")?,
        );

        let set_layouts = &[set_layout];
        let pipeline_layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(set_layouts);

        let pipeline_layout = scope.guard(
            unsafe { device.create_pipeline_layout(&pipeline_layout_info, None) }
                .resource("vkCreatePipelineLayout")
                .context("Failed to create pipeline layout")?,
        );

        let sampler = scope.guard(create_sampler(ctx)?);

        let pool_size = vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: 1,
        };
        let pool_sizes = &[pool_size];
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(1)
            .pool_sizes(pool_sizes);

        let pool = scope.guard(
            unsafe { device.create_descriptor_pool(&pool_info, None) }
                .resource("vkCreateDescriptorPool")?,
        );

        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(set_layouts);

        // Freed with the pool
        let set = unsafe { device.allocate_descriptor_sets(&alloc_info) }
            .resource("vkAllocateDescriptorSets")
            .context("Failed to allocate overlay descriptor set")?[0];

        scope.commit();
        Ok(Self {
            ctx: ctx.clone(),
            sampler,
            set_layout,
            pipeline_layout,
            pool,
            set,
        })
    }

    /// Point the descriptor set at `texture` and the overlay sampler
    pub fn write_texture(&self, texture: &Texture) {
        let image_info = vk::DescriptorImageInfo {
            sampler: self.sampler,
            image_view: texture.view(),
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        };
        let image_infos = &[image_info];

        let write = vk::WriteDescriptorSet::builder()
            .dst_set(self.set)
            .dst_binding(TEXTURE_BINDING)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(image_infos)
            .build();

        unsafe { self.ctx.device().update_descriptor_sets(&[write], &[]) };
    }

    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    pub fn set(&self) -> vk::DescriptorSet {
        self.set
    }
}

impl Drop for OverlayBindings {
    fn drop(&mut self) {
        unsafe {
            let device = self.ctx.device();
            device.destroy_descriptor_pool(self.pool, None);
            device.destroy_sampler(self.sampler, None);
            device.destroy_pipeline_layout(self.pipeline_layout, None);
            device.destroy_descriptor_set_layout(self.set_layout, None);
        }
    }
}

/// Linear filtering, repeat addressing, anisotropic when the device allows
fn create_sampler(ctx: &DeviceContext) -> Result<vk::Sampler> {
    let anisotropy = ctx.sampler_anisotropy();

    let sampler_info = vk::SamplerCreateInfo::builder()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .anisotropy_enable(anisotropy.is_some())
        .max_anisotropy(anisotropy.unwrap_or(1.0))
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false)
        .compare_enable(false)
        .compare_op(vk::CompareOp::ALWAYS);

    unsafe { ctx.device().create_sampler(&sampler_info, None) }
        .resource("vkCreateSampler")
        .context("Failed to create overlay sampler")
}

/// The graphics pipeline, tied to one render pass
pub struct OverlayPipeline {
    ctx: Arc<DeviceContext>,
    pipeline: vk::Pipeline,
}

impl OverlayPipeline {
    pub fn new(
        ctx: &Arc<DeviceContext>,
        render_pass: vk::RenderPass,
        shaders: &OverlayShaders,
        bindings: &OverlayBindings,
    ) -> Result<Self> {
        let vert_stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(shaders.vertex)
            .name(ENTRY_POINT)
            .build();

        let frag_stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(shaders.fragment)
            .name(ENTRY_POINT)
            .build();

        let shader_stages = &[vert_stage, frag_stage];

        // Geometry comes from gl_VertexIndex
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder();

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Viewport and scissor are set per draw
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let dynamic_states = &[vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(dynamic_states);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        // Straight alpha over the host's image
        let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
            .build();

        let color_blend_attachments = &[color_blend_attachment];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(color_blend_attachments);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(bindings.pipeline_layout)
            .render_pass(render_pass)
            .subpass(0)
            .build();

        let pipelines = unsafe {
            ctx.device()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, e)| e)
                .resource("vkCreateGraphicsPipelines")
                .context("Failed to create overlay pipeline")?
        };

        Ok(Self {
            ctx: ctx.clone(),
            pipeline: pipelines[0],
        })
    }

    /// Record the quad into `cmd`, which must be inside the overlay render pass.
    ///
    /// The viewport is the fixed overlay region; the scissor is the same region
    /// clamped to the image.
    pub fn draw(
        &self,
        cmd: vk::CommandBuffer,
        bindings: &OverlayBindings,
        region: vk::Extent2D,
        image_extent: vk::Extent2D,
    ) {
        let device = self.ctx.device();

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: region.width as f32,
            height: region.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: clamp_extent(region, image_extent),
        };

        unsafe {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                bindings.pipeline_layout,
                0,
                &[bindings.set],
                &[],
            );
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(cmd, 0, &[scissor]);
            device.cmd_draw(cmd, QUAD_VERTEX_COUNT, 1, 0, 0);
        }
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }
}

impl Drop for OverlayPipeline {
    fn drop(&mut self) {
        unsafe { self.ctx.device().destroy_pipeline(self.pipeline, None) };
    }
}

pub fn clamp_extent(region: vk::Extent2D, bounds: vk::Extent2D) -> vk::Extent2D {
    vk::Extent2D {
        width: region.width.min(bounds.width),
        height: region.height.min(bounds.height),
    }
}
