// Render pass + framebuffer cache
//
// The render pass outlives every swapchain: it depends only on the colour
// format. Framebuffers depend on the image views and extent of one swapchain
// set, so they are rebuilt whenever the cache is pointed at a different set.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::scope::Rollback;
use super::{DeviceContext, SwapchainId, SwapchainResources};
use crate::error::VkResultExt;

pub struct RenderTarget {
    ctx: Arc<DeviceContext>,
    render_pass: vk::RenderPass,
    format: vk::Format,
    bound: Option<SwapchainId>,
    extent: vk::Extent2D,
    framebuffers: Vec<vk::Framebuffer>,
}

impl RenderTarget {
    /// Build the render pass from `render_pass_info` and one framebuffer per
    /// image of `swapchain`.
    pub fn create(
        ctx: &Arc<DeviceContext>,
        render_pass_info: &vk::RenderPassCreateInfo,
        swapchain: &SwapchainResources,
    ) -> Result<Self> {
        let render_pass = unsafe { ctx.device().create_render_pass(render_pass_info, None) }
            .resource("vkCreateRenderPass")
            .context("Failed to create render pass")?;

        let mut target = Self {
            ctx: ctx.clone(),
            render_pass,
            format: swapchain.format(),
            bound: None,
            extent: vk::Extent2D::default(),
            framebuffers: Vec::new(),
        };
        // On failure `target` drops and takes the render pass with it
        target.revalidate(swapchain)?;

        Ok(target)
    }

    /// Render pass that draws over whatever the host left in the image.
    ///
    /// Load is DONT_CARE and nothing is cleared: the overlay only writes the
    /// pixels it covers. The image arrives and leaves in PRESENT_SRC.
    pub fn overlay(ctx: &Arc<DeviceContext>, swapchain: &SwapchainResources) -> Result<Self> {
        let color_attachment = vk::AttachmentDescription::builder()
            .format(swapchain.format())
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::DONT_CARE)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .build();

        let color_attachment_ref = vk::AttachmentReference::builder()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .build();

        let color_attachments = &[color_attachment_ref];
        let subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(color_attachments)
            .build();

        let dependency = vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .build();

        let attachments = &[color_attachment];
        let subpasses = &[subpass];
        let dependencies = &[dependency];

        let render_pass_info = vk::RenderPassCreateInfo::builder()
            .attachments(attachments)
            .subpasses(subpasses)
            .dependencies(dependencies);

        Self::create(ctx, &render_pass_info, swapchain)
    }

    /// Rebuild exactly one framebuffer per image of `swapchain`.
    pub fn revalidate(&mut self, swapchain: &SwapchainResources) -> Result<()> {
        self.release_framebuffers();

        let device = self.ctx.device();
        let extent = swapchain.extent();
        let mut scope = Rollback::new(device);

        let mut framebuffers = Vec::with_capacity(swapchain.images().len());
        for frame in swapchain.images() {
            let attachments = &[frame.view];
            let framebuffer_info = vk::FramebufferCreateInfo::builder()
                .render_pass(self.render_pass)
                .attachments(attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);

            let framebuffer = unsafe { device.create_framebuffer(&framebuffer_info, None) }
                .resource("vkCreateFramebuffer")
                .with_context(|| {
                    format!(
                        "Failed to create {}x{} framebuffer",
                        extent.width, extent.height
                    )
                })?;
            framebuffers.push(scope.guard(framebuffer));
        }
        scope.commit();

        log::debug!(
            "Render target bound to {:?}: {} framebuffers at {}x{}",
            swapchain.id(),
            framebuffers.len(),
            extent.width,
            extent.height
        );

        self.framebuffers = framebuffers;
        self.extent = extent;
        self.bound = Some(swapchain.id());
        Ok(())
    }

    /// Revalidate only if bound to a different set. Returns whether it did.
    pub fn ensure_bound(&mut self, swapchain: &SwapchainResources) -> Result<bool> {
        if self.bound == Some(swapchain.id()) {
            return Ok(false);
        }
        self.revalidate(swapchain)?;
        Ok(true)
    }

    /// Drop the framebuffers; the render pass stays.
    pub fn release_framebuffers(&mut self) {
        let device = self.ctx.device();
        for framebuffer in self.framebuffers.drain(..) {
            unsafe { device.destroy_framebuffer(framebuffer, None) };
        }
        self.bound = None;
    }

    /// Begin the render pass on image `index` over the full bound extent.
    pub fn begin(&self, cmd: vk::CommandBuffer, index: u32) -> Result<()> {
        let framebuffer = *self
            .framebuffers
            .get(index as usize)
            .with_context(|| format!("No framebuffer for image {}", index))?;

        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.extent,
            });

        unsafe {
            self.ctx
                .device()
                .cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE)
        };
        Ok(())
    }

    pub fn is_bound_to(&self, id: SwapchainId) -> bool {
        self.bound == Some(id)
    }

    pub fn bound(&self) -> Option<SwapchainId> {
        self.bound
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn framebuffers(&self) -> &[vk::Framebuffer] {
        &self.framebuffers
    }
}

impl Drop for RenderTarget {
    fn drop(&mut self) {
        self.release_framebuffers();
        unsafe { self.ctx.device().destroy_render_pass(self.render_pass, None) };
    }
}
