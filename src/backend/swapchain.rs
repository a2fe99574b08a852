// Swapchain - per-image resources for presentation
//
// A set is built either against the context's own surface (`create`) or around
// a swapchain the host created (`adopt`). Either way every image gets its own
// view, command buffer and fence, and the set shares one presentation
// semaphore. Sets are never patched: a resize drops the whole set and builds a
// new one.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::scope::Rollback;
use super::{sync, DeviceContext, Ownership, Tracked};
use crate::error::VkResultExt;

/// Bounded wait used only while tearing a set down
const TEARDOWN_TIMEOUT_NS: u64 = 1_000_000_000;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one resource set, never reused
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SwapchainId(u64);

impl SwapchainId {
    pub fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// The parts of the creation info the overlay needs later.
///
/// `vk::SwapchainCreateInfoKHR` carries raw pointers, so only plain values are
/// kept.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainInfo {
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub extent: vk::Extent2D,
    pub min_image_count: u32,
    pub present_mode: vk::PresentModeKHR,
    pub usage: vk::ImageUsageFlags,
}

impl From<&vk::SwapchainCreateInfoKHR> for SwapchainInfo {
    fn from(info: &vk::SwapchainCreateInfoKHR) -> Self {
        Self {
            format: info.image_format,
            color_space: info.image_color_space,
            extent: info.image_extent,
            min_image_count: info.min_image_count,
            present_mode: info.present_mode,
            usage: info.image_usage,
        }
    }
}

/// Resources dedicated to one swapchain image
#[derive(Clone, Copy, Debug)]
pub struct PerImage {
    /// Owned by the swapchain
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub command_buffer: vk::CommandBuffer,
    pub fence: vk::Fence,
}

pub struct SwapchainResources {
    id: SwapchainId,
    ctx: Arc<DeviceContext>,
    swapchain: Tracked<vk::SwapchainKHR>,
    info: SwapchainInfo,
    images: Vec<PerImage>,
    semaphore: Tracked<vk::Semaphore>,
    last_index: Option<u32>,
}

impl SwapchainResources {
    /// Build a swapchain against the context's own surface.
    ///
    /// Opaque composite, FIFO and sRGB non-linear colour space are fixed; the
    /// caller picks format, extent and minimum image count.
    pub fn create(
        ctx: &Arc<DeviceContext>,
        format: vk::Format,
        extent: vk::Extent2D,
        min_image_count: u32,
    ) -> Result<Self> {
        let surface = ctx
            .surface()
            .context("Cannot create a swapchain without a surface")?;

        log::info!(
            "Creating swapchain: {}x{} {:?}, at least {} images",
            extent.width,
            extent.height,
            format,
            min_image_count
        );

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(min_image_count)
            .image_format(format)
            .image_color_space(vk::ColorSpaceKHR::SRGB_NONLINEAR)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(vk::SurfaceTransformFlagsKHR::IDENTITY)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(vk::PresentModeKHR::FIFO)
            .clipped(true);

        let swapchain = unsafe { ctx.swapchain_fn().create_swapchain(&create_info, None) }
            .resource("vkCreateSwapchainKHR")
            .context("Failed to create swapchain")?;

        Self::build(ctx, Tracked::owned(swapchain), SwapchainInfo::from(&*create_info))
    }

    /// Wrap a swapchain the host created. The swapchain is never destroyed
    /// here; the initial semaphore is created here and is released with the set.
    pub fn adopt(
        ctx: &Arc<DeviceContext>,
        swapchain: vk::SwapchainKHR,
        create_info: &vk::SwapchainCreateInfoKHR,
    ) -> Result<Self> {
        log::info!(
            "Adopting swapchain {:?}: {}x{} {:?}",
            swapchain,
            create_info.image_extent.width,
            create_info.image_extent.height,
            create_info.image_format
        );

        Self::build(ctx, Tracked::borrowed(swapchain), SwapchainInfo::from(create_info))
    }

    fn build(
        ctx: &Arc<DeviceContext>,
        swapchain: Tracked<vk::SwapchainKHR>,
        info: SwapchainInfo,
    ) -> Result<Self> {
        match Self::build_images(ctx, swapchain.handle, &info) {
            Ok((images, semaphore)) => {
                let id = SwapchainId::next();
                ctx.set_current_swapchain(id);

                log::info!("Swapchain set {:?} ready with {} images", id, images.len());

                Ok(Self {
                    id,
                    ctx: ctx.clone(),
                    swapchain,
                    info,
                    images,
                    semaphore: Tracked::owned(semaphore),
                    last_index: None,
                })
            }
            Err(e) => {
                if swapchain.is_owned() {
                    unsafe { ctx.swapchain_fn().destroy_swapchain(swapchain.handle, None) };
                }
                Err(e)
            }
        }
    }

    fn build_images(
        ctx: &DeviceContext,
        swapchain: vk::SwapchainKHR,
        info: &SwapchainInfo,
    ) -> Result<(Vec<PerImage>, vk::Semaphore)> {
        let device = ctx.device();
        let mut scope = Rollback::new(device);

        let images = unsafe { ctx.swapchain_fn().get_swapchain_images(swapchain) }
            .resource("vkGetSwapchainImagesKHR")
            .context("Failed to query swapchain images")?;

        let mut per_image = Vec::with_capacity(images.len());
        for image in images {
            let view_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(info.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            let view = scope.guard(
                unsafe { device.create_image_view(&view_info, None) }
                    .resource("vkCreateImageView")
                    .context("Failed to create swapchain image view")?,
            );

            let alloc_info = vk::CommandBufferAllocateInfo::builder()
                .command_pool(ctx.command_pool())
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);

            let command_buffer = unsafe { device.allocate_command_buffers(&alloc_info) }
                .resource("vkAllocateCommandBuffers")?[0];
            scope.guard_command_buffer(ctx.command_pool(), command_buffer);

            let fence = scope.guard(sync::create_fence(device, true)?);

            per_image.push(PerImage {
                image,
                view,
                command_buffer,
                fence,
            });
        }

        let semaphore = scope.guard(sync::create_semaphore(device)?);

        scope.commit();
        Ok((per_image, semaphore))
    }

    /// Drop this set and build a replacement at `extent`.
    ///
    /// Only sets that own their swapchain can do this; adopted sets are
    /// rebuilt by the host.
    pub fn recreate(self, extent: vk::Extent2D) -> Result<Self> {
        if !self.swapchain.is_owned() {
            anyhow::bail!("Adopted swapchains are recreated by their owner");
        }

        let ctx = self.ctx.clone();
        let info = self.info;
        drop(self);

        Self::create(&ctx, info.format, extent, info.min_image_count)
    }

    /// Replace the shared semaphore with one supplied by the host.
    pub fn set_semaphore(&mut self, semaphore: vk::Semaphore) {
        if semaphore == self.semaphore.handle {
            return;
        }

        if self.semaphore.is_owned() {
            unsafe { self.ctx.device().destroy_semaphore(self.semaphore.handle, None) };
        }
        self.semaphore = Tracked::borrowed(semaphore);
    }

    /// Wait for the image's previous submission, then start recording.
    pub fn begin_commands(&self, index: u32) -> Result<vk::CommandBuffer> {
        let frame = self.image(index)?;
        let device = self.ctx.device();

        sync::wait(device, frame.fence)?;

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { device.begin_command_buffer(frame.command_buffer, &begin_info) }
            .context("Failed to begin overlay command buffer")?;

        Ok(frame.command_buffer)
    }

    pub fn end_commands(&self, index: u32) -> Result<()> {
        let frame = self.image(index)?;
        unsafe { self.ctx.device().end_command_buffer(frame.command_buffer) }
            .context("Failed to end overlay command buffer")
    }

    /// Submit the image's command buffer; its fence signals on completion.
    pub fn submit(&self, index: u32) -> Result<()> {
        self.submit_waiting(index, None)
    }

    /// Like `submit`, but ordered after the shared semaphore signalled by
    /// `acquire_next_image`.
    pub fn submit_after_acquire(&self, index: u32) -> Result<()> {
        self.submit_waiting(index, Some(self.semaphore.handle))
    }

    fn submit_waiting(&self, index: u32, semaphore: Option<vk::Semaphore>) -> Result<()> {
        let frame = self.image(index)?;
        let device = self.ctx.device();

        let command_buffers = [frame.command_buffer];
        let wait_semaphores: Vec<vk::Semaphore> = semaphore.into_iter().collect();
        let wait_stages = vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT; wait_semaphores.len()];
        let submit_info = vk::SubmitInfo::builder()
            .command_buffers(&command_buffers)
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages);

        unsafe {
            device
                .reset_fences(&[frame.fence])
                .context("Failed to reset image fence")?;
            device
                .queue_submit(self.ctx.queue(), &[submit_info.build()], frame.fence)
                .with_context(|| format!("Failed to submit overlay commands for image {}", index))?;
        }
        Ok(())
    }

    /// Block until the image's last submission finished.
    pub fn wait(&self, index: u32) -> Result<()> {
        sync::wait(self.ctx.device(), self.image(index)?.fence)
    }

    /// Acquire the next image of a swapchain this set created itself.
    ///
    /// Returns the index and whether the swapchain is suboptimal.
    pub fn acquire_next_image(&mut self) -> Result<(u32, bool)> {
        let (index, suboptimal) = unsafe {
            self.ctx.swapchain_fn().acquire_next_image(
                self.swapchain.handle,
                u64::MAX,
                self.semaphore.handle,
                vk::Fence::null(),
            )
        }
        .context("Failed to acquire swapchain image")?;

        self.wait(index)?;
        self.last_index = Some(index);
        Ok((index, suboptimal))
    }

    /// Present `index` and wait for the queue to drain. Returns whether the
    /// swapchain is suboptimal.
    pub fn present(&self, index: u32) -> Result<bool> {
        let swapchains = [self.swapchain.handle];
        let image_indices = [index];
        let present_info = vk::PresentInfoKHR::builder()
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let suboptimal = unsafe {
            self.ctx
                .swapchain_fn()
                .queue_present(self.ctx.queue(), &present_info)
        }
        .context("Failed to present swapchain image")?;

        unsafe { self.ctx.device().queue_wait_idle(self.ctx.queue()) }
            .context("Failed waiting for present")?;
        Ok(suboptimal)
    }

    fn image(&self, index: u32) -> Result<&PerImage> {
        self.images.get(index as usize).with_context(|| {
            format!(
                "Image index {} out of range for a swapchain of {}",
                index,
                self.images.len()
            )
        })
    }

    pub fn id(&self) -> SwapchainId {
        self.id
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain.handle
    }

    pub fn ownership(&self) -> Ownership {
        self.swapchain.ownership
    }

    pub fn info(&self) -> &SwapchainInfo {
        &self.info
    }

    pub fn format(&self) -> vk::Format {
        self.info.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.info.extent
    }

    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    pub fn images(&self) -> &[PerImage] {
        &self.images
    }

    pub fn semaphore(&self) -> Tracked<vk::Semaphore> {
        self.semaphore
    }

    pub fn last_index(&self) -> Option<u32> {
        self.last_index
    }

    pub fn set_last_index(&mut self, index: u32) {
        self.last_index = Some(index);
    }
}

impl Drop for SwapchainResources {
    fn drop(&mut self) {
        log::info!(
            "Destroying swapchain set {:?} ({:?}, {} images)",
            self.id,
            self.swapchain.ownership,
            self.images.len()
        );

        let device = self.ctx.device();
        let fences: Vec<vk::Fence> = self.images.iter().map(|frame| frame.fence).collect();

        unsafe {
            if !fences.is_empty() {
                if let Err(e) = device.wait_for_fences(&fences, true, TEARDOWN_TIMEOUT_NS) {
                    log::warn!("Image fences did not signal before teardown: {:?}", e);
                }
            }

            for frame in self.images.drain(..) {
                device.destroy_image_view(frame.view, None);
                device.free_command_buffers(self.ctx.command_pool(), &[frame.command_buffer]);
                device.destroy_fence(frame.fence, None);
            }

            if self.semaphore.is_owned() {
                device.destroy_semaphore(self.semaphore.handle, None);
            }
            if self.swapchain.is_owned() {
                self.ctx
                    .swapchain_fn()
                    .destroy_swapchain(self.swapchain.handle, None);
            }
        }

        self.ctx.clear_current_swapchain(self.id);
    }
}
