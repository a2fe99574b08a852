// Memory-backed resources: buffers and the overlay texture
//
// Every resource here owns its device memory and releases it on drop. The
// memory type is always the lowest-index type that is allowed by the
// resource's requirements and carries the requested property flags.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::scope::Rollback;
use super::DeviceContext;
use crate::error::{OverlayError, VkResultExt};

/// Texture format for both image and view
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

/// Find a suitable memory type index
pub fn find_memory_type(
    properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> Result<u32> {
    let count = properties.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32);

    (0..count)
        .find(|&i| {
            let allowed = (type_bits & (1 << i)) != 0;
            allowed && properties.memory_types[i as usize].property_flags.contains(flags)
        })
        .ok_or_else(|| OverlayError::NoSuitableMemoryType { type_bits, flags }.into())
}

/// What a buffer is for. Decides usage bits and memory properties.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    /// Host-written source of a transfer
    Staging,
    /// Device-local vertex data filled by a transfer
    VertexDestination,
    /// Host-read destination of a transfer
    Readback,
}

impl BufferUsage {
    pub fn flags(self) -> (vk::BufferUsageFlags, vk::MemoryPropertyFlags) {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        match self {
            BufferUsage::Staging => (vk::BufferUsageFlags::TRANSFER_SRC, host),
            BufferUsage::VertexDestination => (
                vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::VERTEX_BUFFER,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            ),
            BufferUsage::Readback => (vk::BufferUsageFlags::TRANSFER_DST, host),
        }
    }

    fn host_visible(self) -> bool {
        self != BufferUsage::VertexDestination
    }
}

/// A buffer bound to its own allocation
pub struct Buffer {
    ctx: Arc<DeviceContext>,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    usage: BufferUsage,
}

impl Buffer {
    pub fn new(ctx: &Arc<DeviceContext>, usage: BufferUsage, size: vk::DeviceSize) -> Result<Self> {
        let device = ctx.device();
        let (usage_flags, memory_flags) = usage.flags();
        let mut scope = Rollback::new(device);

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage_flags)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = scope.guard(
            unsafe { device.create_buffer(&buffer_info, None) }
                .resource("vkCreateBuffer")
                .with_context(|| format!("Failed to create {:?} buffer of {} bytes", usage, size))?,
        );

        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let memory = scope.guard(allocate(ctx, requirements, memory_flags)?);

        unsafe { device.bind_buffer_memory(buffer, memory, 0) }
            .resource("vkBindBufferMemory")?;

        scope.commit();
        Ok(Self {
            ctx: ctx.clone(),
            buffer,
            memory,
            size,
            usage,
        })
    }

    /// Device-local vertex buffer filled through a transient staging buffer
    pub fn vertex_with_data(ctx: &Arc<DeviceContext>, bytes: &[u8]) -> Result<Self> {
        let size = bytes.len() as vk::DeviceSize;

        let staging = Buffer::new(ctx, BufferUsage::Staging, size)?;
        staging.write(bytes)?;

        let vertices = Buffer::new(ctx, BufferUsage::VertexDestination, size)?;
        ctx.submit_scratch(|device, cmd| unsafe {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size,
            };
            device.cmd_copy_buffer(cmd, staging.handle(), vertices.handle(), &[region]);
        })
        .context("Failed to upload vertex data")?;

        Ok(vertices)
    }

    /// Copy `bytes` into the start of a host-visible buffer
    pub fn write(&self, bytes: &[u8]) -> Result<()> {
        self.check_host_access(bytes.len())?;

        unsafe {
            let ptr = self.map()?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len());
            self.ctx.device().unmap_memory(self.memory);
        }
        Ok(())
    }

    /// Read the whole content of a host-visible buffer
    pub fn read(&self) -> Result<Vec<u8>> {
        self.check_host_access(self.size as usize)?;

        let mut bytes = vec![0u8; self.size as usize];
        unsafe {
            let ptr = self.map()?;
            std::ptr::copy_nonoverlapping(ptr, bytes.as_mut_ptr(), bytes.len());
            self.ctx.device().unmap_memory(self.memory);
        }
        Ok(bytes)
    }

    unsafe fn map(&self) -> Result<*mut u8> {
        let ptr = self
            .ctx
            .device()
            .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
            .context("Failed to map buffer memory")?;
        Ok(ptr as *mut u8)
    }

    fn check_host_access(&self, len: usize) -> Result<()> {
        if !self.usage.host_visible() {
            anyhow::bail!("{:?} buffers are not host visible", self.usage);
        }
        if len as vk::DeviceSize > self.size {
            anyhow::bail!("{} bytes do not fit a {} byte buffer", len, self.size);
        }
        Ok(())
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device().destroy_buffer(self.buffer, None);
            self.ctx.device().free_memory(self.memory, None);
        }
    }
}

/// The sampled overlay image, device local
pub struct Texture {
    ctx: Arc<DeviceContext>,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    extent: vk::Extent2D,
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("image", &self.image)
            .field("memory", &self.memory)
            .field("view", &self.view)
            .field("extent", &self.extent)
            .finish_non_exhaustive()
    }
}

impl Texture {
    /// Upload tightly packed RGBA8 pixels and build a sampled view.
    ///
    /// The copy runs through the scratch command buffer and is waited on, so
    /// the staging buffer is gone when this returns.
    pub fn upload(ctx: &Arc<DeviceContext>, pixels: &[u8], width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            anyhow::bail!("Texture of {}x{} has no pixels", width, height);
        }
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            anyhow::bail!(
                "Texture of {}x{} needs {} bytes, got {}",
                width,
                height,
                expected,
                pixels.len()
            );
        }

        log::info!("Uploading {}x{} overlay texture", width, height);

        let staging = Buffer::new(ctx, BufferUsage::Staging, expected as vk::DeviceSize)?;
        staging.write(pixels)?;

        let device = ctx.device();
        let mut scope = Rollback::new(device);
        let extent = vk::Extent2D { width, height };

        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(TEXTURE_FORMAT)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(
                vk::ImageUsageFlags::TRANSFER_DST
                    | vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::SAMPLED,
            )
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = scope.guard(
            unsafe { device.create_image(&image_info, None) }
                .resource("vkCreateImage")
                .context("Failed to create overlay texture image")?,
        );

        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let memory = scope.guard(allocate(
            ctx,
            requirements,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?);

        unsafe { device.bind_image_memory(image, memory, 0) }.resource("vkBindImageMemory")?;

        ctx.submit_scratch(|device, cmd| unsafe {
            transition(
                device,
                cmd,
                image,
                (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL),
                (vk::AccessFlags::empty(), vk::AccessFlags::TRANSFER_WRITE),
                (vk::PipelineStageFlags::TOP_OF_PIPE, vk::PipelineStageFlags::TRANSFER),
            );
            device.cmd_copy_buffer_to_image(
                cmd,
                staging.handle(),
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[copy_region(extent)],
            );
            transition(
                device,
                cmd,
                image,
                (
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                ),
                (vk::AccessFlags::TRANSFER_WRITE, vk::AccessFlags::SHADER_READ),
                (
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::FRAGMENT_SHADER,
                ),
            );
        })
        .context("Failed to upload overlay texture")?;

        drop(staging);

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(TEXTURE_FORMAT)
            .subresource_range(COLOR_RANGE);

        let view = unsafe { device.create_image_view(&view_info, None) }
            .resource("vkCreateImageView")
            .context("Failed to create overlay texture view")?;

        scope.commit();
        Ok(Self {
            ctx: ctx.clone(),
            image,
            memory,
            view,
            extent,
        })
    }

    /// Copy the texture back to the host through a readback buffer
    pub fn download(&self) -> Result<Vec<u8>> {
        let size = self.extent.width as vk::DeviceSize * self.extent.height as vk::DeviceSize * 4;
        let readback = Buffer::new(&self.ctx, BufferUsage::Readback, size)?;
        let image = self.image;
        let extent = self.extent;

        self.ctx
            .submit_scratch(|device, cmd| unsafe {
                transition(
                    device,
                    cmd,
                    image,
                    (
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    ),
                    (vk::AccessFlags::SHADER_READ, vk::AccessFlags::TRANSFER_READ),
                    (
                        vk::PipelineStageFlags::FRAGMENT_SHADER,
                        vk::PipelineStageFlags::TRANSFER,
                    ),
                );
                device.cmd_copy_image_to_buffer(
                    cmd,
                    image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    readback.handle(),
                    &[copy_region(extent)],
                );
                transition(
                    device,
                    cmd,
                    image,
                    (
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    ),
                    (vk::AccessFlags::TRANSFER_READ, vk::AccessFlags::SHADER_READ),
                    (
                        vk::PipelineStageFlags::TRANSFER,
                        vk::PipelineStageFlags::FRAGMENT_SHADER,
                    ),
                );
            })
            .context("Failed to read back overlay texture")?;

        readback.read()
    }

    pub fn image(&self) -> vk::Image {
        self.image
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe {
            let device = self.ctx.device();
            device.destroy_image_view(self.view, None);
            device.destroy_image(self.image, None);
            device.free_memory(self.memory, None);
        }
    }
}

/// Allocate exactly what the API asked for, from the lowest suitable type
fn allocate(
    ctx: &DeviceContext,
    requirements: vk::MemoryRequirements,
    flags: vk::MemoryPropertyFlags,
) -> Result<vk::DeviceMemory> {
    let memory_type_index =
        find_memory_type(ctx.memory_properties(), requirements.memory_type_bits, flags)?;

    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);

    unsafe { ctx.device().allocate_memory(&alloc_info, None) }
        .resource("vkAllocateMemory")
        .with_context(|| format!("Failed to allocate {} bytes", requirements.size))
}

fn copy_region(extent: vk::Extent2D) -> vk::BufferImageCopy {
    vk::BufferImageCopy {
        buffer_offset: 0,
        buffer_row_length: 0,
        buffer_image_height: 0,
        image_subresource: vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        },
        image_offset: vk::Offset3D::default(),
        image_extent: vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        },
    }
}

unsafe fn transition(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    (old_layout, new_layout): (vk::ImageLayout, vk::ImageLayout),
    (src_access, dst_access): (vk::AccessFlags, vk::AccessFlags),
    (src_stage, dst_stage): (vk::PipelineStageFlags, vk::PipelineStageFlags),
) {
    let barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(COLOR_RANGE)
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .build();

    device.cmd_pipeline_barrier(
        cmd,
        src_stage,
        dst_stage,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        &[barrier],
    );
}
