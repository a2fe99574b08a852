// Scoped acquisition for multi-step construction
//
// Each handle created while building a compound object is guarded here. If a
// later step fails and the builder returns early, everything guarded so far is
// released in reverse creation order. `commit` hands the handles over to the
// finished object and disarms the guard.

use ash::vk;

/// A handle awaiting either commit or release.
#[derive(Clone, Copy, Debug)]
pub enum Pending {
    ImageView(vk::ImageView),
    Fence(vk::Fence),
    Semaphore(vk::Semaphore),
    CommandBuffer(vk::CommandPool, vk::CommandBuffer),
    CommandPool(vk::CommandPool),
    Framebuffer(vk::Framebuffer),
    RenderPass(vk::RenderPass),
    Buffer(vk::Buffer),
    Image(vk::Image),
    Memory(vk::DeviceMemory),
    Sampler(vk::Sampler),
    ShaderModule(vk::ShaderModule),
    DescriptorSetLayout(vk::DescriptorSetLayout),
    DescriptorPool(vk::DescriptorPool),
    PipelineLayout(vk::PipelineLayout),
    Pipeline(vk::Pipeline),
}

macro_rules! pending_from {
    ($($ty:ident),* $(,)?) => {
        $(
            impl From<vk::$ty> for Pending {
                fn from(handle: vk::$ty) -> Self {
                    Pending::$ty(handle)
                }
            }
        )*
    };
}

pending_from!(
    ImageView,
    Fence,
    Semaphore,
    CommandPool,
    Framebuffer,
    RenderPass,
    Buffer,
    Image,
    Sampler,
    ShaderModule,
    DescriptorSetLayout,
    DescriptorPool,
    PipelineLayout,
    Pipeline,
);

impl From<vk::DeviceMemory> for Pending {
    fn from(memory: vk::DeviceMemory) -> Self {
        Pending::Memory(memory)
    }
}

pub struct Rollback<'a> {
    device: &'a ash::Device,
    pending: Vec<Pending>,
}

impl<'a> Rollback<'a> {
    pub fn new(device: &'a ash::Device) -> Self {
        Self {
            device,
            pending: Vec::new(),
        }
    }

    /// Guard `handle` and give it back.
    pub fn guard<T: Copy + Into<Pending>>(&mut self, handle: T) -> T {
        self.pending.push(handle.into());
        handle
    }

    pub fn guard_command_buffer(
        &mut self,
        pool: vk::CommandPool,
        command_buffer: vk::CommandBuffer,
    ) -> vk::CommandBuffer {
        self.pending.push(Pending::CommandBuffer(pool, command_buffer));
        command_buffer
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Construction finished: the guarded handles now belong to the caller.
    pub fn commit(mut self) {
        self.pending.clear();
    }
}

impl Drop for Rollback<'_> {
    fn drop(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        log::debug!("Rolling back {} partially built handles", self.pending.len());

        let device = self.device;
        for pending in self.pending.drain(..).rev() {
            unsafe {
                match pending {
                    Pending::ImageView(view) => device.destroy_image_view(view, None),
                    Pending::Fence(fence) => device.destroy_fence(fence, None),
                    Pending::Semaphore(semaphore) => device.destroy_semaphore(semaphore, None),
                    Pending::CommandBuffer(pool, command_buffer) => {
                        device.free_command_buffers(pool, &[command_buffer])
                    }
                    Pending::CommandPool(pool) => device.destroy_command_pool(pool, None),
                    Pending::Framebuffer(framebuffer) => {
                        device.destroy_framebuffer(framebuffer, None)
                    }
                    Pending::RenderPass(render_pass) => {
                        device.destroy_render_pass(render_pass, None)
                    }
                    Pending::Buffer(buffer) => device.destroy_buffer(buffer, None),
                    Pending::Image(image) => device.destroy_image(image, None),
                    Pending::Memory(memory) => device.free_memory(memory, None),
                    Pending::Sampler(sampler) => device.destroy_sampler(sampler, None),
                    Pending::ShaderModule(module) => device.destroy_shader_module(module, None),
                    Pending::DescriptorSetLayout(layout) => {
                        device.destroy_descriptor_set_layout(layout, None)
                    }
                    Pending::DescriptorPool(pool) => device.destroy_descriptor_pool(pool, None),
                    Pending::PipelineLayout(layout) => {
                        device.destroy_pipeline_layout(layout, None)
                    }
                    Pending::Pipeline(pipeline) => device.destroy_pipeline(pipeline, None),
                }
            }
        }
    }
}
