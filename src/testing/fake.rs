// In-process fake Vulkan driver
//
// Every entry point the crate calls is implemented against thread-local state,
// so each test thread sees its own GPU. Handles come from one global counter
// and never collide across threads. Copies recorded into command buffers run
// when the buffer is submitted; fences signal on submission.

use ash::vk::{self, Handle};
use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::{c_char, c_void, CStr};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(0x1000);

/// Command recorded into a command buffer
#[derive(Clone, Debug)]
pub enum Command {
    PipelineBarrier,
    CopyBuffer,
    CopyBufferToImage,
    CopyImageToBuffer,
    BeginRenderPass {
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
    },
    EndRenderPass,
    BindPipeline(vk::Pipeline),
    BindDescriptorSets(vk::DescriptorSet),
    SetViewport {
        width: f32,
        height: f32,
    },
    SetScissor {
        width: u32,
        height: u32,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
}

#[derive(Clone, Debug)]
pub struct Submission {
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub wait_semaphores: Vec<vk::Semaphore>,
    pub fence: vk::Fence,
}

#[derive(Clone, Debug)]
pub struct FramebufferInfo {
    pub width: u32,
    pub height: u32,
    pub attachments: Vec<vk::ImageView>,
}

#[derive(Clone, Copy, Debug)]
pub struct RenderPassInfo {
    pub format: vk::Format,
    pub load_op: vk::AttachmentLoadOp,
    pub final_layout: vk::ImageLayout,
}

#[derive(Clone, Copy, Debug)]
enum Transfer {
    Buffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        size: u64,
    },
    BufferToImage {
        buffer: vk::Buffer,
        image: vk::Image,
    },
    ImageToBuffer {
        image: vk::Image,
        buffer: vk::Buffer,
    },
}

#[derive(Clone, Copy, Debug)]
struct Failure {
    result: vk::Result,
    skip: u32,
}

#[derive(Clone, Copy, Debug)]
struct Bound {
    size: u64,
    memory: Option<vk::DeviceMemory>,
}

#[derive(Clone, Debug)]
pub struct FakeGpu {
    // Configuration
    pub memory_types: Vec<vk::MemoryPropertyFlags>,
    pub queue_families: Vec<vk::QueueFlags>,
    pub supports_anisotropy: bool,
    pub max_sampler_anisotropy: f32,
    pub swapchain_image_count: u32,
    pub acquire_index: u32,
    pub acquire_result: vk::Result,
    pub present_result: vk::Result,

    // Observations
    pub calls: Vec<&'static str>,
    pub live: HashMap<u64, &'static str>,
    pub invalid_destroys: Vec<(&'static str, u64)>,
    pub commands: HashMap<vk::CommandBuffer, Vec<Command>>,
    pub submissions: Vec<Submission>,
    pub presents: Vec<(vk::SwapchainKHR, u32)>,
    pub queue_waits: usize,
    pub framebuffers: HashMap<vk::Framebuffer, FramebufferInfo>,
    pub render_passes: HashMap<vk::RenderPass, RenderPassInfo>,
    pub descriptor_bindings: Vec<u32>,
    pub sampler_anisotropy: Vec<Option<f32>>,

    physical_device: vk::PhysicalDevice,
    failures: HashMap<&'static str, Failure>,
    fences: HashMap<vk::Fence, bool>,
    memory: HashMap<vk::DeviceMemory, Vec<u8>>,
    buffers: HashMap<vk::Buffer, Bound>,
    images: HashMap<vk::Image, Bound>,
    pools: HashMap<vk::CommandBuffer, vk::CommandPool>,
    transfers: HashMap<vk::CommandBuffer, Vec<Transfer>>,
    swapchains: HashMap<vk::SwapchainKHR, Vec<vk::Image>>,
    queues: HashMap<(u64, u32, u32), vk::Queue>,
}

impl FakeGpu {
    fn new() -> Self {
        Self {
            memory_types: vec![
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            ],
            queue_families: vec![vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER],
            supports_anisotropy: true,
            max_sampler_anisotropy: 16.0,
            swapchain_image_count: 2,
            acquire_index: 0,
            acquire_result: vk::Result::SUCCESS,
            present_result: vk::Result::SUCCESS,
            calls: Vec::new(),
            live: HashMap::new(),
            invalid_destroys: Vec::new(),
            commands: HashMap::new(),
            submissions: Vec::new(),
            presents: Vec::new(),
            queue_waits: 0,
            framebuffers: HashMap::new(),
            render_passes: HashMap::new(),
            descriptor_bindings: Vec::new(),
            sampler_anisotropy: Vec::new(),
            physical_device: vk::PhysicalDevice::from_raw(next_raw()),
            failures: HashMap::new(),
            fences: HashMap::new(),
            memory: HashMap::new(),
            buffers: HashMap::new(),
            images: HashMap::new(),
            pools: HashMap::new(),
            transfers: HashMap::new(),
            swapchains: HashMap::new(),
            queues: HashMap::new(),
        }
    }

    fn create<H: Handle>(&mut self, kind: &'static str) -> H {
        let raw = next_raw();
        self.live.insert(raw, kind);
        H::from_raw(raw)
    }

    fn destroy<H: Handle>(&mut self, kind: &'static str, handle: H) -> bool {
        let raw = handle.as_raw();
        if raw == 0 {
            return false;
        }
        match self.live.remove(&raw) {
            Some(found) if found == kind => true,
            _ => {
                self.invalid_destroys.push((kind, raw));
                false
            }
        }
    }

    fn record(&mut self, cmd: vk::CommandBuffer, command: Command) {
        self.commands.entry(cmd).or_default().push(command);
    }

    fn bytes_of(&self, bound: Option<&Bound>) -> Vec<u8> {
        bound
            .and_then(|bound| {
                let memory = self.memory.get(&bound.memory?)?;
                Some(memory[..(bound.size as usize).min(memory.len())].to_vec())
            })
            .unwrap_or_default()
    }

    fn write_to(&mut self, bound: Option<Bound>, bytes: &[u8]) {
        if let Some(memory) = bound
            .and_then(|bound| bound.memory)
            .and_then(|memory| self.memory.get_mut(&memory))
        {
            let len = bytes.len().min(memory.len());
            memory[..len].copy_from_slice(&bytes[..len]);
        }
    }

    fn run_transfers(&mut self, cmd: vk::CommandBuffer) {
        let transfers = self.transfers.get(&cmd).cloned().unwrap_or_default();
        for transfer in transfers {
            match transfer {
                Transfer::Buffer { src, dst, size } => {
                    let mut bytes = self.bytes_of(self.buffers.get(&src));
                    bytes.truncate(size as usize);
                    self.write_to(self.buffers.get(&dst).copied(), &bytes);
                }
                Transfer::BufferToImage { buffer, image } => {
                    let bytes = self.bytes_of(self.buffers.get(&buffer));
                    self.write_to(self.images.get(&image).copied(), &bytes);
                }
                Transfer::ImageToBuffer { image, buffer } => {
                    let bytes = self.bytes_of(self.images.get(&image));
                    self.write_to(self.buffers.get(&buffer).copied(), &bytes);
                }
            }
        }
    }

    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: self.memory_types.len() as u32,
            memory_heap_count: 1,
            ..Default::default()
        };
        for (slot, &flags) in properties.memory_types.iter_mut().zip(&self.memory_types) {
            slot.property_flags = flags;
        }
        properties.memory_heaps[0].size = 1 << 30;
        properties
    }

    fn memory_type_bits(&self) -> u32 {
        (1u32 << self.memory_types.len()) - 1
    }
}

thread_local! {
    static GPU: RefCell<FakeGpu> = RefCell::new(FakeGpu::new());
}

fn next_raw() -> u64 {
    NEXT_HANDLE.fetch_add(1, Ordering::Relaxed)
}

fn with<R>(f: impl FnOnce(&mut FakeGpu) -> R) -> R {
    GPU.with(|gpu| f(&mut gpu.borrow_mut()))
}

/// Log the call; returns the injected failure if one is armed for `name`.
fn enter(name: &'static str) -> Option<vk::Result> {
    with(|gpu| {
        gpu.calls.push(name);
        let failure = gpu.failures.get_mut(name)?;
        if failure.skip > 0 {
            failure.skip -= 1;
            None
        } else {
            Some(failure.result)
        }
    })
}

unsafe fn slice<'a, T>(ptr: *const T, len: u32) -> &'a [T] {
    if ptr.is_null() || len == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(ptr, len as usize)
    }
}

/// Two-call enumeration: count when `out` is null, otherwise fill.
unsafe fn enumerate<T: Copy>(items: &[T], count: *mut u32, out: *mut T) -> vk::Result {
    if out.is_null() {
        *count = items.len() as u32;
        return vk::Result::SUCCESS;
    }
    let written = (*count as usize).min(items.len());
    std::ptr::copy_nonoverlapping(items.as_ptr(), out, written);
    *count = written as u32;
    if written < items.len() {
        vk::Result::INCOMPLETE
    } else {
        vk::Result::SUCCESS
    }
}

// ---------------------------------------------------------------------------
// Test-facing API
// ---------------------------------------------------------------------------

pub fn reset() {
    with(|gpu| *gpu = FakeGpu::new());
}

pub fn configure(f: impl FnOnce(&mut FakeGpu)) {
    with(f);
}

pub fn snapshot() -> FakeGpu {
    with(|gpu| gpu.clone())
}

/// Make every later call to `name` fail with `result`.
pub fn fail_on(name: &'static str, result: vk::Result) {
    fail_after(name, 0, result);
}

/// Let `name` succeed `skip` more times, then fail with `result`.
pub fn fail_after(name: &'static str, skip: u32, result: vk::Result) {
    with(|gpu| gpu.failures.insert(name, Failure { result, skip }));
}

pub fn live(kind: &str) -> usize {
    with(|gpu| gpu.live.values().filter(|k| **k == kind).count())
}

pub fn is_live<H: Handle>(handle: H) -> bool {
    with(|gpu| gpu.live.contains_key(&handle.as_raw()))
}

pub fn calls() -> Vec<&'static str> {
    with(|gpu| gpu.calls.clone())
}

pub fn count_calls(name: &str) -> usize {
    with(|gpu| gpu.calls.iter().filter(|c| **c == name).count())
}

pub fn physical_device() -> vk::PhysicalDevice {
    with(|gpu| gpu.physical_device)
}

pub fn new_surface() -> vk::SurfaceKHR {
    with(|gpu| gpu.create("SurfaceKHR"))
}

pub fn fence_signaled(fence: vk::Fence) -> bool {
    with(|gpu| gpu.fences.get(&fence).copied().unwrap_or(false))
}

pub fn buffer_contents(buffer: vk::Buffer) -> Vec<u8> {
    with(|gpu| gpu.bytes_of(gpu.buffers.get(&buffer)))
}

/// Resolver used as the fake loader's `vkGetInstanceProcAddr`
pub unsafe extern "system" fn get_instance_proc_addr(
    _instance: vk::Instance,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    lookup(CStr::from_ptr(p_name).to_bytes())
}

unsafe extern "system" fn get_device_proc_addr(
    _device: vk::Device,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    lookup(CStr::from_ptr(p_name).to_bytes())
}

macro_rules! entry_points {
    ($name:expr; $($vk:literal => $f:ident),* $(,)?) => {
        match $name {
            $($vk => Some(std::mem::transmute::<*const (), unsafe extern "system" fn()>($f as *const ())),)*
            _ => None,
        }
    };
}

unsafe fn lookup(name: &[u8]) -> vk::PFN_vkVoidFunction {
    entry_points!(name;
        b"vkGetInstanceProcAddr" => get_instance_proc_addr,
        b"vkGetDeviceProcAddr" => get_device_proc_addr,
        b"vkCreateInstance" => create_instance,
        b"vkDestroyInstance" => destroy_instance,
        b"vkEnumeratePhysicalDevices" => enumerate_physical_devices,
        b"vkGetPhysicalDeviceQueueFamilyProperties" => get_queue_family_properties,
        b"vkGetPhysicalDeviceFeatures" => get_features,
        b"vkGetPhysicalDeviceMemoryProperties" => get_memory_properties,
        b"vkGetPhysicalDeviceProperties" => get_properties,
        b"vkDestroySurfaceKHR" => destroy_surface,
        b"vkCreateDevice" => create_device,
        b"vkDestroyDevice" => destroy_device,
        b"vkGetDeviceQueue" => get_device_queue,
        b"vkDeviceWaitIdle" => device_wait_idle,
        b"vkQueueWaitIdle" => queue_wait_idle,
        b"vkQueueSubmit" => queue_submit,
        b"vkCreateCommandPool" => create_command_pool,
        b"vkDestroyCommandPool" => destroy_command_pool,
        b"vkAllocateCommandBuffers" => allocate_command_buffers,
        b"vkFreeCommandBuffers" => free_command_buffers,
        b"vkBeginCommandBuffer" => begin_command_buffer,
        b"vkEndCommandBuffer" => end_command_buffer,
        b"vkCreateFence" => create_fence,
        b"vkDestroyFence" => destroy_fence,
        b"vkWaitForFences" => wait_for_fences,
        b"vkResetFences" => reset_fences,
        b"vkCreateSemaphore" => create_semaphore,
        b"vkDestroySemaphore" => destroy_semaphore,
        b"vkCreateImageView" => create_image_view,
        b"vkDestroyImageView" => destroy_image_view,
        b"vkCreateBuffer" => create_buffer,
        b"vkDestroyBuffer" => destroy_buffer,
        b"vkGetBufferMemoryRequirements" => get_buffer_memory_requirements,
        b"vkBindBufferMemory" => bind_buffer_memory,
        b"vkCreateImage" => create_image,
        b"vkDestroyImage" => destroy_image,
        b"vkGetImageMemoryRequirements" => get_image_memory_requirements,
        b"vkBindImageMemory" => bind_image_memory,
        b"vkAllocateMemory" => allocate_memory,
        b"vkFreeMemory" => free_memory,
        b"vkMapMemory" => map_memory,
        b"vkUnmapMemory" => unmap_memory,
        b"vkCreateShaderModule" => create_shader_module,
        b"vkDestroyShaderModule" => destroy_shader_module,
        b"vkCreateRenderPass" => create_render_pass,
        b"vkDestroyRenderPass" => destroy_render_pass,
        b"vkCreateFramebuffer" => create_framebuffer,
        b"vkDestroyFramebuffer" => destroy_framebuffer,
        b"vkCreateDescriptorSetLayout" => create_descriptor_set_layout,
        b"vkDestroyDescriptorSetLayout" => destroy_descriptor_set_layout,
        b"vkCreateDescriptorPool" => create_descriptor_pool,
        b"vkDestroyDescriptorPool" => destroy_descriptor_pool,
        b"vkAllocateDescriptorSets" => allocate_descriptor_sets,
        b"vkUpdateDescriptorSets" => update_descriptor_sets,
        b"vkCreatePipelineLayout" => create_pipeline_layout,
        b"vkDestroyPipelineLayout" => destroy_pipeline_layout,
        b"vkCreateGraphicsPipelines" => create_graphics_pipelines,
        b"vkDestroyPipeline" => destroy_pipeline,
        b"vkCreateSampler" => create_sampler,
        b"vkDestroySampler" => destroy_sampler,
        b"vkCmdPipelineBarrier" => cmd_pipeline_barrier,
        b"vkCmdCopyBuffer" => cmd_copy_buffer,
        b"vkCmdCopyBufferToImage" => cmd_copy_buffer_to_image,
        b"vkCmdCopyImageToBuffer" => cmd_copy_image_to_buffer,
        b"vkCmdBeginRenderPass" => cmd_begin_render_pass,
        b"vkCmdEndRenderPass" => cmd_end_render_pass,
        b"vkCmdBindPipeline" => cmd_bind_pipeline,
        b"vkCmdBindDescriptorSets" => cmd_bind_descriptor_sets,
        b"vkCmdSetViewport" => cmd_set_viewport,
        b"vkCmdSetScissor" => cmd_set_scissor,
        b"vkCmdDraw" => cmd_draw,
        b"vkCreateSwapchainKHR" => create_swapchain,
        b"vkDestroySwapchainKHR" => destroy_swapchain,
        b"vkGetSwapchainImagesKHR" => get_swapchain_images,
        b"vkAcquireNextImageKHR" => acquire_next_image,
        b"vkQueuePresentKHR" => queue_present,
    )
}

/// Body shared by every `vkCreate*` that makes one plain object
macro_rules! create_object {
    ($name:literal, $kind:literal, $out:expr) => {{
        if let Some(result) = enter($name) {
            return result;
        }
        *$out = with(|gpu| gpu.create($kind));
        vk::Result::SUCCESS
    }};
}

macro_rules! destroy_object {
    ($name:literal, $kind:literal, $handle:expr) => {{
        enter($name);
        with(|gpu| gpu.destroy($kind, $handle));
    }};
}

// ---------------------------------------------------------------------------
// Instance and physical device
// ---------------------------------------------------------------------------

unsafe extern "system" fn create_instance(
    _info: *const vk::InstanceCreateInfo,
    _allocator: *const vk::AllocationCallbacks,
    p_instance: *mut vk::Instance,
) -> vk::Result {
    create_object!("vkCreateInstance", "Instance", p_instance)
}

unsafe extern "system" fn destroy_instance(
    instance: vk::Instance,
    _allocator: *const vk::AllocationCallbacks,
) {
    destroy_object!("vkDestroyInstance", "Instance", instance)
}

unsafe extern "system" fn enumerate_physical_devices(
    instance: vk::Instance,
    p_count: *mut u32,
    p_devices: *mut vk::PhysicalDevice,
) -> vk::Result {
    if let Some(result) = enter("vkEnumeratePhysicalDevices") {
        return result;
    }
    // Instances of other test threads own no device here
    let Some(physical_device) = with(|gpu| {
        (gpu.live.get(&instance.as_raw()) == Some(&"Instance")).then_some(gpu.physical_device)
    }) else {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };
    enumerate(&[physical_device], p_count, p_devices)
}

unsafe extern "system" fn get_queue_family_properties(
    _physical_device: vk::PhysicalDevice,
    p_count: *mut u32,
    p_properties: *mut vk::QueueFamilyProperties,
) {
    enter("vkGetPhysicalDeviceQueueFamilyProperties");
    let families: Vec<vk::QueueFamilyProperties> = with(|gpu| {
        gpu.queue_families
            .iter()
            .map(|&flags| vk::QueueFamilyProperties {
                queue_flags: flags,
                queue_count: 1,
                ..Default::default()
            })
            .collect()
    });
    let _ = enumerate(&families, p_count, p_properties);
}

unsafe extern "system" fn get_features(
    _physical_device: vk::PhysicalDevice,
    p_features: *mut vk::PhysicalDeviceFeatures,
) {
    enter("vkGetPhysicalDeviceFeatures");
    let supported = with(|gpu| gpu.supports_anisotropy);
    *p_features = vk::PhysicalDeviceFeatures {
        sampler_anisotropy: supported.into(),
        ..Default::default()
    };
}

unsafe extern "system" fn get_memory_properties(
    _physical_device: vk::PhysicalDevice,
    p_properties: *mut vk::PhysicalDeviceMemoryProperties,
) {
    enter("vkGetPhysicalDeviceMemoryProperties");
    *p_properties = with(|gpu| gpu.memory_properties());
}

unsafe extern "system" fn get_properties(
    _physical_device: vk::PhysicalDevice,
    p_properties: *mut vk::PhysicalDeviceProperties,
) {
    enter("vkGetPhysicalDeviceProperties");
    let mut properties = vk::PhysicalDeviceProperties {
        api_version: vk::API_VERSION_1_0,
        device_type: vk::PhysicalDeviceType::VIRTUAL_GPU,
        ..Default::default()
    };
    properties.limits.max_sampler_anisotropy = with(|gpu| gpu.max_sampler_anisotropy);
    for (slot, byte) in properties.device_name.iter_mut().zip(b"Fake GPU\0") {
        *slot = *byte as c_char;
    }
    *p_properties = properties;
}

unsafe extern "system" fn destroy_surface(
    _instance: vk::Instance,
    surface: vk::SurfaceKHR,
    _allocator: *const vk::AllocationCallbacks,
) {
    destroy_object!("vkDestroySurfaceKHR", "SurfaceKHR", surface)
}

// ---------------------------------------------------------------------------
// Device and queues
// ---------------------------------------------------------------------------

unsafe extern "system" fn create_device(
    _physical_device: vk::PhysicalDevice,
    _info: *const vk::DeviceCreateInfo,
    _allocator: *const vk::AllocationCallbacks,
    p_device: *mut vk::Device,
) -> vk::Result {
    create_object!("vkCreateDevice", "Device", p_device)
}

unsafe extern "system" fn destroy_device(
    device: vk::Device,
    _allocator: *const vk::AllocationCallbacks,
) {
    destroy_object!("vkDestroyDevice", "Device", device)
}

unsafe extern "system" fn get_device_queue(
    device: vk::Device,
    family: u32,
    index: u32,
    p_queue: *mut vk::Queue,
) {
    enter("vkGetDeviceQueue");
    *p_queue = with(|gpu| {
        *gpu.queues
            .entry((device.as_raw(), family, index))
            .or_insert_with(|| vk::Queue::from_raw(next_raw()))
    });
}

unsafe extern "system" fn device_wait_idle(_device: vk::Device) -> vk::Result {
    enter("vkDeviceWaitIdle").unwrap_or(vk::Result::SUCCESS)
}

unsafe extern "system" fn queue_wait_idle(_queue: vk::Queue) -> vk::Result {
    if let Some(result) = enter("vkQueueWaitIdle") {
        return result;
    }
    with(|gpu| gpu.queue_waits += 1);
    vk::Result::SUCCESS
}

unsafe extern "system" fn queue_submit(
    _queue: vk::Queue,
    submit_count: u32,
    p_submits: *const vk::SubmitInfo,
    fence: vk::Fence,
) -> vk::Result {
    if let Some(result) = enter("vkQueueSubmit") {
        return result;
    }

    let submissions: Vec<Submission> = slice(p_submits, submit_count)
        .iter()
        .map(|submit| Submission {
            command_buffers: slice(submit.p_command_buffers, submit.command_buffer_count).to_vec(),
            wait_semaphores: slice(submit.p_wait_semaphores, submit.wait_semaphore_count).to_vec(),
            fence,
        })
        .collect();

    with(|gpu| {
        for submission in submissions {
            for &cmd in &submission.command_buffers {
                gpu.run_transfers(cmd);
            }
            gpu.submissions.push(submission);
        }
        if fence != vk::Fence::null() {
            gpu.fences.insert(fence, true);
        }
    });
    vk::Result::SUCCESS
}

// ---------------------------------------------------------------------------
// Command pools and buffers
// ---------------------------------------------------------------------------

unsafe extern "system" fn create_command_pool(
    _device: vk::Device,
    _info: *const vk::CommandPoolCreateInfo,
    _allocator: *const vk::AllocationCallbacks,
    p_pool: *mut vk::CommandPool,
) -> vk::Result {
    create_object!("vkCreateCommandPool", "CommandPool", p_pool)
}

unsafe extern "system" fn destroy_command_pool(
    _device: vk::Device,
    pool: vk::CommandPool,
    _allocator: *const vk::AllocationCallbacks,
) {
    enter("vkDestroyCommandPool");
    with(|gpu| {
        // Buffers still allocated from the pool go with it
        let orphans: Vec<vk::CommandBuffer> = gpu
            .pools
            .iter()
            .filter(|(_, owner)| **owner == pool)
            .map(|(&cmd, _)| cmd)
            .collect();
        for cmd in orphans {
            gpu.pools.remove(&cmd);
            gpu.live.remove(&cmd.as_raw());
        }
        gpu.destroy("CommandPool", pool);
    });
}

unsafe extern "system" fn allocate_command_buffers(
    _device: vk::Device,
    p_info: *const vk::CommandBufferAllocateInfo,
    p_buffers: *mut vk::CommandBuffer,
) -> vk::Result {
    if let Some(result) = enter("vkAllocateCommandBuffers") {
        return result;
    }
    let info = &*p_info;
    with(|gpu| {
        for i in 0..info.command_buffer_count as usize {
            let cmd: vk::CommandBuffer = gpu.create("CommandBuffer");
            gpu.pools.insert(cmd, info.command_pool);
            *p_buffers.add(i) = cmd;
        }
    });
    vk::Result::SUCCESS
}

unsafe extern "system" fn free_command_buffers(
    _device: vk::Device,
    _pool: vk::CommandPool,
    count: u32,
    p_buffers: *const vk::CommandBuffer,
) {
    enter("vkFreeCommandBuffers");
    let buffers = slice(p_buffers, count);
    with(|gpu| {
        for &cmd in buffers {
            gpu.pools.remove(&cmd);
            gpu.destroy("CommandBuffer", cmd);
        }
    });
}

unsafe extern "system" fn begin_command_buffer(
    cmd: vk::CommandBuffer,
    _info: *const vk::CommandBufferBeginInfo,
) -> vk::Result {
    if let Some(result) = enter("vkBeginCommandBuffer") {
        return result;
    }
    // Implicit reset
    with(|gpu| {
        gpu.commands.insert(cmd, Vec::new());
        gpu.transfers.remove(&cmd);
    });
    vk::Result::SUCCESS
}

unsafe extern "system" fn end_command_buffer(_cmd: vk::CommandBuffer) -> vk::Result {
    enter("vkEndCommandBuffer").unwrap_or(vk::Result::SUCCESS)
}

// ---------------------------------------------------------------------------
// Synchronization
// ---------------------------------------------------------------------------

unsafe extern "system" fn create_fence(
    _device: vk::Device,
    p_info: *const vk::FenceCreateInfo,
    _allocator: *const vk::AllocationCallbacks,
    p_fence: *mut vk::Fence,
) -> vk::Result {
    if let Some(result) = enter("vkCreateFence") {
        return result;
    }
    let signaled = (*p_info).flags.contains(vk::FenceCreateFlags::SIGNALED);
    with(|gpu| {
        let fence: vk::Fence = gpu.create("Fence");
        gpu.fences.insert(fence, signaled);
        *p_fence = fence;
    });
    vk::Result::SUCCESS
}

unsafe extern "system" fn destroy_fence(
    _device: vk::Device,
    fence: vk::Fence,
    _allocator: *const vk::AllocationCallbacks,
) {
    enter("vkDestroyFence");
    with(|gpu| {
        gpu.fences.remove(&fence);
        gpu.destroy("Fence", fence);
    });
}

unsafe extern "system" fn wait_for_fences(
    _device: vk::Device,
    count: u32,
    p_fences: *const vk::Fence,
    wait_all: vk::Bool32,
    _timeout: u64,
) -> vk::Result {
    if let Some(result) = enter("vkWaitForFences") {
        return result;
    }
    let fences = slice(p_fences, count);
    // Nothing ever completes later, so an unsignaled fence times out at once
    let done = with(|gpu| {
        let signaled = |fence: &vk::Fence| gpu.fences.get(fence).copied().unwrap_or(false);
        if wait_all == vk::TRUE {
            fences.iter().all(signaled)
        } else {
            fences.iter().any(signaled)
        }
    });
    if done {
        vk::Result::SUCCESS
    } else {
        vk::Result::TIMEOUT
    }
}

unsafe extern "system" fn reset_fences(
    _device: vk::Device,
    count: u32,
    p_fences: *const vk::Fence,
) -> vk::Result {
    if let Some(result) = enter("vkResetFences") {
        return result;
    }
    let fences = slice(p_fences, count);
    with(|gpu| {
        for fence in fences {
            gpu.fences.insert(*fence, false);
        }
    });
    vk::Result::SUCCESS
}

unsafe extern "system" fn create_semaphore(
    _device: vk::Device,
    _info: *const vk::SemaphoreCreateInfo,
    _allocator: *const vk::AllocationCallbacks,
    p_semaphore: *mut vk::Semaphore,
) -> vk::Result {
    create_object!("vkCreateSemaphore", "Semaphore", p_semaphore)
}

unsafe extern "system" fn destroy_semaphore(
    _device: vk::Device,
    semaphore: vk::Semaphore,
    _allocator: *const vk::AllocationCallbacks,
) {
    destroy_object!("vkDestroySemaphore", "Semaphore", semaphore)
}

// ---------------------------------------------------------------------------
// Memory, buffers and images
// ---------------------------------------------------------------------------

unsafe extern "system" fn create_image_view(
    _device: vk::Device,
    _info: *const vk::ImageViewCreateInfo,
    _allocator: *const vk::AllocationCallbacks,
    p_view: *mut vk::ImageView,
) -> vk::Result {
    create_object!("vkCreateImageView", "ImageView", p_view)
}

unsafe extern "system" fn destroy_image_view(
    _device: vk::Device,
    view: vk::ImageView,
    _allocator: *const vk::AllocationCallbacks,
) {
    destroy_object!("vkDestroyImageView", "ImageView", view)
}

unsafe extern "system" fn create_buffer(
    _device: vk::Device,
    p_info: *const vk::BufferCreateInfo,
    _allocator: *const vk::AllocationCallbacks,
    p_buffer: *mut vk::Buffer,
) -> vk::Result {
    if let Some(result) = enter("vkCreateBuffer") {
        return result;
    }
    let size = (*p_info).size;
    with(|gpu| {
        let buffer: vk::Buffer = gpu.create("Buffer");
        gpu.buffers.insert(buffer, Bound { size, memory: None });
        *p_buffer = buffer;
    });
    vk::Result::SUCCESS
}

unsafe extern "system" fn destroy_buffer(
    _device: vk::Device,
    buffer: vk::Buffer,
    _allocator: *const vk::AllocationCallbacks,
) {
    enter("vkDestroyBuffer");
    with(|gpu| {
        gpu.buffers.remove(&buffer);
        gpu.destroy("Buffer", buffer);
    });
}

unsafe extern "system" fn get_buffer_memory_requirements(
    _device: vk::Device,
    buffer: vk::Buffer,
    p_requirements: *mut vk::MemoryRequirements,
) {
    enter("vkGetBufferMemoryRequirements");
    *p_requirements = with(|gpu| vk::MemoryRequirements {
        size: gpu.buffers.get(&buffer).map_or(0, |bound| bound.size),
        alignment: 4,
        memory_type_bits: gpu.memory_type_bits(),
    });
}

unsafe extern "system" fn bind_buffer_memory(
    _device: vk::Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    _offset: vk::DeviceSize,
) -> vk::Result {
    if let Some(result) = enter("vkBindBufferMemory") {
        return result;
    }
    with(|gpu| {
        if let Some(bound) = gpu.buffers.get_mut(&buffer) {
            bound.memory = Some(memory);
        }
    });
    vk::Result::SUCCESS
}

unsafe extern "system" fn create_image(
    _device: vk::Device,
    p_info: *const vk::ImageCreateInfo,
    _allocator: *const vk::AllocationCallbacks,
    p_image: *mut vk::Image,
) -> vk::Result {
    if let Some(result) = enter("vkCreateImage") {
        return result;
    }
    let extent = (*p_info).extent;
    let size = extent.width as u64 * extent.height as u64 * 4;
    with(|gpu| {
        let image: vk::Image = gpu.create("Image");
        gpu.images.insert(image, Bound { size, memory: None });
        *p_image = image;
    });
    vk::Result::SUCCESS
}

unsafe extern "system" fn destroy_image(
    _device: vk::Device,
    image: vk::Image,
    _allocator: *const vk::AllocationCallbacks,
) {
    enter("vkDestroyImage");
    with(|gpu| {
        gpu.images.remove(&image);
        gpu.destroy("Image", image);
    });
}

unsafe extern "system" fn get_image_memory_requirements(
    _device: vk::Device,
    image: vk::Image,
    p_requirements: *mut vk::MemoryRequirements,
) {
    enter("vkGetImageMemoryRequirements");
    *p_requirements = with(|gpu| vk::MemoryRequirements {
        size: gpu.images.get(&image).map_or(0, |bound| bound.size),
        alignment: 4,
        memory_type_bits: gpu.memory_type_bits(),
    });
}

unsafe extern "system" fn bind_image_memory(
    _device: vk::Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
    _offset: vk::DeviceSize,
) -> vk::Result {
    if let Some(result) = enter("vkBindImageMemory") {
        return result;
    }
    with(|gpu| {
        if let Some(bound) = gpu.images.get_mut(&image) {
            bound.memory = Some(memory);
        }
    });
    vk::Result::SUCCESS
}

unsafe extern "system" fn allocate_memory(
    _device: vk::Device,
    p_info: *const vk::MemoryAllocateInfo,
    _allocator: *const vk::AllocationCallbacks,
    p_memory: *mut vk::DeviceMemory,
) -> vk::Result {
    if let Some(result) = enter("vkAllocateMemory") {
        return result;
    }
    let size = (*p_info).allocation_size as usize;
    with(|gpu| {
        let memory: vk::DeviceMemory = gpu.create("DeviceMemory");
        gpu.memory.insert(memory, vec![0; size]);
        *p_memory = memory;
    });
    vk::Result::SUCCESS
}

unsafe extern "system" fn free_memory(
    _device: vk::Device,
    memory: vk::DeviceMemory,
    _allocator: *const vk::AllocationCallbacks,
) {
    enter("vkFreeMemory");
    with(|gpu| {
        gpu.memory.remove(&memory);
        gpu.destroy("DeviceMemory", memory);
    });
}

unsafe extern "system" fn map_memory(
    _device: vk::Device,
    memory: vk::DeviceMemory,
    offset: vk::DeviceSize,
    _size: vk::DeviceSize,
    _flags: vk::MemoryMapFlags,
    pp_data: *mut *mut c_void,
) -> vk::Result {
    if let Some(result) = enter("vkMapMemory") {
        return result;
    }
    // The backing Vec never reallocates, so the pointer stays valid until free
    let ptr = with(|gpu| {
        gpu.memory
            .get_mut(&memory)
            .map(|bytes| bytes.as_mut_ptr().add(offset as usize) as *mut c_void)
    });
    match ptr {
        Some(ptr) => {
            *pp_data = ptr;
            vk::Result::SUCCESS
        }
        None => vk::Result::ERROR_MEMORY_MAP_FAILED,
    }
}

unsafe extern "system" fn unmap_memory(_device: vk::Device, _memory: vk::DeviceMemory) {
    enter("vkUnmapMemory");
}

// ---------------------------------------------------------------------------
// Pipeline objects
// ---------------------------------------------------------------------------

unsafe extern "system" fn create_shader_module(
    _device: vk::Device,
    _info: *const vk::ShaderModuleCreateInfo,
    _allocator: *const vk::AllocationCallbacks,
    p_module: *mut vk::ShaderModule,
) -> vk::Result {
    create_object!("vkCreateShaderModule", "ShaderModule", p_module)
}

unsafe extern "system" fn destroy_shader_module(
    _device: vk::Device,
    module: vk::ShaderModule,
    _allocator: *const vk::AllocationCallbacks,
) {
    destroy_object!("vkDestroyShaderModule", "ShaderModule", module)
}

unsafe extern "system" fn create_render_pass(
    _device: vk::Device,
    p_info: *const vk::RenderPassCreateInfo,
    _allocator: *const vk::AllocationCallbacks,
    p_render_pass: *mut vk::RenderPass,
) -> vk::Result {
    if let Some(result) = enter("vkCreateRenderPass") {
        return result;
    }
    let info = &*p_info;
    let attachment = slice(info.p_attachments, info.attachment_count)
        .first()
        .copied()
        .unwrap_or_default();
    with(|gpu| {
        let render_pass: vk::RenderPass = gpu.create("RenderPass");
        gpu.render_passes.insert(
            render_pass,
            RenderPassInfo {
                format: attachment.format,
                load_op: attachment.load_op,
                final_layout: attachment.final_layout,
            },
        );
        *p_render_pass = render_pass;
    });
    vk::Result::SUCCESS
}

unsafe extern "system" fn destroy_render_pass(
    _device: vk::Device,
    render_pass: vk::RenderPass,
    _allocator: *const vk::AllocationCallbacks,
) {
    destroy_object!("vkDestroyRenderPass", "RenderPass", render_pass)
}

unsafe extern "system" fn create_framebuffer(
    _device: vk::Device,
    p_info: *const vk::FramebufferCreateInfo,
    _allocator: *const vk::AllocationCallbacks,
    p_framebuffer: *mut vk::Framebuffer,
) -> vk::Result {
    if let Some(result) = enter("vkCreateFramebuffer") {
        return result;
    }
    let info = &*p_info;
    let record = FramebufferInfo {
        width: info.width,
        height: info.height,
        attachments: slice(info.p_attachments, info.attachment_count).to_vec(),
    };
    with(|gpu| {
        let framebuffer: vk::Framebuffer = gpu.create("Framebuffer");
        gpu.framebuffers.insert(framebuffer, record);
        *p_framebuffer = framebuffer;
    });
    vk::Result::SUCCESS
}

unsafe extern "system" fn destroy_framebuffer(
    _device: vk::Device,
    framebuffer: vk::Framebuffer,
    _allocator: *const vk::AllocationCallbacks,
) {
    destroy_object!("vkDestroyFramebuffer", "Framebuffer", framebuffer)
}

unsafe extern "system" fn create_descriptor_set_layout(
    _device: vk::Device,
    p_info: *const vk::DescriptorSetLayoutCreateInfo,
    _allocator: *const vk::AllocationCallbacks,
    p_layout: *mut vk::DescriptorSetLayout,
) -> vk::Result {
    if let Some(result) = enter("vkCreateDescriptorSetLayout") {
        return result;
    }
    let info = &*p_info;
    let bindings: Vec<u32> = slice(info.p_bindings, info.binding_count)
        .iter()
        .map(|binding| binding.binding)
        .collect();
    with(|gpu| {
        gpu.descriptor_bindings.extend(bindings);
        *p_layout = gpu.create("DescriptorSetLayout");
    });
    vk::Result::SUCCESS
}

unsafe extern "system" fn destroy_descriptor_set_layout(
    _device: vk::Device,
    layout: vk::DescriptorSetLayout,
    _allocator: *const vk::AllocationCallbacks,
) {
    destroy_object!("vkDestroyDescriptorSetLayout", "DescriptorSetLayout", layout)
}

unsafe extern "system" fn create_descriptor_pool(
    _device: vk::Device,
    _info: *const vk::DescriptorPoolCreateInfo,
    _allocator: *const vk::AllocationCallbacks,
    p_pool: *mut vk::DescriptorPool,
) -> vk::Result {
    create_object!("vkCreateDescriptorPool", "DescriptorPool", p_pool)
}

unsafe extern "system" fn destroy_descriptor_pool(
    _device: vk::Device,
    pool: vk::DescriptorPool,
    _allocator: *const vk::AllocationCallbacks,
) {
    destroy_object!("vkDestroyDescriptorPool", "DescriptorPool", pool)
}

unsafe extern "system" fn allocate_descriptor_sets(
    _device: vk::Device,
    p_info: *const vk::DescriptorSetAllocateInfo,
    p_sets: *mut vk::DescriptorSet,
) -> vk::Result {
    if let Some(result) = enter("vkAllocateDescriptorSets") {
        return result;
    }
    // Sets are owned by their pool and not tracked on their own
    for i in 0..(*p_info).descriptor_set_count as usize {
        *p_sets.add(i) = vk::DescriptorSet::from_raw(next_raw());
    }
    vk::Result::SUCCESS
}

unsafe extern "system" fn update_descriptor_sets(
    _device: vk::Device,
    _write_count: u32,
    _p_writes: *const vk::WriteDescriptorSet,
    _copy_count: u32,
    _p_copies: *const vk::CopyDescriptorSet,
) {
    enter("vkUpdateDescriptorSets");
}

unsafe extern "system" fn create_pipeline_layout(
    _device: vk::Device,
    _info: *const vk::PipelineLayoutCreateInfo,
    _allocator: *const vk::AllocationCallbacks,
    p_layout: *mut vk::PipelineLayout,
) -> vk::Result {
    create_object!("vkCreatePipelineLayout", "PipelineLayout", p_layout)
}

unsafe extern "system" fn destroy_pipeline_layout(
    _device: vk::Device,
    layout: vk::PipelineLayout,
    _allocator: *const vk::AllocationCallbacks,
) {
    destroy_object!("vkDestroyPipelineLayout", "PipelineLayout", layout)
}

unsafe extern "system" fn create_graphics_pipelines(
    _device: vk::Device,
    _cache: vk::PipelineCache,
    count: u32,
    _p_infos: *const vk::GraphicsPipelineCreateInfo,
    _allocator: *const vk::AllocationCallbacks,
    p_pipelines: *mut vk::Pipeline,
) -> vk::Result {
    if let Some(result) = enter("vkCreateGraphicsPipelines") {
        return result;
    }
    with(|gpu| {
        for i in 0..count as usize {
            *p_pipelines.add(i) = gpu.create("Pipeline");
        }
    });
    vk::Result::SUCCESS
}

unsafe extern "system" fn destroy_pipeline(
    _device: vk::Device,
    pipeline: vk::Pipeline,
    _allocator: *const vk::AllocationCallbacks,
) {
    destroy_object!("vkDestroyPipeline", "Pipeline", pipeline)
}

unsafe extern "system" fn create_sampler(
    _device: vk::Device,
    p_info: *const vk::SamplerCreateInfo,
    _allocator: *const vk::AllocationCallbacks,
    p_sampler: *mut vk::Sampler,
) -> vk::Result {
    if let Some(result) = enter("vkCreateSampler") {
        return result;
    }
    let info = &*p_info;
    let anisotropy = (info.anisotropy_enable == vk::TRUE).then_some(info.max_anisotropy);
    with(|gpu| {
        gpu.sampler_anisotropy.push(anisotropy);
        *p_sampler = gpu.create("Sampler");
    });
    vk::Result::SUCCESS
}

unsafe extern "system" fn destroy_sampler(
    _device: vk::Device,
    sampler: vk::Sampler,
    _allocator: *const vk::AllocationCallbacks,
) {
    destroy_object!("vkDestroySampler", "Sampler", sampler)
}

// ---------------------------------------------------------------------------
// Command recording
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
unsafe extern "system" fn cmd_pipeline_barrier(
    cmd: vk::CommandBuffer,
    _src_stage: vk::PipelineStageFlags,
    _dst_stage: vk::PipelineStageFlags,
    _dependency: vk::DependencyFlags,
    _memory_count: u32,
    _p_memory: *const vk::MemoryBarrier,
    _buffer_count: u32,
    _p_buffer: *const vk::BufferMemoryBarrier,
    _image_count: u32,
    _p_image: *const vk::ImageMemoryBarrier,
) {
    enter("vkCmdPipelineBarrier");
    with(|gpu| gpu.record(cmd, Command::PipelineBarrier));
}

unsafe extern "system" fn cmd_copy_buffer(
    cmd: vk::CommandBuffer,
    src: vk::Buffer,
    dst: vk::Buffer,
    region_count: u32,
    p_regions: *const vk::BufferCopy,
) {
    enter("vkCmdCopyBuffer");
    let size = slice(p_regions, region_count).iter().map(|r| r.size).sum();
    with(|gpu| {
        gpu.record(cmd, Command::CopyBuffer);
        gpu.transfers
            .entry(cmd)
            .or_default()
            .push(Transfer::Buffer { src, dst, size });
    });
}

unsafe extern "system" fn cmd_copy_buffer_to_image(
    cmd: vk::CommandBuffer,
    buffer: vk::Buffer,
    image: vk::Image,
    _layout: vk::ImageLayout,
    _region_count: u32,
    _p_regions: *const vk::BufferImageCopy,
) {
    enter("vkCmdCopyBufferToImage");
    with(|gpu| {
        gpu.record(cmd, Command::CopyBufferToImage);
        gpu.transfers
            .entry(cmd)
            .or_default()
            .push(Transfer::BufferToImage { buffer, image });
    });
}

unsafe extern "system" fn cmd_copy_image_to_buffer(
    cmd: vk::CommandBuffer,
    image: vk::Image,
    _layout: vk::ImageLayout,
    buffer: vk::Buffer,
    _region_count: u32,
    _p_regions: *const vk::BufferImageCopy,
) {
    enter("vkCmdCopyImageToBuffer");
    with(|gpu| {
        gpu.record(cmd, Command::CopyImageToBuffer);
        gpu.transfers
            .entry(cmd)
            .or_default()
            .push(Transfer::ImageToBuffer { image, buffer });
    });
}

unsafe extern "system" fn cmd_begin_render_pass(
    cmd: vk::CommandBuffer,
    p_info: *const vk::RenderPassBeginInfo,
    _contents: vk::SubpassContents,
) {
    enter("vkCmdBeginRenderPass");
    let info = &*p_info;
    with(|gpu| {
        gpu.record(
            cmd,
            Command::BeginRenderPass {
                framebuffer: info.framebuffer,
                extent: info.render_area.extent,
            },
        )
    });
}

unsafe extern "system" fn cmd_end_render_pass(cmd: vk::CommandBuffer) {
    enter("vkCmdEndRenderPass");
    with(|gpu| gpu.record(cmd, Command::EndRenderPass));
}

unsafe extern "system" fn cmd_bind_pipeline(
    cmd: vk::CommandBuffer,
    _bind_point: vk::PipelineBindPoint,
    pipeline: vk::Pipeline,
) {
    enter("vkCmdBindPipeline");
    with(|gpu| gpu.record(cmd, Command::BindPipeline(pipeline)));
}

#[allow(clippy::too_many_arguments)]
unsafe extern "system" fn cmd_bind_descriptor_sets(
    cmd: vk::CommandBuffer,
    _bind_point: vk::PipelineBindPoint,
    _layout: vk::PipelineLayout,
    _first_set: u32,
    set_count: u32,
    p_sets: *const vk::DescriptorSet,
    _dynamic_offset_count: u32,
    _p_dynamic_offsets: *const u32,
) {
    enter("vkCmdBindDescriptorSets");
    let sets = slice(p_sets, set_count).to_vec();
    with(|gpu| {
        for set in sets {
            gpu.record(cmd, Command::BindDescriptorSets(set));
        }
    });
}

unsafe extern "system" fn cmd_set_viewport(
    cmd: vk::CommandBuffer,
    _first: u32,
    count: u32,
    p_viewports: *const vk::Viewport,
) {
    enter("vkCmdSetViewport");
    let viewports = slice(p_viewports, count).to_vec();
    with(|gpu| {
        for viewport in viewports {
            gpu.record(
                cmd,
                Command::SetViewport {
                    width: viewport.width,
                    height: viewport.height,
                },
            );
        }
    });
}

unsafe extern "system" fn cmd_set_scissor(
    cmd: vk::CommandBuffer,
    _first: u32,
    count: u32,
    p_scissors: *const vk::Rect2D,
) {
    enter("vkCmdSetScissor");
    let scissors = slice(p_scissors, count).to_vec();
    with(|gpu| {
        for scissor in scissors {
            gpu.record(
                cmd,
                Command::SetScissor {
                    width: scissor.extent.width,
                    height: scissor.extent.height,
                },
            );
        }
    });
}

unsafe extern "system" fn cmd_draw(
    cmd: vk::CommandBuffer,
    vertex_count: u32,
    instance_count: u32,
    _first_vertex: u32,
    _first_instance: u32,
) {
    enter("vkCmdDraw");
    with(|gpu| {
        gpu.record(
            cmd,
            Command::Draw {
                vertex_count,
                instance_count,
            },
        )
    });
}

// ---------------------------------------------------------------------------
// Swapchain
// ---------------------------------------------------------------------------

unsafe extern "system" fn create_swapchain(
    _device: vk::Device,
    _info: *const vk::SwapchainCreateInfoKHR,
    _allocator: *const vk::AllocationCallbacks,
    p_swapchain: *mut vk::SwapchainKHR,
) -> vk::Result {
    if let Some(result) = enter("vkCreateSwapchainKHR") {
        return result;
    }
    with(|gpu| {
        let swapchain: vk::SwapchainKHR = gpu.create("SwapchainKHR");
        // Presentable images belong to the swapchain and are not tracked
        let images = (0..gpu.swapchain_image_count)
            .map(|_| vk::Image::from_raw(next_raw()))
            .collect();
        gpu.swapchains.insert(swapchain, images);
        *p_swapchain = swapchain;
    });
    vk::Result::SUCCESS
}

unsafe extern "system" fn destroy_swapchain(
    _device: vk::Device,
    swapchain: vk::SwapchainKHR,
    _allocator: *const vk::AllocationCallbacks,
) {
    enter("vkDestroySwapchainKHR");
    with(|gpu| {
        gpu.swapchains.remove(&swapchain);
        gpu.destroy("SwapchainKHR", swapchain);
    });
}

unsafe extern "system" fn get_swapchain_images(
    _device: vk::Device,
    swapchain: vk::SwapchainKHR,
    p_count: *mut u32,
    p_images: *mut vk::Image,
) -> vk::Result {
    if let Some(result) = enter("vkGetSwapchainImagesKHR") {
        return result;
    }
    let images = with(|gpu| gpu.swapchains.get(&swapchain).cloned().unwrap_or_default());
    enumerate(&images, p_count, p_images)
}

unsafe extern "system" fn acquire_next_image(
    _device: vk::Device,
    _swapchain: vk::SwapchainKHR,
    _timeout: u64,
    _semaphore: vk::Semaphore,
    _fence: vk::Fence,
    p_index: *mut u32,
) -> vk::Result {
    if let Some(result) = enter("vkAcquireNextImageKHR") {
        return result;
    }
    let (index, result) = with(|gpu| (gpu.acquire_index, gpu.acquire_result));
    if matches!(result, vk::Result::SUCCESS | vk::Result::SUBOPTIMAL_KHR) {
        *p_index = index;
    }
    result
}

unsafe extern "system" fn queue_present(
    _queue: vk::Queue,
    p_info: *const vk::PresentInfoKHR,
) -> vk::Result {
    if let Some(result) = enter("vkQueuePresentKHR") {
        return result;
    }
    let info = &*p_info;
    let swapchains = slice(info.p_swapchains, info.swapchain_count);
    let indices = slice(info.p_image_indices, info.swapchain_count);
    with(|gpu| {
        gpu.presents
            .extend(swapchains.iter().copied().zip(indices.iter().copied()));
        gpu.present_result
    })
}
