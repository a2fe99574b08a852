// Device Context - Core GPU interface
//
// Responsibilities:
// - Self-created mode: instance, surface, physical device + graphics queue
//   family selection, logical device
// - Adopted mode: wrap a device the host application already created
// - Command pool + one scratch command buffer for blocking uploads
// - Back-reference to the swapchain resource set currently in use

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::{vk, Entry};
use parking_lot::Mutex;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::{CStr, CString};
use std::sync::Arc;

use super::swapchain::SwapchainId;
use super::{scope::Rollback, Ownership};
use crate::error::{OverlayError, VkResultExt};

/// Upper bound for the overlay sampler's anisotropy
const MAX_ANISOTROPY: f32 = 16.0;

struct Surface {
    loader: khr::Surface,
    surface: vk::SurfaceKHR,
}

/// Vulkan device wrapper with automatic cleanup
pub struct DeviceContext {
    device: ash::Device,
    instance: ash::Instance,
    swapchain_fn: khr::Swapchain,
    surface: Option<Surface>,
    _entry: Option<Entry>,
    ownership: Ownership,

    physical_device: vk::PhysicalDevice,
    queue_family_index: u32,
    queue: vk::Queue,

    command_pool: vk::CommandPool,
    /// Single-use buffer for blocking uploads; the lock serializes its users
    scratch: Mutex<vk::CommandBuffer>,

    // Cached at construction
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    limits: vk::PhysicalDeviceLimits,
    enabled_features: vk::PhysicalDeviceFeatures,

    current_swapchain: Mutex<Option<SwapchainId>>,
}

impl DeviceContext {
    /// Create the whole device stack for a window.
    ///
    /// # Arguments
    /// * `app_name` - Application name for debugging
    /// * `display` / `window` - Raw handles of the window to present to
    pub fn from_window(
        app_name: &str,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> Result<Arc<Self>> {
        log::info!("Creating device context for window: {}", app_name);

        // Step 1: Load Vulkan library
        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        // Step 2: Create instance with the window-system surface extensions
        let app_name_cstr = CString::new(app_name)?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_0);

        let extensions = ash_window::enumerate_required_extensions(display)
            .context("Failed to query surface extensions")?;

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(extensions);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        // Step 3: Create surface
        let surface = match unsafe { ash_window::create_surface(&entry, &instance, display, window, None) } {
            Ok(surface) => surface,
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(OverlayError::ResourceCreation {
                    operation: "vkCreateSurfaceKHR",
                    result: e,
                })
                .context("Failed to create window surface");
            }
        };

        Self::from_instance(entry, instance, Some(surface))
    }

    /// Build a self-created context on top of an instance this context now owns.
    ///
    /// The first enumerated physical device is used with its first queue family
    /// that advertises graphics. If anything fails the instance and surface are
    /// released before returning.
    pub fn from_instance(
        entry: Entry,
        instance: ash::Instance,
        surface: Option<vk::SurfaceKHR>,
    ) -> Result<Arc<Self>> {
        let surface = surface.map(|surface| Surface {
            loader: khr::Surface::new(&entry, &instance),
            surface,
        });

        match Self::create_device(&instance) {
            Ok((device, physical_device, queue_family_index, enabled_features)) => {
                Self::build(
                    Some(entry),
                    instance,
                    device,
                    surface,
                    physical_device,
                    queue_family_index,
                    enabled_features,
                    Ownership::Owned,
                )
            }
            Err(e) => {
                unsafe {
                    if let Some(surface) = surface {
                        surface.loader.destroy_surface(surface.surface, None);
                    }
                    instance.destroy_instance(None);
                }
                Err(e)
            }
        }
    }

    /// Adopt a device created by the host. Only the command pool and the
    /// scratch buffer are created here; the device itself is never destroyed.
    pub fn from_existing(
        instance: ash::Instance,
        device: ash::Device,
        physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
        enabled_features: vk::PhysicalDeviceFeatures,
    ) -> Result<Arc<Self>> {
        log::info!(
            "Adopting device {:?} (queue family {})",
            device.handle(),
            queue_family_index
        );

        Self::build(
            None,
            instance,
            device,
            None,
            physical_device,
            queue_family_index,
            enabled_features,
            Ownership::Borrowed,
        )
    }

    fn create_device(
        instance: &ash::Instance,
    ) -> Result<(ash::Device, vk::PhysicalDevice, u32, vk::PhysicalDeviceFeatures)> {
        let physical_devices = unsafe { instance.enumerate_physical_devices() }
            .context("Failed to enumerate physical devices")?;

        let physical_device = *physical_devices
            .first()
            .context("No Vulkan-capable GPU found")?;

        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
        let queue_family_index = graphics_queue_family(&queue_families)?;

        let supported = unsafe { instance.get_physical_device_features(physical_device) };
        let enabled_features = vk::PhysicalDeviceFeatures {
            sampler_anisotropy: supported.sampler_anisotropy,
            ..Default::default()
        };

        let queue_priorities = [1.0];
        let queue_create_info = vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(queue_family_index)
            .queue_priorities(&queue_priorities)
            .build();

        let extensions = [khr::Swapchain::name().as_ptr()];

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .enabled_extension_names(&extensions)
            .enabled_features(&enabled_features);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .resource("vkCreateDevice")
            .context("Failed to create logical device")?;

        Ok((device, physical_device, queue_family_index, enabled_features))
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        entry: Option<Entry>,
        instance: ash::Instance,
        device: ash::Device,
        surface: Option<Surface>,
        physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
        enabled_features: vk::PhysicalDeviceFeatures,
        ownership: Ownership,
    ) -> Result<Arc<Self>> {
        let queue = unsafe { device.get_device_queue(queue_family_index, 0) };

        let (command_pool, scratch) = match Self::create_command_pool(&device, queue_family_index)
        {
            Ok(pool) => pool,
            Err(e) => {
                if ownership == Ownership::Owned {
                    unsafe {
                        device.destroy_device(None);
                        if let Some(surface) = &surface {
                            surface.loader.destroy_surface(surface.surface, None);
                        }
                        instance.destroy_instance(None);
                    }
                }
                return Err(e);
            }
        };

        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };

        log::info!(
            "Device context ready: {} ({:?})",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy(),
            ownership
        );

        Ok(Arc::new(Self {
            swapchain_fn: khr::Swapchain::new(&instance, &device),
            device,
            instance,
            surface,
            _entry: entry,
            ownership,
            physical_device,
            queue_family_index,
            queue,
            command_pool,
            scratch: Mutex::new(scratch),
            memory_properties,
            limits: properties.limits,
            enabled_features,
            current_swapchain: Mutex::new(None),
        }))
    }

    fn create_command_pool(
        device: &ash::Device,
        queue_family_index: u32,
    ) -> Result<(vk::CommandPool, vk::CommandBuffer)> {
        let mut scope = Rollback::new(device);

        // RESET: per-image command buffers are re-recorded every frame
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let command_pool = scope.guard(
            unsafe { device.create_command_pool(&pool_info, None) }
                .resource("vkCreateCommandPool")?,
        );

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let scratch = unsafe { device.allocate_command_buffers(&alloc_info) }
            .resource("vkAllocateCommandBuffers")
            .context("Failed to allocate scratch command buffer")?[0];

        scope.commit();
        Ok((command_pool, scratch))
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn swapchain_fn(&self) -> &khr::Swapchain {
        &self.swapchain_fn
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    pub fn command_pool(&self) -> vk::CommandPool {
        self.command_pool
    }

    pub fn surface(&self) -> Option<vk::SurfaceKHR> {
        self.surface.as_ref().map(|s| s.surface)
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    /// Anisotropy the overlay sampler may use, `None` when the feature is off.
    pub fn sampler_anisotropy(&self) -> Option<f32> {
        (self.enabled_features.sampler_anisotropy == vk::TRUE)
            .then(|| self.limits.max_sampler_anisotropy.min(MAX_ANISOTROPY))
    }

    pub fn current_swapchain(&self) -> Option<SwapchainId> {
        *self.current_swapchain.lock()
    }

    pub fn set_current_swapchain(&self, id: SwapchainId) {
        *self.current_swapchain.lock() = Some(id);
    }

    /// Clear the back-reference, but only if it still points at `id`.
    pub fn clear_current_swapchain(&self, id: SwapchainId) {
        let mut current = self.current_swapchain.lock();
        if *current == Some(id) {
            *current = None;
        }
    }

    /// Record into the scratch command buffer, submit it and block until the
    /// queue is idle.
    pub fn submit_scratch<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let scratch = self.scratch.lock();
        let cmd = *scratch;

        unsafe {
            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.device
                .begin_command_buffer(cmd, &begin_info)
                .context("Failed to begin scratch command buffer")?;

            record(&self.device, cmd);

            self.device
                .end_command_buffer(cmd)
                .context("Failed to end scratch command buffer")?;

            let command_buffers = [cmd];
            let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
            self.device
                .queue_submit(self.queue, &[submit_info.build()], vk::Fence::null())
                .context("Failed to submit scratch command buffer")?;
            self.device
                .queue_wait_idle(self.queue)
                .context("Failed waiting for scratch submission")?;
        }

        Ok(())
    }

    /// Wait for device to be idle
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.context("Failed waiting for device idle")?;
        Ok(())
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        log::info!("Destroying device context ({:?})", self.ownership);

        let _ = self.wait_idle();

        unsafe {
            // Frees the scratch buffer with it
            self.device.destroy_command_pool(self.command_pool, None);

            if self.ownership == Ownership::Owned {
                self.device.destroy_device(None);
                if let Some(surface) = self.surface.take() {
                    surface.loader.destroy_surface(surface.surface, None);
                }
                self.instance.destroy_instance(None);
            }
        }
    }
}

/// Index of the first queue family with graphics capability.
pub fn graphics_queue_family(families: &[vk::QueueFamilyProperties]) -> Result<u32> {
    families
        .iter()
        .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|index| index as u32)
        .ok_or_else(|| OverlayError::NoGraphicsQueue.into())
}
