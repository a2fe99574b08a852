// Runtime interposition
//
// `install` hands the host an `ash::Instance` whose function table was
// resolved through our `vkGetInstanceProcAddr`. Everything the host loads from
// it (devices, swapchain functions) goes through our resolvers, which return
// the hooks below for the six intercepted entry points and forward everything
// else to the next implementation.
//
// Overlay code itself only ever calls the next-level tables stored in the
// registries, never the hooked ones.

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;
use std::ffi::{c_char, CStr};
use std::sync::Arc;

use super::overlay::OverlayHook;
use super::registry::Registry;
use crate::assets::OverlayAssets;
use crate::config::Config;
use crate::logging;

macro_rules! name {
    ($s:literal) => {{
        const NAME: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(concat!($s, "\0").as_bytes()) };
        NAME
    }};
}

#[derive(Clone)]
struct InstanceRecord {
    next: ash::Instance,
    next_get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr,
    assets: Arc<OverlayAssets>,
    config: Arc<Config>,
}

struct DeviceRecord {
    next: ash::Device,
    swapchain_fn: khr::Swapchain,
    next_get_device_proc_addr: vk::PFN_vkGetDeviceProcAddr,
    /// `None` once the overlay was disabled for this device
    hook: Option<OverlayHook>,
}

static INSTANCES: Registry<InstanceRecord> = Registry::new();
static DEVICES: Registry<DeviceRecord> = Registry::new();
/// Queue -> owning device, for present
static QUEUES: Registry<vk::Device> = Registry::new();

/// Load the configured assets and hook `instance`.
///
/// Returns the table the host must use from now on; devices created through
/// it carry the overlay.
pub fn install(entry: &ash::Entry, instance: vk::Instance, config: &Config) -> Result<ash::Instance> {
    logging::init(config);

    let assets = OverlayAssets::load(config).context("Failed to load overlay assets")?;
    Ok(install_with_assets(entry, instance, config, assets))
}

/// Hook `instance` with assets that are already in memory.
pub fn install_with_assets(
    entry: &ash::Entry,
    instance: vk::Instance,
    config: &Config,
    assets: OverlayAssets,
) -> ash::Instance {
    let next_get_instance_proc_addr = entry.static_fn().get_instance_proc_addr;
    let next = unsafe { ash::Instance::load(entry.static_fn(), instance) };

    INSTANCES.insert(
        instance,
        InstanceRecord {
            next,
            next_get_instance_proc_addr,
            assets: Arc::new(assets),
            config: Arc::new(config.clone()),
        },
    );
    log::info!("Overlay installed on instance {:?}", instance);

    let hooked = vk::StaticFn {
        get_instance_proc_addr,
    };
    unsafe { ash::Instance::load(&hooked, instance) }
}

/// Forget `instance`. Devices already created keep their overlay until they
/// are destroyed. Returns whether the instance was hooked.
pub fn uninstall(instance: vk::Instance) -> bool {
    let removed = INSTANCES.remove(instance).is_some();
    if removed {
        log::info!("Overlay uninstalled from instance {:?}", instance);
    }
    removed
}

/// Inspect the overlay state of `device`, if it has any.
pub fn with_device<R>(device: vk::Device, f: impl FnOnce(&OverlayHook) -> R) -> Option<R> {
    DEVICES
        .with(device, |record| record.hook.as_ref().map(f))
        .flatten()
}

/// Whether `device` was created through a hooked instance, with or without a
/// working overlay.
pub fn is_tracked(device: vk::Device) -> bool {
    DEVICES.contains(device)
}

/// Run `f` on the device's overlay. A failure disables the overlay for that
/// device; the host never sees it.
fn with_hook<R>(
    device: vk::Device,
    event: &str,
    f: impl FnOnce(&mut OverlayHook) -> Result<R>,
) -> Option<R> {
    DEVICES
        .with(device, |record| {
            let hook = record.hook.as_mut()?;
            match f(hook) {
                Ok(value) => Some(value),
                Err(e) => {
                    log::error!(
                        "Overlay disabled on device {:?} after failed {}: {:#}",
                        device,
                        event,
                        e
                    );
                    record.hook = None;
                    None
                }
            }
        })
        .flatten()
}

unsafe fn erase(f: *const ()) -> vk::PFN_vkVoidFunction {
    Some(std::mem::transmute::<*const (), unsafe extern "system" fn()>(f))
}

/// Hook for `name`, if it is one we intercept.
unsafe fn hooked(name: &CStr, device_level: bool) -> vk::PFN_vkVoidFunction {
    let f = match name.to_bytes() {
        b"vkGetDeviceProcAddr" => get_device_proc_addr as *const (),
        b"vkDestroyDevice" => destroy_device as *const (),
        b"vkCreateSwapchainKHR" => create_swapchain as *const (),
        b"vkDestroySwapchainKHR" => destroy_swapchain as *const (),
        b"vkAcquireNextImageKHR" => acquire_next_image as *const (),
        b"vkQueuePresentKHR" => queue_present as *const (),
        b"vkGetInstanceProcAddr" if !device_level => get_instance_proc_addr as *const (),
        b"vkCreateDevice" if !device_level => create_device as *const (),
        _ => return None,
    };
    erase(f)
}

/// Next-level device function, from the device's own record or, for devices
/// created behind our back, from any hooked instance.
unsafe fn next_fn<F: Copy>(
    device: vk::Device,
    name: &CStr,
    known: impl FnOnce(&DeviceRecord) -> F,
) -> Option<F> {
    if let Some(f) = DEVICES.with(device, |record| known(record)) {
        return Some(f);
    }

    let get_device_proc_addr =
        INSTANCES.find_map(|record| Some(record.next.fp_v1_0().get_device_proc_addr))?;
    let f = get_device_proc_addr(device, name.as_ptr())?;
    Some(std::mem::transmute_copy::<unsafe extern "system" fn(), F>(&f))
}

unsafe fn slice_or_empty<'a, T>(ptr: *const T, len: u32) -> &'a [T] {
    if ptr.is_null() || len == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(ptr, len as usize)
    }
}

// ---------------------------------------------------------------------------
// Resolvers
// ---------------------------------------------------------------------------

unsafe extern "system" fn get_instance_proc_addr(
    instance: vk::Instance,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    let name = CStr::from_ptr(p_name);
    if let Some(hook) = hooked(name, false) {
        return Some(hook);
    }

    let next = INSTANCES
        .with(instance, |record| record.next_get_instance_proc_addr)
        .or_else(|| INSTANCES.find_map(|record| Some(record.next_get_instance_proc_addr)))?;
    next(instance, p_name)
}

unsafe extern "system" fn get_device_proc_addr(
    device: vk::Device,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    let name = CStr::from_ptr(p_name);

    match DEVICES.with(device, |record| record.next_get_device_proc_addr) {
        Some(next) => match hooked(name, true) {
            Some(hook) => Some(hook),
            None => next(device, p_name),
        },
        None => {
            let next = INSTANCES
                .find_map(|record| Some(record.next.fp_v1_0().get_device_proc_addr))?;
            next(device, p_name)
        }
    }
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

unsafe extern "system" fn create_device(
    physical_device: vk::PhysicalDevice,
    p_create_info: *const vk::DeviceCreateInfo,
    p_allocator: *const vk::AllocationCallbacks,
    p_device: *mut vk::Device,
) -> vk::Result {
    let Some(record) = INSTANCES.find_map(|record| {
        let devices = record.next.enumerate_physical_devices().ok()?;
        devices.contains(&physical_device).then(|| record.clone())
    }) else {
        log::error!(
            "vkCreateDevice on {:?}, which no hooked instance owns",
            physical_device
        );
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };

    let result = (record.next.fp_v1_0().create_device)(
        physical_device,
        p_create_info,
        p_allocator,
        p_device,
    );
    if result != vk::Result::SUCCESS {
        return result;
    }

    let handle = *p_device;
    let create_info = &*p_create_info;
    let device = ash::Device::load(record.next.fp_v1_0(), handle);

    for queue_info in slice_or_empty(
        create_info.p_queue_create_infos,
        create_info.queue_create_info_count,
    ) {
        for queue_index in 0..queue_info.queue_count {
            let queue = device.get_device_queue(queue_info.queue_family_index, queue_index);
            QUEUES.insert(queue, handle);
        }
    }

    let hook = match OverlayHook::new(
        record.next.clone(),
        device.clone(),
        physical_device,
        create_info,
        &record.assets,
        &record.config,
    ) {
        Ok(hook) => Some(hook),
        Err(e) => {
            log::error!("Overlay disabled on device {:?}: {:#}", handle, e);
            None
        }
    };

    DEVICES.insert(
        handle,
        DeviceRecord {
            swapchain_fn: khr::Swapchain::new(&record.next, &device),
            next_get_device_proc_addr: record.next.fp_v1_0().get_device_proc_addr,
            next: device,
            hook,
        },
    );

    result
}

unsafe extern "system" fn destroy_device(
    device: vk::Device,
    p_allocator: *const vk::AllocationCallbacks,
) {
    QUEUES.remove_where(|&owner| owner == device);

    match DEVICES.remove(device) {
        Some(mut record) => {
            log::info!("Device {:?} destroyed by the host", device);
            // Overlay objects go before the device does
            drop(record.hook.take());
            (record.next.fp_v1_0().destroy_device)(device, p_allocator);
        }
        None => {
            let next = next_fn(device, name!("vkDestroyDevice"), |record| {
                record.next.fp_v1_0().destroy_device
            });
            if let Some(next) = next {
                next(device, p_allocator);
            }
        }
    }
}

unsafe extern "system" fn create_swapchain(
    device: vk::Device,
    p_create_info: *const vk::SwapchainCreateInfoKHR,
    p_allocator: *const vk::AllocationCallbacks,
    p_swapchain: *mut vk::SwapchainKHR,
) -> vk::Result {
    let Some(next) = next_fn(device, name!("vkCreateSwapchainKHR"), |record| {
        record.swapchain_fn.fp().create_swapchain_khr
    }) else {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };

    let result = next(device, p_create_info, p_allocator, p_swapchain);
    if result == vk::Result::SUCCESS {
        let swapchain = *p_swapchain;
        let create_info = &*p_create_info;
        log::info!(
            "Swapchain {:?} created: {}x{} {:?}",
            swapchain,
            create_info.image_extent.width,
            create_info.image_extent.height,
            create_info.image_format
        );
        with_hook(device, "swapchain creation", |hook| {
            hook.on_create_swapchain(swapchain, create_info)
        });
    }

    result
}

unsafe extern "system" fn destroy_swapchain(
    device: vk::Device,
    swapchain: vk::SwapchainKHR,
    p_allocator: *const vk::AllocationCallbacks,
) {
    with_hook(device, "swapchain destruction", |hook| {
        hook.on_destroy_swapchain(swapchain);
        Ok(())
    });

    let next = next_fn(device, name!("vkDestroySwapchainKHR"), |record| {
        record.swapchain_fn.fp().destroy_swapchain_khr
    });
    if let Some(next) = next {
        next(device, swapchain, p_allocator);
    }
}

unsafe extern "system" fn acquire_next_image(
    device: vk::Device,
    swapchain: vk::SwapchainKHR,
    timeout: u64,
    semaphore: vk::Semaphore,
    fence: vk::Fence,
    p_image_index: *mut u32,
) -> vk::Result {
    let Some(next) = next_fn(device, name!("vkAcquireNextImageKHR"), |record| {
        record.swapchain_fn.fp().acquire_next_image_khr
    }) else {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };

    let result = next(device, swapchain, timeout, semaphore, fence, p_image_index);
    if matches!(result, vk::Result::SUCCESS | vk::Result::SUBOPTIMAL_KHR) {
        let index = *p_image_index;
        with_hook(device, "acquire", |hook| {
            hook.on_acquire(swapchain, index, semaphore);
            Ok(())
        });
    }

    result
}

unsafe extern "system" fn queue_present(
    queue: vk::Queue,
    p_present_info: *const vk::PresentInfoKHR,
) -> vk::Result {
    let Some(device) = QUEUES.with(queue, |device| *device) else {
        log::error!("vkQueuePresentKHR on {:?}, which no hooked device owns", queue);
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };
    let Some(next) = next_fn(device, name!("vkQueuePresentKHR"), |record| {
        record.swapchain_fn.fp().queue_present_khr
    }) else {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };

    let present_info = &*p_present_info;
    let swapchains = slice_or_empty(present_info.p_swapchains, present_info.swapchain_count);
    let indices = slice_or_empty(present_info.p_image_indices, present_info.swapchain_count);

    for (&swapchain, &index) in swapchains.iter().zip(indices) {
        with_hook(device, "present", |hook| hook.on_present(swapchain, index));
    }

    // Registry lock is released here
    next(queue, p_present_info)
}
