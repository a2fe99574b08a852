// Synchronization primitives
//
// Fences for GPU-CPU sync, semaphores for the presentation engine.
// The overlay waits instead of chaining semaphores, so everything here blocks.

use anyhow::{Context, Result};
use ash::vk;

use crate::error::VkResultExt;

/// Per-image fences start signaled so the first wait returns immediately
pub fn create_fence(device: &ash::Device, signaled: bool) -> Result<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };
    let fence_info = vk::FenceCreateInfo::builder().flags(flags);

    unsafe { device.create_fence(&fence_info, None) }.resource("vkCreateFence")
}

pub fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    let semaphore_info = vk::SemaphoreCreateInfo::builder();

    unsafe { device.create_semaphore(&semaphore_info, None) }.resource("vkCreateSemaphore")
}

/// Block until `fence` signals.
pub fn wait(device: &ash::Device, fence: vk::Fence) -> Result<()> {
    unsafe { device.wait_for_fences(&[fence], true, u64::MAX) }
        .context("Failed waiting for fence")
}
