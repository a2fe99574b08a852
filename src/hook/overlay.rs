// Overlay hook state for one device
//
// Lifecycle:
//   device-create    -> OverlayHook::new (no pass yet)
//   swapchain-create -> adopt the swapchain, build or rebind the pass
//   acquire          -> remember the index, rebind the semaphore
//   present          -> draw the quad into the presented image
//   swapchain-destroy-> unbind, drop the set
//   device-destroy   -> drop the hook
//
// Field order is drop order: the pass goes before the swapchain sets it points
// at, and every resource goes before the last reference to the context.

use anyhow::{Context, Result};
use ash::vk;
use std::collections::HashMap;
use std::sync::Arc;

use super::diagnostics::SampledCounter;
use crate::assets::OverlayAssets;
use crate::backend::device::graphics_queue_family;
use crate::backend::pipeline::{OverlayBindings, OverlayPipeline, OverlayShaders};
use crate::backend::{DeviceContext, RenderTarget, SwapchainResources, Texture};
use crate::config::Config;

/// Render pass, framebuffers and the pipeline built against them
struct OverlayPass {
    pipeline: OverlayPipeline,
    target: RenderTarget,
}

impl OverlayPass {
    fn new(
        ctx: &Arc<DeviceContext>,
        swapchain: &SwapchainResources,
        shaders: &OverlayShaders,
        bindings: &OverlayBindings,
    ) -> Result<Self> {
        let target = RenderTarget::overlay(ctx, swapchain)?;
        let pipeline = OverlayPipeline::new(ctx, target.render_pass(), shaders, bindings)?;

        log::info!(
            "Overlay pass built for {:?} at {}x{}",
            swapchain.format(),
            swapchain.extent().width,
            swapchain.extent().height
        );

        Ok(Self { pipeline, target })
    }
}

pub struct OverlayHook {
    pass: Option<OverlayPass>,
    swapchains: HashMap<vk::SwapchainKHR, SwapchainResources>,
    bindings: OverlayBindings,
    shaders: OverlayShaders,
    texture: Texture,
    ctx: Arc<DeviceContext>,

    viewport: vk::Extent2D,
    last_index: Option<u32>,
    acquires: SampledCounter,
    presents: SampledCounter,
}

impl OverlayHook {
    /// Adopt a freshly created host device and build the device-lifetime
    /// overlay objects. The pipeline waits for the first swapchain.
    pub fn new(
        instance: ash::Instance,
        device: ash::Device,
        physical_device: vk::PhysicalDevice,
        create_info: &vk::DeviceCreateInfo,
        assets: &OverlayAssets,
        config: &Config,
    ) -> Result<Self> {
        let queue_family_index = requested_graphics_family(&instance, physical_device, create_info)?;

        let enabled_features = unsafe { enabled_features(create_info) };

        let ctx = DeviceContext::from_existing(
            instance,
            device,
            physical_device,
            queue_family_index,
            enabled_features,
        )?;

        let shaders = OverlayShaders::new(&ctx, &assets.vertex_spv, &assets.fragment_spv)
            .context("Failed to build overlay shaders")?;
        let bindings = OverlayBindings::new(&ctx)?;

        let texture = &assets.texture;
        let texture = Texture::upload(&ctx, &texture.pixels, texture.width, texture.height)?;

        log::info!(
            "Overlay ready on device {:?} (queue family {})",
            ctx.device().handle(),
            queue_family_index
        );

        Ok(Self {
            pass: None,
            swapchains: HashMap::new(),
            bindings,
            shaders,
            texture,
            ctx,
            viewport: vk::Extent2D {
                width: config.viewport.width,
                height: config.viewport.height,
            },
            last_index: None,
            acquires: SampledCounter::new(config.debug.log_every),
            presents: SampledCounter::new(config.debug.log_every),
        })
    }

    /// The host created `swapchain`: adopt its images and point the pass at it.
    pub fn on_create_swapchain(
        &mut self,
        swapchain: vk::SwapchainKHR,
        create_info: &vk::SwapchainCreateInfoKHR,
    ) -> Result<()> {
        let set = SwapchainResources::adopt(&self.ctx, swapchain, create_info)?;

        match &mut self.pass {
            Some(pass) if pass.target.format() == set.format() => {
                pass.target.revalidate(&set)?;
            }
            _ => {
                // First swapchain, or the colour format changed
                self.pass = None;
                self.pass = Some(OverlayPass::new(
                    &self.ctx,
                    &set,
                    &self.shaders,
                    &self.bindings,
                )?);
            }
        }

        self.swapchains.insert(swapchain, set);
        Ok(())
    }

    /// The host is about to destroy `swapchain`.
    pub fn on_destroy_swapchain(&mut self, swapchain: vk::SwapchainKHR) {
        let Some(set) = self.swapchains.remove(&swapchain) else {
            return;
        };

        if let Some(pass) = &mut self.pass {
            if pass.target.is_bound_to(set.id()) {
                pass.target.release_framebuffers();
            }
        }
    }

    pub fn on_acquire(&mut self, swapchain: vk::SwapchainKHR, index: u32, semaphore: vk::Semaphore) {
        if self.acquires.tick() {
            log::debug!(
                "Acquired image {} of {:?} (logging every {} calls)",
                index,
                swapchain,
                self.acquires.every()
            );
        }

        self.last_index = Some(index);
        if let Some(set) = self.swapchains.get_mut(&swapchain) {
            set.set_last_index(index);
            if semaphore != vk::Semaphore::null() {
                set.set_semaphore(semaphore);
            }
        }
    }

    /// Draw the overlay into image `index` of `swapchain` and wait for it.
    ///
    /// Returns whether anything was drawn: unknown swapchains and swapchains
    /// the pass is not bound to are left alone.
    pub fn on_present(&mut self, swapchain: vk::SwapchainKHR, index: u32) -> Result<bool> {
        let Some(set) = self.swapchains.get(&swapchain) else {
            return Ok(false);
        };
        let Some(pass) = self.pass.as_ref().filter(|pass| pass.target.is_bound_to(set.id())) else {
            return Ok(false);
        };

        if self.presents.tick() {
            log::debug!(
                "Presenting image {} of {:?} (logging every {} calls)",
                index,
                swapchain,
                self.presents.every()
            );
        }
        if set.last_index() != Some(index) {
            log::warn!(
                "Presented image {} but image {:?} was acquired last",
                index,
                set.last_index()
            );
        }

        // Whatever the host submitted for this frame has to land first
        self.ctx.wait_idle()?;

        self.bindings.write_texture(&self.texture);

        let cmd = set.begin_commands(index)?;
        pass.target.begin(cmd, index)?;
        pass.pipeline.draw(cmd, &self.bindings, self.viewport, set.extent());
        unsafe { self.ctx.device().cmd_end_render_pass(cmd) };
        set.end_commands(index)?;

        set.submit(index)?;
        set.wait(index)?;

        Ok(true)
    }

    pub fn context(&self) -> &Arc<DeviceContext> {
        &self.ctx
    }

    pub fn swapchain(&self, swapchain: vk::SwapchainKHR) -> Option<&SwapchainResources> {
        self.swapchains.get(&swapchain)
    }

    pub fn swapchain_count(&self) -> usize {
        self.swapchains.len()
    }

    pub fn has_pass(&self) -> bool {
        self.pass.is_some()
    }

    /// Render pass and framebuffers, once a swapchain was seen
    pub fn render_target(&self) -> Option<&RenderTarget> {
        self.pass.as_ref().map(|pass| &pass.target)
    }

    pub fn pipeline(&self) -> Option<vk::Pipeline> {
        self.pass.as_ref().map(|pass| pass.pipeline.handle())
    }

    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    pub fn last_index(&self) -> Option<u32> {
        self.last_index
    }

    pub fn present_count(&self) -> u64 {
        self.presents.count()
    }
}

impl Drop for OverlayHook {
    fn drop(&mut self) {
        log::info!(
            "Tearing down overlay on device {:?} after {} presents",
            self.ctx.device().handle(),
            self.presents.count()
        );
        let _ = self.ctx.wait_idle();
    }
}

/// First queue family the host asked for that can do graphics
fn requested_graphics_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    create_info: &vk::DeviceCreateInfo,
) -> Result<u32> {
    let requested: &[vk::DeviceQueueCreateInfo] = if create_info.p_queue_create_infos.is_null() {
        &[]
    } else {
        unsafe {
            std::slice::from_raw_parts(
                create_info.p_queue_create_infos,
                create_info.queue_create_info_count as usize,
            )
        }
    };

    let all = unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
    let properties: Vec<vk::QueueFamilyProperties> = requested
        .iter()
        .map(|info| all.get(info.queue_family_index as usize).copied().unwrap_or_default())
        .collect();

    let position = graphics_queue_family(&properties)?;
    Ok(requested[position as usize].queue_family_index)
}

/// Features the host enabled, either directly or through a
/// `VkPhysicalDeviceFeatures2` in the `pNext` chain.
///
/// # Safety
/// `create_info` must be a valid device create info whose pointers are live.
unsafe fn enabled_features(create_info: &vk::DeviceCreateInfo) -> vk::PhysicalDeviceFeatures {
    if !create_info.p_enabled_features.is_null() {
        return *create_info.p_enabled_features;
    }

    let mut next = create_info.p_next as *const vk::BaseInStructure;
    while let Some(header) = next.as_ref() {
        if header.s_type == vk::StructureType::PHYSICAL_DEVICE_FEATURES_2 {
            return (*(next as *const vk::PhysicalDeviceFeatures2)).features;
        }
        next = header.p_next;
    }
    vk::PhysicalDeviceFeatures::default()
}
