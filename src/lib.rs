//! Overlay layer for Vulkan hosts.
//!
//! Draws a textured quad into every image an ash-based application presents,
//! without the application knowing. The host creates its instance as usual and
//! passes it to [`hook::install`]; the returned `ash::Instance` resolves six
//! entry points (device create/destroy, swapchain create/destroy, acquire,
//! present) to our hooks and forwards everything else.
//!
//! ```text
//! host  --vkQueuePresentKHR-->  hook::dispatch  --> hook::OverlayHook::on_present
//!                                     |                   |
//!                                     |                   +-- backend (device, swapchain,
//!                                     |                       render target, pipeline)
//!                                     +--> next-level vkQueuePresentKHR
//! ```
//!
//! The [`backend`] layer wraps ash handles in RAII types that know whether
//! they own or merely borrow what they hold, so tearing down a swapchain the
//! host created never destroys the host's handle.

pub mod assets;
pub mod backend;
pub mod config;
pub mod error;
pub mod hook;
pub mod logging;
