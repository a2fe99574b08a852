// Backend module - Vulkan resource ownership layer
//
// Design: Thin wrappers around ash that own what they create and only borrow
// what the host application hands them. Every wrapper records which of the two
// it is through an explicit Ownership tag.

pub mod device;
pub mod framebuffer;
pub mod memory;
pub mod pipeline;
pub mod scope;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use device::DeviceContext;
pub use framebuffer::RenderTarget;
pub use memory::{Buffer, BufferUsage, Texture};
pub use swapchain::{SwapchainId, SwapchainResources};

/// Who releases a handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ownership {
    /// Created here, destroyed here.
    Owned,
    /// Created by the host, never destroyed here.
    Borrowed,
}

/// A handle paired with its ownership tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tracked<T> {
    pub handle: T,
    pub ownership: Ownership,
}

impl<T: Copy> Tracked<T> {
    pub fn owned(handle: T) -> Self {
        Self {
            handle,
            ownership: Ownership::Owned,
        }
    }

    pub fn borrowed(handle: T) -> Self {
        Self {
            handle,
            ownership: Ownership::Borrowed,
        }
    }

    pub fn is_owned(&self) -> bool {
        self.ownership == Ownership::Owned
    }
}
