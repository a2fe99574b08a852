// Error taxonomy
//
// Everything propagates as anyhow::Result with context, the way the backend
// always has. The failures callers may want to tell apart are rooted in
// OverlayError and can be recovered with `downcast_ref`.

use ash::prelude::VkResult;
use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OverlayError {
    /// A Vulkan call that creates or binds an object failed.
    #[error("{operation} failed: {result}")]
    ResourceCreation {
        operation: &'static str,
        result: vk::Result,
    },

    #[error("no memory type in mask {type_bits:#034b} provides {flags:?}")]
    NoSuitableMemoryType {
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    },

    #[error("no queue family advertises graphics capability")]
    NoGraphicsQueue,

    #[error("overlay asset {path:?} is {actual} bytes, expected {expected}")]
    AssetLoad {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },

    #[error("no SPIR-V available for the {stage} shader")]
    MissingShader { stage: &'static str },
}

/// Tags a failed Vulkan call with the operation that issued it.
pub trait VkResultExt<T> {
    fn resource(self, operation: &'static str) -> anyhow::Result<T>;
}

impl<T> VkResultExt<T> for VkResult<T> {
    fn resource(self, operation: &'static str) -> anyhow::Result<T> {
        self.map_err(|result| OverlayError::ResourceCreation { operation, result }.into())
    }
}
