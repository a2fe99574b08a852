// Overlay assets: the raw RGBA8 texture and the two SPIR-V stages
//
// Everything is read once, when the layer is installed, so per-device setup
// never touches the filesystem.

use anyhow::{Context, Result};
use std::path::Path;

use crate::backend::shader;
use crate::config::Config;
use crate::error::OverlayError;

static BAKED_VERTEX: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/overlay.vert.spv"));
static BAKED_FRAGMENT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/overlay.frag.spv"));

/// Tightly packed RGBA8 pixels
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureAsset {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug)]
pub struct OverlayAssets {
    pub texture: TextureAsset,
    pub vertex_spv: Vec<u32>,
    pub fragment_spv: Vec<u32>,
}

impl OverlayAssets {
    /// Read the configured texture and resolve both shader stages.
    pub fn load(config: &Config) -> Result<Self> {
        let texture = &config.texture;
        let expected = texture.byte_len();

        let pixels = std::fs::read(&texture.path)
            .with_context(|| format!("Failed to read overlay texture {:?}", texture.path))?;

        if expected == 0 || pixels.len() != expected {
            return Err(OverlayError::AssetLoad {
                path: texture.path.clone(),
                expected,
                actual: pixels.len(),
            }
            .into());
        }

        let vertex_spv = stage_words("vertex", config.shaders.vertex.as_deref(), BAKED_VERTEX)?;
        let fragment_spv =
            stage_words("fragment", config.shaders.fragment.as_deref(), BAKED_FRAGMENT)?;

        log::info!(
            "Loaded overlay assets: {}x{} texture from {:?}, {} + {} SPIR-V words",
            texture.width,
            texture.height,
            texture.path,
            vertex_spv.len(),
            fragment_spv.len()
        );

        Ok(Self::from_parts(
            TextureAsset {
                pixels,
                width: texture.width,
                height: texture.height,
            },
            vertex_spv,
            fragment_spv,
        ))
    }

    pub fn from_parts(texture: TextureAsset, vertex_spv: Vec<u32>, fragment_spv: Vec<u32>) -> Self {
        Self {
            texture,
            vertex_spv,
            fragment_spv,
        }
    }
}

/// SPIR-V for one stage: the configured file if any, the baked words otherwise
fn stage_words(stage: &'static str, path: Option<&Path>, baked: &[u8]) -> Result<Vec<u32>> {
    match path {
        Some(path) => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("Failed to read {} shader {:?}", stage, path))?;
            shader::words_from_bytes(stage, &bytes)
                .with_context(|| format!("Failed to load {:?}", path))
        }
        None => shader::words_from_bytes(stage, baked),
    }
}
