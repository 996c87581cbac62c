// GPU backend seam
//
// Everything above this module talks to the GPU through `GpuBackend`, so the
// caches, tiler and animation worker never touch wgpu types directly.

pub mod texture;

pub use texture::{GpuTexture, WgpuBackend, WgpuTexture};

use crate::engine::assets::GraphicsError;
use std::any::Any;

/// Backend-specific texture object, owned by a `GpuTexture`
pub type RawTexture = Box<dyn Any + Send + Sync>;

/// Sampling filter applied when a texture is scaled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    Nearest,
    #[default]
    Linear,
}

impl FilterMode {
    /// Filtering for the "smooth" toggle most viewers expose
    pub fn from_smooth(smooth: bool) -> Self {
        if smooth {
            FilterMode::Linear
        } else {
            FilterMode::Nearest
        }
    }

    pub fn is_smooth(self) -> bool {
        self == FilterMode::Linear
    }
}

/// Destination rectangle of an upload, in texels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl TextureRegion {
    /// Region covering a whole `width` x `height` texture
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    /// Number of bytes an RGBA8 buffer for this region must hold
    pub fn rgba_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

/// Minimal GPU contract: allocate, fill, configure and free 2D RGBA8 textures.
///
/// Implementations must be usable from the animation worker threads, hence
/// `Send + Sync`.
pub trait GpuBackend: Send + Sync {
    /// Allocate an uninitialised `width` x `height` RGBA8 texture
    fn create_texture(&self, width: u32, height: u32, label: &str)
        -> Result<RawTexture, GraphicsError>;

    /// Copy tightly packed RGBA8 `pixels` into `region` of `texture`
    fn upload(
        &self,
        texture: &RawTexture,
        pixels: &[u8],
        region: TextureRegion,
    ) -> Result<(), GraphicsError>;

    /// Apply a filter mode. Backends that keep filtering in samplers may ignore it.
    fn set_filtering(&self, texture: &RawTexture, mode: FilterMode);

    /// Free the texture's GPU memory
    fn dispose(&self, texture: RawTexture);

    /// Largest width or height a single texture may have
    fn max_texture_dimension(&self) -> u32;
}
