// Image resource management
//
// Provides cached loading of textures, tiled images and background-decoded
// animations.

mod animation;
mod cache;
mod handle;
mod loader;
mod manager;
mod quantize;
mod tiles;

pub use animation::{AnimationRecord, FrameLoader, LoadStatus};
pub use cache::{CacheStats, Release, ResourceCache};
pub use handle::{ImageKind, ResourceKey, ResourceKind};
pub use loader::{AnimationSource, ImageDecoder, ImageLoader, SourceFrame};
pub use manager::{Graphics, GraphicsStats, ImageResource, LoadedImage};
pub use quantize::{NeuQuantizer, Quantizer};
pub use tiles::{plan_tiles, tile_image, Tile, TileCell, TileGrid, TileLayout};

use std::path::PathBuf;

/// Image loading errors
#[derive(Debug, thiserror::Error)]
pub enum GraphicsError {
    #[error("Failed to decode {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Invalid image data in {}: {reason}", path.display())]
    InvalidImage { path: PathBuf, reason: String },

    #[error("{} is {width}x{height}, exceeding the maximum texture size of {limit}", path.display())]
    SizeLimitExceeded {
        path: PathBuf,
        width: u32,
        height: u32,
        limit: u32,
    },

    #[error("{} would need {tiles} tiles, more than the limit of {limit}", path.display())]
    TooManyTiles {
        path: PathBuf,
        tiles: usize,
        limit: usize,
    },

    #[error("Texture upload failed: {0}")]
    Upload(String),

    #[error("Load of {} was cancelled", .0.display())]
    Cancelled(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GraphicsError {
    /// Source could not be read or decoded
    pub fn is_decode_failure(&self) -> bool {
        matches!(
            self,
            GraphicsError::Decode { .. } | GraphicsError::InvalidImage { .. } | GraphicsError::Io(_)
        )
    }

    /// Image is too large for the requested representation. Callers of
    /// `Graphics::get_texture` can fall back to `Graphics::get_tiled_image`.
    pub fn is_size_limit(&self) -> bool {
        matches!(
            self,
            GraphicsError::SizeLimitExceeded { .. } | GraphicsError::TooManyTiles { .. }
        )
    }

    /// The GPU rejected texture creation or upload
    pub fn is_upload_failure(&self) -> bool {
        matches!(self, GraphicsError::Upload(_))
    }
}
