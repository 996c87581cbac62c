// Resource manager configuration

use crate::engine::renderer::FilterMode;
use std::path::PathBuf;
use std::time::Duration;

/// Cached single textures and tile grids
pub const MAX_TEXTURES: usize = 20;

/// Cached animations
pub const MAX_ANIMATIONS: usize = 6;

/// Frame duration used when the source carries no usable timing
pub const DEFAULT_FRAME_DURATION: Duration = Duration::from_millis(100);

/// Source frame durations at or below this are treated as missing
pub const MIN_FRAME_DURATION: Duration = Duration::from_millis(10);

/// Upper bound on the number of tiles a single image may be split into
pub const MAX_TILE_COUNT: usize = 256;

/// Hard limits applied while decoding, independent of the GPU limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeLimits {
    pub max_width: u32,
    pub max_height: u32,
    /// Largest decode buffer in bytes
    pub max_alloc: u64,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_width: 65_535,
            max_height: 65_535,
            max_alloc: 4 * 1024 * 1024 * 1024,
        }
    }
}

impl DecodeLimits {
    /// Check a decoded or announced size against the limits
    pub fn allows(&self, width: u32, height: u32) -> bool {
        width <= self.max_width
            && height <= self.max_height
            && width as u64 * height as u64 * 4 <= self.max_alloc
    }

    pub(crate) fn to_image_limits(self) -> image::io::Limits {
        let mut limits = image::io::Limits::default();
        limits.max_image_width = Some(self.max_width);
        limits.max_image_height = Some(self.max_height);
        limits.max_alloc = Some(self.max_alloc);
        limits
    }
}

/// Parameters handed to the colour quantizer for animation frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantizerConfig {
    /// Palette size, 2..=256
    pub max_colors: usize,
    /// Significant bits kept per channel before palette training, 1..=8
    pub depth: u8,
    /// NeuQuant sampling factor, 1 (best) ..= 30 (fastest)
    pub sample_factor: i32,
}

impl Default for QuantizerConfig {
    fn default() -> Self {
        Self {
            max_colors: 255,
            depth: 8,
            sample_factor: 10,
        }
    }
}

/// Configuration for `Graphics`
#[derive(Debug, Clone)]
pub struct GraphicsConfig {
    /// Capacity of the texture / tile grid cache
    pub max_textures: usize,

    /// Capacity of the animation cache
    pub max_animations: usize,

    /// Frame duration when the source has none (or an unusably short one)
    pub default_frame_duration: Duration,

    /// Source frame durations must be strictly longer than this to be used
    pub min_frame_duration: Duration,

    /// Tile grids with more tiles than this are refused
    pub max_tile_count: usize,

    /// Filter applied to single textures and tiles
    pub texture_filter: FilterMode,

    /// Quantizer settings for animation frames
    pub quantizer: QuantizerConfig,

    /// Decoder limits
    pub decode_limits: DecodeLimits,

    /// Relative request paths are resolved against this directory
    pub asset_root: Option<PathBuf>,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            max_textures: MAX_TEXTURES,
            max_animations: MAX_ANIMATIONS,
            default_frame_duration: DEFAULT_FRAME_DURATION,
            min_frame_duration: MIN_FRAME_DURATION,
            max_tile_count: MAX_TILE_COUNT,
            texture_filter: FilterMode::Linear,
            quantizer: QuantizerConfig::default(),
            decode_limits: DecodeLimits::default(),
            asset_root: None,
        }
    }
}

impl GraphicsConfig {
    /// Set both cache capacities
    pub fn with_capacities(mut self, textures: usize, animations: usize) -> Self {
        self.max_textures = textures;
        self.max_animations = animations;
        self
    }

    pub fn with_max_tile_count(mut self, tiles: usize) -> Self {
        self.max_tile_count = tiles;
        self
    }

    pub fn with_texture_filter(mut self, filter: FilterMode) -> Self {
        self.texture_filter = filter;
        self
    }

    pub fn with_default_frame_duration(mut self, duration: Duration) -> Self {
        self.default_frame_duration = duration;
        self
    }

    pub fn with_decode_limits(mut self, limits: DecodeLimits) -> Self {
        self.decode_limits = limits;
        self
    }

    pub fn with_asset_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.asset_root = Some(root.into());
        self
    }

    /// Pick the display duration for a frame given the source's own timing
    pub fn frame_duration(&self, source: Option<Duration>) -> Duration {
        match source {
            Some(duration) if duration > self.min_frame_duration => duration,
            _ => self.default_frame_duration,
        }
    }
}
