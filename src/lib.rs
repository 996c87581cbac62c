//! GPU-resident image resources for an image viewer.
//!
//! `Graphics` hands out textures, tiled images and animations, keeping a
//! bounded least-recently-used cache of each. Images larger than the GPU
//! texture limit are split into tiles; animations are decoded on a background
//! worker and become usable as soon as their first frame is uploaded.

pub mod engine;

pub use engine::assets::{
    AnimationRecord, Graphics, GraphicsError, GraphicsStats, LoadStatus, LoadedImage, TileGrid,
};
pub use engine::config::GraphicsConfig;
pub use engine::renderer::{FilterMode, GpuBackend, GpuTexture, WgpuBackend};
