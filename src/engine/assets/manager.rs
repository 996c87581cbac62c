// Central image resource management

use super::animation::{AnimationRecord, FrameLoader};
use super::cache::{CacheStats, Release, ResourceCache};
use super::handle::{ImageKind, ResourceKey};
use super::loader::{ImageDecoder, ImageLoader};
use super::quantize::{NeuQuantizer, Quantizer};
use super::tiles::{plan_tiles, tile_image, TileGrid};
use super::GraphicsError;
use crate::engine::config::GraphicsConfig;
use crate::engine::renderer::{FilterMode, GpuBackend, GpuTexture};
use glam::UVec2;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Value stored in the image cache
#[derive(Debug, Clone)]
pub enum ImageResource {
    Texture(Arc<GpuTexture>),
    Tiled(Arc<TileGrid>),
}

// Textures and grids free their GPU memory when the last handle drops
impl Release for ImageResource {}

/// Result of `Graphics::get_image`
#[derive(Debug, Clone)]
pub enum LoadedImage {
    Tiled(Arc<TileGrid>),
    Animated(Arc<AnimationRecord>),
}

impl LoadedImage {
    /// Pixel size, `None` for an animation without frames
    pub fn size(&self) -> Option<UVec2> {
        match self {
            LoadedImage::Tiled(grid) => Some(grid.size()),
            LoadedImage::Animated(record) => record.frame(0).map(|frame| frame.size()),
        }
    }

    pub fn set_filter(&self, mode: FilterMode) {
        match self {
            LoadedImage::Tiled(grid) => grid.set_filter(mode),
            LoadedImage::Animated(record) => record.set_filter(mode),
        }
    }
}

/// Statistics of both caches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphicsStats {
    pub images: CacheStats,
    pub animations: CacheStats,
}

/// Entry point for loading images onto the GPU.
///
/// Owns one bounded cache for single textures and tile grids and one for
/// animations. Meant to be driven from a single thread; animation decoding
/// happens on worker threads behind `get_animation`.
pub struct Graphics {
    backend: Arc<dyn GpuBackend>,
    decoder: Arc<dyn ImageDecoder>,
    quantizer: Arc<dyn Quantizer>,
    config: Arc<GraphicsConfig>,

    /// Queried from the backend once, at construction
    max_texture_dimension: u32,

    images: ResourceCache<ResourceKey, ImageResource>,
    animations: ResourceCache<PathBuf, Arc<AnimationRecord>>,
}

impl Graphics {
    /// Create a resource manager decoding from disk with the default quantizer
    pub fn new(backend: Arc<dyn GpuBackend>, config: GraphicsConfig) -> Self {
        let max_texture_dimension = backend.max_texture_dimension();
        info!(
            "Graphics ready: {} textures, {} animations, max texture dimension {}",
            config.max_textures, config.max_animations, max_texture_dimension
        );

        Self {
            decoder: Arc::new(ImageLoader::new(
                config.asset_root.clone(),
                config.decode_limits,
            )),
            quantizer: Arc::new(NeuQuantizer::from_config(&config.quantizer)),
            images: ResourceCache::new("images", config.max_textures),
            animations: ResourceCache::new("animations", config.max_animations),
            config: Arc::new(config),
            max_texture_dimension,
            backend,
        }
    }

    /// Replace the bitmap decoder
    pub fn with_decoder(mut self, decoder: Arc<dyn ImageDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// Replace the colour quantizer used for animation frames
    pub fn with_quantizer(mut self, quantizer: Arc<dyn Quantizer>) -> Self {
        self.quantizer = quantizer;
        self
    }

    /// Largest texture side the backend accepts
    pub fn max_texture_dimension(&self) -> u32 {
        self.max_texture_dimension
    }

    pub fn config(&self) -> &GraphicsConfig {
        &self.config
    }

    /// Load `path` as one texture.
    ///
    /// Images larger than the hardware limit fail with `SizeLimitExceeded`;
    /// use `get_tiled_image` for those.
    pub fn get_texture(&mut self, path: impl AsRef<Path>) -> Result<Arc<GpuTexture>, GraphicsError> {
        let path = path.as_ref();
        let key = ResourceKey::texture(path);

        let (backend, decoder) = (&self.backend, self.decoder.as_ref());
        let limit = self.max_texture_dimension;
        let filter = self.config.texture_filter;

        let resource = self
            .images
            .get_or_load(&key, || load_texture(backend, decoder, path, limit, filter))?;

        match resource {
            ImageResource::Texture(texture) => Ok(texture),
            ImageResource::Tiled(_) => unreachable!("texture key holds a tile grid"),
        }
    }

    /// Load `path` as a grid of textures, each within the hardware limit
    pub fn get_tiled_image(&mut self, path: impl AsRef<Path>) -> Result<Arc<TileGrid>, GraphicsError> {
        let path = path.as_ref();
        let key = ResourceKey::tiled(path);

        let (backend, decoder) = (&self.backend, self.decoder.as_ref());
        let max_dim = self.max_texture_dimension;
        let config = self.config.as_ref();

        let resource = self
            .images
            .get_or_load(&key, || load_tiled(backend, decoder, path, max_dim, config))?;

        match resource {
            ImageResource::Tiled(grid) => Ok(grid),
            ImageResource::Texture(_) => unreachable!("tiled key holds a single texture"),
        }
    }

    /// Load `path` as an animation.
    ///
    /// Returns once the first frame is on the GPU; the rest keeps loading in
    /// the background. Still images yield a one-frame animation.
    pub fn get_animation(
        &mut self,
        path: impl AsRef<Path>,
    ) -> Result<Arc<AnimationRecord>, GraphicsError> {
        let path = path.as_ref();
        let loader = FrameLoader::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.decoder),
            Arc::clone(&self.quantizer),
            Arc::clone(&self.config),
        );

        self.animations
            .get_or_load(&path.to_path_buf(), || loader.begin_load(path))
    }

    /// Load `path` the way a viewer displays it: animated formats as an
    /// animation, everything else tiled
    pub fn get_image(&mut self, path: impl AsRef<Path>) -> Result<LoadedImage, GraphicsError> {
        let path = path.as_ref();
        match ImageKind::from_path(path) {
            ImageKind::Animated => self.get_animation(path).map(LoadedImage::Animated),
            ImageKind::Still => self.get_tiled_image(path).map(LoadedImage::Tiled),
        }
    }

    pub fn stats(&self) -> GraphicsStats {
        GraphicsStats {
            images: self.images.stats(),
            animations: self.animations.stats(),
        }
    }

    /// Release every cached resource, stopping animation workers first
    pub fn clear(&mut self) {
        self.animations.clear();
        self.images.clear();
        info!("Graphics caches cleared");
    }
}

fn label_for(path: &Path) -> String {
    path.display().to_string()
}

fn check_texture_size(path: &Path, width: u32, height: u32, limit: u32) -> Result<(), GraphicsError> {
    if width > limit || height > limit {
        warn!(
            "{} is {}x{}, larger than the texture limit {}",
            path.display(),
            width,
            height,
            limit
        );
        return Err(GraphicsError::SizeLimitExceeded {
            path: path.to_path_buf(),
            width,
            height,
            limit,
        });
    }
    Ok(())
}

fn check_tile_count(
    path: &Path,
    width: u32,
    height: u32,
    max_dim: u32,
    max_tiles: usize,
) -> Result<(), GraphicsError> {
    let tiles = plan_tiles(width, height, max_dim).tile_count();
    if tiles > max_tiles {
        warn!(
            "{} ({}x{}) would need {} tiles",
            path.display(),
            width,
            height,
            tiles
        );
        return Err(GraphicsError::TooManyTiles {
            path: path.to_path_buf(),
            tiles,
            limit: max_tiles,
        });
    }
    Ok(())
}

fn load_texture(
    backend: &Arc<dyn GpuBackend>,
    decoder: &dyn ImageDecoder,
    path: &Path,
    limit: u32,
    filter: FilterMode,
) -> Result<ImageResource, GraphicsError> {
    // Refuse from the header before paying for a decode
    let (width, height) = decoder.dimensions(path)?;
    check_texture_size(path, width, height, limit)?;

    let image = decoder.decode(path)?;
    let (width, height) = image.dimensions();
    check_texture_size(path, width, height, limit)?;

    let texture = GpuTexture::from_image(backend, &image, filter, &label_for(path))?;
    debug!("Loaded texture {} ({}x{})", path.display(), width, height);

    Ok(ImageResource::Texture(Arc::new(texture)))
}

fn load_tiled(
    backend: &Arc<dyn GpuBackend>,
    decoder: &dyn ImageDecoder,
    path: &Path,
    max_dim: u32,
    config: &GraphicsConfig,
) -> Result<ImageResource, GraphicsError> {
    let (width, height) = decoder.dimensions(path)?;
    check_tile_count(path, width, height, max_dim, config.max_tile_count)?;

    let image = decoder.decode(path)?;
    let (width, height) = image.dimensions();
    check_tile_count(path, width, height, max_dim, config.max_tile_count)?;

    let grid = tile_image(
        backend,
        &image,
        max_dim,
        config.texture_filter,
        &label_for(path),
    )?;
    debug!(
        "Loaded {} as {}x{} tiles",
        path.display(),
        grid.columns(),
        grid.rows()
    );

    Ok(ImageResource::Tiled(Arc::new(grid)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::assets::LoadStatus;
    use crate::engine::test_support::{
        gradient, init_logging, write_gif, write_png, IdentityQuantizer, MockBackend,
        ScriptedDecoder,
    };
    use std::time::Duration;

    fn graphics(mock: &MockBackend, config: GraphicsConfig) -> Graphics {
        Graphics::new(mock.backend(), config).with_quantizer(Arc::new(IdentityQuantizer))
    }

    #[test]
    fn test_texture_cache_evicts_oldest() {
        init_logging();
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<PathBuf> = (0..25)
            .map(|i| write_png(dir.path(), &format!("image{i}.png"), &gradient(4 + i, 4)))
            .collect();

        let mock = MockBackend::new(64);
        let mut gfx = graphics(&mock, GraphicsConfig::default());

        for (i, path) in paths.iter().enumerate() {
            let texture = gfx.get_texture(path).unwrap();
            assert_eq!(texture.width(), 4 + i as u32);
            drop(texture);

            if i == 19 {
                assert_eq!(mock.live_textures(), 20);
                assert_eq!(mock.disposed(), 0);
            }
            if i == 20 {
                // 21st request pushed the first image out
                assert_eq!(mock.live_textures(), 20);
                assert_eq!(mock.disposed(), 1);
                assert_eq!(gfx.stats().images.evictions, 1);
            }
        }

        assert_eq!(mock.live_textures(), 20);
        assert_eq!(gfx.stats().images.entries, 20);

        // The first image needs a fresh decode
        let misses = gfx.stats().images.misses;
        gfx.get_texture(&paths[0]).unwrap();
        assert_eq!(gfx.stats().images.misses, misses + 1);
        assert_eq!(mock.created(), 26);
    }

    #[test]
    fn test_repeated_requests_share_resource() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "same.png", &gradient(8, 8));

        let mock = MockBackend::new(64);
        let mut gfx = graphics(&mock, GraphicsConfig::default());

        let first = gfx.get_texture(&path).unwrap();
        let second = gfx.get_texture(&path).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(mock.created(), 1);
        assert_eq!(gfx.stats().images.hits, 1);
    }

    #[test]
    fn test_hardware_limit_queried_once() {
        let mock = MockBackend::new(32);
        let mut gfx = graphics(&mock, GraphicsConfig::default());
        assert_eq!(gfx.max_texture_dimension(), 32);

        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "wide.png", &gradient(40, 8));
        gfx.get_tiled_image(&path).unwrap();
        gfx.get_tiled_image(dir.path().join("missing.png")).unwrap_err();

        assert_eq!(mock.dimension_queries(), 1);
    }

    #[test]
    fn test_oversized_texture_falls_back_to_tiles() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "wide.png", &gradient(20, 9));

        let mock = MockBackend::new(16);
        let mut gfx = graphics(&mock, GraphicsConfig::default());

        let err = gfx.get_texture(&path).unwrap_err();
        assert!(matches!(
            err,
            GraphicsError::SizeLimitExceeded {
                width: 20,
                height: 9,
                limit: 16,
                ..
            }
        ));
        assert!(err.is_size_limit());
        assert_eq!(mock.created(), 0, "nothing may be uploaded for a refused image");
        assert_eq!(gfx.stats().images.entries, 0);

        let grid = gfx.get_tiled_image(&path).unwrap();
        assert_eq!(grid.size(), UVec2::new(20, 9));
        assert_eq!(grid.columns(), 2);
        assert_eq!(grid.rows(), 1);
        let widths: Vec<u32> = grid.row(0).unwrap().iter().map(|t| t.size().x).collect();
        assert_eq!(widths, vec![16, 4]);
        assert_eq!(grid.tile(0, 1).unwrap().size().y, 9);
    }

    #[test]
    fn test_small_image_is_single_tile() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "small.png", &gradient(10, 10));

        let mock = MockBackend::new(16);
        let mut gfx = graphics(&mock, GraphicsConfig::default());

        let grid = gfx.get_tiled_image(&path).unwrap();
        assert!(grid.is_single());
        assert_eq!(grid.size(), UVec2::new(10, 10));
    }

    #[test]
    fn test_tile_cap_refuses_before_decode() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "banner.png", &gradient(12, 4));

        let mock = MockBackend::new(4);
        let mut gfx = graphics(&mock, GraphicsConfig::default().with_max_tile_count(2));

        let err = gfx.get_tiled_image(&path).unwrap_err();
        assert!(matches!(err, GraphicsError::TooManyTiles { tiles: 3, limit: 2, .. }));
        assert_eq!(mock.created(), 0);
    }

    #[test]
    fn test_texture_and_tiled_are_separate_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "both.png", &gradient(6, 6));

        let mock = MockBackend::new(64);
        let mut gfx = graphics(&mock, GraphicsConfig::default());

        gfx.get_texture(&path).unwrap();
        gfx.get_tiled_image(&path).unwrap();

        assert_eq!(gfx.stats().images.entries, 2);
        assert_eq!(mock.created(), 2);
    }

    #[test]
    fn test_decode_failure_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.png");
        std::fs::write(&path, b"not an image at all").unwrap();

        let mock = MockBackend::new(64);
        let mut gfx = graphics(&mock, GraphicsConfig::default());

        assert!(gfx.get_texture(&path).unwrap_err().is_decode_failure());
        assert!(gfx.get_texture(&path).unwrap_err().is_decode_failure());

        let stats = gfx.stats().images;
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.misses, 2, "failures are retried on the next request");
    }

    #[test]
    fn test_misnamed_file_loads_by_content() {
        let dir = tempfile::tempdir().unwrap();
        let png = write_png(dir.path(), "photo.png", &gradient(7, 5));
        let misnamed = dir.path().join("photo.jpg");
        std::fs::copy(&png, &misnamed).unwrap();

        let mock = MockBackend::new(64);
        let mut gfx = graphics(&mock, GraphicsConfig::default());

        assert_eq!(gfx.get_texture(&misnamed).unwrap().size(), UVec2::new(7, 5));
        assert_eq!(gfx.get_tiled_image(&misnamed).unwrap().size(), UVec2::new(7, 5));
    }

    #[test]
    fn test_upload_failure_surfaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "gpu.png", &gradient(4, 4));

        let mock = MockBackend::new(64);
        mock.fail_uploads(true);
        let mut gfx = graphics(&mock, GraphicsConfig::default());

        assert!(gfx.get_texture(&path).unwrap_err().is_upload_failure());
        assert_eq!(mock.live_textures(), 0);
    }

    #[test]
    fn test_relative_paths_use_asset_root() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "rel.png", &gradient(3, 3));

        let mock = MockBackend::new(64);
        let mut gfx = graphics(&mock, GraphicsConfig::default().with_asset_root(dir.path()));

        assert_eq!(gfx.get_texture("rel.png").unwrap().size(), UVec2::new(3, 3));
    }

    #[test]
    fn test_animation_cache() {
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<PathBuf> = (0..3)
            .map(|i| write_gif(dir.path(), &format!("anim{i}.gif"), 5, 5, 3, 40))
            .collect();

        let mock = MockBackend::new(64);
        let mut gfx = graphics(&mock, GraphicsConfig::default().with_capacities(20, 2));

        let first = gfx.get_animation(&paths[0]).unwrap();
        assert!(first.frame_count() >= 1);
        assert!(Arc::ptr_eq(&first, &gfx.get_animation(&paths[0]).unwrap()));

        let status = first.wait_until_done(Duration::from_secs(10));
        assert_eq!(status, LoadStatus::Complete);
        assert_eq!(first.frame_count(), 3);
        assert_eq!(first.frame_duration(), Duration::from_millis(40));

        gfx.get_animation(&paths[1]).unwrap();
        gfx.get_animation(&paths[2]).unwrap();

        // Evicted while the caller still holds it: frames are released anyway
        assert_eq!(first.frame_count(), 0);
        assert_eq!(gfx.stats().animations.evictions, 1);
        assert_eq!(gfx.stats().animations.entries, 2);
    }

    #[test]
    fn test_evicting_loading_animation_cancels_worker() {
        let mock = MockBackend::new(64);
        let decoder = ScriptedDecoder::new(60).with_frame_time(Duration::from_millis(5));
        let mut gfx = graphics(&mock, GraphicsConfig::default().with_capacities(20, 1))
            .with_decoder(Arc::new(decoder));

        let first = gfx.get_animation("first.gif").unwrap();
        let second = gfx.get_animation("second.gif").unwrap();

        // Only a record evicted mid-load ends up cancelled; a finished one stays complete
        assert_eq!(first.status(), LoadStatus::Cancelled);
        assert_eq!(first.frame_count(), 0);
        assert_eq!(gfx.stats().animations.evictions, 1);

        assert_eq!(second.wait_until_done(Duration::from_secs(10)), LoadStatus::Complete);
        assert_eq!(second.frame_count(), 60);
        assert_eq!(mock.live_textures(), 60, "only the second animation may hold textures");

        let created = mock.created();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(mock.created(), created);
    }

    #[test]
    fn test_missing_animation_is_not_cached() {
        let mock = MockBackend::new(64);
        let mut gfx = graphics(&mock, GraphicsConfig::default());

        let err = gfx.get_animation("/nonexistent/anim.gif").unwrap_err();
        assert!(err.is_decode_failure());
        assert_eq!(gfx.stats().animations.entries, 0);
    }

    #[test]
    fn test_get_image_dispatches_by_kind() {
        let dir = tempfile::tempdir().unwrap();
        let gif = write_gif(dir.path(), "moving.gif", 6, 4, 2, 50);
        let png = write_png(dir.path(), "still.png", &gradient(6, 4));

        let mock = MockBackend::new(64);
        let mut gfx = graphics(&mock, GraphicsConfig::default());

        let animated = gfx.get_image(&gif).unwrap();
        assert!(matches!(animated, LoadedImage::Animated(_)));
        assert_eq!(animated.size(), Some(UVec2::new(6, 4)));

        let still = gfx.get_image(&png).unwrap();
        assert!(matches!(still, LoadedImage::Tiled(_)));
        assert_eq!(still.size(), Some(UVec2::new(6, 4)));

        still.set_filter(FilterMode::Nearest);
        if let LoadedImage::Tiled(grid) = &still {
            assert!(grid.tiles().all(|t| t.texture.filter() == FilterMode::Nearest));
        }
    }

    #[test]
    fn test_still_image_as_animation() {
        let dir = tempfile::tempdir().unwrap();
        let png = write_png(dir.path(), "still.png", &gradient(5, 5));

        let mock = MockBackend::new(64);
        let mut gfx = graphics(&mock, GraphicsConfig::default());

        let record = gfx.get_animation(&png).unwrap();
        assert_eq!(record.wait_until_done(Duration::from_secs(10)), LoadStatus::Complete);
        assert_eq!(record.frame_count(), 1);
        assert_eq!(record.expected_frames(), Some(1));
        assert_eq!(record.frame_duration(), Duration::from_millis(100));
    }

    #[test]
    fn test_clear_and_drop_release_everything() {
        let dir = tempfile::tempdir().unwrap();
        let png = write_png(dir.path(), "a.png", &gradient(4, 4));
        let gif = write_gif(dir.path(), "b.gif", 4, 4, 3, 50);

        let mock = MockBackend::new(64);
        let mut gfx = graphics(&mock, GraphicsConfig::default());

        gfx.get_texture(&png).unwrap();
        gfx.get_tiled_image(&png).unwrap();
        gfx.get_animation(&gif).unwrap();
        assert!(mock.live_textures() >= 3);

        gfx.clear();
        assert_eq!(mock.live_textures(), 0);
        assert_eq!(gfx.stats().images.entries, 0);

        gfx.get_texture(&png).unwrap();
        gfx.get_animation(&gif).unwrap();
        drop(gfx);
        assert_eq!(mock.live_textures(), 0);
    }
}
