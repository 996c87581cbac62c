// GPU texture handles and the wgpu backend

use super::{FilterMode, GpuBackend, RawTexture, TextureRegion};
use crate::engine::assets::GraphicsError;
use anyhow::Result;
use glam::UVec2;
use image::RgbaImage;
use log::{info, trace};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A texture living in GPU memory.
///
/// The handle is the sole owner of its backend texture: dropping it disposes
/// the GPU memory exactly once. Dimensions are fixed at creation, the filter
/// mode can be switched at any time.
pub struct GpuTexture {
    raw: Option<RawTexture>,
    backend: Arc<dyn GpuBackend>,
    width: u32,
    height: u32,
    smooth: AtomicBool,
}

impl GpuTexture {
    /// Create a texture from tightly packed RGBA8 pixels
    pub fn from_rgba(
        backend: &Arc<dyn GpuBackend>,
        pixels: &[u8],
        width: u32,
        height: u32,
        filter: FilterMode,
        label: &str,
    ) -> Result<Self, GraphicsError> {
        if width == 0 || height == 0 {
            return Err(GraphicsError::Upload(format!(
                "{label}: texture dimensions must be positive, got {width}x{height}"
            )));
        }

        let region = TextureRegion::full(width, height);
        if pixels.len() != region.rgba_len() {
            return Err(GraphicsError::Upload(format!(
                "{label}: expected {} bytes of RGBA data, got {}",
                region.rgba_len(),
                pixels.len()
            )));
        }

        let raw = backend.create_texture(width, height, label)?;
        if let Err(e) = backend.upload(&raw, pixels, region) {
            backend.dispose(raw);
            return Err(e);
        }
        backend.set_filtering(&raw, filter);

        trace!("Uploaded {} ({}x{}, {:?})", label, width, height, filter);

        Ok(Self {
            raw: Some(raw),
            backend: Arc::clone(backend),
            width,
            height,
            smooth: AtomicBool::new(filter.is_smooth()),
        })
    }

    /// Create a texture from a decoded image
    pub fn from_image(
        backend: &Arc<dyn GpuBackend>,
        image: &RgbaImage,
        filter: FilterMode,
        label: &str,
    ) -> Result<Self, GraphicsError> {
        Self::from_rgba(
            backend,
            image.as_raw(),
            image.width(),
            image.height(),
            filter,
            label,
        )
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Size in pixels
    pub fn size(&self) -> UVec2 {
        UVec2::new(self.width, self.height)
    }

    /// Current filter mode
    pub fn filter(&self) -> FilterMode {
        FilterMode::from_smooth(self.smooth.load(Ordering::Acquire))
    }

    /// Switch the filter mode used when this texture is sampled
    pub fn set_filter(&self, mode: FilterMode) {
        if let Some(raw) = &self.raw {
            self.backend.set_filtering(raw, mode);
        }
        self.smooth.store(mode.is_smooth(), Ordering::Release);
    }

    /// Estimated GPU memory held by this texture in bytes
    pub fn vram_size(&self) -> usize {
        TextureRegion::full(self.width, self.height).rgba_len()
    }

    /// Get the backend texture object
    ///
    /// Returns `None` if the type doesn't match the backend that created it.
    pub fn raw<T: 'static>(&self) -> Option<&T> {
        self.raw.as_ref().and_then(|raw| raw.as_ref().downcast_ref::<T>())
    }
}

impl Drop for GpuTexture {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            self.backend.dispose(raw);
        }
    }
}

impl fmt::Debug for GpuTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuTexture")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("filter", &self.filter())
            .finish()
    }
}

/// Texture object created by `WgpuBackend`
pub struct WgpuTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

/// `GpuBackend` on top of a wgpu device and queue.
///
/// Filtering lives in samplers with wgpu, so the backend keeps one nearest and
/// one linear sampler and renderers pick by `GpuTexture::filter`.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    nearest_sampler: wgpu::Sampler,
    linear_sampler: wgpu::Sampler,
    max_dimension: u32,
}

impl WgpuBackend {
    /// Wrap an existing device and queue
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let max_dimension = device.limits().max_texture_dimension_2d;
        let nearest_sampler = Self::create_sampler(&device, wgpu::FilterMode::Nearest);
        let linear_sampler = Self::create_sampler(&device, wgpu::FilterMode::Linear);

        info!("Texture backend ready, max texture dimension {}", max_dimension);

        Self {
            device,
            queue,
            nearest_sampler,
            linear_sampler,
            max_dimension,
        }
    }

    /// Bring up a device without a surface, requesting the adapter's full limits
    pub fn headless() -> Result<Self> {
        pollster::block_on(Self::request_headless())
    }

    async fn request_headless() -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| anyhow::anyhow!("Failed to find suitable GPU adapter"))?;

        info!("Using GPU: {}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Texture Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                },
                None,
            )
            .await?;

        Ok(Self::new(device, queue))
    }

    fn create_sampler(device: &wgpu::Device, filter: wgpu::FilterMode) -> wgpu::Sampler {
        device.create_sampler(&wgpu::SamplerDescriptor {
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        })
    }

    /// Get a reference to the device
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Get a reference to the queue
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Sampler matching a texture's filter mode
    pub fn sampler(&self, mode: FilterMode) -> &wgpu::Sampler {
        match mode {
            FilterMode::Nearest => &self.nearest_sampler,
            FilterMode::Linear => &self.linear_sampler,
        }
    }

    fn downcast(texture: &RawTexture) -> Result<&WgpuTexture, GraphicsError> {
        texture
            .as_ref()
            .downcast_ref::<WgpuTexture>()
            .ok_or_else(|| GraphicsError::Upload("texture was not created by this backend".into()))
    }
}

impl GpuBackend for WgpuBackend {
    fn create_texture(
        &self,
        width: u32,
        height: u32,
        label: &str,
    ) -> Result<RawTexture, GraphicsError> {
        if width > self.max_dimension || height > self.max_dimension {
            return Err(GraphicsError::Upload(format!(
                "{label}: {width}x{height} exceeds the device limit of {}",
                self.max_dimension
            )));
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        let invalid = pollster::block_on(self.device.pop_error_scope());
        if let Some(error) = out_of_memory.or(invalid) {
            texture.destroy();
            return Err(GraphicsError::Upload(format!("{label}: {error}")));
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(Box::new(WgpuTexture { texture, view }))
    }

    fn upload(
        &self,
        texture: &RawTexture,
        pixels: &[u8],
        region: TextureRegion,
    ) -> Result<(), GraphicsError> {
        let target = Self::downcast(texture)?;

        if pixels.len() < region.rgba_len() {
            return Err(GraphicsError::Upload(format!(
                "upload of {}x{} needs {} bytes, got {}",
                region.width,
                region.height,
                region.rgba_len(),
                pixels.len()
            )));
        }

        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: region.x,
                    y: region.y,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            pixels,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * region.width),
                rows_per_image: Some(region.height),
            },
            wgpu::Extent3d {
                width: region.width,
                height: region.height,
                depth_or_array_layers: 1,
            },
        );

        Ok(())
    }

    fn set_filtering(&self, _texture: &RawTexture, _mode: FilterMode) {
        // Sampler state, see `WgpuBackend::sampler`
    }

    fn dispose(&self, texture: RawTexture) {
        if let Ok(texture) = texture.downcast::<WgpuTexture>() {
            texture.texture.destroy();
        }
    }

    fn max_texture_dimension(&self) -> u32 {
        self.max_dimension
    }
}
