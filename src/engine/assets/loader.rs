// Image decoding on top of the `image` crate

use super::GraphicsError;
use crate::engine::config::DecodeLimits;
use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, GenericImageView, ImageFormat, RgbaImage};
use log::debug;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One decoded frame of a multi-frame source
#[derive(Debug, Clone)]
pub struct SourceFrame {
    /// Full-canvas RGBA pixels
    pub image: RgbaImage,
    /// Display time stored in the source, if any
    pub delay: Option<Duration>,
}

/// Sequential access to the frames of a multi-frame source.
///
/// Frames are produced in source order. Implementations are created and
/// consumed on the animation worker thread, so they need not be `Send`.
pub trait AnimationSource {
    /// Total frame count, when the container announces it up front
    fn frame_count(&self) -> Option<usize>;

    /// Decode the next frame, `None` once the source is exhausted
    fn next_frame(&mut self) -> Option<Result<SourceFrame, GraphicsError>>;
}

/// Bitmap decoding collaborator used by `Graphics`
pub trait ImageDecoder: Send + Sync {
    /// Read the image size without decoding pixel data
    fn dimensions(&self, path: &Path) -> Result<(u32, u32), GraphicsError>;

    /// Decode a still image (the first frame of animated sources) to RGBA8
    fn decode(&self, path: &Path) -> Result<RgbaImage, GraphicsError>;

    /// Open a source for frame-by-frame decoding
    fn open_animation(&self, path: &Path) -> Result<Box<dyn AnimationSource>, GraphicsError>;
}

/// Decoder reading image files from disk
#[derive(Debug, Clone)]
pub struct ImageLoader {
    base_path: Option<PathBuf>,
    limits: DecodeLimits,
}

impl ImageLoader {
    /// Create a loader resolving relative paths against `base_path`
    pub fn new(base_path: Option<PathBuf>, limits: DecodeLimits) -> Self {
        Self { base_path, limits }
    }

    /// Get the full path for an image
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        match &self.base_path {
            Some(base) => base.join(path),
            None => path.to_path_buf(),
        }
    }

    /// Get the base path
    pub fn base_path(&self) -> Option<&Path> {
        self.base_path.as_deref()
    }

    fn read(&self, path: &Path) -> Result<(PathBuf, Vec<u8>), GraphicsError> {
        let full_path = self.resolve_path(path);
        let bytes = std::fs::read(&full_path)?;
        Ok((full_path, bytes))
    }

    fn check_limits(&self, path: &Path, width: u32, height: u32) -> Result<(), GraphicsError> {
        if self.limits.allows(width, height) {
            Ok(())
        } else {
            Err(GraphicsError::InvalidImage {
                path: path.to_path_buf(),
                reason: format!("{width}x{height} exceeds the decoder limits"),
            })
        }
    }

    fn decode_bytes(&self, path: &Path, bytes: &[u8]) -> Result<RgbaImage, GraphicsError> {
        let mut reader = image::io::Reader::new(Cursor::new(bytes)).with_guessed_format()?;
        reader.limits(self.limits.to_image_limits());

        let image = reader.decode().map_err(|source| GraphicsError::Decode {
            path: path.to_path_buf(),
            source,
        })?;

        let (width, height) = image.dimensions();
        self.check_limits(path, width, height)?;
        Ok(image.to_rgba8())
    }
}

impl Default for ImageLoader {
    fn default() -> Self {
        Self::new(None, DecodeLimits::default())
    }
}

impl ImageDecoder for ImageLoader {
    fn dimensions(&self, path: &Path) -> Result<(u32, u32), GraphicsError> {
        let full_path = self.resolve_path(path);
        // Sniff the format from the content, as `decode` does
        image::io::Reader::open(&full_path)?
            .with_guessed_format()?
            .into_dimensions()
            .map_err(|source| GraphicsError::Decode {
                path: full_path,
                source,
            })
    }

    fn decode(&self, path: &Path) -> Result<RgbaImage, GraphicsError> {
        let (full_path, bytes) = self.read(path)?;
        let image = self.decode_bytes(&full_path, &bytes)?;
        debug!(
            "Decoded {} ({}x{})",
            full_path.display(),
            image.width(),
            image.height()
        );
        Ok(image)
    }

    fn open_animation(&self, path: &Path) -> Result<Box<dyn AnimationSource>, GraphicsError> {
        let (full_path, bytes) = self.read(path)?;

        let format = image::guess_format(&bytes).map_err(|source| GraphicsError::Decode {
            path: full_path.clone(),
            source,
        })?;

        match format {
            ImageFormat::Gif => Ok(Box::new(GifSource::new(full_path, bytes, self)?)),
            _ => {
                debug!(
                    "{} is not multi-frame ({:?}), loading as a single frame",
                    full_path.display(),
                    format
                );
                let image = self.decode_bytes(&full_path, &bytes)?;
                Ok(Box::new(StillSource { image: Some(image) }))
            }
        }
    }
}

/// Frames of an animated GIF, decoded lazily
struct GifSource {
    path: PathBuf,
    frames: image::Frames<'static>,
}

impl GifSource {
    fn new(path: PathBuf, bytes: Vec<u8>, loader: &ImageLoader) -> Result<Self, GraphicsError> {
        let decoder = GifDecoder::new(Cursor::new(bytes)).map_err(|source| GraphicsError::Decode {
            path: path.clone(),
            source,
        })?;

        let (width, height) = image::ImageDecoder::dimensions(&decoder);
        loader.check_limits(&path, width, height)?;

        Ok(Self {
            path,
            frames: decoder.into_frames(),
        })
    }
}

impl AnimationSource for GifSource {
    fn frame_count(&self) -> Option<usize> {
        // GIF has no frame count in its header
        None
    }

    fn next_frame(&mut self) -> Option<Result<SourceFrame, GraphicsError>> {
        let frame = self.frames.next()?;
        Some(
            frame
                .map(|frame| {
                    let (numer, denom) = frame.delay().numer_denom_ms();
                    let delay = (denom > 0).then(|| {
                        Duration::from_micros(u64::from(numer) * 1000 / u64::from(denom))
                    });
                    SourceFrame {
                        image: frame.into_buffer(),
                        delay,
                    }
                })
                .map_err(|source| GraphicsError::Decode {
                    path: self.path.clone(),
                    source,
                }),
        )
    }
}

/// Single-frame stand-in for still images requested as animations
struct StillSource {
    image: Option<RgbaImage>,
}

impl AnimationSource for StillSource {
    fn frame_count(&self) -> Option<usize> {
        Some(1)
    }

    fn next_frame(&mut self) -> Option<Result<SourceFrame, GraphicsError>> {
        self.image
            .take()
            .map(|image| Ok(SourceFrame { image, delay: None }))
    }
}
