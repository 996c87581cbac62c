// Shared fixtures for unit tests: a recording GPU backend, scripted decoders
// and image files written to temporary directories

use crate::engine::assets::{AnimationSource, GraphicsError, ImageDecoder, Quantizer, SourceFrame};
use crate::engine::renderer::{FilterMode, GpuBackend, GpuTexture, RawTexture, TextureRegion};
use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, Frame, Rgba, RgbaImage};
use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Deterministic image with many distinct colours
pub fn gradient(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        Rgba([
            (x * 7 % 256) as u8,
            (y * 13 % 256) as u8,
            ((x + y) * 5 % 256) as u8,
            255,
        ])
    })
}

pub fn write_png(dir: &Path, name: &str, image: &RgbaImage) -> PathBuf {
    let path = dir.join(name);
    image.save(&path).unwrap();
    path
}

/// Animated GIF of solid frames; frame `i` has red channel `i * 60`
pub fn write_gif(
    dir: &Path,
    name: &str,
    width: u32,
    height: u32,
    frames: u32,
    delay_ms: u32,
) -> PathBuf {
    let path = dir.join(name);
    let file = File::create(&path).unwrap();

    let mut encoder = GifEncoder::new(file);
    encoder.set_repeat(Repeat::Infinite).unwrap();
    for i in 0..frames {
        let image = RgbaImage::from_pixel(width, height, Rgba([(i * 60 % 256) as u8, 40, 200, 255]));
        let frame = Frame::from_parts(image, 0, 0, Delay::from_numer_denom_ms(delay_ms, 1));
        encoder.encode_frame(frame).unwrap();
    }
    drop(encoder);

    path
}

struct MockTexture {
    id: u64,
    width: u32,
    pixels: Mutex<Vec<u8>>,
    filter: Mutex<FilterMode>,
}

#[derive(Default)]
struct MockState {
    next_id: u64,
    live: HashSet<u64>,
    created: usize,
    disposed: usize,
    uploads: usize,
    fail_uploads: bool,
    fail_after: Option<usize>,
    dimension_queries: usize,
}

struct MockGpu {
    max_dimension: u32,
    state: Mutex<MockState>,
}

/// In-memory `GpuBackend` that records every call
#[derive(Clone)]
pub struct MockBackend {
    inner: Arc<MockGpu>,
}

impl MockBackend {
    pub fn new(max_dimension: u32) -> Self {
        Self {
            inner: Arc::new(MockGpu {
                max_dimension,
                state: Mutex::new(MockState::default()),
            }),
        }
    }

    pub fn backend(&self) -> Arc<dyn GpuBackend> {
        self.inner.clone()
    }

    pub fn live_textures(&self) -> usize {
        self.inner.state.lock().unwrap().live.len()
    }

    pub fn created(&self) -> usize {
        self.inner.state.lock().unwrap().created
    }

    pub fn disposed(&self) -> usize {
        self.inner.state.lock().unwrap().disposed
    }

    pub fn dimension_queries(&self) -> usize {
        self.inner.state.lock().unwrap().dimension_queries
    }

    /// Make every upload fail
    pub fn fail_uploads(&self, fail: bool) {
        self.inner.state.lock().unwrap().fail_uploads = fail;
    }

    /// Let `count` more uploads succeed, then fail the rest
    pub fn fail_after_uploads(&self, count: usize) {
        let mut state = self.inner.state.lock().unwrap();
        state.fail_after = Some(state.uploads + count);
    }

    pub fn pixels_of(&self, texture: &GpuTexture) -> Option<Vec<u8>> {
        texture
            .raw::<MockTexture>()
            .map(|raw| raw.pixels.lock().unwrap().clone())
    }

    pub fn filter_of(&self, texture: &GpuTexture) -> Option<FilterMode> {
        texture
            .raw::<MockTexture>()
            .map(|raw| *raw.filter.lock().unwrap())
    }
}

fn mock_texture(texture: &RawTexture) -> Result<&MockTexture, GraphicsError> {
    texture
        .as_ref()
        .downcast_ref::<MockTexture>()
        .ok_or_else(|| GraphicsError::Upload("foreign texture".into()))
}

impl GpuBackend for MockGpu {
    fn create_texture(&self, width: u32, height: u32, label: &str) -> Result<RawTexture, GraphicsError> {
        if width > self.max_dimension || height > self.max_dimension {
            return Err(GraphicsError::Upload(format!(
                "{label}: {width}x{height} over mock limit {}",
                self.max_dimension
            )));
        }

        let mut state = self.state.lock().unwrap();
        let id = state.next_id;
        state.next_id += 1;
        state.created += 1;
        state.live.insert(id);

        Ok(Box::new(MockTexture {
            id,
            width,
            pixels: Mutex::new(vec![0; TextureRegion::full(width, height).rgba_len()]),
            filter: Mutex::new(FilterMode::default()),
        }))
    }

    fn upload(&self, texture: &RawTexture, pixels: &[u8], region: TextureRegion) -> Result<(), GraphicsError> {
        {
            let mut state = self.state.lock().unwrap();
            state.uploads += 1;
            let over = state.fail_after.is_some_and(|limit| state.uploads > limit);
            if state.fail_uploads || over {
                return Err(GraphicsError::Upload("mock upload rejected".into()));
            }
        }

        let target = mock_texture(texture)?;
        let mut dest = target.pixels.lock().unwrap();
        let row_len = region.width as usize * 4;
        for row in 0..region.height as usize {
            let src = &pixels[row * row_len..(row + 1) * row_len];
            let start = ((region.y as usize + row) * target.width as usize + region.x as usize) * 4;
            dest[start..start + row_len].copy_from_slice(src);
        }
        Ok(())
    }

    fn set_filtering(&self, texture: &RawTexture, mode: FilterMode) {
        if let Ok(target) = mock_texture(texture) {
            *target.filter.lock().unwrap() = mode;
        }
    }

    fn dispose(&self, texture: RawTexture) {
        let target = mock_texture(&texture).unwrap();
        let mut state = self.state.lock().unwrap();
        assert!(state.live.remove(&target.id), "texture {} disposed twice", target.id);
        state.disposed += 1;
    }

    fn max_texture_dimension(&self) -> u32 {
        self.state.lock().unwrap().dimension_queries += 1;
        self.max_dimension
    }
}

/// Decoder producing solid frames whose red channel is the frame index
#[derive(Debug, Clone)]
pub struct ScriptedDecoder {
    frames: usize,
    size: (u32, u32),
    delay: Option<Duration>,
    frame_time: Duration,
    fail_at: Option<usize>,
}

impl ScriptedDecoder {
    pub fn new(frames: usize) -> Self {
        Self {
            frames,
            size: (4, 4),
            delay: None,
            frame_time: Duration::ZERO,
            fail_at: None,
        }
    }

    /// Time spent "decoding" each frame
    pub fn with_frame_time(mut self, frame_time: Duration) -> Self {
        self.frame_time = frame_time;
        self
    }

    /// Delay reported by the source for every frame
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }

    fn frame_image(&self, index: usize) -> RgbaImage {
        RgbaImage::from_pixel(self.size.0, self.size.1, Rgba([index as u8, 0, 0, 255]))
    }
}

impl ImageDecoder for ScriptedDecoder {
    fn dimensions(&self, _path: &Path) -> Result<(u32, u32), GraphicsError> {
        Ok(self.size)
    }

    fn decode(&self, _path: &Path) -> Result<RgbaImage, GraphicsError> {
        Ok(self.frame_image(0))
    }

    fn open_animation(&self, _path: &Path) -> Result<Box<dyn AnimationSource>, GraphicsError> {
        Ok(Box::new(ScriptedSource {
            script: self.clone(),
            next: 0,
        }))
    }
}

struct ScriptedSource {
    script: ScriptedDecoder,
    next: usize,
}

impl AnimationSource for ScriptedSource {
    fn frame_count(&self) -> Option<usize> {
        Some(self.script.frames)
    }

    fn next_frame(&mut self) -> Option<Result<SourceFrame, GraphicsError>> {
        if self.next >= self.script.frames {
            return None;
        }

        let index = self.next;
        self.next += 1;
        thread::sleep(self.script.frame_time);

        if self.script.fail_at == Some(index) {
            return Some(Err(GraphicsError::InvalidImage {
                path: PathBuf::from("scripted"),
                reason: format!("frame {index} is corrupt"),
            }));
        }

        Some(Ok(SourceFrame {
            image: self.script.frame_image(index),
            delay: self.script.delay,
        }))
    }
}

/// Quantizer that leaves frames untouched
pub struct IdentityQuantizer;

impl Quantizer for IdentityQuantizer {
    fn quantize(&self, image: &RgbaImage) -> RgbaImage {
        image.clone()
    }
}
