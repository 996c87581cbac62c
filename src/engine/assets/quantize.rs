// Palette reduction for animation frames

use crate::engine::config::QuantizerConfig;
use color_quant::NeuQuant;
use image::RgbaImage;

/// Maps a frame onto a reduced palette before upload.
///
/// Treated as a pure function of the input image.
pub trait Quantizer: Send + Sync {
    fn quantize(&self, image: &RgbaImage) -> RgbaImage;
}

/// NeuQuant neural-net quantizer
#[derive(Debug, Clone, Copy)]
pub struct NeuQuantizer {
    max_colors: usize,
    depth: u8,
    sample_factor: i32,
}

impl NeuQuantizer {
    /// Create a quantizer producing at most `max_colors` colours, keeping
    /// `depth` significant bits per channel
    pub fn new(max_colors: usize, depth: u8) -> Self {
        Self::from_config(&QuantizerConfig {
            max_colors,
            depth,
            ..QuantizerConfig::default()
        })
    }

    pub fn from_config(config: &QuantizerConfig) -> Self {
        Self {
            max_colors: config.max_colors.clamp(2, 256),
            depth: config.depth.clamp(1, 8),
            sample_factor: config.sample_factor.clamp(1, 30),
        }
    }

    pub fn max_colors(&self) -> usize {
        self.max_colors
    }

    fn depth_mask(&self) -> u8 {
        0xFFu8 << (8 - self.depth)
    }
}

impl Default for NeuQuantizer {
    fn default() -> Self {
        Self::from_config(&QuantizerConfig::default())
    }
}

impl Quantizer for NeuQuantizer {
    fn quantize(&self, image: &RgbaImage) -> RgbaImage {
        let mut output = image.clone();
        if output.is_empty() {
            return output;
        }

        let mask = self.depth_mask();
        if mask != 0xFF {
            for pixel in output.pixels_mut() {
                for channel in &mut pixel.0[..3] {
                    *channel &= mask;
                }
            }
        }

        let palette = NeuQuant::new(self.sample_factor, self.max_colors, output.as_raw());

        let raw: &mut [u8] = &mut output;
        let pixels: &mut [[u8; 4]] = bytemuck::cast_slice_mut(raw);
        for pixel in pixels.iter_mut() {
            let index = palette.index_of(&pixel[..]);
            if let Some(color) = palette.lookup(index) {
                *pixel = color;
            }
        }

        output
    }
}
