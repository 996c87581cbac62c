// Splitting images larger than the GPU texture limit into a grid of textures

use super::GraphicsError;
use crate::engine::renderer::{FilterMode, GpuBackend, GpuTexture};
use glam::UVec2;
use image::{imageops, RgbaImage};
use log::{debug, info};
use std::sync::Arc;

/// Rectangle of one tile within the source image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileCell {
    pub row: usize,
    pub column: usize,
    /// Top-left corner in source pixels
    pub origin: UVec2,
    pub size: UVec2,
}

/// Row heights and column widths of a tile grid, before any upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileLayout {
    pub width: u32,
    pub height: u32,
    pub column_widths: Vec<u32>,
    pub row_heights: Vec<u32>,
}

impl TileLayout {
    pub fn rows(&self) -> usize {
        self.row_heights.len()
    }

    pub fn columns(&self) -> usize {
        self.column_widths.len()
    }

    pub fn tile_count(&self) -> usize {
        self.rows() * self.columns()
    }

    /// Cells in row-major order, top-to-bottom then left-to-right
    pub fn cells(&self) -> impl Iterator<Item = TileCell> + '_ {
        let mut y = 0;
        self.row_heights
            .iter()
            .enumerate()
            .flat_map(move |(row, &height)| {
                let top = y;
                y += height;
                let mut x = 0;
                self.column_widths
                    .iter()
                    .enumerate()
                    .map(move |(column, &width)| {
                        let left = x;
                        x += width;
                        TileCell {
                            row,
                            column,
                            origin: UVec2::new(left, top),
                            size: UVec2::new(width, height),
                        }
                    })
            })
    }
}

/// Split `width` x `height` into tiles no larger than `max_dim` on either side.
///
/// Every full tile is exactly `max_dim`; only the last row and column absorb
/// the remainder, and exact multiples produce no empty trailing tile.
pub fn plan_tiles(width: u32, height: u32, max_dim: u32) -> TileLayout {
    let max_dim = max_dim.max(1);

    let split = |extent: u32| -> Vec<u32> {
        let count = extent.div_ceil(max_dim);
        let mut remaining = extent;
        (0..count)
            .map(|_| {
                let part = remaining.min(max_dim);
                remaining -= part;
                part
            })
            .collect()
    };

    TileLayout {
        width,
        height,
        column_widths: split(width),
        row_heights: split(height),
    }
}

/// One texture of a tile grid
#[derive(Debug)]
pub struct Tile {
    pub texture: GpuTexture,
    /// Top-left corner within the full image
    pub origin: UVec2,
}

impl Tile {
    pub fn size(&self) -> UVec2 {
        self.texture.size()
    }
}

/// An image stored as rows of textures.
///
/// Column widths sum to `width` in every row and row heights sum to
/// `height`. Dropping the grid releases every tile.
#[derive(Debug)]
pub struct TileGrid {
    width: u32,
    height: u32,
    rows: Vec<Vec<Tile>>,
}

impl TileGrid {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Overall size of the untiled image
    pub fn size(&self) -> UVec2 {
        UVec2::new(self.width, self.height)
    }

    pub fn rows(&self) -> usize {
        self.rows.len()
    }

    pub fn columns(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    /// True when the image fit into one texture
    pub fn is_single(&self) -> bool {
        self.rows() == 1 && self.columns() == 1
    }

    pub fn tile(&self, row: usize, column: usize) -> Option<&Tile> {
        self.rows.get(row).and_then(|tiles| tiles.get(column))
    }

    pub fn row(&self, row: usize) -> Option<&[Tile]> {
        self.rows.get(row).map(Vec::as_slice)
    }

    /// All tiles in row-major order, with their placement
    pub fn tiles(&self) -> impl Iterator<Item = &Tile> {
        self.rows.iter().flatten()
    }

    /// Switch filtering on every tile
    pub fn set_filter(&self, mode: FilterMode) {
        for tile in self.tiles() {
            tile.texture.set_filter(mode);
        }
    }

    /// Estimated GPU memory held by all tiles in bytes
    pub fn vram_size(&self) -> usize {
        self.tiles().map(|tile| tile.texture.vram_size()).sum()
    }
}

/// Upload `image` as a grid of textures no larger than `max_dim`.
///
/// Any failed upload aborts the whole grid; tiles created so far are
/// released and no partial grid is returned.
pub fn tile_image(
    backend: &Arc<dyn GpuBackend>,
    image: &RgbaImage,
    max_dim: u32,
    filter: FilterMode,
    label: &str,
) -> Result<TileGrid, GraphicsError> {
    let (width, height) = image.dimensions();
    let layout = plan_tiles(width, height, max_dim);

    if layout.tile_count() == 0 {
        return Err(GraphicsError::Upload(format!(
            "{label}: cannot tile an empty {width}x{height} image"
        )));
    }

    if layout.tile_count() == 1 {
        let texture = GpuTexture::from_image(backend, image, filter, label)?;
        return Ok(TileGrid {
            width,
            height,
            rows: vec![vec![Tile {
                texture,
                origin: UVec2::ZERO,
            }]],
        });
    }

    info!(
        "{}x{} image cut into {} by {} pieces",
        width,
        height,
        layout.columns(),
        layout.rows()
    );

    let mut rows: Vec<Vec<Tile>> = (0..layout.rows())
        .map(|_| Vec::with_capacity(layout.columns()))
        .collect();

    for cell in layout.cells() {
        let part = imageops::crop_imm(image, cell.origin.x, cell.origin.y, cell.size.x, cell.size.y)
            .to_image();
        debug!(
            "{}: tile [{}, {}] {}x{} at {:?}",
            label, cell.row, cell.column, cell.size.x, cell.size.y, cell.origin
        );

        let tile_label = format!("{} [{}, {}]", label, cell.row, cell.column);
        let texture = GpuTexture::from_image(backend, &part, filter, &tile_label)?;
        rows[cell.row].push(Tile {
            texture,
            origin: cell.origin,
        });
    }

    Ok(TileGrid {
        width,
        height,
        rows,
    })
}
