//! Tile (bucket) scheduling.
//!
//! Divides the render region into tiles that worker threads claim one at a
//! time. The visiting order is fixed up front, so a given region and tile
//! size always produce the same sequence.

use std::sync::Mutex;

use bif_math::PixelRect;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::config::TileConfig;
use crate::context::RenderContext;

/// Default tile size in pixels.
pub const DEFAULT_TILE_SIZE: i32 = 64;

/// Tiles are only split at the end of a pass if the quarters stay at least
/// this large.
pub const MIN_TILE_SIZE: i32 = 8;

/// Order in which tiles are handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TileOrder {
    /// Row-major, top-left first.
    Linear,
    /// Centre outward, so the most important part of the frame shows first.
    #[default]
    Spiral,
    /// Shuffled with a seed derived from the region and tile size.
    Random,
}

/// A rectangular unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    /// Position of this tile in the visiting order
    pub index: usize,
    /// X coordinate of the tile's top-left corner (image space)
    pub x: i32,
    /// Y coordinate of the tile's top-left corner (image space)
    pub y: i32,
    pub width: i32,
    pub height: i32,
    /// Tile inset by the filter border: pixels here only receive samples
    /// from inside this tile.
    pub sampling: PixelRect,
}

impl Tile {
    fn new(x: i32, y: i32, width: i32, height: i32, border: i32) -> Self {
        let rect = PixelRect::from_size(x, y, width, height);
        Self {
            index: 0,
            x,
            y,
            width,
            height,
            sampling: rect.inset(border),
        }
    }

    /// Tile rectangle in image coordinates.
    pub fn rect(&self) -> PixelRect {
        PixelRect::from_size(self.x, self.y, self.width, self.height)
    }

    pub fn pixel_count(&self) -> usize {
        self.rect().area()
    }
}

/// Generate the tiles covering `region` in visiting order.
///
/// `threads > 1` splits the last `threads` tiles into quarters so the
/// workers run out of work at about the same time.
pub fn generate_tiles(
    region: PixelRect,
    tile_size: i32,
    order: TileOrder,
    threads: usize,
    border: i32,
) -> Vec<Tile> {
    if region.is_empty() {
        return Vec::new();
    }

    // Single tile covering the whole region
    if tile_size <= 0 || (tile_size >= region.width() && tile_size >= region.height()) {
        return vec![Tile::new(region.x0, region.y0, region.width(), region.height(), border)];
    }

    let mut tiles = Vec::new();
    let mut y = region.y0;
    while y < region.y1 {
        let mut x = region.x0;
        while x < region.x1 {
            let tw = tile_size.min(region.x1 - x);
            let th = tile_size.min(region.y1 - y);
            tiles.push(Tile::new(x, y, tw, th, border));
            x += tile_size;
        }
        y += tile_size;
    }

    match order {
        TileOrder::Linear => {}
        TileOrder::Spiral => sort_spiral(&mut tiles, region),
        TileOrder::Random => {
            let seed = (region.width() as u64) << 40
                ^ (region.height() as u64) << 20
                ^ tile_size as u64;
            tiles.shuffle(&mut StdRng::seed_from_u64(seed));
        }
    }

    if threads > 1 {
        split_tail(&mut tiles, threads, border);
    }

    for (i, tile) in tiles.iter_mut().enumerate() {
        tile.index = i;
    }
    tiles
}

/// Sort tiles by distance from the region centre. Ties keep row-major order.
fn sort_spiral(tiles: &mut [Tile], region: PixelRect) {
    let (center_x, center_y) = region.center();
    let dist = |t: &Tile| {
        let (x, y) = t.rect().center();
        (x - center_x).powi(2) + (y - center_y).powi(2)
    };
    tiles.sort_by(|a, b| {
        dist(a)
            .partial_cmp(&dist(b))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Replace each of the last `count` tiles by its four quarters.
fn split_tail(tiles: &mut Vec<Tile>, count: usize, border: i32) {
    let start = tiles.len().saturating_sub(count);
    let tail: Vec<Tile> = tiles.drain(start..).collect();
    for tile in tail {
        if tile.width < 2 * MIN_TILE_SIZE || tile.height < 2 * MIN_TILE_SIZE {
            tiles.push(tile);
            continue;
        }
        let w0 = tile.width / 2;
        let h0 = tile.height / 2;
        let (w1, h1) = (tile.width - w0, tile.height - h0);
        tiles.push(Tile::new(tile.x, tile.y, w0, h0, border));
        tiles.push(Tile::new(tile.x + w0, tile.y, w1, h0, border));
        tiles.push(Tile::new(tile.x, tile.y + h0, w0, h1, border));
        tiles.push(Tile::new(tile.x + w0, tile.y + h0, w1, h1, border));
    }
}

/// Hands out each tile exactly once to any number of threads.
pub struct TileScheduler<'ctx> {
    ctx: &'ctx RenderContext,
    tiles: Vec<Tile>,
    next: Mutex<usize>,
}

impl<'ctx> TileScheduler<'ctx> {
    /// Build a scheduler over `region`. `border` is the filter border used
    /// for each tile's sampling rectangle.
    pub fn new(ctx: &'ctx RenderContext, region: PixelRect, config: &TileConfig, border: i32) -> Self {
        let tiles = generate_tiles(region, config.size, config.order, config.threads, border);
        log::debug!(
            "Tile scheduler: {} tiles of {}px ({:?}) over {}x{}",
            tiles.len(),
            config.size,
            config.order,
            region.width(),
            region.height()
        );
        Self {
            ctx,
            tiles,
            next: Mutex::new(0),
        }
    }

    /// Claim the next tile, or `None` once every tile has been handed out
    /// or the render was cancelled.
    pub fn next_tile(&self) -> Option<Tile> {
        if self.ctx.is_cancelled() {
            return None;
        }
        let mut next = self.next.lock().unwrap_or_else(|e| e.into_inner());
        let tile = self.tiles.get(*next).copied()?;
        *next += 1;
        Some(tile)
    }

    /// Stop handing out tiles for the rest of this pass.
    pub fn close(&self) {
        let mut next = self.next.lock().unwrap_or_else(|e| e.into_inner());
        *next = self.tiles.len();
    }

    /// Start handing out the same tiles again from the first one.
    pub fn rewind(&self) {
        *self.next.lock().unwrap_or_else(|e| e.into_inner()) = 0;
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }
}
