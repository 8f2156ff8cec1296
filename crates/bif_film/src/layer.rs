//! Per-layer accumulation buffers.
//!
//! Every render layer (combined image, depth, normals, ...) owns one
//! [`LayerBuffer`]: a dense grid of [`PixelCell`]s sized to the film's
//! render region. The backing storage is picked when the layer is created
//! and all accumulation goes through the small [`PixelStore`] interface.

use bif_math::Rgba;
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Identifier of a render layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LayerId {
    /// Final beauty image. Always present, always first.
    Combined,
    Diffuse,
    Specular,
    Emission,
    Albedo,
    /// Normalized camera depth.
    Depth,
    /// Shading normal encoded as `(n + 1) / 2`.
    Normal,
    ObjectIndex,
    ObjectMask,
    /// Internal sample-count layer: fraction of the maximum possible
    /// samples each pixel received.
    AaSamples,
}

impl LayerId {
    pub const COUNT: usize = 10;

    pub const ALL: [LayerId; LayerId::COUNT] = [
        LayerId::Combined,
        LayerId::Diffuse,
        LayerId::Specular,
        LayerId::Emission,
        LayerId::Albedo,
        LayerId::Depth,
        LayerId::Normal,
        LayerId::ObjectIndex,
        LayerId::ObjectMask,
        LayerId::AaSamples,
    ];

    /// Stable numeric code used in checkpoint files.
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<LayerId> {
        LayerId::ALL.get(code as usize).copied()
    }

    #[inline]
    pub(crate) fn slot(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            LayerId::Combined => "combined",
            LayerId::Diffuse => "diffuse",
            LayerId::Specular => "specular",
            LayerId::Emission => "emission",
            LayerId::Albedo => "albedo",
            LayerId::Depth => "depth",
            LayerId::Normal => "normal",
            LayerId::ObjectIndex => "object_index",
            LayerId::ObjectMask => "object_mask",
            LayerId::AaSamples => "aa_samples",
        }
    }

    /// Colour an unrendered (`weight == 0`) pixel normalizes to.
    pub fn default_color(self) -> Rgba {
        match self {
            LayerId::Combined => Rgba::ZERO,
            LayerId::Normal => Rgba::new(0.5, 0.5, 1.0, 1.0),
            _ => Rgba::new(0.0, 0.0, 0.0, 1.0),
        }
    }

    /// Data layers carry non-radiometric values and skip the sample clamp.
    pub fn is_data(self) -> bool {
        matches!(
            self,
            LayerId::Depth
                | LayerId::Normal
                | LayerId::ObjectIndex
                | LayerId::ObjectMask
                | LayerId::AaSamples
        )
    }

    /// Layers whose alpha carries no information.
    pub fn is_opaque(self) -> bool {
        matches!(
            self,
            LayerId::Depth | LayerId::Normal | LayerId::ObjectIndex | LayerId::AaSamples
        )
    }
}

impl std::fmt::Display for LayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One colour per layer for a single sample or output pixel.
///
/// Fixed-size so the hot sample path never allocates.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LayerColors {
    colors: [Option<Rgba>; LayerId::COUNT],
}

impl LayerColors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`LayerColors::set`].
    pub fn with(mut self, layer: LayerId, color: Rgba) -> Self {
        self.set(layer, color);
        self
    }

    #[inline]
    pub fn set(&mut self, layer: LayerId, color: Rgba) {
        self.colors[layer.slot()] = Some(color);
    }

    #[inline]
    pub fn get(&self, layer: LayerId) -> Option<Rgba> {
        self.colors[layer.slot()]
    }

    pub fn clear(&mut self) {
        self.colors = [None; LayerId::COUNT];
    }

    pub fn is_empty(&self) -> bool {
        self.colors.iter().all(Option::is_none)
    }

    /// Iterate the layers that carry a colour.
    pub fn iter(&self) -> impl Iterator<Item = (LayerId, Rgba)> + '_ {
        LayerId::ALL
            .iter()
            .filter_map(move |&id| self.colors[id.slot()].map(|c| (id, c)))
    }
}

/// A single accumulation cell: weighted colour sum plus weight sum.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct PixelCell {
    pub color: [f32; 4],
    pub weight: f32,
}

impl PixelCell {
    pub fn new(color: Rgba, weight: f32) -> Self {
        Self {
            color: color.to_array(),
            weight,
        }
    }

    #[inline]
    pub fn color(&self) -> Rgba {
        Rgba::from_array(self.color)
    }

    /// `color / weight`, or `default` for an unrendered cell.
    #[inline]
    pub fn normalized(&self, default: Rgba) -> Rgba {
        if self.weight > 0.0 {
            self.color() / self.weight
        } else {
            default
        }
    }
}

/// Minimal capability interface every storage variant implements.
pub trait PixelStore {
    fn len(&self) -> usize;
    fn get(&self, index: usize) -> PixelCell;
    fn set(&mut self, index: usize, cell: PixelCell);
    fn add(&mut self, index: usize, color: Rgba, weight: f32);
    fn clear(&mut self);

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Full RGBA + weight storage.
#[derive(Debug, Clone)]
pub struct RgbaStore {
    cells: Vec<PixelCell>,
}

impl PixelStore for RgbaStore {
    fn len(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    fn get(&self, index: usize) -> PixelCell {
        self.cells[index]
    }

    #[inline]
    fn set(&mut self, index: usize, cell: PixelCell) {
        self.cells[index] = cell;
    }

    #[inline]
    fn add(&mut self, index: usize, color: Rgba, weight: f32) {
        let cell = &mut self.cells[index];
        cell.color = (Rgba::from_array(cell.color) + color).to_array();
        cell.weight += weight;
    }

    fn clear(&mut self) {
        self.cells.fill(PixelCell::default());
    }
}

/// RGB + weight storage for layers without meaningful alpha.
///
/// Alpha is reported equal to the weight, so it always normalizes to 1.
#[derive(Debug, Clone)]
pub struct OpaqueStore {
    cells: Vec<[f32; 4]>,
}

impl PixelStore for OpaqueStore {
    fn len(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    fn get(&self, index: usize) -> PixelCell {
        let [r, g, b, w] = self.cells[index];
        PixelCell {
            color: [r, g, b, w],
            weight: w,
        }
    }

    #[inline]
    fn set(&mut self, index: usize, cell: PixelCell) {
        let [r, g, b, _] = cell.color;
        self.cells[index] = [r, g, b, cell.weight];
    }

    #[inline]
    fn add(&mut self, index: usize, color: Rgba, weight: f32) {
        let cell = &mut self.cells[index];
        cell[0] += color.x;
        cell[1] += color.y;
        cell[2] += color.z;
        cell[3] += weight;
    }

    fn clear(&mut self) {
        self.cells.fill([0.0; 4]);
    }
}

/// Storage variant chosen at layer creation time.
#[derive(Debug, Clone)]
pub enum LayerStorage {
    Rgba(RgbaStore),
    Opaque(OpaqueStore),
}

impl LayerStorage {
    pub fn rgba(len: usize) -> Self {
        LayerStorage::Rgba(RgbaStore {
            cells: vec![PixelCell::default(); len],
        })
    }

    pub fn opaque(len: usize) -> Self {
        LayerStorage::Opaque(OpaqueStore {
            cells: vec![[0.0; 4]; len],
        })
    }

    fn store(&self) -> &dyn PixelStore {
        match self {
            LayerStorage::Rgba(s) => s,
            LayerStorage::Opaque(s) => s,
        }
    }

    fn store_mut(&mut self) -> &mut dyn PixelStore {
        match self {
            LayerStorage::Rgba(s) => s,
            LayerStorage::Opaque(s) => s,
        }
    }
}

impl PixelStore for LayerStorage {
    fn len(&self) -> usize {
        self.store().len()
    }

    #[inline]
    fn get(&self, index: usize) -> PixelCell {
        self.store().get(index)
    }

    #[inline]
    fn set(&mut self, index: usize, cell: PixelCell) {
        self.store_mut().set(index, cell)
    }

    #[inline]
    fn add(&mut self, index: usize, color: Rgba, weight: f32) {
        self.store_mut().add(index, color, weight)
    }

    fn clear(&mut self) {
        self.store_mut().clear()
    }
}

/// Accumulation grid for one layer.
///
/// Coordinates are relative to the film's render region.
#[derive(Debug, Clone)]
pub struct LayerBuffer {
    id: LayerId,
    width: i32,
    height: i32,
    storage: LayerStorage,
}

impl LayerBuffer {
    /// Create an empty buffer. `compact` selects [`OpaqueStore`] for layers
    /// that have no alpha; the sample-count layer always uses it.
    pub fn new(id: LayerId, width: i32, height: i32, compact: bool) -> Self {
        let len = width.max(0) as usize * height.max(0) as usize;
        let storage = if id == LayerId::AaSamples || (compact && id.is_opaque()) {
            LayerStorage::opaque(len)
        } else {
            LayerStorage::rgba(len)
        };
        Self {
            id,
            width,
            height,
            storage,
        }
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn storage(&self) -> &LayerStorage {
        &self.storage
    }

    #[inline]
    fn index(&self, x: i32, y: i32) -> usize {
        debug_assert!(x >= 0 && x < self.width && y >= 0 && y < self.height);
        (y * self.width + x) as usize
    }

    #[inline]
    pub fn cell(&self, x: i32, y: i32) -> PixelCell {
        self.storage.get(self.index(x, y))
    }

    #[inline]
    pub fn set_cell(&mut self, x: i32, y: i32, cell: PixelCell) {
        let index = self.index(x, y);
        self.storage.set(index, cell);
    }

    /// Add a filter-weighted contribution.
    #[inline]
    pub fn add(&mut self, x: i32, y: i32, color: Rgba, weight: f32) {
        let index = self.index(x, y);
        self.storage.add(index, color * weight, weight);
    }

    /// Add a sample-count contribution; the weight is pinned at 1.
    pub fn add_count(&mut self, x: i32, y: i32, color: Rgba) {
        let index = self.index(x, y);
        let mut cell = self.storage.get(index);
        cell.color = (cell.color() + color).to_array();
        cell.weight = 1.0;
        self.storage.set(index, cell);
    }

    /// Normalized colour of a pixel, default colour when unrendered.
    #[inline]
    pub fn normalized(&self, x: i32, y: i32) -> Rgba {
        self.cell(x, y).normalized(self.id.default_color())
    }

    pub fn clear(&mut self) {
        self.storage.clear();
    }

    /// Row-major copy of every cell.
    pub fn cells(&self) -> Vec<PixelCell> {
        (0..self.storage.len()).map(|i| self.storage.get(i)).collect()
    }

    /// Sum another buffer of the same layer and size into this one.
    ///
    /// The sample-count layer keeps its weight pinned at 1.
    pub fn merge(&mut self, other: &LayerBuffer) {
        debug_assert_eq!(self.id, other.id);
        debug_assert_eq!(self.storage.len(), other.storage.len());
        for index in 0..self.storage.len() {
            let src = other.storage.get(index);
            if src.weight <= 0.0 && src.color() == Rgba::ZERO {
                continue;
            }
            if self.id == LayerId::AaSamples {
                let mut cell = self.storage.get(index);
                cell.color = (cell.color() + src.color()).to_array();
                cell.weight = 1.0;
                self.storage.set(index, cell);
            } else {
                self.storage.add(index, src.color(), src.weight);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_codes_roundtrip() {
        for id in LayerId::ALL {
            assert_eq!(LayerId::from_code(id.code()), Some(id));
        }
        assert_eq!(LayerId::from_code(99), None);
    }

    #[test]
    fn test_layer_colors() {
        let colors = LayerColors::new()
            .with(LayerId::Combined, Rgba::ONE)
            .with(LayerId::Depth, Rgba::new(0.5, 0.5, 0.5, 1.0));

        assert_eq!(colors.get(LayerId::Combined), Some(Rgba::ONE));
        assert_eq!(colors.get(LayerId::Normal), None);
        assert_eq!(colors.iter().count(), 2);
        assert!(!colors.is_empty());
        assert!(LayerColors::new().is_empty());
    }

    #[test]
    fn test_unrendered_pixel_uses_default() {
        let buffer = LayerBuffer::new(LayerId::Normal, 4, 4, true);
        assert_eq!(buffer.normalized(1, 1), LayerId::Normal.default_color());
        assert_eq!(buffer.cell(1, 1).weight, 0.0);
    }

    #[test]
    fn test_rgba_accumulate_and_normalize() {
        let mut buffer = LayerBuffer::new(LayerId::Combined, 4, 4, true);
        buffer.add(2, 1, Rgba::new(1.0, 0.0, 0.0, 1.0), 0.5);
        buffer.add(2, 1, Rgba::new(0.0, 1.0, 0.0, 1.0), 0.5);

        let cell = buffer.cell(2, 1);
        assert!((cell.weight - 1.0).abs() < 0.0001);
        let c = buffer.normalized(2, 1);
        assert!((c.x - 0.5).abs() < 0.0001);
        assert!((c.y - 0.5).abs() < 0.0001);
        assert!((c.w - 1.0).abs() < 0.0001);
    }

    #[test]
    fn test_normalization_idempotent() {
        let mut buffer = LayerBuffer::new(LayerId::Combined, 2, 2, false);
        buffer.add(0, 0, Rgba::new(0.3, 0.6, 0.9, 1.0), 2.5);
        let once = buffer.normalized(0, 0);

        // Write back with weight 1 and normalize again
        buffer.set_cell(0, 0, PixelCell::new(once, 1.0));
        assert_eq!(buffer.normalized(0, 0), once);
    }

    #[test]
    fn test_opaque_store_alpha_is_one() {
        let mut buffer = LayerBuffer::new(LayerId::Depth, 2, 2, true);
        assert!(matches!(buffer.storage(), LayerStorage::Opaque(_)));

        buffer.add(0, 0, Rgba::new(0.25, 0.25, 0.25, 0.0), 3.0);
        let c = buffer.normalized(0, 0);
        assert!((c.x - 0.25).abs() < 0.0001);
        assert!((c.w - 1.0).abs() < 0.0001);

        // Non-compact configuration keeps full storage
        let full = LayerBuffer::new(LayerId::Depth, 2, 2, false);
        assert!(matches!(full.storage(), LayerStorage::Rgba(_)));
    }

    #[test]
    fn test_sample_count_weight_pinned() {
        let mut buffer = LayerBuffer::new(LayerId::AaSamples, 2, 2, false);
        for _ in 0..4 {
            buffer.add_count(1, 1, Rgba::new(0.125, 0.125, 0.125, 0.0));
        }
        let cell = buffer.cell(1, 1);
        assert_eq!(cell.weight, 1.0);
        assert!((buffer.normalized(1, 1).x - 0.5).abs() < 0.0001);
    }

    #[test]
    fn test_merge_adds_weights() {
        let mut a = LayerBuffer::new(LayerId::Combined, 2, 1, false);
        let mut b = LayerBuffer::new(LayerId::Combined, 2, 1, false);
        a.add(0, 0, Rgba::ONE, 1.0);
        b.add(0, 0, Rgba::ONE, 2.0);
        b.add(1, 0, Rgba::ONE, 0.5);

        a.merge(&b);
        assert!((a.cell(0, 0).weight - 3.0).abs() < 0.0001);
        assert!((a.cell(1, 0).weight - 0.5).abs() < 0.0001);
    }

    #[test]
    fn test_clear_keeps_size() {
        let mut buffer = LayerBuffer::new(LayerId::Combined, 3, 2, false);
        buffer.add(2, 1, Rgba::ONE, 1.0);
        buffer.clear();
        assert_eq!(buffer.cells().len(), 6);
        assert!(buffer.cells().iter().all(|c| c.weight == 0.0));
    }
}
