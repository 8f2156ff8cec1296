//! Packed per-pixel "needs more samples" flags.

/// One bit per pixel of the render region.
#[derive(Debug, Clone)]
pub struct ResampleMask {
    width: i32,
    height: i32,
    words: Vec<u64>,
}

impl ResampleMask {
    /// Create a mask with every bit cleared.
    pub fn new(width: i32, height: i32) -> Self {
        let bits = width.max(0) as usize * height.max(0) as usize;
        Self {
            width,
            height,
            words: vec![0; bits.div_ceil(64)],
        }
    }

    #[inline]
    fn bit(&self, x: i32, y: i32) -> (usize, u64) {
        let index = (y * self.width + x) as usize;
        (index / 64, 1u64 << (index % 64))
    }

    #[inline]
    pub fn get(&self, x: i32, y: i32) -> bool {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return false;
        }
        let (word, mask) = self.bit(x, y);
        self.words[word] & mask != 0
    }

    #[inline]
    pub fn set(&mut self, x: i32, y: i32) {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return;
        }
        let (word, mask) = self.bit(x, y);
        self.words[word] |= mask;
    }

    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    pub fn set_all(&mut self) {
        self.words.fill(u64::MAX);
        // Keep the padding bits of the last word clear so count() is exact
        let bits = self.width.max(0) as usize * self.height.max(0) as usize;
        let tail = bits % 64;
        if tail != 0 {
            if let Some(last) = self.words.last_mut() {
                *last = (1u64 << tail) - 1;
            }
        }
    }

    /// Number of set bits.
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_set_get() {
        let mut mask = ResampleMask::new(10, 7);
        assert!(!mask.get(3, 4));
        mask.set(3, 4);
        assert!(mask.get(3, 4));
        assert!(!mask.get(4, 3));
        assert_eq!(mask.count(), 1);
    }

    #[test]
    fn test_mask_out_of_bounds_ignored() {
        let mut mask = ResampleMask::new(4, 4);
        mask.set(-1, 0);
        mask.set(4, 0);
        assert_eq!(mask.count(), 0);
        assert!(!mask.get(10, 10));
    }

    #[test]
    fn test_mask_set_all_exact_count() {
        let mut mask = ResampleMask::new(13, 11);
        mask.set_all();
        assert_eq!(mask.count(), 13 * 11);
        mask.clear();
        assert_eq!(mask.count(), 0);
    }
}
