//! Block partition shared by the embedder and the detector.
//!
//! The image is tiled into non-overlapping 8x8 blocks enumerated in
//! row-major order, top-left first. Border blocks may be partial when a
//! dimension is not a multiple of 8; their mean covers only the pixels they
//! contain. Both sides of the codec must enumerate blocks identically, since
//! block order is what carries bit position.

use image::GrayImage;

use crate::error::{Error, Result};

/// Side length of a block in pixels.
pub const BLOCK_SIZE: u32 = 8;

/// The block grid covering an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockGrid {
    /// Number of block rows, `ceil(height / 8)`.
    pub rows: u32,
    /// Number of block columns, `ceil(width / 8)`.
    pub cols: u32,
}

impl BlockGrid {
    /// Build the grid for an image of the given dimensions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyImage`] if either dimension is zero.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::EmptyImage { width, height });
        }
        Ok(Self {
            rows: height.div_ceil(BLOCK_SIZE),
            cols: width.div_ceil(BLOCK_SIZE),
        })
    }

    /// Build the grid covering `image`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyImage`] if the image has a zero dimension.
    pub fn for_image(image: &GrayImage) -> Result<Self> {
        Self::new(image.width(), image.height())
    }

    /// Total number of blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows as usize * self.cols as usize
    }

    /// Always false for a grid built through [`BlockGrid::new`].
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row-major index of the block containing pixel `(x, y)`.
    #[must_use]
    pub fn index_of(&self, x: u32, y: u32) -> usize {
        (y / BLOCK_SIZE) as usize * self.cols as usize + (x / BLOCK_SIZE) as usize
    }

    /// Indices of the up, down, left and right neighbours of a block, in that
    /// order. Positions outside the grid are omitted.
    pub fn neighbors(&self, index: usize) -> impl Iterator<Item = usize> {
        let cols = self.cols as usize;
        let rows = self.rows as usize;
        let (row, col) = (index / cols, index % cols);
        let up = row.checked_sub(1).map(|r| r * cols + col);
        let down = (row + 1 < rows).then_some(index + cols);
        let left = col.checked_sub(1).map(|c| row * cols + c);
        let right = (col + 1 < cols).then_some(index + 1);
        [up, down, left, right].into_iter().flatten()
    }
}

/// Mean intensity of every block, in row-major block order.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn block_means(image: &GrayImage, grid: &BlockGrid) -> Vec<f64> {
    let mut sums = vec![0u64; grid.len()];
    let mut counts = vec![0u32; grid.len()];
    for (x, y, px) in image.enumerate_pixels() {
        let idx = grid.index_of(x, y);
        sums[idx] += u64::from(px[0]);
        counts[idx] += 1;
    }
    sums.iter()
        .zip(&counts)
        .map(|(&sum, &count)| sum as f64 / f64::from(count))
        .collect()
}

/// Mean intensity of the whole image.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn global_mean(image: &GrayImage) -> f64 {
    let pixels = image.as_raw();
    if pixels.is_empty() {
        return 0.0;
    }
    let sum: u64 = pixels.iter().map(|&p| u64::from(p)).sum();
    sum as f64 / pixels.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn grid_uses_ceiling_division() {
        let grid = BlockGrid::new(643, 484).unwrap();
        assert_eq!(grid.cols, 81);
        assert_eq!(grid.rows, 61);
        assert_eq!(grid.len(), 81 * 61);

        let exact = BlockGrid::new(64, 64).unwrap();
        assert_eq!((exact.rows, exact.cols), (8, 8));
    }

    #[test]
    fn zero_dimension_is_empty_image() {
        assert!(matches!(
            BlockGrid::new(0, 10),
            Err(Error::EmptyImage {
                width: 0,
                height: 10
            })
        ));
        assert!(matches!(
            BlockGrid::new(10, 0),
            Err(Error::EmptyImage { .. })
        ));
    }

    #[test]
    fn index_is_row_major() {
        let grid = BlockGrid::new(24, 16).unwrap();
        assert_eq!(grid.index_of(0, 0), 0);
        assert_eq!(grid.index_of(7, 7), 0);
        assert_eq!(grid.index_of(8, 0), 1);
        assert_eq!(grid.index_of(23, 0), 2);
        assert_eq!(grid.index_of(0, 8), 3);
        assert_eq!(grid.index_of(23, 15), 5);
    }

    #[test]
    fn neighbors_omit_outside_positions() {
        // 3x3 grid
        let grid = BlockGrid::new(24, 24).unwrap();
        assert_eq!(grid.neighbors(4).collect::<Vec<_>>(), vec![1, 7, 3, 5]);
        assert_eq!(grid.neighbors(0).collect::<Vec<_>>(), vec![3, 1]);
        assert_eq!(grid.neighbors(8).collect::<Vec<_>>(), vec![5, 7]);
        assert_eq!(grid.neighbors(2).collect::<Vec<_>>(), vec![5, 1]);
    }

    #[test]
    fn single_block_has_no_neighbors() {
        let grid = BlockGrid::new(5, 5).unwrap();
        assert_eq!(grid.len(), 1);
        assert_eq!(grid.neighbors(0).count(), 0);
    }

    #[test]
    fn partial_blocks_average_their_own_pixels() {
        // 10x8 image: block 0 is 8x8 of 10s, block 1 is 2x8 of 40s.
        let img = GrayImage::from_fn(10, 8, |x, _| if x < 8 { Luma([10]) } else { Luma([40]) });
        let grid = BlockGrid::for_image(&img).unwrap();
        let means = block_means(&img, &grid);
        assert_eq!(means, vec![10.0, 40.0]);
    }

    #[test]
    fn global_mean_covers_all_pixels() {
        let img = GrayImage::from_fn(4, 1, |x, _| Luma([u8::try_from(x * 10).unwrap()]));
        assert!((global_mean(&img) - 15.0).abs() < 1e-12);
    }
}
