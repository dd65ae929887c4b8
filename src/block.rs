use crate::grid::GridTopology;

/// Smallest side the engine picks on its own; smaller blocks spend more of
/// each cut on frozen borders than on free sites.
pub const MIN_DEFAULT_BLOCK: usize = 16;

/// Blocks requested per worker when the caller leaves the size to the engine.
const BLOCKS_PER_WORKER: usize = 4;

/// Half-open rectangle `[x0, x1) x [y0, y1)` of sites.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Block {
    pub x0: usize,
    pub y0: usize,
    pub x1: usize,
    pub y1: usize,
}

impl Block {
    /// The block covering the whole grid.
    pub fn whole(t: &GridTopology) -> Self {
        Self {
            x0: 0,
            y0: 0,
            x1: t.width,
            y1: t.height,
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.x1 - self.x0
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.y1 - self.y0
    }

    #[inline]
    pub fn area(&self) -> usize {
        self.width() * self.height()
    }

    #[inline]
    pub fn contains(&self, x: usize, y: usize) -> bool {
        x >= self.x0 && x < self.x1 && y >= self.y0 && y < self.y1
    }

    /// Row-major index of `(x, y)` inside the block.
    #[inline]
    pub fn local(&self, x: usize, y: usize) -> usize {
        debug_assert!(self.contains(x, y));
        (y - self.y0) * self.width() + (x - self.x0)
    }

    /// Global site indices of the block, row by row.
    pub fn sites(self, t: &GridTopology) -> impl Iterator<Item = usize> + '_ {
        (self.y0..self.y1).flat_map(move |y| (self.x0..self.x1).map(move |x| t.site(x, y)))
    }
}

/// Cover the grid with `size x size` blocks in row-major block order. Blocks
/// on the right and bottom border are clipped.
pub fn partition(width: usize, height: usize, size: usize) -> Vec<Block> {
    let size = size.max(1);
    let mut blocks = Vec::with_capacity(width.div_ceil(size) * height.div_ceil(size));
    for y0 in (0..height).step_by(size) {
        for x0 in (0..width).step_by(size) {
            blocks.push(Block {
                x0,
                y0,
                x1: (x0 + size).min(width),
                y1: (y0 + size).min(height),
            });
        }
    }
    blocks
}

/// Square block side giving roughly `BLOCKS_PER_WORKER` blocks per worker.
pub fn default_block_size(width: usize, height: usize, workers: usize) -> usize {
    let target = (BLOCKS_PER_WORKER * workers.max(1)) as f64;
    let side = ((width * height) as f64 / target).sqrt().ceil() as usize;
    side.max(MIN_DEFAULT_BLOCK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Connectivity;

    #[test]
    fn partition_covers_every_site_once() {
        let t = GridTopology::new(10, 7, Connectivity::FourConnected).unwrap();
        let blocks = partition(10, 7, 4);
        assert_eq!(blocks.len(), 3 * 2);
        let mut seen = vec![0u8; t.num_sites()];
        for b in &blocks {
            for s in b.sites(&t) {
                seen[s] += 1;
            }
        }
        assert!(seen.iter().all(|&c| c == 1));
        assert_eq!(blocks[2], Block { x0: 8, y0: 0, x1: 10, y1: 4 });
        assert_eq!(blocks[5].area(), 2 * 3);
    }

    #[test]
    fn oversized_block_is_the_whole_grid() {
        let t = GridTopology::new(5, 3, Connectivity::FourConnected).unwrap();
        assert_eq!(partition(5, 3, 64), vec![Block::whole(&t)]);
    }

    #[test]
    fn default_size_scales_with_workers() {
        assert_eq!(default_block_size(8, 8, 4), MIN_DEFAULT_BLOCK);
        let one = default_block_size(1024, 1024, 1);
        let eight = default_block_size(1024, 1024, 8);
        assert!(one > eight);
        assert!(partition(1024, 1024, eight).len() >= 32);
    }

    #[test]
    fn local_index_is_row_major() {
        let b = Block { x0: 2, y0: 3, x1: 5, y1: 6 };
        assert_eq!(b.local(2, 3), 0);
        assert_eq!(b.local(4, 3), 2);
        assert_eq!(b.local(2, 4), 3);
        assert!(!b.contains(5, 3));
    }
}
