//! Tile sizes and tile ownership as pure functions of tile indices
//!
//! A [`Distribution`] answers, for any tile (i, j): its extents, the rank that
//! owns it and the device it lives on within that rank. Nothing here is
//! mutable; the same distribution on every rank yields the same answers, which
//! is what lets ranks agree on communication schedules without messages.

use crate::error::{Error, Result};
use std::fmt;
use std::sync::Arc;

/// Tile extent as a function of tile index
pub type TileSizeFn = Arc<dyn Fn(usize) -> usize + Send + Sync>;

/// Owning rank (or device) as a function of tile coordinates
pub type TileMapFn = Arc<dyn Fn((usize, usize)) -> usize + Send + Sync>;

/// Order in which ranks are laid out on the process grid
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum GridOrder {
    /// Rank = row + col * p
    #[default]
    Col,
    /// Rank = row * q + col
    Row,
}

/// Every tile is `nb`; the last tile of a dimension is trimmed to fit
pub fn uniform_tile_size(nb: usize) -> TileSizeFn {
    Arc::new(move |_| nb)
}

/// 2-D block-cyclic owner over a `p x q` grid
pub fn block_cyclic_rank(order: GridOrder, p: usize, q: usize) -> TileMapFn {
    match order {
        GridOrder::Col => Arc::new(move |(i, j)| i % p + (j % q) * p),
        GridOrder::Row => Arc::new(move |(i, j)| (i % p) * q + j % q),
    }
}

/// Cycle tiles over a rank's devices by local column (or row) index
///
/// With column order, tile column j sits in local column `j / dim` on its
/// rank, and local columns are dealt round-robin to the devices.
pub fn device_1d_grid(order: GridOrder, dim: usize, num_devices: usize) -> TileMapFn {
    let nd = num_devices.max(1);
    match order {
        GridOrder::Col => Arc::new(move |(_, j)| (j / dim) % nd),
        GridOrder::Row => Arc::new(move |(i, _)| (i / dim) % nd),
    }
}

/// Prefix sums of tile extents covering `dim`
fn tile_offsets(dim: usize, size: &TileSizeFn, arg: &'static str) -> Result<Vec<usize>> {
    let mut offsets = vec![0];
    let mut total = 0;
    while total < dim {
        let s = size(offsets.len() - 1);
        if s == 0 {
            return Err(Error::invalid_argument(
                arg,
                format!("tile {} has zero extent", offsets.len() - 1),
            ));
        }
        total += s.min(dim - total);
        offsets.push(total);
    }
    Ok(offsets)
}

/// Grid description kept for interop validation
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ProcessGrid {
    /// Rank layout
    pub order: GridOrder,
    /// Grid rows
    pub p: usize,
    /// Grid columns
    pub q: usize,
}

/// Tile sizes and owners of an m x n matrix
#[derive(Clone)]
pub struct Distribution {
    m: usize,
    n: usize,
    row_offsets: Vec<usize>,
    col_offsets: Vec<usize>,
    rank_fn: TileMapFn,
    device_fn: TileMapFn,
    num_devices: usize,
    grid: Option<ProcessGrid>,
}

impl fmt::Debug for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Distribution")
            .field("m", &self.m)
            .field("n", &self.n)
            .field("mt", &self.mt())
            .field("nt", &self.nt())
            .field("num_devices", &self.num_devices)
            .field("grid", &self.grid)
            .finish()
    }
}

impl Distribution {
    /// General distribution from tile-size and mapping functions
    pub fn new(
        m: usize,
        n: usize,
        tile_mb: TileSizeFn,
        tile_nb: TileSizeFn,
        rank_fn: TileMapFn,
        device_fn: TileMapFn,
        num_devices: usize,
    ) -> Result<Self> {
        Ok(Self {
            m,
            n,
            row_offsets: tile_offsets(m, &tile_mb, "tile_mb")?,
            col_offsets: tile_offsets(n, &tile_nb, "tile_nb")?,
            rank_fn,
            device_fn,
            num_devices,
            grid: None,
        })
    }

    /// Square `nb` tiles, block-cyclic over a column-ordered `p x q` grid
    pub fn block_cyclic(
        m: usize,
        n: usize,
        nb: usize,
        p: usize,
        q: usize,
        num_devices: usize,
    ) -> Result<Self> {
        if p == 0 || q == 0 {
            return Err(Error::invalid_argument("p", "process grid must be non-empty"));
        }
        let mut dist = Self::new(
            m,
            n,
            uniform_tile_size(nb),
            uniform_tile_size(nb),
            block_cyclic_rank(GridOrder::Col, p, q),
            device_1d_grid(GridOrder::Col, q, num_devices),
            num_devices,
        )?;
        dist.grid = Some(ProcessGrid {
            order: GridOrder::Col,
            p,
            q,
        });
        Ok(dist)
    }

    /// Rows
    pub fn m(&self) -> usize {
        self.m
    }

    /// Columns
    pub fn n(&self) -> usize {
        self.n
    }

    /// Tile rows
    pub fn mt(&self) -> usize {
        self.row_offsets.len() - 1
    }

    /// Tile columns
    pub fn nt(&self) -> usize {
        self.col_offsets.len() - 1
    }

    /// Rows in tile row `i`
    pub fn tile_mb(&self, i: usize) -> usize {
        self.row_offsets[i + 1] - self.row_offsets[i]
    }

    /// Columns in tile column `j`
    pub fn tile_nb(&self, j: usize) -> usize {
        self.col_offsets[j + 1] - self.col_offsets[j]
    }

    /// First global row of tile row `i`
    pub fn row_offset(&self, i: usize) -> usize {
        self.row_offsets[i]
    }

    /// First global column of tile column `j`
    pub fn col_offset(&self, j: usize) -> usize {
        self.col_offsets[j]
    }

    /// Rank owning tile (i, j)
    pub fn tile_rank(&self, i: usize, j: usize) -> usize {
        (self.rank_fn)((i, j))
    }

    /// Device holding tile (i, j) within its rank
    pub fn tile_device(&self, i: usize, j: usize) -> usize {
        (self.device_fn)((i, j))
    }

    /// Devices per rank
    pub fn num_devices(&self) -> usize {
        self.num_devices
    }

    /// Process grid, when built block-cyclic
    pub fn grid(&self) -> Option<ProcessGrid> {
        self.grid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_tile_trimmed() {
        let d = Distribution::block_cyclic(10, 7, 4, 2, 1, 0).unwrap();
        assert_eq!((d.mt(), d.nt()), (3, 2));
        assert_eq!(d.tile_mb(2), 2);
        assert_eq!(d.tile_nb(1), 3);
        assert_eq!(d.row_offset(2), 8);
    }

    #[test]
    fn test_non_uniform_sizes() {
        let sizes: TileSizeFn = Arc::new(|i| if i % 2 == 0 { 3 } else { 1 });
        let d = Distribution::new(
            9,
            4,
            sizes.clone(),
            sizes,
            block_cyclic_rank(GridOrder::Row, 2, 2),
            device_1d_grid(GridOrder::Row, 2, 2),
            2,
        )
        .unwrap();
        let rows: Vec<usize> = (0..d.mt()).map(|i| d.tile_mb(i)).collect();
        assert_eq!(rows, vec![3, 1, 3, 1, 1]);
        assert_eq!(d.tile_rank(1, 0), 2);
        assert_eq!(d.tile_device(3, 0), 1);
    }

    #[test]
    fn test_zero_tile_size_rejected() {
        let zero: TileSizeFn = Arc::new(|_| 0);
        let r = Distribution::new(
            4,
            4,
            zero,
            uniform_tile_size(2),
            block_cyclic_rank(GridOrder::Col, 1, 1),
            device_1d_grid(GridOrder::Col, 1, 1),
            0,
        );
        assert!(matches!(r, Err(Error::InvalidArgument { arg: "tile_mb", .. })));
    }

    #[test]
    fn test_block_cyclic_column_order() {
        let rank = block_cyclic_rank(GridOrder::Col, 2, 3);
        assert_eq!(rank((0, 0)), 0);
        assert_eq!(rank((1, 0)), 1);
        assert_eq!(rank((0, 1)), 2);
        assert_eq!(rank((3, 5)), 1 + 2 * 2);
        let dev = device_1d_grid(GridOrder::Col, 3, 2);
        assert_eq!(dev((0, 2)), 0);
        assert_eq!(dev((0, 3)), 1);
        assert_eq!(dev((0, 6)), 0);
    }
}
