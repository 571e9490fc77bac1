//! Grouping tiles into uniform device batches
//!
//! A batched device kernel takes one (mb, nb, ld) for the whole batch, so
//! the tiles of a region are bucketed before launch. Interior tiles of a
//! block-cyclic matrix all have the full tile size; only the last tile row
//! and column may be trimmed. The region is therefore split into four
//! quadrants (interior, last row, last column, corner), each crossed with
//! off-diagonal and diagonal tiles, and each bucket is split again by exact
//! shape and stride for matrices with non-uniform tile sizes.

use crate::dtype::Scalar;
use crate::error::Result;
use crate::matrix::Matrix;
use crate::runtime::Runtime;
use crate::tile::{LayoutConvert, Location};
use std::collections::BTreeMap;
use tracing::trace;

/// Host-side pointer arrays for one device
///
/// Grown on demand and reused across launches; the contents of one launch
/// are only valid until the next.
#[derive(Debug, Default)]
pub struct BatchArrays {
    a: Vec<u64>,
    b: Vec<u64>,
    c: Vec<u64>,
    num_queues: usize,
}

impl BatchArrays {
    /// Pointers the arrays can hold without reallocating
    pub fn capacity(&self) -> usize {
        self.a.capacity().min(self.b.capacity()).min(self.c.capacity())
    }

    /// Compute queues the arrays were sized for
    pub fn num_queues(&self) -> usize {
        self.num_queues
    }

    pub(crate) fn reserve(&mut self, batch_size: usize, num_queues: usize) {
        for v in [&mut self.a, &mut self.b, &mut self.c] {
            if v.capacity() < batch_size {
                v.reserve(batch_size - v.len());
            }
        }
        self.num_queues = self.num_queues.max(num_queues);
    }

    /// Fill the A array from a group and return it
    pub(crate) fn load_a(&mut self, ptrs: impl IntoIterator<Item = u64>) -> &[u64] {
        self.a.clear();
        self.a.extend(ptrs);
        &self.a
    }

    /// Fill the A, B and C arrays together
    pub(crate) fn load_abc(
        &mut self,
        ptrs: impl IntoIterator<Item = (u64, u64, u64)>,
    ) -> (&[u64], &[u64], &[u64]) {
        self.a.clear();
        self.b.clear();
        self.c.clear();
        for (a, b, c) in ptrs {
            self.a.push(a);
            self.b.push(b);
            self.c.push(c);
        }
        (&self.a, &self.b, &self.c)
    }
}

/// Which of the four regions of the tile grid a tile falls in
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Quadrant {
    /// Not in the last tile row or column
    Interior,
    /// Last tile row only
    LastRow,
    /// Last tile column only
    LastCol,
    /// Last row and last column
    Corner,
}

impl Quadrant {
    /// Quadrant of tile (i, j) in an mt x nt grid
    pub fn of(i: usize, j: usize, mt: usize, nt: usize) -> Self {
        match (i + 1 == mt, j + 1 == nt) {
            (false, false) => Quadrant::Interior,
            (true, false) => Quadrant::LastRow,
            (false, true) => Quadrant::LastCol,
            (true, true) => Quadrant::Corner,
        }
    }
}

/// Tiles that can share one batched launch
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchGroup {
    /// Region of the grid
    pub quadrant: Quadrant,
    /// Whether the group holds diagonal tiles (i == j)
    pub diagonal: bool,
    /// Tile rows
    pub mb: usize,
    /// Tile columns
    pub nb: usize,
    /// Leading dimension
    pub ld: usize,
    /// Tile indices, in the order they were given
    pub tiles: Vec<(usize, usize)>,
}

/// Bucket `tiles` of an mt x nt grid into uniform groups
///
/// Off-diagonal groups come first, then diagonal groups; within each, the
/// quadrants in [`Quadrant`] order, then shapes in ascending (mb, nb, ld).
pub fn group_tiles(
    mt: usize,
    nt: usize,
    tiles: &[(usize, usize)],
    dims: impl Fn(usize, usize) -> (usize, usize, usize),
) -> Vec<BatchGroup> {
    let mut buckets: BTreeMap<(bool, Quadrant, usize, usize, usize), Vec<(usize, usize)>> =
        BTreeMap::new();
    for &(i, j) in tiles {
        let (mb, nb, ld) = dims(i, j);
        buckets
            .entry((i == j, Quadrant::of(i, j, mt, nt), mb, nb, ld))
            .or_default()
            .push((i, j));
    }
    buckets
        .into_iter()
        .map(|((diagonal, quadrant, mb, nb, ld), tiles)| BatchGroup {
            quadrant,
            diagonal,
            mb,
            nb,
            ld,
            tiles,
        })
        .collect()
}

impl<T: Scalar, R: Runtime> Matrix<T, R> {
    /// Make sure every device's batch arrays can hold `batch_size` pointers
    pub fn allocate_batch_arrays(&self, batch_size: usize, num_queues: usize) {
        for arrays in &self.storage.batch {
            arrays.lock().reserve(batch_size, num_queues);
        }
    }

    /// Largest number of local tiles on any one device
    pub fn max_device_batch(&self) -> usize {
        if self.num_devices() == 0 {
            return 0;
        }
        let mut counts = vec![0usize; self.num_devices()];
        for (i, j) in self.local_tiles() {
            counts[self.tile_device(i, j)] += 1;
        }
        counts.into_iter().max().unwrap_or(0)
    }

    /// Fetch `tiles` to `device` for writing in column-major and group them
    ///
    /// Returned groups carry the device instances' leading dimensions.
    pub(crate) fn device_groups_for_writing(
        &self,
        device: usize,
        tiles: &[(usize, usize)],
    ) -> Result<Vec<(BatchGroup, Vec<u64>)>> {
        let location = Location::Device(device);
        self.tile_get_for_writing_set(tiles, location, LayoutConvert::ColMajor)?;
        let mut instances = std::collections::HashMap::new();
        for &(i, j) in tiles {
            instances.insert((i, j), self.tile_on(i, j, location)?);
        }
        let groups = group_tiles(self.mt(), self.nt(), tiles, |i, j| {
            let t = &instances[&(i, j)];
            (t.mb(), t.nb(), t.stride())
        });
        trace!(device, groups = groups.len(), tiles = tiles.len(), "batch groups");
        Ok(groups
            .into_iter()
            .map(|g| {
                let ptrs = g.tiles.iter().map(|ij| instances[ij].data()).collect();
                (g, ptrs)
            })
            .collect())
    }

    pub(crate) fn batch_arrays(&self, device: usize) -> parking_lot::MutexGuard<'_, BatchArrays> {
        self.storage.batch[device].lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quadrants() {
        assert_eq!(Quadrant::of(0, 0, 3, 3), Quadrant::Interior);
        assert_eq!(Quadrant::of(2, 1, 3, 3), Quadrant::LastRow);
        assert_eq!(Quadrant::of(1, 2, 3, 3), Quadrant::LastCol);
        assert_eq!(Quadrant::of(2, 2, 3, 3), Quadrant::Corner);
    }

    #[test]
    fn test_group_tiles_trimmed_edges() {
        // 5x5 matrix in 2x2 tiles: last row and column are 1 wide
        let size = |k: usize| if k == 2 { 1 } else { 2 };
        let tiles: Vec<_> = (0..3).flat_map(|j| (0..3).map(move |i| (i, j))).collect();
        let groups = group_tiles(3, 3, &tiles, |i, j| (size(i), size(j), size(i)));
        assert_eq!(groups.len(), 5);
        let interior = &groups[0];
        assert!(!interior.diagonal);
        assert_eq!(interior.quadrant, Quadrant::Interior);
        assert_eq!(interior.tiles, vec![(1, 0), (0, 1)]);
        let corner = groups.last().unwrap();
        assert!(corner.diagonal);
        assert_eq!((corner.mb, corner.nb), (1, 1));
        assert_eq!(corner.tiles, vec![(2, 2)]);
        let total: usize = groups.iter().map(|g| g.tiles.len()).sum();
        assert_eq!(total, 9);
    }

    #[test]
    fn test_group_tiles_splits_by_stride() {
        let tiles = [(0, 1), (0, 2), (0, 3)];
        let groups = group_tiles(4, 4, &tiles, |_, j| (2, 2, if j == 2 { 4 } else { 2 }));
        // (0, 3) is in the last column
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].tiles, vec![(0, 1)]);
        assert_eq!(groups[1].ld, 4);
    }

    #[test]
    fn test_batch_arrays_reserve_grows() {
        let mut arrays = BatchArrays::default();
        arrays.reserve(8, 2);
        assert!(arrays.capacity() >= 8);
        arrays.reserve(4, 1);
        assert_eq!(arrays.num_queues(), 2);
        assert_eq!(arrays.load_a([1, 2, 3]), &[1, 2, 3]);
    }
}
