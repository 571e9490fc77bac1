//! Block-cyclic distribution tests
//!
//! Key invariants:
//! - Tile extents cover each dimension exactly, only the last tile is short
//! - Every tile has exactly one owner, and local tile lists partition the matrix
//! - Device indices stay below the device count

use proptest::prelude::*;
use std::collections::HashSet;
use tessel::comm::LocalCluster;
use tessel::matrix::{Distribution, Matrix};

proptest! {
    #[test]
    fn block_cyclic_covers_matrix(
        m in 0usize..60,
        n in 0usize..60,
        nb in 1usize..9,
        p in 1usize..4,
        q in 1usize..4,
        num_devices in 0usize..4,
    ) {
        let dist = Distribution::block_cyclic(m, n, nb, p, q, num_devices).unwrap();
        prop_assert_eq!(dist.mt(), m.div_ceil(nb));
        prop_assert_eq!(dist.nt(), n.div_ceil(nb));
        prop_assert_eq!((0..dist.mt()).map(|i| dist.tile_mb(i)).sum::<usize>(), m);
        prop_assert_eq!((0..dist.nt()).map(|j| dist.tile_nb(j)).sum::<usize>(), n);
        for i in 0..dist.mt() {
            prop_assert_eq!(dist.row_offset(i), i * nb);
            if i + 1 < dist.mt() {
                prop_assert_eq!(dist.tile_mb(i), nb);
            }
        }
        for i in 0..dist.mt() {
            for j in 0..dist.nt() {
                let rank = dist.tile_rank(i, j);
                prop_assert!(rank < p * q);
                prop_assert_eq!(rank, i % p + (j % q) * p);
                prop_assert!(dist.tile_device(i, j) < num_devices.max(1));
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn local_tiles_partition_matrix(
        m in 1usize..30,
        n in 1usize..30,
        nb in 1usize..6,
        p in 1usize..3,
        q in 1usize..3,
    ) {
        let per_rank = LocalCluster::run(p * q, |comm| {
            let a = Matrix::<f64>::new(m, n, nb, p, q, comm).unwrap();
            let rank = a.mpi_rank();
            let tiles = a.local_tiles();
            assert!(tiles.iter().all(|&(i, j)| a.tile_rank(i, j) == rank && a.tile_is_local(i, j)));
            tiles
        });
        let mut seen = HashSet::new();
        for tiles in &per_rank {
            for &t in tiles {
                prop_assert!(seen.insert(t), "tile {:?} listed twice", t);
            }
        }
        prop_assert_eq!(seen.len(), m.div_ceil(nb) * n.div_ceil(nb));
    }
}

#[test]
fn test_sub_view_keeps_owners() {
    LocalCluster::run(6, |comm| {
        let a = Matrix::<f32>::new(20, 20, 4, 2, 3, comm).unwrap();
        let v = a.sub(1, 4, 2, 3);
        assert_eq!((v.mt(), v.nt()), (4, 2));
        for i in 0..v.mt() {
            for j in 0..v.nt() {
                assert_eq!(v.tile_rank(i, j), a.tile_rank(i + 1, j + 2));
            }
        }
        let t = a.conj_transpose();
        assert_eq!(t.tile_rank(2, 1), a.tile_rank(1, 2));
    });
}
