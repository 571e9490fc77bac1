//! Communication layer tests
//!
//! Key invariants:
//! - Hypercube broadcasts reach every participant within ceil(log_radix(n)) hops
//! - Each participant receives exactly once and never sends to the same rank twice
//! - Tile broadcasts over arbitrary rank subsets deliver identical bytes
//! - Variable-length gather and scatter round-trip

mod common;

use common::{fill, host_matrix};
use proptest::prelude::*;
use std::collections::{BTreeSet, HashSet};
use tessel::comm::{
    cube_bcast_pattern, cube_reduce_pattern, tagged_gatherv, tagged_scatterv, LocalCluster,
};
use tessel::tile::{Layout, LayoutConvert, Location};

fn hop_bound(size: usize, radix: usize) -> usize {
    let mut hops = 0;
    let mut reach = 1;
    while reach < size {
        reach *= radix;
        hops += 1;
    }
    hops
}

proptest! {
    #[test]
    fn bcast_pattern_reaches_everyone_within_bound(size in 1usize..80, radix in 2usize..6) {
        let patterns: Vec<_> = (0..size).map(|r| cube_bcast_pattern(size, r, radix)).collect();

        // each edge appears on both ends
        for (r, p) in patterns.iter().enumerate() {
            prop_assert!(p.recv_from.len() <= 1);
            prop_assert_eq!(p.recv_from.is_empty(), r == 0);
            let unique: HashSet<_> = p.send_to.iter().collect();
            prop_assert_eq!(unique.len(), p.send_to.len());
            for &child in &p.send_to {
                prop_assert_eq!(&patterns[child].recv_from, &vec![r]);
            }
        }

        let bound = hop_bound(size, radix);
        for r in 0..size {
            let mut hops = 0;
            let mut at = r;
            while let Some(&parent) = patterns[at].recv_from.first() {
                at = parent;
                hops += 1;
            }
            prop_assert_eq!(at, 0);
            prop_assert!(hops <= bound, "rank {} took {} hops, bound {}", r, hops, bound);
        }
    }

    #[test]
    fn reduce_pattern_mirrors_bcast(size in 1usize..40, radix in 2usize..5) {
        for r in 0..size {
            let b = cube_bcast_pattern(size, r, radix);
            let red = cube_reduce_pattern(size, r, radix);
            prop_assert_eq!(&red.send_to, &b.recv_from);
            let mut back = red.recv_from.clone();
            back.reverse();
            prop_assert_eq!(back, b.send_to);
        }
    }
}

#[test]
fn test_bcast_to_rank_subset() {
    // 5 ranks on a 5 x 1 grid; tile (3, 0) lives on rank 3
    for radix in [2, 3, 4] {
        let got = LocalCluster::run(5, |comm| {
            let a = host_matrix::<f32>(10, 2, 2, 5, 1, comm, 0);
            fill(&a, |i, j| (i * 7 + j) as f32);
            let ranks: BTreeSet<usize> = [0, 1, 3, 4].into_iter().collect();
            if !ranks.contains(&a.mpi_rank()) {
                return None;
            }
            if a.mpi_rank() != 3 {
                a.tile_insert_workspace(3, 0, Location::Host, Layout::ColMajor).unwrap();
            }
            a.tile_bcast_to_set(3, 0, ranks.clone(), radix, Layout::ColMajor, 21).unwrap();
            let t = a.tile_get_for_reading(3, 0, Location::Host, LayoutConvert::ColMajor);
            Some(t.unwrap().to_vec())
        });
        let expected = got[3].clone().unwrap();
        for (rank, v) in got.iter().enumerate() {
            match rank {
                2 => assert!(v.is_none()),
                _ => assert_eq!(v.as_ref(), Some(&expected), "rank {rank} radix {radix}"),
            }
        }
    }
}

#[test]
fn test_gatherv_uneven_blocks_round_trip() {
    let out = LocalCluster::run(4, |comm| {
        let rank = comm.rank();
        let counts = [3, 0, 1, 2];
        let displs = [2, 0, 0, 5];
        let mine: Vec<u32> = (0..counts[rank] as u32).map(|k| 100 * rank as u32 + k).collect();
        let mut gathered = vec![u32::MAX; if rank == 0 { 7 } else { 0 }];
        tagged_gatherv(&*comm, &mine, &mut gathered, &counts, &displs, 0, 4).unwrap();
        let mut back = vec![0u32; counts[rank]];
        tagged_scatterv(&*comm, &gathered, &counts, &displs, &mut back, 0, 5).unwrap();
        assert_eq!(back, mine);
        gathered
    });
    assert_eq!(out[0], vec![200, u32::MAX, 0, 1, 2, 300, 301]);
}

#[test]
fn test_gatherv_rejects_overlong_block() {
    let out = LocalCluster::run(2, |comm| {
        let mine = vec![1.0f64; 2];
        let mut gathered = vec![0.0; 3];
        tagged_gatherv(&*comm, &mine, &mut gathered, &[2, 2], &[0, 2], 0, 9).is_err()
    });
    assert!(out[0]);
}
