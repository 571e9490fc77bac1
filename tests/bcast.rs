//! Broadcast-list and reduce-list tests on small process grids

mod common;

use common::{fill, host_matrix};
use tessel::coherence::Mosi;
use tessel::comm::LocalCluster;
use tessel::internal::Target;
use tessel::matrix::{BcastList, ReduceList};
use tessel::tile::{Layout, LayoutConvert, Location};

#[test]
fn test_row_broadcast_delivers_source_bytes() {
    // 4 x 4 tiles of 2 x 2 on a column-ordered 2 x 2 grid: row 0 lives on ranks 0 and 2
    let results = LocalCluster::run(4, |comm| {
        let a = host_matrix::<f64>(8, 8, 2, 2, 2, comm, 0);
        fill(&a, |i, j| (1000 * i + j) as f64 + 0.25);
        let list: BcastList<f64, _> = vec![(0, 0, vec![a.sub(0, 0, 0, 3)])];
        a.list_bcast(Target::HostTask, &list, Layout::ColMajor, 0, 1).unwrap();

        if a.tile_exists(0, 0, Location::Host) {
            let t = a.tile_get_for_reading(0, 0, Location::Host, LayoutConvert::ColMajor).unwrap();
            Some((t.to_vec(), a.tile_life(0, 0), a.tile_receive_count(0, 0)))
        } else {
            None
        }
    });

    let source = results[0].as_ref().unwrap().0.clone();
    assert_eq!(source, vec![0.25, 1000.25, 1.25, 1001.25]);
    let (copy, life, receives) = results[2].clone().unwrap();
    let (src_bytes, copy_bytes): (&[u8], &[u8]) =
        (bytemuck::cast_slice(&source), bytemuck::cast_slice(&copy));
    assert_eq!(src_bytes, copy_bytes);
    // rank 2 owns tiles (0, 1) and (0, 3) of the destination row
    assert_eq!(life, 2);
    assert_eq!(receives, 1);
    assert!(results[1].is_none() && results[3].is_none());
}

#[test]
fn test_broadcast_to_devices_and_release() {
    LocalCluster::run(4, |comm| {
        let a = host_matrix::<f32>(8, 8, 2, 2, 2, comm, 2);
        fill(&a, |i, j| (i + 10 * j) as f32);
        // column 0 panel to every tile of its row and the column to its right
        let list: BcastList<f32, _> = (1..4)
            .map(|i| (i, 0, vec![a.sub(i, i, 1, 3), a.sub(i, 3, i, i)]))
            .collect();
        a.list_bcast(Target::Devices, &list, Layout::ColMajor, 30, 2).unwrap();

        for (i, _, views) in &list {
            for v in views {
                for (vi, vj) in v.local_tiles() {
                    let d = v.tile_device(vi, vj);
                    let state = a.tile_state(*i, 0, Location::Device(d)).map(|s| s.state);
                    assert_eq!(state, Some(Mosi::Shared), "tile ({i}, 0) on device {d}");
                }
            }
            if !a.tile_is_local(*i, 0) && a.tile_receive_count(*i, 0) > 0 {
                let expected: i64 =
                    views.iter().map(|v| v.num_local_tiles() as i64).sum::<i64>() * 2;
                assert_eq!(a.tile_life(*i, 0), expected);
            }
        }

        a.sub(0, 3, 0, 0).release_remote_workspace();
        for i in 1..4 {
            if !a.tile_is_local(i, 0) {
                assert!(!a.tile_exists(i, 0, Location::Host));
            }
        }
    });
}

#[test]
fn test_reduce_list_sums_partials_on_grid() {
    let sums = LocalCluster::run(4, |comm| {
        let a = host_matrix::<f64>(4, 4, 2, 2, 2, comm, 0);
        let rank = a.mpi_rank();
        // every rank holds a partial of tile (1, 1), owned by rank 3
        if rank != 3 {
            a.tile_insert_workspace(1, 1, Location::Host, Layout::ColMajor).unwrap();
        }
        let t = a.tile(1, 1).unwrap();
        for j in 0..2 {
            for i in 0..2 {
                t.set(i, j, (rank + 1) as f64 * (1 + i + 2 * j) as f64);
            }
        }
        a.tile_modified(1, 1, Location::Host, true).unwrap();
        let list: ReduceList<f64, _> = vec![(1, 1, vec![a.sub(0, 1, 0, 1)])];
        a.list_reduce(&list, Layout::ColMajor, 40).unwrap();
        (rank == 3).then(|| a.tile(1, 1).unwrap().to_vec())
    });
    // 1 + 2 + 3 + 4 = 10 copies of the base pattern
    assert_eq!(sums[3].as_ref().unwrap(), &vec![10.0, 20.0, 30.0, 40.0]);
}
