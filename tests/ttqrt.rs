//! Triangle-triangle reduction tree tests
//!
//! The combine kernels here are order-sensitive additions, so the final
//! values reveal which pairs met at which level.

mod common;

use common::{fill, host_matrix};
use tessel::comm::LocalCluster;
use tessel::internal::{Target, ttmqr, ttqrt};
use tessel::matrix::Matrix;
use tessel::tile::{Op, Side, Tile};

fn add_into(dst: &Tile<f64>, src: &Tile<f64>) {
    for j in 0..dst.nb() {
        for i in 0..dst.mb() {
            dst.set(i, j, dst.at(i, j) + src.at(i, j));
        }
    }
}

#[test]
fn test_ttqrt_accumulates_into_first_rank() {
    for nranks in [2, 3, 4, 5] {
        let out = LocalCluster::run(nranks, |comm| {
            // one 2 x 2 tile per rank in a single tile column
            let a = host_matrix::<f64>(2 * nranks, 2, 2, nranks, 1, comm, 0);
            fill(&a, |i, _| (i / 2 + 1) as f64);
            let t = a.empty_like();
            t.insert_local_tiles(Target::HostTask).unwrap();
            ttqrt(&a, &t, 5, |top_row, bottom_row, top, bottom, t_bottom| {
                add_into(top, bottom);
                for j in 0..2 {
                    for i in 0..2 {
                        bottom.set(i, j, 0.0);
                    }
                }
                t_bottom.set(0, 0, (10 * top_row + bottom_row) as f64);
                Ok(())
            })
            .unwrap();
            let me = a.mpi_rank();
            (a.tile(me, 0).unwrap().at(1, 1), t.tile(me, 0).unwrap().at(0, 0), a.tile_count())
        });
        let total = (nranks * (nranks + 1) / 2) as f64;
        assert_eq!(out[0].0, total, "{nranks} ranks");
        assert!(out[1..].iter().all(|v| v.0 == 0.0), "{nranks} ranks: {out:?}");
        // each lower partner gets back the scratch tile its upper partner wrote
        for (rank, &(_, marker, _)) in out.iter().enumerate().skip(1) {
            let step = 1 << rank.trailing_zeros();
            assert_eq!(marker, (10 * (rank - step) + rank) as f64, "{nranks} ranks, rank {rank}");
        }
        // received tiles are released on the upper partner
        assert!(out.iter().all(|v| v.2 == 1), "{nranks} ranks: {out:?}");
    }
}

#[test]
fn test_ttqrt_rejects_mismatched_t() {
    LocalCluster::run(1, |comm| {
        let a = host_matrix::<f64>(4, 2, 2, 1, 1, comm.clone(), 0);
        let t = host_matrix::<f64>(6, 2, 2, 1, 1, comm, 0);
        assert!(ttqrt(&a, &t, 0, |_, _, _, _, _| Ok(())).is_err());
    });
}

fn tree_order(side: Side, op: Op) -> Vec<f64> {
    LocalCluster::run(4, |comm| {
        let a = host_matrix::<f64>(4, 1, 1, 4, 1, comm.clone(), 0);
        // C is 4 x 1 tiles for Left and 1 x 4 tiles for Right, tile k on rank k
        let c: Matrix<f64> = match side {
            Side::Left => host_matrix(4, 1, 1, 4, 1, comm, 0),
            Side::Right => host_matrix(1, 4, 1, 1, 4, comm, 0),
        };
        fill(&c, |i, j| (i + j) as f64);
        ttmqr(side, op, &a, &c, 9, |_, c1, c2| {
            add_into(c1, c2);
            Ok(())
        })
        .unwrap();
        let me = c.mpi_rank();
        let (i, j) = if side == Side::Left { (me, 0) } else { (0, me) };
        c.tile(i, j).unwrap().at(0, 0)
    })
}

#[test]
fn test_ttmqr_direction_table() {
    let ascending = vec![6.0, 1.0, 5.0, 3.0];
    let descending = vec![3.0, 1.0, 5.0, 3.0];
    assert_eq!(tree_order(Side::Left, Op::NoTrans), descending);
    assert_eq!(tree_order(Side::Left, Op::ConjTrans), ascending);
    assert_eq!(tree_order(Side::Right, Op::NoTrans), ascending);
    assert_eq!(tree_order(Side::Right, Op::ConjTrans), descending);
}

#[test]
fn test_ttmqr_rejects_mismatched_c() {
    LocalCluster::run(1, |comm| {
        let a = host_matrix::<f64>(4, 2, 2, 1, 1, comm.clone(), 0);
        let c = host_matrix::<f64>(6, 2, 2, 1, 1, comm, 0);
        assert!(ttmqr(Side::Left, Op::NoTrans, &a, &c, 0, |_, _, _| Ok(())).is_err());
    });
}
