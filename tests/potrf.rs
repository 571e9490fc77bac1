//! Distributed Cholesky factorization against a dense reference
//!
//! Tests verify:
//! - Lower and upper factors on 1x1, 2x1 and 2x2 process grids
//! - Every host target and the device target agree with the reference
//! - Lookahead depth does not change the result
//! - Unsupported combinations fail before any work starts

mod common;

use common::{
    assert_allclose_f64, dense_cholesky, hermitian, hpd_complex, init_tracing, local_max_error,
    spd_real,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tessel::prelude::*;

const N: usize = 11;
const NB: usize = 3;

fn factor_real(p: usize, q: usize, uplo: Uplo, opts: Options, num_devices: usize) {
    init_tracing();
    let l = dense_cholesky(N, spd_real(N));
    let errors = LocalCluster::run(p * q, |comm| {
        let a = hermitian(uplo, N, NB, p, q, comm, num_devices, spd_real(N));
        potrf(&a, &opts).unwrap();
        match uplo {
            Uplo::Lower => local_max_error(&a, |i, j| l[i + j * N], |i, j| i >= j),
            _ => local_max_error(&a, |i, j| l[j + i * N], |i, j| i <= j),
        }
    });
    for (rank, err) in errors.iter().enumerate() {
        assert!(
            *err < 1e-12,
            "rank {rank} of {p}x{q}, {uplo:?}, {}: error {err}",
            opts.target
        );
    }
}

#[test]
fn test_potrf_lower_all_grids_host_targets() {
    for (p, q) in [(1, 1), (2, 1), (2, 2)] {
        for target in [Target::HostTask, Target::HostNest] {
            let opts = Options::default().with_target(target).with_num_threads(3);
            factor_real(p, q, Uplo::Lower, opts, 0);
        }
    }
}

#[test]
fn test_potrf_upper_all_grids() {
    for (p, q) in [(1, 1), (2, 1), (2, 2)] {
        let opts = Options::default().with_target(Target::HostTask).with_num_threads(2);
        factor_real(p, q, Uplo::Upper, opts, 0);
    }
}

#[test]
fn test_potrf_devices_all_grids() {
    for (p, q) in [(1, 1), (2, 1), (2, 2)] {
        let opts = Options::default().with_target(Target::Devices).with_num_threads(2);
        factor_real(p, q, Uplo::Lower, opts, 2);
    }
}

#[test]
fn test_potrf_lookahead_depths() {
    for lookahead in [0, 1, 3, 8] {
        let opts = Options::default().with_lookahead(lookahead).with_num_threads(4);
        factor_real(2, 2, Uplo::Lower, opts, 0);
    }
}

#[test]
fn test_potrf_complex_hermitian() {
    let l = dense_cholesky(N, hpd_complex(N));
    for uplo in [Uplo::Lower, Uplo::Upper] {
        let errors = LocalCluster::run(4, |comm| {
            let a = hermitian(uplo, N, NB, 2, 2, comm, 0, hpd_complex(N));
            potrf(&a, &Options::default().with_bcast_radix(3).with_num_threads(2)).unwrap();
            match uplo {
                Uplo::Lower => local_max_error(&a, |i, j| l[i + j * N], |i, j| i >= j),
                _ => local_max_error(&a, |i, j| l[j + i * N].conj(), |i, j| i <= j),
            }
        });
        assert!(errors.iter().all(|&e| e < 1e-12), "{uplo:?}: {errors:?}");
    }
}

/// B B^T + n I for a seeded random B, column-major
fn random_spd(n: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let b: Vec<f64> = (0..n * n).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let mut a = vec![0.0; n * n];
    for j in 0..n {
        for i in 0..n {
            let dot: f64 = (0..n).map(|k| b[i + k * n] * b[j + k * n]).sum();
            a[i + j * n] = dot + if i == j { n as f64 } else { 0.0 };
        }
    }
    a
}

#[test]
fn test_potrf_random_matrix_trimmed_tiles() {
    // 13 = 3 * 4 + 1 leaves a 1-wide last tile row and column
    let n = 13;
    let a_ref = random_spd(n, 7);
    let l = dense_cholesky(n, |i, j| a_ref[i + j * n]);
    let pairs = LocalCluster::run(4, |comm| {
        let a = hermitian(Uplo::Lower, n, 4, 2, 2, comm, 0, |i, j| a_ref[i + j * n]);
        potrf(&a, &Options::default().with_lookahead(2).with_num_threads(2)).unwrap();
        let dist = a.distribution();
        let mut got = Vec::new();
        let mut want = Vec::new();
        for (i, j) in a.local_tiles() {
            let t = a.tile(i, j).unwrap();
            for jj in 0..t.nb() {
                for ii in 0..t.mb() {
                    let (r, c) = (dist.row_offset(i) + ii, dist.col_offset(j) + jj);
                    if r >= c {
                        got.push(t.at(ii, jj));
                        want.push(l[r + c * n]);
                    }
                }
            }
        }
        (got, want)
    });
    let total: usize = pairs.iter().map(|(g, _)| g.len()).sum();
    assert_eq!(total, n * (n + 1) / 2);
    for (rank, (got, want)) in pairs.iter().enumerate() {
        assert_allclose_f64(got, want, 1e-10, 1e-12, &format!("rank {rank}"));
    }
}

#[test]
fn test_potrf_single_thread_region() {
    let opts = Options::default().with_num_threads(1).with_tag_base(500);
    factor_real(2, 1, Uplo::Lower, opts, 0);
}

#[test]
fn test_potrf_rejects_unsupported_combinations() {
    let comm = LocalCluster::new(1).comm(0);
    let a = common::hermitian(Uplo::Lower, 4, 2, 1, 1, comm, 0, spd_real(4));
    let batch = potrf(&a, &Options::default().with_target(Target::HostBatch));
    assert!(matches!(batch, Err(Error::NotImplemented { .. })));
    let no_devices = potrf(&a, &Options::default().with_target(Target::Devices));
    assert!(matches!(no_devices, Err(Error::InvalidArgument { .. })));

    let comm = LocalCluster::new(1).comm(0);
    let upper = common::hermitian(Uplo::Upper, 4, 2, 1, 1, comm, 1, spd_real(4));
    let r = potrf(&upper, &Options::default().with_target(Target::Devices));
    assert!(matches!(r, Err(Error::NotImplemented { .. })));
}
