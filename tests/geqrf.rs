//! Distributed QR factorization against a dense reference
//!
//! Tests verify:
//! - R equals the Cholesky factor of A^H A up to row phases, on grids with one
//!   to four ranks per panel
//! - R^H R reproduces A^H A for tall, square and wide matrices
//! - Lookahead depth, host target and short edge tiles do not change R
//! - Unsupported targets fail before any work starts

mod common;

use common::{assert_allclose_f64, dense_cholesky, fill, host_matrix, init_tracing};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tessel::prelude::*;

fn random_real(m: usize, n: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..m * n).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

fn random_complex(m: usize, n: usize, seed: u64) -> Vec<Complex128> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..m * n)
        .map(|_| Complex128::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)))
        .collect()
}

/// (A^H A) for a column-major matrix with `rows` rows
fn gram<T: Scalar>(a: &[T], rows: usize, n: usize) -> Vec<T> {
    let mut g = vec![T::zero(); n * n];
    for j in 0..n {
        for i in 0..n {
            for l in 0..rows {
                g[i + j * n] += a[l + i * rows].conj() * a[l + j * rows];
            }
        }
    }
    g
}

/// Factor `a_host` on a p x q grid and assemble R, min(m, n) x n column-major
fn factor<T: Scalar>(
    m: usize,
    n: usize,
    nb: usize,
    (p, q): (usize, usize),
    opts: &Options,
    a_host: &[T],
) -> Vec<T> {
    init_tracing();
    let k = m.min(n);
    let parts = LocalCluster::run(p * q, |comm| {
        let a = host_matrix::<T>(m, n, nb, p, q, comm, 0);
        fill(&a, |i, j| a_host[i + j * m]);
        geqrf(&a, opts).unwrap();
        let dist = a.distribution();
        let mut upper = Vec::new();
        for (i, j) in a.local_tiles() {
            let t = a.tile(i, j).unwrap();
            for jj in 0..t.nb() {
                for ii in 0..t.mb() {
                    let (r, c) = (dist.row_offset(i) + ii, dist.col_offset(j) + jj);
                    if r <= c {
                        upper.push((r, c, t.at(ii, jj)));
                    }
                }
            }
        }
        upper
    });
    let mut r = vec![T::zero(); k * n];
    let mut count = 0;
    for (i, j, v) in parts.into_iter().flatten() {
        r[i + j * k] = v;
        count += 1;
    }
    assert_eq!(count, (0..n).map(|j| (j + 1).min(k)).sum::<usize>());
    r
}

/// Check R^H R = A^H A and, for m >= n, |R| = |chol(A^H A)^H|
fn check<T: Scalar>(m: usize, n: usize, a_host: &[T], r: &[T], msg: &str) {
    let k = m.min(n);
    let want = gram(a_host, m, n);
    let got = gram(r, k, n);
    assert_allclose_f64(
        bytemuck::cast_slice(&got),
        bytemuck::cast_slice(&want),
        1e-10,
        1e-10,
        &format!("{msg}: R^H R"),
    );
    if m >= n {
        let l = dense_cholesky(n, |i, j| want[i + j * n]);
        let mut got = Vec::new();
        let mut reference = Vec::new();
        for j in 0..n {
            for i in 0..=j {
                got.push(r[i + j * n].abs());
                reference.push(l[j + i * n].abs());
            }
        }
        assert_allclose_f64(&got, &reference, 1e-9, 1e-10, &format!("{msg}: |R|"));
    }
}

#[test]
fn test_geqrf_tall_all_grids() {
    let (m, n, nb) = (14, 10, 3);
    let a = random_real(m, n, 1);
    for grid in [(1, 1), (2, 1), (2, 2), (3, 1), (4, 1), (1, 3)] {
        let opts = Options::default().with_num_threads(2);
        let r = factor(m, n, nb, grid, &opts, &a);
        check(m, n, &a, &r, &format!("grid {grid:?}"));
    }
}

#[test]
fn test_geqrf_lookahead_and_targets_2x2() {
    let (m, n, nb) = (14, 10, 3);
    let a = random_real(m, n, 2);
    for lookahead in [0, 1, 3] {
        for target in [Target::HostTask, Target::HostNest] {
            let opts = Options::default()
                .with_target(target)
                .with_lookahead(lookahead)
                .with_num_threads(3);
            let r = factor(m, n, nb, (2, 2), &opts, &a);
            check(m, n, &a, &r, &format!("lookahead {lookahead}, {target}"));
        }
    }
}

#[test]
fn test_geqrf_square_single_thread() {
    let n = 12;
    let a = random_real(n, n, 3);
    let opts = Options::default().with_num_threads(1).with_tag_base(300);
    let r = factor(n, n, 4, (2, 2), &opts, &a);
    check(n, n, &a, &r, "square");
}

#[test]
fn test_geqrf_complex_trimmed_tiles() {
    // 13 = 3 * 4 + 1 and 9 = 2 * 4 + 1 leave 1-wide edge tiles
    let (m, n) = (13, 9);
    let a = random_complex(m, n, 4);
    for grid in [(2, 2), (3, 1)] {
        let opts = Options::default().with_lookahead(2).with_num_threads(2);
        let r = factor(m, n, 4, grid, &opts, &a);
        check(m, n, &a, &r, &format!("complex grid {grid:?}"));
    }
}

#[test]
fn test_geqrf_wide() {
    // two tile rows and five tile columns: two steps, then only updates
    let (m, n) = (6, 14);
    let a = random_real(m, n, 5);
    let r = factor(m, n, 3, (2, 2), &Options::default().with_num_threads(2), &a);
    check(m, n, &a, &r, "wide");
}

#[test]
fn test_geqrf_rejects_unsupported_targets() {
    LocalCluster::run(1, |comm| {
        let a = host_matrix::<f64>(6, 4, 2, 1, 1, comm, 0);
        for target in [Target::HostBatch, Target::Devices] {
            let err = geqrf(&a, &Options::default().with_target(target)).err();
            assert!(matches!(err, Some(Error::NotImplemented { .. })), "{target}: {err:?}");
        }
        let err = geqrf(&a.conj_transpose(), &Options::default()).err();
        assert!(matches!(err, Some(Error::InvalidArgument { .. })), "{err:?}");
    });
}
