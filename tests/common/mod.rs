//! Common test utilities
#![allow(dead_code)]

use std::sync::Arc;
use tessel::comm::Communicator;
use tessel::dtype::{Complex128, Scalar};
use tessel::internal::Target;
use tessel::matrix::{HermitianMatrix, Matrix, MatrixConfig};
use tessel::tile::Uplo;

/// Install a test-writer tracing subscriber once; `RUST_LOG` selects events
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// General matrix with every local tile inserted on the host
pub fn host_matrix<T: Scalar>(
    m: usize,
    n: usize,
    nb: usize,
    p: usize,
    q: usize,
    comm: Arc<dyn Communicator>,
    num_devices: usize,
) -> Matrix<T> {
    let config = MatrixConfig {
        num_devices,
        device_capacity: None,
    };
    let a = Matrix::with_config(m, n, nb, p, q, comm, config).unwrap();
    a.insert_local_tiles(Target::HostTask).unwrap();
    a
}

/// Write `f(row, col)` into every element of this rank's local tiles
pub fn fill<T: Scalar>(a: &Matrix<T>, f: impl Fn(usize, usize) -> T) {
    let dist = a.distribution();
    for (i, j) in a.local_tiles() {
        let t = a.tile(i, j).unwrap();
        let (r0, c0) = (dist.row_offset(i), dist.col_offset(j));
        for jj in 0..t.nb() {
            for ii in 0..t.mb() {
                t.set(ii, jj, f(r0 + ii, c0 + jj));
            }
        }
    }
}

/// Largest |a(i, j) - f(i, j)| over local elements where `keep(i, j)` holds
pub fn local_max_error<T: Scalar>(
    a: &Matrix<T>,
    f: impl Fn(usize, usize) -> T,
    keep: impl Fn(usize, usize) -> bool,
) -> f64 {
    let dist = a.distribution();
    let mut worst = 0.0f64;
    for (i, j) in a.local_tiles() {
        let t = a.tile(i, j).unwrap();
        let (r0, c0) = (dist.row_offset(i), dist.col_offset(j));
        for jj in 0..t.nb() {
            for ii in 0..t.mb() {
                let (r, c) = (r0 + ii, c0 + jj);
                if keep(r, c) {
                    worst = worst.max((t.at(ii, jj) - f(r, c)).abs());
                }
            }
        }
    }
    worst
}

/// Diagonally dominant symmetric positive definite entries
pub fn spd_real(n: usize) -> impl Fn(usize, usize) -> f64 + Copy {
    move |i, j| {
        if i == j {
            n as f64 + 2.0
        } else {
            1.0 / (1 + i + j) as f64
        }
    }
}

/// Diagonally dominant Hermitian positive definite entries
pub fn hpd_complex(n: usize) -> impl Fn(usize, usize) -> Complex128 + Copy {
    move |i, j| {
        if i == j {
            Complex128::new(n as f64 + 2.0, 0.0)
        } else {
            let z = Complex128::new(1.0 / (1 + i + j) as f64, 0.5 / (1 + i.max(j)) as f64);
            if i > j { z } else { z.conj() }
        }
    }
}

/// Dense reference Cholesky factor, column-major lower triangle
pub fn dense_cholesky<T: Scalar>(n: usize, f: impl Fn(usize, usize) -> T) -> Vec<T> {
    let mut l = vec![T::zero(); n * n];
    for j in 0..n {
        let mut d = f(j, j).re_f64();
        for k in 0..j {
            d -= l[j + k * n].abs().powi(2);
        }
        let d = d.sqrt();
        l[j + j * n] = T::from_f64(d);
        for i in j + 1..n {
            let mut s = f(i, j);
            for k in 0..j {
                s -= l[i + k * n] * l[j + k * n].conj();
            }
            l[i + j * n] = s * T::from_f64(1.0 / d);
        }
    }
    l
}

/// Hermitian matrix over [`host_matrix`] filled from `f`
pub fn hermitian<T: Scalar>(
    uplo: Uplo,
    n: usize,
    nb: usize,
    p: usize,
    q: usize,
    comm: Arc<dyn Communicator>,
    num_devices: usize,
    f: impl Fn(usize, usize) -> T,
) -> HermitianMatrix<T> {
    let a = host_matrix(n, n, nb, p, q, comm, num_devices);
    fill(&a, f);
    HermitianMatrix::from_matrix(uplo, a).unwrap()
}

/// Assert two f64 slices are close within tolerance
///
/// Uses the formula: |a - b| <= atol + rtol * |b|
pub fn assert_allclose_f64(a: &[f64], b: &[f64], rtol: f64, atol: f64, msg: &str) {
    assert_eq!(a.len(), b.len(), "{}: length mismatch", msg);
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        let diff = (x - y).abs();
        let tol = atol + rtol * y.abs();
        assert!(
            diff <= tol,
            "{}: element {} differs: {} vs {} (diff={}, tol={})",
            msg,
            i,
            x,
            y,
            diff,
            tol
        );
    }
}
