//! Batched kernels for emulated devices
//!
//! Each function processes one batch of same-shaped column-major matrices.
//! Device buffers are host memory, so the kernels index them directly.

use crate::dtype::Scalar;
use crate::tile::{Op, Uplo};

#[inline]
unsafe fn elem<T>(base: u64, ld: usize, i: usize, j: usize) -> *mut T {
    // SAFETY: caller guarantees (i, j) is inside an ld-strided matrix at base
    unsafe { (base as *mut T).add(i + j * ld) }
}

#[inline]
unsafe fn op_at<T: Scalar>(op: Op, base: u64, ld: usize, i: usize, j: usize) -> T {
    // SAFETY: forwarded from caller
    unsafe {
        match op {
            Op::NoTrans => *elem::<T>(base, ld, i, j),
            Op::Trans => *elem::<T>(base, ld, j, i),
            Op::ConjTrans => (*elem::<T>(base, ld, j, i)).conj(),
        }
    }
}

#[inline]
fn in_triangle(uplo: Uplo, i: usize, j: usize) -> bool {
    match uplo {
        Uplo::Lower => i >= j,
        Uplo::Upper => i <= j,
        Uplo::General => true,
    }
}

pub(super) unsafe fn geset<T: Scalar>(
    uplo: Uplo,
    m: usize,
    n: usize,
    offdiag: T,
    diag: T,
    a: u64,
    lda: usize,
) {
    for j in 0..n {
        for i in 0..m {
            if in_triangle(uplo, i, j) {
                // SAFETY: i < m <= lda, j < n
                unsafe { *elem::<T>(a, lda, i, j) = if i == j { diag } else { offdiag } };
            }
        }
    }
}

pub(super) unsafe fn gescale<T: Scalar>(m: usize, n: usize, factor: T, a: u64, lda: usize) {
    for j in 0..n {
        for i in 0..m {
            // SAFETY: i < m <= lda, j < n
            unsafe {
                let p = elem::<T>(a, lda, i, j);
                *p = *p * factor;
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub(super) unsafe fn gemm<T: Scalar>(
    transa: Op,
    transb: Op,
    m: usize,
    n: usize,
    k: usize,
    alpha: T,
    a: u64,
    lda: usize,
    b: u64,
    ldb: usize,
    beta: T,
    c: u64,
    ldc: usize,
) {
    for j in 0..n {
        for i in 0..m {
            let mut sum = T::zero();
            for l in 0..k {
                // SAFETY: op(A) is m x k, op(B) is k x n
                unsafe {
                    sum += op_at::<T>(transa, a, lda, i, l) * op_at::<T>(transb, b, ldb, l, j)
                };
            }
            // SAFETY: C is m x n
            unsafe {
                let p = elem::<T>(c, ldc, i, j);
                *p = alpha * sum + beta * *p;
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub(super) unsafe fn herk<T: Scalar>(
    uplo: Uplo,
    trans: Op,
    n: usize,
    k: usize,
    alpha: T,
    a: u64,
    lda: usize,
    beta: T,
    c: u64,
    ldc: usize,
) {
    for j in 0..n {
        for i in 0..n {
            if !in_triangle(uplo, i, j) {
                continue;
            }
            let mut sum = T::zero();
            for l in 0..k {
                // SAFETY: op(A) is n x k
                unsafe {
                    sum += op_at::<T>(trans, a, lda, i, l) * op_at::<T>(trans, a, lda, j, l).conj()
                };
            }
            // SAFETY: C is n x n
            unsafe {
                let p = elem::<T>(c, ldc, i, j);
                let mut value = alpha * sum + beta * *p;
                if i == j {
                    value = T::from_real(value.real());
                }
                *p = value;
            }
        }
    }
}

pub(super) unsafe fn transpose<T: Scalar>(
    m: usize,
    n: usize,
    a: u64,
    lda: usize,
    at: u64,
    ldat: usize,
) {
    if a == at {
        for j in 0..n {
            for i in (j + 1)..m {
                // SAFETY: square in-place, both indices < m == n
                unsafe { std::ptr::swap(elem::<T>(a, lda, i, j), elem::<T>(a, lda, j, i)) };
            }
        }
    } else {
        for j in 0..n {
            for i in 0..m {
                // SAFETY: A is m x n, At is n x m
                unsafe { *elem::<T>(at, ldat, j, i) = *elem::<T>(a, lda, i, j) };
            }
        }
    }
}

pub(super) unsafe fn swap<T: Scalar>(n: usize, x: u64, incx: usize, y: u64, incy: usize) {
    for k in 0..n {
        // SAFETY: both vectors hold n strided elements
        unsafe {
            std::ptr::swap((x as *mut T).add(k * incx), (y as *mut T).add(k * incy));
        }
    }
}
