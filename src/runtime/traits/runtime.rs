//! Core trait for device backends

use crate::dtype::Scalar;
use crate::error::Result;
use crate::tile::{Op, Uplo};

/// Core trait for device backends
///
/// `Runtime` abstracts over accelerator memory and batched kernels. It uses
/// static dispatch via generics: a matrix is parameterized by its runtime and
/// every call resolves at compile time.
///
/// Device buffers are addressed by `u64` pointers. Batched kernels take one
/// pointer per tile and shared dimensions for the whole batch; callers group
/// tiles by shape first (see [`crate::batch`]). All matrices passed to the
/// kernels are column-major with the given leading dimension.
///
/// # Example
///
/// ```
/// use tessel::runtime::{Runtime, cpu::CpuRuntime};
///
/// let device = CpuRuntime::device(0);
/// let ptr = CpuRuntime::allocate(1024, &device).unwrap();
/// CpuRuntime::copy_to_device(&[7u8; 16], ptr, &device).unwrap();
/// let mut back = [0u8; 16];
/// CpuRuntime::copy_from_device(ptr, &mut back, &device).unwrap();
/// assert_eq!(back, [7u8; 16]);
/// CpuRuntime::deallocate(ptr, 1024, &device);
/// ```
#[allow(clippy::too_many_arguments)]
pub trait Runtime: Clone + Send + Sync + 'static {
    /// Device identifier type
    type Device: super::Device;

    /// Execution queue type
    type Queue: super::Queue;

    /// Human-readable name of this runtime
    fn name() -> &'static str;

    /// Handle for accelerator `index`
    fn device(index: usize) -> Self::Device;

    /// Allocate device memory
    ///
    /// Returns `Err(OutOfMemory)` if allocation fails.
    fn allocate(size_bytes: usize, device: &Self::Device) -> Result<u64>;

    /// Deallocate device memory
    fn deallocate(ptr: u64, size_bytes: usize, device: &Self::Device);

    /// Copy data from host to device
    fn copy_to_device(src: &[u8], dst: u64, device: &Self::Device) -> Result<()>;

    /// Copy data from device to host
    fn copy_from_device(src: u64, dst: &mut [u8], device: &Self::Device) -> Result<()>;

    /// Copy data within device (device to device)
    fn copy_within_device(src: u64, dst: u64, size_bytes: usize, device: &Self::Device)
    -> Result<()>;

    /// Queue `index` on a device
    fn queue(device: &Self::Device, index: usize) -> Self::Queue;

    /// Set each m x n matrix (or its `uplo` trapezoid) to `offdiag`, with `diag` on the diagonal
    fn geset_batch<T: Scalar>(
        uplo: Uplo,
        m: usize,
        n: usize,
        offdiag: T,
        diag: T,
        a: &[u64],
        lda: usize,
        queue: &Self::Queue,
    ) -> Result<()>;

    /// Scale each m x n matrix by `numer / denom`
    fn gescale_batch<T: Scalar>(
        m: usize,
        n: usize,
        numer: T::Real,
        denom: T::Real,
        a: &[u64],
        lda: usize,
        queue: &Self::Queue,
    ) -> Result<()>;

    /// C\[b\] = alpha op(A\[b\]) op(B\[b\]) + beta C\[b\]
    fn gemm_batch<T: Scalar>(
        transa: Op,
        transb: Op,
        m: usize,
        n: usize,
        k: usize,
        alpha: T,
        a: &[u64],
        lda: usize,
        b: &[u64],
        ldb: usize,
        beta: T,
        c: &[u64],
        ldc: usize,
        queue: &Self::Queue,
    ) -> Result<()>;

    /// C\[b\] = alpha op(A\[b\]) op(A\[b\])^H + beta C\[b\] on the `uplo` triangle
    fn herk_batch<T: Scalar>(
        uplo: Uplo,
        trans: Op,
        n: usize,
        k: usize,
        alpha: T::Real,
        a: &[u64],
        lda: usize,
        beta: T::Real,
        c: &[u64],
        ldc: usize,
        queue: &Self::Queue,
    ) -> Result<()>;

    /// Write the transpose of the m x n matrix `a` into `at`
    ///
    /// `a == at` is allowed for square matrices with `lda == ldat`.
    fn transpose<T: Scalar>(
        m: usize,
        n: usize,
        a: u64,
        lda: usize,
        at: u64,
        ldat: usize,
        queue: &Self::Queue,
    ) -> Result<()>;

    /// Exchange `n` elements of two strided vectors
    fn swap<T: Scalar>(
        n: usize,
        x: u64,
        incx: usize,
        y: u64,
        incy: usize,
        queue: &Self::Queue,
    ) -> Result<()>;
}
