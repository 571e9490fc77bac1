//! CPU runtime implementation

use super::batch;
use super::device::CpuDevice;
use super::queue::CpuQueue;
use crate::dtype::Scalar;
use crate::error::{Error, Result};
use crate::runtime::{host_allocate, host_deallocate, Runtime};
use crate::tile::{Location, Op, Uplo};

/// Reference runtime whose accelerators are emulated in host memory
///
/// Allocations are 64-byte aligned heap blocks, copies are `memcpy`, and the
/// batched kernels are naive loops. Every device keeps byte and launch
/// counters so tests can observe data movement and batching.
#[derive(Clone, Debug, Default)]
pub struct CpuRuntime;

fn check_square_inplace(m: usize, n: usize, lda: usize, ldat: usize) -> Result<()> {
    if m != n || lda != ldat {
        return Err(Error::invalid_argument(
            "at",
            format!("in-place transpose needs a square matrix, got {}x{}", m, n),
        ));
    }
    Ok(())
}

impl Runtime for CpuRuntime {
    type Device = CpuDevice;
    type Queue = CpuQueue;

    fn name() -> &'static str {
        "cpu"
    }

    fn device(index: usize) -> Self::Device {
        CpuDevice::new(index)
    }

    fn allocate(size_bytes: usize, device: &Self::Device) -> Result<u64> {
        let ptr = host_allocate(size_bytes).map_err(|e| match e {
            Error::OutOfMemory { size, .. } => Error::OutOfMemory {
                location: Location::Device(crate::runtime::Device::id(device)),
                size,
            },
            other => other,
        })?;
        device.stats().record_alloc(size_bytes);
        Ok(ptr)
    }

    fn deallocate(ptr: u64, size_bytes: usize, device: &Self::Device) {
        if ptr == 0 || size_bytes == 0 {
            return;
        }
        host_deallocate(ptr, size_bytes);
        device.stats().record_free(size_bytes);
    }

    fn copy_to_device(src: &[u8], dst: u64, device: &Self::Device) -> Result<()> {
        if src.is_empty() || dst == 0 {
            return Ok(());
        }
        // SAFETY: dst is a device block of at least src.len() bytes
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), dst as *mut u8, src.len());
        }
        device.stats().record_h2d(src.len());
        Ok(())
    }

    fn copy_from_device(src: u64, dst: &mut [u8], device: &Self::Device) -> Result<()> {
        if dst.is_empty() || src == 0 {
            return Ok(());
        }
        // SAFETY: src is a device block of at least dst.len() bytes
        unsafe {
            std::ptr::copy_nonoverlapping(src as *const u8, dst.as_mut_ptr(), dst.len());
        }
        device.stats().record_d2h(dst.len());
        Ok(())
    }

    fn copy_within_device(
        src: u64,
        dst: u64,
        size_bytes: usize,
        _device: &Self::Device,
    ) -> Result<()> {
        if size_bytes == 0 || src == 0 || dst == 0 {
            return Ok(());
        }
        // SAFETY: both blocks hold size_bytes; copy handles overlap
        unsafe {
            std::ptr::copy(src as *const u8, dst as *mut u8, size_bytes);
        }
        Ok(())
    }

    fn queue(device: &Self::Device, index: usize) -> Self::Queue {
        CpuQueue::new(device.clone(), index)
    }

    fn geset_batch<T: Scalar>(
        uplo: Uplo,
        m: usize,
        n: usize,
        offdiag: T,
        diag: T,
        a: &[u64],
        lda: usize,
        queue: &Self::Queue,
    ) -> Result<()> {
        queue.device.stats().record_launch();
        for &ptr in a {
            // SAFETY: batch arrays hold live device tiles of at least lda x n
            unsafe { batch::geset(uplo, m, n, offdiag, diag, ptr, lda) };
        }
        Ok(())
    }

    fn gescale_batch<T: Scalar>(
        m: usize,
        n: usize,
        numer: T::Real,
        denom: T::Real,
        a: &[u64],
        lda: usize,
        queue: &Self::Queue,
    ) -> Result<()> {
        queue.device.stats().record_launch();
        let factor = T::from_real(numer) / T::from_real(denom);
        for &ptr in a {
            // SAFETY: as above
            unsafe { batch::gescale(m, n, factor, ptr, lda) };
        }
        Ok(())
    }

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
    ) -> Result<()> {
        if a.len() != c.len() || b.len() != c.len() {
            return Err(Error::invalid_argument("batch", "pointer arrays differ in length"));
        }
        queue.device.stats().record_launch();
        for idx in 0..c.len() {
            // SAFETY: as above
            unsafe {
                batch::gemm(
                    transa, transb, m, n, k, alpha, a[idx], lda, b[idx], ldb, beta, c[idx], ldc,
                )
            };
        }
        Ok(())
    }

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
    ) -> Result<()> {
        if a.len() != c.len() {
            return Err(Error::invalid_argument("batch", "pointer arrays differ in length"));
        }
        queue.device.stats().record_launch();
        let (alpha, beta) = (T::from_real(alpha), T::from_real(beta));
        for idx in 0..c.len() {
            // SAFETY: as above
            unsafe { batch::herk(uplo, trans, n, k, alpha, a[idx], lda, beta, c[idx], ldc) };
        }
        Ok(())
    }

    fn transpose<T: Scalar>(
        m: usize,
        n: usize,
        a: u64,
        lda: usize,
        at: u64,
        ldat: usize,
        queue: &Self::Queue,
    ) -> Result<()> {
        if a == at {
            check_square_inplace(m, n, lda, ldat)?;
        }
        queue.device.stats().record_launch();
        // SAFETY: a is m x n with lda, at is n x m with ldat
        unsafe { batch::transpose::<T>(m, n, a, lda, at, ldat) };
        Ok(())
    }

    fn swap<T: Scalar>(
        n: usize,
        x: u64,
        incx: usize,
        y: u64,
        incy: usize,
        queue: &Self::Queue,
    ) -> Result<()> {
        queue.device.stats().record_launch();
        // SAFETY: both vectors hold n elements at their increments
        unsafe { batch::swap::<T>(n, x, incx, y, incy) };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Queue;

    #[test]
    fn test_copy_roundtrip_counts_bytes() {
        let dev = CpuRuntime::device(7);
        let before = dev.stats().host_to_device_bytes();
        let ptr = CpuRuntime::allocate(32, &dev).unwrap();
        CpuRuntime::copy_to_device(&[1u8; 32], ptr, &dev).unwrap();
        let mut out = [0u8; 32];
        CpuRuntime::copy_from_device(ptr, &mut out, &dev).unwrap();
        assert_eq!(out, [1u8; 32]);
        assert!(dev.stats().host_to_device_bytes() >= before + 32);
        CpuRuntime::deallocate(ptr, 32, &dev);
    }

    #[test]
    fn test_gemm_batch_two_tiles() {
        let dev = CpuRuntime::device(0);
        let queue = CpuRuntime::queue(&dev, 0);
        // A = I (2x2), B = [[1,2],[3,4]] col-major, C = 0
        let a = [1.0f64, 0.0, 0.0, 1.0];
        let b = [1.0f64, 3.0, 2.0, 4.0];
        let mut c1 = [0.0f64; 4];
        let mut c2 = [1.0f64; 4];
        let ap = a.as_ptr() as u64;
        let bp = b.as_ptr() as u64;
        CpuRuntime::gemm_batch::<f64>(
            Op::NoTrans,
            Op::Trans,
            2,
            2,
            2,
            2.0,
            &[ap, ap],
            2,
            &[bp, bp],
            2,
            1.0,
            &[c1.as_mut_ptr() as u64, c2.as_mut_ptr() as u64],
            2,
            &queue,
        )
        .unwrap();
        queue.sync().unwrap();
        // 2 * B^T = [[2,6],[4,8]] col-major [2,4,6,8]
        assert_eq!(c1, [2.0, 4.0, 6.0, 8.0]);
        assert_eq!(c2, [3.0, 5.0, 7.0, 9.0]);
    }

    #[test]
    fn test_transpose_rectangular_and_inplace() {
        let dev = CpuRuntime::device(0);
        let queue = CpuRuntime::queue(&dev, 0);
        let a = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]; // 2x3
        let mut at = [0.0f32; 6];
        CpuRuntime::transpose::<f32>(2, 3, a.as_ptr() as u64, 2, at.as_mut_ptr() as u64, 3, &queue)
            .unwrap();
        assert_eq!(at, [1.0, 3.0, 5.0, 2.0, 4.0, 6.0]);

        let p = at.as_mut_ptr() as u64;
        assert!(CpuRuntime::transpose::<f32>(2, 3, p, 2, p, 2, &queue).is_err());
    }
}
