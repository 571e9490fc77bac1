//! Fill and scale the local tiles of a matrix

use super::{for_each_tile, Target};
use crate::dtype::Scalar;
use crate::error::{Error, Result};
use crate::matrix::Matrix;
use crate::runtime::{Queue, Runtime};
use crate::tile::{kernels, LayoutConvert, Location, Op, Uplo};

fn in_trapezoid(uplo: Uplo, i: usize, j: usize) -> bool {
    match uplo {
        Uplo::Lower => i >= j,
        Uplo::Upper => i <= j,
        Uplo::General => true,
    }
}

fn local_tiles_in<T: Scalar, R: Runtime>(a: &Matrix<T, R>, uplo: Uplo) -> Vec<(usize, usize)> {
    a.local_tiles()
        .into_iter()
        .filter(|&(i, j)| in_trapezoid(uplo, i, j))
        .collect()
}

fn require_untransposed<T: Scalar, R: Runtime>(a: &Matrix<T, R>) -> Result<()> {
    if a.op() != Op::NoTrans {
        return Err(Error::NotImplemented {
            feature: "transposed views on Target::Devices",
        });
    }
    Ok(())
}

/// Set every off-diagonal element to `offdiag` and the diagonal to `diag`
pub fn set<T: Scalar, R: Runtime>(
    target: Target,
    offdiag: T,
    diag: T,
    a: &Matrix<T, R>,
) -> Result<()> {
    tzset(target, Uplo::General, offdiag, diag, a)
}

/// [`set`] restricted to the tiles of the `uplo` trapezoid
///
/// Diagonal tiles are set whole, as in [`set`].
pub fn tzset<T: Scalar, R: Runtime>(
    target: Target,
    uplo: Uplo,
    offdiag: T,
    diag: T,
    a: &Matrix<T, R>,
) -> Result<()> {
    let tiles = local_tiles_in(a, uplo);
    match target {
        Target::HostTask | Target::HostNest => for_each_tile(target, &tiles, |i, j| {
            let t = a.tile_get_for_writing(i, j, Location::Host, LayoutConvert::None)?;
            kernels::set(offdiag, if i == j { diag } else { offdiag }, &t);
            Ok(())
        }),
        Target::HostBatch => Err(Error::NotImplemented {
            feature: "set on Target::HostBatch",
        }),
        Target::Devices => {
            require_untransposed(a)?;
            for device in 0..a.num_devices() {
                let mine: Vec<_> = tiles
                    .iter()
                    .copied()
                    .filter(|&(i, j)| a.tile_device(i, j) == device)
                    .collect();
                if mine.is_empty() {
                    continue;
                }
                let groups = a.device_groups_for_writing(device, &mine)?;
                let queue = R::queue(&R::device(device), 0);
                let mut arrays = a.batch_arrays(device);
                for (group, ptrs) in groups {
                    let value = if group.diagonal { diag } else { offdiag };
                    let batch = arrays.load_a(ptrs);
                    let (mb, nb, ld) = (group.mb, group.nb, group.ld);
                    R::geset_batch(Uplo::General, mb, nb, offdiag, value, batch, ld, &queue)?;
                }
                queue.sync()?;
            }
            Ok(())
        }
    }
}

/// Multiply every element by `numer / denom`
pub fn scale<T: Scalar, R: Runtime>(
    target: Target,
    numer: T::Real,
    denom: T::Real,
    a: &Matrix<T, R>,
) -> Result<()> {
    if denom == <T::Real as Scalar>::zero() {
        return Err(Error::invalid_argument("denom", "must be nonzero"));
    }
    let tiles = a.local_tiles();
    match target {
        Target::HostTask | Target::HostNest => for_each_tile(target, &tiles, |i, j| {
            let t = a.tile_get_for_writing(i, j, Location::Host, LayoutConvert::None)?;
            kernels::scale(numer, denom, &t);
            Ok(())
        }),
        Target::HostBatch => Err(Error::NotImplemented {
            feature: "scale on Target::HostBatch",
        }),
        Target::Devices => {
            require_untransposed(a)?;
            for device in 0..a.num_devices() {
                let mine: Vec<_> = tiles
                    .iter()
                    .copied()
                    .filter(|&(i, j)| a.tile_device(i, j) == device)
                    .collect();
                if mine.is_empty() {
                    continue;
                }
                let groups = a.device_groups_for_writing(device, &mine)?;
                let queue = R::queue(&R::device(device), 0);
                let mut arrays = a.batch_arrays(device);
                for (group, ptrs) in groups {
                    let batch = arrays.load_a(ptrs);
                    let (mb, nb, ld) = (group.mb, group.nb, group.ld);
                    R::gescale_batch::<T>(mb, nb, numer, denom, batch, ld, &queue)?;
                }
                queue.sync()?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::LocalCluster;
    use crate::matrix::MatrixConfig;

    fn matrix(num_devices: usize) -> Matrix<f64> {
        let comm = LocalCluster::new(1).comm(0);
        let config = MatrixConfig {
            num_devices,
            device_capacity: None,
        };
        let a = Matrix::with_config(5, 5, 2, 1, 1, comm, config).unwrap();
        a.insert_local_tiles(Target::HostTask).unwrap();
        a
    }

    fn dense(a: &Matrix<f64>) -> Vec<Vec<f64>> {
        a.tile_update_all_origin().unwrap();
        let mut out = vec![vec![0.0; a.n()]; a.m()];
        for j in 0..a.nt() {
            for i in 0..a.mt() {
                let t = a.tile(i, j).unwrap();
                for jj in 0..t.nb() {
                    for ii in 0..t.mb() {
                        out[i * 2 + ii][j * 2 + jj] = t.at(ii, jj);
                    }
                }
            }
        }
        out
    }

    #[test]
    fn test_set_identity_host_and_devices_agree() {
        let host = matrix(0);
        set(Target::HostTask, 0.0, 1.0, &host).unwrap();
        let dev = matrix(2);
        set(Target::Devices, 0.0, 1.0, &dev).unwrap();
        let (h, d) = (dense(&host), dense(&dev));
        assert_eq!(h, d);
        for (i, row) in h.iter().enumerate() {
            for (j, &v) in row.iter().enumerate() {
                assert_eq!(v, if i == j { 1.0 } else { 0.0 });
            }
        }
    }

    #[test]
    fn test_tzset_lower_leaves_upper_tiles() {
        let a = matrix(0);
        set(Target::HostNest, 7.0, 7.0, &a).unwrap();
        tzset(Target::HostTask, Uplo::Lower, 1.0, 2.0, &a).unwrap();
        let d = dense(&a);
        assert_eq!(d[4][0], 1.0);
        assert_eq!(d[0][4], 7.0);
        // diagonal tiles are set whole
        assert_eq!(d[0][1], 1.0);
        assert_eq!(d[1][1], 2.0);
    }

    #[test]
    fn test_scale_on_devices() {
        let a = matrix(1);
        set(Target::HostTask, 3.0, 3.0, &a).unwrap();
        scale(Target::Devices, 2.0, 3.0, &a).unwrap();
        assert!(dense(&a).iter().flatten().all(|&v| (v - 2.0).abs() < 1e-12));
    }

    #[test]
    fn test_host_batch_not_implemented() {
        let a = matrix(0);
        assert!(matches!(
            set(Target::HostBatch, 0.0, 1.0, &a),
            Err(Error::NotImplemented { .. })
        ));
        assert!(matches!(
            scale(Target::HostBatch, 1.0, 2.0, &a),
            Err(Error::NotImplemented { .. })
        ));
    }
}
