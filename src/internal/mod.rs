//! Tile-level building blocks of distributed algorithms
//!
//! Each operation here acts on the local tiles of a matrix view and takes a
//! [`Target`] that selects how the work runs on this rank. Drivers pick the
//! target once and pass it down; every operation matches on it exactly once.

mod geqrf;
mod pivot;
mod potrf;
mod set;
mod swap;
mod ttqrt;

pub use geqrf::{geqrf_panel, ttmqr_trailing, ttqrt_panel, unmqr_trailing};
pub use pivot::{make_parallel_pivot, Direction, Pivot, PivotMap};
pub use potrf::{gemm_trailing, herk_trailing, potrf_panel, trsm_panel};
pub use set::{scale, set, tzset};
pub use swap::{permute_rows, permute_rows_cols};
pub use ttqrt::{ttmqr, ttqrt};

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Where and how the tile work of one operation executes
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Target {
    /// One host task per tile
    #[default]
    HostTask,
    /// Host parallel loop over tiles
    HostNest,
    /// Host batched kernels
    HostBatch,
    /// Batched kernels on each device, one launch group per device
    Devices,
}

impl Target {
    /// Whether tile data is expected on the host
    pub fn is_host(self) -> bool {
        self != Target::Devices
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Target::HostTask => "host-task",
            Target::HostNest => "host-nest",
            Target::HostBatch => "host-batch",
            Target::Devices => "devices",
        };
        f.write_str(name)
    }
}

impl FromStr for Target {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "host-task" | "hosttask" | "t" => Ok(Target::HostTask),
            "host-nest" | "hostnest" | "n" => Ok(Target::HostNest),
            "host-batch" | "hostbatch" | "b" => Ok(Target::HostBatch),
            "devices" | "device" | "d" => Ok(Target::Devices),
            _ => Err(Error::invalid_argument("target", format!("unknown target '{}'", s))),
        }
    }
}

/// Run `f` on every tile in `tiles` on the host, as `target` prescribes
///
/// `HostTask` spawns one task per tile, `HostNest` runs a parallel loop.
/// Without the `rayon` feature both run in order on the calling thread. The
/// first error is returned once every tile has finished.
pub(crate) fn for_each_tile<F>(target: Target, tiles: &[(usize, usize)], f: F) -> Result<()>
where
    F: Fn(usize, usize) -> Result<()> + Sync,
{
    #[cfg(feature = "rayon")]
    {
        use rayon::prelude::*;
        match target {
            Target::HostTask => {
                let first_error = parking_lot::Mutex::new(None);
                rayon::scope(|s| {
                    for &(i, j) in tiles {
                        let (f, first_error) = (&f, &first_error);
                        s.spawn(move |_| {
                            if let Err(e) = f(i, j) {
                                let mut slot = first_error.lock();
                                if slot.is_none() {
                                    *slot = Some(e);
                                }
                            }
                        });
                    }
                });
                return first_error.into_inner().map_or(Ok(()), Err);
            }
            Target::HostNest => {
                return tiles.par_iter().try_for_each(|&(i, j)| f(i, j));
            }
            _ => {}
        }
    }

    #[cfg(not(feature = "rayon"))]
    let _ = target;

    tiles.iter().try_for_each(|&(i, j)| f(i, j))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_target_parse() {
        assert_eq!("devices".parse::<Target>().unwrap(), Target::Devices);
        assert_eq!("HOST_NEST".parse::<Target>().unwrap(), Target::HostNest);
        assert!("gpu".parse::<Target>().is_err());
        assert_eq!(Target::HostBatch.to_string(), "host-batch");
    }

    #[test]
    fn test_for_each_tile_visits_all_and_reports_error() {
        let tiles: Vec<_> = (0..4).flat_map(|j| (0..4).map(move |i| (i, j))).collect();
        for target in [Target::HostTask, Target::HostNest] {
            let count = AtomicUsize::new(0);
            for_each_tile(target, &tiles, |_, _| {
                count.fetch_add(1, Ordering::Relaxed);
                Ok(())
            })
            .unwrap();
            assert_eq!(count.load(Ordering::Relaxed), 16);

            let r = for_each_tile(target, &tiles, |i, j| {
                if (i, j) == (2, 3) { Err(Error::Internal("boom".into())) } else { Ok(()) }
            });
            assert!(r.is_err());
        }
    }
}
