//! In-process cluster: ranks are threads sharing tag-matched mailboxes

use super::Communicator;
use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

type MailboxKey = (usize, usize, i32);

#[derive(Default)]
struct BarrierState {
    waiting: usize,
    generation: u64,
}

struct World {
    size: usize,
    mailboxes: Mutex<HashMap<MailboxKey, VecDeque<Vec<u8>>>>,
    delivered: Condvar,
    barrier: Mutex<BarrierState>,
    released: Condvar,
    timeout: Option<Duration>,
    // set when a rank thread panics so peers stop waiting on it
    failed: AtomicBool,
}

impl World {
    fn check_failed(&self) -> Result<()> {
        if self.failed.load(Ordering::Acquire) {
            return Err(Error::comm("a peer rank failed"));
        }
        Ok(())
    }

    fn fail(&self) {
        self.failed.store(true, Ordering::Release);
        // take each lock so no waiter misses the wakeup
        drop(self.mailboxes.lock());
        self.delivered.notify_all();
        drop(self.barrier.lock());
        self.released.notify_all();
    }
}

/// A group of ranks running as threads of the current process
///
/// # Example
///
/// ```
/// use tessel::comm::{Communicator, LocalCluster};
///
/// let sums = LocalCluster::run(3, |comm| {
///     let next = (comm.rank() + 1) % comm.size();
///     let prev = (comm.rank() + comm.size() - 1) % comm.size();
///     comm.send(next, 0, vec![comm.rank() as u8]).unwrap();
///     comm.recv(prev, 0).unwrap()[0]
/// });
/// assert_eq!(sums, vec![2, 0, 1]);
/// ```
#[derive(Clone)]
pub struct LocalCluster {
    world: Arc<World>,
}

impl LocalCluster {
    /// Create a world of `size` ranks
    pub fn new(size: usize) -> Self {
        Self::build(size, None)
    }

    /// Same world size, but blocking receives and barriers fail after `timeout`
    ///
    /// Builds a fresh world, so call it before handing out communicators.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self::build(self.world.size, Some(timeout))
    }

    fn build(size: usize, timeout: Option<Duration>) -> Self {
        assert!(size > 0, "a cluster needs at least one rank");
        Self {
            world: Arc::new(World {
                size,
                mailboxes: Mutex::new(HashMap::new()),
                delivered: Condvar::new(),
                barrier: Mutex::new(BarrierState::default()),
                released: Condvar::new(),
                timeout,
                failed: AtomicBool::new(false),
            }),
        }
    }

    /// Number of ranks
    pub fn size(&self) -> usize {
        self.world.size
    }

    /// Communicator handle for `rank`
    pub fn comm(&self, rank: usize) -> Arc<dyn Communicator> {
        assert!(rank < self.world.size);
        Arc::new(LocalComm {
            rank,
            world: Arc::clone(&self.world),
        })
    }

    /// Run `f` once per rank, each on its own thread, and collect the results by rank
    ///
    /// If any rank panics, blocked peers are released with an error and the
    /// first panic is resumed on the calling thread once all ranks return.
    pub fn run_on<F, T>(&self, f: F) -> Vec<T>
    where
        F: Fn(Arc<dyn Communicator>) -> T + Sync,
        T: Send,
    {
        let results: Vec<std::thread::Result<T>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..self.world.size)
                .map(|rank| {
                    let comm = self.comm(rank);
                    let world = Arc::clone(&self.world);
                    let f = &f;
                    s.spawn(move || {
                        let out = panic::catch_unwind(AssertUnwindSafe(|| f(comm)));
                        if out.is_err() {
                            world.fail();
                        }
                        out
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(Err))
                .collect()
        });
        let mut out = Vec::with_capacity(results.len());
        for r in results {
            match r {
                Ok(v) => out.push(v),
                Err(payload) => panic::resume_unwind(payload),
            }
        }
        out
    }

    /// Shorthand for `LocalCluster::new(size).run_on(f)`
    pub fn run<F, T>(size: usize, f: F) -> Vec<T>
    where
        F: Fn(Arc<dyn Communicator>) -> T + Sync,
        T: Send,
    {
        Self::new(size).run_on(f)
    }
}

/// One rank's view of a [`LocalCluster`]
pub struct LocalComm {
    rank: usize,
    world: Arc<World>,
}

impl LocalComm {
    fn deadline(&self) -> Option<Instant> {
        self.world.timeout.map(|t| Instant::now() + t)
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.world.size
    }

    fn send(&self, dst: usize, tag: i32, data: Vec<u8>) -> Result<()> {
        if dst >= self.world.size {
            return Err(Error::invalid_argument(
                "dst",
                format!("rank {} outside world of {}", dst, self.world.size),
            ));
        }
        self.world.check_failed()?;
        trace!(src = self.rank, dst, tag, bytes = data.len(), "send");
        self.world
            .mailboxes
            .lock()
            .entry((self.rank, dst, tag))
            .or_default()
            .push_back(data);
        self.world.delivered.notify_all();
        Ok(())
    }

    fn recv(&self, src: usize, tag: i32) -> Result<Vec<u8>> {
        if src >= self.world.size {
            return Err(Error::invalid_argument(
                "src",
                format!("rank {} outside world of {}", src, self.world.size),
            ));
        }
        let deadline = self.deadline();
        let key = (src, self.rank, tag);
        let mut boxes = self.world.mailboxes.lock();
        loop {
            if let Some(msg) = boxes.get_mut(&key).and_then(|q| q.pop_front()) {
                trace!(src, dst = self.rank, tag, bytes = msg.len(), "recv");
                return Ok(msg);
            }
            self.world.check_failed()?;
            match deadline {
                Some(at) => {
                    if self.world.delivered.wait_until(&mut boxes, at).timed_out() {
                        debug!(src, dst = self.rank, tag, "receive timed out");
                        return Err(Error::CommTimeout { src, tag });
                    }
                }
                None => self.world.delivered.wait(&mut boxes),
            }
        }
    }

    fn barrier(&self) -> Result<()> {
        let deadline = self.deadline();
        let mut state = self.world.barrier.lock();
        let generation = state.generation;
        state.waiting += 1;
        if state.waiting == self.world.size {
            state.waiting = 0;
            state.generation += 1;
            self.world.released.notify_all();
            return Ok(());
        }
        while state.generation == generation {
            self.world.check_failed()?;
            match deadline {
                Some(at) => {
                    if self.world.released.wait_until(&mut state, at).timed_out()
                        && state.generation == generation
                    {
                        return Err(Error::comm("barrier timed out"));
                    }
                }
                None => self.world.released.wait(&mut state),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_per_tag() {
        let out = LocalCluster::run(2, |comm| {
            if comm.rank() == 0 {
                comm.send(1, 5, vec![1]).unwrap();
                comm.send(1, 6, vec![9]).unwrap();
                comm.send(1, 5, vec![2]).unwrap();
                Vec::new()
            } else {
                let a = comm.recv(0, 5).unwrap();
                let b = comm.recv(0, 5).unwrap();
                let c = comm.recv(0, 6).unwrap();
                vec![a[0], b[0], c[0]]
            }
        });
        assert_eq!(out[1], vec![1, 2, 9]);
    }

    #[test]
    fn test_barrier_repeats() {
        let out = LocalCluster::run(4, |comm| {
            for _ in 0..3 {
                comm.barrier().unwrap();
            }
            comm.rank()
        });
        assert_eq!(out, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_recv_timeout() {
        let cluster = LocalCluster::new(2).with_timeout(Duration::from_millis(20));
        let comm = cluster.comm(0);
        assert!(matches!(comm.recv(1, 3), Err(Error::CommTimeout { src: 1, tag: 3 })));
    }

    #[test]
    fn test_peer_panic_releases_waiters() {
        let result = panic::catch_unwind(|| {
            LocalCluster::run(2, |comm| {
                if comm.rank() == 0 {
                    panic!("rank 0 fails");
                }
                comm.recv(0, 0).is_err()
            })
        });
        assert!(result.is_err());
    }
}
