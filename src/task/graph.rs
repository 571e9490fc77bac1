//! Dependency-token task graph executed on a scoped worker pool

use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use tracing::trace;

/// Identifies a unit of data tasks depend on, usually a block column
pub type Token = usize;

/// Scheduling priority; larger runs first among ready tasks
pub type Priority = i32;

/// How a task touches a token
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Dep {
    /// Reads: waits for the last writer, runs alongside other readers
    In(Token),
    /// Reads and writes: waits for the last writer and every reader since
    InOut(Token),
}

impl Dep {
    fn token(self) -> Token {
        match self {
            Dep::In(t) | Dep::InOut(t) => t,
        }
    }
}

type Job<'env> = Box<dyn FnOnce() -> Result<()> + Send + 'env>;

struct Node<'env> {
    job: Option<Job<'env>>,
    pending: usize,
    done: bool,
    successors: Vec<usize>,
}

#[derive(Default)]
struct TokenState {
    writer: Option<usize>,
    readers: Vec<usize>,
}

#[derive(PartialEq, Eq)]
struct Ready {
    priority: Priority,
    id: usize,
}

impl Ord for Ready {
    fn cmp(&self, other: &Self) -> Ordering {
        // higher priority first, then earlier submission
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Ready {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct State<'env> {
    nodes: Vec<Node<'env>>,
    priorities: Vec<Priority>,
    tokens: HashMap<Token, TokenState>,
    ready: BinaryHeap<Ready>,
    outstanding: usize,
    error: Option<Error>,
    panic: Option<Box<dyn Any + Send>>,
    shutdown: bool,
}

impl State<'_> {
    fn aborted(&self) -> bool {
        self.error.is_some() || self.panic.is_some()
    }

    fn complete(&mut self, id: usize) {
        self.nodes[id].done = true;
        self.outstanding -= 1;
        for s in std::mem::take(&mut self.nodes[id].successors) {
            let node = &mut self.nodes[s];
            node.pending -= 1;
            if node.pending == 0 {
                self.ready.push(Ready {
                    priority: self.priorities[s],
                    id: s,
                });
            }
        }
    }
}

/// Handle for submitting tasks inside [`TaskGraph::run`]
pub struct Scope<'env> {
    state: Mutex<State<'env>>,
    wake: Condvar,
}

impl<'env> Scope<'env> {
    fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            wake: Condvar::new(),
        }
    }

    /// Submit a task that runs once every task it depends on has finished
    ///
    /// Dependencies follow submission order: an `In` waits for the most
    /// recent `InOut` of the token, an `InOut` also waits for every `In`
    /// submitted after it. Once the region has failed, new tasks are skipped.
    pub fn spawn<F>(&self, deps: &[Dep], priority: Priority, f: F)
    where
        F: FnOnce() -> Result<()> + Send + 'env,
    {
        let mut st = self.state.lock();
        let id = st.nodes.len();
        let mut preds: Vec<usize> = Vec::new();
        for &dep in deps {
            let token = st.tokens.entry(dep.token()).or_default();
            preds.extend(token.writer);
            match dep {
                Dep::In(_) => token.readers.push(id),
                Dep::InOut(_) => {
                    preds.append(&mut token.readers);
                    token.writer = Some(id);
                }
            }
        }
        preds.sort_unstable();
        preds.dedup();
        preds.retain(|&p| p != id && !st.nodes[p].done);
        for &p in &preds {
            st.nodes[p].successors.push(id);
        }
        st.nodes.push(Node {
            job: Some(Box::new(f)),
            pending: preds.len(),
            done: false,
            successors: Vec::new(),
        });
        st.priorities.push(priority);
        st.outstanding += 1;
        if preds.is_empty() {
            st.ready.push(Ready { priority, id });
            self.wake.notify_one();
        }
        trace!(task = id, ?deps, priority, waiting_on = preds.len(), "task spawned");
    }

    /// Run tasks on this thread until every submitted task has finished
    ///
    /// Returns the first error any task produced so far.
    pub fn taskwait(&self) -> Result<()> {
        let mut st = self.state.lock();
        loop {
            if st.outstanding == 0 {
                break;
            }
            if let Some(ready) = st.ready.pop() {
                st = self.execute(st, ready.id);
            } else {
                self.wake.wait(&mut st);
            }
        }
        match &st.error {
            Some(e) => Err(Error::Internal(format!("task region failed: {e}"))),
            None => Ok(()),
        }
    }

    fn worker(&self) {
        let mut st = self.state.lock();
        loop {
            if let Some(ready) = st.ready.pop() {
                st = self.execute(st, ready.id);
            } else if st.shutdown {
                break;
            } else {
                self.wake.wait(&mut st);
            }
        }
    }

    fn execute<'a>(
        &'a self,
        mut st: parking_lot::MutexGuard<'a, State<'env>>,
        id: usize,
    ) -> parking_lot::MutexGuard<'a, State<'env>> {
        let job = st.nodes[id].job.take();
        let skip = st.aborted();
        drop(st);

        let outcome = match job {
            Some(job) if !skip => Some(panic::catch_unwind(AssertUnwindSafe(job))),
            _ => None,
        };

        let mut st = self.state.lock();
        match outcome {
            Some(Ok(Err(e))) => {
                trace!(task = id, error = %e, "task failed");
                if st.error.is_none() {
                    st.error = Some(e);
                }
            }
            Some(Err(payload)) => {
                if st.panic.is_none() {
                    st.panic = Some(payload);
                }
            }
            _ => {}
        }
        st.complete(id);
        self.wake.notify_all();
        st
    }

    fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.wake.notify_all();
    }
}

/// Scoped task region over a pool of worker threads
///
/// # Example
///
/// ```
/// use tessel::task::{Dep, TaskGraph};
/// use std::sync::Mutex;
///
/// let log = Mutex::new(Vec::new());
/// TaskGraph::run(Some(2), |scope| {
///     scope.spawn(&[Dep::InOut(0)], 0, || {
///         log.lock().unwrap().push("panel");
///         Ok(())
///     });
///     scope.spawn(&[Dep::In(0), Dep::InOut(1)], 1, || {
///         log.lock().unwrap().push("update");
///         Ok(())
///     });
///     Ok(())
/// })
/// .unwrap();
/// assert_eq!(*log.lock().unwrap(), ["panel", "update"]);
/// ```
pub struct TaskGraph;

impl TaskGraph {
    /// Run `f`, which submits tasks, and wait for all of them
    ///
    /// `num_threads` counts the calling thread, which executes tasks while
    /// waiting; `None` uses the available parallelism. The first task error
    /// stops the region: queued tasks are skipped and the error is returned.
    /// A panicking task is resumed on the caller once the workers have joined.
    pub fn run<'env, F, T>(num_threads: Option<usize>, f: F) -> Result<T>
    where
        F: FnOnce(&Scope<'env>) -> Result<T>,
    {
        let threads = num_threads
            .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, |n| n.get()))
            .max(1);
        let scope = Scope::new();

        let (out, waited) = std::thread::scope(|s| {
            for _ in 1..threads {
                s.spawn(|| scope.worker());
            }
            let out = panic::catch_unwind(AssertUnwindSafe(|| f(&scope)));
            let waited = scope.taskwait();
            scope.shutdown();
            (out, waited)
        });

        let mut st = scope.state.into_inner();
        if let Some(payload) = st.panic.take() {
            panic::resume_unwind(payload);
        }
        let out = match out {
            Ok(out) => out,
            Err(payload) => panic::resume_unwind(payload),
        };
        if let Some(e) = st.error.take() {
            return Err(e);
        }
        waited?;
        out
    }
}
