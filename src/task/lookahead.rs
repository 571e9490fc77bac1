//! Per-column task layout of a right-looking blocked factorization

use super::graph::{Dep, Priority};
use smallvec::{smallvec, SmallVec};

/// Priority of the panel and lookahead tasks
pub const HIGH_PRIORITY: Priority = 1;
/// Priority of the bulk trailing update and workspace release
pub const NORMAL_PRIORITY: Priority = 0;

/// What a planned task does at step k
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StepTask {
    /// Factor block column k and broadcast it
    Panel,
    /// Update block column `j` with panel k ahead of the rest
    Lookahead {
        /// Updated block column
        j: usize,
    },
    /// Update block columns `first..nt` with panel k in one task
    Trailing {
        /// First updated block column
        first: usize,
    },
    /// Release the workspace held for block column k
    Release,
}

/// One task of the plan with its dependencies on block-column tokens
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedTask {
    /// Step (panel column) this task belongs to
    pub k: usize,
    /// Work done by the task
    pub task: StepTask,
    /// Block-column tokens it reads or writes
    pub deps: SmallVec<[Dep; 3]>,
    /// Scheduling priority
    pub priority: Priority,
}

/// Task layout for `nt` block columns with `lookahead` eager columns
///
/// At step k the panel writes column k; columns `k+1..=k+lookahead` each get
/// a high-priority update reading k; the remaining columns are updated by one
/// normal-priority task that writes the first and the last of them, which
/// orders it against the next step's panel and against later trailing tasks;
/// and a release task writes k after every reader of k.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LookaheadPlan {
    nt: usize,
    steps: usize,
    lookahead: usize,
}

impl LookaheadPlan {
    /// Plan for `nt` block columns, one step per column
    pub fn new(nt: usize, lookahead: usize) -> Self {
        Self {
            nt,
            steps: nt,
            lookahead,
        }
    }

    /// Stop after `steps` panels, as a wide matrix with fewer tile rows does
    pub fn with_steps(mut self, steps: usize) -> Self {
        self.steps = steps.min(self.nt);
        self
    }

    /// Number of steps
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Tasks of step `k`, in submission order
    pub fn step(&self, k: usize) -> Vec<PlannedTask> {
        let nt = self.nt;
        let mut tasks = vec![PlannedTask {
            k,
            task: StepTask::Panel,
            deps: smallvec![Dep::InOut(k)],
            priority: HIGH_PRIORITY,
        }];
        let eager_end = (k + 1 + self.lookahead).min(nt);
        for j in k + 1..eager_end {
            tasks.push(PlannedTask {
                k,
                task: StepTask::Lookahead { j },
                deps: smallvec![Dep::In(k), Dep::InOut(j)],
                priority: HIGH_PRIORITY,
            });
        }
        if eager_end < nt {
            tasks.push(PlannedTask {
                k,
                task: StepTask::Trailing { first: eager_end },
                deps: smallvec![Dep::In(k), Dep::InOut(eager_end), Dep::InOut(nt - 1)],
                priority: NORMAL_PRIORITY,
            });
        }
        tasks.push(PlannedTask {
            k,
            task: StepTask::Release,
            deps: smallvec![Dep::InOut(k)],
            priority: NORMAL_PRIORITY,
        });
        tasks
    }

    /// Every step's tasks in submission order
    pub fn tasks(&self) -> impl Iterator<Item = PlannedTask> + '_ {
        (0..self.steps).flat_map(|k| self.step(k))
    }
}
