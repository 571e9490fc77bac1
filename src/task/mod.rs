//! Task regions with block-column dependency tokens
//!
//! Drivers submit one task per unit of work together with the block columns
//! it reads and writes; [`TaskGraph`] runs a task once the tasks it depends
//! on have finished. [`LookaheadPlan`] lays out the tasks of one
//! right-looking factorization step.

mod graph;
mod lookahead;

pub use graph::{Dep, Priority, Scope, TaskGraph, Token};
pub use lookahead::{LookaheadPlan, PlannedTask, StepTask, HIGH_PRIORITY, NORMAL_PRIORITY};
