//! Tuning options for distributed drivers

use crate::error::{Error, Result};
use crate::internal::Target;
use std::str::FromStr;

/// Options shared by the distributed drivers
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Options {
    /// Where tile work runs
    pub target: Target,
    /// Block columns updated eagerly after each panel
    pub lookahead: usize,
    /// Inner blocking size inside panel kernels
    pub inner_blocking: usize,
    /// Threads a panel factorization may use
    pub max_panel_threads: usize,
    /// Task-graph threads per rank; `None` uses the available parallelism
    pub num_threads: Option<usize>,
    /// Radix of broadcast and reduction hypercubes
    pub bcast_radix: usize,
    /// First message tag a driver uses
    pub tag_base: i32,
}

impl Default for Options {
    fn default() -> Self {
        let cores = std::thread::available_parallelism().map_or(1, |n| n.get());
        Self {
            target: Target::HostTask,
            lookahead: 1,
            inner_blocking: 16,
            max_panel_threads: (cores / 2).max(1),
            num_threads: None,
            bcast_radix: 2,
            tag_base: 0,
        }
    }
}

impl Options {
    /// Set the execution target
    pub fn with_target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    /// Set the lookahead depth
    pub fn with_lookahead(mut self, lookahead: usize) -> Self {
        self.lookahead = lookahead;
        self
    }

    /// Set the inner blocking size
    pub fn with_inner_blocking(mut self, ib: usize) -> Self {
        self.inner_blocking = ib;
        self
    }

    /// Set the panel thread limit
    pub fn with_max_panel_threads(mut self, threads: usize) -> Self {
        self.max_panel_threads = threads;
        self
    }

    /// Set the task-graph thread count
    pub fn with_num_threads(mut self, threads: usize) -> Self {
        self.num_threads = Some(threads);
        self
    }

    /// Set the broadcast radix
    pub fn with_bcast_radix(mut self, radix: usize) -> Self {
        self.bcast_radix = radix;
        self
    }

    /// Set the first message tag
    pub fn with_tag_base(mut self, tag: i32) -> Self {
        self.tag_base = tag;
        self
    }

    /// Defaults overridden by `TESSEL_TARGET`, `TESSEL_LOOKAHEAD`, `TESSEL_IB`
    /// and `TESSEL_NUM_THREADS`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut opts = Self::default();
        if let Some(v) = lookup("TESSEL_TARGET") {
            opts.target = v.parse()?;
        }
        if let Some(v) = lookup("TESSEL_LOOKAHEAD") {
            opts.lookahead = parse_var("TESSEL_LOOKAHEAD", &v)?;
        }
        if let Some(v) = lookup("TESSEL_IB") {
            opts.inner_blocking = parse_var("TESSEL_IB", &v)?;
        }
        if let Some(v) = lookup("TESSEL_NUM_THREADS") {
            opts.num_threads = Some(parse_var("TESSEL_NUM_THREADS", &v)?);
        }
        opts.validate()?;
        Ok(opts)
    }

    /// Check the values drivers rely on
    pub fn validate(&self) -> Result<()> {
        if self.inner_blocking == 0 {
            return Err(Error::invalid_argument("inner_blocking", "must be positive"));
        }
        if self.bcast_radix < 2 {
            return Err(Error::invalid_argument("bcast_radix", "must be at least 2"));
        }
        if self.num_threads == Some(0) {
            return Err(Error::invalid_argument("num_threads", "must be positive"));
        }
        Ok(())
    }
}

fn parse_var<V: FromStr>(name: &'static str, value: &str) -> Result<V> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::invalid_argument(name, format!("cannot parse {value:?}")))
}
