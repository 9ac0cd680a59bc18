use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;
use url::Url;

/// Line breakpoint placed in a suite or resource file.
#[derive(Debug)]
pub struct LineBreakpoint {
    path: Url,
    line: usize,
    hit_count: u32,
    hits: AtomicU32,
    condition: Option<String>,
    condition_enabled: bool,
}

impl LineBreakpoint {
    pub fn new(path: Url, line: usize) -> Self {
        Self {
            path,
            line,
            hit_count: 1,
            hits: AtomicU32::new(0),
            condition: None,
            condition_enabled: false,
        }
    }

    pub fn with_hit_count(mut self, hit_count: u32) -> Self {
        self.hit_count = hit_count;
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>, enabled: bool) -> Self {
        self.condition = Some(condition.into());
        self.condition_enabled = enabled;
        self
    }

    pub fn path(&self) -> &Url {
        &self.path
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn hit_count(&self) -> u32 {
        self.hit_count
    }

    /// Counts a hit and tells whether execution should stop on it. With hit count `n`
    /// only every n-th hit stops.
    pub fn evaluate_hit_count(&self) -> bool {
        if self.hit_count <= 1 {
            return true;
        }
        let hits = self.hits.fetch_add(1, Ordering::SeqCst) + 1;
        if hits >= self.hit_count {
            self.hits.store(0, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    pub fn is_condition_enabled(&self) -> bool {
        self.condition_enabled && self.condition.as_deref().is_some_and(|c| !c.trim().is_empty())
    }

    pub fn condition(&self) -> Option<&str> {
        self.condition.as_deref()
    }
}

/// Source of breakpoints for contexts being resolved while execution moves through files.
pub trait RobotBreakpointSupplier: Send + Sync {
    fn breakpoint_for(&self, path: &Url, line: usize) -> Option<Arc<LineBreakpoint>>;
}

impl<F> RobotBreakpointSupplier for F
where
    F: Fn(&Url, usize) -> Option<Arc<LineBreakpoint>> + Send + Sync,
{
    fn breakpoint_for(&self, path: &Url, line: usize) -> Option<Arc<LineBreakpoint>> {
        self(path, line)
    }
}

#[derive(Debug, Default)]
pub struct Breakpoints {
    points: RwLock<HashMap<Url, BTreeMap<usize, Arc<LineBreakpoint>>>>,
}

impl Breakpoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, breakpoint: LineBreakpoint) -> Arc<LineBreakpoint> {
        let breakpoint = Arc::new(breakpoint);
        debug!(path = %breakpoint.path, line = breakpoint.line, "breakpoint set");
        self.points
            .write()
            .entry(breakpoint.path.clone())
            .or_default()
            .insert(breakpoint.line, breakpoint.clone());
        breakpoint
    }

    pub fn remove(&self, path: &Url, line: usize) -> Option<Arc<LineBreakpoint>> {
        let mut points = self.points.write();
        let removed = points.get_mut(path).and_then(|lines| lines.remove(&line));
        if removed.is_some() {
            debug!(%path, line, "breakpoint removed");
        }
        removed
    }

    pub fn contains(&self, path: &Url, line: usize) -> bool {
        self.points
            .read()
            .get(path)
            .is_some_and(|lines| lines.contains_key(&line))
    }

    pub fn len(&self) -> usize {
        self.points.read().values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.points.write().clear();
    }
}

impl RobotBreakpointSupplier for Breakpoints {
    fn breakpoint_for(&self, path: &Url, line: usize) -> Option<Arc<LineBreakpoint>> {
        self.points
            .read()
            .get(path)
            .and_then(|lines| lines.get(&line))
            .cloned()
    }
}

/// Supplier used when no breakpoints are installed.
pub fn no_breakpoints() -> impl RobotBreakpointSupplier {
    |_: &Url, _: usize| -> Option<Arc<LineBreakpoint>> { None }
}
