//! Bound breakpoint table

/// A breakpoint the debugger confirmed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundBreakpoint {
    /// Debugger-assigned id
    pub id: u32,
    /// Workspace path the IDE asked for (normalized)
    pub source: String,
    /// Workspace path of the file the debugger confirmed
    pub path: String,
    pub line: u32,
}

/// Breakpoints currently bound, grouped by the requesting source
#[derive(Debug, Default)]
pub struct BreakpointTable {
    bound: Vec<BoundBreakpoint>,
}

impl BreakpointTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids bound for a source file
    pub fn ids_for(&self, source: &str) -> Vec<u32> {
        self.bound
            .iter()
            .filter(|bp| bp.source == source)
            .map(|bp| bp.id)
            .collect()
    }

    /// Drop every breakpoint bound for a source file
    pub fn remove_source(&mut self, source: &str) -> Vec<BoundBreakpoint> {
        let (removed, kept) = std::mem::take(&mut self.bound)
            .into_iter()
            .partition(|bp| bp.source == source);
        self.bound = kept;
        removed
    }

    pub fn insert(&mut self, breakpoint: BoundBreakpoint) {
        self.bound.push(breakpoint);
    }

    /// Ids of breakpoints matching a stop location
    pub fn hits(&self, path: &str, line: u32) -> Vec<u32> {
        self.bound
            .iter()
            .filter(|bp| bp.line == line && (bp.path == path || bp.source == path))
            .map(|bp| bp.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.bound.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bound.is_empty()
    }
}
