use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Execution data for a line, or for one side of a branch on a line
///
/// The flags are static data decided while instrumenting. The execution count is bumped at
/// run-time by any number of threads running the instrumented code.
#[derive(Debug, Default)]
pub struct LineSegmentData {
    unreachable: AtomicBool,
    empty: AtomicBool,
    execution_count: AtomicU32,
}

impl LineSegmentData {
    pub fn mark_as_unreachable(&self) {
        self.unreachable.store(true, Ordering::Relaxed);
    }

    pub fn mark_as_reachable(&self) {
        self.unreachable.store(false, Ordering::Relaxed);
    }

    pub fn is_unreachable(&self) -> bool {
        self.unreachable.load(Ordering::Relaxed)
    }

    pub fn mark_as_empty(&self) {
        self.empty.store(true, Ordering::Relaxed);
    }

    pub fn is_empty(&self) -> bool {
        self.empty.load(Ordering::Relaxed)
    }

    /// Record one more execution, returning the count from before
    pub fn register_execution(&self) -> u32 {
        self.execution_count.fetch_add(1, Ordering::Relaxed)
    }

    pub fn execution_count(&self) -> u32 {
        self.execution_count.load(Ordering::Relaxed)
    }

    /// Whether the segment counts as covered, given how many times it ran
    pub fn is_covered_with(&self, execution_count: u32) -> bool {
        self.is_unreachable() || !self.is_empty() && execution_count > 0
    }

    pub fn is_covered(&self) -> bool {
        self.is_covered_with(self.execution_count())
    }

    pub(crate) fn add_execution_count_from_previous_test_run(&self, previous: &LineSegmentData) {
        self.execution_count
            .fetch_add(previous.execution_count(), Ordering::Relaxed);
    }
}

impl Clone for LineSegmentData {
    fn clone(&self) -> Self {
        LineSegmentData {
            unreachable: AtomicBool::new(self.is_unreachable()),
            empty: AtomicBool::new(self.is_empty()),
            execution_count: AtomicU32::new(self.execution_count()),
        }
    }
}

/// One side (source or target) of a conditional jump
///
/// The line of a branch is only settled once the whole method has been instrumented, since it
/// comes from the labels of the jump. A branch that ends up without a line is empty.
#[derive(Debug, Default, Clone)]
pub struct BranchCoverageData {
    pub segment: LineSegmentData,
    line: u32,
}

impl BranchCoverageData {
    pub fn line(&self) -> u32 {
        self.line
    }

    pub(crate) fn set_line(&mut self, line: u32) {
        self.line = line;
    }

    pub fn is_empty(&self) -> bool {
        self.segment.is_empty() || self.line == 0
    }

    pub fn is_covered(&self) -> bool {
        self.segment.is_covered()
    }
}
