use crate::coverage::data::PerFileCoverage;
use crate::coverage::lines::LineCoverageData;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Line and branch coverage of one source file
///
/// Lines are registered while classes get instrumented, which takes the write lock. Probes only
/// ever take the read lock, and count executions with atomics, so instrumented code running on
/// many threads at once does not contend on anything but the counters.
#[derive(Debug, Default)]
pub struct PerFileLineCoverage {
    table: RwLock<LineTable>,

    /// Set once any line of the file has run
    executed: AtomicBool,
}

#[derive(Debug, Default)]
struct LineTable {
    /// Executable lines, with extra data only for lines that need it (branches or flags)
    lines: BTreeMap<u32, Option<LineCoverageData>>,

    /// Execution counts indexed by line number
    execution_counts: Vec<AtomicU32>,

    last_line: u32,
}

impl LineTable {
    fn get_or_create(&mut self, line: u32) -> &mut LineCoverageData {
        self.lines
            .entry(line)
            .or_insert(None)
            .get_or_insert_with(LineCoverageData::default)
    }

    fn execution_count(&self, line: u32) -> u32 {
        self.execution_counts
            .get(line as usize)
            .map_or(0, |count| count.load(Ordering::Relaxed))
    }

    fn ensure_counts(&mut self, len: usize) {
        if self.execution_counts.len() < len {
            self.execution_counts.resize_with(len, AtomicU32::default);
        }
    }
}

impl PerFileLineCoverage {
    pub fn new() -> PerFileLineCoverage {
        PerFileLineCoverage::default()
    }

    /// Register an executable line
    ///
    /// Source files with more than one class can get lines added after other classes of the same
    /// file have already run, so counters are grown as needed.
    pub fn add_line(&self, line: u32) {
        let mut table = self.table.write();
        table.lines.entry(line).or_insert(None);
        if line > table.last_line {
            table.last_line = line;
        }
        table.ensure_counts(line as usize + 1);
    }

    /// Add a source/target branch pair to a line, returning the index of the source side
    pub fn add_branching_point(&self, line: u32) -> usize {
        self.table.write().get_or_create(line).add_branching_point()
    }

    pub(crate) fn set_branch_line(&self, line: u32, branch_index: usize, branch_line: u32) {
        let mut table = self.table.write();
        if let Some(branch) = table
            .lines
            .get_mut(&line)
            .and_then(Option::as_mut)
            .and_then(|data| data.branch_mut(branch_index))
        {
            branch.set_line(branch_line);
        }
    }

    pub fn mark_branch_as_unreachable(&self, line: u32, branch_index: usize) {
        let table = self.table.read();
        if let Some(branch) = table
            .lines
            .get(&line)
            .and_then(Option::as_ref)
            .and_then(|data| data.branch(branch_index))
        {
            branch.segment.mark_as_unreachable();
        }
    }

    pub fn mark_line_as_unreachable(&self, line: u32) {
        self.table
            .write()
            .get_or_create(line)
            .segment
            .mark_as_unreachable();
    }

    /// Undo [`PerFileLineCoverage::mark_line_as_unreachable`], for lines that turn out to do work
    pub fn mark_line_as_reachable(&self, line: u32) {
        let table = self.table.read();
        if let Some(Some(data)) = table.lines.get(&line) {
            data.segment.mark_as_reachable();
        }
    }

    pub fn mark_last_line_segment_as_empty(&self, line: u32) {
        let table = self.table.read();
        if let Some(Some(data)) = table.lines.get(&line) {
            data.mark_last_segment_as_empty();
        }
    }

    /// Record an execution of a line, returning the count from before
    pub fn register_execution(&self, line: u32) -> u32 {
        self.executed.store(true, Ordering::Relaxed);
        let table = self.table.read();
        match table.execution_counts.get(line as usize) {
            Some(count) => count.fetch_add(1, Ordering::Relaxed),
            None => {
                log::debug!("Execution of unregistered line {}", line);
                0
            }
        }
    }

    pub fn has_valid_branch(&self, line: u32, branch_index: usize) -> bool {
        let table = self.table.read();
        matches!(
            table.lines.get(&line),
            Some(Some(data)) if data.branch(branch_index).is_some()
        )
    }

    /// Record an execution of a branch, returning the count from before
    pub fn register_branch_execution(&self, line: u32, branch_index: usize) -> Option<u32> {
        let table = self.table.read();
        match table.lines.get(&line) {
            Some(Some(data)) => data.register_execution(branch_index),
            _ => None,
        }
    }

    /// Highest line registered
    pub fn line_count(&self) -> u32 {
        self.table.read().last_line
    }

    pub fn executable_line_count(&self) -> usize {
        self.table.read().lines.len()
    }

    pub fn has_line_data(&self, line: u32) -> bool {
        self.executed.load(Ordering::Relaxed) && self.table.read().lines.contains_key(&line)
    }

    /// Number of times a line ran, or `None` if nothing in the file has run yet
    pub fn execution_count(&self, line: u32) -> Option<u32> {
        if !self.executed.load(Ordering::Relaxed) {
            return None;
        }
        Some(self.table.read().execution_count(line))
    }

    /// Run a function on the data of a line that has branches or flags
    pub fn with_line_data<R>(&self, line: u32, f: impl FnOnce(&LineCoverageData) -> R) -> Option<R> {
        let table = self.table.read();
        table.lines.get(&line).and_then(Option::as_ref).map(f)
    }

    pub fn number_of_segments(&self, line: u32) -> u32 {
        match self.table.read().lines.get(&line) {
            None => 0,
            Some(None) => 1,
            Some(Some(data)) => data.number_of_segments(),
        }
    }

    pub fn number_of_branching_sources_and_targets(&self, line: u32) -> u32 {
        match self.table.read().lines.get(&line) {
            Some(Some(data)) => data.number_of_branching_sources_and_targets(),
            _ => 0,
        }
    }

    fn segment_totals(&self) -> (u32, u32) {
        let table = self.table.read();
        let mut total = 0;
        let mut covered = 0;
        for (&line, data) in &table.lines {
            if line == 0 {
                continue;
            }
            let execution_count = table.execution_count(line);
            match data {
                None => {
                    total += 1;
                    if execution_count > 0 {
                        covered += 1;
                    }
                }
                Some(data) => {
                    total += data.number_of_segments();
                    covered += data.number_of_covered_segments(execution_count);
                }
            }
        }
        (total, covered)
    }

    /// Fold in the counts of a previous run over the same source file
    pub fn merge_information(&self, previous: &PerFileLineCoverage) {
        if ptr::eq(self, previous) {
            return;
        }
        let previous_had_executions = previous.executed.load(Ordering::Relaxed);
        let previous_table = previous.table.read();
        let mut table = self.table.write();

        if previous_had_executions {
            let len = previous_table.execution_counts.len();
            table.ensure_counts(len);
            self.executed.store(true, Ordering::Relaxed);
        }

        let LineTable {
            lines,
            execution_counts,
            last_line,
        } = &mut *table;

        for (&line, previous_data) in &previous_table.lines {
            let previous_count = previous_table.execution_count(line);
            match lines.get_mut(&line) {
                Some(data) => {
                    let Some(previous_data) = previous_data else {
                        continue;
                    };
                    data.get_or_insert_with(LineCoverageData::default)
                        .add_counts_from_previous_test_run(previous_data);
                    if let Some(count) = execution_counts.get(line as usize) {
                        count.fetch_add(previous_count, Ordering::Relaxed);
                    }
                }
                None => {
                    lines.insert(line, previous_data.clone());
                    if let Some(count) = execution_counts.get(line as usize) {
                        count.store(previous_count, Ordering::Relaxed);
                    }
                    *last_line = (*last_line).max(line);
                }
            }
        }
    }
}

impl PerFileCoverage for PerFileLineCoverage {
    fn total_items(&self) -> u32 {
        self.segment_totals().0
    }

    fn covered_items(&self) -> u32 {
        self.segment_totals().1
    }
}
