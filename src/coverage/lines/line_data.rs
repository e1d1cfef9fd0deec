use crate::coverage::lines::{BranchCoverageData, LineSegmentData};

/// Coverage of a line that has conditional jumps on it
///
/// Branches come in pairs: the even index is the fall-through side of a jump (its source) and
/// the odd index right after it is the jump target.
#[derive(Debug, Default, Clone)]
pub struct LineCoverageData {
    pub segment: LineSegmentData,
    branches: Vec<BranchCoverageData>,
}

impl LineCoverageData {
    /// Add a source/target pair, returning the index of the source
    pub fn add_branching_point(&mut self) -> usize {
        let initial_index = self.branches.len();
        self.branches.push(BranchCoverageData::default());
        self.branches.push(BranchCoverageData::default());
        initial_index
    }

    pub fn mark_last_segment_as_empty(&self) {
        if let Some(last) = self.branches.last() {
            last.segment.mark_as_empty();
        }
    }

    pub fn branch(&self, index: usize) -> Option<&BranchCoverageData> {
        self.branches.get(index)
    }

    pub(crate) fn branch_mut(&mut self, index: usize) -> Option<&mut BranchCoverageData> {
        self.branches.get_mut(index)
    }

    pub fn branches(&self) -> &[BranchCoverageData] {
        &self.branches
    }

    pub fn contains_branches(&self) -> bool {
        !self.branches.is_empty()
    }

    /// Record an execution of a branch, returning the count from before
    pub fn register_execution(&self, branch_index: usize) -> Option<u32> {
        self.branches
            .get(branch_index)
            .map(|branch| branch.segment.register_execution())
    }

    fn pairs(&self) -> impl Iterator<Item = (&BranchCoverageData, &BranchCoverageData)> {
        self.branches
            .chunks_exact(2)
            .map(|pair| (&pair[0], &pair[1]))
    }

    /// Segments are the pieces of a line separated by jumps
    ///
    /// A line always has one segment. Each jump target with a known line adds a segment, plus
    /// another if the jump stays on its source line.
    pub fn number_of_segments(&self) -> u32 {
        let mut count = 1;
        for (source, target) in self.pairs() {
            let target_line = target.line();
            if target_line > 0 {
                if target_line == source.line() {
                    count += 1;
                }
                if !target.is_empty() {
                    count += 1;
                }
            }
        }
        count
    }

    pub fn number_of_covered_segments(&self, execution_count: u32) -> u32 {
        let mut covered = u32::from(self.segment.is_covered_with(execution_count));
        for (source, target) in self.pairs() {
            if source.is_covered() && !target.is_empty() {
                covered += 1;
            }
            if target.is_covered() && target.line() == source.line() {
                covered += 1;
            }
        }
        covered
    }

    pub fn number_of_branching_sources_and_targets(&self) -> u32 {
        self.pairs()
            .map(|(source, _)| if source.is_empty() { 1 } else { 2 })
            .sum()
    }

    pub fn number_of_covered_branching_sources_and_targets(&self) -> u32 {
        let mut covered = 0;
        for (source, target) in self.pairs() {
            if source.is_covered() {
                covered += 1;
            }
            if target.is_covered() && target.line() == source.line() {
                covered += 1;
            }
        }
        covered
    }

    pub(crate) fn add_counts_from_previous_test_run(&self, previous: &LineCoverageData) {
        self.segment
            .add_execution_count_from_previous_test_run(&previous.segment);
        for (branch, previous_branch) in self.branches.iter().zip(&previous.branches) {
            branch
                .segment
                .add_execution_count_from_previous_test_run(&previous_branch.segment);
        }
    }
}
