use crate::coverage::lines::PerFileLineCoverage;
use crate::jvm::code::{Label, Labels};
use crate::jvm::opcodes::{ICONST_0, ICONST_1, INVOKEVIRTUAL};
use std::collections::HashSet;
use std::mem;

/// Branch whose line is read off its label once the method is complete
#[derive(Debug, Clone, Copy)]
struct BranchLabel {
    line: u32,
    index: usize,
    label: Label,
}

/// Compiler-generated `boolean` value being pushed (`iconst_0`/`iconst_1` around a `goto`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BooleanValue {
    None,
    Found,
    FoundBeforeGoto,
}

/// Progress through the `String.hashCode()` dispatch of a switch over strings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StringSwitch {
    None,
    HashCodeCalled,
    InSwitch,
}

/// Control flow tracking of a method being instrumented, deciding where branch probes go
///
/// Every conditional jump registers a source/target branch pair on its line. The probe for the
/// source side is emitted right after the jump. The probe for the target side is queued when its
/// label is visited, and emitted before the next instruction that does any work.
#[derive(Debug)]
pub struct CfgTracking<'a> {
    line_coverage: &'a PerFileLineCoverage,
    visited_labels: HashSet<Label>,
    jump_targets_for_current_line: Vec<Label>,
    pending_branches: Vec<usize>,
    branch_labels: Vec<BranchLabel>,
    line_expecting_instruction_after_jump: u32,
    assert_found_in_current_line: bool,
    ignore_until_next_label: bool,
    boolean_value: BooleanValue,
    string_switch: StringSwitch,
}

impl<'a> CfgTracking<'a> {
    pub fn new(line_coverage: &'a PerFileLineCoverage) -> CfgTracking<'a> {
        CfgTracking {
            line_coverage,
            visited_labels: HashSet::new(),
            jump_targets_for_current_line: Vec::with_capacity(4),
            pending_branches: Vec::with_capacity(6),
            branch_labels: vec![],
            line_expecting_instruction_after_jump: 0,
            assert_found_in_current_line: false,
            ignore_until_next_label: false,
            boolean_value: BooleanValue::None,
            string_switch: StringSwitch::None,
        }
    }

    fn is_ignoring(&self) -> bool {
        self.ignore_until_next_label || self.string_switch != StringSwitch::None
    }

    pub fn start_new_line(&mut self) {
        self.pending_branches.clear();
        self.jump_targets_for_current_line.clear();
    }

    pub fn after_new_label(&mut self, current_line: u32, label: Label, labels: &mut Labels) {
        if self.is_ignoring() {
            self.ignore_until_next_label = false;
            return;
        }

        self.visited_labels.insert(label);

        if let Some(target_index) = self
            .jump_targets_for_current_line
            .iter()
            .position(|&target| target == label)
        {
            let line = labels.line(label);
            labels.set_jump_target_line(label, if line > 0 { line } else { current_line });
            self.pending_branches.push(2 * target_index + 1);
            self.assert_found_in_current_line = false;
        }

        self.boolean_value = BooleanValue::None;
    }

    pub fn after_goto(&mut self) {
        self.assert_found_in_current_line = false;
        if self.boolean_value == BooleanValue::Found {
            self.boolean_value = BooleanValue::FoundBeforeGoto;
        }
    }

    /// Register the branches of a conditional jump, returning the branch probes to emit now
    pub fn after_conditional_jump(
        &mut self,
        current_line: u32,
        labels: &mut Labels,
        jump_source: Label,
        jump_target: Label,
    ) -> Vec<usize> {
        if current_line == 0 || self.is_ignoring() || self.visited_labels.contains(&jump_target) {
            self.assert_found_in_current_line = false;
            return vec![];
        }

        labels.set_jump_target_line(jump_source, current_line);
        if !self.jump_targets_for_current_line.contains(&jump_target) {
            self.jump_targets_for_current_line.push(jump_target);
        }

        let source_index = self.line_coverage.add_branching_point(current_line);
        self.branch_labels.push(BranchLabel {
            line: current_line,
            index: source_index,
            label: jump_source,
        });
        self.branch_labels.push(BranchLabel {
            line: current_line,
            index: source_index + 1,
            label: jump_target,
        });
        self.pending_branches.push(source_index);

        if self.assert_found_in_current_line {
            self.line_coverage
                .mark_branch_as_unreachable(current_line, source_index + 1);
        }

        self.line_expecting_instruction_after_jump = 0;
        let probes = self.take_pending_branches(current_line);
        self.line_expecting_instruction_after_jump = current_line;
        probes
    }

    /// Branch probes to emit before an instruction that does work
    pub fn take_pending_branches(&mut self, current_line: u32) -> Vec<usize> {
        if self.is_ignoring() {
            return vec![];
        }

        self.boolean_value = BooleanValue::None;
        let pending = mem::take(&mut self.pending_branches);

        let expecting = self.line_expecting_instruction_after_jump;
        if expecting > 0 {
            if current_line > expecting {
                self.line_coverage
                    .mark_last_line_segment_as_empty(expecting);
            }
            self.line_expecting_instruction_after_jump = 0;
        }

        pending
    }

    pub fn has_only_one_label_being_visited(&self) -> bool {
        self.visited_labels.len() == 1
    }

    /// The current line is the `assert` check the compiler adds, which is not a real branch
    pub fn register_assert_found_in_current_line(&mut self) {
        self.assert_found_in_current_line = true;
        self.ignore_until_next_label = true;
    }

    pub fn before_no_operand_instruction(&mut self, opcode: u8, current_line: u32) -> Vec<usize> {
        let pushes_boolean =
            matches!(opcode, ICONST_0 | ICONST_1) && self.boolean_value == BooleanValue::None;
        let probes = self.take_pending_branches(current_line);
        if pushes_boolean {
            self.boolean_value = BooleanValue::Found;
        }
        probes
    }

    /// `String.hashCode()` starts the dispatch of a switch over strings, and jumps from there on
    /// are not tracked as branches
    pub fn after_method_instruction(&mut self, opcode: u8, owner: &str, name: &str) {
        if opcode == INVOKEVIRTUAL
            && name == "hashCode"
            && owner == "java/lang/String"
            && self.string_switch == StringSwitch::None
        {
            self.string_switch = StringSwitch::HashCodeCalled;
        }
    }

    pub fn before_lookup_switch_instruction(&mut self) {
        if self.string_switch == StringSwitch::HashCodeCalled {
            self.string_switch = StringSwitch::InSwitch;
        }
    }

    /// Settle the lines of the branches registered for the method, from the lines of their labels
    pub fn resolve_branch_lines(&self, labels: &Labels) {
        for branch in &self.branch_labels {
            let jump_target_line = labels.jump_target_line(branch.label);
            let line = if jump_target_line == 0 {
                labels.line(branch.label)
            } else {
                jump_target_line
            };
            self.line_coverage
                .set_branch_line(branch.line, branch.index, line);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::opcodes::{IRETURN, POP};

    #[test]
    fn jump_within_a_line() {
        let coverage = PerFileLineCoverage::new();
        coverage.add_line(5);
        let mut labels = Labels::new();
        let source = labels.new_label();
        let target = labels.new_label();

        let mut tracking = CfgTracking::new(&coverage);
        tracking.start_new_line();
        tracking.after_new_label(5, source, &mut labels);
        assert_eq!(tracking.after_conditional_jump(5, &mut labels, source, target), vec![0]);
        assert_eq!(labels.jump_target_line(source), 5);

        tracking.after_new_label(5, target, &mut labels);
        assert_eq!(labels.jump_target_line(target), 5);
        assert_eq!(tracking.before_no_operand_instruction(POP, 5), vec![1]);
        assert_eq!(tracking.before_no_operand_instruction(IRETURN, 5), Vec::<usize>::new());

        tracking.resolve_branch_lines(&labels);
        assert_eq!(coverage.number_of_segments(5), 3);
    }

    #[test]
    fn backward_jumps_are_not_branches() {
        let coverage = PerFileLineCoverage::new();
        coverage.add_line(3);
        let mut labels = Labels::new();
        let top = labels.new_label();
        let source = labels.new_label();

        let mut tracking = CfgTracking::new(&coverage);
        tracking.after_new_label(3, top, &mut labels);
        tracking.after_new_label(3, source, &mut labels);
        assert!(tracking
            .after_conditional_jump(3, &mut labels, source, top)
            .is_empty());
        assert_eq!(coverage.number_of_branching_sources_and_targets(3), 0);
    }

    #[test]
    fn assert_checks_are_not_branches() {
        let coverage = PerFileLineCoverage::new();
        coverage.add_line(8);
        let mut labels = Labels::new();
        let source = labels.new_label();
        let target = labels.new_label();

        let mut tracking = CfgTracking::new(&coverage);
        tracking.register_assert_found_in_current_line();
        assert!(tracking
            .after_conditional_jump(8, &mut labels, source, target)
            .is_empty());
        tracking.after_new_label(8, target, &mut labels);
        assert_eq!(coverage.number_of_branching_sources_and_targets(8), 0);
    }

    #[test]
    fn string_switch_dispatch_is_ignored() {
        let coverage = PerFileLineCoverage::new();
        coverage.add_line(12);
        let mut labels = Labels::new();
        let source = labels.new_label();
        let target = labels.new_label();

        let mut tracking = CfgTracking::new(&coverage);
        tracking.after_method_instruction(INVOKEVIRTUAL, "java/lang/String", "hashCode");
        tracking.before_lookup_switch_instruction();
        assert!(tracking
            .after_conditional_jump(12, &mut labels, source, target)
            .is_empty());
        assert!(tracking.take_pending_branches(12).is_empty());
        assert_eq!(coverage.number_of_branching_sources_and_targets(12), 0);
    }

    #[test]
    fn jump_to_a_later_line_empties_the_fall_through() {
        let coverage = PerFileLineCoverage::new();
        coverage.add_line(4);
        coverage.add_line(6);
        let mut labels = Labels::new();
        let source = labels.new_label();
        let target = labels.new_label();

        let mut tracking = CfgTracking::new(&coverage);
        tracking.after_conditional_jump(4, &mut labels, source, target);
        tracking.start_new_line();
        tracking.take_pending_branches(6);
        assert_eq!(
            coverage.with_line_data(4, |line| line.branch(1).unwrap().segment.is_empty()),
            Some(true)
        );
    }
}
